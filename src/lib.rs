//! CampusHub - 校园二手市场实时网关
//!
//! 模块划分：
//! - **bus**: 进程内发布/订阅总线（按主题扇出，满则丢弃）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与优雅退出
//! - **gateway**: WebSocket 接入、JWT 鉴权、Hub 路由循环
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **observability**: tracing 日志初始化
//! - **store**: 商品库、图片库与签名器抽象（内存 / SQLite）
//! - **worker**: 查询流水线与消费循环

pub mod bus;
pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod observability;
pub mod store;
pub mod worker;
