//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CAMPUSHUB__*` 覆盖（双下划线表示嵌套，如 `CAMPUSHUB__AUTH__JWT_SECRET=...`）。
//! 所有字段都有默认值，无配置文件也能启动。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub auth: AuthSection,
    pub connection: ConnectionSection,
    pub bus: BusSection,
    pub llm: LlmSection,
    pub search: SearchSection,
    pub storage: StorageSection,
    pub worker: WorkerSection,
}

/// [server] 段：监听地址与 WebSocket 路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: String,
    pub ws_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8081".to_string(),
            ws_path: "/ws".to_string(),
        }
    }
}

/// [auth] 段：HS256 签名密钥（由外部登录服务签发 token）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: String,
}

impl AuthSection {
    /// 未配置时读取 JWT_SECRET（与登录服务共用同一密钥）
    pub fn resolved_secret(&self) -> Option<String> {
        Some(self.jwt_secret.clone())
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var("JWT_SECRET").ok())
            .filter(|s| !s.trim().is_empty())
    }
}

/// [connection] 段：心跳、读写超时与出站队列容量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    /// 读超时：此时间内没有任何帧（含 pong）则断开
    pub pong_wait_secs: u64,
    /// 发送 ping 的周期，必须小于 pong_wait_secs
    pub ping_period_secs: u64,
    /// 单帧写超时
    pub write_wait_secs: u64,
    /// 入站单帧最大字节数
    pub max_message_bytes: usize,
    /// 每个连接的出站队列容量，满则丢弃
    pub send_buffer: usize,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            pong_wait_secs: 60,
            ping_period_secs: 54,
            write_wait_secs: 10,
            max_message_bytes: 512 * 1024,
            send_buffer: 256,
        }
    }
}

impl ConnectionSection {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    /// ping 周期；配置错误（不小于 pong_wait）时回退为 pong_wait 的 9/10
    pub fn ping_period(&self) -> Duration {
        if self.ping_period_secs == 0 || self.ping_period_secs >= self.pong_wait_secs {
            return self.pong_wait() * 9 / 10;
        }
        Duration::from_secs(self.ping_period_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }
}

/// [bus] 段：每个订阅队列的容量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSection {
    pub subscriber_capacity: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            subscriber_capacity: 100,
        }
    }
}

/// [llm] 段：OpenAI 兼容端点（Gemini 走其 OpenAI 兼容地址）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时依次读取 OPENAI_API_KEY、GEMINI_API_KEY；都没有则不启用 LLM
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            base_url: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl LlmSection {
    /// 解析最终使用的 API Key（空串视为未配置）
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// [search] 段：检索分页与相关性阈值（阈值是经验值，可调）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub page_size: usize,
    /// 多关键词查询的最低得分
    pub multi_keyword_min_score: i64,
    /// 单关键词查询的最低得分
    pub single_keyword_min_score: i64,
    /// 阈值过滤后为空时保留的最高分条数
    pub fallback_top_n: usize,
    /// 单次商品库 / 图片库 / 签名调用的超时（秒）
    pub timeout_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            page_size: 10,
            multi_keyword_min_score: 150,
            single_keyword_min_score: 50,
            fallback_top_n: 3,
            timeout_secs: 5,
        }
    }
}

impl SearchSection {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// [storage] 段：商品库来源与图片签名地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// JSON 商品目录（内存库的种子数据）
    pub catalog_path: Option<PathBuf>,
    /// SQLite 库路径（需 async-sqlite feature），设置后优先于 catalog_path
    pub sqlite_path: Option<PathBuf>,
    /// 对象存储的公开访问前缀
    pub presign_base_url: Option<String>,
    pub presign_expiry_minutes: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            catalog_path: None,
            sqlite_path: None,
            presign_base_url: None,
            presign_expiry_minutes: 15,
        }
    }
}

/// [worker] 段：订阅循环数量与单循环并发上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub loops: usize,
    pub max_concurrent: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            loops: 1,
            max_concurrent: 10,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CAMPUSHUB__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CAMPUSHUB__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CAMPUSHUB")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.connection.send_buffer, 256);
        assert_eq!(cfg.connection.pong_wait(), Duration::from_secs(60));
        assert_eq!(cfg.connection.ping_period(), Duration::from_secs(54));
        assert_eq!(cfg.bus.subscriber_capacity, 100);
        assert_eq!(cfg.search.multi_keyword_min_score, 150);
        assert_eq!(cfg.search.fallback_top_n, 3);
        assert_eq!(cfg.llm.timeout_secs, 30);
    }

    #[test]
    fn test_ping_period_clamped_below_pong_wait() {
        let section = ConnectionSection {
            pong_wait_secs: 10,
            ping_period_secs: 30,
            ..ConnectionSection::default()
        };
        assert_eq!(section.ping_period(), Duration::from_secs(9));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("override.toml");
        std::fs::write(
            &path,
            "[server]\nbind_addr = \"0.0.0.0:9999\"\n[search]\npage_size = 5\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.server.bind_addr, "0.0.0.0:9999");
        assert_eq!(cfg.search.page_size, 5);
        assert_eq!(cfg.server.ws_path, "/ws");
    }
}
