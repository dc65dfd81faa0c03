//! 核心层：错误分类与优雅退出

pub mod error;
pub mod shutdown;

pub use error::{AuthError, DeliveryError, ErrorCode, IntentError, LlmError, StoreError};
pub use shutdown::{ShutdownManager, ShutdownReason};
