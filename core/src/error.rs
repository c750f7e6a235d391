use thiserror::Error;

/// 记录解码失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer too small for {record}: need {need} bytes, got {got}")]
    TooShort {
        record: &'static str,
        need: usize,
        got: usize,
    },
}

/// 配置项取值非法
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid kernel version {0:?}, expected MAJOR.MINOR[.PATCH]")]
    KernelVersion(String),
    #[error("{field} must be greater than zero")]
    ZeroCapacity { field: &'static str },
}
