/// 自定义错误类型
///
/// 使用 thiserror 定义精确的错误类型，替代泛型的 anyhow::Error
/// 这样可以让调用者进行更精确的错误处理和恢复
use std::io;
use std::time::Duration;
use thiserror::Error;

/// 代理核心的主要错误类型
#[derive(Error, Debug)]
pub enum ProxyError {
    /// 连接失败
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 认证失败
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 协议错误（心跳帧格式违例等）
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// 超时错误
    #[error("Operation timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// 连接池容量耗尽
    #[error("Connection pool exhausted for {addr} (max: {max})")]
    PoolExhausted { addr: String, max: usize },

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 其他错误（保留与 anyhow 的兼容性）
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// 创建连接失败错误
    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    /// 创建认证失败错误
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed(msg.into())
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// 创建协议错误
    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// 创建超时错误
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// 创建连接池耗尽错误
    pub fn pool_exhausted(addr: impl Into<String>, max: usize) -> Self {
        Self::PoolExhausted {
            addr: addr.into(),
            max,
        }
    }

    /// 检查是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 检查是否为认证失败
    pub fn is_auth_failed(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }

    /// 检查是否为连接池耗尽
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// 检查是否为协议错误
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::ProtocolError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ProxyError::auth_failed("Invalid credentials");
        assert!(err.is_auth_failed());
        assert_eq!(
            err.to_string(),
            "Authentication failed: Invalid credentials"
        );
    }

    #[test]
    fn test_timeout_error() {
        let err = ProxyError::timeout(Duration::from_secs(30));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_pool_exhausted() {
        let err = ProxyError::pool_exhausted("127.0.0.1:9090", 10);
        assert!(err.is_pool_exhausted());
        assert_eq!(
            err.to_string(),
            "Connection pool exhausted for 127.0.0.1:9090 (max: 10)"
        );
    }

    #[test]
    fn test_connection_failed() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = ProxyError::connection_failed("127.0.0.1:8080", io_err);
        assert!(err.to_string().contains("Failed to connect"));
        assert!(err.to_string().contains("127.0.0.1:8080"));
    }

    #[test]
    fn test_error_is_checks() {
        let auth_err = ProxyError::auth_failed("test");
        let proto_err = ProxyError::protocol_error("bad frame");
        let timeout_err = ProxyError::timeout(Duration::from_secs(1));

        assert!(auth_err.is_auth_failed());
        assert!(!auth_err.is_timeout());

        assert!(proto_err.is_protocol_error());
        assert!(!proto_err.is_auth_failed());

        assert!(timeout_err.is_timeout());
        assert!(!timeout_err.is_protocol_error());
    }
}
