mod tcp;
mod tls;

pub use tcp::TcpDialer;
pub use tls::TlsDialer;

use crate::config::UpstreamSettings;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// 上游传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// 明文 TCP
    #[default]
    Tcp,
    /// TCP + TLS
    Tls,
    /// KCP（基于 UDP 的可靠传输）
    Kcp,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Tcp => write!(f, "tcp"),
            TransportType::Tls => write!(f, "tls"),
            TransportType::Kcp => write!(f, "kcp"),
        }
    }
}

impl std::str::FromStr for TransportType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tcp" | "plain" => Ok(Self::Tcp),
            "tls" => Ok(Self::Tls),
            "kcp" => Ok(Self::Kcp),
            _ => anyhow::bail!("Unknown transport type: {}", s),
        }
    }
}

/// 传输层连接抽象
///
/// 统一封装不同传输方式（TCP、TLS、KCP）建立的连接
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

// 为所有满足条件的类型自动实现 Transport
impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 拨号器接口
///
/// 对固定上游地址建立一条新连接，超时控制由调用方负责
#[async_trait]
pub trait Dialer: Send + Sync {
    /// 建立一条到上游的新连接
    async fn dial(&self) -> Result<Pin<Box<dyn Transport>>>;

    /// 上游地址（用于日志与错误信息）
    fn address(&self) -> &str;

    /// 获取传输类型
    fn transport_type(&self) -> TransportType;
}

/// 根据上游配置创建拨号器
pub fn create_dialer(config: &UpstreamSettings) -> Result<Arc<dyn Dialer>> {
    let dialer: Arc<dyn Dialer> = match config.transport {
        TransportType::Tcp => Arc::new(TcpDialer::new(config.address.clone())),
        TransportType::Tls => {
            let server_name = config
                .tls
                .server_name
                .clone()
                .unwrap_or_else(|| host_of(&config.address));
            let client_config = crate::tls::load_client_config(
                config.tls.ca_cert.as_deref(),
                config.tls.skip_verify,
            )?;
            Arc::new(TlsDialer::new(
                config.address.clone(),
                server_name,
                client_config,
            ))
        }
        // KCP 的套接字拨号由宿主注入，见 OutboundPool::new
        TransportType::Kcp => anyhow::bail!(
            "KCP transport requires an externally provided dialer"
        ),
    };

    Ok(dialer)
}

/// 从 host:port 中取出 host 部分
fn host_of(address: &str) -> String {
    match address.rsplit_once(':') {
        Some((host, _port)) => host.to_string(),
        None => address.to_string(),
    }
}
