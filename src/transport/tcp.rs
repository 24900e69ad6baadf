use super::{Dialer, Transport, TransportType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// 明文 TCP 拨号器
pub struct TcpDialer {
    address: String,
    /// Keepalive 首次探测时间
    keepalive_time: Option<Duration>,
    /// Keepalive 探测间隔
    keepalive_interval: Option<Duration>,
}

impl TcpDialer {
    pub fn new(address: String) -> Self {
        Self {
            address,
            keepalive_time: Some(Duration::from_secs(30)),
            keepalive_interval: Some(Duration::from_secs(10)),
        }
    }

    /// 关闭 TCP keepalive
    pub fn without_keepalive(mut self) -> Self {
        self.keepalive_time = None;
        self.keepalive_interval = None;
        self
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> Result<Pin<Box<dyn Transport>>> {
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("Failed to connect to {}", self.address))?;

        apply_keepalive(&stream, self.keepalive_time, self.keepalive_interval);
        debug!("TCP connection established to {}", self.address);

        Ok(Box::pin(stream))
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Tcp
    }
}

fn apply_keepalive(stream: &TcpStream, time: Option<Duration>, interval: Option<Duration>) {
    if time.is_none() && interval.is_none() {
        return;
    }

    let mut keepalive = TcpKeepalive::new();
    if let Some(time) = time {
        keepalive = keepalive.with_time(time);
    }
    if let Some(interval) = interval {
        keepalive = keepalive.with_interval(interval);
    }

    let sock_ref = SockRef::from(stream);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!(
            "Failed to set TCP keepalive on {}: {}",
            stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".into()),
            e
        );
    }
}
