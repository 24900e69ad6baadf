use super::{Dialer, Transport, TransportType};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::{rustls, TlsConnector};
use tracing::debug;

/// TLS 拨号器
pub struct TlsDialer {
    address: String,
    server_name: String,
    connector: TlsConnector,
}

impl TlsDialer {
    pub fn new(
        address: String,
        server_name: String,
        client_config: Arc<rustls::ClientConfig>,
    ) -> Self {
        Self {
            address,
            server_name,
            connector: TlsConnector::from(client_config),
        }
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self) -> Result<Pin<Box<dyn Transport>>> {
        let tcp_stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("Failed to connect to {}", self.address))?;

        let server_name = ServerName::try_from(self.server_name.clone())
            .context("Invalid server name")?
            .to_owned();

        let tls_stream = self
            .connector
            .connect(server_name, tcp_stream)
            .await
            .context("TLS handshake failed")?;

        debug!("TLS connection established to {}", self.address);
        Ok(Box::pin(tls_stream))
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Tls
    }
}
