/// 代理核心库入口
///
/// 前向 HTTP/HTTPS 代理的自适应路由与连接保活核心：
/// 按目标主机判定走代理还是直连，并维护出站与隧道连接
pub mod auth;
pub mod checker;
pub mod config;
pub mod conn_manager;
pub mod error;
pub mod heartbeat;
pub mod pool;
pub mod tls;
pub mod transport;

// 重新导出常用类型
pub use auth::BasicAuth;
pub use checker::{CheckerConfig, CheckerEntry, DomainChecker, DomainSet, NetProber, Prober};
pub use config::AppConfig;
pub use conn_manager::{Closeable, ConnManager, ManagedStream};
pub use error::{ProxyError, Result};
pub use heartbeat::{HeartbeatErrorHandler, HeartbeatHandle, HeartbeatStream};
pub use pool::{OutboundPool, PoolConfig, PoolStats};
pub use transport::{create_dialer, Dialer, TcpDialer, TlsDialer, Transport, TransportType};
