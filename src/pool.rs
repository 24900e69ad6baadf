/// 上游连接池
///
/// 面向单一固定上游地址，按配置的传输类型产出可用连接。
/// 池的价值在于约束并发拨号与缓存刚验证过的连接：
/// release 总是关闭连接，不做物理复用。
use crate::error::{ProxyError, Result};
use crate::transport::{Dialer, Transport};
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 关闭连接时允许的最长冲刷时间
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

type Conn = Pin<Box<dyn Transport>>;

/// 连接池配置
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 初始连接数（为 0 时不预热、不启动健康检查）
    pub initial_capacity: usize,
    /// 最大连接数
    pub max_capacity: usize,
    /// 拨号超时
    pub dial_timeout: Duration,
    /// 健康检查间隔（为 0 时禁用）
    pub health_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            max_capacity: 10,
            dial_timeout: Duration::from_millis(5000),
            health_interval: Duration::ZERO,
        }
    }
}

/// 连接池统计信息
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
    pub max_capacity: usize,
}

/// 上游连接池
pub struct OutboundPool {
    dialer: Arc<dyn Dialer>,
    config: PoolConfig,
    idle: Mutex<Vec<Conn>>,
    active: AtomicUsize,
    shutdown: CancellationToken,
}

impl OutboundPool {
    /// 创建连接池并预热 initial_capacity 条连接
    ///
    /// 预热失败只记录日志，不阻止池的创建
    pub async fn new(dialer: Arc<dyn Dialer>, config: PoolConfig) -> Self {
        let pool = Self {
            dialer,
            config,
            idle: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        };

        if pool.config.initial_capacity > 0 {
            pool.warmup().await;
            info!(
                "Connection pool ready for {} (idle: {})",
                pool.dialer.address(),
                pool.idle.lock().await.len()
            );
        } else {
            debug!("Connection pool for {} starts cold", pool.dialer.address());
        }

        pool
    }

    /// 启动健康检查后台任务
    ///
    /// 仅在预热容量与检查间隔都大于 0 时运行；
    /// 每个周期向上游拨一条探测连接，失败时清空整个池，
    /// 成功时立即关闭探测连接
    pub fn start_health_daemon(self: Arc<Self>) {
        if self.config.initial_capacity == 0 || self.config.health_interval.is_zero() {
            return;
        }

        let pool = self;
        tokio::spawn(async move {
            info!("Pool health daemon started for {}", pool.dialer.address());
            loop {
                tokio::select! {
                    _ = pool.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pool.config.health_interval) => {
                        match pool.dial_upstream().await {
                            Ok(probe) => {
                                close_conn(probe).await;
                            }
                            Err(e) => {
                                warn!(
                                    "Pool health check failed for {}: {}, releasing pool",
                                    pool.dialer.address(),
                                    e
                                );
                                pool.invalidate().await;
                            }
                        }
                    }
                }
            }
            debug!("Pool health daemon exited");
        });
    }

    /// 停止健康检查任务
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// 取出一条可用连接：优先用池内空闲连接，否则新拨一条
    pub async fn get(&self) -> Result<Conn> {
        if let Some(conn) = self.idle.lock().await.pop() {
            self.active.fetch_add(1, Ordering::Relaxed);
            debug!("Reusing pooled connection to {}", self.dialer.address());
            return Ok(conn);
        }

        let total = self.active.load(Ordering::Relaxed) + self.idle.lock().await.len();
        if total >= self.config.max_capacity {
            return Err(ProxyError::pool_exhausted(
                self.dialer.address(),
                self.config.max_capacity,
            ));
        }

        let conn = self.dial_upstream().await?;
        self.active.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    /// 归还连接：总是关闭，不回池
    pub async fn release(&self, conn: Conn) {
        self.active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .ok();
        close_conn(conn).await;
    }

    /// 清空池内所有空闲连接，后续 get 将重新拨号
    pub async fn invalidate(&self) {
        let drained: Vec<Conn> = {
            let mut idle = self.idle.lock().await;
            idle.drain(..).collect()
        };
        if !drained.is_empty() {
            warn!(
                "Invalidating {} pooled connections to {}",
                drained.len(),
                self.dialer.address()
            );
        }
        for conn in drained {
            close_conn(conn).await;
        }
    }

    /// 池的统计信息
    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.active.load(Ordering::Relaxed),
            idle: self.idle.lock().await.len(),
            max_capacity: self.config.max_capacity,
        }
    }

    /// 预热：拨出初始容量的连接放入空闲列表
    async fn warmup(&self) {
        for _ in 0..self.config.initial_capacity {
            match self.dial_upstream().await {
                Ok(conn) => self.idle.lock().await.push(conn),
                Err(e) => {
                    warn!(
                        "Failed to warm up connection to {}: {}",
                        self.dialer.address(),
                        e
                    );
                }
            }
        }
    }

    /// 在超时约束下向上游拨一条新连接
    async fn dial_upstream(&self) -> Result<Conn> {
        let conn = tokio::time::timeout(self.config.dial_timeout, self.dialer.dial())
            .await
            .map_err(|_| ProxyError::timeout(self.config.dial_timeout))??;
        Ok(conn)
    }
}

/// 有界优雅关闭后丢弃连接
async fn close_conn(mut conn: Conn) {
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, conn.shutdown()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use crate::transport::TransportType;
    use std::sync::atomic::AtomicBool;
    use tokio::io::AsyncReadExt;
    use tokio::sync::Mutex as TokioMutex;

    /// 基于内存双工管道的拨号器，可开关故障模式
    struct MockDialer {
        dial_count: AtomicUsize,
        failing: AtomicBool,
        peers: TokioMutex<Vec<tokio::io::DuplexStream>>,
    }

    impl MockDialer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                dial_count: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                peers: TokioMutex::new(Vec::new()),
            })
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn dials(&self) -> usize {
            self.dial_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Dialer for MockDialer {
        async fn dial(&self) -> anyhow::Result<Conn> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("upstream unreachable"));
            }
            self.dial_count.fetch_add(1, Ordering::SeqCst);
            let (local, peer) = tokio::io::duplex(64);
            self.peers.lock().await.push(peer);
            Ok(Box::pin(local))
        }

        fn address(&self) -> &str {
            "mock:0"
        }

        fn transport_type(&self) -> TransportType {
            TransportType::Tcp
        }
    }

    fn test_config() -> PoolConfig {
        PoolConfig {
            initial_capacity: 2,
            max_capacity: 4,
            dial_timeout: Duration::from_millis(500),
            health_interval: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_warmup_fills_idle() {
        let dialer = MockDialer::new();
        let pool = OutboundPool::new(dialer.clone(), test_config()).await;

        let stats = pool.stats().await;
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.active, 0);
        assert_eq!(dialer.dials(), 2);
    }

    #[tokio::test]
    async fn test_get_prefers_idle_then_dials() {
        let dialer = MockDialer::new();
        let pool = OutboundPool::new(dialer.clone(), test_config()).await;
        assert_eq!(dialer.dials(), 2);

        // 前两次 get 消耗空闲连接，不新增拨号
        let c1 = pool.get().await.unwrap();
        let c2 = pool.get().await.unwrap();
        assert_eq!(dialer.dials(), 2);

        // 第三次 get 触发新拨号
        let c3 = pool.get().await.unwrap();
        assert_eq!(dialer.dials(), 3);

        pool.release(c1).await;
        pool.release(c2).await;
        pool.release(c3).await;
    }

    #[tokio::test]
    async fn test_get_exhaustion() {
        let dialer = MockDialer::new();
        let config = PoolConfig {
            initial_capacity: 0,
            max_capacity: 2,
            ..test_config()
        };
        let pool = OutboundPool::new(dialer.clone(), config).await;

        let _c1 = pool.get().await.unwrap();
        let _c2 = pool.get().await.unwrap();

        let err = match pool.get().await {
            Ok(_) => panic!("expected pool exhaustion error"),
            Err(e) => e,
        };
        assert!(err.is_pool_exhausted());
    }

    #[tokio::test]
    async fn test_release_always_closes() {
        let dialer = MockDialer::new();
        let config = PoolConfig {
            initial_capacity: 0,
            ..test_config()
        };
        let pool = OutboundPool::new(dialer.clone(), config).await;

        let conn = pool.get().await.unwrap();
        pool.release(conn).await;

        // 归还即关闭：对端读到 EOF，且连接不回空闲列表
        let mut peer = dialer.peers.lock().await.remove(0);
        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
        assert_eq!(pool.stats().await.idle, 0);
        assert_eq!(pool.stats().await.active, 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_redial() {
        let dialer = MockDialer::new();
        let pool = OutboundPool::new(dialer.clone(), test_config()).await;
        assert_eq!(pool.stats().await.idle, 2);

        pool.invalidate().await;
        assert_eq!(pool.stats().await.idle, 0);

        let dials_before = dialer.dials();
        let _conn = pool.get().await.unwrap();
        assert_eq!(dialer.dials(), dials_before + 1);
    }

    #[tokio::test]
    async fn test_get_surfaces_dial_failure() {
        let dialer = MockDialer::new();
        let config = PoolConfig {
            initial_capacity: 0,
            ..test_config()
        };
        let pool = OutboundPool::new(dialer.clone(), config).await;

        dialer.set_failing(true);
        assert!(pool.get().await.is_err());
    }

    #[tokio::test]
    async fn test_health_daemon_invalidates_on_failure() {
        let dialer = MockDialer::new();
        let config = PoolConfig {
            initial_capacity: 2,
            max_capacity: 4,
            dial_timeout: Duration::from_millis(500),
            health_interval: Duration::from_millis(20),
        };
        let pool = Arc::new(OutboundPool::new(dialer.clone(), config).await);
        pool.clone().start_health_daemon();
        assert_eq!(pool.stats().await.idle, 2);

        // 模拟上游故障：健康检查失败后应清空整个池
        dialer.set_failing(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.stats().await.idle, 0);

        // 上游恢复后 get 触发全新拨号
        dialer.set_failing(false);
        let dials_before = dialer.dials();
        let _conn = pool.get().await.unwrap();
        assert_eq!(dialer.dials(), dials_before + 1);

        pool.stop();
    }
}
