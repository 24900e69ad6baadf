/// 连接管理器
///
/// 按客户端键维护连接集合，支持单条关闭与整组原子拆除。
/// 注册表为两级映射：客户端键 -> (连接 ID -> 连接)。
use crate::heartbeat::HeartbeatHandle;
use crate::transport::Transport;
use async_trait::async_trait;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// 可关闭连接的统一抽象
#[async_trait]
pub trait Closeable: Send + Sync {
    /// 关闭连接；关闭失败只能吞掉，拆除路径不回传错误
    async fn close(&self);
}

/// 把任意传输层连接包装为可注册到管理器的对象
pub struct ManagedStream {
    inner: Mutex<Option<Pin<Box<dyn Transport>>>>,
}

impl ManagedStream {
    pub fn new(conn: Pin<Box<dyn Transport>>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Some(conn)),
        })
    }

    /// 取回底层连接（尚未关闭时）
    pub async fn take(&self) -> Option<Pin<Box<dyn Transport>>> {
        self.inner.lock().await.take()
    }
}

#[async_trait]
impl Closeable for ManagedStream {
    async fn close(&self) {
        if let Some(mut conn) = self.inner.lock().await.take() {
            let _ = conn.shutdown().await;
        }
    }
}

#[async_trait]
impl Closeable for HeartbeatHandle {
    async fn close(&self) {
        HeartbeatHandle::close(self);
    }
}

/// 连接管理器
#[derive(Default)]
pub struct ConnManager {
    registry: RwLock<HashMap<String, HashMap<String, Arc<dyn Closeable>>>>,
}

impl ConnManager {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// 注册一条连接
    ///
    /// (key, id) 已有连接时先关闭旧连接再存入新连接
    pub async fn add(&self, key: &str, id: &str, conn: Arc<dyn Closeable>) {
        let replaced = {
            let mut registry = self.registry.write().await;
            registry
                .entry(key.to_string())
                .or_default()
                .insert(id.to_string(), conn)
        };
        // 关闭动作放在锁外执行
        if let Some(old) = replaced {
            old.close().await;
        }
        debug!("{} conn added", key);
    }

    /// 关闭并移除 key 名下的全部连接
    pub async fn remove(&self, key: &str) {
        let conns = {
            let mut registry = self.registry.write().await;
            registry.remove(key)
        };
        if let Some(conns) = conns {
            for conn in conns.into_values() {
                conn.close().await;
            }
            debug!("{} conns closed", key);
        }
    }

    /// 只关闭并移除 (key, id) 对应的连接，key 下其余连接不受影响
    pub async fn remove_one(&self, key: &str, id: &str) {
        let removed = {
            let mut registry = self.registry.write().await;
            registry.get_mut(key).and_then(|conns| conns.remove(id))
        };
        if let Some(conn) = removed {
            conn.close().await;
            debug!("{} {} conn closed", key, id);
        }
    }

    /// 对调用时刻的键快照逐一执行 remove
    ///
    /// 清理期间并发加入的键不保证包含在内
    pub async fn remove_all(&self) {
        let keys: Vec<String> = {
            let registry = self.registry.read().await;
            registry.keys().cloned().collect()
        };
        for key in keys {
            self.remove(&key).await;
        }
    }

    /// key 名下当前注册的连接数
    pub async fn count(&self, key: &str) -> usize {
        let registry = self.registry.read().await;
        registry.get(key).map(|conns| conns.len()).unwrap_or(0)
    }

    /// 当前注册的客户端键
    pub async fn keys(&self) -> Vec<String> {
        let registry = self.registry.read().await;
        registry.keys().cloned().collect()
    }
}
