/// 心跳流
///
/// 把一条原始双工连接包装为带帧边界与保活监测的字节流。
/// 线格式：`[type:u8]`，type 为 1 时再跟 `[length:u32 LE][payload]`；
/// type 为 0 表示保活 ping，无后续字节。帧边界永远来自长度前缀。
///
/// 构造时启动两个后台任务：心跳发送循环与帧读取循环。
/// 任何一侧检测到连接失效时，错误回调最多触发一次。
use crate::transport::Transport;
use bytes::{BufMut, BytesMut};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 保活 ping 帧
const FRAME_PING: u8 = 0;
/// 数据帧
const FRAME_DATA: u8 = 1;
/// 内部数据队列容量（字节）
const DATA_QUEUE_CAPACITY: usize = 4096;

/// 错误回调：每条流最多触发一次，是流失效的唯一通知途径
pub type HeartbeatErrorHandler = Arc<dyn Fn(io::Error, HeartbeatHandle) + Send + Sync>;

type Conn = Pin<Box<dyn Transport>>;

/// 心跳流的轻量句柄，可跨任务克隆，用于在错误回调中关停流
#[derive(Clone)]
pub struct HeartbeatHandle {
    shutdown: CancellationToken,
}

impl HeartbeatHandle {
    /// 关停流：取消两个后台循环
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// 心跳流
pub struct HeartbeatStream {
    writer: Arc<Mutex<WriteHalf<Conn>>>,
    data_rx: mpsc::Receiver<u8>,
    shutdown: CancellationToken,
}

impl HeartbeatStream {
    /// 包装一条连接，启动心跳发送与帧读取循环
    pub fn new(conn: Conn, period: Duration, on_error: HeartbeatErrorHandler) -> Self {
        let (read_half, write_half) = tokio::io::split(conn);
        let writer = Arc::new(Mutex::new(write_half));
        let (data_tx, data_rx) = mpsc::channel::<u8>(DATA_QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));

        Self::spawn_heartbeat(
            writer.clone(),
            period,
            on_error.clone(),
            fired.clone(),
            shutdown.clone(),
        );
        Self::spawn_reader(read_half, data_tx, on_error, fired, shutdown.clone());

        Self {
            writer,
            data_rx,
            shutdown,
        }
    }

    /// 获取可克隆的流句柄
    pub fn handle(&self) -> HeartbeatHandle {
        HeartbeatHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// 写入一段负载，封装为单个数据帧原子写出
    ///
    /// 成功时返回负载长度（非线上字节数）
    pub async fn write(&self, payload: &[u8]) -> io::Result<usize> {
        if self.shutdown.is_cancelled() {
            return Err(closed_err());
        }

        let mut frame = BytesMut::with_capacity(5 + payload.len());
        frame.put_u8(FRAME_DATA);
        frame.put_u32_le(payload.len() as u32);
        frame.put_slice(payload);

        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(payload.len())
    }

    /// 从内部队列读取字节
    ///
    /// 队列为空时等待第一个字节；随后只取当前已缓冲的字节，
    /// 队列取空即返回，不等待填满 buf
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        buf[0] = match self.data_rx.recv().await {
            Some(b) => b,
            None => return Err(closed_err()),
        };

        let mut n = 1;
        while n < buf.len() {
            match self.data_rx.try_recv() {
                Ok(b) => {
                    buf[n] = b;
                    n += 1;
                }
                Err(_) => break,
            }
        }
        Ok(n)
    }

    /// 关闭底层连接；之后的读写都会失败
    pub async fn close(&self) {
        self.shutdown.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 心跳发送循环：每个周期在写锁下写出一个 ping 帧
    fn spawn_heartbeat(
        writer: Arc<Mutex<WriteHalf<Conn>>>,
        period: Duration,
        on_error: HeartbeatErrorHandler,
        fired: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut w = writer.lock().await;
                        let result = async {
                            w.write_all(&[FRAME_PING]).await?;
                            w.flush().await
                        }
                        .await;
                        drop(w);

                        if let Err(e) = result {
                            fire_once(&fired, &on_error, &shutdown, e);
                            break;
                        }
                    }
                }
            }
            debug!("Heartbeat sender exited");
        });
    }

    /// 帧读取循环：解析 ping 与数据帧，负载逐字节入队
    fn spawn_reader(
        mut reader: ReadHalf<Conn>,
        data_tx: mpsc::Sender<u8>,
        on_error: HeartbeatErrorHandler,
        fired: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = read_frame(&mut reader, &data_tx) => {
                        match result {
                            Ok(true) => {}
                            // 接收端已被丢弃，静默退出
                            Ok(false) => break,
                            Err(e) => {
                                fire_once(&fired, &on_error, &shutdown, e);
                                break;
                            }
                        }
                    }
                }
            }
            debug!("Heartbeat reader exited");
        });
    }
}

/// 读取一个完整帧；返回 Ok(false) 表示数据队列接收端已关闭
async fn read_frame(reader: &mut ReadHalf<Conn>, data_tx: &mpsc::Sender<u8>) -> io::Result<bool> {
    let frame_type = reader.read_u8().await?;
    match frame_type {
        FRAME_PING => Ok(true),
        FRAME_DATA => {
            let len = reader.read_u32_le().await?;
            let mut payload = vec![0u8; len as usize];
            // 短读即协议错误（read_exact 返回 UnexpectedEof）
            reader.read_exact(&mut payload).await?;

            for b in payload {
                if data_tx.send(b).await.is_err() {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unexpected frame type: {}", other),
        )),
    }
}

/// 一次性触发错误回调
///
/// 心跳循环与读取循环竞争上报同一个底层故障，
/// 用原子标志保证回调只执行一次
fn fire_once(
    fired: &AtomicBool,
    on_error: &HeartbeatErrorHandler,
    shutdown: &CancellationToken,
    err: io::Error,
) {
    if !fired.swap(true, Ordering::SeqCst) {
        on_error(
            err,
            HeartbeatHandle {
                shutdown: shutdown.clone(),
            },
        );
    }
}

fn closed_err() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "heartbeat stream closed")
}
