// 心跳流集成测试
//
// 覆盖双端回环、线格式互操作、部分读取语义与错误回调的一次性保证

use proxy_core::heartbeat::{HeartbeatErrorHandler, HeartbeatStream};
use rand::Rng;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn noop_handler() -> HeartbeatErrorHandler {
    Arc::new(|_err, _handle| {})
}

/// 记录回调次数与最近一次错误种类的处理器
fn recording_handler() -> (HeartbeatErrorHandler, Arc<AtomicUsize>, Arc<Mutex<Option<io::ErrorKind>>>) {
    let count = Arc::new(AtomicUsize::new(0));
    let kind = Arc::new(Mutex::new(None));
    let count_clone = count.clone();
    let kind_clone = kind.clone();
    let handler: HeartbeatErrorHandler = Arc::new(move |err, _handle| {
        count_clone.fetch_add(1, Ordering::SeqCst);
        *kind_clone.lock().unwrap() = Some(err.kind());
    });
    (handler, count, kind)
}

async fn read_n(stream: &mut HeartbeatStream, n: usize) -> Vec<u8> {
    let mut got = Vec::with_capacity(n);
    let mut buf = [0u8; 512];
    while got.len() < n {
        let len = stream.read(&mut buf).await.unwrap();
        got.extend_from_slice(&buf[..len]);
    }
    got
}

#[tokio::test]
async fn test_roundtrip_between_two_streams() {
    let (a, b) = tokio::io::duplex(8192);
    let sender = HeartbeatStream::new(Box::pin(a), Duration::from_millis(20), noop_handler());
    let mut receiver = HeartbeatStream::new(Box::pin(b), Duration::from_millis(20), noop_handler());

    let n = sender.write(b"hello world").await.unwrap();
    assert_eq!(n, 11);

    // 双方的 ping 与数据帧在同一条链路上交错，ping 不进入负载
    let got = read_n(&mut receiver, 11).await;
    assert_eq!(got, b"hello world");

    sender.close().await;
    receiver.close().await;
}

#[tokio::test]
async fn test_roundtrip_random_payloads() {
    let (a, b) = tokio::io::duplex(8192);
    let sender = HeartbeatStream::new(Box::pin(a), Duration::from_millis(10), noop_handler());
    let mut receiver = HeartbeatStream::new(Box::pin(b), Duration::from_millis(10), noop_handler());

    let mut rng = rand::rng();
    for _ in 0..3 {
        let mut payload = vec![0u8; 2048];
        rng.fill(&mut payload[..]);

        sender.write(&payload).await.unwrap();
        let got = read_n(&mut receiver, payload.len()).await;
        assert_eq!(got, payload);
    }
}

#[tokio::test]
async fn test_wire_format_interop() {
    let (a, mut peer) = tokio::io::duplex(4096);
    let mut stream = HeartbeatStream::new(Box::pin(a), Duration::from_millis(50), noop_handler());

    // 手工构造对端字节流：ping 与数据帧交错
    peer.write_all(&[0]).await.unwrap();
    peer.write_all(&[1]).await.unwrap();
    peer.write_u32_le(3).await.unwrap();
    peer.write_all(b"abc").await.unwrap();
    peer.write_all(&[0]).await.unwrap();
    peer.write_all(&[0]).await.unwrap();
    peer.write_all(&[1]).await.unwrap();
    peer.write_u32_le(5).await.unwrap();
    peer.write_all(b"defgh").await.unwrap();

    let got = read_n(&mut stream, 8).await;
    assert_eq!(got, b"abcdefgh");
}

#[tokio::test]
async fn test_partial_read_semantics() {
    let (a, mut peer) = tokio::io::duplex(4096);
    let mut stream = HeartbeatStream::new(Box::pin(a), Duration::from_millis(50), noop_handler());

    peer.write_all(&[1]).await.unwrap();
    peer.write_u32_le(10).await.unwrap();
    peer.write_all(b"0123456789").await.unwrap();

    // 等负载全部进入内部队列
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut buf = [0u8; 4];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"0123");

    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"4567");

    // 队列只剩 2 字节：大缓冲区也应立即返回已有数据，而非等待填满
    let mut big = [0u8; 64];
    let n = stream.read(&mut big).await.unwrap();
    assert_eq!(n, 2);
    assert_eq!(&big[..2], b"89");
}

#[tokio::test]
async fn test_short_data_frame_kills_stream() {
    let (a, mut peer) = tokio::io::duplex(4096);
    let (handler, count, kind) = recording_handler();
    let _stream = HeartbeatStream::new(Box::pin(a), Duration::from_secs(60), handler);

    // 声明 5 字节负载但只给 2 字节就断开
    peer.write_all(&[1]).await.unwrap();
    peer.write_u32_le(5).await.unwrap();
    peer.write_all(b"ab").await.unwrap();
    drop(peer);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(*kind.lock().unwrap(), Some(io::ErrorKind::UnexpectedEof));
}

#[tokio::test]
async fn test_unknown_frame_type_kills_stream() {
    let (a, mut peer) = tokio::io::duplex(4096);
    let (handler, count, kind) = recording_handler();
    let _stream = HeartbeatStream::new(Box::pin(a), Duration::from_secs(60), handler);

    peer.write_all(&[7]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(*kind.lock().unwrap(), Some(io::ErrorKind::InvalidData));
}

#[tokio::test]
async fn test_handler_fires_once_when_both_loops_fail() {
    let (a, b) = tokio::io::duplex(4096);
    let (handler, count, _kind) = recording_handler();

    // 心跳周期调短，让发送循环与读取循环竞争上报同一故障
    let _stream = HeartbeatStream::new(Box::pin(a), Duration::from_millis(5), handler);
    drop(b);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
