//! 变换器槽位的并发语义。
//!
//! # 教案式说明
//! - **Why**：会话重新协商时会在写入进行中替换变换器；槽位若出现撕裂读或旧值回退，
//!   数据报会被错误的密钥处理。
//! - **How**：多任务并发写入，同时另一任务反复切换绑定；再以顺序“设置→写入”核对线性化语义。
//! - **What**：每次写入恰好发出一个完整数据报，且首字节只可能来自某一个确定的绑定。

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::thread;

use spark_rtp_egress::test_stubs::RecordingSocket;
use spark_rtp_egress::transformer::{PacketBatch, from_fn};
use spark_rtp_egress::{PacketTransformer, TransformingUdpOutputStream};

const RTP: [u8; 4] = [0x80, 0x60, 0x00, 0x01];

fn peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5004))
}

/// 把首字节改写为 `marker` 的变换器。
fn marker(marker: u8) -> Arc<dyn PacketTransformer> {
    Arc::new(from_fn(move |mut batch: PacketBatch| {
        for packet in batch.iter_mut().flatten() {
            packet.write_u8(0, marker)?;
        }
        Ok(Some(batch))
    }))
}

/// 并发写入与并发换绑：无撕裂、无丢失。
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_observe_a_whole_binding() {
    const WRITERS: usize = 4;
    const WRITES_PER_TASK: usize = 200;

    let stream = Arc::new(TransformingUdpOutputStream::new(RecordingSocket::new()));
    stream.add_target(peer());

    let switcher = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move {
            let bindings = [Some(marker(0x81)), Some(marker(0x82)), None];
            for round in 0..300 {
                stream.set_transformer(bindings[round % bindings.len()].clone());
                tokio::task::yield_now().await;
            }
        })
    };

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let stream = Arc::clone(&stream);
            tokio::spawn(async move {
                for _ in 0..WRITES_PER_TASK {
                    stream.write(&RTP, 0, RTP.len()).await.expect("并发写入");
                }
            })
        })
        .collect();

    for writer in writers {
        writer.await.expect("写入任务不应 panic");
    }
    switcher.await.expect("换绑任务不应 panic");

    let payloads = stream.connector().socket().payloads_to(peer());
    assert_eq!(payloads.len(), WRITERS * WRITES_PER_TASK);
    for payload in payloads {
        assert!(matches!(payload[0], 0x80 | 0x81 | 0x82), "首字节 {:#x} 来自未知绑定", payload[0]);
        assert_eq!(&payload[1..], &RTP[1..]);
    }
}

/// `set_transformer` 返回后开始的写入必然看到新绑定。
#[tokio::test]
async fn writes_after_rebinding_observe_the_new_transformer() {
    let stream = TransformingUdpOutputStream::new(RecordingSocket::new());
    stream.add_target(peer());

    for round in 0..32u8 {
        let expected = 0x81 + (round % 3);
        stream.set_transformer(Some(marker(expected)));
        stream.write(&RTP, 0, RTP.len()).await.expect("写入");
        let last = stream
            .connector()
            .socket()
            .payloads_to(peer())
            .pop()
            .expect("至少一个数据报");
        assert_eq!(last[0], expected);
    }
}

/// 变换过程中发生换绑时，本次写入仍只使用入口处读到的绑定。
#[tokio::test]
async fn rebinding_inside_transform_affects_only_later_writes() {
    let stream = Arc::new(TransformingUdpOutputStream::new(RecordingSocket::new()));
    stream.add_target(peer());

    let successor = marker(0x82);
    let handle: Weak<TransformingUdpOutputStream<RecordingSocket>> = Arc::downgrade(&stream);
    let rebinding: Arc<dyn PacketTransformer> = Arc::new(from_fn(move |mut batch: PacketBatch| {
        if let Some(stream) = handle.upgrade() {
            stream.set_transformer(Some(Arc::clone(&successor)));
        }
        for packet in batch.iter_mut().flatten() {
            packet.write_u8(0, 0x81)?;
        }
        Ok(Some(batch))
    }));
    stream.set_transformer(Some(rebinding));

    stream.write(&RTP, 0, RTP.len()).await.expect("首次写入");
    stream.write(&RTP, 0, RTP.len()).await.expect("第二次写入");

    let payloads = stream.connector().socket().payloads_to(peer());
    assert_eq!(
        payloads,
        vec![
            vec![0x81, 0x60, 0x00, 0x01],
            vec![0x82, 0x60, 0x00, 0x01],
        ],
        "首次写入不得被中途安装的绑定再次处理"
    );
}

/// 跨线程读取绑定时只会看到完整的某个值。
#[test]
fn readers_never_see_a_torn_binding() {
    let stream = Arc::new(TransformingUdpOutputStream::new(RecordingSocket::new()));
    let first = marker(0x81);
    let second = marker(0x82);

    let writer = {
        let stream = Arc::clone(&stream);
        let (first, second) = (Arc::clone(&first), Arc::clone(&second));
        thread::spawn(move || {
            for round in 0..10_000 {
                let next = if round % 2 == 0 { &first } else { &second };
                stream.set_transformer(Some(Arc::clone(next)));
            }
        })
    };

    let reader = {
        let stream = Arc::clone(&stream);
        let (first, second) = (Arc::clone(&first), Arc::clone(&second));
        thread::spawn(move || {
            for _ in 0..10_000 {
                if let Some(current) = stream.transformer() {
                    assert!(Arc::ptr_eq(&current, &first) || Arc::ptr_eq(&current, &second));
                }
            }
        })
    };

    writer.join().expect("写线程");
    reader.join().expect("读线程");
    let last = stream.transformer().expect("最终处于绑定状态");
    assert!(Arc::ptr_eq(&last, &second));
}
