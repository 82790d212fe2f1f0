//! 测试桩：记录型数据报套接字。
//!
//! # 设计定位（Why）
//! - 场景测试需要逐字节核对每个目标收到的数据报与顺序，真实 UDP 在此会引入丢包与乱序噪声；
//! - 集中提供一个实现 [`DatagramSocket`] 的桩，单元测试与 `tests/` 下的集成测试共同复用。
//!
//! # 契约说明（What）
//! - 每次 `send_to` 按调用顺序记录 `(目标, 负载)`；
//! - 通过 [`RecordingSocket::failing_for`] 构造的实例在发往指定目标时返回 `ConnectionRefused`，
//!   且不记录该次发送；
//! - 仅用于测试，不产生任何网络 IO。

use std::{
    future::{Future, ready},
    io,
    net::SocketAddr,
};

use parking_lot::Mutex;

use crate::socket::DatagramSocket;

#[derive(Debug, Default)]
pub struct RecordingSocket {
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    failing_target: Option<SocketAddr>,
}

impl RecordingSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发往 `target` 的数据报一律失败。
    pub fn failing_for(target: SocketAddr) -> Self {
        Self {
            sent: Mutex::default(),
            failing_target: Some(target),
        }
    }

    /// 按发送顺序返回全部记录。
    pub fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.sent.lock().clone()
    }

    /// 发往某个目标的负载序列。
    pub fn payloads_to(&self, target: SocketAddr) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .filter(|(addr, _)| *addr == target)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl DatagramSocket for RecordingSocket {
    fn send_to(
        &self,
        payload: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send {
        let result = if self.failing_target == Some(target) {
            Err(io::Error::from(io::ErrorKind::ConnectionRefused))
        } else {
            self.sent.lock().push((target, payload.to_vec()));
            Ok(payload.len())
        };
        ready(result)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
    }
}
