//! 数据报套接字抽象与 UDP 选项。
//!
//! # Why
//! - 发送级只需要“向某地址发一个数据报”这一能力；抽出 [`DatagramSocket`] 后，
//!   生产路径使用 Tokio `UdpSocket`，测试可替换为记录型实现。
//!
//! # What
//! - [`DatagramSocket`]：`send_to` + `local_addr`；
//! - [`UdpSocketOptions`]：绑定后应用到套接字的介质参数。

use std::{future::Future, io, net::SocketAddr, sync::Arc};

use serde::Deserialize;
use socket2::SockRef;
use tokio::net::UdpSocket;

/// 无连接、不可靠的数据报发送端。
///
/// # 契约
/// - 一次 `send_to` 对应网络上的一个数据报，不做额外分帧；
/// - 返回值为内核报告的写入字节数；
/// - 实现需 `Send + Sync`，以便同一发送级被多个任务并发写入。
pub trait DatagramSocket: Send + Sync {
    fn send_to(
        &self,
        payload: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl DatagramSocket for UdpSocket {
    fn send_to(
        &self,
        payload: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send {
        UdpSocket::send_to(self, payload, target)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

impl<S: DatagramSocket> DatagramSocket for Arc<S> {
    fn send_to(
        &self,
        payload: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send {
        S::send_to(self.as_ref(), payload, target)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        S::local_addr(self.as_ref())
    }
}

/// UDP 套接字的可选参数集合。
///
/// ## 意图（Why）
/// - 将 `SO_BROADCAST`、组播回环、TTL 与发送缓冲等介质配置显式建模，可直接从配置文件反序列化；
///
/// ## 契约（What）
/// - `broadcast`：是否允许广播；
/// - `multicast_loop_v4`：IPv4 组播回环，`None` 表示沿用系统默认；
/// - `ttl`：单播 TTL，`None` 表示沿用系统默认；
/// - `send_buffer_size`：`SO_SNDBUF`，`None` 表示沿用系统默认；
/// - `apply`：在绑定后将配置应用到 `UdpSocket`。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UdpSocketOptions {
    broadcast: bool,
    multicast_loop_v4: Option<bool>,
    ttl: Option<u32>,
    send_buffer_size: Option<usize>,
}

impl UdpSocketOptions {
    /// 启用或关闭广播。
    pub fn with_broadcast(mut self, enabled: bool) -> Self {
        self.broadcast = enabled;
        self
    }

    /// 控制 IPv4 组播回环。
    pub fn with_multicast_loop_v4(mut self, enabled: bool) -> Self {
        self.multicast_loop_v4 = Some(enabled);
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_send_buffer_size(mut self, bytes: usize) -> Self {
        self.send_buffer_size = Some(bytes);
        self
    }

    pub fn broadcast(&self) -> bool {
        self.broadcast
    }

    pub fn multicast_loop_v4(&self) -> Option<bool> {
        self.multicast_loop_v4
    }

    pub fn ttl(&self) -> Option<u32> {
        self.ttl
    }

    pub fn send_buffer_size(&self) -> Option<usize> {
        self.send_buffer_size
    }

    /// 将配置应用到实际套接字。
    pub(crate) fn apply(&self, sock: &UdpSocket) -> io::Result<()> {
        sock.set_broadcast(self.broadcast)?;
        if let Some(enabled) = self.multicast_loop_v4 {
            if sock.local_addr()?.is_ipv4() {
                sock.set_multicast_loop_v4(enabled)?;
            }
        }
        if let Some(ttl) = self.ttl {
            sock.set_ttl(ttl)?;
        }
        if let Some(bytes) = self.send_buffer_size {
            SockRef::from(sock).set_send_buffer_size(bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.expect("绑定回环套接字")
    }

    #[tokio::test]
    async fn default_options_keep_system_multicast_loop() {
        let sock = loopback_socket().await;
        let system_default = sock.multicast_loop_v4().expect("读取组播回环");

        UdpSocketOptions::default().apply(&sock).expect("应用默认选项");
        assert_eq!(sock.multicast_loop_v4().expect("读取组播回环"), system_default);
    }

    #[tokio::test]
    async fn explicit_options_are_applied() {
        let sock = loopback_socket().await;
        UdpSocketOptions::default()
            .with_multicast_loop_v4(false)
            .with_ttl(7)
            .apply(&sock)
            .expect("应用选项");
        assert!(!sock.multicast_loop_v4().expect("读取组播回环"));
        assert_eq!(sock.ttl().expect("读取 TTL"), 7);
    }
}
