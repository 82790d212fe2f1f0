//! UDP 连接器输出流：批次构造与多目标发射。
//!
//! # 模块定位（Why）
//! - 承担发送级中“与网络打交道”的全部职责：持有套接字、维护目标列表、
//!   把调用方缓冲包装为批次，并把批次逐包复制到每个目标。
//! - [`crate::TransformingUdpOutputStream`] 只替换批次构造这一步，其余行为全部沿用本类型。
//!
//! # 核心契约（What）
//! - [`UdpConnectorOutputStream::build_batch`]：校验区间后复制进包缓冲；零长度输入得到空批次；
//! - [`UdpConnectorOutputStream::emit`]：**空批次与空位静默跳过**，这是变换器丢包不报错的落点；
//!   其余包按顺序发往每个目标，首个发送失败即中止本批次剩余的目标与包；
//! - [`UdpConnectorOutputStream::write`]：`build_batch` + `emit`。
//!
//! # 实现策略（How）
//! - 目标列表以 `parking_lot::RwLock` 保护，发射前复制一份快照，锁不跨越 `.await`；
//! - 已发射包的缓冲回到 [`RawPacketPool`]。

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::{
    config::{ConfigError, OutputStreamConfig},
    error::EgressError,
    pool::RawPacketPool,
    socket::DatagramSocket,
    transformer::PacketBatch,
};

/// 一次发射的统计结果。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EmitReport {
    packets: usize,
    suppressed: usize,
    datagrams: usize,
    bytes: usize,
}

impl EmitReport {
    /// 至少发往一个目标的包数（每个包可能对应多个目标上的多个数据报）。
    pub fn packets(&self) -> usize {
        self.packets
    }

    /// 因空位被跳过的位置数。
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    /// 写入套接字的数据报总数，即 `packets × 目标数`。
    pub fn datagrams(&self) -> usize {
        self.datagrams
    }

    /// 内核报告的写入字节总数。
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// 向一组目标发送 RTP/RTCP 数据报的输出流。
///
/// # Why
/// - 媒体会话通常需要把同一份包复制给多个对端，本类型把“构造一次、发给所有目标”固化下来。
///
/// # What
/// - `socket`：底层数据报套接字；
/// - `targets`：目标列表，去重保存；
/// - `pool`：包缓冲池；
/// - `tail_room`：每个包的尾部余量；
/// - `closed`：关闭标记，关闭后 `write`/`emit` 返回 [`EgressError::Closed`]。
///
/// # 并发
/// - 所有方法只需 `&self`，可被多个任务并发调用；跨任务的发射顺序不作保证。
pub struct UdpConnectorOutputStream<S = UdpSocket> {
    socket: S,
    targets: RwLock<Vec<SocketAddr>>,
    pool: RawPacketPool,
    tail_room: usize,
    closed: AtomicBool,
}

impl<S: DatagramSocket> UdpConnectorOutputStream<S> {
    /// 使用默认配置包装一个已绑定的套接字，初始无目标。
    pub fn new(socket: S) -> Self {
        Self::from_validated(socket, &OutputStreamConfig::default())
    }

    /// 使用给定配置包装套接字；配置中的 `bind` 与 `socket` 选项在此忽略。
    ///
    /// 配置先经 [`OutputStreamConfig::validate`] 校验，不合法时返回 [`ConfigError`]。
    pub fn with_config(socket: S, config: &OutputStreamConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(socket, config))
    }

    fn from_validated(socket: S, config: &OutputStreamConfig) -> Self {
        let stream = Self {
            socket,
            targets: RwLock::new(Vec::with_capacity(config.targets.len())),
            pool: RawPacketPool::new(config.max_pooled_buffers),
            tail_room: config.tail_room,
            closed: AtomicBool::new(false),
        };
        for target in &config.targets {
            stream.add_target(*target);
        }
        stream
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn pool(&self) -> &RawPacketPool {
        &self.pool
    }

    pub fn tail_room(&self) -> usize {
        self.tail_room
    }

    /// 添加目标；已存在时返回 `false`。
    pub fn add_target(&self, target: SocketAddr) -> bool {
        let mut targets = self.targets.write();
        if targets.contains(&target) {
            return false;
        }
        targets.push(target);
        debug!(%target, "添加发送目标");
        true
    }

    /// 移除目标；不存在时返回 `false`。
    pub fn remove_target(&self, target: SocketAddr) -> bool {
        let mut targets = self.targets.write();
        let before = targets.len();
        targets.retain(|existing| *existing != target);
        let removed = targets.len() != before;
        if removed {
            debug!(%target, "移除发送目标");
        }
        removed
    }

    /// 清空目标列表。
    pub fn remove_targets(&self) {
        self.targets.write().clear();
    }

    /// 当前目标列表的快照。
    pub fn targets(&self) -> Vec<SocketAddr> {
        self.targets.read().clone()
    }

    /// 把调用方缓冲 `bytes[offset..offset + length]` 包装为批次。
    ///
    /// # 契约
    /// - **前置条件**：区间位于 `bytes` 内，否则返回 [`EgressError::InvalidRange`]；
    /// - **后置条件**：数据已复制进池化缓冲，调用方缓冲不再被引用；
    ///   `length == 0` 时返回空批次。
    pub fn build_batch(
        &self,
        bytes: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<PacketBatch, EgressError> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= bytes.len())
            .ok_or(EgressError::InvalidRange {
                offset,
                length,
                available: bytes.len(),
            })?;
        if length == 0 {
            return Ok(Vec::new());
        }
        let packet = self
            .pool
            .packet_from_slice(&bytes[offset..end], self.tail_room)?;
        Ok(vec![Some(packet)])
    }

    /// 把批次发往全部目标。
    ///
    /// # 核心逻辑（How）
    /// 1. `None` 批次视为“无需发送”，直接成功；
    /// 2. 逐个位置处理：空位计入 `suppressed` 并跳过；
    /// 3. 非空包依次发往每个目标，全部成功后回收缓冲；
    /// 4. 任一发送失败立即返回 [`EgressError::Transport`]，本批次剩余目标与包不再尝试，
    ///    已发出的数据报不会撤回。
    pub async fn emit(&self, batch: Option<PacketBatch>) -> Result<EmitReport, EgressError> {
        self.ensure_open()?;
        let mut report = EmitReport::default();
        let Some(batch) = batch else {
            debug!("批次被整体撤销，本次写入不发送数据报");
            return Ok(report);
        };

        let targets = self.targets();
        for (index, slot) in batch.into_iter().enumerate() {
            let Some(packet) = slot else {
                trace!(index, "空位，跳过该包");
                report.suppressed += 1;
                continue;
            };
            for target in &targets {
                match self.socket.send_to(packet.payload(), *target).await {
                    Ok(sent) => {
                        trace!(index, %target, bytes = sent, "数据报已发出");
                        report.datagrams += 1;
                        report.bytes += sent;
                    }
                    Err(source) => {
                        warn!(index, %target, error = %source, "数据报发送失败，放弃本批次剩余部分");
                        return Err(EgressError::Transport {
                            target: *target,
                            source,
                        });
                    }
                }
            }
            if !targets.is_empty() {
                report.packets += 1;
            }
            self.pool.recycle(packet);
        }

        if report.suppressed > 0 && report.packets == 0 {
            debug!(suppressed = report.suppressed, "批次内全部位置为空，未发送数据报");
        }
        Ok(report)
    }

    /// 构造批次并发往全部目标。
    pub async fn write(
        &self,
        bytes: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<EmitReport, EgressError> {
        self.ensure_open()?;
        let batch = self.build_batch(bytes, offset, length)?;
        self.emit(Some(batch)).await
    }

    /// 关闭输出流，之后的写入均失败。重复关闭无副作用。
    ///
    /// 关闭只拒绝后续写入；本地端口随输出流被 drop 时释放。
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("UDP 输出流已关闭");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), EgressError> {
        if self.is_closed() {
            return Err(EgressError::Closed);
        }
        Ok(())
    }
}

impl UdpConnectorOutputStream<UdpSocket> {
    /// 按配置绑定 Tokio UDP 套接字并应用套接字选项。
    ///
    /// # 错误处理
    /// - 配置未通过校验时返回 [`EgressError::Config`]，此时不会绑定套接字；
    /// - 绑定或设置选项失败时返回 [`EgressError::Bind`]，携带配置中的地址。
    pub async fn bind(config: &OutputStreamConfig) -> Result<Self, EgressError> {
        config.validate()?;
        let addr = config.bind;
        let sock = UdpSocket::bind(addr)
            .await
            .map_err(|source| EgressError::Bind { addr, source })?;
        config
            .socket
            .apply(&sock)
            .map_err(|source| EgressError::Bind { addr, source })?;
        Ok(Self::from_validated(sock, config))
    }
}
