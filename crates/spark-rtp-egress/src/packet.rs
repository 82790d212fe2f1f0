//! RTP/RTCP 原始包载体。
//!
//! # 模块定位（Why）
//! - 发送级在“批次构造”与“网络发射”之间需要一个可被变换器原地改写的包对象：
//!   既要允许在容量内追加认证标签、改写头部，也要能整体替换为新包。
//! - `RawPacket` 以 `(buffer, offset, length)` 三元组描述一段连续负载，容量即底层缓冲长度。
//!
//! # 契约（What）
//! - 任意实例始终满足 `offset + length <= capacity`；所有改写入口都做越界检查并返回
//!   [`PacketError`]，因此变换器无法交回越界的包，只能在构造阶段得到错误。
//! - `payload()` 返回的切片即为最终写入套接字的数据报内容。

use core::fmt;

use thiserror::Error;

/// `RawPacket` 改写失败的原因。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PacketError {
    /// 区间超出底层缓冲容量。
    #[error("包区间越界: offset={offset} length={length} capacity={capacity}")]
    OutOfBounds {
        offset: usize,
        length: usize,
        capacity: usize,
    },
    /// 按负载下标访问时越界。
    #[error("负载下标越界: index={index} length={length}")]
    IndexOutOfRange { index: usize, length: usize },
    /// 截短的字节数超过当前负载长度。
    #[error("无法从 {length} 字节的负载中截去 {requested} 字节")]
    ShrinkUnderflow { requested: usize, length: usize },
    /// 负载长度与尾部余量之和超出地址空间。
    #[error("包容量溢出: length={length} tail_room={tail_room}")]
    CapacityOverflow { length: usize, tail_room: usize },
}

/// 一个 RTP/RTCP 数据报负载的可变视图。
///
/// # Why
/// - 变换器（加密、认证、头扩展改写等）需要在不重新分配的前提下改写负载，
///   因此包对象持有带尾部余量的独占缓冲。
///
/// # What
/// - `buffer`：底层字节缓冲，其长度即容量；
/// - `offset`/`length`：有效负载在缓冲中的起点与长度。
///
/// # 契约
/// - **不变量**：`offset + length <= buffer.len()`。
/// - **所有权**：包在一次 `write` 调用内由批次独占；交给变换器即移交所有权，
///   变换器可原样返还、改写后返还、替换或丢弃。
#[derive(Clone, Eq, PartialEq)]
pub struct RawPacket {
    buffer: Vec<u8>,
    offset: usize,
    length: usize,
}

impl RawPacket {
    /// 复制 `payload` 到新缓冲，并在尾部预留 `tail_room` 字节供原地扩展。
    ///
    /// 容量溢出时返回 [`PacketError::CapacityOverflow`]。
    pub fn from_slice(payload: &[u8], tail_room: usize) -> Result<Self, PacketError> {
        let capacity = capacity_for(payload.len(), tail_room)?;
        Ok(Self::fill(Vec::with_capacity(capacity), payload, capacity))
    }

    /// 复用一块已有缓冲（通常来自包池）承载 `payload`，缓冲长度调整为 `capacity`。
    ///
    /// 调用方保证 `capacity >= payload.len()`（见 [`capacity_for`]）。
    /// 缓冲原有内容会被完整覆盖，尾部余量以零填充。
    pub(crate) fn fill(mut buffer: Vec<u8>, payload: &[u8], capacity: usize) -> Self {
        buffer.clear();
        buffer.extend_from_slice(payload);
        buffer.resize(capacity, 0);
        Self {
            buffer,
            offset: 0,
            length: payload.len(),
        }
    }

    /// 基于现成缓冲与区间构造包，区间越界时返回 [`PacketError::OutOfBounds`]。
    pub fn from_parts(buffer: Vec<u8>, offset: usize, length: usize) -> Result<Self, PacketError> {
        check_bounds(offset, length, buffer.len())?;
        Ok(Self {
            buffer,
            offset,
            length,
        })
    }

    /// 构造容量为 `capacity`、负载为空的包。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            offset: 0,
            length: 0,
        }
    }

    /// 有效负载，即最终发出的数据报内容。
    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.length]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.offset..self.offset + self.length]
    }

    /// 整块底层缓冲（含负载前后的空闲区域）。
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// 负载之后仍可原地追加的字节数。
    pub fn tail_room(&self) -> usize {
        self.buffer.len() - self.offset - self.length
    }

    /// 调整负载长度；增长部分沿用缓冲中已有的字节。
    pub fn set_length(&mut self, length: usize) -> Result<(), PacketError> {
        check_bounds(self.offset, length, self.buffer.len())?;
        self.length = length;
        Ok(())
    }

    /// 移动负载起点，长度保持不变。
    pub fn set_offset(&mut self, offset: usize) -> Result<(), PacketError> {
        check_bounds(offset, self.length, self.buffer.len())?;
        self.offset = offset;
        Ok(())
    }

    /// 在负载末尾原地追加字节，例如认证标签。
    ///
    /// # 契约
    /// - **前置条件**：`bytes.len() <= self.tail_room()`；
    /// - **后置条件**：成功时负载长度增加 `bytes.len()`，失败时包保持原状。
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        let end = self.offset + self.length;
        check_bounds(self.offset, self.length + bytes.len(), self.buffer.len())?;
        self.buffer[end..end + bytes.len()].copy_from_slice(bytes);
        self.length += bytes.len();
        Ok(())
    }

    /// 从负载尾部截去 `count` 字节。
    pub fn shrink(&mut self, count: usize) -> Result<(), PacketError> {
        if count > self.length {
            return Err(PacketError::ShrinkUnderflow {
                requested: count,
                length: self.length,
            });
        }
        self.length -= count;
        Ok(())
    }

    /// 读取负载中第 `index` 个字节。
    pub fn read_u8(&self, index: usize) -> Result<u8, PacketError> {
        self.payload()
            .get(index)
            .copied()
            .ok_or(PacketError::IndexOutOfRange {
                index,
                length: self.length,
            })
    }

    /// 改写负载中第 `index` 个字节。
    pub fn write_u8(&mut self, index: usize, value: u8) -> Result<(), PacketError> {
        let length = self.length;
        let slot = self
            .payload_mut()
            .get_mut(index)
            .ok_or(PacketError::IndexOutOfRange { index, length })?;
        *slot = value;
        Ok(())
    }

    /// 在负载下标 `at` 处一分为二。
    ///
    /// # How
    /// - 前半段沿用原缓冲，仅缩短长度；
    /// - 后半段复制到新缓冲，并继承原包的尾部余量，便于后续变换继续追加。
    ///
    /// 常用于拆分复合 RTCP 包。
    pub fn split_at(mut self, at: usize) -> Result<(RawPacket, RawPacket), PacketError> {
        if at > self.length {
            return Err(PacketError::IndexOutOfRange {
                index: at,
                length: self.length,
            });
        }
        let tail = RawPacket::from_slice(&self.payload()[at..], self.tail_room())?;
        self.length = at;
        Ok((self, tail))
    }

    /// 交出底层缓冲，供包池回收。
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    /// RTP/RTCP 版本号（首字节高两位），负载为空时返回 `None`。
    pub fn version(&self) -> Option<u8> {
        self.payload().first().map(|byte| byte >> 6)
    }

    /// 按 RFC 5761 的复用规则判断是否为 RTCP 包：第二字节落在 192..=223。
    pub fn is_rtcp(&self) -> bool {
        matches!(self.payload().get(1), Some(192..=223))
    }
}

impl fmt::Debug for RawPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPacket")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("capacity", &self.buffer.len())
            .finish()
    }
}

/// 负载长度加尾部余量，溢出时报错。
pub(crate) fn capacity_for(length: usize, tail_room: usize) -> Result<usize, PacketError> {
    length
        .checked_add(tail_room)
        .ok_or(PacketError::CapacityOverflow { length, tail_room })
}

fn check_bounds(offset: usize, length: usize, capacity: usize) -> Result<(), PacketError> {
    match offset.checked_add(length) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(PacketError::OutOfBounds {
            offset,
            length,
            capacity,
        }),
    }
}
