//! `RawPacket` 缓冲池。
//!
//! 发送级每次 `write` 都要把调用方数据复制进包缓冲；发射完成后缓冲回到池中，
//! 下一次构造批次直接复用，避免实时媒体路径上的频繁分配。
//! 被变换器丢弃或替换掉的包不会回池，随所有权释放。

use parking_lot::Mutex;

use crate::packet::{PacketError, RawPacket, capacity_for};

/// 有界的字节缓冲空闲表。
///
/// # 契约
/// - `acquire` 返回的缓冲容量不小于请求值，内容未定义，由调用方覆盖；
/// - `release` 在池满（达到 `max_pooled`）时直接释放缓冲；
/// - 所有方法只短暂持有内部锁，不跨越 `.await`。
#[derive(Debug)]
pub struct RawPacketPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
}

impl RawPacketPool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
        }
    }

    /// 取出一块容量至少为 `min_capacity` 的缓冲，池中没有合适的则新分配。
    pub fn acquire(&self, min_capacity: usize) -> Vec<u8> {
        let mut free = self.free.lock();
        match free
            .iter()
            .position(|buffer| buffer.capacity() >= min_capacity)
        {
            Some(index) => free.swap_remove(index),
            None => Vec::with_capacity(min_capacity),
        }
    }

    /// 归还缓冲。
    pub fn release(&self, mut buffer: Vec<u8>) {
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            buffer.clear();
            free.push(buffer);
        }
    }

    /// 从池中取缓冲并复制 `payload`，尾部预留 `tail_room` 字节。
    ///
    /// 容量溢出时返回 [`PacketError::CapacityOverflow`]，此时不触碰池。
    pub fn packet_from_slice(
        &self,
        payload: &[u8],
        tail_room: usize,
    ) -> Result<RawPacket, PacketError> {
        let capacity = capacity_for(payload.len(), tail_room)?;
        let buffer = self.acquire(capacity);
        Ok(RawPacket::fill(buffer, payload, capacity))
    }

    /// 回收已发射包的缓冲。
    pub fn recycle(&self, packet: RawPacket) {
        self.release(packet.into_buffer());
    }

    /// 当前空闲缓冲数量。
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_pooled(&self) -> usize {
        self.max_pooled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycled_buffer_is_reused_and_overwritten() {
        let pool = RawPacketPool::new(4);
        let first = pool
            .packet_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8], 8)
            .expect("构造包");
        pool.recycle(first);
        assert_eq!(pool.len(), 1);

        let second = pool.packet_from_slice(&[9, 9], 2).expect("构造包");
        assert!(pool.is_empty(), "合适的缓冲应当被取走复用");
        assert_eq!(second.payload(), &[9, 9]);
        assert_eq!(second.buffer(), &[9, 9, 0, 0], "旧内容不得残留在尾部余量中");
    }

    #[test]
    fn release_beyond_limit_drops_buffer() {
        let pool = RawPacketPool::new(1);
        pool.release(vec![0; 16]);
        pool.release(vec![0; 16]);
        assert_eq!(pool.len(), 1);

        let disabled = RawPacketPool::new(0);
        disabled.release(vec![0; 16]);
        assert!(disabled.is_empty());
    }

    #[test]
    fn overflowing_capacity_leaves_pool_untouched() {
        let pool = RawPacketPool::new(2);
        pool.release(vec![0; 16]);
        let err = pool
            .packet_from_slice(&[1, 2], usize::MAX)
            .expect_err("容量溢出");
        assert!(matches!(err, PacketError::CapacityOverflow { .. }));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn acquire_skips_buffers_that_are_too_small() {
        let pool = RawPacketPool::new(2);
        pool.release(Vec::with_capacity(4));
        let buffer = pool.acquire(64);
        assert!(buffer.capacity() >= 64);
        assert_eq!(pool.len(), 1, "过小的缓冲留在池中");
    }
}
