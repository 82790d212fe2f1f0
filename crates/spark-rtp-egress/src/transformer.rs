//! 包变换器契约与组合工具。
//!
//! # 模块使命（Why）
//! - 发送级在批次构造与网络发射之间插入一个可插拔的批量变换：加密、认证、
//!   头扩展改写或过滤都通过同一个入口完成。
//! - 批次建模为 `Vec<Option<RawPacket>>`：空位是“丢弃该位置”的控制信号，而不是错误路径。
//!
//! # 核心契约（What）
//! - [`PacketTransformer::transform`] 接收批次所有权并交回新批次：
//!   - 原样返回 → 透传；
//!   - 返回同一批包但内容已改写 → 原地改写；
//!   - 返回不同的包 → 替换；
//!   - 某位置为 `None` → 丢弃该包；
//!   - 返回 `Ok(None)` 或全空批次 → 放弃本次发射，写入仍视为成功；
//!   - 返回更长的批次 → 扩展（如拆分复合 RTCP）。
//! - 返回 `Err` 表示变换失败，错误会原样上抛给 `write` 调用方。
//!
//! # 组合（How）
//! - [`SinglePacketTransformer`] + [`PerPacket`]：逐包变换并保持位置；
//! - [`TransformerChain`]：按顺序串联多个变换器；
//! - [`from_fn`]：以闭包快速构造变换器。

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::packet::{PacketError, RawPacket};

/// 一次 `write` 产生的有序包批次，空位表示该位置被丢弃。
pub type PacketBatch = Vec<Option<RawPacket>>;

/// 变换失败的原因。
#[derive(Debug, Error)]
pub enum TransformError {
    /// 变换器主动拒绝处理该批次。
    #[error("变换器拒绝处理批次: {reason}")]
    Rejected { reason: String },
    /// 变换器试图构造或改写出越界的包。
    #[error("变换器产出非法 RawPacket: {0}")]
    InvalidPacket(#[from] PacketError),
    /// 变换器内部的其它错误（如密钥派生失败）。
    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl TransformError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn other<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Other(Box::new(error))
    }
}

/// 出站批量包变换器。
///
/// # 契约
/// - **输入**：非空引用的有序批次，所有元素在调用期间归批次所有；
/// - **输出**：见模块文档的六种语义；长度、元素身份都不要求与输入一致；
/// - **并发**：若发送级被多个任务并发写入，`transform` 会被并发调用，实现需自行保证线程安全。
pub trait PacketTransformer: Send + Sync {
    fn transform(&self, batch: PacketBatch) -> Result<Option<PacketBatch>, TransformError>;

    /// 释放变换器持有的资源（例如密钥上下文）。默认无操作。
    fn close(&self) {}
}

/// 逐包变换器，由 [`PerPacket`] 提升为批量变换器。
pub trait SinglePacketTransformer: Send + Sync {
    /// 变换单个包；返回 `Ok(None)` 表示丢弃该包。
    fn transform(&self, packet: RawPacket) -> Result<Option<RawPacket>, TransformError>;

    fn close(&self) {}
}

/// 把 [`SinglePacketTransformer`] 适配为批量变换器。
///
/// 空位保持为空，其余位置逐个变换，批次长度与顺序不变。
#[derive(Debug, Default)]
pub struct PerPacket<T> {
    inner: T,
}

impl<T> PerPacket<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: SinglePacketTransformer> PacketTransformer for PerPacket<T> {
    fn transform(&self, batch: PacketBatch) -> Result<Option<PacketBatch>, TransformError> {
        batch
            .into_iter()
            .map(|slot| match slot {
                Some(packet) => self.inner.transform(packet),
                None => Ok(None),
            })
            .collect::<Result<PacketBatch, _>>()
            .map(Some)
    }

    fn close(&self) {
        self.inner.close();
    }
}

/// 按注册顺序串联多个变换器。
///
/// # 语义
/// - 前一级的输出即后一级的输入；
/// - 任一级返回 `Ok(None)` 时立即短路为 `Ok(None)`，后续各级不再调用；
/// - 任一级返回错误时立即上抛。
#[derive(Clone, Default)]
pub struct TransformerChain {
    stages: Vec<Arc<dyn PacketTransformer>>,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一级变换器。
    pub fn with(mut self, stage: Arc<dyn PacketTransformer>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn push(&mut self, stage: Arc<dyn PacketTransformer>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl PacketTransformer for TransformerChain {
    fn transform(&self, batch: PacketBatch) -> Result<Option<PacketBatch>, TransformError> {
        let mut current = batch;
        for stage in &self.stages {
            match stage.transform(current)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    fn close(&self) {
        for stage in &self.stages {
            stage.close();
        }
    }
}

impl core::fmt::Debug for TransformerChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransformerChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// 以闭包实现的变换器，见 [`from_fn`]。
pub struct FnTransformer<F> {
    f: F,
}

/// 用闭包构造批量变换器。
///
/// ```
/// use std::sync::Arc;
/// use spark_rtp_egress::transformer::{PacketTransformer, from_fn};
///
/// let drop_all: Arc<dyn PacketTransformer> = Arc::new(from_fn(|_batch| Ok(None)));
/// assert!(drop_all.transform(Vec::new()).unwrap().is_none());
/// ```
pub fn from_fn<F>(f: F) -> FnTransformer<F>
where
    F: Fn(PacketBatch) -> Result<Option<PacketBatch>, TransformError> + Send + Sync,
{
    FnTransformer { f }
}

impl<F> PacketTransformer for FnTransformer<F>
where
    F: Fn(PacketBatch) -> Result<Option<PacketBatch>, TransformError> + Send + Sync,
{
    fn transform(&self, batch: PacketBatch) -> Result<Option<PacketBatch>, TransformError> {
        (self.f)(batch)
    }
}
