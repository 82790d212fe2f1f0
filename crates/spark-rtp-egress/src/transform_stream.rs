//! 带变换器的 UDP 输出流。
//!
//! # 模块使命（Why）
//! - 在连接器的“批次构造”与“网络发射”之间插入一个可热替换的 [`PacketTransformer`]，
//!   其余发送路径（目标列表、多目标复制、错误语义）保持不变。
//!
//! # 插入算法（How）
//! 1. 通过 [`UdpConnectorOutputStream::build_batch`] 构造批次 `P₀`；
//! 2. 对变换器槽位做**恰好一次**原子读取，得到本次调用使用的绑定 `T`；
//! 3. `T` 为空时 `P₀` 原样发射，否则发射 `T.transform(P₀)` 的结果；
//! 4. 发射阶段跳过空批次与空位，因此变换器可以无错误地抑制发送。
//!
//! # 并发语义（What）
//! - 槽位为 `ArcSwapOption`：`set_transformer`/`transformer` 无锁且不阻塞；
//! - 正在执行的 `write` 始终使用入口处读到的绑定，替换只影响之后开始的写入；
//! - 变换与发射都在调用方任务上顺序完成，本类型不做调度。

use std::{fmt, net::SocketAddr, sync::Arc};

use arc_swap::ArcSwapOption;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::{
    config::{ConfigError, OutputStreamConfig},
    connector::{EmitReport, UdpConnectorOutputStream},
    error::EgressError,
    socket::DatagramSocket,
    transformer::{PacketBatch, PacketTransformer},
};

/// 发送级的可观测状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamState {
    /// 未绑定变换器，批次原样透传。
    Unbound,
    /// 已绑定变换器，批次经其过滤。
    Bound,
    /// 底层连接器已关闭，写入返回传输错误。终态。
    Closed,
}

/// 槽位中保存的绑定。`ArcSwapOption` 要求定长类型，故以此包装 trait 对象。
struct TransformerBinding {
    transformer: Arc<dyn PacketTransformer>,
}

/// 在发射前对每个批次应用 [`PacketTransformer`] 的 UDP 输出流。
///
/// # Why
/// - 会话可以先建立发送路径，待密钥或策略协商完成后再安装变换器，
///   并在重新协商时随时替换或移除，整个过程无需暂停写入方。
///
/// # What
/// - `connector`：承担套接字、目标列表与发射逻辑的父级输出流；
/// - `transformer`：单一可变槽位，`None` 表示透传。
///
/// # 契约
/// - **所有权**：变换器以 `Arc` 共享，由安装它的会话管理生命周期；本类型不会调用其 `close`；
/// - **错误**：变换失败以 [`EgressError::Transform`] 上抛，传输失败以 [`EgressError::Transport`] 上抛，
///   本类型不在本地吞掉任何错误。
pub struct TransformingUdpOutputStream<S = UdpSocket> {
    connector: UdpConnectorOutputStream<S>,
    transformer: ArcSwapOption<TransformerBinding>,
}

impl<S: DatagramSocket> TransformingUdpOutputStream<S> {
    /// 绑定到已建立的套接字，初始处于 [`StreamState::Unbound`]。
    pub fn new(socket: S) -> Self {
        Self::from_connector(UdpConnectorOutputStream::new(socket))
    }

    /// 按配置（目标、尾部余量、池大小）包装套接字，配置不合法时返回 [`ConfigError`]。
    pub fn with_config(socket: S, config: &OutputStreamConfig) -> Result<Self, ConfigError> {
        UdpConnectorOutputStream::with_config(socket, config).map(Self::from_connector)
    }

    pub fn from_connector(connector: UdpConnectorOutputStream<S>) -> Self {
        Self {
            connector,
            transformer: ArcSwapOption::empty(),
        }
    }

    /// 父级输出流，提供目标管理、包池等其余能力。
    pub fn connector(&self) -> &UdpConnectorOutputStream<S> {
        &self.connector
    }

    /// 安装、替换或移除（传入 `None`）变换器，返回此前的绑定。
    ///
    /// 对之后开始的每次 `write` 生效；与正在执行的 `write` 之间没有先后保证。
    pub fn set_transformer(
        &self,
        transformer: Option<Arc<dyn PacketTransformer>>,
    ) -> Option<Arc<dyn PacketTransformer>> {
        let bound = transformer.is_some();
        let previous = self
            .transformer
            .swap(transformer.map(|transformer| Arc::new(TransformerBinding { transformer })));
        debug!(bound, replaced = previous.is_some(), "变换器绑定已更新");
        previous.map(|binding| Arc::clone(&binding.transformer))
    }

    /// 当前绑定的变换器。
    pub fn transformer(&self) -> Option<Arc<dyn PacketTransformer>> {
        self.transformer
            .load_full()
            .map(|binding| Arc::clone(&binding.transformer))
    }

    pub fn state(&self) -> StreamState {
        if self.connector.is_closed() {
            StreamState::Closed
        } else if self.transformer.load().is_some() {
            StreamState::Bound
        } else {
            StreamState::Unbound
        }
    }

    /// 构造批次并交给当前变换器。
    ///
    /// # 返回
    /// - `Ok(Some(batch))`：待发射的批次，可能含空位；
    /// - `Ok(None)`：变换器撤销了本次发射；
    /// - `Err(_)`：区间非法或变换失败。
    ///
    /// 变换器槽位在此只读取一次。零长度输入得到空批次，绑定时仍会交给变换器。
    pub fn create_raw_packets(
        &self,
        bytes: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<Option<PacketBatch>, EgressError> {
        let batch = self.connector.build_batch(bytes, offset, length)?;
        let Some(binding) = self.transformer.load_full() else {
            return Ok(Some(batch));
        };

        let input = batch.len();
        let output = binding.transformer.transform(batch)?;
        match &output {
            Some(batch) => trace!(input, output = batch.len(), "批次已变换"),
            None => debug!(input, "变换器撤销了本次发射"),
        }
        Ok(output)
    }

    /// 把 `bytes[offset..offset + length]` 经变换后发往全部目标。
    ///
    /// # 契约
    /// - 调用方缓冲不会被修改，也不会在返回后被引用；
    /// - 变换器丢弃的包不产生数据报，也不产生错误；
    /// - 失败时返回首个错误，已发出的数据报不会撤回。
    pub async fn write(
        &self,
        bytes: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<EmitReport, EgressError> {
        self.connector.ensure_open()?;
        let batch = self.create_raw_packets(bytes, offset, length)?;
        self.connector.emit(batch).await
    }

    /// 关闭底层连接器，进入 [`StreamState::Closed`]。本地端口在 drop 时释放。
    pub fn close(&self) {
        self.connector.close();
    }

    pub fn add_target(&self, target: SocketAddr) -> bool {
        self.connector.add_target(target)
    }

    pub fn remove_target(&self, target: SocketAddr) -> bool {
        self.connector.remove_target(target)
    }

    pub fn targets(&self) -> Vec<SocketAddr> {
        self.connector.targets()
    }
}

impl TransformingUdpOutputStream<UdpSocket> {
    /// 按配置绑定 Tokio UDP 套接字。
    pub async fn bind(config: &OutputStreamConfig) -> Result<Self, EgressError> {
        UdpConnectorOutputStream::bind(config)
            .await
            .map(Self::from_connector)
    }
}

impl<S: DatagramSocket> fmt::Debug for TransformingUdpOutputStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformingUdpOutputStream")
            .field("bound", &self.transformer.load().is_some())
            .field("closed", &self.connector.is_closed())
            .finish()
    }
}
