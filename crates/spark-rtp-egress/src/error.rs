//! 发送级统一错误类型。
//!
//! # 错误分类（What）
//! - **传输失败**：`Bind`、`Transport`、`Closed`，源自操作系统或套接字生命周期；
//! - **变换失败**：`Transform`，源自变换器，保留原始 [`TransformError`]；
//! - **输入非法**：`InvalidRange`、`Packet`、`Config`，调用方给出的区间、缓冲规模或配置不合法。
//!
//! 变换器主动丢弃（返回空批次或空位）与未绑定变换器的写入都不是错误，
//! 因此不在此处建模。

use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::{config::ConfigError, packet::PacketError, transformer::TransformError};

/// `write` 及其构造路径可能返回的错误。
#[derive(Debug, Error)]
pub enum EgressError {
    /// 绑定 UDP 套接字失败。
    #[error("无法绑定 UDP 套接字到 {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// 向某个目标发送数据报被操作系统拒绝。
    #[error("发送 UDP 数据报到 {target} 失败: {source}")]
    Transport {
        target: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// 输出流已关闭。
    #[error("UDP 输出流已关闭")]
    Closed,
    /// 变换器报告失败。
    #[error("包变换失败: {0}")]
    Transform(#[from] TransformError),
    /// 写入区间越过调用方缓冲。
    #[error("写入区间越界: offset={offset} length={length} available={available}")]
    InvalidRange {
        offset: usize,
        length: usize,
        available: usize,
    },
    /// 按配置构造包缓冲失败。
    #[error("无法构造包缓冲: {0}")]
    Packet(#[from] PacketError),
    /// 配置未通过校验。
    #[error("发送级配置非法: {0}")]
    Config(#[from] ConfigError),
}

/// 粗粒度错误类别，便于调用方按类别分支处理。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EgressErrorKind {
    Transport,
    Transform,
    InvalidInput,
}

impl EgressError {
    pub fn kind(&self) -> EgressErrorKind {
        match self {
            EgressError::Bind { .. } | EgressError::Transport { .. } | EgressError::Closed => {
                EgressErrorKind::Transport
            }
            EgressError::Transform(_) => EgressErrorKind::Transform,
            EgressError::InvalidRange { .. } | EgressError::Packet(_) | EgressError::Config(_) => {
                EgressErrorKind::InvalidInput
            }
        }
    }
}
