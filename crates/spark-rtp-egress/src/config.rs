//! 发送级配置。
//!
//! 配置以 TOML 描述，例如：
//!
//! ```toml
//! bind = "0.0.0.0:5004"
//! targets = ["192.0.2.10:5004", "192.0.2.11:5004"]
//! tail_room = 64
//! max_pooled_buffers = 64
//!
//! [socket]
//! ttl = 32
//! send_buffer_size = 262144
//! ```
//!
//! 所有字段均可省略，缺省值见 [`OutputStreamConfig::default`]。

use std::{
    fs, io,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::socket::UdpSocketOptions;

/// 每个包默认预留的尾部字节数，足以容纳常见的认证标签与 SRTCP 索引。
pub const DEFAULT_TAIL_ROOM: usize = 64;

/// 包池默认保留的空闲缓冲数量。
pub const DEFAULT_MAX_POOLED_BUFFERS: usize = 64;

/// 单个 UDP 数据报（IPv4）可承载的最大负载。
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507;

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("解析发送级配置失败: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("配置项 `{field}` 非法: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// UDP 发送级配置。
///
/// # What
/// - `bind`：本地绑定地址，端口 `0` 表示由系统分配；
/// - `targets`：初始目标列表，每个发射的数据报都会复制到全部目标；
/// - `tail_room`：构造包时在负载后预留的字节数，变换器可在其中原地追加；
/// - `max_pooled_buffers`：包池保留的空闲缓冲上限，`0` 表示不复用；
/// - `socket`：绑定后应用的套接字选项。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputStreamConfig {
    pub bind: SocketAddr,
    pub targets: Vec<SocketAddr>,
    pub tail_room: usize,
    pub max_pooled_buffers: usize,
    pub socket: UdpSocketOptions,
}

impl Default for OutputStreamConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            targets: Vec::new(),
            tail_room: DEFAULT_TAIL_ROOM,
            max_pooled_buffers: DEFAULT_MAX_POOLED_BUFFERS,
            socket: UdpSocketOptions::default(),
        }
    }
}

impl OutputStreamConfig {
    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 读取并解析配置文件。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 校验取值范围。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tail_room > MAX_DATAGRAM_PAYLOAD {
            return Err(ConfigError::Invalid {
                field: "tail_room",
                reason: format!("不得超过单个数据报上限 {MAX_DATAGRAM_PAYLOAD}"),
            });
        }
        if let Some(ttl) = self.socket.ttl() {
            if !(1..=255).contains(&ttl) {
                return Err(ConfigError::Invalid {
                    field: "socket.ttl",
                    reason: format!("取值 {ttl} 不在 1..=255 内"),
                });
            }
        }
        if self.socket.send_buffer_size() == Some(0) {
            return Err(ConfigError::Invalid {
                field: "socket.send_buffer_size",
                reason: "发送缓冲不能为 0".to_owned(),
            });
        }
        Ok(())
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.targets = targets.into_iter().collect();
        self
    }

    pub fn with_tail_room(mut self, tail_room: usize) -> Self {
        self.tail_room = tail_room;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = OutputStreamConfig::from_toml_str("").expect("空配置合法");
        assert_eq!(config, OutputStreamConfig::default());
        assert_eq!(config.tail_room, DEFAULT_TAIL_ROOM);
        assert_eq!(config.bind.port(), 0);
    }

    #[test]
    fn full_document_is_parsed() {
        let config = OutputStreamConfig::from_toml_str(
            r#"
            bind = "127.0.0.1:5004"
            targets = ["127.0.0.1:6000", "[::1]:6002"]
            tail_room = 16
            max_pooled_buffers = 0

            [socket]
            broadcast = true
            ttl = 32
            send_buffer_size = 65536
            "#,
        )
        .expect("合法配置");

        assert_eq!(config.bind, "127.0.0.1:5004".parse().expect("addr"));
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.tail_room, 16);
        assert_eq!(config.max_pooled_buffers, 0);
        assert!(config.socket.broadcast());
        assert_eq!(config.socket.multicast_loop_v4(), None);
        assert_eq!(config.socket.ttl(), Some(32));
        assert_eq!(config.socket.send_buffer_size(), Some(65536));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = OutputStreamConfig::from_toml_str("retries = 3").expect_err("未知字段");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = OutputStreamConfig::from_toml_str("tail_room = 70000").expect_err("超限");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "tail_room",
                ..
            }
        ));

        let err = OutputStreamConfig::from_toml_str("[socket]\nttl = 0").expect_err("TTL 为 0");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "socket.ttl",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = OutputStreamConfig::from_path("/nonexistent/spark-rtp-egress.toml")
            .expect_err("文件不存在");
        match err {
            ConfigError::Io { path, .. } => {
                assert!(path.ends_with("spark-rtp-egress.toml"));
            }
            other => panic!("意外的错误类型: {other}"),
        }
    }
}
