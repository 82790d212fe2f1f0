#![doc = r#"
# spark-rtp-egress

## 模块使命（Why）
- **可变换的发送级**：位于 RTP/RTCP 发送路径出口，在批次构造与 UDP 发射之间插入一个可插拔的
  [`PacketTransformer`]，承载加密、认证、头扩展改写或过滤等逐包处理。
- **热替换绑定**：发送级可以先于密钥/策略建立，变换器在会话协商完成后安装，并可在重新协商时替换或移除。
- **无错误抑制**：变换器返回空批次或空位即可阻止对应数据报发出，写入仍然成功。

## 核心契约（What）
- [`UdpConnectorOutputStream`]：父级输出流，持有套接字与目标列表，负责 `build_batch` 与 `emit`；
- [`TransformingUdpOutputStream`]：只替换批次构造步骤，其余发送行为全部继承；
- [`PacketTransformer`]：批量变换契约，批次类型为 [`PacketBatch`]（`Vec<Option<RawPacket>>`）；
- [`RawPacket`]：带尾部余量的可变包视图，始终满足 `offset + length <= capacity`；
- [`EgressError`]：区分传输失败、变换失败与非法输入三类错误。

## 实现策略（How）
- 变换器槽位使用 `arc-swap` 的 `ArcSwapOption`，每次 `write` 只做一次原子读取；
- 发射基于 Tokio `UdpSocket`，`write` 在调用方任务上顺序完成变换与多目标发送；
- 空批次与空位的过滤放在父级 `emit` 中，因此父级单独使用时同样容忍空位。

```no_run
use std::sync::Arc;
use spark_rtp_egress::{OutputStreamConfig, TransformingUdpOutputStream};
use spark_rtp_egress::transformer::{PacketTransformer, from_fn};

# async fn run() -> Result<(), spark_rtp_egress::EgressError> {
let config = OutputStreamConfig::default().with_targets(["127.0.0.1:5004".parse().unwrap()]);
let stream = TransformingUdpOutputStream::bind(&config).await?;

let mark: Arc<dyn PacketTransformer> = Arc::new(from_fn(|mut batch| {
    for packet in batch.iter_mut().flatten() {
        packet.write_u8(0, 0x81)?;
    }
    Ok(Some(batch))
}));
stream.set_transformer(Some(mark));
stream.write(&[0x80, 0x00, 0x00, 0x01], 0, 4).await?;
# Ok(())
# }
```
"#]

pub mod config;
pub mod connector;
pub mod error;
pub mod packet;
pub mod pool;
pub mod socket;
pub mod test_stubs;
pub mod transform_stream;
pub mod transformer;

pub use config::{ConfigError, OutputStreamConfig};
pub use connector::{EmitReport, UdpConnectorOutputStream};
pub use error::{EgressError, EgressErrorKind};
pub use packet::{PacketError, RawPacket};
pub use pool::RawPacketPool;
pub use socket::{DatagramSocket, UdpSocketOptions};
pub use transform_stream::{StreamState, TransformingUdpOutputStream};
pub use transformer::{PacketBatch, PacketTransformer, SinglePacketTransformer, TransformError};
