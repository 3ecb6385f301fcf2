//! Channel mode: the engine isolated behind a message link.

use std::sync::Arc;

use avbridge_device::DeviceConfig;
use avbridge_engine::{EngineFactory, EngineOptions, Variant};
#[cfg(unix)]
use avbridge_protocol::FrameConfig;
use avbridge_protocol::{memory_pair, Link};

use crate::config::{BridgeConfig, LinkKind};
#[cfg(not(unix))]
use crate::error::BridgeError;
use crate::error::Result;
use crate::remote::{spawn_engine, EngineDevices, RemoteClient};

/// Both endpoints of the configured link kind.
pub(crate) fn open_link(config: &BridgeConfig) -> Result<(Link, Link)> {
    match config.link {
        LinkKind::Memory => Ok(memory_pair()),
        #[cfg(unix)]
        LinkKind::Socket => {
            let frames = FrameConfig {
                max_payload_size: config.max_payload_size,
            };
            Ok(avbridge_protocol::socket_pair(frames)?)
        }
        #[cfg(not(unix))]
        LinkKind::Socket => Err(BridgeError::Config(
            "socket links need Unix domain sockets".into(),
        )),
    }
}

pub(crate) async fn start(
    factory: Arc<dyn EngineFactory>,
    variant: Variant,
    config: &BridgeConfig,
) -> Result<RemoteClient> {
    let (host, engine) = open_link(config)?;
    let devices = EngineDevices::Own(DeviceConfig {
        block_size: config.block_size,
        blocking_reads: false,
    });
    let name = factory.name().to_string();
    spawn_engine(factory, EngineOptions { variant, threads: 1 }, devices, engine)?;
    let client = RemoteClient::connect(host, &name, None).await?;
    tracing::debug!(engine = %name, link = ?config.link, "channel mode ready");
    Ok(client)
}
