//! Thread-pool mode: the engine owns its workers; one thread takes
//! commands.
//!
//! The device table is shared. Device functions and hooks run on the host
//! side against it, and a read that finds no data parks the engine's
//! command thread until the host feeds the device.

use std::sync::Arc;

use avbridge_device::{DeviceConfig, DeviceTable};
use avbridge_engine::{EngineFactory, EngineOptions, Variant};
use avbridge_protocol::memory_pair;

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::remote::{spawn_engine, EngineDevices, HostErrorRelay, RemoteClient};

pub(crate) async fn start(
    factory: Arc<dyn EngineFactory>,
    variant: Variant,
    config: &BridgeConfig,
) -> Result<(RemoteClient, Arc<DeviceTable>)> {
    let devices = DeviceTable::new(DeviceConfig {
        block_size: config.block_size,
        blocking_reads: true,
    });
    let relay = HostErrorRelay::default();
    let (host, engine) = memory_pair();
    let name = factory.name().to_string();
    let options = EngineOptions {
        variant,
        threads: config.pool_size.max(1),
    };
    spawn_engine(
        factory,
        options,
        EngineDevices::Shared(Arc::clone(&devices), Arc::clone(&relay)),
        engine,
    )?;
    let client = RemoteClient::connect(host, &name, Some(relay)).await?;
    tracing::debug!(engine = %name, threads = config.pool_size, "thread-pool mode ready");
    Ok((client, devices))
}
