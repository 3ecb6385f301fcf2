use std::time::Duration;

use avbridge_device::DEFAULT_BLOCK_SIZE;
use avbridge_protocol::DEFAULT_MAX_PAYLOAD;
use serde::{Deserialize, Serialize};

/// How the host talks to an isolated engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// In-process queues; transferable buffers move without copying.
    #[default]
    Memory,
    /// The framed wire form over a Unix socket pair.
    Socket,
}

/// Options for [`Bridge::create`](crate::Bridge::create).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Fall back to the degraded engine build when the accelerated one is
    /// unavailable.
    pub allow_degraded: bool,
    /// Use the degraded build even when the accelerated one is available.
    pub force_degraded: bool,
    /// Run the engine behind a message channel.
    pub isolate: bool,
    /// Let the engine own a pool of worker threads.
    pub threads: bool,
    /// Worker threads handed to the engine in thread-pool mode.
    pub pool_size: usize,
    pub link: LinkKind,
    pub max_payload_size: usize,
    /// Fetch granularity for read-ahead devices.
    pub block_size: usize,
    /// Per-call deadline, in milliseconds.
    pub call_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            allow_degraded: true,
            force_degraded: false,
            isolate: true,
            threads: false,
            pool_size: std::thread::available_parallelism().map_or(1, |n| n.get()),
            link: LinkKind::Memory,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            block_size: DEFAULT_BLOCK_SIZE,
            call_timeout_ms: None,
        }
    }
}

impl BridgeConfig {
    /// Engine in the caller's context: no isolation, no worker threads.
    pub fn direct() -> Self {
        Self {
            isolate: false,
            ..Self::default()
        }
    }

    pub fn with_allow_degraded(mut self, allow: bool) -> Self {
        self.allow_degraded = allow;
        self
    }

    pub fn with_force_degraded(mut self, force: bool) -> Self {
        self.force_degraded = force;
        self
    }

    pub fn with_isolate(mut self, isolate: bool) -> Self {
        self.isolate = isolate;
        self
    }

    pub fn with_threads(mut self, threads: bool) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_link(mut self, link: LinkKind) -> Self {
        self.link = link;
        self
    }

    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"isolate": false, "link": "socket", "call_timeout_ms": 250}"#)
                .expect("config should parse");
        assert!(!config.isolate);
        assert!(config.allow_degraded);
        assert_eq!(config.link, LinkKind::Socket);
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.max_payload_size, DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn builders_set_fields() {
        let config = BridgeConfig::direct()
            .with_threads(true)
            .with_pool_size(0)
            .with_call_timeout(Duration::from_secs(2));
        assert!(!config.isolate);
        assert!(config.threads);
        assert_eq!(config.pool_size, 1);
        assert_eq!(config.call_timeout_ms, Some(2000));
    }
}
