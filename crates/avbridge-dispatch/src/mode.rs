use std::fmt;

use avbridge_engine::{Capabilities, EngineError, Variant};
use serde::Serialize;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Execution topology of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Engine in the caller's context; calls run inline.
    Direct,
    /// Engine on its own thread behind a message link.
    Channel,
    /// Engine with its own worker pool; one thread takes commands.
    ThreadPool,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Direct => "direct",
            Mode::Channel => "channel",
            Mode::ThreadPool => "thread-pool",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the topology and engine build for a configuration.
///
/// The degraded build is chosen when forced or when the accelerated one is
/// missing. Thread-pool mode needs threads requested, an accelerated
/// threaded build and more than one hardware thread. Otherwise isolation
/// selects channel mode, and direct mode is the fallback.
pub fn select_mode(
    config: &BridgeConfig,
    capabilities: Capabilities,
    parallelism: usize,
) -> Result<(Mode, Variant)> {
    let variant = if config.force_degraded || !capabilities.accelerated {
        if !config.allow_degraded {
            return Err(BridgeError::DegradedNotAllowed);
        }
        if !capabilities.degraded {
            return Err(EngineError::VariantUnavailable(Variant::Degraded).into());
        }
        Variant::Degraded
    } else {
        Variant::Accelerated
    };

    let mode = if config.threads
        && variant == Variant::Accelerated
        && capabilities.threaded
        && parallelism > 1
    {
        Mode::ThreadPool
    } else if config.isolate {
        Mode::Channel
    } else {
        Mode::Direct
    };
    tracing::debug!(%mode, ?variant, parallelism, "topology selected");
    Ok((mode, variant))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: Capabilities = Capabilities {
        accelerated: true,
        degraded: true,
        threaded: true,
    };

    #[test]
    fn isolation_selects_channel() {
        let (mode, variant) = select_mode(&BridgeConfig::default(), FULL, 8).unwrap();
        assert_eq!(mode, Mode::Channel);
        assert_eq!(variant, Variant::Accelerated);
    }

    #[test]
    fn direct_when_nothing_requested() {
        let (mode, _) = select_mode(&BridgeConfig::direct(), FULL, 8).unwrap();
        assert_eq!(mode, Mode::Direct);
    }

    #[test]
    fn thread_pool_needs_parallelism() {
        let config = BridgeConfig::direct().with_threads(true);
        assert_eq!(select_mode(&config, FULL, 4).unwrap().0, Mode::ThreadPool);
        assert_eq!(select_mode(&config, FULL, 1).unwrap().0, Mode::Direct);
    }

    #[test]
    fn degraded_build_never_gets_a_pool() {
        let config = BridgeConfig::default()
            .with_threads(true)
            .with_force_degraded(true);
        let (mode, variant) = select_mode(&config, FULL, 8).unwrap();
        assert_eq!(mode, Mode::Channel);
        assert_eq!(variant, Variant::Degraded);
    }

    #[test]
    fn missing_acceleration_requires_permission() {
        let caps = Capabilities {
            accelerated: false,
            degraded: true,
            threaded: false,
        };
        let config = BridgeConfig::default().with_allow_degraded(false);
        assert!(matches!(
            select_mode(&config, caps, 8),
            Err(BridgeError::DegradedNotAllowed)
        ));
        assert_eq!(
            select_mode(&BridgeConfig::default(), caps, 8).unwrap().1,
            Variant::Degraded
        );
    }

    #[test]
    fn no_usable_build_is_a_load_error() {
        let caps = Capabilities::default();
        assert!(matches!(
            select_mode(&BridgeConfig::default(), caps, 8),
            Err(BridgeError::Load(EngineError::VariantUnavailable(Variant::Degraded)))
        ));
    }
}
