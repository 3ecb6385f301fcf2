use std::sync::Arc;

use avbridge_engine::{
    Capabilities, Engine, EngineError, EngineFactory, EngineOptions, Result, Variant, Vfs,
};

use crate::engine::SoftEngine;

/// Factory for [`SoftEngine`] instances.
///
/// The capability set and load outcome are configurable so hosts can
/// exercise variant selection and load-failure paths.
#[derive(Debug, Clone)]
pub struct SoftFactory {
    capabilities: Capabilities,
    failure: Option<String>,
}

impl Default for SoftFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftFactory {
    pub fn new() -> Self {
        Self {
            capabilities: Capabilities {
                accelerated: true,
                degraded: true,
                threaded: true,
            },
            failure: None,
        }
    }

    /// A factory whose every `create` fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::new()
        }
    }

    /// A factory that only provides the degraded build.
    pub fn without_acceleration() -> Self {
        Self {
            capabilities: Capabilities {
                accelerated: false,
                degraded: true,
                threaded: false,
            },
            failure: None,
        }
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            failure: None,
        }
    }
}

impl EngineFactory for SoftFactory {
    fn name(&self) -> &str {
        "soft"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create(&self, options: &EngineOptions, vfs: Arc<dyn Vfs>) -> Result<Box<dyn Engine>> {
        if let Some(reason) = &self.failure {
            return Err(EngineError::Load {
                factory: self.name().to_string(),
                reason: reason.clone(),
            });
        }
        let available = match options.variant {
            Variant::Accelerated => self.capabilities.accelerated,
            Variant::Degraded => self.capabilities.degraded,
        };
        if !available {
            return Err(EngineError::VariantUnavailable(options.variant));
        }
        tracing::debug!(variant = ?options.variant, threads = options.threads, "soft engine created");
        Ok(Box::new(SoftEngine::with_variant(options.variant, vfs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_factory_reports_reason() {
        let vfs: Arc<dyn Vfs> = Arc::new(crate::EmptyFs);
        let err = SoftFactory::failing("no wasm")
            .create(&EngineOptions::default(), vfs)
            .err()
            .unwrap();
        assert!(err.to_string().contains("no wasm"));
    }

    #[test]
    fn accelerated_variant_requires_capability() {
        let vfs: Arc<dyn Vfs> = Arc::new(crate::EmptyFs);
        let factory = SoftFactory::without_acceleration();
        assert!(matches!(
            factory.create(&EngineOptions::default(), vfs.clone()),
            Err(EngineError::VariantUnavailable(Variant::Accelerated))
        ));
        let engine = factory
            .create(
                &EngineOptions {
                    variant: Variant::Degraded,
                    threads: 1,
                },
                vfs,
            )
            .unwrap();
        assert_eq!(engine.variant(), Variant::Degraded);
    }
}
