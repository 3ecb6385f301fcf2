use crate::engine::Variant;

/// Errors raised while obtaining an engine instance.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The factory could not load or instantiate the engine.
    #[error("engine load failed ({factory}): {reason}")]
    Load { factory: String, reason: String },

    /// The factory does not provide the requested build variant.
    #[error("engine variant not available: {0:?}")]
    VariantUnavailable(Variant),
}

pub type Result<T> = std::result::Result<T, EngineError>;
