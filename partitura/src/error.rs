// Error taxonomy for the placement engine.
//
// Only structural and configuration mistakes are errors: bad durations or
// weights, spans outside a timeline, names missing from a lookup table, and
// I/O while loading config or writing notation. "Nothing fits here" outcomes
// of a constrained search (no openings, no surviving pitch candidates) are
// ordinary empty results and never pass through this type.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A duration, weight list, resolution or tempo that can't describe time.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A span (in ticks) that doesn't fit inside a timeline.
    #[error("span at tick {offset} lasting {duration} ticks is outside a timeline of {length} ticks")]
    OutOfRange {
        offset: i64,
        duration: i64,
        length: usize,
    },

    #[error("no instrument named '{0}' in the instrument table")]
    UnknownInstrument(String),

    #[error("no part with id '{0}' in this piece")]
    UnknownPart(String),

    #[error("no layer named '{0}'")]
    UnknownLayer(String),

    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidInput(msg.into())
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
