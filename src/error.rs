//! Error taxonomy shared by every conversion stage.
//!
//! All of these are contract violations by the caller (or, for
//! [`CodecError::UnderflowPairing`], by this crate), so nothing is retried and
//! no stage ever returns a partial result.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// Empty stream, no derivable note-length quantum, or a note with `end <= start`.
    #[error("malformed note stream: {0}")]
    MalformedStream(String),

    /// The encoder was asked to write past the declared grid length.
    #[error("note on pitch {pitch} reaches step {steps}, but the grid only has {limit} steps")]
    ShapeMismatch {
        pitch: u8,
        steps: usize,
        limit: usize,
    },

    #[error("piano roll has {0} pitch columns, expected 128")]
    GridWidth(usize),

    /// A delta-time would be negative, meaning the records were not time-ordered.
    #[error("non-monotonic time at record {index}: tick {ticks} follows tick {previous_ticks}")]
    NonMonotonicTime {
        index: usize,
        previous_ticks: i64,
        ticks: i64,
    },

    /// The decoder ran out of offsets for a pitch that still had onsets.
    #[error("pitch {pitch} has {onsets} onset(s) but no offsets after padding")]
    UnderflowPairing { pitch: u8, onsets: usize },

    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("midi error: {0}")]
    Midi(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
