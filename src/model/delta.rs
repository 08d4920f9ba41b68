use serde::{Deserialize, Serialize};

/// Meta records written at the top and bottom of every track.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMeta {
    /// Microseconds per beat.
    Tempo(u32),
    TimeSignature {
        numerator: u8,
        /// Power of two, `2` means quarter notes.
        denominator_pow: u8,
        clocks_per_click: u8,
        notated_32nds_per_beat: u8,
    },
    KeySignature {
        sharps: i8,
        minor: bool,
    },
    EndOfTrack,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8, velocity: u8 },
    Meta(TrackMeta),
}

/// A track record timed relative to the record before it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaEvent {
    pub kind: DeltaKind,
    pub delta_ticks: u32,
}

impl DeltaEvent {
    pub fn meta(meta: TrackMeta) -> Self {
        Self {
            kind: DeltaKind::Meta(meta),
            delta_ticks: 0,
        }
    }
}
