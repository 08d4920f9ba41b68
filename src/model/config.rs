use crate::error::{CodecError, Result};
use crate::model::note::BEATS_PER_BAR;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SECONDS_PER_MINUTE: f64 = 60.0;
const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;

/// Every constant the pipeline stages share. Passed by reference to each stage.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub tempo_bpm: f64,
    pub ticks_per_beat: u16,
    /// Temporal resolution of the piano roll.
    pub steps_per_beat: usize,
    pub bars_per_segment: usize,
    /// Velocity given to decoded notes, the grid carries none.
    pub velocity: u8,
    /// How far before a segment boundary a clipped Off is placed, in beats.
    pub boundary_epsilon: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            ticks_per_beat: 480,
            steps_per_beat: 4,
            bars_per_segment: 4,
            velocity: 64,
            boundary_epsilon: 0.001,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            )
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tempo_bpm.is_finite() && self.tempo_bpm > 0.0) {
            return Err(CodecError::InvalidConfig(format!(
                "tempo must be positive, got {}",
                self.tempo_bpm
            )));
        }
        if self.ticks_per_beat == 0 || self.ticks_per_beat > 0x7FFF {
            return Err(CodecError::InvalidConfig(format!(
                "ticks_per_beat must be in 1..=32767, got {}",
                self.ticks_per_beat
            )));
        }
        if self.steps_per_beat == 0 || self.bars_per_segment == 0 {
            return Err(CodecError::InvalidConfig(
                "steps_per_beat and bars_per_segment must be non-zero".into(),
            ));
        }
        if self
            .bars_per_segment
            .checked_mul(BEATS_PER_BAR as usize)
            .and_then(|beats| beats.checked_mul(self.steps_per_beat))
            .is_none()
        {
            return Err(CodecError::InvalidConfig(format!(
                "{} bars at {} steps per beat do not fit in a grid",
                self.bars_per_segment, self.steps_per_beat
            )));
        }
        if self.velocity > 127 {
            return Err(CodecError::InvalidConfig(format!(
                "velocity must be in 0..=127, got {}",
                self.velocity
            )));
        }
        let step = 1.0 / self.steps_per_beat as f64;
        if !(self.boundary_epsilon > 0.0 && self.boundary_epsilon < step) {
            return Err(CodecError::InvalidConfig(format!(
                "boundary_epsilon must be in (0, {}), got {}",
                step, self.boundary_epsilon
            )));
        }
        Ok(())
    }

    pub fn beats_per_segment(&self) -> f64 {
        self.bars_per_segment as f64 * BEATS_PER_BAR as f64
    }

    /// Number of rows in a piano roll for one segment.
    pub fn steps_per_segment(&self) -> usize {
        self.bars_per_segment * BEATS_PER_BAR as usize * self.steps_per_beat
    }

    pub fn seconds_per_beat(&self) -> f64 {
        SECONDS_PER_MINUTE / self.tempo_bpm
    }

    pub fn seconds_per_step(&self) -> f64 {
        self.seconds_per_beat() / self.steps_per_beat as f64
    }

    /// Notes shorter than this are extended and re-triggers closer than this are merged.
    pub fn jitter_threshold_seconds(&self) -> f64 {
        self.seconds_per_beat() / 4.0
    }

    pub fn microseconds_per_beat(&self) -> u32 {
        (MICROSECONDS_PER_MINUTE / self.tempo_bpm).round() as u32
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "midi_roll",
    about = "Cut note streams into fixed segments, and convert between MIDI and piano rolls."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// JSON file with pipeline settings. Flags below override it.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Bars per segment.
    #[arg(short, long, global = true)]
    pub bars: Option<usize>,

    /// Piano-roll time steps per beat.
    #[arg(short, long, global = true)]
    pub steps_per_beat: Option<usize>,

    /// Tempo used when decoding piano rolls.
    #[arg(short, long, global = true)]
    pub tempo: Option<f64>,

    /// Transpose imported material in semitones (positive or negative).
    #[arg(long, global = true, default_value_t = 0)]
    pub transpose: i32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Normalize a MIDI file into fixed-length segments, one MIDI file each.
    Segment {
        /// Path to the source MIDI file.
        midi: PathBuf,

        /// Output directory.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Normalize a MIDI file and write each segment's piano roll as JSON rows.
    Encode {
        /// Path to the source MIDI file.
        midi: PathBuf,

        /// Output directory.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Decode a JSON piano roll (rows of 128 activations) into a MIDI file.
    Decode {
        /// Path to the JSON grid.
        grid: PathBuf,

        /// Output MIDI file.
        #[arg(short, long)]
        out: PathBuf,

        /// Activation above which a cell counts as on.
        #[arg(long, default_value_t = 0.5)]
        threshold: f32,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.steps_per_segment(), 64);
        assert_eq!(config.beats_per_segment(), 16.0);
        assert_eq!(config.microseconds_per_beat(), 500_000);
        assert_eq!(config.seconds_per_step(), 0.125);
        assert_eq!(config.jitter_threshold_seconds(), 0.125);
    }

    #[test]
    fn epsilon_must_fit_inside_a_step() {
        let config = PipelineConfig {
            boundary_epsilon: 0.25,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CodecError::InvalidConfig(_))
        ));
    }

    #[test]
    fn oversized_segments_are_rejected() {
        let config = PipelineConfig {
            bars_per_segment: usize::MAX / 2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CodecError::InvalidConfig(_))
        ));

        let wide = PipelineConfig {
            bars_per_segment: 1_000_000,
            ..Default::default()
        };
        assert!(wide.validate().is_ok());
        assert_eq!(wide.beats_per_segment(), 4_000_000.0);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "bars_per_segment": 16, "velocity": 100 }"#).unwrap();
        assert_eq!(config.bars_per_segment, 16);
        assert_eq!(config.velocity, 100);
        assert_eq!(config.ticks_per_beat, 480);
    }

    #[test]
    fn reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(&path, r#"{ "tempo_bpm": 90.0 }"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.tempo_bpm, 90.0);

        fs::write(&path, r#"{ "steps_per_beat": 0 }"#).unwrap();
        assert!(PipelineConfig::from_json_file(&path).is_err());
    }
}
