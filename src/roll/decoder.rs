//! Reconstructs notes from a binary piano roll.
//!
//! Every pitch column is decoded on its own (no state is shared between
//! columns) and the results are merged into one stream ordered by start beat,
//! then pitch:
//!
//! 1. Pad the column with a silent step on both sides and take the first
//!    difference. Rising edges are onsets, falling edges are offsets.
//! 2. Pair the i-th onset with the i-th offset.
//! 3. Merge re-triggers: any later note that both starts and ends within the
//!    jitter threshold of an earlier onset is folded into that note.
//! 4. Extend notes shorter than the threshold, clamped to the end of the roll.

use crate::error::{CodecError, Result};
use crate::model::config::PipelineConfig;
use crate::model::note::{Note, NoteStream};
use crate::roll::{NUM_PITCHES, PianoRoll};
use log::debug;
use ndarray::{ArrayView1, ArrayView2};
use std::collections::HashSet;

/// Timing derived once per roll, in seconds.
#[derive(Debug, Clone, Copy)]
struct Clock {
    seconds_per_step: f64,
    seconds_per_beat: f64,
    threshold: f64,
    phrase_end: f64,
}

impl Clock {
    fn new(steps: usize, config: &PipelineConfig) -> Self {
        let seconds_per_step = config.seconds_per_step();
        Self {
            seconds_per_step,
            seconds_per_beat: config.seconds_per_beat(),
            threshold: config.jitter_threshold_seconds(),
            phrase_end: seconds_per_step * steps as f64,
        }
    }

    fn to_beats(self, seconds: f64) -> f64 {
        seconds / self.seconds_per_beat
    }
}

pub fn decode(roll: &PianoRoll, config: &PipelineConfig) -> Result<NoteStream> {
    config.validate()?;

    let mut notes: Vec<Note> = Vec::new();
    for pitch in 0..NUM_PITCHES {
        notes.extend(decode_column(roll.column(pitch), pitch as u8, config)?);
    }

    notes.sort_by(|a, b| {
        a.start_beat
            .total_cmp(&b.start_beat)
            .then_with(|| a.pitch.cmp(&b.pitch))
    });

    debug!(
        "Decoded {} notes from {} steps ({} active cells)..!",
        notes.len(),
        roll.steps(),
        roll.active_cells()
    );

    Ok(NoteStream::from_ordered(notes))
}

/// Binarizes raw activations and decodes them in one go.
pub fn decode_activations(
    activations: ArrayView2<f32>,
    threshold: f32,
    config: &PipelineConfig,
) -> Result<NoteStream> {
    let roll = PianoRoll::binarize(activations, threshold)?;
    decode(&roll, config)
}

/// Decodes a single pitch column. Notes come back in onset order.
pub fn decode_column(
    column: ArrayView1<u8>,
    pitch: u8,
    config: &PipelineConfig,
) -> Result<Vec<Note>> {
    let clock = Clock::new(column.len(), config);
    let (mut onsets, offsets) = edges(column, clock.seconds_per_step);

    if onsets.len() > offsets.len() {
        if offsets.is_empty() {
            return Err(CodecError::UnderflowPairing {
                pitch,
                onsets: onsets.len(),
            });
        }
        debug!(
            "Pitch {}: dropping {} onset(s) with no offset..!",
            pitch,
            onsets.len() - offsets.len()
        );
        onsets.truncate(offsets.len());
    }

    let pairs = suppress_jitter(&onsets, &offsets, clock.threshold);

    let notes = pairs
        .into_iter()
        .map(|(start, end)| {
            let end = enforce_min_duration(start, end, clock.threshold, clock.phrase_end);
            Note::new(
                pitch,
                clock.to_beats(start),
                clock.to_beats(end),
                config.velocity,
            )
        })
        .collect();

    Ok(notes)
}

/// Onset and offset times of a column padded with one silent step at each end.
fn edges(column: ArrayView1<u8>, seconds_per_step: f64) -> (Vec<f64>, Vec<f64>) {
    let mut onsets = Vec::new();
    let mut offsets = Vec::new();

    let mut previous = 0i16;
    for step in 0..=column.len() {
        let current = column.get(step).map_or(0, |&v| (v != 0) as i16);
        let time = step as f64 * seconds_per_step;
        match current - previous {
            1 => onsets.push(time),
            -1 => offsets.push(time),
            _ => {}
        }
        previous = current;
    }

    (onsets, offsets)
}

/// Drops every later pair that starts before and ends no later than
/// `onset + threshold` of a surviving earlier onset. The last onset is never an anchor.
fn suppress_jitter(onsets: &[f64], offsets: &[f64], threshold: f64) -> Vec<(f64, f64)> {
    let count = onsets.len().min(offsets.len());
    let mut dropped: HashSet<usize> = HashSet::new();

    for i in 0..count.saturating_sub(1) {
        if dropped.contains(&i) {
            continue;
        }
        let window_end = onsets[i] + threshold;
        for j in (i + 1)..count {
            if onsets[j] < window_end && offsets[j] <= window_end {
                dropped.insert(j);
            }
        }
    }

    (0..count)
        .filter(|idx| !dropped.contains(idx))
        .map(|idx| (onsets[idx], offsets[idx]))
        .collect()
}

fn enforce_min_duration(start: f64, end: f64, threshold: f64, phrase_end: f64) -> f64 {
    if end - start >= threshold {
        end
    } else if start + threshold <= phrase_end {
        start + threshold
    } else {
        phrase_end
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::roll::encoder::encode;

    const EPSILON: f64 = 1e-9;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= EPSILON
    }

    fn config(steps_per_beat: usize) -> PipelineConfig {
        PipelineConfig {
            steps_per_beat,
            ..Default::default()
        }
    }

    fn roll_with(steps: usize, spans: &[(usize, std::ops::Range<usize>)]) -> PianoRoll {
        let mut roll = PianoRoll::zeros(steps);
        for (pitch, range) in spans.iter() {
            roll.fill(*pitch, range.clone());
        }
        roll
    }

    #[test]
    fn full_length_note_is_kept() {
        env_logger::try_init().unwrap_or(());

        let roll = roll_with(16, &[(60, 0..3)]);
        let stream = decode(&roll, &config(4)).unwrap();

        assert_eq!(stream.len(), 1);
        let note = stream.notes()[0];
        assert_eq!(note.pitch, 60);
        assert_eq!(note.velocity, 64);
        assert!(approx_eq(note.start_beat, 0.0));
        assert!(approx_eq(note.end_beat, 0.75));
    }

    #[test]
    fn short_note_is_extended_to_threshold() {
        env_logger::try_init().unwrap_or(());

        // one step at 8 steps per beat is an eighth of a beat, the threshold is a quarter
        let roll = roll_with(32, &[(60, 4..5)]);
        let stream = decode(&roll, &config(8)).unwrap();

        assert_eq!(stream.len(), 1);
        assert!(approx_eq(stream.notes()[0].start_beat, 0.5));
        assert!(approx_eq(stream.notes()[0].end_beat, 0.75));
    }

    #[test]
    fn one_step_at_threshold_is_unchanged() {
        let roll = roll_with(16, &[(60, 2..3)]);
        let stream = decode(&roll, &config(4)).unwrap();
        assert!(approx_eq(stream.notes()[0].start_beat, 0.5));
        assert!(approx_eq(stream.notes()[0].end_beat, 0.75));
    }

    #[test]
    fn extension_is_clamped_to_phrase_end() {
        let roll = roll_with(16, &[(60, 15..16)]);
        let stream = decode(&roll, &config(8)).unwrap();

        let note = stream.notes()[0];
        assert!(approx_eq(note.start_beat, 1.875));
        assert!(approx_eq(note.end_beat, 2.0));
    }

    #[test]
    fn retrigger_inside_threshold_is_merged() {
        env_logger::try_init().unwrap_or(());

        let roll = roll_with(64, &[(60, 0..1), (60, 2..3)]);
        let stream = decode(&roll, &config(16)).unwrap();

        assert_eq!(stream.len(), 1);
        let note = stream.notes()[0];
        assert!(approx_eq(note.start_beat, 0.0));
        assert!(approx_eq(note.end_beat, 0.25));
    }

    #[test]
    fn separated_notes_stay_apart() {
        let roll = roll_with(64, &[(60, 0..4), (60, 8..12)]);
        let stream = decode(&roll, &config(16)).unwrap();

        assert_eq!(stream.len(), 2);
        assert!(approx_eq(stream.notes()[1].start_beat, 0.5));
        assert!(approx_eq(stream.notes()[1].end_beat, 0.75));
    }

    #[test]
    fn empty_roll_decodes_to_nothing() {
        let stream = decode(&PianoRoll::zeros(64), &PipelineConfig::default()).unwrap();
        assert!(stream.is_empty());

        let column = PianoRoll::zeros(64);
        let notes = decode_column(column.column(12), 12, &PipelineConfig::default()).unwrap();
        assert!(notes.is_empty());
    }

    #[test]
    fn sustain_to_last_step_closes_at_phrase_end() {
        let roll = roll_with(64, &[(72, 40..64)]);
        let stream = decode(&roll, &PipelineConfig::default()).unwrap();

        assert_eq!(stream.len(), 1);
        assert!(approx_eq(stream.notes()[0].start_beat, 10.0));
        assert!(approx_eq(stream.notes()[0].end_beat, 16.0));
    }

    #[test]
    fn output_is_ordered_by_start_then_pitch() {
        let roll = roll_with(64, &[(67, 0..4), (60, 0..4), (64, 4..8), (48, 8..16)]);
        let stream = decode(&roll, &PipelineConfig::default()).unwrap();

        let order: Vec<(u8, f64)> = stream.iter().map(|n| (n.pitch, n.start_beat)).collect();
        assert_eq!(order, vec![(60, 0.0), (67, 0.0), (64, 1.0), (48, 2.0)]);
    }

    #[test]
    fn decoded_notes_respect_minimum_duration() {
        env_logger::try_init().unwrap_or(());

        let config = config(16);
        let steps = 256;
        let mut roll = PianoRoll::zeros(steps);
        let mut seed: u64 = 0x5EED;
        for pitch in 36..84 {
            for step in 0..steps {
                seed = seed
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                if (seed >> 33) % 3 == 0 {
                    roll.fill(pitch, step..step + 1);
                }
            }
        }

        let stream = decode(&roll, &config).unwrap();
        assert!(!stream.is_empty());

        let threshold_beats = config.jitter_threshold_seconds() / config.seconds_per_beat();
        let phrase_end_beats = steps as f64 / config.steps_per_beat as f64;
        for note in stream.iter() {
            assert!(
                note.duration() >= threshold_beats - EPSILON
                    || approx_eq(note.end_beat, phrase_end_beats)
            );
            assert!(note.end_beat <= phrase_end_beats + EPSILON);
        }
    }

    #[test]
    fn edges_are_balanced() {
        let roll = roll_with(16, &[(60, 0..2), (60, 5..16)]);
        let (onsets, offsets) = edges(roll.column(60), 0.125);
        assert_eq!(onsets, vec![0.0, 0.625]);
        assert_eq!(offsets, vec![0.25, 2.0]);
    }

    #[test]
    fn suppression_uses_surviving_anchors_only() {
        // j=1 is folded into 0, so it cannot swallow j=2 even though 2 is close to it
        let onsets = [0.0, 0.1, 0.2];
        let offsets = [0.05, 0.12, 0.22];
        let kept = suppress_jitter(&onsets, &offsets, 0.125);
        assert_eq!(kept, vec![(0.0, 0.05), (0.2, 0.22)]);
    }

    #[test]
    fn round_trips_well_separated_notes() {
        let config = PipelineConfig::default();
        let source = NoteStream::from_notes(vec![
            Note::new(60, 0.0, 1.0, 64),
            Note::new(64, 0.0, 2.0, 64),
            Note::new(60, 2.0, 3.5, 64),
            Note::new(67, 8.0, 16.0, 64),
        ])
        .unwrap();

        let decoded = decode(&encode(&source, &config).unwrap(), &config).unwrap();
        assert_eq!(decoded, source);
    }
}
