//! Cuts a note stream of any length into windows of exactly `bars_per_segment` bars.
//!
//! Short material is tiled forward until it fills a window, long material is
//! extended until its last window is full and then cut. A note that starts in
//! one window and ends within one note unit past its boundary is closed just
//! before that boundary, and Ons left without an Off at the end of a window are
//! dropped so no note is left hanging.

use crate::error::{CodecError, Result};
use crate::model::config::PipelineConfig;
use crate::model::note::{MessageKind, NoteMessage, NoteStream, bar_of};
use log::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct Record {
    msg: NoteMessage,
    order: usize,
}

/// Normalizes `stream` into one stream per window, each rebased to start at beat 0.
pub fn normalize(stream: &NoteStream, config: &PipelineConfig) -> Result<Vec<NoteStream>> {
    if stream.is_empty() {
        return Err(CodecError::MalformedStream(
            "cannot segment an empty stream".into(),
        ));
    }
    let Some(unit) = stream.note_unit() else {
        return Err(CodecError::MalformedStream(format!(
            "{} note(s) share a single start time, the note length cannot be derived",
            stream.len()
        )));
    };

    assemble(stream, config, unit)
}

/// Same as [`normalize`], except that a stream whose notes all share one start
/// (a single note or chord) is tiled using its longest duration as the note unit.
pub fn normalize_lenient(stream: &NoteStream, config: &PipelineConfig) -> Result<Vec<NoteStream>> {
    if stream.note_unit().is_some() {
        return normalize(stream, config);
    }

    let Some(unit) = stream.iter().map(|n| n.duration()).max_by(f64::total_cmp) else {
        return Err(CodecError::MalformedStream(
            "cannot segment an empty stream".into(),
        ));
    };

    warn!(
        "All {} note(s) start together, tiling with their duration of {} beats..!",
        stream.len(),
        unit
    );
    assemble(stream, config, unit)
}

fn assemble(stream: &NoteStream, config: &PipelineConfig, unit: f64) -> Result<Vec<NoteStream>> {
    config.validate()?;

    let (Some(max_start), Some(max_bar)) = (stream.max_start(), stream.max_bar()) else {
        return Err(CodecError::MalformedStream(
            "cannot segment an empty stream".into(),
        ));
    };

    let step = 1.0 / config.steps_per_beat as f64;
    if !(unit >= step) {
        return Err(CodecError::MalformedStream(format!(
            "note unit of {} beats is shorter than one grid step ({} beats)",
            unit, step
        )));
    }

    let bars_per_segment = config.bars_per_segment;
    let span = config.beats_per_segment();
    let num_bars = max_bar + 1;
    let num_segments = num_bars.div_ceil(bars_per_segment);
    let period = max_start + unit;

    // period >= unit >= one step, so this stays below steps_per_segment * num_segments
    let copies = if num_bars % bars_per_segment == 0 {
        1
    } else {
        ((num_segments as f64 * span) / period).ceil().max(1.0) as usize
    };

    debug!(
        "Segmenting {} notes: {} bar(s), unit {} beats, {} copies into {} segment(s)..!",
        stream.len(),
        num_bars,
        unit,
        copies,
        num_segments
    );

    let mut records: Vec<Record> = Vec::with_capacity(copies * stream.len() * 2);
    for copy in 0..copies {
        let offset = copy as f64 * period;
        for note in stream.iter() {
            let start = note.start_beat + offset;
            let end = clipped_end(
                start,
                note.end_beat + offset,
                span,
                unit,
                config.boundary_epsilon,
                bars_per_segment,
            );

            for msg in [
                NoteMessage::on(note.pitch, start, note.velocity),
                NoteMessage::off(note.pitch, end),
            ] {
                let order = records.len();
                records.push(Record { msg, order });
            }
        }
    }

    records.sort_by(|a, b| {
        a.msg
            .beat
            .total_cmp(&b.msg.beat)
            .then_with(|| a.order.cmp(&b.order))
    });

    let mut segments = Vec::with_capacity(num_segments);
    for segment in 0..num_segments {
        let in_segment: Vec<Record> = records
            .iter()
            .filter(|r| segment_of(r.msg.beat, bars_per_segment) == segment)
            .copied()
            .collect();

        let origin = segment as f64 * span;
        let rebased: Vec<NoteMessage> = balance(in_segment)
            .into_iter()
            .map(|r| NoteMessage {
                beat: r.msg.beat - origin,
                ..r.msg
            })
            .collect();

        let notes = NoteStream::from_messages(&rebased);
        if notes.is_empty() {
            debug!("Segment {} holds no complete notes, skipping..!", segment);
            continue;
        }

        debug!("Segment {}: {} notes..!", segment, notes.len());
        segments.push(notes);
    }

    Ok(segments)
}

fn segment_of(beat: f64, bars_per_segment: usize) -> usize {
    bar_of(beat) / bars_per_segment
}

/// End of a note after boundary clipping. A note that starts in an earlier
/// window than the one its end falls in, and ends no more than one unit past
/// that window's start, is closed just before the boundary. Notes that start
/// in the window they end in are never touched.
fn clipped_end(
    start: f64,
    end: f64,
    span: f64,
    unit: f64,
    epsilon: f64,
    bars_per_segment: usize,
) -> f64 {
    let end_segment = segment_of(end, bars_per_segment);
    if end_segment == 0 || segment_of(start, bars_per_segment) >= end_segment {
        return end;
    }

    let boundary = end_segment as f64 * span;
    if end <= boundary + unit {
        boundary - epsilon
    } else {
        end
    }
}

/// Drops the trailing Ons that outnumber the Offs, keeping everything else in order.
fn balance(records: Vec<Record>) -> Vec<Record> {
    let open: i64 = records
        .iter()
        .map(|r| match r.msg.kind {
            MessageKind::On => 1,
            MessageKind::Off => -1,
        })
        .sum();

    if open <= 0 {
        return records;
    }

    let mut excess = open as usize;
    let mut kept: Vec<Record> = records
        .into_iter()
        .rev()
        .filter(|r| {
            if excess > 0 && r.msg.kind == MessageKind::On {
                debug!(
                    "Dropping dangling On for {} at beat {:.3}..!",
                    r.msg.pitch, r.msg.beat
                );
                excess -= 1;
                return false;
            }
            true
        })
        .collect();

    kept.reverse();
    kept
}
