use crate::error::{CodecError, Result};
use crate::model::delta::{DeltaEvent, DeltaKind, TrackMeta};
use crate::model::note::{Note, NoteStream};
use anyhow::anyhow;
use log::{debug, warn};
use midly::{MetaMessage, MidiMessage, Smf, Timing, Track, TrackEventKind};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

struct NoteInterval {
    pub pitch: u8,
    pub start_tick: u64,
    pub end_tick: u64,
    pub velocity: u8,
}

pub fn import_midi_file<P: AsRef<Path>>(path: P) -> anyhow::Result<NoteStream> {
    let bytes = fs::read(path.as_ref()).map_err(|e| {
        anyhow!(
            "Failed to read MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;

    midi_bytes_to_stream(&bytes)
}

/// Parses a Standard MIDI File into one note stream, pairing notes within each track.
pub fn midi_bytes_to_stream(bytes: &[u8]) -> anyhow::Result<NoteStream> {
    let smf = Smf::parse(bytes).map_err(|e| anyhow!("Failed to parse MIDI: {:?}", e))?;

    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(t) => t.as_int(),
        Timing::Timecode(_fps, _subframe) => {
            return Err(anyhow!(
                "SMPTE timecode midi timing is not currently supported..!"
            ));
        }
    };

    debug!("Ticks per quarter note: {}", ticks_per_beat);
    debug!(
        "MIDI format: {:?}, tracks: {}",
        smf.header.format,
        smf.tracks.len()
    );

    let tracks: Vec<Vec<DeltaEvent>> = smf.tracks.iter().map(delta_events_from_track).collect();
    let slices: Vec<&[DeltaEvent]> = tracks.iter().map(Vec::as_slice).collect();

    let stream = parse_tracks(&slices, ticks_per_beat)?;
    debug!(
        "Imported {} notes spanning {:.2} beats..!",
        stream.len(),
        stream.end_beat()
    );

    Ok(stream)
}

/// Keeps the records a [`DeltaEvent`] can express. Anything else (program
/// changes, controllers, text) is skipped and its delta is carried into the
/// next kept record, so absolute times are preserved.
pub fn delta_events_from_track(track: &Track) -> Vec<DeltaEvent> {
    let mut events = Vec::with_capacity(track.len());
    let mut carried: u32 = 0;

    for event in track.iter() {
        carried = carried.saturating_add(event.delta.as_int());

        let kind = match &event.kind {
            TrackEventKind::Midi { message, .. } => match message {
                MidiMessage::NoteOn { key, vel } => Some(DeltaKind::NoteOn {
                    pitch: key.as_int(),
                    velocity: vel.as_int(),
                }),
                MidiMessage::NoteOff { key, vel } => Some(DeltaKind::NoteOff {
                    pitch: key.as_int(),
                    velocity: vel.as_int(),
                }),
                _ => None,
            },
            TrackEventKind::Meta(meta) => match meta {
                MetaMessage::Tempo(micro) => Some(DeltaKind::Meta(TrackMeta::Tempo(micro.as_int()))),
                MetaMessage::TimeSignature(numerator, denominator_pow, clocks, notated) => {
                    Some(DeltaKind::Meta(TrackMeta::TimeSignature {
                        numerator: *numerator,
                        denominator_pow: *denominator_pow,
                        clocks_per_click: *clocks,
                        notated_32nds_per_beat: *notated,
                    }))
                }
                MetaMessage::KeySignature(sharps, minor) => {
                    Some(DeltaKind::Meta(TrackMeta::KeySignature {
                        sharps: *sharps,
                        minor: *minor,
                    }))
                }
                MetaMessage::EndOfTrack => Some(DeltaKind::Meta(TrackMeta::EndOfTrack)),
                _ => None,
            },
            _ => None,
        };

        if let Some(kind) = kind {
            events.push(DeltaEvent {
                kind,
                delta_ticks: carried,
            });
            carried = 0;
        }
    }

    events
}

/// Inverse of serialization: accumulates deltas (meta records included) into
/// absolute ticks and pairs each On with the next Off of the same pitch. A
/// NoteOn with velocity 0 counts as an Off.
pub fn parse_delta_events(events: &[DeltaEvent], ticks_per_beat: u16) -> Result<NoteStream> {
    parse_tracks(&[events], ticks_per_beat)
}

fn parse_tracks(tracks: &[&[DeltaEvent]], ticks_per_beat: u16) -> Result<NoteStream> {
    if ticks_per_beat == 0 {
        return Err(CodecError::InvalidConfig(
            "ticks_per_beat must be non-zero".into(),
        ));
    }
    let ticks_per_beat = ticks_per_beat as u64;

    let mut intervals: Vec<NoteInterval> = Vec::new();
    let mut unclosed: Vec<(u8, u64, u8)> = Vec::new();
    let mut last_tick: u64 = 0;

    for (track_idx, events) in tracks.iter().enumerate() {
        let mut abs_tick: u64 = 0;
        let mut open_notes: HashMap<u8, VecDeque<(u64, u8)>> = HashMap::new();

        for event in events.iter() {
            abs_tick = abs_tick.saturating_add(event.delta_ticks as u64);

            match event.kind {
                DeltaKind::NoteOn { pitch, velocity } if velocity > 0 => {
                    open_notes
                        .entry(pitch)
                        .or_default()
                        .push_back((abs_tick, velocity));
                }
                DeltaKind::NoteOn { pitch, .. } | DeltaKind::NoteOff { pitch, .. } => {
                    close_note(&mut open_notes, &mut intervals, pitch, abs_tick);
                }
                DeltaKind::Meta(TrackMeta::Tempo(micro)) => {
                    debug!(
                        "Tempo change at tick {} -> {} us/qn (track {})",
                        abs_tick, micro, track_idx
                    );
                }
                DeltaKind::Meta(_) => {}
            }
        }

        last_tick = last_tick.max(abs_tick);
        for (pitch, queue) in open_notes.into_iter() {
            unclosed.extend(queue.into_iter().map(|(tick, vel)| (pitch, tick, vel)));
        }
    }

    for (pitch, start_tick, velocity) in unclosed.into_iter() {
        let end_tick = if last_tick > start_tick {
            last_tick
        } else {
            start_tick + ticks_per_beat
        };

        warn!(
            "Unclosed NoteOn for {} at tick: {} auto-closing at: {}..!",
            pitch, start_tick, end_tick
        );

        intervals.push(NoteInterval {
            pitch,
            start_tick,
            end_tick,
            velocity,
        });
    }

    let notes = intervals
        .into_iter()
        .filter(|interval| {
            if interval.end_tick <= interval.start_tick {
                debug!(
                    "Skipping zero-length midi note {} at tick {}..!",
                    interval.pitch, interval.start_tick
                );
                return false;
            }
            true
        })
        .map(|interval| {
            Note::new(
                interval.pitch,
                interval.start_tick as f64 / ticks_per_beat as f64,
                interval.end_tick as f64 / ticks_per_beat as f64,
                interval.velocity,
            )
        })
        .collect();

    NoteStream::from_notes(notes)
}

fn close_note(
    open_notes: &mut HashMap<u8, VecDeque<(u64, u8)>>,
    intervals: &mut Vec<NoteInterval>,
    pitch: u8,
    abs_tick: u64,
) {
    match open_notes.get_mut(&pitch).and_then(|queue| queue.pop_front()) {
        Some((start_tick, velocity)) => intervals.push(NoteInterval {
            pitch,
            start_tick,
            end_tick: abs_tick,
            velocity,
        }),
        None => debug!("Orphaned NoteOff for {} at tick {}..!", pitch, abs_tick),
    }
}
