use crate::error::{CodecError, Result};
use crate::model::config::PipelineConfig;
use crate::model::delta::{DeltaEvent, DeltaKind, TrackMeta};
use crate::model::note::{MAX_MIDI_VALUE, MessageKind, NoteMessage, NoteStream};
use anyhow::anyhow;
use log::debug;
use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};
use std::fs;
use std::path::Path;

const MAX_DELTA_TICKS: i64 = 0x0FFF_FFFF;

/// Expands the stream into On/Off records, orders them by time (ties keep
/// stream order) and converts them to delta ticks.
pub fn serialize(stream: &NoteStream, ticks_per_beat: u16) -> Result<Vec<DeltaEvent>> {
    let mut messages = stream.to_messages();
    messages.sort_by(|a, b| a.beat.total_cmp(&b.beat));
    serialize_messages(&messages, ticks_per_beat)
}

/// Converts already time-ordered records to delta ticks. A record earlier than
/// its predecessor is a caller bug and fails the whole call.
pub fn serialize_messages(
    messages: &[NoteMessage],
    ticks_per_beat: u16,
) -> Result<Vec<DeltaEvent>> {
    let mut previous_ticks: i64 = 0;
    let mut events = Vec::with_capacity(messages.len());

    for (index, msg) in messages.iter().enumerate() {
        if !msg.beat.is_finite() {
            return Err(CodecError::MalformedStream(format!(
                "record {} for pitch {} has a non-finite time",
                index, msg.pitch
            )));
        }

        let ticks = (msg.beat * ticks_per_beat as f64).round() as i64;
        let delta = ticks - previous_ticks;
        if delta < 0 {
            return Err(CodecError::NonMonotonicTime {
                index,
                previous_ticks,
                ticks,
            });
        }
        if delta > MAX_DELTA_TICKS {
            return Err(CodecError::Midi(format!(
                "delta of {} ticks at record {} does not fit in a MIDI event",
                delta, index
            )));
        }

        let pitch = msg.pitch.min(MAX_MIDI_VALUE);
        let kind = match msg.kind {
            MessageKind::On => DeltaKind::NoteOn {
                pitch,
                velocity: msg.velocity.min(MAX_MIDI_VALUE),
            },
            MessageKind::Off => DeltaKind::NoteOff { pitch, velocity: 0 },
        };

        events.push(DeltaEvent {
            kind,
            delta_ticks: delta as u32,
        });
        previous_ticks = ticks;
    }

    Ok(events)
}

/// Tempo, 4/4 and C major, all at tick 0.
pub fn track_preamble(config: &PipelineConfig) -> [DeltaEvent; 3] {
    [
        DeltaEvent::meta(TrackMeta::Tempo(config.microseconds_per_beat())),
        DeltaEvent::meta(TrackMeta::TimeSignature {
            numerator: 4,
            denominator_pow: 2,
            clocks_per_click: 24,
            notated_32nds_per_beat: 8,
        }),
        DeltaEvent::meta(TrackMeta::KeySignature {
            sharps: 0,
            minor: false,
        }),
    ]
}

fn to_track_event(event: &DeltaEvent) -> TrackEvent<'static> {
    let kind = match event.kind {
        DeltaKind::NoteOn { pitch, velocity } => TrackEventKind::Midi {
            channel: u4::new(0),
            message: MidiMessage::NoteOn {
                key: u7::new(pitch.min(MAX_MIDI_VALUE)),
                vel: u7::new(velocity.min(MAX_MIDI_VALUE)),
            },
        },
        DeltaKind::NoteOff { pitch, velocity } => TrackEventKind::Midi {
            channel: u4::new(0),
            message: MidiMessage::NoteOff {
                key: u7::new(pitch.min(MAX_MIDI_VALUE)),
                vel: u7::new(velocity.min(MAX_MIDI_VALUE)),
            },
        },
        DeltaKind::Meta(meta) => TrackEventKind::Meta(match meta {
            TrackMeta::Tempo(us) => MetaMessage::Tempo(u24::new(us.min(0x00FF_FFFF))),
            TrackMeta::TimeSignature {
                numerator,
                denominator_pow,
                clocks_per_click,
                notated_32nds_per_beat,
            } => MetaMessage::TimeSignature(
                numerator,
                denominator_pow,
                clocks_per_click,
                notated_32nds_per_beat,
            ),
            TrackMeta::KeySignature { sharps, minor } => MetaMessage::KeySignature(sharps, minor),
            TrackMeta::EndOfTrack => MetaMessage::EndOfTrack,
        }),
    };

    TrackEvent {
        delta: u28::new(event.delta_ticks),
        kind,
    }
}

/// Builds a Standard MIDI File with one track per entry in `tracks`. Each track
/// gets the preamble and an end-of-track marker around its events.
pub fn write_smf(tracks: &[Vec<DeltaEvent>], config: &PipelineConfig) -> Result<Vec<u8>> {
    config.validate()?;

    let format = if tracks.len() > 1 {
        Format::Parallel
    } else {
        Format::SingleTrack
    };

    let mut smf = Smf::new(Header {
        format,
        timing: Timing::Metrical(u15::new(config.ticks_per_beat)),
    });

    for events in tracks.iter() {
        let mut track: Track = track_preamble(config).iter().map(to_track_event).collect();
        track.extend(events.iter().map(to_track_event));
        track.push(to_track_event(&DeltaEvent::meta(TrackMeta::EndOfTrack)));
        smf.tracks.push(track);
    }

    let mut buffer: Vec<u8> = Vec::new();
    smf.write(&mut buffer)
        .map_err(|e| CodecError::Midi(format!("Failed to write MIDI: {}", e)))?;

    debug!(
        "Wrote {} track(s), {} bytes of MIDI..!",
        smf.tracks.len(),
        buffer.len()
    );

    Ok(buffer)
}

/// Serializes one stream into a single-track MIDI file.
pub fn stream_to_midi(stream: &NoteStream, config: &PipelineConfig) -> Result<Vec<u8>> {
    let events = serialize(stream, config.ticks_per_beat)?;
    write_smf(&[events], config)
}

pub fn write_midi_file<P: AsRef<Path>>(
    path: P,
    stream: &NoteStream,
    config: &PipelineConfig,
) -> anyhow::Result<()> {
    let bytes = stream_to_midi(stream, config)?;
    fs::write(path.as_ref(), bytes).map_err(|e| {
        anyhow!(
            "Failed to write MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })
}
