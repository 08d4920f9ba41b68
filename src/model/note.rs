use crate::error::{CodecError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Every segment is assumed to be in 4/4.
pub const BEATS_PER_BAR: u32 = 4;
pub const MAX_MIDI_VALUE: u8 = 127;

/// Zero-based bar index containing `beat`.
pub fn bar_of(beat: f64) -> usize {
    (beat / BEATS_PER_BAR as f64).floor().max(0.0) as usize
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub pitch: u8,
    pub start_beat: f64,
    pub end_beat: f64,
    pub velocity: u8,
}

impl Note {
    /// Pitch and velocity are clamped to the MIDI range.
    pub fn new(pitch: u8, start_beat: f64, end_beat: f64, velocity: u8) -> Self {
        Self {
            pitch: pitch.min(MAX_MIDI_VALUE),
            start_beat,
            end_beat,
            velocity: velocity.min(MAX_MIDI_VALUE),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_beat - self.start_beat
    }

    pub fn bar(&self) -> usize {
        bar_of(self.start_beat)
    }

    pub fn shifted(&self, offset_beats: f64) -> Self {
        Self {
            start_beat: self.start_beat + offset_beats,
            end_beat: self.end_beat + offset_beats,
            ..*self
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.start_beat.is_finite() || !self.end_beat.is_finite() {
            return Err(CodecError::MalformedStream(format!(
                "note {} has a non-finite time ({} -> {})",
                self.pitch, self.start_beat, self.end_beat
            )));
        }
        if self.start_beat < 0.0 {
            return Err(CodecError::MalformedStream(format!(
                "note {} starts before the stream at beat {}",
                self.pitch, self.start_beat
            )));
        }
        if self.end_beat <= self.start_beat {
            return Err(CodecError::MalformedStream(format!(
                "note {} ends at beat {} but starts at beat {}",
                self.pitch, self.end_beat, self.start_beat
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    On,
    Off,
}

/// One half of a note: the onset or offset record, at an absolute beat.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct NoteMessage {
    pub kind: MessageKind,
    pub pitch: u8,
    pub beat: f64,
    pub velocity: u8,
}

impl NoteMessage {
    pub fn on(pitch: u8, beat: f64, velocity: u8) -> Self {
        Self {
            kind: MessageKind::On,
            pitch,
            beat,
            velocity,
        }
    }

    pub fn off(pitch: u8, beat: f64) -> Self {
        Self {
            kind: MessageKind::Off,
            pitch,
            beat,
            velocity: 0,
        }
    }
}

/// Notes ordered by start beat. Chords are simply notes sharing a start.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NoteStream {
    notes: Vec<Note>,
}

impl NoteStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates every note and sorts (stably) by start beat.
    pub fn from_notes(mut notes: Vec<Note>) -> Result<Self> {
        for note in notes.iter() {
            note.validate()?;
        }
        notes.sort_by(|a, b| a.start_beat.total_cmp(&b.start_beat));
        Ok(Self { notes })
    }

    /// Caller guarantees the notes are valid and already in output order.
    pub(crate) fn from_ordered(notes: Vec<Note>) -> Self {
        Self { notes }
    }

    /// Appends a note of `length_in_beats`, keeping start order.
    pub fn add_note(
        &mut self,
        pitch: u8,
        start_beat: f64,
        length_in_beats: f64,
        velocity: u8,
    ) -> Result<()> {
        let note = Note::new(pitch, start_beat, start_beat + length_in_beats, velocity);
        note.validate()?;

        let at = self.notes.partition_point(|n| n.start_beat <= start_beat);
        self.notes.insert(at, note);
        Ok(())
    }

    /// Appends one note per pitch, all sharing the same start and length.
    pub fn add_chord(
        &mut self,
        pitches: &[u8],
        start_beat: f64,
        length_in_beats: f64,
        velocity: u8,
    ) -> Result<()> {
        for &pitch in pitches {
            self.add_note(pitch, start_beat, length_in_beats, velocity)?;
        }
        Ok(())
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn into_notes(self) -> Vec<Note> {
        self.notes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Note> {
        self.notes.iter()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn max_start(&self) -> Option<f64> {
        self.notes.iter().map(|n| n.start_beat).max_by(f64::total_cmp)
    }

    pub fn end_beat(&self) -> f64 {
        self.notes
            .iter()
            .map(|n| n.end_beat)
            .max_by(f64::total_cmp)
            .unwrap_or(0.0)
    }

    pub fn max_bar(&self) -> Option<usize> {
        self.notes.iter().map(Note::bar).max()
    }

    /// Smallest positive gap between distinct start beats, i.e. the note-length
    /// quantum of the generator that produced the stream.
    pub fn note_unit(&self) -> Option<f64> {
        let mut starts: Vec<f64> = self.notes.iter().map(|n| n.start_beat).collect();
        starts.sort_by(f64::total_cmp);
        starts.dedup();

        starts
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|gap| *gap > 0.0)
            .min_by(f64::total_cmp)
    }

    /// Expands every note into its On record followed by its Off record, in stream order.
    pub fn to_messages(&self) -> Vec<NoteMessage> {
        self.notes
            .iter()
            .flat_map(|n| {
                [
                    NoteMessage::on(n.pitch, n.start_beat, n.velocity),
                    NoteMessage::off(n.pitch, n.end_beat),
                ]
            })
            .collect()
    }

    /// Rebuilds notes from time-ordered records, pairing each On with the next
    /// Off of the same pitch. Orphaned Offs and unclosed Ons are dropped.
    pub fn from_messages(messages: &[NoteMessage]) -> Self {
        let mut slots: Vec<Option<Note>> = Vec::new();
        let mut open: HashMap<u8, VecDeque<usize>> = HashMap::new();

        for msg in messages.iter() {
            match msg.kind {
                MessageKind::On => {
                    open.entry(msg.pitch).or_default().push_back(slots.len());
                    slots.push(Some(Note::new(msg.pitch, msg.beat, msg.beat, msg.velocity)));
                }
                MessageKind::Off => {
                    let Some(idx) = open.get_mut(&msg.pitch).and_then(|q| q.pop_front()) else {
                        debug!("Orphaned Off for {} at beat {:.3}..!", msg.pitch, msg.beat);
                        continue;
                    };
                    if let Some(note) = slots[idx].as_mut() {
                        note.end_beat = msg.beat;
                    }
                }
            }
        }

        for (pitch, queue) in open.iter() {
            for &idx in queue.iter() {
                if let Some(note) = slots[idx].take() {
                    warn!(
                        "Dropping unclosed On for {} at beat {:.3}..!",
                        pitch, note.start_beat
                    );
                }
            }
        }

        let mut notes: Vec<Note> = slots
            .into_iter()
            .flatten()
            .filter(|n| {
                if n.end_beat <= n.start_beat {
                    debug!(
                        "Skipping zero/negative length note {} at beat {:.3}..!",
                        n.pitch, n.start_beat
                    );
                    return false;
                }
                true
            })
            .collect();

        notes.sort_by(|a, b| a.start_beat.total_cmp(&b.start_beat));
        Self { notes }
    }

    /// Moves every note by `semitones`, dropping notes that leave the MIDI range.
    pub fn transposed(&self, semitones: i32) -> Self {
        let notes = self
            .notes
            .iter()
            .filter_map(|n| {
                let pitch = n.pitch as i32 + semitones;
                if !(0..=MAX_MIDI_VALUE as i32).contains(&pitch) {
                    warn!("Dropping out-of-range MIDI {} after transpose..!", pitch);
                    return None;
                }
                Some(Note {
                    pitch: pitch as u8,
                    ..*n
                })
            })
            .collect();

        Self { notes }
    }
}

impl<'a> IntoIterator for &'a NoteStream {
    type Item = &'a Note;
    type IntoIter = std::slice::Iter<'a, Note>;

    fn into_iter(self) -> Self::IntoIter {
        self.notes.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scale(len: f64) -> NoteStream {
        let mut stream = NoteStream::new();
        for (i, pitch) in [60u8, 62, 64, 65, 67, 69, 71, 72].iter().enumerate() {
            stream.add_note(*pitch, i as f64 * len, len, 64).unwrap();
        }
        stream
    }

    #[test]
    fn rejects_inverted_notes() {
        let result = NoteStream::from_notes(vec![Note::new(60, 2.0, 1.0, 64)]);
        assert!(matches!(result, Err(CodecError::MalformedStream(_))));

        let result = NoteStream::from_notes(vec![Note::new(60, 1.0, 1.0, 64)]);
        assert!(matches!(result, Err(CodecError::MalformedStream(_))));
    }

    #[test]
    fn clamps_pitch_and_velocity() {
        let note = Note::new(200, 0.0, 1.0, 255);
        assert_eq!(note.pitch, 127);
        assert_eq!(note.velocity, 127);
    }

    #[test]
    fn sorts_by_start() {
        let stream = NoteStream::from_notes(vec![
            Note::new(64, 2.0, 3.0, 64),
            Note::new(60, 0.0, 1.0, 64),
            Note::new(67, 0.0, 1.0, 64),
        ])
        .unwrap();

        let starts: Vec<(u8, f64)> = stream.iter().map(|n| (n.pitch, n.start_beat)).collect();
        assert_eq!(starts, vec![(60, 0.0), (67, 0.0), (64, 2.0)]);
    }

    #[test]
    fn unit_and_bars() {
        let stream = scale(0.5);
        assert_eq!(stream.note_unit(), Some(0.5));
        assert_eq!(stream.max_bar(), Some(0));
        assert_eq!(stream.max_start(), Some(3.5));
        assert_eq!(stream.end_beat(), 4.0);

        let mut chord = NoteStream::new();
        chord.add_chord(&[60, 64, 67], 0.0, 4.0, 64).unwrap();
        assert_eq!(chord.len(), 3);
        assert_eq!(chord.note_unit(), None);
    }

    #[test]
    fn messages_pair_fifo_per_pitch() {
        let messages = vec![
            NoteMessage::on(60, 0.0, 64),
            NoteMessage::on(60, 1.0, 80),
            NoteMessage::off(60, 2.0),
            NoteMessage::off(62, 2.5),
            NoteMessage::off(60, 3.0),
            NoteMessage::on(64, 3.0, 64),
        ];

        let stream = NoteStream::from_messages(&messages);
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.notes()[0], Note::new(60, 0.0, 2.0, 64));
        assert_eq!(stream.notes()[1], Note::new(60, 1.0, 3.0, 80));
    }

    #[test]
    fn messages_round_trip() {
        let stream = scale(1.0);
        let mut messages = stream.to_messages();
        assert_eq!(messages.len(), 16);
        assert_eq!(messages[0].kind, MessageKind::On);
        assert_eq!(messages[1].kind, MessageKind::Off);
        assert_eq!(messages[1].velocity, 0);

        messages.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        assert_eq!(NoteStream::from_messages(&messages), stream);
    }

    #[test]
    fn transpose_drops_out_of_range() {
        let stream = NoteStream::from_notes(vec![
            Note::new(60, 0.0, 1.0, 64),
            Note::new(120, 1.0, 2.0, 64),
        ])
        .unwrap();

        let up = stream.transposed(12);
        assert_eq!(up.len(), 1);
        assert_eq!(up.notes()[0].pitch, 72);
    }
}
