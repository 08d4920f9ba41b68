use crate::error::{CodecError, Result};
use crate::model::config::PipelineConfig;
use crate::model::note::{BEATS_PER_BAR, NoteStream};
use crate::roll::PianoRoll;
use log::debug;

/// Encodes one segment with the configured resolution and segment length.
pub fn encode(stream: &NoteStream, config: &PipelineConfig) -> Result<PianoRoll> {
    config.validate()?;
    encode_with(stream, config.steps_per_beat, config.bars_per_segment)
}

/// Sets `[floor(start*spb), floor(end*spb))` for every note. Material shorter than
/// the grid leaves the tail silent, material longer than it is an error.
pub fn encode_with(
    stream: &NoteStream,
    steps_per_beat: usize,
    bars: usize,
) -> Result<PianoRoll> {
    let limit = bars * BEATS_PER_BAR as usize * steps_per_beat;
    let mut roll = PianoRoll::zeros(limit);

    for note in stream.iter() {
        let start_step = (note.start_beat * steps_per_beat as f64).floor() as usize;
        let end_step = (note.end_beat * steps_per_beat as f64).floor() as usize;

        if end_step > limit {
            return Err(CodecError::ShapeMismatch {
                pitch: note.pitch,
                steps: end_step,
                limit,
            });
        }
        if start_step < end_step {
            roll.fill(note.pitch as usize, start_step..end_step);
        }
    }

    debug!(
        "Encoded {} notes into {} steps ({} active cells)..!",
        stream.len(),
        limit,
        roll.active_cells()
    );

    Ok(roll)
}
