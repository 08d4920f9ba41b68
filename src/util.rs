use crate::model::config::{Args, PipelineConfig};
use crate::roll::{NUM_PITCHES, PianoRoll};
use anyhow::{Result, anyhow};
use log::info;
use ndarray::Array2;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file (or defaults) with command-line flags layered on top.
pub fn resolve_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => {
            info!("Loading pipeline config from '{}'...", path.display());
            PipelineConfig::from_json_file(path)?
        }
        None => PipelineConfig::default(),
    };

    if let Some(bars) = args.bars {
        config.bars_per_segment = bars;
    }
    if let Some(steps) = args.steps_per_beat {
        config.steps_per_beat = steps;
    }
    if let Some(tempo) = args.tempo {
        config.tempo_bpm = tempo;
    }

    config.validate()?;
    Ok(config)
}

/// Reads a JSON array of rows, each row holding 128 activations.
pub fn read_grid_json<P: AsRef<Path>>(path: P) -> Result<Array2<f32>> {
    let text = fs::read_to_string(path.as_ref()).map_err(|e| {
        anyhow!(
            "Failed to read grid file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;

    let rows: Vec<Vec<f32>> = serde_json::from_str(&text)?;
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != NUM_PITCHES) {
        return Err(anyhow!(
            "Row {} of {} has {} columns, expected {}..!",
            idx,
            path.as_ref().display(),
            row.len(),
            NUM_PITCHES
        ));
    }

    let steps = rows.len();
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((steps, NUM_PITCHES), flat)?)
}

pub fn write_grid_json<P: AsRef<Path>>(path: P, roll: &PianoRoll) -> Result<()> {
    let text = serde_json::to_string(&roll.rows())?;
    fs::write(path.as_ref(), text).map_err(|e| {
        anyhow!(
            "Failed to write grid file {}: {}",
            path.as_ref().display(),
            e
        )
    })
}

/// `<out>/<stem>_<index>.<extension>`, e.g. `out/phrase_003.mid`.
pub fn segment_path(out: &Path, source: &Path, index: usize, extension: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("segment");
    out.join(format!("{}_{:03}.{}", stem, index, extension))
}
