use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use midi_roll::{
    Args, Command, decode_activations, encode, import_midi_file, normalize_lenient,
    read_grid_json, resolve_config, segment_path, write_grid_json, write_midi_file,
};
use std::fs;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = resolve_config(&args)?;

    debug!("Pipeline config: {:?}", config);

    match &args.command {
        Command::Segment { midi, out } | Command::Encode { midi, out } => {
            info!("Importing MIDI file: '{}'...", midi.display());
            let stream = import_midi_file(midi)?.transposed(args.transpose);

            let segments = normalize_lenient(&stream, &config)
                .with_context(|| format!("Failed to normalize '{}'", midi.display()))?;
            if segments.is_empty() {
                warn!("No complete segments in '{}'..!", midi.display());
                return Ok(());
            }

            fs::create_dir_all(out)
                .with_context(|| format!("Failed to create '{}'", out.display()))?;

            let as_rolls = matches!(args.command, Command::Encode { .. });
            for (idx, segment) in segments.iter().enumerate() {
                if as_rolls {
                    let roll = encode(segment, &config)?;
                    let path = segment_path(out, midi, idx, "json");
                    write_grid_json(&path, &roll)?;
                    debug!(
                        "Segment {}: {} notes, {} active cells -> '{}'",
                        idx,
                        segment.len(),
                        roll.active_cells(),
                        path.display()
                    );
                } else {
                    let path = segment_path(out, midi, idx, "mid");
                    write_midi_file(&path, segment, &config)?;
                    debug!("Segment {}: {} notes -> '{}'", idx, segment.len(), path.display());
                }
            }

            info!(
                "Wrote {} segment(s) of {} bars to '{}'..!",
                segments.len(),
                config.bars_per_segment,
                out.display()
            );
        }
        Command::Decode {
            grid,
            out,
            threshold,
        } => {
            info!("Decoding piano roll: '{}'...", grid.display());
            let activations = read_grid_json(grid)?;
            let steps = activations.nrows();

            let stream = decode_activations(activations.view(), *threshold, &config)
                .with_context(|| format!("Failed to decode '{}'", grid.display()))?
                .transposed(args.transpose);

            if steps % config.steps_per_segment() != 0 {
                warn!(
                    "Grid has {} steps, which is not a whole number of {}-step segments..!",
                    steps,
                    config.steps_per_segment()
                );
            }

            write_midi_file(out, &stream, &config)?;
            info!(
                "Decoded {} notes from {} steps into '{}'..!",
                stream.len(),
                steps,
                out.display()
            );
        }
    }

    Ok(())
}
