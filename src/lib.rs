mod error;
mod midi_exporter;
mod midi_importer;
mod model;
mod roll;
mod segmenter;
mod util;

pub use error::*;
pub use midi_exporter::*;
pub use midi_importer::*;
pub use model::config::*;
pub use model::delta::*;
pub use model::note::*;
pub use roll::decoder::*;
pub use roll::encoder::*;
pub use roll::*;
pub use segmenter::*;
pub use util::*;
