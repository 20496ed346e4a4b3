//! Track discovery: walks a directory for playable files.

mod model;
mod scan;

pub use model::Track;
pub use scan::{is_audio_file, scan};
