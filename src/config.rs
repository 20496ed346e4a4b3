//! Settings for the decoder, playback timing, library scan, UI and logging.
//!
//! Values are layered from struct defaults, then `config.toml`, then
//! `OSTINATO__*` environment variables.

mod load;
mod schema;

pub use load::default_log_path;
pub use schema::*;

#[cfg(test)]
mod tests;
