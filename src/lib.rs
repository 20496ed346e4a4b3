//! ostinato: a terminal audio player.
//!
//! Tracks are decoded by an external `ffmpeg` process into raw PCM and
//! streamed through a pipe into a rodio sink.

pub mod app;
pub mod audio;
pub mod config;
pub mod library;
pub mod runtime;
pub mod ui;
