//! Mixbus Core - real-time mixing and streaming WAVE decode

pub mod audio;
pub mod audio_file;
pub mod config;
pub mod effect;
pub mod engine;
pub mod types;

pub use types::*;
