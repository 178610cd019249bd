//! Effects implemented directly in Rust

pub mod distortion;

pub use distortion::DistortionEffect;
