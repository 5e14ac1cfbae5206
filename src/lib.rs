//! Voice cloning service: text-to-speech through a chain of local and cloud
//! engines, reshaped towards a reference recording with an ffmpeg filter
//! program derived from acoustic analysis.

pub mod analysis;
pub mod config;
pub mod engines;
pub mod filter;
pub mod pipeline;
pub mod policy;
pub mod render;
pub mod server;
pub mod tools;
