//! External tool gateway: the single place where child processes are spawned.

mod command;
mod gateway;

#[cfg(test)]
pub mod testing;

pub use command::{format_number, ArgError, CommandSpec};
pub use gateway::{ProcessGateway, ToolError, ToolGateway, ToolOutput};

/// Logical tool names understood by the gateway.
pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";
pub const EDGE_TTS: &str = "edge-tts";
pub const ESPEAK: &str = "espeak";
pub const FESTIVAL: &str = "festival";
pub const SOX: &str = "sox";
