//! Engine fallback chain and the speech engines that run through it.

mod chain;
pub mod tts;
pub mod wav;

pub use chain::{Candidate, EngineResult, FallbackChain, VerifyOutput};
pub use tts::{SpeechEngine, SpeechSynthesizer, TtsConfig};
