//! Pipeline coordination, per-request settings and the error taxonomy.

mod coordinator;
mod error;
mod settings;

pub use coordinator::{
    CloneResult, Coordinator, PipelineOptions, PipelineOutcome, SpeechOutput, Stage,
    METHOD_RAW_SPEECH, METHOD_UNFILTERED, METHOD_VOICE_TRANSFER,
};
pub use error::{check_exit, ProcessingError};
pub use settings::{presets, ProcessingSettings, SettingsPreset};
