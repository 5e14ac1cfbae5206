//! Filter program synthesizer.

mod program;

pub use program::{
    adjustments, pitch_ratio, synthesize, synthesize_with, Adjustments, FilterProgram, FilterStep,
    PitchQuality,
};
