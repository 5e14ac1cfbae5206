//! Reference-voice analysis: feature extraction and profile classification.

pub mod features;
pub mod profile;

pub use features::{AudioInfo, FeatureExtractor, RawFeatures};
pub use profile::{
    classify, EnergyLevel, Recommendations, SpeedPreference, VoiceProfile, VoiceType,
};
