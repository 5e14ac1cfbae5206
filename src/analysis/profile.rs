//! Voice profile classification and correction recommendations.

use serde::Serialize;

use super::features::{AudioInfo, RawFeatures};
use crate::policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceType {
    Bass,
    Baritone,
    Tenor,
    Alto,
    Soprano,
}

impl VoiceType {
    pub fn from_pitch(pitch_hz: f64) -> Self {
        if pitch_hz < policy::BASS_MAX_HZ {
            Self::Bass
        } else if pitch_hz < policy::BARITONE_MAX_HZ {
            Self::Baritone
        } else if pitch_hz < policy::TENOR_MAX_HZ {
            Self::Tenor
        } else if pitch_hz < policy::ALTO_MAX_HZ {
            Self::Alto
        } else {
            Self::Soprano
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedPreference {
    Slow,
    Normal,
    Fast,
}

impl SpeedPreference {
    pub fn from_tempo(tempo_ratio: f64) -> Self {
        if tempo_ratio < policy::SLOW_TEMPO_MAX {
            Self::Slow
        } else if tempo_ratio < policy::NORMAL_TEMPO_MAX {
            Self::Normal
        } else {
            Self::Fast
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyLevel {
    Quiet,
    Normal,
    Loud,
}

impl EnergyLevel {
    pub fn from_energy(energy: f64) -> Self {
        if energy < policy::QUIET_ENERGY_MAX {
            Self::Quiet
        } else if energy < policy::NORMAL_ENERGY_MAX {
            Self::Normal
        } else {
            Self::Loud
        }
    }
}

/// Corrections that steer a voice towards the neutral reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    /// In [-12, 12].
    pub pitch_shift_semitones: f64,
    /// In [0.5, 2.0].
    pub tempo_adjust: f64,
    /// In [0.1, 3.0].
    pub energy_boost: f64,
}

impl Recommendations {
    pub fn neutral() -> Self {
        Self {
            pitch_shift_semitones: 0.0,
            tempo_adjust: 1.0,
            energy_boost: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceProfile {
    pub pitch_hz: f64,
    pub tempo_ratio: f64,
    pub energy: f64,
    pub voice_type: VoiceType,
    pub speed_preference: SpeedPreference,
    pub energy_level: EnergyLevel,
    pub quality: AudioInfo,
    pub recommendations: Recommendations,
}

impl VoiceProfile {
    /// Profile of the reference voice itself, used when analysis is skipped
    /// or unusable.
    pub fn neutral() -> Self {
        classify(
            &AudioInfo::default(),
            &RawFeatures {
                pitch_hz: policy::TARGET_PITCH_HZ,
                tempo_ratio: policy::TARGET_TEMPO_RATIO,
                energy: policy::TARGET_ENERGY,
            },
        )
    }
}

fn positive_or(value: f64, default: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        default
    }
}

/// `clamp(12 * log2(target / pitch), -12, 12)`
pub fn pitch_shift_towards_target(pitch_hz: f64) -> f64 {
    (12.0 * (policy::TARGET_PITCH_HZ / pitch_hz).log2()).clamp(
        -policy::PITCH_SHIFT_LIMIT_SEMITONES,
        policy::PITCH_SHIFT_LIMIT_SEMITONES,
    )
}

/// Pure mapping from measured features to a classified profile.
pub fn classify(info: &AudioInfo, features: &RawFeatures) -> VoiceProfile {
    let pitch_hz = positive_or(features.pitch_hz, policy::DEFAULT_PITCH_HZ);
    let tempo_ratio = positive_or(features.tempo_ratio, policy::DEFAULT_TEMPO_RATIO);
    let energy = positive_or(features.energy, policy::DEFAULT_ENERGY);

    let recommendations = Recommendations {
        pitch_shift_semitones: pitch_shift_towards_target(pitch_hz),
        tempo_adjust: (policy::TARGET_TEMPO_RATIO / tempo_ratio)
            .clamp(policy::TEMPO_ADJUST_MIN, policy::TEMPO_ADJUST_MAX),
        energy_boost: (policy::TARGET_ENERGY / energy)
            .clamp(policy::ENERGY_BOOST_MIN, policy::ENERGY_BOOST_MAX),
    };

    VoiceProfile {
        pitch_hz,
        tempo_ratio,
        energy,
        voice_type: VoiceType::from_pitch(pitch_hz),
        speed_preference: SpeedPreference::from_tempo(tempo_ratio),
        energy_level: EnergyLevel::from_energy(energy),
        quality: info.clone(),
        recommendations,
    }
}
