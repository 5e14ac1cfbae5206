//! Filter program synthesis.
//!
//! A [`FilterProgram`] is an ordered list of transforms. The order is fixed:
//! resample, pitch, tempo, gain, band-limit, loudness, register EQ. Steps
//! are only ever omitted, never moved or merged.

use serde::{Deserialize, Serialize};

use crate::analysis::{VoiceProfile, VoiceType};
use crate::pipeline::ProcessingSettings;
use crate::policy;
use crate::tools::format_number;

/// How the pitch-shift step is realised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitchQuality {
    /// Sample-rate trick: cheap, shifts formants along with pitch.
    #[default]
    Fast,
    /// Formant-preserving `rubberband`, used only when CPU optimisation is off.
    HighQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum FilterStep {
    Resample {
        rate_hz: u32,
    },
    PitchShift {
        semitones: f64,
        working_rate_hz: u32,
        quality: PitchQuality,
    },
    TempoScale {
        factor: f64,
    },
    Gain {
        db: f64,
    },
    HighPass {
        cutoff_hz: f64,
    },
    LowPass {
        cutoff_hz: f64,
    },
    LoudnessNormalize {
        integrated_lufs: f64,
        true_peak_db: f64,
        range_lu: f64,
    },
    RegisterEqualize {
        center_hz: f64,
        gain_db: f64,
        width_q: f64,
    },
}

impl FilterStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Resample { .. } => "resample",
            Self::PitchShift { .. } => "pitch_shift",
            Self::TempoScale { .. } => "tempo_scale",
            Self::Gain { .. } => "gain",
            Self::HighPass { .. } => "high_pass",
            Self::LowPass { .. } => "low_pass",
            Self::LoudnessNormalize { .. } => "loudness_normalize",
            Self::RegisterEqualize { .. } => "register_equalize",
        }
    }

    /// The step as one or more comma-joined ffmpeg audio filters.
    pub fn to_ffmpeg(&self) -> String {
        match self {
            Self::Resample { rate_hz } => format!("aresample={}", rate_hz),
            Self::PitchShift {
                semitones,
                working_rate_hz,
                quality,
            } => {
                let ratio = pitch_ratio(*semitones);
                match quality {
                    // asetrate also speeds the audio up by `ratio`; atempo undoes that.
                    PitchQuality::Fast => format!(
                        "asetrate={},aresample={},atempo={}",
                        format_number(*working_rate_hz as f64 * ratio),
                        working_rate_hz,
                        format_number(1.0 / ratio)
                    ),
                    PitchQuality::HighQuality => format!(
                        "rubberband=pitch={}:formant=preserved",
                        format_number(ratio)
                    ),
                }
            }
            Self::TempoScale { factor } => format!("atempo={}", format_number(*factor)),
            Self::Gain { db } => format!("volume={}dB", format_number(*db)),
            Self::HighPass { cutoff_hz } => format!("highpass=f={}", format_number(*cutoff_hz)),
            Self::LowPass { cutoff_hz } => format!("lowpass=f={}", format_number(*cutoff_hz)),
            Self::LoudnessNormalize {
                integrated_lufs,
                true_peak_db,
                range_lu,
            } => format!(
                "loudnorm=I={}:TP={}:LRA={}",
                format_number(*integrated_lufs),
                format_number(*true_peak_db),
                format_number(*range_lu)
            ),
            Self::RegisterEqualize {
                center_hz,
                gain_db,
                width_q,
            } => format!(
                "equalizer=f={}:t=q:w={}:g={}",
                format_number(*center_hz),
                format_number(*width_q),
                format_number(*gain_db)
            ),
        }
    }
}

/// `2^(semitones / 12)`
pub fn pitch_ratio(semitones: f64) -> f64 {
    2f64.powf(semitones / 12.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterProgram {
    steps: Vec<FilterStep>,
}

impl FilterProgram {
    pub fn steps(&self) -> &[FilterStep] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&FilterStep> {
        self.steps.iter().find(|s| s.name() == name)
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.step(name).is_some()
    }

    /// Value for ffmpeg's `-af`.
    pub fn to_filtergraph(&self) -> String {
        self.steps
            .iter()
            .map(|s| s.to_ffmpeg())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Corrections after combining the profile with the user's settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Adjustments {
    pub pitch_shift_semitones: f64,
    pub tempo_factor: f64,
    pub energy_adjust: f64,
}

/// Pitch: recommendation (when auto-adjust is on) plus the user's offset.
/// Tempo: recommendation scaled by `length_adjust`. Energy: recommendation.
pub fn adjustments(profile: &VoiceProfile, settings: &ProcessingSettings) -> Adjustments {
    let recommended = profile.recommendations;
    let auto_pitch = if settings.auto_f0_adjust {
        recommended.pitch_shift_semitones
    } else {
        0.0
    };
    Adjustments {
        pitch_shift_semitones: (auto_pitch + settings.pitch_shift as f64).clamp(
            -policy::PITCH_SHIFT_LIMIT_SEMITONES,
            policy::PITCH_SHIFT_LIMIT_SEMITONES,
        ),
        tempo_factor: (recommended.tempo_adjust * settings.length_adjust)
            .clamp(policy::TEMPO_ADJUST_MIN, policy::TEMPO_ADJUST_MAX),
        energy_adjust: recommended.energy_boost,
    }
}

/// Program with the cheap pitch-shift approximation.
pub fn synthesize(profile: &VoiceProfile, settings: &ProcessingSettings) -> FilterProgram {
    synthesize_with(profile, settings, PitchQuality::Fast)
}

/// Deterministic: equal inputs always give equal programs.
pub fn synthesize_with(
    profile: &VoiceProfile,
    settings: &ProcessingSettings,
    quality: PitchQuality,
) -> FilterProgram {
    let adjust = adjustments(profile, settings);
    let rate = policy::WORKING_SAMPLE_RATE_HZ;
    let mut steps = vec![FilterStep::Resample { rate_hz: rate }];

    if adjust.pitch_shift_semitones.abs() > policy::PITCH_SHIFT_THRESHOLD_SEMITONES {
        let quality = if settings.optimize_for_cpu {
            PitchQuality::Fast
        } else {
            quality
        };
        steps.push(FilterStep::PitchShift {
            semitones: adjust.pitch_shift_semitones,
            working_rate_hz: rate,
            quality,
        });
    }

    if (adjust.tempo_factor - 1.0).abs() > policy::TEMPO_THRESHOLD {
        steps.push(FilterStep::TempoScale {
            factor: adjust.tempo_factor,
        });
    }

    if (adjust.energy_adjust - 1.0).abs() > policy::GAIN_THRESHOLD {
        let db = (20.0 * adjust.energy_adjust.log10())
            .clamp(-policy::GAIN_LIMIT_DB, policy::GAIN_LIMIT_DB);
        steps.push(FilterStep::Gain { db });
    }

    steps.push(FilterStep::HighPass {
        cutoff_hz: policy::HIGH_PASS_HZ,
    });
    steps.push(FilterStep::LowPass {
        cutoff_hz: policy::LOW_PASS_HZ,
    });
    steps.push(FilterStep::LoudnessNormalize {
        integrated_lufs: policy::LOUDNESS_TARGET_LUFS,
        true_peak_db: policy::LOUDNESS_TRUE_PEAK_DB,
        range_lu: policy::LOUDNESS_RANGE_LU,
    });

    match profile.voice_type {
        VoiceType::Bass | VoiceType::Baritone => steps.push(FilterStep::RegisterEqualize {
            center_hz: policy::LOW_REGISTER_EQ_HZ,
            gain_db: policy::LOW_REGISTER_EQ_GAIN_DB,
            width_q: policy::REGISTER_EQ_WIDTH_Q,
        }),
        VoiceType::Alto | VoiceType::Soprano => steps.push(FilterStep::RegisterEqualize {
            center_hz: policy::HIGH_REGISTER_EQ_HZ,
            gain_db: policy::HIGH_REGISTER_EQ_GAIN_DB,
            width_q: policy::REGISTER_EQ_WIDTH_Q,
        }),
        VoiceType::Tenor => {}
    }

    FilterProgram { steps }
}
