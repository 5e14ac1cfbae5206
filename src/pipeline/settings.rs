//! Per-request processing settings and the built-in presets.

use serde::{Deserialize, Serialize};

use super::ProcessingError;

/// User or preset controlled knobs, fixed for the duration of a request.
///
/// The intensity knobs and the advanced/f0-condition flags are validated
/// and echoed back but do not change the filter program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingSettings {
    pub diffusion_steps: u32,
    /// Inverse of playback speed, in [0.5, 2.0].
    pub length_adjust: f64,
    #[serde(alias = "intelligebilityCfgRate")]
    pub intelligibility_cfg_rate: f64,
    pub similarity_cfg_rate: f64,
    pub top_p: f64,
    pub temperature: f64,
    pub repetition_penalty: f64,
    pub convert_style: bool,
    pub anonymization_only: bool,
    pub inference_cfg_rate: f64,
    pub f0_condition: bool,
    /// Apply the profile's pitch recommendation on top of `pitch_shift`.
    pub auto_f0_adjust: bool,
    /// User pitch offset in semitones, in [-12, 12].
    pub pitch_shift: i32,
    pub use_advanced_mode: bool,
    /// Derive the full artifact from the stream one instead of re-rendering.
    #[serde(alias = "optimizeForCPU")]
    pub optimize_for_cpu: bool,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            diffusion_steps: 15,
            length_adjust: 1.0,
            intelligibility_cfg_rate: 0.0,
            similarity_cfg_rate: 0.7,
            top_p: 0.8,
            temperature: 1.0,
            repetition_penalty: 1.0,
            convert_style: false,
            anonymization_only: false,
            inference_cfg_rate: 0.7,
            f0_condition: false,
            auto_f0_adjust: true,
            pitch_shift: 0,
            use_advanced_mode: false,
            optimize_for_cpu: true,
        }
    }
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<(), ProcessingError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ProcessingError::Validation(format!(
            "{} must be between {} and {}",
            name, min, max
        )))
    }
}

impl ProcessingSettings {
    pub fn validate(&self) -> Result<(), ProcessingError> {
        if !(1..=100).contains(&self.diffusion_steps) {
            return Err(ProcessingError::Validation(
                "diffusionSteps must be between 1 and 100".to_string(),
            ));
        }
        check_range("lengthAdjust", self.length_adjust, 0.5, 2.0)?;
        check_range("intelligibilityCfgRate", self.intelligibility_cfg_rate, 0.0, 1.0)?;
        check_range("similarityCfgRate", self.similarity_cfg_rate, 0.0, 1.0)?;
        check_range("topP", self.top_p, 0.0, 1.0)?;
        check_range("temperature", self.temperature, 0.1, 2.0)?;
        check_range("repetitionPenalty", self.repetition_penalty, 0.5, 2.0)?;
        check_range("inferenceCfgRate", self.inference_cfg_rate, 0.0, 1.0)?;
        check_range("pitchShift", self.pitch_shift as f64, -12.0, 12.0)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsPreset {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub settings: ProcessingSettings,
}

pub fn presets() -> Vec<SettingsPreset> {
    let base = ProcessingSettings::default();
    vec![
        SettingsPreset {
            id: "default",
            name: "Default (CPU)",
            description: "Balanced speed and quality on CPU-only hosts",
            settings: ProcessingSettings {
                diffusion_steps: 10,
                ..base.clone()
            },
        },
        SettingsPreset {
            id: "high-quality",
            name: "High quality",
            description: "Best output, slower processing",
            settings: ProcessingSettings {
                diffusion_steps: 20,
                similarity_cfg_rate: 0.8,
                temperature: 0.9,
                ..base.clone()
            },
        },
        SettingsPreset {
            id: "fast",
            name: "Fast",
            description: "Quickest processing",
            settings: ProcessingSettings {
                diffusion_steps: 5,
                inference_cfg_rate: 0.5,
                ..base.clone()
            },
        },
        SettingsPreset {
            id: "masculine",
            name: "Masculine voice",
            description: "Lower pitch for male voices",
            settings: ProcessingSettings {
                pitch_shift: -2,
                f0_condition: true,
                ..base.clone()
            },
        },
        SettingsPreset {
            id: "feminine",
            name: "Feminine voice",
            description: "Higher pitch for female voices",
            settings: ProcessingSettings {
                pitch_shift: 2,
                f0_condition: true,
                ..base
            },
        },
    ]
}
