use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::filter::PitchQuality;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub public_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub content_cache_age_sec: Option<usize>,
    pub frontend_dir_path: Option<String>,

    // Sections
    pub tools: Option<ToolsConfig>,
    pub tts: Option<TtsFileConfig>,
    pub limits: Option<LimitsConfig>,
    pub policy: Option<PolicyConfig>,
}

/// Binary locations. Unset tools are looked up on `PATH`.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: Option<String>,
    pub ffprobe: Option<String>,
    pub edge_tts: Option<String>,
    pub espeak: Option<String>,
    pub festival: Option<String>,
    pub sox: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TtsFileConfig {
    pub edge_voice: Option<String>,
    pub espeak_voice: Option<String>,
    pub festival_voice: Option<String>,
    pub language: Option<String>,
    /// Set to false to skip the translation speech service entirely.
    pub translate_enabled: Option<bool>,
    pub translate_url: Option<String>,
    pub bearer_token: Option<String>,
    pub max_cloud_chars: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_upload_bytes: Option<u64>,
    pub max_text_chars: Option<usize>,
    pub max_concurrent_jobs: Option<usize>,
    pub request_timeout_sec: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PolicyConfig {
    /// "fast" or "high_quality"
    pub pitch_quality: Option<PitchQuality>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections() {
        let config: FileConfig = toml::from_str(
            r#"
            port = 3100
            logging_level = "headers"

            [tools]
            ffmpeg = "/opt/ffmpeg/bin/ffmpeg"

            [tts]
            edge_voice = "vi-VN-NamMinhNeural"
            translate_enabled = false

            [limits]
            max_concurrent_jobs = 2

            [policy]
            pitch_quality = "high_quality"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, Some(3100));
        assert_eq!(config.logging_level.as_deref(), Some("headers"));
        assert_eq!(
            config.tools.unwrap().ffmpeg.as_deref(),
            Some("/opt/ffmpeg/bin/ffmpeg")
        );
        let tts = config.tts.unwrap();
        assert_eq!(tts.edge_voice.as_deref(), Some("vi-VN-NamMinhNeural"));
        assert_eq!(tts.translate_enabled, Some(false));
        assert_eq!(config.limits.unwrap().max_concurrent_jobs, Some(2));
        assert_eq!(
            config.policy.unwrap().pitch_quality,
            Some(PitchQuality::HighQuality)
        );
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert!(config.port.is_none());
        assert!(config.tools.is_none());
    }

    #[test]
    fn test_load_reports_path() {
        let err = FileConfig::load(Path::new("/nonexistent/voiceclone.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
