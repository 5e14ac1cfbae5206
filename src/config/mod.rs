mod file_config;

pub use file_config::{FileConfig, LimitsConfig, PolicyConfig, ToolsConfig, TtsFileConfig};

use crate::engines::TtsConfig;
use crate::filter::PitchQuality;
use crate::pipeline::PipelineOptions;
use crate::policy::{self, StageTimeouts};
use crate::server::RequestsLoggingLevel;
use crate::tools::{EDGE_TTS, ESPEAK, FESTIVAL, FFMPEG, FFPROBE, SOX};
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub public_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub content_cache_age_sec: usize,
    pub frontend_dir_path: Option<String>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub max_concurrent_jobs: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitsSettings {
    pub max_upload_bytes: u64,
    pub max_text_chars: usize,
    pub max_concurrent_jobs: usize,
    pub request_timeout: Duration,
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: policy::MAX_UPLOAD_BYTES,
            max_text_chars: policy::MAX_TEXT_CHARS,
            max_concurrent_jobs: 1,
            request_timeout: StageTimeouts::default().request,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub public_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub content_cache_age_sec: usize,
    pub frontend_dir_path: Option<String>,

    /// Logical tool name to binary path.
    pub tool_paths: HashMap<String, PathBuf>,
    pub tts: TtsConfig,
    pub limits: LimitsSettings,
    pub pitch_quality: PitchQuality,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let public_dir = file
            .public_dir
            .map(PathBuf::from)
            .or_else(|| cli.public_dir.clone())
            .unwrap_or_else(|| PathBuf::from("public"));
        if public_dir.exists() && !public_dir.is_dir() {
            bail!("public_dir is not a directory: {:?}", public_dir);
        }
        std::fs::create_dir_all(&public_dir)
            .with_context(|| format!("Failed to create public dir {:?}", public_dir))?;

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let content_cache_age_sec = file
            .content_cache_age_sec
            .unwrap_or(cli.content_cache_age_sec);
        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        let tools = file.tools.unwrap_or_default();
        let tool_paths = resolve_tool_paths(cli, &tools);
        let tts = resolve_tts(file.tts.unwrap_or_default());

        let limits_file = file.limits.unwrap_or_default();
        let defaults = LimitsSettings::default();
        let limits = LimitsSettings {
            max_upload_bytes: limits_file
                .max_upload_bytes
                .unwrap_or(defaults.max_upload_bytes),
            max_text_chars: limits_file
                .max_text_chars
                .unwrap_or(defaults.max_text_chars),
            max_concurrent_jobs: limits_file
                .max_concurrent_jobs
                .or(cli.max_concurrent_jobs)
                .unwrap_or(defaults.max_concurrent_jobs),
            request_timeout: limits_file
                .request_timeout_sec
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        };
        if limits.max_concurrent_jobs == 0 {
            bail!("max_concurrent_jobs must be at least 1");
        }
        if limits.max_text_chars == 0 || limits.max_upload_bytes == 0 {
            bail!("max_text_chars and max_upload_bytes must be positive");
        }

        let pitch_quality = file
            .policy
            .and_then(|p| p.pitch_quality)
            .unwrap_or_default();

        Ok(Self {
            public_dir,
            port,
            metrics_port,
            logging_level,
            content_cache_age_sec,
            frontend_dir_path,
            tool_paths,
            tts,
            limits,
            pitch_quality,
        })
    }

    pub fn timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            request: self.limits.request_timeout,
            ..Default::default()
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            pitch_quality: self.pitch_quality,
            max_text_chars: self.limits.max_text_chars,
            max_concurrent_jobs: self.limits.max_concurrent_jobs,
            request_timeout: self.limits.request_timeout,
        }
    }
}

fn resolve_tool_paths(cli: &CliConfig, tools: &ToolsConfig) -> HashMap<String, PathBuf> {
    let entries = [
        (FFMPEG, tools.ffmpeg.clone().map(PathBuf::from).or_else(|| cli.ffmpeg_path.clone())),
        (FFPROBE, tools.ffprobe.clone().map(PathBuf::from).or_else(|| cli.ffprobe_path.clone())),
        (EDGE_TTS, tools.edge_tts.clone().map(PathBuf::from)),
        (ESPEAK, tools.espeak.clone().map(PathBuf::from)),
        (FESTIVAL, tools.festival.clone().map(PathBuf::from)),
        (SOX, tools.sox.clone().map(PathBuf::from)),
    ];
    entries
        .into_iter()
        .map(|(name, path)| (name.to_string(), path.unwrap_or_else(|| PathBuf::from(name))))
        .collect()
}

fn resolve_tts(file: TtsFileConfig) -> TtsConfig {
    let defaults = TtsConfig::default();
    let translate_url = if file.translate_enabled == Some(false) {
        None
    } else {
        file.translate_url.or(defaults.translate_url)
    };
    TtsConfig {
        edge_voice: file.edge_voice.unwrap_or(defaults.edge_voice),
        espeak_voice: file.espeak_voice.unwrap_or(defaults.espeak_voice),
        festival_voice: file.festival_voice.unwrap_or(defaults.festival_voice),
        language: file.language.unwrap_or(defaults.language),
        translate_url,
        bearer_token: file.bearer_token,
        max_cloud_chars: file.max_cloud_chars.unwrap_or(defaults.max_cloud_chars),
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_for(dir: &TempDir) -> CliConfig {
        CliConfig {
            public_dir: Some(dir.path().join("public")),
            port: 3000,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            content_cache_age_sec: 3600,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("BODY"),
            Some(RequestsLoggingLevel::Body)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            ffmpeg_path: Some(PathBuf::from("/usr/local/bin/ffmpeg")),
            max_concurrent_jobs: Some(3),
            ..cli_for(&temp_dir)
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.public_dir, temp_dir.path().join("public"));
        assert!(config.public_dir.is_dir());
        assert_eq!(config.port, 3000);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(
            config.tool_paths[FFMPEG],
            PathBuf::from("/usr/local/bin/ffmpeg")
        );
        assert_eq!(config.tool_paths[ESPEAK], PathBuf::from("espeak"));
        assert_eq!(config.limits.max_concurrent_jobs, 3);
        assert_eq!(config.limits.max_upload_bytes, policy::MAX_UPLOAD_BYTES);
        assert_eq!(config.tts, TtsConfig::default());
        assert_eq!(config.pitch_quality, PitchQuality::Fast);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            ffmpeg_path: Some(PathBuf::from("/cli/ffmpeg")),
            ..cli_for(&temp_dir)
        };
        let file_config = FileConfig {
            port: Some(4000),
            logging_level: Some("body".to_string()),
            tools: Some(ToolsConfig {
                ffmpeg: Some("/toml/ffmpeg".to_string()),
                ..Default::default()
            }),
            tts: Some(TtsFileConfig {
                translate_enabled: Some(false),
                bearer_token: Some("secret".to_string()),
                ..Default::default()
            }),
            limits: Some(LimitsConfig {
                max_text_chars: Some(500),
                request_timeout_sec: Some(60),
                ..Default::default()
            }),
            policy: Some(PolicyConfig {
                pitch_quality: Some(PitchQuality::HighQuality),
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Body);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.tool_paths[FFMPEG], PathBuf::from("/toml/ffmpeg"));
        assert_eq!(config.tts.translate_url, None);
        assert_eq!(config.tts.bearer_token.as_deref(), Some("secret"));
        assert_eq!(config.limits.max_text_chars, 500);
        assert_eq!(config.timeouts().request, Duration::from_secs(60));
        let options = config.pipeline_options();
        assert_eq!(options.pitch_quality, PitchQuality::HighQuality);
        assert_eq!(options.max_text_chars, 500);
    }

    #[test]
    fn test_resolve_rejects_zero_jobs() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            max_concurrent_jobs: Some(0),
            ..cli_for(&temp_dir)
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("max_concurrent_jobs"));
    }

    #[test]
    fn test_resolve_public_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            public_dir: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }
}
