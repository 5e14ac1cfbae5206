//! Text-to-speech engines, ordered from best to last resort.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::chain::{Candidate, EngineResult, FallbackChain};
use super::wav::silent_wav;
use crate::pipeline::{check_exit, ProcessingError};
use crate::policy::{self, StageTimeouts};
use crate::tools::{CommandSpec, ToolGateway, EDGE_TTS, ESPEAK, FESTIVAL, FFMPEG, SOX};

/// Voices and endpoints used by the speech engines.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsConfig {
    pub edge_voice: String,
    pub espeak_voice: String,
    pub festival_voice: String,
    pub language: String,
    /// `None` disables the translation speech service.
    pub translate_url: Option<String>,
    pub bearer_token: Option<String>,
    pub max_cloud_chars: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            edge_voice: "vi-VN-HoaiMyNeural".to_string(),
            espeak_voice: "vi".to_string(),
            festival_voice: "voice_cmu_us_slt_arctic_hts".to_string(),
            language: "vi".to_string(),
            translate_url: Some("https://translate.google.com/translate_tts".to_string()),
            bearer_token: None,
            max_cloud_chars: policy::TRANSLATE_TTS_MAX_CHARS,
        }
    }
}

/// A single way of turning text into an audio file.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extension of the file the engine writes.
    fn extension(&self) -> &'static str {
        "wav"
    }

    fn timeout(&self) -> Duration;

    async fn synthesize(&self, text: &str, output: &Path) -> Result<(), ProcessingError>;
}

/// Neural cloud voice through the `edge-tts` command line client.
pub struct EdgeTts {
    gateway: Arc<dyn ToolGateway>,
    voice: String,
    timeout: Duration,
}

impl EdgeTts {
    pub fn new(gateway: Arc<dyn ToolGateway>, voice: String, timeout: Duration) -> Self {
        Self {
            gateway,
            voice,
            timeout,
        }
    }
}

#[async_trait]
impl SpeechEngine for EdgeTts {
    fn name(&self) -> &'static str {
        "edge-tts"
    }

    fn extension(&self) -> &'static str {
        "mp3"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn synthesize(&self, text: &str, output: &Path) -> Result<(), ProcessingError> {
        let spec = CommandSpec::new(EDGE_TTS)
            .opt("--voice", self.voice.as_str())
            .flag("--text")
            .text(text)
            .flag("--write-media")
            .output(output);
        let result = self.gateway.invoke(&spec, self.timeout).await?;
        check_exit(EDGE_TTS, &result)
    }
}

/// Translation-site speech endpoint fetched over HTTPS.
pub struct TranslateTts {
    client: reqwest::Client,
    url: String,
    language: String,
    bearer_token: Option<String>,
    max_chars: usize,
    timeout: Duration,
}

impl TranslateTts {
    pub fn new(client: reqwest::Client, config: &TtsConfig, url: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            language: config.language.clone(),
            bearer_token: config.bearer_token.clone(),
            max_chars: config.max_cloud_chars,
            timeout,
        }
    }
}

/// The service only accepts short texts; longer ones are cut on a char
/// boundary.
pub fn cloud_text(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn classify_http_error(err: reqwest::Error) -> ProcessingError {
    const NAME: &str = "translate-tts";
    if err.is_timeout() {
        ProcessingError::ToolTimeout {
            tool: NAME.to_string(),
        }
    } else if err.is_connect() {
        ProcessingError::ToolUnavailable {
            tool: NAME.to_string(),
        }
    } else {
        debug!("{} request error: {}", NAME, err);
        ProcessingError::failure(NAME, "request failed")
    }
}

#[async_trait]
impl SpeechEngine for TranslateTts {
    fn name(&self) -> &'static str {
        "translate-tts"
    }

    fn extension(&self) -> &'static str {
        "mp3"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn synthesize(&self, text: &str, output: &Path) -> Result<(), ProcessingError> {
        let text = cloud_text(text, self.max_chars);
        let mut request = self
            .client
            .get(&self.url)
            .query(&[
                ("ie", "UTF-8"),
                ("q", text.as_str()),
                ("tl", self.language.as_str()),
                ("client", "tw-ob"),
            ])
            .timeout(self.timeout);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProcessingError::failure(
                self.name(),
                format!("HTTP {}", status.as_u16()),
            ));
        }
        let bytes = response.bytes().await.map_err(classify_http_error)?;
        if bytes.is_empty() {
            return Err(ProcessingError::OutputIntegrity(
                "empty speech response".to_string(),
            ));
        }
        tokio::fs::write(output, &bytes)
            .await
            .map_err(|e| ProcessingError::failure(self.name(), e.to_string()))
    }
}

/// Lightweight on-device synthesizer.
pub struct Espeak {
    gateway: Arc<dyn ToolGateway>,
    voice: String,
    timeout: Duration,
}

impl Espeak {
    pub fn new(gateway: Arc<dyn ToolGateway>, voice: String, timeout: Duration) -> Self {
        Self {
            gateway,
            voice,
            timeout,
        }
    }
}

#[async_trait]
impl SpeechEngine for Espeak {
    fn name(&self) -> &'static str {
        "espeak"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn synthesize(&self, text: &str, output: &Path) -> Result<(), ProcessingError> {
        let spec = CommandSpec::new(ESPEAK)
            .opt("-v", self.voice.as_str())
            .opt_num("-s", 150.0)
            .opt_num("-p", 50.0)
            .flag("-w")
            .output(output)
            .text(text);
        let result = self.gateway.invoke(&spec, self.timeout).await?;
        check_exit(ESPEAK, &result)
    }
}

/// Rule-based synthesizer driven by a Scheme script on stdin.
pub struct Festival {
    gateway: Arc<dyn ToolGateway>,
    voice: String,
    timeout: Duration,
}

impl Festival {
    pub fn new(gateway: Arc<dyn ToolGateway>, voice: String, timeout: Duration) -> Self {
        Self {
            gateway,
            voice,
            timeout,
        }
    }
}

fn scheme_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    for c in value.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' | '\r' => escaped.push(' '),
            other => escaped.push(other),
        }
    }
    escaped.push('"');
    escaped
}

/// Script that renders `text` with `voice` into a RIFF file at `output`.
pub fn festival_script(voice: &str, text: &str, output: &Path) -> String {
    let voice: String = voice
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    format!(
        "({})\n(utt.save.wave (utt.synth (Utterance Text {})) {} 'riff)\n(quit)\n",
        voice,
        scheme_string(text),
        scheme_string(&output.to_string_lossy())
    )
}

#[async_trait]
impl SpeechEngine for Festival {
    fn name(&self) -> &'static str {
        "festival"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn synthesize(&self, text: &str, output: &Path) -> Result<(), ProcessingError> {
        let spec = CommandSpec::new(FESTIVAL)
            .flag("--pipe")
            .stdin(festival_script(&self.voice, text, output))
            .writes(output);
        let result = self.gateway.invoke(&spec, self.timeout).await?;
        check_exit(FESTIVAL, &result)
    }
}

/// Audible placeholder: a modulated sine tone as long as the text would take.
pub struct SoxTone {
    gateway: Arc<dyn ToolGateway>,
    timeout: Duration,
}

impl SoxTone {
    pub fn new(gateway: Arc<dyn ToolGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }
}

#[async_trait]
impl SpeechEngine for SoxTone {
    fn name(&self) -> &'static str {
        "tone"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn synthesize(&self, text: &str, output: &Path) -> Result<(), ProcessingError> {
        let seconds = policy::silence_seconds(text.chars().count());
        let spec = CommandSpec::new(SOX)
            .flag("-n")
            .output(output)
            .flag("synth")
            .num(seconds)
            .flag("sine")
            .num(policy::TONE_FREQUENCY_HZ)
            .flag("tremolo")
            .num(5.0)
            .num(30.0)
            .flag("reverb")
            .num(10.0);
        let result = self.gateway.invoke(&spec, self.timeout).await?;
        check_exit(SOX, &result)
    }
}

/// Last resort. Never fails while the output directory is writable.
pub struct Silence {
    gateway: Arc<dyn ToolGateway>,
    timeout: Duration,
}

impl Silence {
    pub fn new(gateway: Arc<dyn ToolGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    async fn generate(&self, seconds: f64, output: &Path) -> Result<(), ProcessingError> {
        let source = format!(
            "anullsrc=r={}:cl=mono",
            policy::SILENCE_SAMPLE_RATE_HZ
        );
        let spec = CommandSpec::new(FFMPEG)
            .flag("-y")
            .opt("-f", "lavfi")
            .opt("-i", source)
            .opt_num("-t", seconds)
            .opt("-acodec", "pcm_s16le")
            .output(output);
        // Half the budget, so the floor below always has time to run.
        let result = self.gateway.invoke(&spec, self.timeout / 2).await?;
        check_exit(FFMPEG, &result)?;
        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(ProcessingError::OutputIntegrity(
                "silence not written".to_string(),
            )),
        }
    }
}

#[async_trait]
impl SpeechEngine for Silence {
    fn name(&self) -> &'static str {
        "silence"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn synthesize(&self, text: &str, output: &Path) -> Result<(), ProcessingError> {
        let seconds = policy::silence_seconds(text.chars().count());
        if let Err(err) = self.generate(seconds, output).await {
            warn!("Silence generation failed ({}), writing minimal WAV", err);
            let bytes = silent_wav(policy::MINIMAL_WAV_SAMPLE_RATE_HZ, policy::MINIMAL_WAV_SECONDS);
            tokio::fs::write(output, bytes)
                .await
                .map_err(|e| ProcessingError::failure(self.name(), e.to_string()))?;
        }
        Ok(())
    }
}

/// The ordered speech engine chain.
pub struct SpeechSynthesizer {
    engines: Vec<Arc<dyn SpeechEngine>>,
}

impl SpeechSynthesizer {
    pub fn new(engines: Vec<Arc<dyn SpeechEngine>>) -> Self {
        Self { engines }
    }

    /// Cloud voice, translation service, espeak, festival, tone, silence.
    pub fn standard(
        gateway: Arc<dyn ToolGateway>,
        client: reqwest::Client,
        config: &TtsConfig,
        timeouts: &StageTimeouts,
    ) -> Self {
        let mut engines: Vec<Arc<dyn SpeechEngine>> = vec![Arc::new(EdgeTts::new(
            gateway.clone(),
            config.edge_voice.clone(),
            timeouts.edge_tts,
        ))];
        if let Some(url) = &config.translate_url {
            engines.push(Arc::new(TranslateTts::new(
                client,
                config,
                url.clone(),
                timeouts.translate_tts,
            )));
        }
        engines.push(Arc::new(Espeak::new(
            gateway.clone(),
            config.espeak_voice.clone(),
            timeouts.espeak,
        )));
        engines.push(Arc::new(Festival::new(
            gateway.clone(),
            config.festival_voice.clone(),
            timeouts.festival,
        )));
        engines.push(Arc::new(SoxTone::new(gateway.clone(), timeouts.tone)));
        engines.push(Arc::new(Silence::new(gateway, timeouts.silence)));
        Self::new(engines)
    }

    pub fn engine_names(&self) -> Vec<&'static str> {
        self.engines.iter().map(|e| e.name()).collect()
    }

    /// Tries every engine in order. `output_for(engine, extension)` picks
    /// where each engine writes.
    pub async fn synthesize<F>(&self, text: &str, output_for: F) -> EngineResult<PathBuf>
    where
        F: Fn(&str, &str) -> PathBuf,
    {
        let mut chain = FallbackChain::new("speech");
        for engine in &self.engines {
            let engine = engine.clone();
            let output = output_for(engine.name(), engine.extension());
            let timeout = engine.timeout();
            chain = chain.then(Candidate::new(engine.name(), timeout, move || async move {
                engine.synthesize(text, &output).await?;
                Ok(output)
            }));
        }
        chain.run().await
    }
}
