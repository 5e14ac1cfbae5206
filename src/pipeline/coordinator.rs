//! End-to-end request coordination: text plus reference audio in, two
//! rendered artifacts out.
//!
//! Stages run `Start -> SynthesizeSpeech + AnalyzeReference -> ComputeProgram
//! -> Render -> Done` under one request budget. Once speech exists, a failed
//! render or a spent budget degrades to the raw synthesized speech instead of
//! failing the request. Nothing here returns an `Err`: every outcome is a
//! [`PipelineOutcome`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout_at;
use tracing::{debug, error, info, warn};

use super::{ProcessingError, ProcessingSettings};
use crate::analysis::{classify, FeatureExtractor, VoiceProfile};
use crate::engines::{SpeechSynthesizer, TtsConfig};
use crate::filter::{synthesize_with, FilterProgram, PitchQuality};
use crate::policy::{self, Encoding, StageTimeouts};
use crate::render::{Artifact, ArtifactStore, RequestScope, Renderer};
use crate::server::metrics::{record_pipeline_outcome, record_stage_duration};
use crate::tools::ToolGateway;

pub const METHOD_VOICE_TRANSFER: &str = "CPU Voice Transfer";
pub const METHOD_UNFILTERED: &str = "TTS Enhancement";
pub const METHOD_RAW_SPEECH: &str = "Enhanced TTS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    SynthesizeSpeech,
    AnalyzeReference,
    ComputeProgram,
    Render,
    ErrorFallback,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::SynthesizeSpeech => "synthesize_speech",
            Self::AnalyzeReference => "analyze_reference",
            Self::ComputeProgram => "compute_program",
            Self::Render => "render",
            Self::ErrorFallback => "error_fallback",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloneResult {
    pub stream: Artifact,
    pub full: Artifact,
    pub method: &'static str,
    /// Speech engine that produced the source audio.
    pub engine: String,
    pub profile: VoiceProfile,
    pub program: FilterProgram,
    pub processing_time: Duration,
}

impl CloneResult {
    pub fn is_degraded(&self) -> bool {
        self.method != METHOD_VOICE_TRANSFER
    }
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Success(CloneResult),
    Failure {
        reason: ProcessingError,
        /// Profile the caller can still show, when analysis got that far.
        fallback_profile: Option<VoiceProfile>,
    },
}

impl PipelineOutcome {
    fn failure(reason: ProcessingError, fallback_profile: Option<VoiceProfile>) -> Self {
        Self::Failure {
            reason,
            fallback_profile,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(result) => result.method,
            Self::Failure { reason, .. } => reason.kind(),
        }
    }
}

/// Speech produced for a request, before any filtering.
struct Speech {
    engine: String,
    path: PathBuf,
}

/// Synthesized speech for the plain text-to-speech operation.
#[derive(Debug, Clone)]
pub struct SpeechOutput {
    pub artifact: Artifact,
    pub engine: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub pitch_quality: PitchQuality,
    pub max_text_chars: usize,
    pub max_concurrent_jobs: usize,
    pub request_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            pitch_quality: PitchQuality::default(),
            max_text_chars: policy::MAX_TEXT_CHARS,
            max_concurrent_jobs: 1,
            request_timeout: StageTimeouts::default().request,
        }
    }
}

pub struct Coordinator {
    synthesizer: SpeechSynthesizer,
    extractor: FeatureExtractor,
    renderer: Renderer,
    store: ArtifactStore,
    options: PipelineOptions,
    jobs: Semaphore,
}

impl Coordinator {
    pub fn new(
        synthesizer: SpeechSynthesizer,
        extractor: FeatureExtractor,
        renderer: Renderer,
        store: ArtifactStore,
        options: PipelineOptions,
    ) -> Self {
        let jobs = Semaphore::new(options.max_concurrent_jobs.max(1));
        Self {
            synthesizer,
            extractor,
            renderer,
            store,
            options,
            jobs,
        }
    }

    /// Wires the standard engine chain, extractor and renderer over one gateway.
    pub fn standard(
        gateway: Arc<dyn ToolGateway>,
        client: reqwest::Client,
        tts: &TtsConfig,
        timeouts: StageTimeouts,
        store: ArtifactStore,
        options: PipelineOptions,
    ) -> Self {
        Self::new(
            SpeechSynthesizer::standard(gateway.clone(), client, tts, &timeouts),
            FeatureExtractor::new(gateway.clone(), timeouts.clone()),
            Renderer::new(gateway, timeouts),
            store,
            options,
        )
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn engine_names(&self) -> Vec<&'static str> {
        self.synthesizer.engine_names()
    }

    /// Trimmed text, or a validation error when empty or too long.
    pub fn validate_text<'t>(&self, text: &'t str) -> Result<&'t str, ProcessingError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ProcessingError::Validation("text is required".to_string()));
        }
        let chars = trimmed.chars().count();
        if chars > self.options.max_text_chars {
            return Err(ProcessingError::Validation(format!(
                "text is {} characters, limit is {}",
                chars, self.options.max_text_chars
            )));
        }
        Ok(trimmed)
    }

    /// Profile of a reference recording. Never fails.
    pub async fn analyze(&self, reference: &Path) -> VoiceProfile {
        let (info, features) = self.extractor.extract(reference).await;
        classify(&info, &features)
    }

    /// Text to speech through the engine chain, without any voice transfer.
    pub async fn speak(&self, text: &str) -> Result<SpeechOutput, ProcessingError> {
        let text = self.validate_text(text)?;
        let scope = self.store.scope();
        let (engine, path) = self.synthesize_speech(text, &scope).await?;
        let artifact = self.raw_speech_artifact(path).await?;
        Ok(SpeechOutput { artifact, engine })
    }

    /// Runs the whole voice-clone pipeline for one request.
    pub async fn clone_voice(
        &self,
        text: &str,
        reference: &Path,
        settings: &ProcessingSettings,
    ) -> PipelineOutcome {
        let started = Instant::now();
        let outcome = self.clone_voice_bounded(text, reference, settings, started).await;
        record_pipeline_outcome(outcome.label());
        record_stage_duration(Stage::Done.as_str(), started.elapsed());
        match &outcome {
            PipelineOutcome::Success(result) => info!(
                "Voice clone done in {}ms via {} ({})",
                result.processing_time.as_millis(),
                result.method,
                result.engine
            ),
            PipelineOutcome::Failure { reason, .. } => {
                error!("Voice clone failed: {}", reason)
            }
        }
        outcome
    }

    async fn clone_voice_bounded(
        &self,
        text: &str,
        reference: &Path,
        settings: &ProcessingSettings,
        started: Instant,
    ) -> PipelineOutcome {
        // Stage Start: nothing touches disk or tools until input is valid.
        let text = match self.validate_text(text) {
            Ok(text) => text,
            Err(e) => return PipelineOutcome::failure(e, None),
        };
        if let Err(e) = settings.validate() {
            return PipelineOutcome::failure(e, None);
        }
        match tokio::fs::metadata(reference).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return PipelineOutcome::failure(
                    ProcessingError::Validation("reference audio not found".to_string()),
                    None,
                )
            }
        }

        let _permit = match self.jobs.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return PipelineOutcome::failure(
                    ProcessingError::failure("pipeline", "shutting down"),
                    None,
                )
            }
        };

        let deadline = tokio::time::Instant::now() + self.options.request_timeout;
        self.run_stages(text, reference, settings, started, deadline)
            .await
    }

    /// Every stage shares `deadline`. Once speech exists, running out of
    /// time degrades to that speech instead of failing.
    async fn run_stages(
        &self,
        text: &str,
        reference: &Path,
        settings: &ProcessingSettings,
        started: Instant,
        deadline: tokio::time::Instant,
    ) -> PipelineOutcome {
        let scope = self.store.scope();
        debug!("Request {}: {} chars", scope.id(), text.chars().count());

        let (speech, profile) = tokio::join!(
            async {
                let stage_start = Instant::now();
                let speech = timeout_at(deadline, self.synthesize_speech(text, &scope)).await;
                record_stage_duration(Stage::SynthesizeSpeech.as_str(), stage_start.elapsed());
                speech
            },
            async {
                let stage_start = Instant::now();
                let profile = timeout_at(deadline, self.analyze(reference)).await.ok();
                record_stage_duration(Stage::AnalyzeReference.as_str(), stage_start.elapsed());
                profile
            },
        );

        let (engine, speech_path) = match speech {
            Ok(Ok(speech)) => speech,
            Ok(Err(e)) => {
                return PipelineOutcome::failure(
                    e,
                    Some(profile.unwrap_or_else(VoiceProfile::neutral)),
                )
            }
            Err(_) => {
                warn!(
                    "Request {}: {}s budget spent before speech was ready",
                    scope.id(),
                    self.options.request_timeout.as_secs_f64()
                );
                return PipelineOutcome::failure(
                    ProcessingError::ToolTimeout {
                        tool: "pipeline".to_string(),
                    },
                    Some(profile.unwrap_or_else(VoiceProfile::neutral)),
                );
            }
        };
        let speech = Speech {
            engine,
            path: speech_path,
        };

        let Some(profile) = profile else {
            warn!(
                "Request {}: {} after analysis ran out of time",
                scope.id(),
                Stage::ErrorFallback.as_str()
            );
            let profile = VoiceProfile::neutral();
            let program = synthesize_with(&profile, settings, self.options.pitch_quality);
            return self.raw_speech_outcome(speech, profile, program, started).await;
        };
        info!(
            "Request {}: reference is {:?} at {:.1}Hz",
            scope.id(),
            profile.voice_type,
            profile.pitch_hz
        );

        let stage_start = Instant::now();
        let program = synthesize_with(&profile, settings, self.options.pitch_quality);
        record_stage_duration(Stage::ComputeProgram.as_str(), stage_start.elapsed());
        debug!(
            "Request {}: program {:?}",
            scope.id(),
            program.steps().iter().map(|s| s.name()).collect::<Vec<_>>()
        );

        let stage_start = Instant::now();
        let rendered = timeout_at(
            deadline,
            self.renderer
                .render(&speech.path, &program, settings.optimize_for_cpu, &scope),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ProcessingError::ToolTimeout {
                tool: "pipeline".to_string(),
            })
        });
        record_stage_duration(Stage::Render.as_str(), stage_start.elapsed());

        let (stream, full, method) = match rendered {
            Ok(pair) if pair.passthrough => (pair.stream, pair.full, METHOD_UNFILTERED),
            Ok(pair) => (pair.stream, pair.full, METHOD_VOICE_TRANSFER),
            Err(e) => {
                warn!(
                    "Request {}: {} after render failure ({})",
                    scope.id(),
                    Stage::ErrorFallback.as_str(),
                    e
                );
                return self.raw_speech_outcome(speech, profile, program, started).await;
            }
        };

        PipelineOutcome::Success(CloneResult {
            stream,
            full,
            method,
            engine: speech.engine,
            profile,
            program,
            processing_time: started.elapsed(),
        })
    }

    /// The synthesized speech, unfiltered, as both outputs.
    async fn raw_speech_outcome(
        &self,
        speech: Speech,
        profile: VoiceProfile,
        program: FilterProgram,
        started: Instant,
    ) -> PipelineOutcome {
        match self.raw_speech_artifact(speech.path).await {
            Ok(raw) => PipelineOutcome::Success(CloneResult {
                stream: raw.clone(),
                full: raw,
                method: METHOD_RAW_SPEECH,
                engine: speech.engine,
                profile,
                program,
                processing_time: started.elapsed(),
            }),
            Err(e) => PipelineOutcome::failure(e, Some(profile)),
        }
    }

    /// Describes speech that was never re-encoded, with the encoding
    /// ffprobe reports or none at all.
    async fn raw_speech_artifact(&self, path: PathBuf) -> Result<Artifact, ProcessingError> {
        let encoding = self.extractor.try_probe(&path).await.map(|info| Encoding {
            sample_rate_hz: info.sample_rate_hz,
            channels: info.channels,
            bit_rate_bps: info.bit_rate_bps,
        });
        Artifact::describe(path, encoding).await
    }

    async fn synthesize_speech(
        &self,
        text: &str,
        scope: &RequestScope,
    ) -> Result<(String, PathBuf), ProcessingError> {
        let result = self
            .synthesizer
            .synthesize(text, |engine, extension| {
                scope.file(&format!("tts_{}", engine), extension)
            })
            .await;
        result.outcome.map(|path| (result.engine, path))
    }
}
