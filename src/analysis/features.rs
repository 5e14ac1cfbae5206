//! Acoustic feature extraction from a reference recording.
//!
//! Metadata comes from one ffprobe call. Pitch and tempo are estimated here
//! from raw PCM that ffmpeg decodes to stdout; energy comes from ffmpeg's
//! `volumedetect` report. Every piece degrades to its own default.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::engines::{Candidate, FallbackChain};
use crate::pipeline::{check_exit, ProcessingError};
use crate::policy::{self, StageTimeouts};
use crate::tools::{format_number, CommandSpec, ToolGateway, FFMPEG, FFPROBE};

/// Container and stream metadata of an audio file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInfo {
    pub duration_seconds: f64,
    pub sample_rate_hz: u32,
    pub channels: u8,
    pub bit_rate_bps: u64,
    pub codec_name: String,
}

impl Default for AudioInfo {
    fn default() -> Self {
        Self {
            duration_seconds: policy::DEFAULT_DURATION_SECONDS,
            sample_rate_hz: policy::DEFAULT_SAMPLE_RATE_HZ,
            channels: policy::DEFAULT_CHANNELS,
            bit_rate_bps: policy::DEFAULT_BIT_RATE_BPS,
            codec_name: policy::DEFAULT_CODEC_NAME.to_string(),
        }
    }
}

/// Coarse pitch, tempo and energy estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFeatures {
    pub pitch_hz: f64,
    pub tempo_ratio: f64,
    pub energy: f64,
}

impl Default for RawFeatures {
    fn default() -> Self {
        Self {
            pitch_hz: policy::DEFAULT_PITCH_HZ,
            tempo_ratio: policy::DEFAULT_TEMPO_RATIO,
            energy: policy::DEFAULT_ENERGY,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<i64>,
    bit_rate: Option<String>,
    duration: Option<String>,
}

/// Builds an [`AudioInfo`] from ffprobe JSON, one field at a time.
pub fn parse_probe(json: &str) -> AudioInfo {
    let defaults = AudioInfo::default();
    let probe: FfprobeOutput = match serde_json::from_str(json) {
        Ok(probe) => probe,
        Err(e) => {
            debug!("Unparseable ffprobe output: {}", e);
            return defaults;
        }
    };

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));
    let format = probe.format.as_ref();

    let duration_seconds = format
        .and_then(|f| f.duration.as_deref())
        .or_else(|| stream.and_then(|s| s.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(defaults.duration_seconds);

    let sample_rate_hz = stream
        .and_then(|s| s.sample_rate.as_deref())
        .and_then(|r| r.parse::<u32>().ok())
        .filter(|r| *r > 0)
        .unwrap_or(defaults.sample_rate_hz);

    let channels = match stream.and_then(|s| s.channels) {
        Some(1) => 1,
        Some(n) if n >= 2 => 2,
        _ => defaults.channels,
    };

    let bit_rate_bps = stream
        .and_then(|s| s.bit_rate.as_deref())
        .or_else(|| format.and_then(|f| f.bit_rate.as_deref()))
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(defaults.bit_rate_bps);

    let codec_name = stream
        .and_then(|s| s.codec_name.clone())
        .filter(|c| !c.is_empty())
        .unwrap_or(defaults.codec_name);

    AudioInfo {
        duration_seconds,
        sample_rate_hz,
        channels,
        bit_rate_bps,
        codec_name,
    }
}

lazy_static! {
    static ref MEAN_VOLUME: Regex =
        Regex::new(r"mean_volume:\s*(-?(?:\d+(?:\.\d+)?|inf))\s*dB").unwrap();
}

/// Mean volume in dB from a `volumedetect` report.
pub fn parse_mean_volume(stderr: &str) -> Option<f64> {
    let captures = MEAN_VOLUME.captures(stderr)?;
    match &captures[1] {
        "-inf" => Some(f64::NEG_INFINITY),
        value => value.parse().ok(),
    }
}

/// `clamp((db + 60) / 30, 0.1, 2.0)`; silence maps to the minimum.
pub fn energy_from_db(mean_db: f64) -> f64 {
    if mean_db.is_nan() {
        return policy::DEFAULT_ENERGY;
    }
    ((mean_db + policy::ENERGY_DB_OFFSET) / policy::ENERGY_DB_SPAN)
        .clamp(policy::ENERGY_MIN, policy::ENERGY_MAX)
}

/// Signed 16-bit little-endian PCM to samples in [-1, 1].
pub fn pcm_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

const PITCH_FRAME: usize = 1024;
const VOICED_RMS: f32 = 0.01;
const VOICED_CORRELATION: f32 = 0.5;

/// Median fundamental frequency over voiced frames, by normalized
/// autocorrelation restricted to the analysis band.
pub fn estimate_pitch(samples: &[f32], sample_rate: u32) -> Option<f64> {
    let rate = sample_rate as f64;
    let min_lag = (rate / policy::PITCH_BAND_HIGH_HZ).floor().max(2.0) as usize;
    let max_lag = (rate / policy::PITCH_BAND_LOW_HZ).ceil() as usize;
    if max_lag * 2 > PITCH_FRAME {
        return None;
    }

    let mut estimates: Vec<f64> = samples
        .chunks_exact(PITCH_FRAME)
        .filter_map(|frame| frame_pitch(frame, min_lag, max_lag).map(|lag| rate / lag))
        .collect();
    if estimates.is_empty() {
        return None;
    }
    estimates.sort_by(|a, b| a.total_cmp(b));
    Some(estimates[estimates.len() / 2])
}

/// Fractional lag of the first strong autocorrelation peak, if voiced.
fn frame_pitch(frame: &[f32], min_lag: usize, max_lag: usize) -> Option<f64> {
    let energy: f32 = frame.iter().map(|x| x * x).sum();
    let rms = (energy / frame.len() as f32).sqrt();
    if rms < VOICED_RMS {
        return None;
    }

    let correlation: Vec<f32> = (0..=max_lag + 1)
        .map(|lag| {
            if lag < min_lag.saturating_sub(1) {
                return 0.0;
            }
            let n = frame.len() - lag;
            let mut cross = 0.0f32;
            let mut left = 0.0f32;
            let mut right = 0.0f32;
            for i in 0..n {
                cross += frame[i] * frame[i + lag];
                left += frame[i] * frame[i];
                right += frame[i + lag] * frame[i + lag];
            }
            let norm = (left * right).sqrt();
            if norm > 0.0 {
                cross / norm
            } else {
                0.0
            }
        })
        .collect();

    let best = (min_lag..=max_lag)
        .map(|lag| correlation[lag])
        .fold(f32::MIN, f32::max);
    if best < VOICED_CORRELATION {
        return None;
    }

    // First peak close to the best one, to avoid octave errors.
    let lag = (min_lag..=max_lag).find(|&lag| {
        let r = correlation[lag];
        r >= 0.9 * best && r >= correlation[lag - 1] && r >= correlation[lag + 1]
    })?;

    let (prev, here, next) = (
        correlation[lag - 1] as f64,
        correlation[lag] as f64,
        correlation[lag + 1] as f64,
    );
    let denominator = prev - 2.0 * here + next;
    let offset = if denominator.abs() > f64::EPSILON {
        (0.5 * (prev - next) / denominator).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    Some(lag as f64 + offset)
}

const ENVELOPE_FRAME_SECONDS: f64 = 0.01;
const ENVELOPE_SMOOTHING: usize = 5;
const MIN_SYLLABLE_GAP_SECONDS: f64 = 0.1;
const MIN_SPEECH_SECONDS: f64 = 0.5;
const SYLLABLE_DIP: f32 = 0.7;

/// Syllable rate relative to neutral read speech, from peaks in the
/// smoothed loudness envelope.
pub fn estimate_tempo(samples: &[f32], sample_rate: u32) -> Option<f64> {
    let frame = (sample_rate as f64 * ENVELOPE_FRAME_SECONDS) as usize;
    if frame == 0 {
        return None;
    }
    let envelope: Vec<f32> = samples
        .chunks_exact(frame)
        .map(|f| (f.iter().map(|x| x * x).sum::<f32>() / f.len() as f32).sqrt())
        .collect();
    if envelope.len() < ENVELOPE_SMOOTHING + 2 {
        return None;
    }

    let half = ENVELOPE_SMOOTHING / 2;
    let smoothed: Vec<f32> = (0..envelope.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(envelope.len());
            envelope[lo..hi].iter().sum::<f32>() / (hi - lo) as f32
        })
        .collect();

    let peak = smoothed.iter().cloned().fold(0.0f32, f32::max);
    if peak < VOICED_RMS {
        return None;
    }
    let active = peak * 0.2;
    let syllable = peak * 0.5;

    let first = smoothed.iter().position(|v| *v >= active)?;
    let last = smoothed.iter().rposition(|v| *v >= active)?;
    let speech_seconds = (last - first + 1) as f64 * ENVELOPE_FRAME_SECONDS;
    if speech_seconds < MIN_SPEECH_SECONDS {
        return None;
    }

    // A new syllable needs a gap in time and a dip below the previous peak.
    let min_gap = (MIN_SYLLABLE_GAP_SECONDS / ENVELOPE_FRAME_SECONDS) as usize;
    let mut syllables = 0usize;
    let mut last_peak: Option<(usize, f32)> = None;
    let mut valley = f32::MAX;
    for i in 1..smoothed.len() - 1 {
        let v = smoothed[i];
        valley = valley.min(v);
        let is_peak = v >= syllable && v > smoothed[i - 1] && v >= smoothed[i + 1];
        let separated = match last_peak {
            None => true,
            Some((p, height)) => i - p >= min_gap && valley <= height * SYLLABLE_DIP,
        };
        if is_peak && separated {
            syllables += 1;
            last_peak = Some((i, v));
            valley = v;
        }
    }
    if syllables < 2 {
        return None;
    }

    let rate = syllables as f64 / speech_seconds;
    Some(rate / policy::REFERENCE_SYLLABLES_PER_SECOND)
}

/// Runs the metadata probe and the three feature estimators.
pub struct FeatureExtractor {
    gateway: Arc<dyn ToolGateway>,
    timeouts: StageTimeouts,
}

impl FeatureExtractor {
    pub fn new(gateway: Arc<dyn ToolGateway>, timeouts: StageTimeouts) -> Self {
        Self { gateway, timeouts }
    }

    /// Never fails: every value that cannot be measured takes its default.
    pub async fn extract(&self, audio: &Path) -> (AudioInfo, RawFeatures) {
        let defaults = RawFeatures::default();
        let (info, (pitch_engine, pitch_hz), (tempo_engine, tempo_ratio), (energy_engine, energy)) = tokio::join!(
            self.probe(audio),
            FallbackChain::new("pitch")
                .then(Candidate::new("autocorrelation", self.timeouts.feature, || {
                    self.pitch(audio)
                }))
                .run_or(defaults.pitch_hz),
            FallbackChain::new("tempo")
                .then(Candidate::new("envelope-peaks", self.timeouts.feature, || {
                    self.tempo(audio)
                }))
                .run_or(defaults.tempo_ratio),
            FallbackChain::new("energy")
                .then(Candidate::new("volumedetect", self.timeouts.feature, || {
                    self.energy(audio)
                }))
                .run_or(defaults.energy),
        );

        let features = RawFeatures {
            pitch_hz,
            tempo_ratio,
            energy,
        };
        info!(
            "Features of {:?}: pitch {:.1}Hz ({}), tempo {:.2} ({}), energy {:.2} ({})",
            audio.file_name().unwrap_or_default(),
            pitch_hz,
            pitch_engine,
            tempo_ratio,
            tempo_engine,
            energy,
            energy_engine
        );
        (info, features)
    }

    /// Metadata probe; missing fields fall back individually.
    pub async fn probe(&self, audio: &Path) -> AudioInfo {
        self.try_probe(audio).await.unwrap_or_default()
    }

    /// Like [`probe`](Self::probe), but `None` when ffprobe could not read the file.
    pub async fn try_probe(&self, audio: &Path) -> Option<AudioInfo> {
        let spec = CommandSpec::new(FFPROBE)
            .opt("-v", "quiet")
            .opt("-print_format", "json")
            .flag("-show_format")
            .flag("-show_streams")
            .path(audio);
        match self.gateway.invoke(&spec, self.timeouts.probe).await {
            Ok(output) if output.success() => {
                Some(parse_probe(&String::from_utf8_lossy(&output.stdout)))
            }
            Ok(output) => {
                debug!("ffprobe failed: {}", output.stderr_tail());
                None
            }
            Err(e) => {
                debug!("ffprobe not run: {}", e);
                None
            }
        }
    }

    async fn decode_pcm(&self, audio: &Path, filter: &str) -> Result<Vec<f32>, ProcessingError> {
        let spec = CommandSpec::new(FFMPEG)
            .opt("-v", "error")
            .input(audio)
            .opt_num("-t", policy::ANALYSIS_MAX_SECONDS)
            .opt("-af", filter)
            .opt_num("-ac", 1.0)
            .opt_num("-ar", policy::ANALYSIS_SAMPLE_RATE_HZ as f64)
            .opt("-f", "s16le")
            .opt("-acodec", "pcm_s16le")
            .flag("-");
        let output = self.gateway.invoke(&spec, self.timeouts.feature).await?;
        check_exit(FFMPEG, &output)?;
        if output.stdout.len() < 2 {
            return Err(ProcessingError::OutputIntegrity("no samples decoded".to_string()));
        }
        Ok(pcm_to_samples(&output.stdout))
    }

    async fn pitch(&self, audio: &Path) -> Result<f64, ProcessingError> {
        let filter = format!(
            "highpass=f={},lowpass=f={}",
            format_number(policy::PITCH_BAND_LOW_HZ),
            format_number(policy::PITCH_BAND_HIGH_HZ)
        );
        let samples = self.decode_pcm(audio, &filter).await?;
        let rate = policy::ANALYSIS_SAMPLE_RATE_HZ;
        tokio::task::spawn_blocking(move || estimate_pitch(&samples, rate))
            .await
            .map_err(|e| ProcessingError::failure("pitch", e.to_string()))?
            .ok_or_else(|| ProcessingError::OutputIntegrity("no voiced frames".to_string()))
    }

    async fn tempo(&self, audio: &Path) -> Result<f64, ProcessingError> {
        let samples = self.decode_pcm(audio, "loudnorm").await?;
        let rate = policy::ANALYSIS_SAMPLE_RATE_HZ;
        tokio::task::spawn_blocking(move || estimate_tempo(&samples, rate))
            .await
            .map_err(|e| ProcessingError::failure("tempo", e.to_string()))?
            .ok_or_else(|| ProcessingError::OutputIntegrity("no syllables found".to_string()))
    }

    async fn energy(&self, audio: &Path) -> Result<f64, ProcessingError> {
        let spec = CommandSpec::new(FFMPEG)
            .opt("-v", "info")
            .input(audio)
            .opt_num("-t", policy::ANALYSIS_MAX_SECONDS)
            .opt("-af", "volumedetect")
            .opt("-f", "null")
            .flag("-");
        let output = self.gateway.invoke(&spec, self.timeouts.feature).await?;
        check_exit(FFMPEG, &output)?;
        parse_mean_volume(&output.stderr)
            .map(energy_from_db)
            .ok_or_else(|| ProcessingError::OutputIntegrity("no mean_volume in report".to_string()))
    }
}
