//! Processing policy table.
//!
//! Every default, threshold and clamp used by the feature extractor, the
//! profile calculator, the filter synthesizer and the renderer lives here so
//! that each number is defined exactly once.

use std::time::Duration;

// =============================================================================
// Audio metadata defaults (used field by field when probing fails)
// =============================================================================

pub const DEFAULT_DURATION_SECONDS: f64 = 1.0;
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;
pub const DEFAULT_CHANNELS: u8 = 1;
pub const DEFAULT_BIT_RATE_BPS: u64 = 128_000;
pub const DEFAULT_CODEC_NAME: &str = "wav";

// =============================================================================
// Raw feature defaults
// =============================================================================

/// Pitch assumed when the reference recording yields no voiced frames.
pub const DEFAULT_PITCH_HZ: f64 = 200.0;
pub const DEFAULT_TEMPO_RATIO: f64 = 1.0;
pub const DEFAULT_ENERGY: f64 = 1.0;

/// Band used when sampling the waveform for pitch estimation.
pub const PITCH_BAND_LOW_HZ: f64 = 80.0;
pub const PITCH_BAND_HIGH_HZ: f64 = 1000.0;

/// Sample rate of the raw PCM excerpts pulled for pitch/tempo estimation.
pub const ANALYSIS_SAMPLE_RATE_HZ: u32 = 16_000;

/// Longest excerpt (in seconds) decoded for waveform analysis.
pub const ANALYSIS_MAX_SECONDS: f64 = 30.0;

/// Syllable rate of neutral read speech, the unity point for tempo ratios.
pub const REFERENCE_SYLLABLES_PER_SECOND: f64 = 4.0;

/// `energy = clamp((mean_db + ENERGY_DB_OFFSET) / ENERGY_DB_SPAN, MIN, MAX)`
pub const ENERGY_DB_OFFSET: f64 = 60.0;
pub const ENERGY_DB_SPAN: f64 = 30.0;
pub const ENERGY_MIN: f64 = 0.1;
pub const ENERGY_MAX: f64 = 2.0;

// =============================================================================
// Profile classification
// =============================================================================

/// Neutral reference pitch the recommendations steer towards.
pub const TARGET_PITCH_HZ: f64 = 220.0;
pub const TARGET_TEMPO_RATIO: f64 = 1.0;
pub const TARGET_ENERGY: f64 = 1.0;

/// Upper bounds (exclusive) of the voice registers, lowest first.
pub const BASS_MAX_HZ: f64 = 150.0;
pub const BARITONE_MAX_HZ: f64 = 200.0;
pub const TENOR_MAX_HZ: f64 = 250.0;
pub const ALTO_MAX_HZ: f64 = 300.0;

pub const SLOW_TEMPO_MAX: f64 = 0.8;
pub const NORMAL_TEMPO_MAX: f64 = 1.2;

pub const QUIET_ENERGY_MAX: f64 = 0.5;
pub const NORMAL_ENERGY_MAX: f64 = 1.5;

pub const PITCH_SHIFT_LIMIT_SEMITONES: f64 = 12.0;
pub const TEMPO_ADJUST_MIN: f64 = 0.5;
pub const TEMPO_ADJUST_MAX: f64 = 2.0;
pub const ENERGY_BOOST_MIN: f64 = 0.1;
pub const ENERGY_BOOST_MAX: f64 = 3.0;

// =============================================================================
// Filter program
// =============================================================================

pub const WORKING_SAMPLE_RATE_HZ: u32 = 16_000;

/// Steps are only emitted when the requested change exceeds these margins.
pub const PITCH_SHIFT_THRESHOLD_SEMITONES: f64 = 0.5;
pub const TEMPO_THRESHOLD: f64 = 0.1;
pub const GAIN_THRESHOLD: f64 = 0.1;

pub const GAIN_LIMIT_DB: f64 = 20.0;

pub const HIGH_PASS_HZ: f64 = 80.0;
pub const LOW_PASS_HZ: f64 = 8000.0;

pub const LOUDNESS_TARGET_LUFS: f64 = -16.0;
pub const LOUDNESS_TRUE_PEAK_DB: f64 = -1.5;
pub const LOUDNESS_RANGE_LU: f64 = 7.0;

/// Register equalization: a dip for low registers, a boost for high ones.
pub const LOW_REGISTER_EQ_HZ: f64 = 500.0;
pub const LOW_REGISTER_EQ_GAIN_DB: f64 = -2.0;
pub const HIGH_REGISTER_EQ_HZ: f64 = 1000.0;
pub const HIGH_REGISTER_EQ_GAIN_DB: f64 = 2.0;
pub const REGISTER_EQ_WIDTH_Q: f64 = 1.0;

// =============================================================================
// Output encodings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    pub sample_rate_hz: u32,
    pub channels: u8,
    pub bit_rate_bps: u64,
}

pub const STREAM_ENCODING: Encoding = Encoding {
    sample_rate_hz: 16_000,
    channels: 1,
    bit_rate_bps: 64_000,
};

pub const FULL_ENCODING: Encoding = Encoding {
    sample_rate_hz: 22_050,
    channels: 1,
    bit_rate_bps: 128_000,
};

pub const PASSTHROUGH_ENCODING: Encoding = Encoding {
    sample_rate_hz: 16_000,
    channels: 1,
    bit_rate_bps: 128_000,
};

// =============================================================================
// Fallback speech
// =============================================================================

pub const SILENCE_SAMPLE_RATE_HZ: u32 = 16_000;
pub const SILENCE_MIN_SECONDS: f64 = 2.0;
pub const SILENCE_MAX_SECONDS: f64 = 10.0;
pub const SILENCE_CHARS_PER_SECOND: f64 = 20.0;

/// The hand-built floor: one second of 16-bit mono PCM silence.
pub const MINIMAL_WAV_SAMPLE_RATE_HZ: u32 = 8_000;
pub const MINIMAL_WAV_SECONDS: u32 = 1;

pub const TONE_FREQUENCY_HZ: f64 = 200.0;

/// Longest text forwarded to the translation speech service.
pub const TRANSLATE_TTS_MAX_CHARS: usize = 200;

/// Duration of the silence placeholder for a given text length.
pub fn silence_seconds(text_chars: usize) -> f64 {
    (text_chars as f64 / SILENCE_CHARS_PER_SECOND).clamp(SILENCE_MIN_SECONDS, SILENCE_MAX_SECONDS)
}

// =============================================================================
// Input limits
// =============================================================================

pub const MAX_TEXT_CHARS: usize = 2000;
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const ALLOWED_AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "ogg", "webm"];
pub const ALLOWED_AUDIO_MIME_TYPES: &[&str] = &[
    "audio/wav",
    "audio/x-wav",
    "audio/mpeg",
    "audio/mp4",
    "audio/m4a",
    "audio/x-m4a",
    "audio/ogg",
    "audio/webm",
    "video/webm",
];

// =============================================================================
// Stage timeouts
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTimeouts {
    pub probe: Duration,
    pub feature: Duration,
    pub edge_tts: Duration,
    pub translate_tts: Duration,
    pub espeak: Duration,
    pub festival: Duration,
    pub tone: Duration,
    pub silence: Duration,
    pub stream_render: Duration,
    pub full_render: Duration,
    pub passthrough: Duration,
    pub request: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(10),
            feature: Duration::from_secs(30),
            edge_tts: Duration::from_secs(30),
            translate_tts: Duration::from_secs(20),
            espeak: Duration::from_secs(20),
            festival: Duration::from_secs(25),
            tone: Duration::from_secs(15),
            silence: Duration::from_secs(10),
            stream_render: Duration::from_secs(60),
            full_render: Duration::from_secs(90),
            passthrough: Duration::from_secs(30),
            request: Duration::from_secs(180),
        }
    }
}
