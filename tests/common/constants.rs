//! Shared constants for end-to-end tests

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the test server to answer its health check
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Interval between readiness polls
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

// ============================================================================
// Test Inputs
// ============================================================================

/// Vietnamese sentence used as synthesis input
#[allow(dead_code)]
pub const SAMPLE_TEXT: &str = "Xin chào, đây là giọng nói thử nghiệm.";

/// File name of the reference recording uploaded by tests
#[allow(dead_code)]
pub const REFERENCE_FILE_NAME: &str = "reference voice.wav";

/// Mean volume the fake ffmpeg reports for every volumedetect pass
#[allow(dead_code)]
pub const FAKE_MEAN_VOLUME_DB: f64 = -20.0;

/// Bytes the fake tools write to every output file
#[allow(dead_code)]
pub const FAKE_OUTPUT_BYTES: usize = 4096;
