//! Tool gateway stand-in for end-to-end tests
//!
//! No real audio tool is spawned. Every tool "succeeds" by writing a small
//! file at its declared output, unless configured otherwise.

use super::constants::*;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use voiceclone_server::tools::{CommandSpec, ToolError, ToolGateway, ToolOutput, FFMPEG, FFPROBE};

const PROBE_JSON: &str = r#"{
    "format": {"duration": "4.2", "bit_rate": "256000", "format_name": "wav"},
    "streams": [{"codec_type": "audio", "codec_name": "pcm_s16le", "sample_rate": "16000", "channels": 1}]
}"#;

#[derive(Default)]
pub struct FakeGateway {
    unavailable: HashSet<String>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tool looks uninstalled.
    pub fn unavailable(mut self, tool: &str) -> Self {
        self.unavailable.insert(tool.to_string());
        self
    }

    /// The tool runs but exits nonzero.
    pub fn failing(mut self, tool: &str) -> Self {
        self.failing.insert(tool.to_string());
        self
    }

    /// Tool names in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn ok_with(stdout: Vec<u8>, stderr: String) -> ToolOutput {
    ToolOutput {
        stdout,
        stderr,
        exit_code: Some(0),
    }
}

#[async_trait]
impl ToolGateway for FakeGateway {
    async fn invoke(&self, spec: &CommandSpec, _timeout: Duration) -> Result<ToolOutput, ToolError> {
        let tool = spec.tool().to_string();
        self.calls.lock().unwrap().push(tool.clone());

        if self.unavailable.contains(&tool) {
            return Err(ToolError::Unavailable(tool));
        }
        if self.failing.contains(&tool) {
            return Ok(ToolOutput {
                stderr: "fake failure".to_string(),
                exit_code: Some(1),
                ..Default::default()
            });
        }

        if tool == FFPROBE {
            return Ok(ok_with(PROBE_JSON.as_bytes().to_vec(), String::new()));
        }
        if tool == FFMPEG && spec.arg_after("-af") == Some("volumedetect") {
            return Ok(ok_with(
                Vec::new(),
                format!("[Parsed_volumedetect_0] mean_volume: {:.1} dB\n", FAKE_MEAN_VOLUME_DB),
            ));
        }
        if let Some(path) = spec.output_file() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, vec![0u8; FAKE_OUTPUT_BYTES]).unwrap();
        }
        Ok(ok_with(Vec::new(), String::new()))
    }
}
