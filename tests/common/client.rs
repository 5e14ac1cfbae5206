//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per server endpoint. When API routes or
//! request formats change, update only this file.

use super::constants::*;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;
use voiceclone_server::engines::wav::silent_wav;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

#[allow(dead_code)]
impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET /api/health
    pub async fn health(&self) -> Response {
        self.client
            .get(self.url("/api/health"))
            .send()
            .await
            .expect("Health request failed")
    }

    /// GET /api/presets
    pub async fn presets(&self) -> Response {
        self.client
            .get(self.url("/api/presets"))
            .send()
            .await
            .expect("Presets request failed")
    }

    /// POST /api/upload with `bytes` in the `audio` field
    pub async fn upload(&self, file_name: &str, mime: &str, bytes: Vec<u8>) -> Response {
        self.upload_field("audio", file_name, mime, bytes).await
    }

    /// POST /api/upload with an arbitrary multipart field name
    pub async fn upload_field(
        &self,
        field: &str,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Response {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .expect("Invalid mime type");
        let form = Form::new().part(field.to_string(), part);
        self.client
            .post(self.url("/api/upload"))
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    /// Uploads a short silent WAV and returns its `filePath`
    pub async fn upload_reference(&self) -> String {
        let response = self
            .upload(REFERENCE_FILE_NAME, "audio/wav", silent_wav(16_000, 1))
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("Upload response not JSON");
        body["filePath"]
            .as_str()
            .expect("No filePath in upload response")
            .to_string()
    }

    /// POST /api/tts
    pub async fn tts(&self, text: &str) -> Response {
        self.client
            .post(self.url("/api/tts"))
            .json(&json!({ "text": text }))
            .send()
            .await
            .expect("TTS request failed")
    }

    /// POST /api/analyze-voice
    pub async fn analyze_voice(&self, body: Value) -> Response {
        self.client
            .post(self.url("/api/analyze-voice"))
            .json(&body)
            .send()
            .await
            .expect("Analyze request failed")
    }

    /// POST /api/voice-clone
    pub async fn voice_clone(&self, body: Value) -> Response {
        self.client
            .post(self.url("/api/voice-clone"))
            .json(&body)
            .send()
            .await
            .expect("Voice clone request failed")
    }

    /// GET a server-relative URL, e.g. one returned by another endpoint
    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("GET request failed")
    }

    /// GET /api/serve-audio?path=
    pub async fn serve_audio(&self, path: &str) -> Response {
        self.client
            .get(self.url("/api/serve-audio"))
            .query(&[("path", path)])
            .send()
            .await
            .expect("Serve request failed")
    }
}
