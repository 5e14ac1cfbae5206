use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::analysis::VoiceProfile;
use crate::pipeline::{
    presets, Coordinator, PipelineOutcome, ProcessingError, ProcessingSettings,
};
use crate::render::store::content_type_for;
use crate::render::{ArtifactStore, StoreError};
use tower_http::services::ServeDir;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;

use super::{http_cache, log_requests, metrics::metrics_handler, state::*, ServerConfig};

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

const ANALYSIS_METHOD: &str = "CPU Analysis";

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

/// JSON error body: `{"success": false, "error": ..., "analysis"?: ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    analysis: Option<VoiceProfile>,
    processing_time: Option<Duration>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            analysis: None,
            processing_time: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn with_analysis(mut self, analysis: Option<VoiceProfile>) -> Self {
        self.analysis = analysis;
        self
    }

    fn with_processing_time(mut self, elapsed: Duration) -> Self {
        self.processing_time = Some(elapsed);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "error": self.message,
        });
        if let Some(analysis) = self.analysis {
            body["analysis"] = json!(analysis);
        }
        if let Some(elapsed) = self.processing_time {
            body["processingTime"] = json!(elapsed.as_millis() as u64);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::InvalidFilename(_)
            | StoreError::UnsupportedFileType(_)
            | StoreError::EmptyFile => StatusCode::BAD_REQUEST,
            StoreError::FileTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            StoreError::AccessDenied(_) => StatusCode::FORBIDDEN,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Io(e) => {
                error!("Artifact store IO error: {}", e);
                return Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal storage error");
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<ProcessingError> for ApiError {
    fn from(err: ProcessingError) -> Self {
        match err {
            ProcessingError::Validation(reason) => Self::bad_request(reason),
            other => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("processing failed: {}", other.summary()),
            ),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    file_path: String,
    file_name: String,
    file_size: u64,
    original_name: String,
    public_url: String,
}

#[derive(Deserialize, Debug)]
struct TtsBody {
    #[serde(default)]
    text: String,
    voice: Option<String>,
    engine: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TtsResponse {
    success: bool,
    audio_url: String,
    engine: String,
    processing_time: u64,
    message: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AnalyzeBody {
    #[serde(default)]
    audio_path: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    success: bool,
    analysis: VoiceProfile,
    processing_time: u64,
    method: &'static str,
    message: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct VoiceCloneBody {
    text: String,
    audio_file_path: Option<String>,
    settings: Option<ProcessingSettings>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct VoiceCloneResponse {
    success: bool,
    message: String,
    stream_audio_url: String,
    full_audio_url: String,
    processing_time: u64,
    method: &'static str,
    engine: String,
    degraded: bool,
    analysis: VoiceProfile,
}

#[derive(Deserialize, Debug)]
struct ServeAudioParams {
    path: Option<String>,
}

fn millis(elapsed: Duration) -> u64 {
    elapsed.as_millis() as u64
}

fn public_url_of(store: &ArtifactStore, path: &std::path::Path) -> Result<String, ApiError> {
    store.public_url(path).ok_or_else(|| {
        error!("Generated file {:?} is outside the public root", path);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Generated file is not servable")
    })
}

/// POST /api/upload - Store a reference recording (multipart field `audio`)
async fn upload_audio(
    State(store): State<ArtifactStore>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed upload: {}", e);
                return Err(ApiError::new(e.status(), e.body_text()));
            }
        };
        if field.name() != Some("audio") {
            continue;
        }

        let filename = field.file_name().unwrap_or("audio").to_string();
        let content_type = field.content_type().map(|s| s.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;

        let stored = store
            .save_upload(&filename, content_type.as_deref(), &data)
            .await?;
        info!(
            "Uploaded {} as {} ({:#})",
            stored.original_name,
            stored.public_path,
            byte_unit::Byte::from(stored.size)
        );
        let public_path = format!("/{}", stored.public_path);
        return Ok(Json(UploadResponse {
            success: true,
            file_path: public_path.clone(),
            file_name: stored.file_name,
            file_size: stored.size,
            original_name: stored.original_name,
            public_url: public_path,
        }));
    }
    Err(ApiError::bad_request("No audio file provided"))
}

/// POST /api/tts - Plain text to speech through the engine chain
async fn text_to_speech(
    State(coordinator): State<GuardedCoordinator>,
    Json(body): Json<TtsBody>,
) -> Result<Json<TtsResponse>, ApiError> {
    let started = Instant::now();
    if body.voice.is_some() || body.engine.is_some() {
        debug!(
            "Ignoring voice {:?} / engine {:?} hints, engine order is fixed",
            body.voice, body.engine
        );
    }
    let speech = coordinator.speak(&body.text).await?;
    let audio_url = public_url_of(coordinator.store(), &speech.artifact.path)?;
    Ok(Json(TtsResponse {
        success: true,
        audio_url,
        message: format!("Speech generated with {}", speech.engine),
        engine: speech.engine,
        processing_time: millis(started.elapsed()),
    }))
}

/// POST /api/analyze-voice - Voice profile of a stored recording
async fn analyze_voice(
    State(coordinator): State<GuardedCoordinator>,
    Json(body): Json<AnalyzeBody>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let started = Instant::now();
    let requested = match body.audio_path.as_deref().map(str::trim) {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => return Err(ApiError::bad_request("Audio path required")),
    };

    let path = coordinator.store().resolve(&requested).await.map_err(|e| {
        let err: ApiError = e.into();
        ApiError::new(err.status, format!("Voice analysis failed: {}", err.message))
            .with_analysis(Some(VoiceProfile::neutral()))
    })?;

    let analysis = coordinator.analyze(&path).await;
    Ok(Json(AnalyzeResponse {
        success: true,
        analysis,
        processing_time: millis(started.elapsed()),
        method: ANALYSIS_METHOD,
        message: "Voice analysis completed".to_string(),
    }))
}

/// POST /api/voice-clone - Full pipeline: speech, analysis, filter, render
async fn voice_clone(
    State(coordinator): State<GuardedCoordinator>,
    Json(body): Json<VoiceCloneBody>,
) -> Result<Json<VoiceCloneResponse>, ApiError> {
    let started = Instant::now();
    coordinator.validate_text(&body.text)?;
    let requested = match body.audio_file_path.as_deref().map(str::trim) {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => return Err(ApiError::bad_request("Reference audio file is required")),
    };
    let reference = coordinator.store().resolve(&requested).await?;
    let settings = body.settings.unwrap_or_default();

    match coordinator
        .clone_voice(&body.text, &reference, &settings)
        .await
    {
        PipelineOutcome::Success(result) => {
            let store = coordinator.store();
            let degraded = result.is_degraded();
            let message = if degraded {
                format!("Voice transfer unavailable, returning {} output", result.method)
            } else {
                "Voice cloned".to_string()
            };
            Ok(Json(VoiceCloneResponse {
                success: true,
                message,
                stream_audio_url: public_url_of(store, &result.stream.path)?,
                full_audio_url: public_url_of(store, &result.full.path)?,
                processing_time: millis(result.processing_time),
                method: result.method,
                engine: result.engine,
                degraded,
                analysis: result.profile,
            }))
        }
        PipelineOutcome::Failure {
            reason,
            fallback_profile,
        } => {
            let err: ApiError = reason.into();
            Err(err
                .with_analysis(fallback_profile)
                .with_processing_time(started.elapsed()))
        }
    }
}

/// GET /api/serve-audio?path= - Stream a file from temp/ or uploads/
async fn serve_audio(
    State(store): State<ArtifactStore>,
    Query(params): Query<ServeAudioParams>,
) -> Result<Response, ApiError> {
    let requested = match params.path.as_deref() {
        Some(path) if !path.is_empty() => path,
        _ => return Err(ApiError::bad_request("Missing path parameter")),
    };

    let path = store.resolve(requested).await?;
    let file = tokio::fs::File::open(&path).await.map_err(StoreError::from)?;
    let size = file.metadata().await.map_err(StoreError::from)?.len();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("audio")
        .to_string();

    debug!("Serving {:?} ({} bytes)", path, size);
    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&path)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    Ok(response)
}

/// GET /api/health
async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed();
    let body = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "features": {
            "voiceCloning": true,
            "textToSpeech": true,
            "voiceAnalysis": true,
            "cpuOptimized": true,
        },
        "engines": state.coordinator.engine_names(),
        "system": {
            "uptime": format_uptime(uptime),
            "uptimeSeconds": uptime.as_secs(),
            "platform": std::env::consts::OS,
        },
        "endpoints": {
            "upload": "/api/upload",
            "voiceClone": "/api/voice-clone",
            "tts": "/api/tts",
            "analyzeVoice": "/api/analyze-voice",
            "serveAudio": "/api/serve-audio",
            "presets": "/api/presets",
        },
    });
    (
        [(
            header::CACHE_CONTROL,
            "no-cache, no-store, must-revalidate",
        )],
        Json(body),
    )
}

/// GET /api/presets
async fn get_presets() -> impl IntoResponse {
    Json(presets())
}

pub fn make_app(config: ServerConfig, coordinator: GuardedCoordinator) -> Result<Router> {
    let state = ServerState::new(config.clone(), coordinator);
    let upload_limit = usize::try_from(state.store.max_upload_bytes())
        .context("max upload size does not fit in memory")?
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let upload_routes: Router = Router::new()
        .route("/upload", post(upload_audio))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state.clone());

    let audio_routes: Router = Router::new()
        .route("/serve-audio", get(serve_audio))
        .layer(middleware::from_fn_with_state(
            config.content_cache_age_sec,
            http_cache,
        ))
        .with_state(state.clone());

    let api_routes: Router = Router::new()
        .route("/tts", post(text_to_speech))
        .route("/analyze-voice", post(analyze_voice))
        .route("/voice-clone", post(voice_clone))
        .route("/health", get(health))
        .route("/presets", get(get_presets))
        .with_state(state.clone())
        .merge(upload_routes)
        .merge(audio_routes);

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new(),
    };

    let app: Router = home_router
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests));

    Ok(app)
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub async fn run_server(config: ServerConfig, coordinator: Arc<Coordinator>) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, coordinator)?;
    let metrics_app = make_metrics_app();

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);
    let (app_result, metrics_result) = tokio::join!(
        axum::serve(listener, app),
        axum::serve(metrics_listener, metrics_app)
    );
    app_result?;
    metrics_result?;
    Ok(())
}
