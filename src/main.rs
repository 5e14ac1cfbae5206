use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use voiceclone_server::config::{AppConfig, CliConfig, FileConfig};
use voiceclone_server::pipeline::Coordinator;
use voiceclone_server::render::ArtifactStore;
use voiceclone_server::server::{self, run_server, RequestsLoggingLevel, ServerConfig};
use voiceclone_server::tools::ProcessGateway;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in it override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the `uploads/` and `temp/` folders.
    #[clap(long, value_parser = parse_path)]
    pub public_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3000)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// ffmpeg binary, looked up on PATH when unset.
    #[clap(long)]
    pub ffmpeg_path: Option<PathBuf>,

    /// ffprobe binary, looked up on PATH when unset.
    #[clap(long)]
    pub ffprobe_path: Option<PathBuf>,

    /// How many voice-clone requests may run their tools at the same time.
    #[clap(long)]
    pub max_concurrent_jobs: Option<usize>,

    /// The maximum age of served audio in the cache in seconds.
    #[clap(long, default_value_t = 3600)]
    pub content_cache_age_sec: usize,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        public_dir: cli_args.public_dir,
        port: cli_args.port,
        metrics_port: cli_args.metrics_port,
        logging_level: cli_args.logging_level,
        content_cache_age_sec: cli_args.content_cache_age_sec,
        frontend_dir_path: cli_args.frontend_dir_path,
        ffmpeg_path: cli_args.ffmpeg_path,
        ffprobe_path: cli_args.ffprobe_path,
        max_concurrent_jobs: cli_args.max_concurrent_jobs,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    let store = ArtifactStore::new(&config.public_dir, config.limits.max_upload_bytes);
    store
        .init()
        .await
        .with_context(|| format!("Failed to prepare {:?}", config.public_dir))?;
    info!("Storing audio under {:?}", config.public_dir);

    let gateway = Arc::new(ProcessGateway::new(config.tool_paths.clone()));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let coordinator = Coordinator::standard(
        gateway,
        client,
        &config.tts,
        config.timeouts(),
        store,
        config.pipeline_options(),
    );
    info!("Speech engines: {}", coordinator.engine_names().join(" > "));

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level,
        port: config.port,
        metrics_port: config.metrics_port,
        content_cache_age_sec: config.content_cache_age_sec,
        frontend_dir_path: config.frontend_dir_path,
    };
    run_server(server_config, Arc::new(coordinator)).await
}
