//! Applies a filter program to produce the stream and full artifacts.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::store::RequestScope;
use crate::engines::VerifyOutput;
use crate::filter::FilterProgram;
use crate::pipeline::{check_exit, ProcessingError};
use crate::policy::{self, Encoding, StageTimeouts};
use crate::tools::{CommandSpec, ToolGateway, FFMPEG};

/// A rendered file and the encoding it was produced with.
///
/// Encoding fields are `None` when the file was not written by the renderer
/// and could not be probed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(skip)]
    pub path: PathBuf,
    pub byte_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate_hz: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate_bps: Option<u64>,
}

impl Artifact {
    /// Verifies `path` is a non-empty file encoded as `encoding`.
    pub async fn from_file(path: PathBuf, encoding: Encoding) -> Result<Self, ProcessingError> {
        Self::describe(path, Some(encoding)).await
    }

    /// Verifies `path` is a non-empty file and describes it.
    pub async fn describe(
        path: PathBuf,
        encoding: Option<Encoding>,
    ) -> Result<Self, ProcessingError> {
        path.verify().await?;
        let byte_size = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .map_err(|e| ProcessingError::OutputIntegrity(e.to_string()))?;
        Ok(Self {
            path,
            byte_size,
            sample_rate_hz: encoding.map(|e| e.sample_rate_hz),
            bit_rate_bps: encoding.map(|e| e.bit_rate_bps),
        })
    }
}

/// Both renditions of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPair {
    pub stream: Artifact,
    pub full: Artifact,
    /// The filter program could not be applied and the input was re-encoded as is.
    pub passthrough: bool,
}

pub struct Renderer {
    gateway: Arc<dyn ToolGateway>,
    timeouts: StageTimeouts,
}

impl Renderer {
    pub fn new(gateway: Arc<dyn ToolGateway>, timeouts: StageTimeouts) -> Self {
        Self { gateway, timeouts }
    }

    /// Renders `program` over `input` twice, or once plus a copy when
    /// `optimize_for_cpu` is set. If either rendition fails, falls back to
    /// an unfiltered re-encode used for both outputs.
    pub async fn render(
        &self,
        input: &Path,
        program: &FilterProgram,
        optimize_for_cpu: bool,
        scope: &RequestScope,
    ) -> Result<RenderedPair, ProcessingError> {
        match self.render_filtered(input, program, optimize_for_cpu, scope).await {
            Ok(pair) => Ok(pair),
            Err(e) => {
                warn!("Filtered render failed ({}), re-encoding input as is", e);
                self.render_passthrough(input, scope).await
            }
        }
    }

    async fn render_filtered(
        &self,
        input: &Path,
        program: &FilterProgram,
        optimize_for_cpu: bool,
        scope: &RequestScope,
    ) -> Result<RenderedPair, ProcessingError> {
        let graph = program.to_filtergraph();
        debug!("Filtergraph: {}", graph);

        let stream_path = scope.file("stream", "mp3");
        self.encode(
            input,
            &stream_path,
            Some(&graph),
            policy::STREAM_ENCODING,
            self.timeouts.stream_render,
        )
        .await?;
        let stream = Artifact::from_file(stream_path, policy::STREAM_ENCODING).await?;

        let full_path = scope.file("full", "mp3");
        let full = if optimize_for_cpu {
            tokio::fs::copy(&stream.path, &full_path)
                .await
                .map_err(|e| ProcessingError::OutputIntegrity(e.to_string()))?;
            Artifact::from_file(full_path, policy::STREAM_ENCODING).await?
        } else {
            self.encode(
                input,
                &full_path,
                Some(&graph),
                policy::FULL_ENCODING,
                self.timeouts.full_render,
            )
            .await?;
            Artifact::from_file(full_path, policy::FULL_ENCODING).await?
        };

        info!(
            "Rendered stream ({} bytes) and full ({} bytes)",
            stream.byte_size, full.byte_size
        );
        Ok(RenderedPair {
            stream,
            full,
            passthrough: false,
        })
    }

    async fn render_passthrough(
        &self,
        input: &Path,
        scope: &RequestScope,
    ) -> Result<RenderedPair, ProcessingError> {
        let path = scope.file("passthrough", "mp3");
        self.encode(
            input,
            &path,
            None,
            policy::PASSTHROUGH_ENCODING,
            self.timeouts.passthrough,
        )
        .await?;
        let artifact = Artifact::from_file(path, policy::PASSTHROUGH_ENCODING).await?;
        Ok(RenderedPair {
            stream: artifact.clone(),
            full: artifact,
            passthrough: true,
        })
    }

    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        filtergraph: Option<&str>,
        encoding: Encoding,
        timeout: Duration,
    ) -> Result<(), ProcessingError> {
        let spec = encode_command(input, output, filtergraph, encoding);
        let result = self.gateway.invoke(&spec, timeout).await?;
        check_exit(FFMPEG, &result)
    }
}

/// `ffmpeg -y -v error -i IN [-af GRAPH] -ar R -ac C -b:a Nk OUT`
pub fn encode_command(
    input: &Path,
    output: &Path,
    filtergraph: Option<&str>,
    encoding: Encoding,
) -> CommandSpec {
    let mut spec = CommandSpec::new(FFMPEG)
        .flag("-y")
        .opt("-v", "error")
        .input(input);
    if let Some(graph) = filtergraph {
        spec = spec.opt("-af", graph);
    }
    spec.opt_num("-ar", encoding.sample_rate_hz as f64)
        .opt_num("-ac", encoding.channels as f64)
        .opt("-b:a", format!("{}k", encoding.bit_rate_bps / 1000))
        .output(output)
}
