//! Process-backed tool gateway.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::command::{ArgError, CommandSpec};

/// Errors raised by the gateway itself. A nonzero exit is not one of them.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid argument for {tool}: {source}")]
    InvalidArgument { tool: String, source: ArgError },

    #[error("{0} is not installed or not executable")]
    Unavailable(String),

    #[error("{tool} timed out after {timeout:?}")]
    TimedOut { tool: String, timeout: Duration },

    #[error("IO error running {tool}: {source}")]
    Io {
        tool: String,
        source: std::io::Error,
    },
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last few hundred bytes of stderr, for logs.
    pub fn stderr_tail(&self) -> &str {
        const MAX_TAIL: usize = 400;
        let s = self.stderr.trim_end();
        if s.len() <= MAX_TAIL {
            return s;
        }
        let mut start = s.len() - MAX_TAIL;
        while !s.is_char_boundary(start) {
            start += 1;
        }
        &s[start..]
    }
}

/// Uniform way to run external audio tools and speech engines.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Runs `spec`, killing it if it exceeds `timeout`.
    ///
    /// The gateway does not check output files; callers do.
    async fn invoke(&self, spec: &CommandSpec, timeout: Duration) -> Result<ToolOutput, ToolError>;
}

/// Runs tools as child processes through `tokio::process`.
pub struct ProcessGateway {
    binaries: HashMap<String, PathBuf>,
}

impl ProcessGateway {
    /// `binaries` maps logical tool names to executables; unknown names are
    /// looked up on `PATH` as-is.
    pub fn new(binaries: HashMap<String, PathBuf>) -> Self {
        Self { binaries }
    }

    fn resolve(&self, tool: &str) -> PathBuf {
        self.binaries
            .get(tool)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(tool))
    }
}

#[async_trait]
impl ToolGateway for ProcessGateway {
    async fn invoke(&self, spec: &CommandSpec, timeout: Duration) -> Result<ToolOutput, ToolError> {
        spec.validate().map_err(|source| ToolError::InvalidArgument {
            tool: spec.tool().to_string(),
            source,
        })?;

        let tool = spec.tool().to_string();
        let mut command = Command::new(self.resolve(&tool));
        command
            .args(spec.args())
            .stdin(if spec.stdin_bytes().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {}", spec);
        let start = Instant::now();

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                ) =>
            {
                return Err(ToolError::Unavailable(tool));
            }
            Err(source) => return Err(ToolError::Io { tool, source }),
        };

        let stdin_bytes = spec.stdin_bytes().map(|b| b.to_vec());
        let stdin = child.stdin.take();

        // Dropping this future on timeout drops the child, which kills it.
        let run = async move {
            if let (Some(bytes), Some(mut stdin)) = (stdin_bytes, stdin) {
                stdin.write_all(&bytes).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(output)) => {
                let output = ToolOutput {
                    stdout: output.stdout,
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.status.code(),
                };
                debug!(
                    "{} finished with {:?} in {}ms",
                    tool,
                    output.exit_code,
                    start.elapsed().as_millis()
                );
                Ok(output)
            }
            Ok(Err(source)) => Err(ToolError::Io { tool, source }),
            Err(_) => {
                warn!("{} exceeded {:?}, killed", tool, timeout);
                Err(ToolError::TimedOut { tool, timeout })
            }
        }
    }
}
