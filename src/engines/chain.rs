//! First-success-wins executor over an ordered list of candidates.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::pipeline::ProcessingError;
use crate::server::metrics::record_engine_attempt;

/// Fail-fast check applied to a candidate's output before it is accepted.
#[async_trait]
pub trait VerifyOutput: Send {
    async fn verify(&self) -> Result<(), ProcessingError>;
}

#[async_trait]
impl VerifyOutput for PathBuf {
    /// The file must exist and hold at least one byte.
    async fn verify(&self) -> Result<(), ProcessingError> {
        match tokio::fs::metadata(self).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
            Ok(_) => Err(ProcessingError::OutputIntegrity(format!(
                "{} is empty",
                file_label(self)
            ))),
            Err(_) => Err(ProcessingError::OutputIntegrity(format!(
                "{} was not created",
                file_label(self)
            ))),
        }
    }
}

#[async_trait]
impl VerifyOutput for f64 {
    async fn verify(&self) -> Result<(), ProcessingError> {
        if self.is_finite() && *self > 0.0 {
            Ok(())
        } else {
            Err(ProcessingError::OutputIntegrity(format!(
                "estimate {} out of range",
                self
            )))
        }
    }
}

fn file_label(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

type Operation<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T, ProcessingError>> + Send + 'a>;

/// One named alternative. Its operation is not started until its turn.
pub struct Candidate<'a, T> {
    name: String,
    timeout: Duration,
    operation: Operation<'a, T>,
}

impl<'a, T> Candidate<'a, T> {
    pub fn new<F, Fut>(name: impl Into<String>, timeout: Duration, operation: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, ProcessingError>> + Send + 'a,
    {
        Self {
            name: name.into(),
            timeout,
            operation: Box::new(move || operation().boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Outcome of a chain: the engine that answered and what it produced.
#[derive(Debug)]
pub struct EngineResult<T> {
    pub engine: String,
    pub outcome: Result<T, ProcessingError>,
}

impl<T> EngineResult<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Ordered candidates tried strictly one after another.
pub struct FallbackChain<'a, T> {
    label: String,
    candidates: Vec<Candidate<'a, T>>,
}

impl<'a, T: VerifyOutput + 'a> FallbackChain<'a, T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            candidates: Vec::new(),
        }
    }

    pub fn then(mut self, candidate: Candidate<'a, T>) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Runs candidates in order until one returns a verified output.
    ///
    /// Later candidates are never started once one succeeds. On exhaustion
    /// the result names the last candidate and carries its error.
    pub async fn run(self) -> EngineResult<T> {
        let label = self.label;
        let mut last: Option<(String, ProcessingError)> = None;

        for candidate in self.candidates {
            let Candidate {
                name,
                timeout,
                operation,
            } = candidate;
            let start = Instant::now();

            let attempt = match tokio::time::timeout(timeout, operation()).await {
                Ok(Ok(output)) => match output.verify().await {
                    Ok(()) => Ok(output),
                    Err(err) => Err(err),
                },
                Ok(Err(err)) => Err(err),
                Err(_) => Err(ProcessingError::ToolTimeout { tool: name.clone() }),
            };

            match attempt {
                Ok(output) => {
                    record_engine_attempt(&label, &name, "success");
                    info!(
                        "{}: {} succeeded in {}ms",
                        label,
                        name,
                        start.elapsed().as_millis()
                    );
                    return EngineResult {
                        engine: name,
                        outcome: Ok(output),
                    };
                }
                Err(err) => {
                    record_engine_attempt(&label, &name, err.kind());
                    warn!("{}: {} failed ({}), trying next", label, name, err);
                    last = Some((name, err));
                }
            }
        }

        let (engine, last_error) = match last {
            Some((name, err)) => (name, err.to_string()),
            None => ("none".to_string(), "no candidates".to_string()),
        };
        EngineResult {
            engine,
            outcome: Err(ProcessingError::ExhaustedFallback {
                chain: label,
                last_error,
            }),
        }
    }

    /// Like [`run`](Self::run) but degrades to `default` on exhaustion.
    pub async fn run_or(self, default: T) -> (String, T) {
        let label = self.label.clone();
        let result = self.run().await;
        match result.outcome {
            Ok(output) => (result.engine, output),
            Err(err) => {
                warn!("{}: using default ({})", label, err);
                ("default".to_string(), default)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn failing(name: &str) -> Candidate<'static, f64> {
        let tool = name.to_string();
        Candidate::new(name, Duration::from_secs(1), move || async move {
            Err(ProcessingError::ToolUnavailable { tool })
        })
    }

    fn value(name: &str, v: f64) -> Candidate<'static, f64> {
        Candidate::new(name, Duration::from_secs(1), move || async move { Ok(v) })
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let result = FallbackChain::new("test")
            .then(failing("a"))
            .then(value("b", 2.0))
            .then(value("c", 3.0))
            .run()
            .await;
        assert_eq!(result.engine, "b");
        assert_eq!(result.outcome.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_later_candidates_are_never_started() {
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        let result = FallbackChain::new("test")
            .then(value("a", 1.0))
            .then(Candidate::new("b", Duration::from_secs(1), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(2.0)
            }))
            .run()
            .await;
        assert!(result.is_success());
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unverified_output_advances() {
        let result = FallbackChain::new("test")
            .then(value("zero", 0.0))
            .then(value("nan", f64::NAN))
            .then(value("good", 1.5))
            .run()
            .await;
        assert_eq!(result.engine, "good");
    }

    #[tokio::test]
    async fn test_timeout_advances() {
        let slow = Candidate::new("slow", Duration::from_millis(50), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1.0)
        });
        let result = FallbackChain::new("test")
            .then(slow)
            .then(value("fast", 2.0))
            .run()
            .await;
        assert_eq!(result.engine, "fast");
    }

    #[tokio::test]
    async fn test_exhaustion_names_last_error() {
        let result = FallbackChain::new("speech")
            .then(failing("a"))
            .then(failing("b"))
            .run()
            .await;
        assert_eq!(result.engine, "b");
        match result.outcome {
            Err(ProcessingError::ExhaustedFallback { chain, last_error }) => {
                assert_eq!(chain, "speech");
                assert!(last_error.contains("b is unavailable"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_or_uses_default() {
        let (engine, v) = FallbackChain::new("pitch")
            .then(failing("autocorrelation"))
            .run_or(200.0)
            .await;
        assert_eq!(engine, "default");
        assert_eq!(v, 200.0);
    }

    #[tokio::test]
    async fn test_path_verification() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.wav");
        std::fs::write(&empty, b"").unwrap();
        let full = dir.path().join("full.wav");
        std::fs::write(&full, b"RIFF").unwrap();

        assert!(empty.clone().verify().await.is_err());
        assert!(dir.path().join("missing.wav").verify().await.is_err());
        assert!(full.verify().await.is_ok());
    }
}
