//! Scripted gateway used by unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{CommandSpec, ToolError, ToolGateway, ToolOutput};

pub type Handler = Arc<dyn Fn(&CommandSpec) -> Result<ToolOutput, ToolError> + Send + Sync>;
pub type Matcher = Arc<dyn Fn(&CommandSpec) -> bool + Send + Sync>;

/// Records every invocation and answers from per-tool handlers.
///
/// Tools without a handler succeed and get a small fake file written at
/// their declared output.
#[derive(Default)]
pub struct ScriptedGateway {
    handlers: HashMap<String, Handler>,
    stalls: HashMap<String, (Duration, Matcher)>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, tool: &str, handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
    {
        self.handlers.insert(tool.to_string(), Arc::new(handler));
        self
    }

    pub fn unavailable(self, tool: &str) -> Self {
        let name = tool.to_string();
        self.on(tool, move |_| Err(ToolError::Unavailable(name.clone())))
    }

    /// The tool exits nonzero without writing anything.
    pub fn failing(self, tool: &str) -> Self {
        self.on(tool, |_| {
            Ok(ToolOutput {
                stderr: "scripted failure".to_string(),
                exit_code: Some(1),
                ..Default::default()
            })
        })
    }

    /// Calls to `tool` that match `when` sleep for `delay` before answering.
    pub fn stalling<F>(mut self, tool: &str, delay: Duration, when: F) -> Self
    where
        F: Fn(&CommandSpec) -> bool + Send + Sync + 'static,
    {
        self.stalls
            .insert(tool.to_string(), (delay, Arc::new(when)));
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, tool: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.tool() == tool)
            .collect()
    }
}

/// Writes 2 KiB of zeros at the command's output path, if it has one.
pub fn write_fake_output(spec: &CommandSpec) -> Result<ToolOutput, ToolError> {
    if let Some(path) = spec.output_file() {
        write_file(path, &[0u8; 2048]);
    }
    Ok(ToolOutput {
        exit_code: Some(0),
        ..Default::default()
    })
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

#[async_trait]
impl ToolGateway for ScriptedGateway {
    async fn invoke(&self, spec: &CommandSpec, _timeout: Duration) -> Result<ToolOutput, ToolError> {
        self.calls.lock().unwrap().push(spec.clone());
        let stall = self
            .stalls
            .get(spec.tool())
            .filter(|(_, when)| when(spec))
            .map(|(delay, _)| *delay);
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        match self.handlers.get(spec.tool()) {
            Some(handler) => handler(spec),
            None => write_fake_output(spec),
        }
    }
}
