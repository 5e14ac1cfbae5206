//! Structured argument lists for external tools.
//!
//! Every value that ends up on a command line goes through one of the typed
//! builder methods below, so numbers are always finite, paths can never be
//! mistaken for options and free text never carries NUL bytes.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A rejected argument, reported by [`CommandSpec::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{argument:?}: {reason}")]
pub struct ArgError {
    pub argument: String,
    pub reason: &'static str,
}

/// A command to run: a logical tool name plus its argument list.
///
/// The tool name ("ffmpeg", "espeak", ...) is resolved to a binary by the
/// gateway, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    tool: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    output: Option<PathBuf>,
    invalid: Option<ArgError>,
}

impl CommandSpec {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args: Vec::new(),
            stdin: None,
            output: None,
            invalid: None,
        }
    }

    /// A literal option or flag known at compile time, e.g. `-y` or `-ac`.
    pub fn flag(mut self, flag: &'static str) -> Self {
        self.args.push(flag.to_string());
        self
    }

    /// A flag followed by a plain value (codec names, filter graphs, voices).
    pub fn opt(self, flag: &'static str, value: impl Into<String>) -> Self {
        self.flag(flag).value(value.into())
    }

    /// A flag followed by a numeric value.
    pub fn opt_num(self, flag: &'static str, value: f64) -> Self {
        self.flag(flag).num(value)
    }

    /// `-i <path>`
    pub fn input(self, path: &Path) -> Self {
        self.flag("-i").path(path)
    }

    /// A positional file path.
    pub fn path(mut self, path: &Path) -> Self {
        let rendered = path.to_string_lossy().into_owned();
        if rendered.is_empty() {
            self.reject(rendered, "empty path");
        } else if rendered.starts_with('-') {
            self.reject(rendered, "path looks like an option");
        } else if rendered.contains('\0') {
            self.reject(rendered, "NUL byte in path");
        } else {
            self.args.push(rendered);
        }
        self
    }

    /// A positional path the tool is expected to create.
    pub fn output(mut self, path: &Path) -> Self {
        self.output = Some(path.to_path_buf());
        self.path(path)
    }

    /// Records the file the tool creates when the path travels some other
    /// way, e.g. inside a script on stdin.
    pub fn writes(mut self, path: &Path) -> Self {
        self.output = Some(path.to_path_buf());
        self
    }

    /// A numeric value, rendered without trailing noise.
    pub fn num(mut self, value: f64) -> Self {
        if value.is_finite() {
            self.args.push(format_number(value));
        } else {
            self.reject(value.to_string(), "number is not finite");
        }
        self
    }

    /// Free text such as the sentence handed to a speech engine.
    ///
    /// A leading dash is padded with a space so the tool reads it as text.
    pub fn text(mut self, value: &str) -> Self {
        if value.contains('\0') {
            self.reject(value.to_string(), "NUL byte in text");
        } else if value.starts_with('-') {
            self.args.push(format!(" {}", value));
        } else {
            self.args.push(value.to_string());
        }
        self
    }

    fn value(mut self, value: String) -> Self {
        if value.contains('\0') {
            self.reject(value, "NUL byte in value");
        } else {
            self.args.push(value);
        }
        self
    }

    /// Bytes piped to the child's stdin.
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    fn reject(&mut self, argument: String, reason: &'static str) {
        if self.invalid.is_none() {
            self.invalid = Some(ArgError { argument, reason });
        }
    }

    /// Returns the first rejected argument, if any.
    pub fn validate(&self) -> Result<(), ArgError> {
        match &self.invalid {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn stdin_bytes(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// The file this command is expected to create, if any.
    pub fn output_file(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// Value following `flag`, if present.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(|s| s.as_str())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quoted = shlex::try_join(self.args.iter().map(|a| a.as_str()))
            .unwrap_or_else(|_| self.args.join(" "));
        write!(f, "{} {}", self.tool, quoted)
    }
}

/// Formats a number with at most six decimals and no trailing zeros.
pub fn format_number(value: f64) -> String {
    let rendered = format!("{:.6}", value);
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}
