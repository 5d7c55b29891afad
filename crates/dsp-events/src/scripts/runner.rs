//! Script execution
//!
//! The dispatcher hands each script the payload section of the sandbox
//! envelope and reads back an optional replacement. [`ProcessScriptRunner`]
//! does this by spawning the configured interpreter, writing the payload as
//! JSON to stdin and parsing stdout as JSON.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{EventsError, Result};
use crate::types::keys;

/// What a script produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptOutput {
    /// Replacement payload, or `None` to leave the event untouched
    pub result: Option<Value>,

    /// The script asked to stop propagation
    pub stop_propagation: bool,

    /// Raw output kept for logging
    pub output: String,
}

impl ScriptOutput {
    /// Parse a script's stdout
    ///
    /// Empty, `null` and non-JSON output leave the event untouched. A
    /// top-level `stop_propagation: true` is lifted out of the result.
    pub fn from_stdout(stdout: &str) -> Self {
        let trimmed = stdout.trim();
        let mut output = ScriptOutput {
            output: stdout.to_string(),
            ..Default::default()
        };

        if trimmed.is_empty() {
            return output;
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(mut map)) => {
                if let Some(stop) = map.remove(keys::STOP_PROPAGATION) {
                    output.stop_propagation = stop.as_bool().unwrap_or(false);
                }
                if !map.is_empty() {
                    output.result = Some(Value::Object(map));
                }
            }
            Ok(Value::Array(records)) => output.result = Some(Value::Array(records)),
            Ok(_) => {}
            Err(e) => debug!("Script output is not JSON, ignoring: {}", e),
        }

        output
    }
}

/// Runs a single event script
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run `script` labelled `label` against `payload`
    ///
    /// # Errors
    ///
    /// Any error aborts the dispatch that ran the script.
    async fn run_script(&self, script: &Path, label: &str, payload: &Value) -> Result<ScriptOutput>;
}

/// Runs scripts as child processes
#[derive(Debug, Clone)]
pub struct ProcessScriptRunner {
    interpreter: PathBuf,
    args: Vec<String>,
}

impl ProcessScriptRunner {
    /// Runner invoking `interpreter [args..] <script>`
    pub fn new(interpreter: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args,
        }
    }
}

#[async_trait]
impl ScriptRunner for ProcessScriptRunner {
    async fn run_script(&self, script: &Path, label: &str, payload: &Value) -> Result<ScriptOutput> {
        let failed = |message: String| EventsError::ScriptFailed {
            script: label.to_string(),
            message,
        };

        debug!(
            script = %script.display(),
            interpreter = %self.interpreter.display(),
            "Running event script"
        );

        let mut child = Command::new(&self.interpreter)
            .args(&self.args)
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("Failed to start interpreter: {}", e)))?;

        let input = serde_json::to_vec(payload)?;
        let stdin = child.stdin.take();

        // stdout is drained while the payload is still being written
        let write_input = async move {
            if let Some(mut stdin) = stdin {
                // A script that never reads its input closes the pipe early
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("Script closed stdin early: {}", e);
                }
            }
        };

        let ((), output) = tokio::join!(write_input, child.wait_with_output());
        let output = output.map_err(|e| failed(e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            warn!(
                script = %label,
                exit_code = ?output.status.code(),
                "Event script failed"
            );
            let message = match stderr.trim() {
                "" => format!("exit status {}", output.status),
                text => text.to_string(),
            };
            return Err(failed(message));
        }

        if !stderr.trim().is_empty() {
            debug!(script = %label, stderr = %stderr.trim(), "Event script wrote to stderr");
        }

        Ok(ScriptOutput::from_stdout(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }
}
