//! Media control collaborator.
//!
//! Media keys and "now playing" queries are delegated to external programs
//! configured per action. A program that prints JSON yields that JSON;
//! one that exits cleanly without JSON yields an acknowledgement.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Media control errors.
#[derive(Debug, Error)]
pub enum MediaError {
    /// No program configured for the action.
    #[error("Unknown media action: {0}")]
    UnknownAction(String),

    /// No now-playing program configured.
    #[error("Now playing query is not configured")]
    NotConfigured,

    /// Program could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Program exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        /// Program name.
        program: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
}

/// An external program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    /// Program name or path.
    pub program: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl ExternalCommand {
    /// Create a command.
    #[must_use]
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

/// Runs configured media commands.
#[derive(Debug, Clone, Default)]
pub struct MediaControl {
    commands: BTreeMap<String, ExternalCommand>,
    now_playing: Option<ExternalCommand>,
}

impl MediaControl {
    /// Create a controller.
    #[must_use]
    pub fn new(commands: BTreeMap<String, ExternalCommand>, now_playing: Option<ExternalCommand>) -> Self {
        Self {
            commands,
            now_playing,
        }
    }

    /// Configured action names.
    #[must_use]
    pub fn actions(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    /// Run the program bound to `action`.
    ///
    /// # Errors
    ///
    /// Returns an error if the action is unknown or the program fails.
    pub async fn run_action(&self, action: &str) -> Result<Value, MediaError> {
        let external = self
            .commands
            .get(action)
            .ok_or_else(|| MediaError::UnknownAction(action.to_string()))?;
        debug!(action = %action, program = %external.program, "Running media action");
        execute(external).await
    }

    /// Query the current track.
    ///
    /// # Errors
    ///
    /// Returns an error if no query is configured or the program fails.
    pub async fn now_playing(&self) -> Result<Value, MediaError> {
        let external = self.now_playing.as_ref().ok_or(MediaError::NotConfigured)?;
        execute(external).await
    }
}

async fn execute(external: &ExternalCommand) -> Result<Value, MediaError> {
    let output = Command::new(&external.program)
        .args(&external.args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| MediaError::Spawn {
            program: external.program.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(program = %external.program, status = %output.status, "Media command failed");
        return Err(MediaError::Failed {
            program: external.program.clone(),
            status: output.status.to_string(),
            stderr,
        });
    }

    Ok(parse_output(&output.stdout))
}

/// JSON stdout is returned as-is; anything else is an acknowledgement.
fn parse_output(stdout: &[u8]) -> Value {
    serde_json::from_slice::<Value>(stdout).unwrap_or_else(|_| json!({ "success": true }))
}
