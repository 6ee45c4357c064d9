//! Core runner trait and types.

use async_trait::async_trait;
use relstat_core::Result;
use relstat_core::plan::CommandSpec;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Output line from a running command.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Result of running one command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
}

/// Trait for command execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` with exactly `env` as its environment, streaming output
    /// to the provided channel.
    async fn execute(
        &self,
        command: &CommandSpec,
        env: &HashMap<String, String>,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<CommandResult>;
}

/// Configuration for command execution.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Per-command limit. The job timeout applies regardless.
    pub timeout_seconds: Option<u64>,
}
