//! Process execution on the host.

use crate::runner::{CommandResult, CommandRunner, OutputLine, OutputStream, RunnerConfig};
use async_trait::async_trait;
use relstat_core::plan::CommandSpec;
use relstat_core::{Error, Result};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

/// Runs commands as child processes of the runner.
pub struct ProcessRunner {
    config: RunnerConfig,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

fn stream_lines<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<OutputLine>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut line_num = 0u32;

        while let Ok(Some(line)) = lines.next_line().await {
            line_num += 1;
            let output = OutputLine {
                stream,
                content: line,
                line_number: line_num,
                timestamp: chrono::Utc::now(),
            };
            if tx.send(output).await.is_err() {
                break;
            }
        }
    })
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn execute(
        &self,
        command: &CommandSpec,
        env: &HashMap<String, String>,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<CommandResult> {
        let start = std::time::Instant::now();

        debug!(program = %command.program, cwd = %command.cwd.display(), "Spawning process");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .env_clear()
            .envs(env)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SpawnFailed {
                program: command.program.clone(),
                message: e.to_string(),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("child stderr not captured".into()))?;

        let stdout_handle = stream_lines(stdout, OutputStream::Stdout, output_tx.clone());
        let stderr_handle = stream_lines(stderr, OutputStream::Stderr, output_tx);

        let wait_result = match self.config.timeout_seconds {
            Some(timeout_secs) => {
                match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            timeout_secs,
                            program = %command.program,
                            "Command timed out, killing process"
                        );
                        let _ = child.kill().await;
                        // Grandchildren may still hold the pipes open.
                        stdout_handle.abort();
                        stderr_handle.abort();
                        return Ok(CommandResult {
                            exit_code: -1,
                            success: false,
                            duration_ms: start.elapsed().as_millis() as u64,
                        });
                    }
                }
            }
            None => child.wait().await,
        };

        // Wait for output streaming to complete
        let _ = stdout_handle.await;
        let _ = stderr_handle.await;

        let status = wait_result
            .map_err(|e| Error::Internal(format!("Failed to wait for process: {}", e)))?;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(exit_code, duration_ms, "Command completed");

        Ok(CommandResult {
            exit_code,
            success: status.success(),
            duration_ms,
        })
    }
}
