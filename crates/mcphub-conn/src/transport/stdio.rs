//! Child-process transport: line-delimited JSON-RPC over stdin/stdout.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use mcphub_core::ServerConfig;

use super::{Transport, TransportError};

/// Spawned MCP server speaking newline-delimited JSON-RPC.
pub struct StdioTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl StdioTransport {
    /// Spawn the configured command with its args and env.
    pub async fn spawn(config: &ServerConfig) -> Result<Self, TransportError> {
        let command = config
            .command
            .as_deref()
            .ok_or_else(|| TransportError::Spawn("no command configured".into()))?;

        let mut cmd = Command::new(command);
        cmd.args(config.args.iter().flatten())
            .envs(config.env.iter().flatten())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("child stdout unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let name = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server_name = %name, "stderr: {line}");
                }
            });
        }

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn write_frame(&mut self, frame: &Value) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Read frames until one carries the wanted id. Server-initiated
    /// notifications and stray responses are skipped.
    async fn read_response(&mut self, want_id: &Value) -> Result<Value, TransportError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.stdout.read_line(&mut line).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let frame: Value = match serde_json::from_str(trimmed) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("skipping unparseable frame: {e}");
                    continue;
                }
            };
            if frame.get("id") == Some(want_id) {
                return Ok(frame);
            }
            debug!("skipping frame without matching id");
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&mut self, frame: Value) -> Result<Value, TransportError> {
        let want_id = frame
            .get("id")
            .cloned()
            .ok_or_else(|| TransportError::InvalidFrame("request frame has no id".into()))?;
        self.write_frame(&frame).await?;
        self.read_response(&want_id).await
    }

    async fn notify(&mut self, frame: Value) -> Result<(), TransportError> {
        self.write_frame(&frame).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.stdin.shutdown().await;
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                let _ = self.child.kill().await;
            }
        }
        Ok(())
    }
}
