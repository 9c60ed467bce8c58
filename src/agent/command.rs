//! Command-backed browser agent.
//!
//! Each request spawns the configured agent command with a JSON request on
//! stdin and expects a JSON `AgentOutput` on stdout. The command owns the real
//! browser; the session id lets it keep one browser profile per executor.
//!
//! Request shape:
//!
//! ```json
//! {"session_id":"case-1-report-1718000000000","action":"task",
//!  "instruction":"...","max_steps":25,"start_url":"https://..."}
//! ```
//!
//! Agents that print plain text are tolerated: stdout becomes `raw_output` and
//! the exit status decides `success`.
use super::{AgentFactory, AgentOutput, AgentSession, LaunchError, SessionRequest};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum RequestAction {
    Task,
    Screenshot,
    Close,
}

#[derive(Debug, Serialize)]
struct AgentRequest<'a> {
    session_id: &'a str,
    action: RequestAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    instruction: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_steps: Option<u32>,
    start_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    screenshot_path: Option<&'a Path>,
}

/// Opens sessions backed by an external agent command.
#[derive(Debug, Clone)]
pub struct CommandAgentFactory {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandAgentFactory {
    pub fn new(command: &str, timeout: Duration) -> Result<Self> {
        let argv =
            shell_words::split(command).with_context(|| format!("parse agent command: {command}"))?;
        if argv.is_empty() {
            return Err(anyhow!("agent command is empty"));
        }
        Ok(Self { argv, timeout })
    }
}

#[async_trait]
impl AgentFactory for CommandAgentFactory {
    async fn open_session(
        &self,
        request: SessionRequest,
    ) -> std::result::Result<Box<dyn AgentSession>, LaunchError> {
        let program = which::which(&self.argv[0]).map_err(|err| {
            LaunchError::Missing(format!("agent program {:?} not found: {err}", self.argv[0]))
        })?;
        tracing::debug!(
            session_id = %request.session_id,
            program = %program.display(),
            "opened agent session"
        );
        Ok(Box::new(CommandAgentSession {
            program,
            args: self.argv[1..].to_vec(),
            timeout: self.timeout,
            request,
            closed: false,
        }))
    }
}

struct CommandAgentSession {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    request: SessionRequest,
    closed: bool,
}

impl CommandAgentSession {
    async fn invoke(&self, request: &AgentRequest<'_>) -> Result<AgentOutput> {
        if self.closed {
            return Err(anyhow!("agent session {} already closed", self.request.session_id));
        }
        let payload = serde_json::to_vec(request).context("serialize agent request")?;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .with_context(|| format!("spawn agent {}", self.program.display()))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .context("write agent request")?;
            stdin.shutdown().await.context("close agent stdin")?;
        }
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("agent timed out after {}s", self.timeout.as_secs()))?
            .context("wait for agent output")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        tracing::debug!(
            session_id = %self.request.session_id,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "agent responded"
        );
        Ok(parse_agent_output(
            &stdout,
            output.status.success(),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }
}

#[async_trait]
impl AgentSession for CommandAgentSession {
    async fn run_task(&mut self, instruction: &str, max_steps: u32) -> Result<AgentOutput> {
        let request = AgentRequest {
            session_id: &self.request.session_id,
            action: RequestAction::Task,
            instruction: Some(instruction),
            max_steps: Some(max_steps),
            start_url: &self.request.start_url,
            screenshot_path: None,
        };
        self.invoke(&request).await
    }

    async fn capture_screenshot(&mut self, dest: &Path) -> Result<bool> {
        let request = AgentRequest {
            session_id: &self.request.session_id,
            action: RequestAction::Screenshot,
            instruction: None,
            max_steps: None,
            start_url: &self.request.start_url,
            screenshot_path: Some(dest),
        };
        let output = self.invoke(&request).await?;
        Ok(output.success && dest.is_file())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let request = AgentRequest {
            session_id: &self.request.session_id,
            action: RequestAction::Close,
            instruction: None,
            max_steps: None,
            start_url: &self.request.start_url,
            screenshot_path: None,
        };
        let result = self.invoke(&request).await;
        self.closed = true;
        result.map(|_| ())
    }
}

/// Decode agent stdout, accepting either a JSON `AgentOutput` or plain text.
fn parse_agent_output(stdout: &str, exit_ok: bool, stderr: &str) -> AgentOutput {
    let trimmed = stdout.trim();
    if let Ok(parsed) = serde_json::from_str::<AgentOutput>(trimmed) {
        return parsed;
    }
    let raw_output = if trimmed.is_empty() && !exit_ok {
        stderr.trim().to_string()
    } else {
        trimmed.to_string()
    };
    AgentOutput {
        success: exit_ok,
        raw_output,
        steps_taken: 0,
    }
}
