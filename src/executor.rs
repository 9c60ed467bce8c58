//! Executor base shared by every agency filer.
//!
//! An executor owns at most one agent session at a time. It opens the session
//! in `setup`, delegates instructions through `run_task`, and closes it in
//! `teardown` on every exit path. Run records are created and advanced here so
//! a crash mid-filing still leaves the record at `started`.
use crate::agent::{AgentFactory, AgentOutput, AgentSession, LaunchError, SessionRequest};
use crate::config::Settings;
use crate::error::FilingError;
use crate::step::Filed;
use crate::store::{now_epoch_ms, CaseStore, FilingKind, NewRunRecord, RunStatus, RunUpdate};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod bureau;
pub mod complaint;
pub mod report;

pub use bureau::BureauPortalFiler;
pub use complaint::ComplaintFiler;
pub use report::ReportFiler;

/// Collaborators handed to every executor.
#[derive(Clone)]
pub struct ExecutorContext {
    pub store: Arc<dyn CaseStore>,
    pub agents: Arc<dyn AgentFactory>,
    pub settings: Arc<Settings>,
    pub cancel: CancellationToken,
}

impl ExecutorContext {
    pub fn new(
        store: Arc<dyn CaseStore>,
        agents: Arc<dyn AgentFactory>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            agents,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn evidence_dir(&self, case_id: &str) -> PathBuf {
        self.settings
            .data_dir()
            .join("cases")
            .join(case_id)
            .join("evidence")
    }

    /// Sleep between targets; returns early when the run is cancelled.
    pub async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

pub struct ExecutorBase {
    ctx: ExecutorContext,
    case_id: String,
    kind: FilingKind,
    label: String,
    start_url: String,
    session: Option<Box<dyn AgentSession>>,
    last_output: Option<String>,
    tasks_run: usize,
}

impl ExecutorBase {
    pub fn new(
        ctx: ExecutorContext,
        case_id: &str,
        kind: FilingKind,
        label: &str,
        start_url: &str,
    ) -> Self {
        Self {
            ctx,
            case_id: case_id.to_string(),
            kind,
            label: label.to_string(),
            start_url: start_url.to_string(),
            session: None,
            last_output: None,
            tasks_run: 0,
        }
    }

    pub fn ctx(&self) -> &ExecutorContext {
        &self.ctx
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn max_steps(&self) -> u32 {
        self.ctx.settings.max_steps
    }

    /// Acquire an agent session. A no-op when one is already open.
    pub async fn setup(&mut self) -> Result<(), FilingError> {
        if self.session.is_some() {
            return Ok(());
        }
        if self.ctx.cancel.is_cancelled() {
            return Err(FilingError::Cancelled("agent setup".to_string()));
        }
        let request = SessionRequest {
            session_id: format!(
                "{}-{}-{}-{}",
                self.case_id,
                self.kind,
                self.label,
                now_epoch_ms()
            ),
            start_url: self.start_url.clone(),
        };
        let session = self
            .ctx
            .agents
            .open_session(request)
            .await
            .map_err(|err| match err {
                LaunchError::Missing(message) => FilingError::DependencyMissing(message),
                LaunchError::Failed(message) => FilingError::SetupFailed(message),
            })?;
        tracing::debug!(
            case_id = %self.case_id,
            kind = %self.kind,
            label = %self.label,
            "agent session ready"
        );
        self.session = Some(session);
        Ok(())
    }

    /// Delegate one instruction to the agent and return its raw output.
    pub async fn run_task(
        &mut self,
        instruction: &str,
        max_steps: u32,
    ) -> Result<AgentOutput, FilingError> {
        if self.ctx.cancel.is_cancelled() {
            return Err(FilingError::Cancelled(format!("task {}", self.tasks_run + 1)));
        }
        let session = self.session.as_mut().ok_or(FilingError::NotInitialized)?;
        self.tasks_run += 1;
        tracing::debug!(
            case_id = %self.case_id,
            label = %self.label,
            task = self.tasks_run,
            instruction_chars = instruction.len(),
            max_steps,
            "delegating agent task"
        );
        let result = session.run_task(instruction, max_steps).await;
        match result {
            Ok(output) => {
                self.last_output = Some(output.raw_output.clone());
                if output.success {
                    return Ok(output);
                }
                let evidence = self.capture_evidence().await;
                Err(FilingError::TaskFailed {
                    message: failure_message(&output),
                    evidence,
                })
            }
            Err(err) => {
                let evidence = self.capture_evidence().await;
                Err(FilingError::Unexpected {
                    message: format!("{err:#}"),
                    evidence,
                })
            }
        }
    }

    /// Release the session. Errors are logged and swallowed.
    pub async fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Err(err) = session.close().await {
            tracing::warn!(
                case_id = %self.case_id,
                label = %self.label,
                error = ?err,
                "agent session teardown failed"
            );
        }
    }

    /// Save a screenshot, or the last agent output when no screenshot is available.
    pub async fn capture_evidence(&mut self) -> Option<PathBuf> {
        let dir = self.ctx.evidence_dir(&self.case_id);
        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(dir = %dir.display(), error = %err, "cannot create evidence dir");
            return None;
        }
        let stem = format!(
            "{}-{}-task{}-{}",
            self.kind,
            self.label.to_ascii_lowercase(),
            self.tasks_run,
            now_epoch_ms()
        );
        if let Some(session) = self.session.as_mut() {
            let png = dir.join(format!("{stem}.png"));
            match session.capture_screenshot(&png).await {
                Ok(true) => return Some(png),
                Ok(false) => {}
                Err(err) => {
                    tracing::debug!(error = ?err, "screenshot capture failed");
                }
            }
        }
        let txt = dir.join(format!("{stem}.txt"));
        let body = self
            .last_output
            .clone()
            .unwrap_or_else(|| "no agent output captured".to_string());
        match tokio::fs::write(&txt, body.as_bytes()).await {
            Ok(()) => Some(txt),
            Err(err) => {
                tracing::warn!(path = %txt.display(), error = %err, "cannot write evidence");
                None
            }
        }
    }

    /// Create the run record and move it to `started`.
    pub async fn begin_run(&self, target: &str) -> Result<String> {
        let run_id = self
            .ctx
            .store
            .create_run_record(NewRunRecord {
                case_id: self.case_id.clone(),
                kind: self.kind,
                target: target.to_string(),
            })
            .await?;
        self.ctx
            .store
            .update_run_record(&run_id, RunUpdate::status(RunStatus::Started))
            .await?;
        tracing::info!(
            case_id = %self.case_id,
            kind = %self.kind,
            label = target,
            run_id = %run_id,
            "filing started"
        );
        Ok(run_id)
    }

    /// Move the run record to its terminal status.
    pub async fn finish_run(
        &self,
        run_id: &str,
        outcome: &std::result::Result<Filed, FilingError>,
    ) -> Result<()> {
        let update = match outcome {
            Ok(filed) => RunUpdate {
                status: RunStatus::Completed,
                confirmation_code: filed.confirmation.code().map(str::to_string),
                error: None,
                error_code: None,
            },
            Err(err) => RunUpdate {
                status: RunStatus::Failed,
                confirmation_code: None,
                error: Some(err.to_string()),
                error_code: Some(err.code()),
            },
        };
        self.ctx.store.update_run_record(run_id, update).await?;
        match outcome {
            Ok(filed) => tracing::info!(
                case_id = %self.case_id,
                run_id,
                confirmation = filed.confirmation.code().unwrap_or("<none>"),
                "filing completed"
            ),
            Err(err) if err.is_rejection() => tracing::info!(
                case_id = %self.case_id,
                run_id,
                reason = %err,
                "filing rejected by policy"
            ),
            Err(err) => tracing::warn!(
                case_id = %self.case_id,
                run_id,
                code = %err.code(),
                error = %err,
                "filing failed"
            ),
        }
        Ok(())
    }
}

fn failure_message(output: &AgentOutput) -> String {
    let text = output.raw_output.trim();
    if text.is_empty() {
        return format!("agent gave up after {} steps", output.steps_taken);
    }
    let mut message: String = text.chars().take(300).collect();
    if message.len() < text.len() {
        message.push_str("...");
    }
    message
}
