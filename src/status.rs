//! Dispute status aggregate and run state machine.
//!
//! One `DisputeStatus` is built per orchestration run. It collects the step
//! results of every stage and derives completion and success rate from them.
//! It is not persisted; the case timeline is the durable trace.
//!
//! # State Machine
//!
//! ```text
//! pending ─▶ report ─▶ complaints ─▶ bureau_portals ─▶ complete
//!    │          │           │               │
//!    └──────────┴───────────┴───────────────┴────────▶ failed
//! ```
//!
//! Stages only move forward and may be skipped. The inquiry variant never
//! enters `bureau_portals`. `failed` is reached on orchestrator-level errors
//! (persistence, lease conflict, cancellation), never because a single target
//! failed.
use crate::case::{BureauId, ItemKind};
use crate::error::ErrorCode;
use crate::step::StepResult;
use crate::store::now_epoch_ms;
use anyhow::{anyhow, ensure, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Report,
    Complaints,
    BureauPortals,
    Complete,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Report => "report",
            Self::Complaints => "complaints",
            Self::BureauPortals => "bureau_portals",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Report => 1,
            Self::Complaints => 2,
            Self::BureauPortals => 3,
            Self::Complete => 4,
            Self::Failed => 5,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator variant, selected by the disputed item kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeVariant {
    Account,
    Inquiry,
}

impl DisputeVariant {
    pub fn includes_bureau_portals(self) -> bool {
        matches!(self, Self::Account)
    }
}

impl From<ItemKind> for DisputeVariant {
    fn from(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Account => Self::Account,
            ItemKind::Inquiry => Self::Inquiry,
        }
    }
}

impl fmt::Display for DisputeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account => f.write_str("account"),
            Self::Inquiry => f.write_str("inquiry"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DisputeStatus {
    case_id: String,
    variant: DisputeVariant,
    report_result: Option<StepResult>,
    complaint_results: BTreeMap<BureauId, StepResult>,
    bureau_results: BTreeMap<BureauId, StepResult>,
    current_step: RunState,
    started_at_epoch_ms: u64,
    completed_at_epoch_ms: Option<u64>,
    error: Option<String>,
}

impl DisputeStatus {
    pub fn new(case_id: &str, variant: DisputeVariant) -> Self {
        Self {
            case_id: case_id.to_string(),
            variant,
            report_result: None,
            complaint_results: BTreeMap::new(),
            bureau_results: BTreeMap::new(),
            current_step: RunState::Pending,
            started_at_epoch_ms: now_epoch_ms(),
            completed_at_epoch_ms: None,
            error: None,
        }
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn variant(&self) -> DisputeVariant {
        self.variant
    }

    pub fn current_step(&self) -> RunState {
        self.current_step
    }

    pub fn report_result(&self) -> Option<&StepResult> {
        self.report_result.as_ref()
    }

    pub fn complaint_results(&self) -> &BTreeMap<BureauId, StepResult> {
        &self.complaint_results
    }

    pub fn bureau_results(&self) -> &BTreeMap<BureauId, StepResult> {
        &self.bureau_results
    }

    pub fn started_at_epoch_ms(&self) -> u64 {
        self.started_at_epoch_ms
    }

    pub fn completed_at_epoch_ms(&self) -> Option<u64> {
        self.completed_at_epoch_ms
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Move forward to `next`. Backward moves, moves out of a terminal state
    /// and `bureau_portals` on the inquiry variant are refused.
    pub fn advance(&mut self, next: RunState) -> Result<()> {
        ensure!(
            !self.current_step.is_terminal(),
            "run for case {} already ended in state {}",
            self.case_id,
            self.current_step
        );
        if next == RunState::Failed {
            self.current_step = next;
            return Ok(());
        }
        if next == RunState::BureauPortals && !self.variant.includes_bureau_portals() {
            return Err(anyhow!(
                "{} disputes have no bureau portal stage",
                self.variant
            ));
        }
        ensure!(
            next.rank() > self.current_step.rank(),
            "invalid transition {} -> {}",
            self.current_step,
            next
        );
        self.current_step = next;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.advance(RunState::Complete)?;
        self.completed_at_epoch_ms = Some(now_epoch_ms());
        Ok(())
    }

    /// Mark the run failed with an orchestrator-level error. Results already
    /// collected are kept.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.current_step = RunState::Failed;
        self.error = Some(error.into());
        self.completed_at_epoch_ms = Some(now_epoch_ms());
    }

    pub fn record_report(&mut self, result: StepResult) {
        self.report_result = Some(result);
    }

    pub fn record_complaint(&mut self, bureau: BureauId, result: StepResult) {
        self.complaint_results.insert(bureau, result);
    }

    pub fn record_bureau(&mut self, bureau: BureauId, result: StepResult) -> Result<()> {
        ensure!(
            self.variant.includes_bureau_portals(),
            "{} disputes do not file on bureau portals",
            self.variant
        );
        self.bureau_results.insert(bureau, result);
        Ok(())
    }

    fn steps(&self) -> impl Iterator<Item = &StepResult> {
        self.report_result
            .iter()
            .chain(self.complaint_results.values())
            .chain(self.bureau_results.values())
    }

    pub fn attempted(&self) -> usize {
        self.steps().count()
    }

    pub fn succeeded(&self) -> usize {
        self.steps().filter(|step| step.success()).count()
    }

    /// Fraction of attempted steps that succeeded; 0 when nothing was attempted.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.attempted();
        if attempted == 0 {
            return 0.0;
        }
        self.succeeded() as f64 / attempted as f64
    }

    /// At least one step was attempted and every attempted step succeeded.
    pub fn is_complete(&self) -> bool {
        let attempted = self.attempted();
        attempted > 0 && self.succeeded() == attempted
    }

    pub fn summary(&self) -> StatusSummary {
        StatusSummary {
            case_id: self.case_id.clone(),
            variant: self.variant,
            current_step: self.current_step,
            is_complete: self.is_complete(),
            success_rate: (self.success_rate() * 100.0).round() / 100.0,
            attempted: self.attempted(),
            succeeded: self.succeeded(),
            started_at_epoch_ms: self.started_at_epoch_ms,
            completed_at_epoch_ms: self.completed_at_epoch_ms,
            error: self.error.clone(),
            report: self.report_result.as_ref().map(StepSummary::from),
            complaints: summarize(&self.complaint_results),
            bureaus: summarize(&self.bureau_results),
        }
    }
}

fn summarize(results: &BTreeMap<BureauId, StepResult>) -> BTreeMap<String, StepSummary> {
    results
        .iter()
        .map(|(bureau, result)| (bureau.key().to_string(), StepSummary::from(result)))
        .collect()
}

/// Serialized view of a `DisputeStatus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub case_id: String,
    pub variant: DisputeVariant,
    pub current_step: RunState,
    pub is_complete: bool,
    pub success_rate: f64,
    pub attempted: usize,
    pub succeeded: usize,
    pub started_at_epoch_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_epoch_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<StepSummary>,
    #[serde(default)]
    pub complaints: BTreeMap<String, StepSummary>,
    #[serde(default)]
    pub bureaus: BTreeMap<String, StepSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub success: bool,
    pub message: String,
    pub confirmation_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_note: Option<String>,
    #[serde(default)]
    pub needs_review: bool,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub retryable: bool,
}

impl From<&StepResult> for StepSummary {
    fn from(result: &StepResult) -> Self {
        Self {
            success: result.success(),
            message: result.message().to_string(),
            confirmation_code: result.confirmation_code().map(str::to_string),
            confirmation_note: result.confirmation_note().map(str::to_string),
            needs_review: result.confirmation_needs_review(),
            error: result.error().map(str::to_string),
            error_code: result.error_code(),
            retryable: result.retryable(),
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
