//! Persistence contract for timelines, run records, and per-case leases.
//!
//! The orchestration layer owns the shape of these records; a store only
//! keeps and returns them. Every call is a suspension point and every error
//! is a bookkeeping error that aborts the run.
use crate::case::BureauId;
use crate::error::ErrorCode;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod file;

pub use file::FileCaseStore;

/// Current epoch time in milliseconds for record timestamps.
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Durable checkpoint fields on a case timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimelineField {
    OrchestrationState,
    OrchestrationStartedAt,
    OrchestrationCompletedAt,
    OrchestrationError,
    ReportReference,
    ReportFiledAt,
    ComplaintReference(BureauId),
    ComplaintFiledAt(BureauId),
    BureauReference(BureauId),
    BureauFiledAt(BureauId),
    BureauResolvedAt(BureauId),
}

impl TimelineField {
    pub fn key(self) -> String {
        match self {
            Self::OrchestrationState => "orchestration.state".to_string(),
            Self::OrchestrationStartedAt => "orchestration.started_at".to_string(),
            Self::OrchestrationCompletedAt => "orchestration.completed_at".to_string(),
            Self::OrchestrationError => "orchestration.error".to_string(),
            Self::ReportReference => "report.reference".to_string(),
            Self::ReportFiledAt => "report.filed_at".to_string(),
            Self::ComplaintReference(bureau) => format!("complaint.{}.reference", bureau.key()),
            Self::ComplaintFiledAt(bureau) => format!("complaint.{}.filed_at", bureau.key()),
            Self::BureauReference(bureau) => format!("bureau.{}.reference", bureau.key()),
            Self::BureauFiledAt(bureau) => format!("bureau.{}.filed_at", bureau.key()),
            Self::BureauResolvedAt(bureau) => format!("bureau.{}.resolved_at", bureau.key()),
        }
    }
}

impl fmt::Display for TimelineField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub value: String,
    pub recorded_at_epoch_ms: u64,
}

/// All checkpoints recorded for one case, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub checkpoints: BTreeMap<String, Checkpoint>,
}

impl Timeline {
    pub fn get(&self, field: TimelineField) -> Option<&str> {
        self.checkpoints
            .get(&field.key())
            .map(|checkpoint| checkpoint.value.as_str())
    }

    pub fn has(&self, field: TimelineField) -> bool {
        self.get(field).is_some()
    }

    pub fn set(&mut self, field: TimelineField, value: impl Into<String>) {
        self.checkpoints.insert(
            field.key(),
            Checkpoint {
                value: value.into(),
                recorded_at_epoch_ms: now_epoch_ms(),
            },
        );
    }

    pub fn report_reference(&self) -> Option<&str> {
        self.get(TimelineField::ReportReference)
    }

    /// A bureau dispute is outstanding once filed and until a later resolution.
    pub fn has_outstanding_bureau_dispute(&self, bureau: BureauId) -> bool {
        let Some(filed) = self.checkpoint(TimelineField::BureauFiledAt(bureau)) else {
            return false;
        };
        match self.checkpoint(TimelineField::BureauResolvedAt(bureau)) {
            Some(resolved) => resolved.recorded_at_epoch_ms < filed.recorded_at_epoch_ms,
            None => true,
        }
    }

    fn checkpoint(&self, field: TimelineField) -> Option<&Checkpoint> {
        self.checkpoints.get(&field.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingKind {
    Report,
    Complaint,
    Bureau,
}

impl fmt::Display for FilingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Report => write!(f, "report"),
            Self::Complaint => write!(f, "complaint"),
            Self::Bureau => write!(f, "bureau"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Started,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Audit row for one executor invocation. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub case_id: String,
    pub kind: FilingKind,
    pub target: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub created_at_epoch_ms: u64,
    pub updated_at_epoch_ms: u64,
}

#[derive(Debug, Clone)]
pub struct NewRunRecord {
    pub case_id: String,
    pub kind: FilingKind,
    pub target: String,
}

/// Status transition applied to an existing run record.
#[derive(Debug, Clone)]
pub struct RunUpdate {
    pub status: RunStatus,
    pub confirmation_code: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status,
            confirmation_code: None,
            error: None,
            error_code: None,
        }
    }
}

/// Proof that a case is held by one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub case_id: String,
    pub holder: String,
    pub acquired_at_epoch_ms: u64,
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn load_timeline(&self, case_id: &str) -> Result<Timeline>;

    async fn save_checkpoint(&self, case_id: &str, field: TimelineField, value: &str)
        -> Result<()>;

    /// Create a record in `pending` and return its id.
    async fn create_run_record(&self, record: NewRunRecord) -> Result<String>;

    async fn update_run_record(&self, run_id: &str, update: RunUpdate) -> Result<()>;

    async fn list_run_records(&self, case_id: &str) -> Result<Vec<RunRecord>>;

    /// Take the per-case lease. `Ok(None)` means another run holds it.
    async fn acquire_lease(&self, case_id: &str, holder: &str) -> Result<Option<Lease>>;

    async fn release_lease(&self, lease: &Lease) -> Result<()>;

    /// Drop whatever lease is on the case and return its holder, if any.
    /// For operators clearing up after a crashed run.
    async fn break_lease(&self, case_id: &str) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_keys_are_namespaced_by_bureau() {
        assert_eq!(
            TimelineField::ComplaintReference(BureauId::TransUnion).key(),
            "complaint.transunion.reference"
        );
        assert_eq!(TimelineField::ReportFiledAt.to_string(), "report.filed_at");
    }

    #[test]
    fn outstanding_dispute_clears_once_resolved() {
        let mut timeline = Timeline::default();
        assert!(!timeline.has_outstanding_bureau_dispute(BureauId::Experian));
        timeline.set(TimelineField::BureauFiledAt(BureauId::Experian), "1");
        assert!(timeline.has_outstanding_bureau_dispute(BureauId::Experian));
        assert!(!timeline.has_outstanding_bureau_dispute(BureauId::Equifax));
        timeline.set(TimelineField::BureauResolvedAt(BureauId::Experian), "2");
        assert!(!timeline.has_outstanding_bureau_dispute(BureauId::Experian));
    }

    #[test]
    fn refiling_after_resolution_is_outstanding_again() {
        let mut timeline = Timeline::default();
        let at = |value: &str, ms: u64| Checkpoint {
            value: value.to_string(),
            recorded_at_epoch_ms: ms,
        };
        let filed = TimelineField::BureauFiledAt(BureauId::Experian).key();
        let resolved = TimelineField::BureauResolvedAt(BureauId::Experian).key();
        timeline.checkpoints.insert(filed.clone(), at("100", 100));
        timeline.checkpoints.insert(resolved, at("200", 200));
        assert!(!timeline.has_outstanding_bureau_dispute(BureauId::Experian));
        timeline.checkpoints.insert(filed, at("300", 300));
        assert!(timeline.has_outstanding_bureau_dispute(BureauId::Experian));
    }
}
