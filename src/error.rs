//! Filing error taxonomy.
//!
//! Target-level problems are `FilingError`s and end up as failed step
//! results. Bookkeeping problems stay `anyhow::Error` and abort the run.
use crate::case::BureauId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Stable error codes surfaced in step results and run records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DependencyMissing,
    SetupFailed,
    NotInitialized,
    TaskFailed,
    CredentialsMissing,
    LoginFailed,
    DisputeLimitReached,
    Cancelled,
    UnexpectedError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DependencyMissing => "DEPENDENCY_MISSING",
            Self::SetupFailed => "SETUP_FAILED",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::TaskFailed => "TASK_FAILED",
            Self::CredentialsMissing => "CREDENTIALS_MISSING",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::DisputeLimitReached => "DISPUTE_LIMIT_REACHED",
            Self::Cancelled => "CANCELLED",
            Self::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }

    /// Whether re-invoking the same step later can succeed without operator action.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::TaskFailed
                | Self::LoginFailed
                | Self::DisputeLimitReached
                | Self::Cancelled
                | Self::UnexpectedError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A policy rejection: not a crash, just "not now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: ErrorCode,
    pub reason: String,
    pub guidance: String,
}

impl Rejection {
    pub fn dispute_limit(bureau: BureauId, reason: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::DisputeLimitReached,
            reason: reason.into(),
            guidance: format!(
                "{bureau} allows one open dispute at a time; retry after the current dispute is resolved"
            ),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.guidance)
    }
}

/// Everything that can go wrong while filing against a single target.
#[derive(Debug, thiserror::Error)]
pub enum FilingError {
    #[error("agent dependency missing: {0}")]
    DependencyMissing(String),
    #[error("agent setup failed: {0}")]
    SetupFailed(String),
    #[error("agent task run before setup")]
    NotInitialized,
    #[error("agent task failed: {message}")]
    TaskFailed {
        message: String,
        evidence: Option<PathBuf>,
    },
    #[error("no portal credentials configured for {0}")]
    CredentialsMissing(BureauId),
    #[error("login to {bureau} failed: {message}")]
    LoginFailed {
        bureau: BureauId,
        message: String,
        evidence: Option<PathBuf>,
    },
    #[error("rejected: {0}")]
    Rejected(Rejection),
    #[error("cancelled before {0}")]
    Cancelled(String),
    #[error("unexpected error: {message}")]
    Unexpected {
        message: String,
        evidence: Option<PathBuf>,
    },
}

impl FilingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DependencyMissing(_) => ErrorCode::DependencyMissing,
            Self::SetupFailed(_) => ErrorCode::SetupFailed,
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::TaskFailed { .. } => ErrorCode::TaskFailed,
            Self::CredentialsMissing(_) => ErrorCode::CredentialsMissing,
            Self::LoginFailed { .. } => ErrorCode::LoginFailed,
            Self::Rejected(rejection) => rejection.code,
            Self::Cancelled(_) => ErrorCode::Cancelled,
            Self::Unexpected { .. } => ErrorCode::UnexpectedError,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn evidence(&self) -> Option<&PathBuf> {
        match self {
            Self::TaskFailed { evidence, .. }
            | Self::LoginFailed { evidence, .. }
            | Self::Unexpected { evidence, .. } => evidence.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_in_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::DisputeLimitReached).unwrap();
        assert_eq!(json, "\"DISPUTE_LIMIT_REACHED\"");
        assert_eq!(ErrorCode::CredentialsMissing.to_string(), "CREDENTIALS_MISSING");
    }

    #[test]
    fn rejection_is_distinguished_from_failure() {
        let rejected = FilingError::Rejected(Rejection::dispute_limit(
            BureauId::Experian,
            "open dispute found",
        ));
        assert!(rejected.is_rejection());
        assert_eq!(rejected.code(), ErrorCode::DisputeLimitReached);
        assert!(rejected.code().is_retryable());

        let failed = FilingError::CredentialsMissing(BureauId::Equifax);
        assert!(!failed.is_rejection());
        assert!(!failed.code().is_retryable());
    }

    #[test]
    fn evidence_is_exposed_only_where_carried() {
        let err = FilingError::TaskFailed {
            message: "timeout".to_string(),
            evidence: Some(PathBuf::from("first.png")),
        };
        assert_eq!(err.evidence(), Some(&PathBuf::from("first.png")));
        assert_eq!(FilingError::NotInitialized.evidence(), None);
    }
}
