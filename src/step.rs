//! Step outcomes.
//!
//! Executors produce `Result<Filed, FilingError>`; the orchestration boundary
//! turns that into an immutable `StepResult`. A successful result always
//! carries either a confirmation code or a note explaining why none exists.
use crate::case::BureauId;
use crate::confirmation::{self, ExtractedCode};
use crate::error::{ErrorCode, FilingError};
use crate::policy::PolicyKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What an agency handed back to confirm receipt of a filing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Code { code: String, needs_review: bool },
    Unavailable { note: String },
}

impl Confirmation {
    /// Run the extractor over agent output, falling back to an explanatory note.
    pub fn from_output(raw_output: &str, agency: &str) -> Self {
        match confirmation::extract(raw_output) {
            Some(ExtractedCode {
                code, needs_review, ..
            }) => Self::Code { code, needs_review },
            None => Self::Unavailable {
                note: format!(
                    "{agency} accepted the filing but no confirmation code was visible in the agent output"
                ),
            },
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Code { code, .. } => Some(code),
            Self::Unavailable { .. } => None,
        }
    }
}

/// Agency-specific payload attached to a step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepDetails {
    Report {
        agency: String,
        sub_steps_completed: usize,
    },
    Complaint {
        bureau: BureauId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report_reference: Option<String>,
    },
    BureauPortal {
        bureau: BureauId,
        policy: PolicyKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quota_note: Option<String>,
        phone_follow_up_required: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        follow_up_phone: Option<String>,
    },
}

/// A completed filing, before it is sealed into a `StepResult`.
#[derive(Debug, Clone)]
pub struct Filed {
    pub message: String,
    pub confirmation: Confirmation,
    pub details: StepDetails,
    pub evidence: Option<PathBuf>,
}

/// Outcome of one executor invocation against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    success: bool,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confirmation_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confirmation_note: Option<String>,
    #[serde(default)]
    confirmation_needs_review: bool,
    details: StepDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    evidence: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default)]
    retryable: bool,
    duration_ms: u64,
}

impl StepResult {
    /// Seal an executor outcome. `details` describes the target when the
    /// outcome is an error and therefore carries no payload of its own.
    pub fn from_outcome(
        outcome: &Result<Filed, FilingError>,
        details: StepDetails,
        duration: Duration,
    ) -> Self {
        let duration_ms = duration.as_millis() as u64;
        match outcome {
            Ok(filed) => {
                let (confirmation_code, confirmation_note, confirmation_needs_review) =
                    match &filed.confirmation {
                        Confirmation::Code { code, needs_review } => {
                            (Some(code.clone()), None, *needs_review)
                        }
                        Confirmation::Unavailable { note } => (None, Some(note.clone()), false),
                    };
                Self {
                    success: true,
                    message: filed.message.clone(),
                    confirmation_code,
                    confirmation_note,
                    confirmation_needs_review,
                    details: filed.details.clone(),
                    evidence: filed.evidence.clone(),
                    error_code: None,
                    error: None,
                    retryable: false,
                    duration_ms,
                }
            }
            Err(err) => {
                let code = err.code();
                let message = match err {
                    FilingError::Rejected(rejection) => rejection.guidance.clone(),
                    _ => format!("{} failed", describe_target(&details)),
                };
                Self {
                    success: false,
                    message,
                    confirmation_code: None,
                    confirmation_note: None,
                    confirmation_needs_review: false,
                    details,
                    evidence: err.evidence().cloned(),
                    error_code: Some(code),
                    error: Some(err.to_string()),
                    retryable: code.is_retryable(),
                    duration_ms,
                }
            }
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn confirmation_code(&self) -> Option<&str> {
        self.confirmation_code.as_deref()
    }

    pub fn confirmation_note(&self) -> Option<&str> {
        self.confirmation_note.as_deref()
    }

    pub fn confirmation_needs_review(&self) -> bool {
        self.confirmation_needs_review
    }

    pub fn details(&self) -> &StepDetails {
        &self.details
    }

    pub fn evidence(&self) -> Option<&PathBuf> {
        self.evidence.as_ref()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error_code
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

fn describe_target(details: &StepDetails) -> String {
    match details {
        StepDetails::Report { agency, .. } => format!("{agency} report"),
        StepDetails::Complaint { bureau, .. } => format!("complaint about {bureau}"),
        StepDetails::BureauPortal { bureau, .. } => format!("{bureau} portal dispute"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Rejection;

    fn complaint_details() -> StepDetails {
        StepDetails::Complaint {
            bureau: BureauId::Experian,
            report_reference: None,
        }
    }

    #[test]
    fn success_without_code_carries_a_note() {
        let filed = Filed {
            message: "complaint submitted".to_string(),
            confirmation: Confirmation::from_output("Thanks, all done.", "CFPB"),
            details: complaint_details(),
            evidence: None,
        };
        let result = StepResult::from_outcome(&Ok(filed), complaint_details(), Duration::ZERO);
        assert!(result.success());
        assert_eq!(result.confirmation_code(), None);
        assert!(result.confirmation_note().unwrap().contains("CFPB"));
    }

    #[test]
    fn fallback_codes_are_marked_for_review() {
        let confirmation = Confirmation::from_output("Printed on 20240611123", "FTC");
        assert_eq!(
            confirmation,
            Confirmation::Code {
                code: "20240611123".to_string(),
                needs_review: true
            }
        );
    }

    #[test]
    fn rejection_result_is_retryable_with_guidance() {
        let err = FilingError::Rejected(Rejection::dispute_limit(
            BureauId::Experian,
            "an open dispute exists",
        ));
        let result =
            StepResult::from_outcome(&Err(err), complaint_details(), Duration::from_millis(1500));
        assert!(!result.success());
        assert_eq!(result.error_code(), Some(ErrorCode::DisputeLimitReached));
        assert!(result.retryable());
        assert!(result.message().contains("retry after"));
        assert_eq!(result.duration_ms(), 1500);
    }

    #[test]
    fn failure_serializes_error_fields() {
        let err = FilingError::TaskFailed {
            message: "portal timed out".to_string(),
            evidence: Some(PathBuf::from("evidence/complaint.txt")),
        };
        let result = StepResult::from_outcome(&Err(err), complaint_details(), Duration::ZERO);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_code"], "TASK_FAILED");
        assert_eq!(json["details"]["kind"], "complaint");
        assert_eq!(json["evidence"], "evidence/complaint.txt");
        assert!(json.get("confirmation_code").is_none());
    }
}
