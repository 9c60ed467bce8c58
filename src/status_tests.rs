use super::*;
use crate::error::FilingError;
use crate::step::{Confirmation, Filed, StepDetails};
use std::time::Duration;

fn details(bureau: BureauId) -> StepDetails {
    StepDetails::Complaint {
        bureau,
        report_reference: None,
    }
}

fn ok_step(bureau: BureauId, code: &str) -> StepResult {
    let filed = Filed {
        message: "filed".to_string(),
        confirmation: Confirmation::Code {
            code: code.to_string(),
            needs_review: false,
        },
        details: details(bureau),
        evidence: None,
    };
    StepResult::from_outcome(&Ok(filed), details(bureau), Duration::ZERO)
}

fn failed_step(bureau: BureauId) -> StepResult {
    let err = FilingError::TaskFailed {
        message: "portal error".to_string(),
        evidence: None,
    };
    StepResult::from_outcome(&Err(err), details(bureau), Duration::ZERO)
}

#[test]
fn empty_status_is_not_complete() {
    let status = DisputeStatus::new("case-1", DisputeVariant::Account);
    assert_eq!(status.attempted(), 0);
    assert_eq!(status.success_rate(), 0.0);
    assert!(!status.is_complete());
}

#[test]
fn partial_success_rate_rounds_in_summary() {
    let mut status = DisputeStatus::new("case-1", DisputeVariant::Inquiry);
    status.record_report(failed_step(BureauId::Equifax));
    status.record_complaint(BureauId::Equifax, ok_step(BureauId::Equifax, "C-1"));
    status.record_complaint(BureauId::Experian, ok_step(BureauId::Experian, "C-2"));

    assert_eq!(status.attempted(), 3);
    assert_eq!(status.succeeded(), 2);
    assert!(!status.is_complete());
    let rate = status.success_rate();
    assert!((0.0..=1.0).contains(&rate));

    let summary = status.summary();
    assert_eq!(summary.success_rate, 0.67);
    assert!(summary.report.as_ref().is_some_and(|step| !step.success));
    assert_eq!(
        summary.complaints["experian"].confirmation_code.as_deref(),
        Some("C-2")
    );
}

#[test]
fn all_attempted_steps_succeeding_is_complete() {
    let mut status = DisputeStatus::new("case-1", DisputeVariant::Account);
    status.record_complaint(BureauId::TransUnion, ok_step(BureauId::TransUnion, "C-9"));
    assert!(status.is_complete());
    assert_eq!(status.success_rate(), 1.0);
}

#[test]
fn states_only_move_forward() {
    let mut status = DisputeStatus::new("case-1", DisputeVariant::Account);
    status.advance(RunState::Report).unwrap();
    status.advance(RunState::BureauPortals).unwrap();
    assert!(status.advance(RunState::Complaints).is_err());
    status.complete().unwrap();
    assert!(status.completed_at_epoch_ms().is_some());
    assert!(status.advance(RunState::Failed).is_err());
}

#[test]
fn inquiry_variant_has_no_bureau_stage() {
    let mut status = DisputeStatus::new("case-1", DisputeVariant::Inquiry);
    assert!(status.advance(RunState::BureauPortals).is_err());
    assert!(status
        .record_bureau(BureauId::Equifax, ok_step(BureauId::Equifax, "B-1"))
        .is_err());
    status.advance(RunState::Complaints).unwrap();
    status.complete().unwrap();
}

#[test]
fn fail_keeps_collected_results() {
    let mut status = DisputeStatus::new("case-1", DisputeVariant::Account);
    status.advance(RunState::Report).unwrap();
    status.record_report(ok_step(BureauId::Equifax, "R-1"));
    status.fail("store unavailable");
    assert_eq!(status.current_step(), RunState::Failed);
    assert_eq!(status.error(), Some("store unavailable"));
    assert_eq!(status.attempted(), 1);

    let json = serde_json::to_value(status.summary()).unwrap();
    assert_eq!(json["current_step"], "failed");
    assert_eq!(json["error"], "store unavailable");
    assert_eq!(json["report"]["confirmation_code"], "R-1");
}
