//! Human-readable rendering for CLI output. JSON output bypasses this module.
use dispute_filer::status::{StatusSummary, StepSummary};
use dispute_filer::store::{RunRecord, Timeline};
use serde::Serialize;
use std::fmt::Write;

/// Recorded history of a case, as printed by `dfile status`.
#[derive(Debug, Serialize)]
pub struct CaseRecord<'a> {
    pub case_id: &'a str,
    pub timeline: &'a Timeline,
    pub runs: &'a [RunRecord],
}

pub fn render_summary(summary: &StatusSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "case {} ({} dispute): {}",
        summary.case_id, summary.variant, summary.current_step
    );
    let _ = writeln!(
        out,
        "steps: {}/{} succeeded ({:.0}%){}",
        summary.succeeded,
        summary.attempted,
        summary.success_rate * 100.0,
        if summary.is_complete { ", complete" } else { "" }
    );
    if let Some(error) = &summary.error {
        let _ = writeln!(out, "error: {error}");
    }
    if let Some(report) = &summary.report {
        push_step(&mut out, "report", report);
    }
    for (bureau, step) in &summary.complaints {
        push_step(&mut out, &format!("complaint/{bureau}"), step);
    }
    for (bureau, step) in &summary.bureaus {
        push_step(&mut out, &format!("bureau/{bureau}"), step);
    }
    out
}

fn push_step(out: &mut String, label: &str, step: &StepSummary) {
    if step.success {
        let confirmation = match (&step.confirmation_code, &step.confirmation_note) {
            (Some(code), _) if step.needs_review => format!("{code} (needs review)"),
            (Some(code), _) => code.clone(),
            (None, Some(note)) => note.clone(),
            (None, None) => "no confirmation".to_string(),
        };
        let _ = writeln!(out, "  ok    {label:<22} {confirmation}");
        if step.message.contains("follow-up") {
            let _ = writeln!(out, "        {:<22} {}", "", step.message);
        }
    } else {
        let code = step
            .error_code
            .map(|code| code.as_str())
            .unwrap_or("UNKNOWN");
        let retry = if step.retryable { " [retryable]" } else { "" };
        let _ = writeln!(out, "  FAIL  {label:<22} {code}{retry}: {}", step.message);
        if let Some(error) = &step.error {
            let _ = writeln!(out, "        {:<22} {error}", "");
        }
    }
}

pub fn render_case_record(record: &CaseRecord<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "case {}", record.case_id);
    if record.timeline.checkpoints.is_empty() {
        let _ = writeln!(out, "timeline: empty");
    } else {
        let _ = writeln!(out, "timeline:");
        for (key, checkpoint) in &record.timeline.checkpoints {
            let _ = writeln!(out, "  {key:<32} {}", checkpoint.value);
        }
    }
    let _ = writeln!(out, "runs: {}", record.runs.len());
    for run in record.runs {
        let detail = run
            .confirmation_code
            .as_deref()
            .or(run.error.as_deref())
            .unwrap_or("");
        let _ = writeln!(
            out,
            "  {:<10} {:<10} {:<10} {detail}",
            run.kind.to_string(),
            run.target,
            run.status.to_string()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispute_filer::error::ErrorCode;
    use dispute_filer::status::{DisputeVariant, RunState};
    use std::collections::BTreeMap;

    fn step(success: bool) -> StepSummary {
        StepSummary {
            success,
            message: if success {
                "TransUnion dispute submitted; phone follow-up required at 1-800-916-8800"
                    .to_string()
            } else {
                "Experian portal dispute failed".to_string()
            },
            confirmation_code: success.then(|| "TU-4411".to_string()),
            confirmation_note: None,
            needs_review: false,
            error: (!success).then(|| "agent task failed: timeout".to_string()),
            error_code: (!success).then_some(ErrorCode::TaskFailed),
            retryable: !success,
        }
    }

    #[test]
    fn summary_lists_each_step() {
        let summary = StatusSummary {
            case_id: "case-9".to_string(),
            variant: DisputeVariant::Account,
            current_step: RunState::Complete,
            is_complete: false,
            success_rate: 0.5,
            attempted: 2,
            succeeded: 1,
            started_at_epoch_ms: 1,
            completed_at_epoch_ms: Some(2),
            error: None,
            report: None,
            complaints: BTreeMap::new(),
            bureaus: BTreeMap::from([
                ("experian".to_string(), step(false)),
                ("transunion".to_string(), step(true)),
            ]),
        };
        let text = render_summary(&summary);
        assert!(text.contains("case case-9 (account dispute): complete"));
        assert!(text.contains("1/2 succeeded (50%)"));
        assert!(text.contains("FAIL  bureau/experian"));
        assert!(text.contains("TASK_FAILED [retryable]"));
        assert!(text.contains("TU-4411"));
        assert!(text.contains("1-800-916-8800"));
    }
}
