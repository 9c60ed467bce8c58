//! Identity-theft report filer.
use super::{ExecutorBase, ExecutorContext};
use crate::case::DisputeCase;
use crate::error::FilingError;
use crate::step::{Confirmation, Filed, StepDetails, StepResult};
use crate::store::{now_epoch_ms, FilingKind, TimelineField};
use crate::templates::{
    render, REPORT_CAPTURE_MD, REPORT_ITEM_MD, REPORT_NAVIGATE_MD, REPORT_SUBJECT_MD,
    REPORT_SUBMIT_MD,
};
use anyhow::Result;
use std::time::Instant;

/// Agency that receives identity-theft reports.
pub const REPORT_AGENCY: &str = "FTC";

const NOT_PROVIDED: &str = "not provided";

pub struct ReportFiler {
    base: ExecutorBase,
    sub_steps_completed: usize,
}

impl ReportFiler {
    pub fn new(ctx: ExecutorContext, case_id: &str) -> Self {
        let start_url = ctx.settings.portals.report.clone();
        Self {
            base: ExecutorBase::new(ctx, case_id, FilingKind::Report, REPORT_AGENCY, &start_url),
            sub_steps_completed: 0,
        }
    }

    /// File the report and record its reference on the case timeline.
    ///
    /// Target-level failures come back as a failed `StepResult`; only
    /// persistence errors are returned as `Err`.
    pub async fn file_report(&mut self, case: &DisputeCase) -> Result<StepResult> {
        let started = Instant::now();
        let run_id = self.base.begin_run(REPORT_AGENCY).await?;
        let outcome = match self.base.setup().await {
            Ok(()) => self.submit(case).await,
            Err(err) => Err(err),
        };
        self.base.teardown().await;
        self.base.finish_run(&run_id, &outcome).await?;

        if let Ok(filed) = &outcome {
            let store = &self.base.ctx().store;
            if let Some(code) = filed.confirmation.code() {
                store
                    .save_checkpoint(&case.case_id, TimelineField::ReportReference, code)
                    .await?;
            }
            store
                .save_checkpoint(
                    &case.case_id,
                    TimelineField::ReportFiledAt,
                    &now_epoch_ms().to_string(),
                )
                .await?;
        }

        let details = StepDetails::Report {
            agency: REPORT_AGENCY.to_string(),
            sub_steps_completed: self.sub_steps_completed,
        };
        Ok(StepResult::from_outcome(&outcome, details, started.elapsed()))
    }

    async fn submit(&mut self, case: &DisputeCase) -> std::result::Result<Filed, FilingError> {
        let item = &case.item;
        let consumer = &case.consumer;
        let balance = item
            .balance
            .map(|value| format!("${value:.2}"))
            .unwrap_or_else(|| NOT_PROVIDED.to_string());
        let item_kind = item.kind.to_string();
        let report_url = self.base.ctx().settings.portals.report.clone();

        let instructions = [
            render(REPORT_NAVIGATE_MD, &[("report_url", report_url.as_str())]),
            render(
                REPORT_SUBJECT_MD,
                &[
                    ("full_name", consumer.full_name.as_str()),
                    ("address", consumer.address.as_str()),
                    (
                        "date_of_birth",
                        consumer.date_of_birth.as_deref().unwrap_or(NOT_PROVIDED),
                    ),
                    ("phone", consumer.phone.as_deref().unwrap_or(NOT_PROVIDED)),
                    ("email", consumer.email.as_deref().unwrap_or(NOT_PROVIDED)),
                ],
            ),
            render(
                REPORT_ITEM_MD,
                &[
                    ("item_kind", item_kind.as_str()),
                    ("creditor_name", item.creditor_name.as_str()),
                    ("reference_number", item.reference_number.as_str()),
                    ("item_type", item.item_type.as_str()),
                    ("opened_or_inquiry_date", item.opened_or_inquiry_date.as_str()),
                    ("balance", balance.as_str()),
                ],
            ),
            render(REPORT_SUBMIT_MD, &[]),
            render(REPORT_CAPTURE_MD, &[]),
        ];

        let max_steps = self.base.max_steps();
        let mut last_output = String::new();
        for instruction in &instructions {
            let output = self.base.run_task(instruction, max_steps).await?;
            self.sub_steps_completed += 1;
            last_output = output.raw_output;
        }

        let confirmation = Confirmation::from_output(&last_output, REPORT_AGENCY);
        Ok(Filed {
            message: format!("{REPORT_AGENCY} identity theft report submitted"),
            confirmation,
            details: StepDetails::Report {
                agency: REPORT_AGENCY.to_string(),
                sub_steps_completed: self.sub_steps_completed,
            },
            evidence: None,
        })
    }
}
