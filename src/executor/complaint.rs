//! Regulator complaint filer, one complaint per reporting bureau.
use super::report::REPORT_AGENCY;
use super::{ExecutorBase, ExecutorContext};
use crate::case::{BureauId, DisputeCase};
use crate::error::FilingError;
use crate::step::{Confirmation, Filed, StepDetails, StepResult};
use crate::store::{now_epoch_ms, FilingKind, TimelineField};
use crate::templates::{render, COMPLAINT_NARRATIVE_MD, COMPLAINT_SUBMIT_MD};
use anyhow::Result;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Regulator that receives complaints about the bureaus.
pub const COMPLAINT_AGENCY: &str = "CFPB";

pub struct ComplaintFiler {
    base: ExecutorBase,
}

impl ComplaintFiler {
    pub fn new(ctx: ExecutorContext, case_id: &str) -> Self {
        let start_url = ctx.settings.portals.complaint.clone();
        Self {
            base: ExecutorBase::new(
                ctx,
                case_id,
                FilingKind::Complaint,
                COMPLAINT_AGENCY,
                &start_url,
            ),
        }
    }

    /// File one complaint about `bureau`. The session is left open for reuse;
    /// call [`ComplaintFiler::close`] when done.
    pub async fn file_complaint(
        &mut self,
        case: &DisputeCase,
        bureau: BureauId,
        report_reference: Option<&str>,
    ) -> Result<StepResult> {
        let started = Instant::now();
        let run_id = self.base.begin_run(bureau.key()).await?;
        let outcome = match self.base.setup().await {
            Ok(()) => self.submit(case, bureau, report_reference).await,
            Err(err) => Err(err),
        };
        if outcome.is_err() {
            // Next target starts from a fresh session.
            self.base.teardown().await;
        }
        self.base.finish_run(&run_id, &outcome).await?;

        if let Ok(filed) = &outcome {
            let store = &self.base.ctx().store;
            if let Some(code) = filed.confirmation.code() {
                store
                    .save_checkpoint(&case.case_id, TimelineField::ComplaintReference(bureau), code)
                    .await?;
            }
            store
                .save_checkpoint(
                    &case.case_id,
                    TimelineField::ComplaintFiledAt(bureau),
                    &now_epoch_ms().to_string(),
                )
                .await?;
        }

        let details = StepDetails::Complaint {
            bureau,
            report_reference: report_reference.map(str::to_string),
        };
        Ok(StepResult::from_outcome(&outcome, details, started.elapsed()))
    }

    /// File complaints for each bureau in order over one session, waiting
    /// `delay` between targets. A failed target never stops the loop.
    pub async fn file_for_all_bureaus(
        &mut self,
        case: &DisputeCase,
        bureaus: &[BureauId],
        report_reference: Option<&str>,
        delay: Duration,
    ) -> Result<BTreeMap<BureauId, StepResult>> {
        let results = self
            .file_each(case, bureaus, report_reference, delay)
            .await;
        self.close().await;
        results
    }

    pub async fn close(&mut self) {
        self.base.teardown().await;
    }

    async fn file_each(
        &mut self,
        case: &DisputeCase,
        bureaus: &[BureauId],
        report_reference: Option<&str>,
        delay: Duration,
    ) -> Result<BTreeMap<BureauId, StepResult>> {
        let mut results = BTreeMap::new();
        for (index, bureau) in bureaus.iter().copied().enumerate() {
            if index > 0 {
                tracing::debug!(
                    case_id = %case.case_id,
                    %bureau,
                    delay_secs = delay.as_secs(),
                    "waiting before next complaint"
                );
                self.base.ctx().pause(delay).await;
            }
            let result = self.file_complaint(case, bureau, report_reference).await?;
            if !result.success() {
                tracing::warn!(
                    case_id = %case.case_id,
                    %bureau,
                    error = result.error().unwrap_or_default(),
                    "complaint failed; continuing with remaining bureaus"
                );
            }
            results.insert(bureau, result);
        }
        Ok(results)
    }

    async fn submit(
        &mut self,
        case: &DisputeCase,
        bureau: BureauId,
        report_reference: Option<&str>,
    ) -> std::result::Result<Filed, FilingError> {
        let bureau_name = bureau.to_string();
        let narrative = build_narrative(case, bureau, report_reference);
        let complaint_url = self.base.ctx().settings.portals.complaint.clone();
        let instruction = render(
            COMPLAINT_SUBMIT_MD,
            &[
                ("complaint_url", complaint_url.as_str()),
                ("bureau", bureau_name.as_str()),
                ("full_name", case.consumer.full_name.as_str()),
                ("address", case.consumer.address.as_str()),
                ("narrative", narrative.as_str()),
            ],
        );
        let max_steps = self.base.max_steps();
        let output = self.base.run_task(&instruction, max_steps).await?;

        Ok(Filed {
            message: format!("{COMPLAINT_AGENCY} complaint about {bureau} submitted"),
            confirmation: Confirmation::from_output(&output.raw_output, COMPLAINT_AGENCY),
            details: StepDetails::Complaint {
                bureau,
                report_reference: report_reference.map(str::to_string),
            },
            evidence: None,
        })
    }
}

/// Sentence tying a filing back to the identity-theft report.
pub(crate) fn report_sentence(report_reference: Option<&str>) -> String {
    match report_reference {
        Some(reference) => {
            format!("I filed an {REPORT_AGENCY} identity theft report, number {reference}.")
        }
        None => format!("I have filed an identity theft report with the {REPORT_AGENCY}."),
    }
}

fn build_narrative(case: &DisputeCase, bureau: BureauId, report_reference: Option<&str>) -> String {
    let bureau_name = bureau.to_string();
    let item_kind = case.item.kind.to_string();
    let description = case.item.describe();
    let sentence = report_sentence(report_reference);
    render(
        COMPLAINT_NARRATIVE_MD,
        &[
            ("bureau", bureau_name.as_str()),
            ("item_kind", item_kind.as_str()),
            ("item_description", description.as_str()),
            ("report_sentence", sentence.as_str()),
        ],
    )
}
