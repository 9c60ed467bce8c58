//! Bureau dispute-portal filer.
//!
//! One filer handles any bureau; the `BureauPortal` descriptor supplies the
//! portal URL, the credential key and the constraint policy. Under a
//! single-outstanding policy the filer refuses to submit while an earlier
//! dispute is still open, and reports that as a rejection rather than a
//! failure.
use super::complaint::report_sentence;
use super::{ExecutorBase, ExecutorContext};
use crate::case::{BureauId, DisputeCase};
use crate::config::PortalCredentials;
use crate::error::{FilingError, Rejection};
use crate::policy::{portal_for, BureauPortal};
use crate::step::{Confirmation, Filed, StepDetails, StepResult};
use crate::store::{now_epoch_ms, FilingKind, Timeline, TimelineField};
use crate::templates::{render, BUREAU_ACTIVE_CHECK_MD, BUREAU_LOGIN_MD, BUREAU_SUBMIT_MD};
use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Instant;

static ACTIVE_DISPUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ACTIVE_DISPUTE\s*:\s*(YES|NO|UNKNOWN)").expect("regex for active dispute")
});

/// Step budget for the read-only status-page check.
const ACTIVE_CHECK_MAX_STEPS: u32 = 8;

pub struct BureauPortalFiler {
    base: ExecutorBase,
    portal: Box<dyn BureauPortal>,
    portal_url: String,
}

impl BureauPortalFiler {
    pub fn new(ctx: ExecutorContext, case_id: &str, bureau: BureauId) -> Self {
        let portal = portal_for(bureau);
        let portal_url = ctx.settings.bureau_url(bureau, portal.default_portal_url());
        let label = bureau.to_string();
        Self {
            base: ExecutorBase::new(ctx, case_id, FilingKind::Bureau, &label, &portal_url),
            portal,
            portal_url,
        }
    }

    pub fn bureau(&self) -> BureauId {
        self.portal.bureau()
    }

    /// File a dispute on the bureau portal and record it on the timeline.
    pub async fn file_dispute(
        &mut self,
        case: &DisputeCase,
        report_reference: Option<&str>,
    ) -> Result<StepResult> {
        let started = Instant::now();
        let bureau = self.bureau();
        let timeline = self.base.ctx().store.load_timeline(&case.case_id).await?;
        let run_id = self.base.begin_run(bureau.key()).await?;

        let outcome = self.attempt(case, report_reference, &timeline).await;
        self.base.teardown().await;
        self.base.finish_run(&run_id, &outcome).await?;

        if let Ok(filed) = &outcome {
            let store = &self.base.ctx().store;
            if let Some(code) = filed.confirmation.code() {
                store
                    .save_checkpoint(&case.case_id, TimelineField::BureauReference(bureau), code)
                    .await?;
            }
            store
                .save_checkpoint(
                    &case.case_id,
                    TimelineField::BureauFiledAt(bureau),
                    &now_epoch_ms().to_string(),
                )
                .await?;
        }

        Ok(StepResult::from_outcome(
            &outcome,
            self.details(),
            started.elapsed(),
        ))
    }

    async fn attempt(
        &mut self,
        case: &DisputeCase,
        report_reference: Option<&str>,
        timeline: &Timeline,
    ) -> std::result::Result<Filed, FilingError> {
        let bureau = self.bureau();
        let credentials = self
            .base
            .ctx()
            .settings
            .credentials_for(self.portal.credential_key())
            .ok_or(FilingError::CredentialsMissing(bureau))?;
        self.base.setup().await?;
        self.submit_dispute(case, report_reference, timeline, &credentials)
            .await
    }

    /// Policy pre-check, login and submission. Requires an open session.
    pub async fn submit_dispute(
        &mut self,
        case: &DisputeCase,
        report_reference: Option<&str>,
        timeline: &Timeline,
        credentials: &PortalCredentials,
    ) -> std::result::Result<Filed, FilingError> {
        let bureau = self.bureau();
        let policy = self.portal.policy();
        if policy.requires_active_dispute_check() {
            if let Some(reason) = self.active_dispute(timeline).await? {
                return Err(FilingError::Rejected(Rejection::dispute_limit(
                    bureau, reason,
                )));
            }
        }

        self.login(credentials).await?;

        let bureau_name = bureau.to_string();
        let item = &case.item;
        let item_kind = item.kind.to_string();
        let sentence = report_sentence(report_reference);
        let instruction = render(
            BUREAU_SUBMIT_MD,
            &[
                ("bureau", bureau_name.as_str()),
                ("item_kind", item_kind.as_str()),
                ("creditor_name", item.creditor_name.as_str()),
                ("reference_number", item.reference_number.as_str()),
                ("item_type", item.item_type.as_str()),
                ("opened_or_inquiry_date", item.opened_or_inquiry_date.as_str()),
                ("report_sentence", sentence.as_str()),
            ],
        );
        let max_steps = self.base.max_steps();
        let output = self.base.run_task(&instruction, max_steps).await?;

        let mut message = format!("{bureau} dispute submitted");
        if let Some(phone) = policy.follow_up_phone() {
            message.push_str(&format!("; phone follow-up required at {phone}"));
        }
        Ok(Filed {
            message,
            confirmation: Confirmation::from_output(&output.raw_output, &bureau_name),
            details: self.details(),
            evidence: None,
        })
    }

    /// Sign in to the portal. Any agent-reported failure becomes `LoginFailed`.
    pub async fn login(
        &mut self,
        credentials: &PortalCredentials,
    ) -> std::result::Result<(), FilingError> {
        let bureau = self.bureau();
        let bureau_name = bureau.to_string();
        let instruction = render(
            BUREAU_LOGIN_MD,
            &[
                ("portal_url", self.portal_url.as_str()),
                ("bureau", bureau_name.as_str()),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ],
        );
        let max_steps = self.base.max_steps();
        let result = self.base.run_task(&instruction, max_steps).await;
        match result {
            Ok(output) if output.raw_output.to_ascii_uppercase().contains("LOGIN_FAILED") => {
                let evidence = self.base.capture_evidence().await;
                Err(FilingError::LoginFailed {
                    bureau,
                    message: output.raw_output.trim().to_string(),
                    evidence,
                })
            }
            Ok(_) => {
                tracing::debug!(case_id = %self.base.case_id(), %bureau, "portal login succeeded");
                Ok(())
            }
            Err(FilingError::TaskFailed { message, evidence }) => Err(FilingError::LoginFailed {
                bureau,
                message,
                evidence,
            }),
            Err(err) => Err(err),
        }
    }

    /// Reason an open dispute blocks filing, if any.
    ///
    /// The durable timeline is authoritative. Otherwise the portal status page
    /// is consulted; a failed query counts as "no open dispute".
    async fn active_dispute(
        &mut self,
        timeline: &Timeline,
    ) -> std::result::Result<Option<String>, FilingError> {
        let bureau = self.bureau();
        if timeline.has_outstanding_bureau_dispute(bureau) {
            let filed_at = timeline
                .get(TimelineField::BureauFiledAt(bureau))
                .unwrap_or("an earlier run");
            return Ok(Some(format!(
                "a {bureau} dispute filed at {filed_at} has not been marked resolved"
            )));
        }

        let instruction = render(
            BUREAU_ACTIVE_CHECK_MD,
            &[("portal_url", self.portal_url.as_str())],
        );
        let result = self.base.run_task(&instruction, ACTIVE_CHECK_MAX_STEPS).await;
        match result {
            Ok(output) => match parse_active_dispute(&output.raw_output) {
                Some(true) => Ok(Some(format!(
                    "the {bureau} portal shows a dispute still in progress"
                ))),
                Some(false) => Ok(None),
                None => {
                    tracing::warn!(
                        case_id = %self.base.case_id(),
                        %bureau,
                        "active dispute status unclear; proceeding"
                    );
                    Ok(None)
                }
            },
            Err(err @ FilingError::Cancelled(_)) => Err(err),
            Err(err) => {
                tracing::warn!(
                    case_id = %self.base.case_id(),
                    %bureau,
                    error = %err,
                    "active dispute check failed; proceeding"
                );
                Ok(None)
            }
        }
    }

    fn details(&self) -> StepDetails {
        let bureau = self.bureau();
        let policy = self.portal.policy();
        let follow_up_phone = policy.follow_up_phone().map(str::to_string);
        StepDetails::BureauPortal {
            bureau,
            policy: policy.kind(),
            quota_note: policy.quota_note(bureau),
            phone_follow_up_required: follow_up_phone.is_some(),
            follow_up_phone,
        }
    }
}

/// `Some(true)` for YES, `Some(false)` for NO, `None` when unknown or absent.
fn parse_active_dispute(output: &str) -> Option<bool> {
    let caps = ACTIVE_DISPUTE_RE.captures(output)?;
    match caps[1].to_ascii_uppercase().as_str() {
        "YES" => Some(true),
        "NO" => Some(false),
        _ => None,
    }
}
