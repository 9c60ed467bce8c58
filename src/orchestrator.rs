//! Multi-agency dispute orchestration.
//!
//! A run takes one disputed case through the report, complaint and (for
//! accounts) bureau-portal stages in that order. Target failures are recorded
//! in the returned `DisputeStatus` and never stop later targets or stages.
//! Only orchestrator-level errors abort a run: persistence failures, a lease
//! held by another run, or cancellation.
//!
//! Resume works per target: a complaint or portal dispute with a `filed_at`
//! checkpoint is never submitted again. Runs refused before they take the
//! case lease leave the timeline untouched.
use crate::case::{BureauId, DisputeCase};
use crate::executor::{BureauPortalFiler, ComplaintFiler, ExecutorContext, ReportFiler};
use crate::status::{DisputeStatus, DisputeVariant, RunState};
use crate::store::{now_epoch_ms, Lease, Timeline, TimelineField};
use anyhow::{anyhow, bail, ensure, Result};
use std::collections::BTreeSet;

/// Which stages and targets a run covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub skip_report: bool,
    pub skip_complaints: bool,
    pub skip_bureaus: bool,
    /// Restrict targets to these bureaus. Bureaus that are not reporting the
    /// item are ignored.
    pub bureaus: Option<BTreeSet<BureauId>>,
    /// Bureaus whose complaint is already on file; never filed again.
    pub filed_complaints: BTreeSet<BureauId>,
    /// Bureaus whose portal dispute is already on file; never filed again.
    pub filed_portals: BTreeSet<BureauId>,
}

impl RunOptions {
    /// Skip every target the durable checkpoints already show as filed, and
    /// every stage left with nothing to do.
    pub fn resume(timeline: &Timeline, case: &DisputeCase) -> Self {
        let bureaus = &case.item.reporting_bureaus;
        let variant = DisputeVariant::from(case.kind());
        let filed = |field: fn(BureauId) -> TimelineField| -> BTreeSet<BureauId> {
            bureaus
                .iter()
                .copied()
                .filter(|bureau| timeline.has(field(*bureau)))
                .collect()
        };
        let filed_complaints = filed(TimelineField::ComplaintFiledAt);
        let filed_portals = filed(TimelineField::BureauFiledAt);
        Self {
            skip_report: timeline.has(TimelineField::ReportFiledAt),
            skip_complaints: filed_complaints.len() == bureaus.len(),
            skip_bureaus: !variant.includes_bureau_portals()
                || filed_portals.len() == bureaus.len(),
            bureaus: None,
            filed_complaints,
            filed_portals,
        }
    }

    fn targets<'a>(&'a self, case: &'a DisputeCase) -> impl Iterator<Item = BureauId> + 'a {
        case.item
            .reporting_bureaus
            .iter()
            .copied()
            .filter(|bureau| {
                self.bureaus
                    .as_ref()
                    .is_none_or(|allowed| allowed.contains(bureau))
            })
    }

    fn complaint_targets(&self, case: &DisputeCase) -> Vec<BureauId> {
        self.targets(case)
            .filter(|bureau| !self.filed_complaints.contains(bureau))
            .collect()
    }

    fn portal_targets(&self, case: &DisputeCase) -> Vec<BureauId> {
        self.targets(case)
            .filter(|bureau| !self.filed_portals.contains(bureau))
            .collect()
    }
}

/// Another run currently holds the case lease.
#[derive(Debug, thiserror::Error)]
#[error("case {case_id} already has a dispute run in progress (RUN_IN_PROGRESS)")]
pub struct RunInProgress {
    pub case_id: String,
}

/// An orchestrator-level failure. Carries the status as it stood when the
/// run stopped, including every step result collected so far.
#[derive(Debug, thiserror::Error)]
#[error("dispute run for case {case_id} aborted during {state}: {cause:#}")]
pub struct RunAborted {
    pub case_id: String,
    pub state: RunState,
    pub status: Box<DisputeStatus>,
    pub cause: anyhow::Error,
}

impl RunAborted {
    pub fn is_run_in_progress(&self) -> bool {
        self.cause.downcast_ref::<RunInProgress>().is_some()
    }
}

pub struct Orchestrator {
    ctx: ExecutorContext,
    variant: DisputeVariant,
}

impl Orchestrator {
    pub fn new(ctx: ExecutorContext, variant: DisputeVariant) -> Self {
        Self { ctx, variant }
    }

    pub fn account(ctx: ExecutorContext) -> Self {
        Self::new(ctx, DisputeVariant::Account)
    }

    pub fn inquiry(ctx: ExecutorContext) -> Self {
        Self::new(ctx, DisputeVariant::Inquiry)
    }

    /// Pick the variant matching the case's item kind.
    pub fn for_case(ctx: ExecutorContext, case: &DisputeCase) -> Self {
        Self::new(ctx, DisputeVariant::from(case.kind()))
    }

    pub fn variant(&self) -> DisputeVariant {
        self.variant
    }

    pub async fn run_full_dispute(
        &self,
        case: &DisputeCase,
        options: &RunOptions,
    ) -> Result<DisputeStatus, RunAborted> {
        if let Err(cause) = self.check_variant(case) {
            return Err(self.reject(case, cause));
        }
        let lease = match self.acquire_lease(case).await {
            Ok(lease) => lease,
            Err(cause) => return Err(self.reject(case, cause)),
        };

        let mut status = DisputeStatus::new(&case.case_id, self.variant);
        let outcome = match self.run_stages(case, options, &mut status).await {
            Ok(()) => Ok(status),
            Err(cause) => Err(self.abort(status, cause).await),
        };

        if let Err(err) = self.ctx.store.release_lease(&lease).await {
            tracing::warn!(case_id = %case.case_id, error = ?err, "failed to release case lease");
        }
        outcome
    }

    pub async fn run_report_only(&self, case: &DisputeCase) -> Result<DisputeStatus, RunAborted> {
        let options = RunOptions {
            skip_complaints: true,
            skip_bureaus: true,
            ..RunOptions::default()
        };
        self.run_full_dispute(case, &options).await
    }

    /// File the complaint about one bureau, reusing the report reference
    /// already on the timeline.
    pub async fn run_complaint_only(
        &self,
        case: &DisputeCase,
        bureau: BureauId,
    ) -> Result<DisputeStatus, RunAborted> {
        if let Err(cause) = ensure_reporting(case, bureau) {
            return Err(self.reject(case, cause));
        }
        let options = RunOptions {
            skip_report: true,
            skip_bureaus: true,
            bureaus: Some(BTreeSet::from([bureau])),
            ..RunOptions::default()
        };
        self.run_full_dispute(case, &options).await
    }

    /// File on one bureau portal. Account disputes only.
    pub async fn run_bureau_only(
        &self,
        case: &DisputeCase,
        bureau: BureauId,
    ) -> Result<DisputeStatus, RunAborted> {
        let check = if self.variant.includes_bureau_portals() {
            ensure_reporting(case, bureau)
        } else {
            Err(anyhow!("{} disputes are not filed on bureau portals", self.variant))
        };
        if let Err(cause) = check {
            return Err(self.reject(case, cause));
        }
        let options = RunOptions {
            skip_report: true,
            skip_complaints: true,
            bureaus: Some(BTreeSet::from([bureau])),
            ..RunOptions::default()
        };
        self.run_full_dispute(case, &options).await
    }

    /// Record that a bureau closed its dispute, lifting a single-outstanding block.
    pub async fn mark_bureau_resolved(&self, case_id: &str, bureau: BureauId) -> Result<()> {
        self.ctx
            .store
            .save_checkpoint(
                case_id,
                TimelineField::BureauResolvedAt(bureau),
                &now_epoch_ms().to_string(),
            )
            .await?;
        tracing::info!(case_id, %bureau, "bureau dispute marked resolved");
        Ok(())
    }

    async fn acquire_lease(&self, case: &DisputeCase) -> Result<Lease> {
        let holder = format!("pid{}-{}", std::process::id(), now_epoch_ms());
        match self.ctx.store.acquire_lease(&case.case_id, &holder).await? {
            Some(lease) => Ok(lease),
            None => Err(RunInProgress {
                case_id: case.case_id.clone(),
            }
            .into()),
        }
    }

    async fn run_stages(
        &self,
        case: &DisputeCase,
        options: &RunOptions,
        status: &mut DisputeStatus,
    ) -> Result<()> {
        let case_id = case.case_id.as_str();
        let store = &self.ctx.store;
        let settings = &self.ctx.settings;
        store
            .save_checkpoint(
                case_id,
                TimelineField::OrchestrationStartedAt,
                &now_epoch_ms().to_string(),
            )
            .await?;
        let timeline = store.load_timeline(case_id).await?;
        let complaint_targets = options.complaint_targets(case);
        let portal_targets = if self.variant.includes_bureau_portals() && !options.skip_bureaus {
            options.portal_targets(case)
        } else {
            Vec::new()
        };
        tracing::info!(
            case_id,
            variant = %self.variant,
            complaints = complaint_targets.len(),
            portals = portal_targets.len(),
            "dispute run started"
        );

        let mut report_reference = timeline.report_reference().map(str::to_string);
        if !options.skip_report {
            self.enter(case_id, status, RunState::Report).await?;
            let mut filer = ReportFiler::new(self.ctx.clone(), case_id);
            let result = filer.file_report(case).await?;
            if let Some(code) = result.confirmation_code() {
                report_reference = Some(code.to_string());
            }
            if !result.success() {
                tracing::warn!(
                    case_id,
                    error = result.error().unwrap_or_default(),
                    "report failed; continuing"
                );
            }
            status.record_report(result);
        }

        if !options.skip_complaints && !complaint_targets.is_empty() {
            self.enter(case_id, status, RunState::Complaints).await?;
            let mut filer = ComplaintFiler::new(self.ctx.clone(), case_id);
            let results = filer
                .file_for_all_bureaus(
                    case,
                    &complaint_targets,
                    report_reference.as_deref(),
                    settings.inter_target_delay(),
                )
                .await?;
            for (bureau, result) in results {
                status.record_complaint(bureau, result);
            }
        }

        if !portal_targets.is_empty() {
            self.enter(case_id, status, RunState::BureauPortals).await?;
            for (index, bureau) in portal_targets.iter().copied().enumerate() {
                if index > 0 {
                    self.ctx.pause(settings.inter_target_delay()).await;
                }
                self.check_cancelled()?;
                let mut filer = BureauPortalFiler::new(self.ctx.clone(), case_id, bureau);
                let result = filer
                    .file_dispute(case, report_reference.as_deref())
                    .await?;
                if !result.success() {
                    tracing::warn!(
                        case_id,
                        %bureau,
                        code = ?result.error_code(),
                        "bureau dispute not filed; continuing"
                    );
                }
                status.record_bureau(bureau, result)?;
            }
        }

        self.check_cancelled()?;
        status.complete()?;
        store
            .save_checkpoint(
                case_id,
                TimelineField::OrchestrationState,
                RunState::Complete.as_str(),
            )
            .await?;
        store
            .save_checkpoint(
                case_id,
                TimelineField::OrchestrationCompletedAt,
                &now_epoch_ms().to_string(),
            )
            .await?;
        tracing::info!(
            case_id,
            attempted = status.attempted(),
            succeeded = status.succeeded(),
            complete = status.is_complete(),
            "dispute run finished"
        );
        Ok(())
    }

    async fn enter(
        &self,
        case_id: &str,
        status: &mut DisputeStatus,
        state: RunState,
    ) -> Result<()> {
        self.check_cancelled()?;
        status.advance(state)?;
        self.ctx
            .store
            .save_checkpoint(case_id, TimelineField::OrchestrationState, state.as_str())
            .await?;
        tracing::info!(case_id, stage = %state, "stage started");
        Ok(())
    }

    fn check_variant(&self, case: &DisputeCase) -> Result<()> {
        ensure!(
            DisputeVariant::from(case.kind()) == self.variant,
            "case {} is an {} dispute but the orchestrator handles {} disputes",
            case.case_id,
            case.kind(),
            self.variant
        );
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.ctx.cancel.is_cancelled() {
            bail!("run cancelled");
        }
        Ok(())
    }

    /// Refuse a run before it takes the lease. The timeline belongs to whichever
    /// run last held the case and is left untouched.
    fn reject(&self, case: &DisputeCase, cause: anyhow::Error) -> RunAborted {
        let mut status = DisputeStatus::new(&case.case_id, self.variant);
        let state = status.current_step();
        let message = format!("{cause:#}");
        tracing::warn!(case_id = %case.case_id, error = %message, "dispute run refused");
        status.fail(message);
        RunAborted {
            case_id: case.case_id.clone(),
            state,
            status: Box::new(status),
            cause,
        }
    }

    /// Mark a leased run failed and record the error on the timeline when the
    /// store allows it.
    async fn abort(&self, mut status: DisputeStatus, cause: anyhow::Error) -> RunAborted {
        let case_id = status.case_id().to_string();
        let state = status.current_step();
        let message = format!("{cause:#}");
        status.fail(message.as_str());
        tracing::error!(
            case_id = %case_id,
            stage = %state,
            error = %message,
            "dispute run aborted"
        );

        let writes = [
            (TimelineField::OrchestrationState, RunState::Failed.as_str()),
            (TimelineField::OrchestrationError, message.as_str()),
        ];
        for (field, value) in writes {
            if let Err(err) = self.ctx.store.save_checkpoint(&case_id, field, value).await {
                tracing::warn!(
                    case_id = %case_id,
                    field = %field,
                    error = ?err,
                    "could not record run failure"
                );
            }
        }

        RunAborted {
            case_id,
            state,
            status: Box::new(status),
            cause,
        }
    }
}

fn ensure_reporting(case: &DisputeCase, bureau: BureauId) -> Result<()> {
    ensure!(
        case.item.reporting_bureaus.contains(&bureau),
        "{bureau} is not reporting the disputed item for case {}",
        case.case_id
    );
    Ok(())
}
