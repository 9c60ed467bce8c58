//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dispute_filer::agent::{AgentFactory, AgentOutput, AgentSession, LaunchError, SessionRequest};
use dispute_filer::case::{BureauId, ConsumerProfile, DisputeCase, DisputedItem, ItemKind};
use dispute_filer::config::{PortalCredentials, PortalUrls, Settings};
use dispute_filer::executor::ExecutorContext;
use dispute_filer::store::{
    CaseStore, FileCaseStore, Lease, NewRunRecord, RunRecord, RunUpdate, Timeline, TimelineField,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const REPORT_URL: &str = "https://report.test/start";
pub const COMPLAINT_URL: &str = "https://complaint.test/start";
pub const REPORT_NUMBER: &str = "123456789";

pub fn ok(text: &str) -> AgentOutput {
    AgentOutput {
        success: true,
        raw_output: text.to_string(),
        steps_taken: 4,
    }
}

pub fn gave_up(text: &str) -> AgentOutput {
    AgentOutput {
        success: false,
        raw_output: text.to_string(),
        steps_taken: 25,
    }
}

#[derive(Default)]
struct ScriptState {
    /// First rule whose pattern occurs in the instruction wins.
    rules: Vec<(String, AgentOutput)>,
    instructions: Vec<String>,
    sessions: Vec<SessionRequest>,
    closed: usize,
    missing_program: bool,
    /// Cancel this token when an instruction containing the pattern arrives.
    cancel_on: Option<(String, CancellationToken)>,
}

/// Agent that answers from substring rules and records everything it sees.
#[derive(Clone, Default)]
pub struct ScriptedAgent {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedAgent {
    /// Answers every portal prompt the way a cooperative agent would.
    pub fn cooperative() -> Self {
        let agent = Self::default();
        agent.respond("Report Number:", ok(&format!("Report Number: {REPORT_NUMBER}")));
        agent.respond("Complaint ID:", ok("Complaint ID: 240115-1234567\nSubmitted."));
        agent.respond("ACTIVE_DISPUTE", ok("ACTIVE_DISPUTE: NO"));
        agent.respond("LOGGED_IN", ok("LOGGED_IN"));
        agent.respond("new dispute in the Equifax", ok("Confirmation #: EQ-100200"));
        agent.respond("new dispute in the Experian", ok("Confirmation #: EX-300400"));
        agent.respond("new dispute in the TransUnion", ok("Confirmation #: TU-500600"));
        agent
    }

    /// Add a rule that takes priority over every earlier one.
    pub fn respond(&self, pattern: &str, output: AgentOutput) {
        let mut state = self.state.lock().unwrap();
        state.rules.insert(0, (pattern.to_string(), output));
    }

    pub fn with_missing_program(self) -> Self {
        self.state.lock().unwrap().missing_program = true;
        self
    }

    /// Simulate an interrupt arriving while the agent works on `pattern`.
    pub fn cancel_on(&self, pattern: &str, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on = Some((pattern.to_string(), token));
    }

    pub fn instructions(&self) -> Vec<String> {
        self.state.lock().unwrap().instructions.clone()
    }

    pub fn instructions_containing(&self, needle: &str) -> Vec<String> {
        self.instructions()
            .into_iter()
            .filter(|instruction| instruction.contains(needle))
            .collect()
    }

    pub fn session_urls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .iter()
            .map(|session| session.start_url.clone())
            .collect()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl AgentFactory for ScriptedAgent {
    async fn open_session(
        &self,
        request: SessionRequest,
    ) -> std::result::Result<Box<dyn AgentSession>, LaunchError> {
        let mut state = self.state.lock().unwrap();
        if state.missing_program {
            return Err(LaunchError::Missing("browser-agent not found".to_string()));
        }
        state.sessions.push(request);
        Ok(Box::new(ScriptedSession {
            state: self.state.clone(),
        }))
    }
}

struct ScriptedSession {
    state: Arc<Mutex<ScriptState>>,
}

#[async_trait]
impl AgentSession for ScriptedSession {
    async fn run_task(&mut self, instruction: &str, _max_steps: u32) -> Result<AgentOutput> {
        let mut state = self.state.lock().unwrap();
        state.instructions.push(instruction.to_string());
        if let Some((pattern, token)) = &state.cancel_on {
            if instruction.contains(pattern.as_str()) {
                token.cancel();
            }
        }
        let output = state
            .rules
            .iter()
            .find(|(pattern, _)| instruction.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| ok("Done."));
        Ok(output)
    }

    async fn capture_screenshot(&mut self, _dest: &Path) -> Result<bool> {
        Ok(false)
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

enum Failure {
    Checkpoint(String),
    RunFinish,
}

/// File store that fails one kind of write.
pub struct FailingStore {
    inner: FileCaseStore,
    failure: Failure,
}

impl FailingStore {
    /// Fail every write of `field` to the timeline.
    pub fn on_checkpoint(inner: FileCaseStore, field: TimelineField) -> Self {
        Self {
            inner,
            failure: Failure::Checkpoint(field.key()),
        }
    }

    /// Fail every move of a run record to a terminal status.
    pub fn on_run_finish(inner: FileCaseStore) -> Self {
        Self {
            inner,
            failure: Failure::RunFinish,
        }
    }
}

#[async_trait]
impl CaseStore for FailingStore {
    async fn load_timeline(&self, case_id: &str) -> Result<Timeline> {
        self.inner.load_timeline(case_id).await
    }

    async fn save_checkpoint(
        &self,
        case_id: &str,
        field: TimelineField,
        value: &str,
    ) -> Result<()> {
        if let Failure::Checkpoint(key) = &self.failure {
            if field.key() == *key {
                return Err(anyhow!("disk full while writing {key}"));
            }
        }
        self.inner.save_checkpoint(case_id, field, value).await
    }

    async fn create_run_record(&self, record: NewRunRecord) -> Result<String> {
        self.inner.create_run_record(record).await
    }

    async fn update_run_record(&self, run_id: &str, update: RunUpdate) -> Result<()> {
        if matches!(self.failure, Failure::RunFinish) && update.status.is_terminal() {
            return Err(anyhow!("disk full while finishing {run_id}"));
        }
        self.inner.update_run_record(run_id, update).await
    }

    async fn list_run_records(&self, case_id: &str) -> Result<Vec<RunRecord>> {
        self.inner.list_run_records(case_id).await
    }

    async fn acquire_lease(&self, case_id: &str, holder: &str) -> Result<Option<Lease>> {
        self.inner.acquire_lease(case_id, holder).await
    }

    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        self.inner.release_lease(lease).await
    }

    async fn break_lease(&self, case_id: &str) -> Result<Option<String>> {
        self.inner.break_lease(case_id).await
    }
}

/// Scratch data directory plus the collaborators an orchestrator needs.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<FileCaseStore>,
    pub agent: ScriptedAgent,
    pub settings: Settings,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_agent(ScriptedAgent::cooperative())
    }

    pub fn with_agent(agent: ScriptedAgent) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(FileCaseStore::new(dir.path()));
        let settings = test_settings(dir.path());
        Self {
            dir,
            store,
            agent,
            settings,
        }
    }

    pub fn ctx(&self) -> ExecutorContext {
        ExecutorContext::new(
            self.store.clone(),
            Arc::new(self.agent.clone()),
            Arc::new(self.settings.clone()),
        )
    }

    pub fn ctx_with_store(&self, store: Arc<dyn CaseStore>) -> ExecutorContext {
        ExecutorContext::new(
            store,
            Arc::new(self.agent.clone()),
            Arc::new(self.settings.clone()),
        )
    }

    pub async fn timeline(&self, case_id: &str) -> Timeline {
        self.store.load_timeline(case_id).await.expect("load timeline")
    }
}

pub fn test_settings(data_dir: &Path) -> Settings {
    let credentials = BureauId::ALL
        .iter()
        .map(|bureau| {
            (
                bureau.key().to_string(),
                PortalCredentials {
                    username: format!("{}-user", bureau.key()),
                    password: "hunter2".to_string(),
                },
            )
        })
        .collect();
    Settings {
        inter_target_delay_secs: 0,
        portals: PortalUrls {
            report: REPORT_URL.to_string(),
            complaint: COMPLAINT_URL.to_string(),
            bureaus: BTreeMap::new(),
        },
        credentials,
        data_dir: Some(data_dir.to_path_buf()),
        ..Settings::default()
    }
}

pub fn case(case_id: &str, kind: ItemKind, bureaus: &[BureauId]) -> DisputeCase {
    DisputeCase {
        case_id: case_id.to_string(),
        consumer: ConsumerProfile {
            full_name: "Jordan Avery".to_string(),
            address: "400 Harbor Way, Portland, OR 97201".to_string(),
            date_of_birth: Some("1988-04-12".to_string()),
            phone: None,
            email: Some("jordan@example.com".to_string()),
        },
        item: DisputedItem {
            kind,
            creditor_name: "Northwind Bank".to_string(),
            reference_number: "XXXX-7731".to_string(),
            item_type: match kind {
                ItemKind::Account => "credit card".to_string(),
                ItemKind::Inquiry => "hard inquiry".to_string(),
            },
            opened_or_inquiry_date: "2024-03-18".to_string(),
            balance: match kind {
                ItemKind::Account => Some(2450.0),
                ItemKind::Inquiry => None,
            },
            reporting_bureaus: bureaus.iter().copied().collect::<BTreeSet<_>>(),
        },
    }
}
