//! File-backed case store.
//!
//! Layout under the data directory:
//!
//! ```text
//! cases/<case_id>/timeline.json      checkpoint map, rewritten atomically
//! cases/<case_id>/runs/<run_id>.json one file per run record
//! cases/<case_id>/lease.json         present while a run holds the case
//! ```
//!
//! A lease older than the configured TTL, or one that cannot be parsed, is
//! treated as left behind by a crashed run and reclaimed by the next acquirer.
//!
//! Filesystem work runs on the blocking pool so the orchestrator's task is
//! never parked on disk I/O.
use super::{
    now_epoch_ms, CaseStore, Lease, NewRunRecord, RunRecord, RunStatus, RunUpdate, Timeline,
    TimelineField,
};
use crate::case::validate_case_id;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const TIMELINE_FILE: &str = "timeline.json";
const LEASE_FILE: &str = "lease.json";
const RUNS_DIR: &str = "runs";

/// Default age after which a lease counts as abandoned.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone)]
pub struct FileCaseStore {
    root: PathBuf,
    lease_ttl: Duration,
    sequence: Arc<AtomicU64>,
    write_lock: Arc<Mutex<()>>,
}

impl FileCaseStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into(),
            lease_ttl: DEFAULT_LEASE_TTL,
            sequence: Arc::new(AtomicU64::new(0)),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Directory for one case. Rejects ids that would leave `cases/`.
    pub fn case_dir(&self, case_id: &str) -> Result<PathBuf> {
        validate_case_id(case_id)?;
        Ok(self.root.join("cases").join(case_id))
    }

    fn timeline_path(&self, case_id: &str) -> Result<PathBuf> {
        Ok(self.case_dir(case_id)?.join(TIMELINE_FILE))
    }

    fn lease_path(&self, case_id: &str) -> Result<PathBuf> {
        Ok(self.case_dir(case_id)?.join(LEASE_FILE))
    }

    fn run_path(&self, run_id: &str) -> Result<PathBuf> {
        let case_id = run_id
            .split('.')
            .next()
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| anyhow!("malformed run id {run_id:?}"))?;
        Ok(self
            .case_dir(case_id)?
            .join(RUNS_DIR)
            .join(format!("{run_id}.json")))
    }

    fn next_run_id(&self, record: &NewRunRecord) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let target: String = record
            .target
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        format!(
            "{}.{}.{}.{}.{}",
            record.case_id,
            record.kind,
            target,
            now_epoch_ms(),
            seq
        )
    }
}

#[async_trait]
impl CaseStore for FileCaseStore {
    async fn load_timeline(&self, case_id: &str) -> Result<Timeline> {
        let path = self.timeline_path(case_id)?;
        blocking(move || Ok(read_json_optional::<Timeline>(&path)?.unwrap_or_default())).await
    }

    async fn save_checkpoint(
        &self,
        case_id: &str,
        field: TimelineField,
        value: &str,
    ) -> Result<()> {
        let path = self.timeline_path(case_id)?;
        let _guard = self.write_lock.lock().await;
        let value = value.to_string();
        blocking(move || {
            let mut timeline = read_json_optional::<Timeline>(&path)?.unwrap_or_default();
            timeline.set(field, value);
            write_json_atomic(&path, &timeline)
        })
        .await
    }

    async fn create_run_record(&self, record: NewRunRecord) -> Result<String> {
        let run_id = self.next_run_id(&record);
        let path = self.run_path(&run_id)?;
        let now = now_epoch_ms();
        let row = RunRecord {
            run_id: run_id.clone(),
            case_id: record.case_id,
            kind: record.kind,
            target: record.target,
            status: RunStatus::Pending,
            confirmation_code: None,
            error: None,
            error_code: None,
            created_at_epoch_ms: now,
            updated_at_epoch_ms: now,
        };
        let _guard = self.write_lock.lock().await;
        blocking(move || write_json_atomic(&path, &row)).await?;
        Ok(run_id)
    }

    async fn update_run_record(&self, run_id: &str, update: RunUpdate) -> Result<()> {
        let path = self.run_path(run_id)?;
        let run_id = run_id.to_string();
        let _guard = self.write_lock.lock().await;
        blocking(move || {
            let mut row: RunRecord = read_json_optional(&path)?
                .ok_or_else(|| anyhow!("run record {run_id} not found"))?;
            if row.status.is_terminal() {
                return Err(anyhow!(
                    "run record {run_id} is already {}; refusing move to {}",
                    row.status,
                    update.status
                ));
            }
            row.status = update.status;
            if update.confirmation_code.is_some() {
                row.confirmation_code = update.confirmation_code;
            }
            if update.error.is_some() {
                row.error = update.error;
            }
            if update.error_code.is_some() {
                row.error_code = update.error_code;
            }
            row.updated_at_epoch_ms = now_epoch_ms();
            write_json_atomic(&path, &row)
        })
        .await
    }

    async fn list_run_records(&self, case_id: &str) -> Result<Vec<RunRecord>> {
        let dir = self.case_dir(case_id)?.join(RUNS_DIR);
        blocking(move || {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(err).with_context(|| format!("read {}", dir.display())),
            };
            let mut rows = Vec::new();
            for entry in entries {
                let path = entry.with_context(|| format!("read {}", dir.display()))?.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                if let Some(row) = read_json_optional::<RunRecord>(&path)? {
                    rows.push(row);
                }
            }
            rows.sort_by(|a, b| {
                a.created_at_epoch_ms
                    .cmp(&b.created_at_epoch_ms)
                    .then_with(|| a.run_id.cmp(&b.run_id))
            });
            Ok(rows)
        })
        .await
    }

    async fn acquire_lease(&self, case_id: &str, holder: &str) -> Result<Option<Lease>> {
        let path = self.lease_path(case_id)?;
        let ttl = self.lease_ttl;
        let lease = Lease {
            case_id: case_id.to_string(),
            holder: holder.to_string(),
            acquired_at_epoch_ms: now_epoch_ms(),
        };
        blocking(move || {
            if create_lease(&path, &lease)? {
                return Ok(Some(lease));
            }
            let now = now_epoch_ms();
            match read_lease(&path)? {
                LeaseFile::Held(current) if !lease_expired(&current, ttl, now) => return Ok(None),
                LeaseFile::Held(current) => tracing::warn!(
                    case_id = %lease.case_id,
                    holder = %current.holder,
                    age_secs = now.saturating_sub(current.acquired_at_epoch_ms) / 1000,
                    "reclaiming expired case lease"
                ),
                LeaseFile::Unreadable => tracing::warn!(
                    case_id = %lease.case_id,
                    "reclaiming unreadable case lease"
                ),
                LeaseFile::Missing => {}
            }
            remove_if_present(&path)?;
            Ok(create_lease(&path, &lease)?.then_some(lease))
        })
        .await
    }

    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        let path = self.lease_path(&lease.case_id)?;
        let lease = lease.clone();
        blocking(move || match read_lease(&path)? {
            LeaseFile::Held(current) if current.holder != lease.holder => Err(anyhow!(
                "lease on {} is held by {}, not {}",
                lease.case_id,
                current.holder,
                lease.holder
            )),
            LeaseFile::Held(_) | LeaseFile::Unreadable => remove_if_present(&path),
            LeaseFile::Missing => Ok(()),
        })
        .await
    }

    async fn break_lease(&self, case_id: &str) -> Result<Option<String>> {
        let path = self.lease_path(case_id)?;
        blocking(move || {
            let holder = match read_lease(&path)? {
                LeaseFile::Missing => return Ok(None),
                LeaseFile::Held(current) => current.holder,
                LeaseFile::Unreadable => "<unreadable>".to_string(),
            };
            remove_if_present(&path)?;
            Ok(Some(holder))
        })
        .await
    }
}

enum LeaseFile {
    Missing,
    Unreadable,
    Held(Lease),
}

fn read_lease(path: &Path) -> Result<LeaseFile> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(LeaseFile::Missing),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    Ok(match serde_json::from_slice(&bytes) {
        Ok(lease) => LeaseFile::Held(lease),
        Err(_) => LeaseFile::Unreadable,
    })
}

fn lease_expired(lease: &Lease, ttl: Duration, now_epoch_ms: u64) -> bool {
    let age_ms = now_epoch_ms.saturating_sub(lease.acquired_at_epoch_ms);
    u128::from(age_ms) > ttl.as_millis()
}

/// Publish the lease with a no-clobber rename so readers never see a
/// half-written file. `Ok(false)` when a lease already exists.
fn create_lease(path: &Path, lease: &Lease) -> Result<bool> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("no parent directory for {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let text = serde_json::to_string_pretty(lease).context("serialize lease")?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(text.as_bytes())
        .with_context(|| format!("write temp lease for {}", path.display()))?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.error).with_context(|| format!("persist {}", path.display())),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("join blocking store task")?
}

fn read_json_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse JSON {}", path.display()))?;
    Ok(Some(value))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("no parent directory for {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    let text = serde_json::to_string_pretty(value).context("serialize record")?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(text.as_bytes())
        .with_context(|| format!("write temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}
