//! Runtime settings.
//!
//! Settings come from `config.json` (explicit path, else the data directory),
//! then environment overrides. Validation runs once at load so the orchestrator
//! never sees a half-configured agent.
use crate::case::BureauId;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current schema version for config.json.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

pub const ENV_AGENT_COMMAND: &str = "DFILE_AGENT_COMMAND";
pub const ENV_DATA_DIR: &str = "DFILE_DATA_DIR";

const DEFAULT_AGENT_COMMAND: &str = "browser-agent --json";
const DEFAULT_REPORT_URL: &str = "https://www.identitytheft.gov/";
const DEFAULT_COMPLAINT_URL: &str = "https://www.consumerfinance.gov/complaint/";
const DEFAULT_LEASE_TTL_SECS: u64 = 12 * 60 * 60;

fn default_lease_ttl_secs() -> u64 {
    DEFAULT_LEASE_TTL_SECS
}

/// Portal URL overrides; unset bureaus use their built-in portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalUrls {
    pub report: String,
    pub complaint: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bureaus: BTreeMap<BureauId, String>,
}

impl Default for PortalUrls {
    fn default() -> Self {
        Self {
            report: DEFAULT_REPORT_URL.to_string(),
            complaint: DEFAULT_COMPLAINT_URL.to_string(),
            bureaus: BTreeMap::new(),
        }
    }
}

/// Login for one bureau portal.
#[derive(Clone, Serialize, Deserialize)]
pub struct PortalCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub schema_version: u32,
    /// Agent command line, split with shell-words.
    pub agent_command: String,
    /// Step budget handed to the agent for each sub-instruction.
    pub max_steps: u32,
    pub task_timeout_secs: u64,
    /// Pause between consecutive targets within one stage.
    pub inter_target_delay_secs: u64,
    /// Age after which a case lease is assumed abandoned by a crashed run.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    #[serde(default)]
    pub portals: PortalUrls,
    /// Keyed by credential key (`equifax`, `experian`, `transunion`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, PortalCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            agent_command: DEFAULT_AGENT_COMMAND.to_string(),
            max_steps: 25,
            task_timeout_secs: 600,
            inter_target_delay_secs: 45,
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
            portals: PortalUrls::default(),
            credentials: BTreeMap::new(),
            data_dir: None,
        }
    }
}

impl Settings {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn inter_target_delay(&self) -> Duration {
        Duration::from_secs(self.inter_target_delay_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Resolved data directory; `resolve_data_dir` fills it at load time.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".dispute-filer"))
    }

    pub fn bureau_url(&self, bureau: BureauId, default_url: &str) -> String {
        self.portals
            .bureaus
            .get(&bureau)
            .cloned()
            .unwrap_or_else(|| default_url.to_string())
    }

    /// Look up portal credentials, preferring `DFILE_<KEY>_USERNAME`/`_PASSWORD`.
    pub fn credentials_for(&self, key: &str) -> Option<PortalCredentials> {
        let env_key = key.to_ascii_uppercase();
        let username = env::var(format!("DFILE_{env_key}_USERNAME")).ok();
        let password = env::var(format!("DFILE_{env_key}_PASSWORD")).ok();
        if let (Some(username), Some(password)) = (username, password) {
            return Some(PortalCredentials { username, password });
        }
        self.credentials
            .get(key)
            .filter(|creds| !creds.username.trim().is_empty() && !creds.password.is_empty())
            .cloned()
    }
}

/// Default data directory: `~/.local/share/dispute-filer` (platform equivalent).
pub fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(base.join("dispute-filer"))
}

/// Load settings from an explicit path, the data directory, or defaults.
pub fn load_settings(explicit: Option<&Path>, data_dir: Option<&Path>) -> Result<Settings> {
    let data_dir = resolve_data_dir(data_dir)?;
    let mut settings = match explicit {
        Some(path) => read_settings(path)?,
        None => {
            let candidate = data_dir.join("config.json");
            if candidate.is_file() {
                read_settings(&candidate)?
            } else {
                Settings::default()
            }
        }
    };
    if let Ok(command) = env::var(ENV_AGENT_COMMAND) {
        if !command.trim().is_empty() {
            settings.agent_command = command;
        }
    }
    if settings.data_dir.is_none() {
        settings.data_dir = Some(data_dir);
    }
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(path) = env::var(ENV_DATA_DIR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    default_data_dir()
}

fn read_settings(path: &Path) -> Result<Settings> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let settings: Settings = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    Ok(settings)
}

/// Persist settings in a stable JSON format.
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create config dir")?;
    }
    let text = serde_json::to_string_pretty(settings).context("serialize config")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            settings.schema_version
        ));
    }
    if settings.agent_command.trim().is_empty() {
        return Err(anyhow!("agent_command must be non-empty"));
    }
    shell_words::split(&settings.agent_command)
        .with_context(|| format!("parse agent_command: {}", settings.agent_command))?;
    if settings.max_steps == 0 {
        return Err(anyhow!("max_steps must be at least 1"));
    }
    if settings.task_timeout_secs == 0 {
        return Err(anyhow!("task_timeout_secs must be at least 1"));
    }
    if settings.lease_ttl_secs < settings.task_timeout_secs {
        return Err(anyhow!(
            "lease_ttl_secs ({}) must be at least task_timeout_secs ({})",
            settings.lease_ttl_secs,
            settings.task_timeout_secs
        ));
    }
    for (key, creds) in &settings.credentials {
        if creds.username.trim().is_empty() {
            return Err(anyhow!("credentials.{key}.username must be non-empty"));
        }
    }
    Ok(())
}
