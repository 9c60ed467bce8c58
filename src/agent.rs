//! Browser-agent contract.
//!
//! The orchestrator never looks inside the agent's browsing state. It hands
//! over one natural-language instruction at a time and reads back
//! `AgentOutput`. Sessions are owned by the executor that opened them and are
//! closed by that executor.
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod command;

pub use command::CommandAgentFactory;

/// Result of one delegated instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub success: bool,
    #[serde(default)]
    pub raw_output: String,
    #[serde(default)]
    pub steps_taken: u32,
}

/// Parameters for opening a session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub session_id: String,
    pub start_url: String,
}

/// Why a session could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The agent program itself is not installed or not resolvable.
    #[error("{0}")]
    Missing(String),
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait AgentSession: Send {
    /// Delegate one instruction. `Err` means the transport failed; an agent
    /// that ran but could not finish reports `success: false` instead.
    async fn run_task(&mut self, instruction: &str, max_steps: u32) -> Result<AgentOutput>;

    /// Write a screenshot of the current page to `dest`. Returns whether a
    /// file was produced.
    async fn capture_screenshot(&mut self, dest: &Path) -> Result<bool>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn open_session(
        &self,
        request: SessionRequest,
    ) -> std::result::Result<Box<dyn AgentSession>, LaunchError>;
}
