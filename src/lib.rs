//! Multi-agency dispute filing.
//!
//! Files an identity-theft report, regulator complaints and credit-bureau
//! portal disputes for one disputed item, delegating every portal interaction
//! to an external browser agent.
pub mod agent;
pub mod case;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod policy;
pub mod status;
pub mod step;
pub mod store;
pub mod templates;
