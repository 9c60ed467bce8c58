//! Per-bureau portal descriptors and constraint policies.
//!
//! The three bureau portals share one filing flow; they differ only in where
//! the portal lives, which credentials unlock it, and which submission rule
//! applies.
use crate::case::BureauId;
use serde::{Deserialize, Serialize};

/// Tag form of a constraint policy, carried in step results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Unlimited,
    SingleOutstanding,
    DailyQuota,
}

/// Static submission rule for a bureau portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintPolicy {
    Unlimited,
    /// At most one open dispute; a new one must wait for resolution.
    SingleOutstanding,
    /// Informational quota plus a mandatory phone follow-up.
    DailyQuota {
        per_day: u32,
        follow_up_phone: &'static str,
    },
}

impl ConstraintPolicy {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Unlimited => PolicyKind::Unlimited,
            Self::SingleOutstanding => PolicyKind::SingleOutstanding,
            Self::DailyQuota { .. } => PolicyKind::DailyQuota,
        }
    }

    /// Whether the portal must be asked about open disputes before filing.
    pub fn requires_active_dispute_check(&self) -> bool {
        matches!(self, Self::SingleOutstanding)
    }

    pub fn quota_note(&self, bureau: BureauId) -> Option<String> {
        match self {
            Self::DailyQuota { per_day, .. } => Some(format!(
                "{bureau} accepts at most {per_day} online disputes per day; additional items must wait until tomorrow"
            )),
            _ => None,
        }
    }

    pub fn follow_up_phone(&self) -> Option<&'static str> {
        match self {
            Self::DailyQuota {
                follow_up_phone, ..
            } => Some(follow_up_phone),
            _ => None,
        }
    }
}

/// Describes one bureau's dispute portal.
pub trait BureauPortal: Send + Sync {
    fn bureau(&self) -> BureauId;

    fn default_portal_url(&self) -> &'static str;

    fn policy(&self) -> ConstraintPolicy;

    /// Key into the credential table; matches `BureauId::key` unless overridden.
    fn credential_key(&self) -> &'static str {
        self.bureau().key()
    }
}

pub struct EquifaxPortal;

impl BureauPortal for EquifaxPortal {
    fn bureau(&self) -> BureauId {
        BureauId::Equifax
    }

    fn default_portal_url(&self) -> &'static str {
        "https://www.equifax.com/personal/credit-report-services/credit-dispute/"
    }

    fn policy(&self) -> ConstraintPolicy {
        ConstraintPolicy::Unlimited
    }
}

pub struct ExperianPortal;

impl BureauPortal for ExperianPortal {
    fn bureau(&self) -> BureauId {
        BureauId::Experian
    }

    fn default_portal_url(&self) -> &'static str {
        "https://www.experian.com/disputes/main.html"
    }

    fn policy(&self) -> ConstraintPolicy {
        ConstraintPolicy::SingleOutstanding
    }
}

pub struct TransUnionPortal;

impl BureauPortal for TransUnionPortal {
    fn bureau(&self) -> BureauId {
        BureauId::TransUnion
    }

    fn default_portal_url(&self) -> &'static str {
        "https://dispute.transunion.com/"
    }

    fn policy(&self) -> ConstraintPolicy {
        ConstraintPolicy::DailyQuota {
            per_day: 3,
            follow_up_phone: "1-800-916-8800",
        }
    }
}

pub fn portal_for(bureau: BureauId) -> Box<dyn BureauPortal> {
    match bureau {
        BureauId::Equifax => Box::new(EquifaxPortal),
        BureauId::Experian => Box::new(ExperianPortal),
        BureauId::TransUnion => Box::new(TransUnionPortal),
    }
}
