//! Dispute case inputs.
//!
//! A case pairs one disputed item with the consumer it belongs to. Cases are
//! immutable for the lifetime of a run; every filing reads from the same
//! snapshot.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Credit bureaus that can report a disputed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BureauId {
    Equifax,
    Experian,
    #[serde(alias = "trans_union")]
    TransUnion,
}

impl BureauId {
    pub const ALL: [BureauId; 3] = [BureauId::Equifax, BureauId::Experian, BureauId::TransUnion];

    /// Stable lower-case key used in timeline fields and credential lookup.
    pub fn key(self) -> &'static str {
        match self {
            Self::Equifax => "equifax",
            Self::Experian => "experian",
            Self::TransUnion => "transunion",
        }
    }
}

impl fmt::Display for BureauId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equifax => write!(f, "Equifax"),
            Self::Experian => write!(f, "Experian"),
            Self::TransUnion => write!(f, "TransUnion"),
        }
    }
}

impl FromStr for BureauId {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|ch| !matches!(ch, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "equifax" => Ok(Self::Equifax),
            "experian" => Ok(Self::Experian),
            "transunion" => Ok(Self::TransUnion),
            _ => Err(anyhow!(
                "unknown bureau {raw:?} (expected equifax, experian, or transunion)"
            )),
        }
    }
}

/// Whether the item is a fraudulent tradeline or an unauthorized inquiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Account,
    Inquiry,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account => write!(f, "account"),
            Self::Inquiry => write!(f, "inquiry"),
        }
    }
}

/// The account or inquiry being disputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputedItem {
    pub kind: ItemKind,
    pub creditor_name: String,
    /// Partial or masked account/inquiry reference as shown on the report.
    pub reference_number: String,
    pub item_type: String,
    pub opened_or_inquiry_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    pub reporting_bureaus: BTreeSet<BureauId>,
}

impl DisputedItem {
    /// One-line description used in agent instructions and logs.
    pub fn describe(&self) -> String {
        let mut text = format!(
            "{} {} from {} (ref {}, dated {})",
            self.kind,
            self.item_type,
            self.creditor_name,
            self.reference_number,
            self.opened_or_inquiry_date
        );
        if let Some(balance) = self.balance {
            text.push_str(&format!(", balance ${balance:.2}"));
        }
        text
    }
}

/// Subject information entered on the identity-theft report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerProfile {
    pub full_name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A single disputed item together with its owning consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeCase {
    pub case_id: String,
    pub consumer: ConsumerProfile,
    pub item: DisputedItem,
}

impl DisputeCase {
    pub fn kind(&self) -> ItemKind {
        self.item.kind
    }
}

/// Case ids name directories under the data dir, so they are restricted to
/// ASCII letters, digits, `-` and `_`.
pub fn validate_case_id(case_id: &str) -> Result<()> {
    if case_id.trim().is_empty() {
        return Err(anyhow!("case_id must be non-empty"));
    }
    if case_id
        .chars()
        .any(|ch| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'))
    {
        return Err(anyhow!(
            "case_id {case_id:?} may only contain ASCII letters, digits, '-' and '_'"
        ));
    }
    Ok(())
}

/// Load a case from a JSON file and check the fields every filing relies on.
pub fn load_case(path: &Path) -> Result<DisputeCase> {
    let bytes = std::fs::read(path).with_context(|| format!("read case {}", path.display()))?;
    let case: DisputeCase = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse case JSON {}", path.display()))?;
    validate_case(&case)?;
    Ok(case)
}

pub fn validate_case(case: &DisputeCase) -> Result<()> {
    validate_case_id(&case.case_id)?;
    if case.item.creditor_name.trim().is_empty() {
        return Err(anyhow!("item.creditor_name must be non-empty"));
    }
    if case.item.reporting_bureaus.is_empty() {
        return Err(anyhow!("item.reporting_bureaus must name at least one bureau"));
    }
    if case.consumer.full_name.trim().is_empty() {
        return Err(anyhow!("consumer.full_name must be non-empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_case() -> DisputeCase {
        DisputeCase {
            case_id: "case-1".to_string(),
            consumer: ConsumerProfile {
                full_name: "Jordan Reyes".to_string(),
                address: "12 Elm St, Springfield".to_string(),
                date_of_birth: None,
                phone: None,
                email: None,
            },
            item: DisputedItem {
                kind: ItemKind::Account,
                creditor_name: "Acme Card".to_string(),
                reference_number: "XXXX1234".to_string(),
                item_type: "credit card".to_string(),
                opened_or_inquiry_date: "2024-03-01".to_string(),
                balance: Some(1250.0),
                reporting_bureaus: [BureauId::Equifax].into_iter().collect(),
            },
        }
    }

    #[test]
    fn bureau_parsing_is_lenient() {
        assert_eq!("TransUnion".parse::<BureauId>().unwrap(), BureauId::TransUnion);
        assert_eq!("trans_union".parse::<BureauId>().unwrap(), BureauId::TransUnion);
        assert_eq!(" EXPERIAN ".parse::<BureauId>().unwrap(), BureauId::Experian);
        assert!("innovis".parse::<BureauId>().is_err());
    }

    #[test]
    fn case_json_uses_lowercase_bureaus() {
        let json = serde_json::to_value(sample_case()).unwrap();
        assert_eq!(json["item"]["reporting_bureaus"][0], "equifax");
        assert_eq!(json["item"]["kind"], "account");
    }

    #[test]
    fn validate_rejects_path_like_case_ids() {
        let mut case = sample_case();
        case.case_id = "../etc".to_string();
        assert!(validate_case(&case).is_err());
    }

    #[test]
    fn case_id_check_rejects_separators_and_dots() {
        assert!(validate_case_id("case-7_b").is_ok());
        for bad in ["", "  ", "..", "a/b", "a\\b", "../../x", "c.json"] {
            assert!(validate_case_id(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn validate_requires_a_reporting_bureau() {
        let mut case = sample_case();
        case.item.reporting_bureaus.clear();
        let err = validate_case(&case).unwrap_err();
        assert!(err.to_string().contains("reporting_bureaus"));
    }

    #[test]
    fn describe_includes_balance() {
        let text = sample_case().item.describe();
        assert!(text.contains("Acme Card"));
        assert!(text.contains("$1250.00"));
    }
}
