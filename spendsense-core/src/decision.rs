//! Final per-message decision and the audit trail for rule overrides

use serde::{Deserialize, Serialize};

/// Which signal produced the final category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionSource {
    Model,
    HybridRule,
}

impl PredictionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionSource::Model => "MODEL",
            PredictionSource::HybridRule => "HYBRID_RULE",
        }
    }
}

pub const MERCHANT_PRIMARY_CATEGORY: &str = "merchant_primary_category";

/// Registry rule that replaced the model's category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedRule {
    pub reason: String,
    pub merchant_id: String,
    pub merchant_name: String,
    pub merchant_category_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    /// `None` when the model label has no id mapping
    pub final_category_id: Option<String>,
    pub final_confidence: f64,
    pub source: PredictionSource,
    pub applied_rule: Option<AppliedRule>,
}

impl Decision {
    pub fn is_override(&self) -> bool {
        self.source == PredictionSource::HybridRule
    }
}

/// Evidence for a HYBRID_RULE decision. Never built for MODEL decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub merchant_id: String,
    pub merchant_name: String,
    pub rule: AppliedRule,
    /// Raw classifier confidence of the overridden primary label
    pub model_confidence: f64,
    pub rule_confidence: f64,
    pub resulting_category_id: Option<String>,
    pub prediction_source: PredictionSource,
}
