//! Merchant registry rows and resolution results

use serde::{Deserialize, Serialize};

/// One row of the externally maintained merchant registry.
///
/// The registry is shared and mutated elsewhere; the pipeline only reads a
/// snapshot of it per batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RegistryEntry {
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default)]
    pub merchant_name: String,
    /// Default category for this merchant, if the registry knows one
    #[serde(default)]
    pub primary_category_id: Option<String>,
    /// How sure the registry is about `primary_category_id` (0.0 - 1.0)
    #[serde(default)]
    pub category_confidence: Option<f64>,
}

impl RegistryEntry {
    pub fn new(merchant_id: impl Into<String>, merchant_name: impl Into<String>) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            merchant_name: merchant_name.into(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category_id: impl Into<String>, confidence: f64) -> Self {
        self.primary_category_id = Some(category_id.into());
        self.category_confidence = Some(confidence);
        self
    }

    /// Registry confidence, treating a missing value as 0.0
    pub fn category_confidence_or_zero(&self) -> f64 {
        self.category_confidence.unwrap_or(0.0)
    }
}

/// Outcome of fuzzy-matching a merchant candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MerchantMatch {
    pub merchant_name: String,
    pub merchant_id: String,
    /// Similarity of the winning entry, 0.0 - 1.0
    pub score: f64,
    /// Lower-cased name or alias string the winner matched on
    pub matched_alias: String,
    /// Registry row behind the winner; `None` when a builtin alias won
    pub matched_record: Option<RegistryEntry>,
    /// Candidate as it came from the normalizer
    pub candidate: String,
    /// Candidate with noise tokens removed
    pub cleaned: String,
    pub tokens: Vec<String>,
    /// Set when resolution was skipped (e.g. "no_candidate")
    pub reason: Option<String>,
}

impl MerchantMatch {
    /// Zero-score match carrying only a reason tag
    pub fn unresolved(reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.merchant_id.is_empty()
    }

    pub fn from_registry(&self) -> bool {
        self.matched_record.is_some()
    }
}
