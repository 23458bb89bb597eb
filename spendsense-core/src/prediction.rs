//! Classifier output as seen by the rest of the pipeline

use serde::{Deserialize, Serialize};

/// Whether a prediction can be applied without a human look
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionStatus {
    Auto,
    Review,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Auto => "AUTO",
            PredictionStatus::Review => "REVIEW",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub label: String,
    pub confidence: f64,
}

/// Ranked classifier output for one message.
///
/// `suggestions` holds at most two runner-up labels, descending by
/// confidence and distinct from `primary`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryPrediction {
    pub primary: String,
    /// Raw (uncalibrated) classifier probability
    pub primary_confidence: f64,
    pub suggestions: Vec<Suggestion>,
    /// Derived from the raw confidence only
    pub status: PredictionStatus,
    /// Filled in by the calibration stage; never changes `status`
    #[serde(default)]
    pub calibrated_confidence: Option<f64>,
}

impl CategoryPrediction {
    pub fn with_calibrated(mut self, calibrated: f64) -> Self {
        self.calibrated_confidence = Some(calibrated);
        self
    }

    /// Calibrated confidence when available, raw otherwise
    pub fn effective_confidence(&self) -> f64 {
        self.calibrated_confidence.unwrap_or(self.primary_confidence)
    }

    /// Primary followed by suggestions
    pub fn ranked(&self) -> impl Iterator<Item = (&str, f64)> {
        std::iter::once((self.primary.as_str(), self.primary_confidence))
            .chain(self.suggestions.iter().map(|s| (s.label.as_str(), s.confidence)))
    }
}
