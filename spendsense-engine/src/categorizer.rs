//! Ranked category suggestions on top of an opaque classifier

use crate::classifier::{Classifier, ClassifierError};
use spendsense_core::{CategoryPrediction, PredictionStatus, Suggestion};
use std::sync::Arc;

pub const DEFAULT_AUTO_THRESHOLD: f64 = 0.65;

/// Primary plus this many runner-ups
const MAX_SUGGESTIONS: usize = 2;

#[derive(Clone)]
pub struct Categorizer {
    classifier: Arc<dyn Classifier>,
    threshold: f64,
}

impl Categorizer {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            threshold: DEFAULT_AUTO_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn labels(&self) -> &[String] {
        self.classifier.labels()
    }

    /// Top-3 labels by raw probability.
    ///
    /// Equal probabilities keep the classifier's label order. `status` is
    /// AUTO iff the raw top-1 probability reaches the threshold.
    pub fn predict(&self, text: &str) -> Result<CategoryPrediction, ClassifierError> {
        let mut dist = self.classifier.predict_proba(text)?;
        if let Some((label, _)) = dist.iter().find(|(_, p)| !p.is_finite()) {
            return Err(ClassifierError::NonFinite(label.clone()));
        }

        let mut seen = std::collections::HashSet::new();
        dist.retain(|(label, _)| seen.insert(label.clone()));
        // sort_by is stable, so ties stay in native order
        dist.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut ranked = dist.into_iter().take(MAX_SUGGESTIONS + 1);
        let (primary, primary_confidence) = ranked.next().ok_or(ClassifierError::EmptyDistribution)?;
        let suggestions = ranked
            .map(|(label, confidence)| Suggestion { label, confidence })
            .collect();

        let status = if primary_confidence >= self.threshold {
            PredictionStatus::Auto
        } else {
            PredictionStatus::Review
        };

        Ok(CategoryPrediction {
            primary,
            primary_confidence,
            suggestions,
            status,
            calibrated_confidence: None,
        })
    }
}
