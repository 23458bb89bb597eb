//! Classifier contract and a persisted multinomial naive Bayes model.
//!
//! Model file layout (JSON):
//! {"classes": [{"label": "Food & Dining", "log_prior": -1.2,
//!               "unknown_log_likelihood": -9.0,
//!               "tokens": {"swiggy": -2.1, ...}}, ...]}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("reading model {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing model: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("classifier returned no labels")]
    EmptyDistribution,

    #[error("non-finite probability for label {0:?}")]
    NonFinite(String),
}

/// Opaque multiclass probabilistic classifier.
///
/// `predict_proba` returns one probability per label, in `labels()` order,
/// summing to 1. The label set is fixed for the lifetime of the value.
pub trait Classifier: Send + Sync {
    fn labels(&self) -> &[String];

    fn predict_proba(&self, text: &str) -> Result<Vec<(String, f64)>, ClassifierError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassModel {
    pub label: String,
    pub log_prior: f64,
    /// Used for tokens missing from `tokens`
    pub unknown_log_likelihood: f64,
    #[serde(default)]
    pub tokens: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    pub classes: Vec<ClassModel>,
}

pub struct NaiveBayesClassifier {
    labels: Vec<String>,
    classes: Vec<ClassModel>,
}

impl NaiveBayesClassifier {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ClassifierError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let model: ModelFile = serde_json::from_str(&raw)?;
        Self::from_model(model)
    }

    pub fn from_model(model: ModelFile) -> Result<Self, ClassifierError> {
        if model.classes.is_empty() {
            return Err(ClassifierError::InvalidModel("no classes".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for class in &model.classes {
            if !seen.insert(class.label.as_str()) {
                return Err(ClassifierError::InvalidModel(format!(
                    "duplicate label {:?}",
                    class.label
                )));
            }
            let finite = class.log_prior.is_finite()
                && class.unknown_log_likelihood.is_finite()
                && class.tokens.values().all(|v| v.is_finite());
            if !finite {
                return Err(ClassifierError::InvalidModel(format!(
                    "non-finite weight in class {:?}",
                    class.label
                )));
            }
        }

        Ok(Self {
            labels: model.classes.iter().map(|c| c.label.clone()).collect(),
            classes: model.classes,
        })
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
}

impl Classifier for NaiveBayesClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn predict_proba(&self, text: &str) -> Result<Vec<(String, f64)>, ClassifierError> {
        let tokens: Vec<String> = tokenize(text).collect();

        let scores: Vec<f64> = self
            .classes
            .iter()
            .map(|class| {
                class.log_prior
                    + tokens
                        .iter()
                        .map(|t| {
                            class
                                .tokens
                                .get(t)
                                .copied()
                                .unwrap_or(class.unknown_log_likelihood)
                        })
                        .sum::<f64>()
            })
            .collect();

        // Softmax, shifted by the max for stability
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f64 = exps.iter().sum();

        Ok(self
            .labels
            .iter()
            .zip(exps)
            .map(|(label, e)| (label.clone(), e / total))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two-token toy model used across the engine tests
    pub(crate) fn toy_model() -> ModelFile {
        let class = |label: &str, prior: f64, tokens: &[(&str, f64)]| ClassModel {
            label: label.to_string(),
            log_prior: prior,
            unknown_log_likelihood: -6.0,
            tokens: tokens.iter().map(|(t, v)| (t.to_string(), *v)).collect(),
        };
        ModelFile {
            classes: vec![
                class("Food & Dining", -1.0, &[("swiggy", -0.5), ("zomato", -0.5)]),
                class("Shopping", -1.2, &[("amazon", -0.5), ("flipkart", -0.5)]),
                class("Transportation", -1.5, &[("uber", -0.5), ("ola", -0.7)]),
                class("Others", -1.1, &[]),
            ],
        }
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let clf = NaiveBayesClassifier::from_model(toy_model()).unwrap();
        let dist = clf.predict_proba("Rs 450 debited via UPI SWIGGY").unwrap();
        assert_eq!(dist.len(), 4);
        let total: f64 = dist.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-9);
        let labels: Vec<_> = dist.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, clf.labels());
    }

    #[test]
    fn test_known_token_drives_label() {
        let clf = NaiveBayesClassifier::from_model(toy_model()).unwrap();
        let dist = clf.predict_proba("paid to uber").unwrap();
        let (top, _) = dist
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap();
        assert_eq!(top, "Transportation");
    }

    #[test]
    fn test_rejects_bad_models() {
        assert!(matches!(
            NaiveBayesClassifier::from_model(ModelFile { classes: vec![] }),
            Err(ClassifierError::InvalidModel(_))
        ));

        let mut model = toy_model();
        model.classes[1].label = "Food & Dining".to_string();
        assert!(NaiveBayesClassifier::from_model(model).is_err());

        let mut model = toy_model();
        model.classes[0].log_prior = f64::NAN;
        assert!(NaiveBayesClassifier::from_model(model).is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = NaiveBayesClassifier::load("/nonexistent/model.json")
            .err()
            .unwrap();
        assert!(matches!(err, ClassifierError::Read { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, serde_json::to_string(&toy_model()).unwrap()).unwrap();
        let clf = NaiveBayesClassifier::load(&path).unwrap();
        assert_eq!(clf.labels().len(), 4);
    }
}
