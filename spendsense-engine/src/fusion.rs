//! Merges the model prediction with the merchant registry.
//!
//! The model decides by default. A registry category replaces it only when
//! boosting is on, the merchant match is strong, and the matched registry row
//! carries a non-empty category id.

use spendsense_core::decision::MERCHANT_PRIMARY_CATEGORY;
use spendsense_core::{
    AppliedRule, AuditRecord, CategoryMap, CategoryPrediction, Decision, MerchantMatch,
    PredictionSource,
};

pub const DEFAULT_OVERRIDE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutcome {
    pub decision: Decision,
    /// Present exactly when `decision.source` is HYBRID_RULE
    pub audit: Option<AuditRecord>,
}

#[derive(Debug, Clone)]
pub struct DecisionFusion {
    boosting_enabled: bool,
    override_threshold: f64,
    categories: CategoryMap,
}

impl DecisionFusion {
    pub fn new(boosting_enabled: bool) -> Self {
        Self {
            boosting_enabled,
            override_threshold: DEFAULT_OVERRIDE_THRESHOLD,
            categories: CategoryMap::default(),
        }
    }

    pub fn with_override_threshold(mut self, threshold: f64) -> Self {
        self.override_threshold = threshold;
        self
    }

    pub fn categories(&self) -> &CategoryMap {
        &self.categories
    }

    /// Pure: the same prediction and match always give the same outcome.
    pub fn decide(&self, prediction: &CategoryPrediction, merchant: &MerchantMatch) -> FusionOutcome {
        let baseline = Decision {
            final_category_id: self.categories.id_for(&prediction.primary),
            final_confidence: prediction.primary_confidence,
            source: PredictionSource::Model,
            applied_rule: None,
        };

        if !self.boosting_enabled || merchant.score < self.override_threshold {
            return FusionOutcome { decision: baseline, audit: None };
        }
        let Some(record) = merchant.matched_record.as_ref() else {
            return FusionOutcome { decision: baseline, audit: None };
        };
        let Some(category_id) = record.primary_category_id.clone().filter(|c| !c.is_empty()) else {
            return FusionOutcome { decision: baseline, audit: None };
        };

        let rule_confidence = record.category_confidence_or_zero();
        let rule = AppliedRule {
            reason: MERCHANT_PRIMARY_CATEGORY.to_string(),
            merchant_id: record.merchant_id.clone(),
            merchant_name: record.merchant_name.clone(),
            merchant_category_confidence: rule_confidence,
        };

        let decision = Decision {
            final_category_id: Some(category_id),
            final_confidence: prediction.effective_confidence().max(rule_confidence),
            source: PredictionSource::HybridRule,
            applied_rule: Some(rule.clone()),
        };
        let audit = AuditRecord {
            merchant_id: rule.merchant_id.clone(),
            merchant_name: rule.merchant_name.clone(),
            model_confidence: prediction.primary_confidence,
            rule_confidence,
            resulting_category_id: decision.final_category_id.clone(),
            prediction_source: PredictionSource::HybridRule,
            rule,
        };

        FusionOutcome { decision, audit: Some(audit) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spendsense_core::{PredictionStatus, RegistryEntry, Suggestion};

    fn prediction(primary: &str, raw: f64, calibrated: Option<f64>) -> CategoryPrediction {
        CategoryPrediction {
            primary: primary.to_string(),
            primary_confidence: raw,
            suggestions: vec![Suggestion { label: "Others".to_string(), confidence: 1.0 - raw }],
            status: PredictionStatus::Auto,
            calibrated_confidence: calibrated,
        }
    }

    fn matched(score: f64, record: Option<RegistryEntry>) -> MerchantMatch {
        MerchantMatch {
            merchant_name: "Swiggy".to_string(),
            merchant_id: "m-swiggy".to_string(),
            score,
            matched_alias: "swiggy".to_string(),
            matched_record: record,
            ..Default::default()
        }
    }

    fn cat123(confidence: f64) -> RegistryEntry {
        RegistryEntry::new("m-swiggy", "Swiggy").with_category("cat-123", confidence)
    }

    #[test]
    fn test_boosting_disabled_keeps_model() {
        let fusion = DecisionFusion::new(false);
        let out = fusion.decide(&prediction("Shopping", 0.4, Some(0.3)), &matched(1.0, Some(cat123(0.99))));
        assert_eq!(out.decision.source, PredictionSource::Model);
        assert_eq!(
            out.decision.final_category_id.as_deref(),
            Some("b2104a33-0a09-44b1-9026-195e01c73ddc")
        );
        // Baseline confidence is the raw one, not the calibrated one
        assert_eq!(out.decision.final_confidence, 0.4);
        assert!(out.audit.is_none());
    }

    #[test]
    fn test_override_takes_max_of_calibrated_and_registry() {
        let fusion = DecisionFusion::new(true);
        let out = fusion.decide(&prediction("Shopping", 0.55, Some(0.7)), &matched(0.9, Some(cat123(0.5))));
        assert_eq!(out.decision.source, PredictionSource::HybridRule);
        assert_eq!(out.decision.final_category_id.as_deref(), Some("cat-123"));
        assert_eq!(out.decision.final_confidence, 0.7);

        let rule = out.decision.applied_rule.clone().unwrap();
        assert_eq!(rule.reason, "merchant_primary_category");
        assert_eq!(rule.merchant_id, "m-swiggy");
        assert_eq!(rule.merchant_category_confidence, 0.5);

        let audit = out.audit.unwrap();
        assert_eq!(audit.model_confidence, 0.55);
        assert_eq!(audit.rule_confidence, 0.5);
        assert_eq!(audit.resulting_category_id.as_deref(), Some("cat-123"));
        assert_eq!(audit.prediction_source, PredictionSource::HybridRule);
    }

    #[test]
    fn test_override_uses_raw_when_uncalibrated() {
        let fusion = DecisionFusion::new(true);
        let out = fusion.decide(&prediction("Shopping", 0.3, None), &matched(0.8, Some(cat123(0.6))));
        assert_eq!(out.decision.final_confidence, 0.6);

        let mut rec = cat123(0.0);
        rec.category_confidence = None;
        let out = fusion.decide(&prediction("Shopping", 0.3, None), &matched(0.8, Some(rec)));
        assert_eq!(out.decision.final_confidence, 0.3);
        assert_eq!(out.audit.unwrap().rule_confidence, 0.0);
    }

    #[test]
    fn test_gate_conditions() {
        let fusion = DecisionFusion::new(true);
        let p = prediction("Food & Dining", 0.5, None);

        // Below threshold
        let out = fusion.decide(&p, &matched(0.79, Some(cat123(0.9))));
        assert_eq!(out.decision.source, PredictionSource::Model);

        // Builtin alias winner has no registry record
        let out = fusion.decide(&p, &matched(1.0, None));
        assert_eq!(out.decision.source, PredictionSource::Model);

        // Registry row without a category
        let out = fusion.decide(&p, &matched(1.0, Some(RegistryEntry::new("m-swiggy", "Swiggy"))));
        assert_eq!(out.decision.source, PredictionSource::Model);
        assert!(out.audit.is_none());
    }

    #[test]
    fn test_empty_registry_category_is_ignored() {
        let fusion = DecisionFusion::new(true);
        let blank = RegistryEntry::new("m-swiggy", "Swiggy").with_category("", 0.1);
        let out = fusion.decide(&prediction("Food & Dining", 0.5, None), &matched(1.0, Some(blank)));
        assert_eq!(out.decision.source, PredictionSource::Model);
        assert_eq!(
            out.decision.final_category_id.as_deref(),
            Some("31dd2d93-25f4-43c6-9833-6816d8a1bfce")
        );
        assert!(out.decision.applied_rule.is_none());
        assert!(out.audit.is_none());
    }

    #[test]
    fn test_unmapped_label_gives_null_id() {
        let fusion = DecisionFusion::new(true);
        let out = fusion.decide(&prediction("Crypto", 0.9, None), &MerchantMatch::unresolved("no_candidate"));
        assert_eq!(out.decision.final_category_id, None);
        assert_eq!(out.decision.final_confidence, 0.9);
    }

    #[test]
    fn test_custom_threshold() {
        let fusion = DecisionFusion::new(true).with_override_threshold(0.95);
        let out = fusion.decide(&prediction("Shopping", 0.5, None), &matched(0.9, Some(cat123(0.5))));
        assert_eq!(out.decision.source, PredictionSource::Model);
    }

    #[test]
    fn test_referentially_transparent() {
        let fusion = DecisionFusion::new(true);
        let p = prediction("Shopping", 0.55, Some(0.7));
        let m = matched(0.9, Some(cat123(0.5)));
        let first = fusion.decide(&p, &m);
        for _ in 0..5 {
            assert_eq!(fusion.decide(&p, &m), first);
        }
    }
}
