//! Per-message categorization pipeline and the batch runner around it.
//!
//! RECEIVED -> NORMALIZED -> MERCHANT_RESOLVED -> PREDICTED -> CALIBRATED
//! -> DECIDED are in-process transforms. PERSISTED is the only step with side
//! effects, and it goes through a [`TransactionStore`].

use crate::calibrator::ConfidenceCalibrator;
use crate::categorizer::Categorizer;
use crate::classifier::ClassifierError;
use crate::fusion::{DecisionFusion, FusionOutcome};
use crate::merchant::MerchantResolver;
use crate::store::{
    AuditEntry, CategorizationRecord, NormalizedUpdate, RuleMetadata, StoreError,
    SuggestionRecord, TransactionStore,
};
use anyhow::Result;
use serde::Serialize;
use spendsense_core::{CategoryPrediction, Decision, Message, RegistryEntry};
use spendsense_ingest::TextNormalizer;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_MODEL_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    Normalized,
    MerchantResolved,
    Predicted,
    Calibrated,
    Decided,
    Persisted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Received => "RECEIVED",
            Stage::Normalized => "NORMALIZED",
            Stage::MerchantResolved => "MERCHANT_RESOLVED",
            Stage::Predicted => "PREDICTED",
            Stage::Calibrated => "CALIBRATED",
            Stage::Decided => "DECIDED",
            Stage::Persisted => "PERSISTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("message {message_id}: prediction failed: {source}")]
    Classifier {
        message_id: String,
        #[source]
        source: ClassifierError,
    },

    #[error("message {message_id}: persisting failed: {source}")]
    Store {
        message_id: String,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    /// Stage the message was trying to reach when it failed
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Classifier { .. } => Stage::Predicted,
            PipelineError::Store { .. } => Stage::Persisted,
        }
    }
}

/// Everything produced for one message before persisting
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedMessage {
    pub message_id: String,
    pub user_id: String,
    pub normalized: NormalizedUpdate,
    pub prediction: CategoryPrediction,
    pub decision: Decision,
    pub categorization: CategorizationRecord,
    pub audit: Option<AuditEntry>,
}

/// Services wired together by the caller; holds no per-message state.
pub struct Pipeline {
    normalizer: TextNormalizer,
    resolver: MerchantResolver,
    categorizer: Categorizer,
    calibrator: ConfidenceCalibrator,
    fusion: DecisionFusion,
    model_version: String,
}

impl Pipeline {
    pub fn new(
        categorizer: Categorizer,
        calibrator: ConfidenceCalibrator,
        fusion: DecisionFusion,
    ) -> Result<Self> {
        Ok(Self {
            normalizer: TextNormalizer::new()?,
            resolver: MerchantResolver::new()?,
            categorizer,
            calibrator,
            fusion,
            model_version: DEFAULT_MODEL_VERSION.to_string(),
        })
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = version.into();
        self
    }

    /// Run every in-process stage for one message. Nothing is written.
    pub fn process(&self, message: &Message, registry: &[RegistryEntry]) -> Result<ProcessedMessage, PipelineError> {
        let id = message.id.as_str();
        debug!(message_id = id, stage = %Stage::Received);

        let (normalized_text, parsed) = self.normalizer.normalize(&message.raw_text);
        debug!(
            message_id = id,
            stage = %Stage::Normalized,
            amount = parsed.amount,
            direction = parsed.transaction_type.as_str(),
            method = parsed.payment_method.as_str()
        );

        let merchant = self.resolver.resolve(&parsed.merchant_candidate, registry);
        debug!(
            message_id = id,
            stage = %Stage::MerchantResolved,
            merchant = %merchant.merchant_name,
            score = merchant.score,
            resolved = merchant.is_resolved(),
            registry = merchant.from_registry()
        );

        let text = if normalized_text.is_empty() {
            message.raw_text.as_str()
        } else {
            normalized_text.as_str()
        };
        let prediction = self
            .categorizer
            .predict(text)
            .map_err(|source| PipelineError::Classifier {
                message_id: id.to_string(),
                source,
            })?;
        debug!(
            message_id = id,
            stage = %Stage::Predicted,
            primary = %prediction.primary,
            status = prediction.status.as_str()
        );

        let calibrated = self.calibrator.calibrate(prediction.primary_confidence);
        let prediction = prediction.with_calibrated(calibrated);
        debug!(message_id = id, stage = %Stage::Calibrated, calibrated);

        let FusionOutcome { decision, audit } = self.fusion.decide(&prediction, &merchant);
        debug!(message_id = id, stage = %Stage::Decided, source = decision.source.as_str());

        let normalized = NormalizedUpdate {
            normalized_text: text.to_string(),
            merchant_name: non_empty(&merchant.merchant_name),
            merchant_id: non_empty(&merchant.merchant_id),
            merchant_match_confidence: merchant.score,
            parsing: parsed,
            merchant: merchant.clone(),
        };

        let categories = self.fusion.categories();
        let categorization = CategorizationRecord {
            transaction_id: message.id.clone(),
            user_id: message.user_id.clone(),
            primary_category_id: decision.final_category_id.clone(),
            primary_confidence: decision.final_confidence,
            suggestions: prediction
                .suggestions
                .iter()
                .map(|s| SuggestionRecord {
                    label: s.label.clone(),
                    category_id: categories.id_for(&s.label),
                    confidence: s.confidence,
                })
                .collect(),
            prediction_source: decision.source,
            model_version: self.model_version.clone(),
            prediction_status: prediction.status,
            rule_metadata: RuleMetadata {
                merchant_name: merchant.merchant_name.clone(),
                merchant_id: merchant.merchant_id.clone(),
                merchant_match_confidence: merchant.score,
                applied_rule: decision.applied_rule.clone(),
            },
        };

        let audit = audit.map(|record| AuditEntry {
            transaction_id: message.id.clone(),
            user_id: message.user_id.clone(),
            record,
        });

        Ok(ProcessedMessage {
            message_id: message.id.clone(),
            user_id: message.user_id.clone(),
            normalized,
            prediction,
            decision,
            categorization,
            audit,
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub fetched: usize,
    pub processed: usize,
    pub overridden: usize,
    pub failed: usize,
    pub audit_failures: usize,
}

/// Process one batch of unprocessed messages.
///
/// Fetch or registry errors abort the whole batch. A message that fails
/// before being marked processed is skipped and stays eligible for the next
/// batch; the rest of the batch carries on. Audit write failures are logged
/// and do not block marking the message processed.
pub fn run_batch<S>(store: &mut S, pipeline: &Pipeline, batch_size: usize) -> Result<BatchSummary, StoreError>
where
    S: TransactionStore + ?Sized,
{
    let messages = store.fetch_unprocessed(batch_size)?;
    let registry = store.registry()?;
    info!(count = messages.len(), registry = registry.len(), "categorizing batch");

    let mut summary = BatchSummary {
        fetched: messages.len(),
        ..Default::default()
    };

    for message in &messages {
        match persist_one(store, pipeline, message, &registry, &mut summary) {
            Ok(()) => summary.processed += 1,
            Err(e) => {
                warn!(message_id = %message.id, stage = %e.stage(), error = %e, "message skipped");
                summary.failed += 1;
            }
        }
    }

    info!(
        processed = summary.processed,
        overridden = summary.overridden,
        failed = summary.failed,
        "batch complete"
    );
    Ok(summary)
}

/// Run batches until every unprocessed message has been tried once.
///
/// A message that fails stays unprocessed in the store but is not fetched
/// again during this call, so messages behind it still get their turn.
pub fn run_until_drained<S>(store: &mut S, pipeline: &Pipeline, batch_size: usize) -> Result<BatchSummary, StoreError>
where
    S: TransactionStore + ?Sized,
{
    let mut view = Untried {
        inner: store,
        tried: HashSet::new(),
    };
    let mut total = BatchSummary::default();
    loop {
        let summary = run_batch(&mut view, pipeline, batch_size.max(1))?;
        if summary.fetched == 0 {
            break;
        }
        total.add(&summary);
    }
    Ok(total)
}

impl BatchSummary {
    fn add(&mut self, other: &BatchSummary) {
        self.fetched += other.fetched;
        self.processed += other.processed;
        self.overridden += other.overridden;
        self.failed += other.failed;
        self.audit_failures += other.audit_failures;
    }
}

/// Hides ids already handed out once, so every fetch returns new work or nothing
struct Untried<'a, S: ?Sized> {
    inner: &'a mut S,
    tried: HashSet<String>,
}

impl<S> TransactionStore for Untried<'_, S>
where
    S: TransactionStore + ?Sized,
{
    fn fetch_unprocessed(&mut self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let candidates = self
            .inner
            .fetch_unprocessed(limit.saturating_add(self.tried.len()))?;
        let tried = &mut self.tried;
        Ok(candidates
            .into_iter()
            .filter(|m| tried.insert(m.id.clone()))
            .take(limit)
            .collect())
    }

    fn registry(&mut self) -> Result<Vec<RegistryEntry>, StoreError> {
        self.inner.registry()
    }

    fn update_normalized(&mut self, transaction_id: &str, update: &NormalizedUpdate) -> Result<(), StoreError> {
        self.inner.update_normalized(transaction_id, update)
    }

    fn upsert_categorization(&mut self, record: &CategorizationRecord) -> Result<(), StoreError> {
        self.inner.upsert_categorization(record)
    }

    fn insert_audit(&mut self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.inner.insert_audit(entry)
    }

    fn mark_processed(&mut self, transaction_id: &str) -> Result<(), StoreError> {
        self.inner.mark_processed(transaction_id)
    }
}

fn persist_one<S>(
    store: &mut S,
    pipeline: &Pipeline,
    message: &Message,
    registry: &[RegistryEntry],
    summary: &mut BatchSummary,
) -> Result<(), PipelineError>
where
    S: TransactionStore + ?Sized,
{
    let processed = pipeline.process(message, registry)?;
    let store_err = |source: StoreError| PipelineError::Store {
        message_id: message.id.clone(),
        source,
    };

    store
        .update_normalized(&message.id, &processed.normalized)
        .map_err(store_err)?;
    store
        .upsert_categorization(&processed.categorization)
        .map_err(store_err)?;

    if let Some(audit) = &processed.audit {
        if let Err(e) = store.insert_audit(audit) {
            warn!(message_id = %message.id, error = %e, "failed to write hybrid rule audit");
            summary.audit_failures += 1;
        }
    }

    store.mark_processed(&message.id).map_err(store_err)?;
    if processed.decision.is_override() {
        summary.overridden += 1;
    }
    debug!(message_id = %message.id, stage = %Stage::Persisted);
    Ok(())
}
