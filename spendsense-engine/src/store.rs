//! Rows the pipeline hands to the orchestrator, and the store seam it writes through

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spendsense_core::{
    AppliedRule, AuditRecord, MerchantMatch, Message, NormalizedRecord, PredictionSource,
    PredictionStatus, RegistryEntry,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction {0} not found")]
    NotFound(String),

    #[error("store backend: {0}")]
    Backend(String),
}

/// Parsed fields written back onto the transaction row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedUpdate {
    /// Normalized text, or the raw text when normalization produced nothing
    pub normalized_text: String,
    /// `None` leaves any existing value on the row untouched
    pub merchant_name: Option<String>,
    pub merchant_id: Option<String>,
    pub merchant_match_confidence: f64,
    pub parsing: NormalizedRecord,
    pub merchant: MerchantMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestionRecord {
    pub label: String,
    pub category_id: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleMetadata {
    pub merchant_name: String,
    pub merchant_id: String,
    pub merchant_match_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_rule: Option<AppliedRule>,
}

/// One categorization row, upserted by `transaction_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategorizationRecord {
    pub transaction_id: String,
    pub user_id: String,
    pub primary_category_id: Option<String>,
    pub primary_confidence: f64,
    pub suggestions: Vec<SuggestionRecord>,
    pub prediction_source: PredictionSource,
    pub model_version: String,
    pub prediction_status: PredictionStatus,
    pub rule_metadata: RuleMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub transaction_id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub record: AuditRecord,
}

/// What the pipeline needs from the datastore.
pub trait TransactionStore {
    /// Oldest-first messages not yet marked processed
    fn fetch_unprocessed(&mut self, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Current registry snapshot
    fn registry(&mut self) -> Result<Vec<RegistryEntry>, StoreError>;

    fn update_normalized(&mut self, transaction_id: &str, update: &NormalizedUpdate) -> Result<(), StoreError>;

    fn upsert_categorization(&mut self, record: &CategorizationRecord) -> Result<(), StoreError>;

    fn insert_audit(&mut self, entry: &AuditEntry) -> Result<(), StoreError>;

    fn mark_processed(&mut self, transaction_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredTransaction {
    pub id: String,
    pub user_id: String,
    pub raw_text: String,
    pub normalized_text: Option<String>,
    pub merchant_name: Option<String>,
    pub merchant_id: Option<String>,
    pub merchant_match_confidence: Option<f64>,
    pub parsing: Option<NormalizedRecord>,
    pub is_processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<Message> for StoredTransaction {
    fn from(msg: Message) -> Self {
        Self {
            id: msg.id,
            user_id: msg.user_id,
            raw_text: msg.raw_text,
            normalized_text: None,
            merchant_name: None,
            merchant_id: None,
            merchant_match_confidence: None,
            parsing: None,
            is_processed: false,
            processed_at: None,
        }
    }
}

/// In-memory store; keeps insertion order for `fetch_unprocessed`.
///
/// Transaction ids are unique: a repeated id replaces the earlier row in place.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStore {
    pub transactions: Vec<StoredTransaction>,
    pub registry: Vec<RegistryEntry>,
    pub categorizations: BTreeMap<String, CategorizationRecord>,
    pub audits: Vec<AuditEntry>,
}

impl MemoryStore {
    pub fn new(messages: impl IntoIterator<Item = Message>, registry: Vec<RegistryEntry>) -> Self {
        let mut store = Self {
            registry,
            ..Default::default()
        };
        for message in messages {
            store.upsert_message(message);
        }
        store
    }

    fn upsert_message(&mut self, message: Message) {
        match self.transactions.iter_mut().find(|t| t.id == message.id) {
            Some(row) => {
                warn!(transaction_id = %message.id, "duplicate transaction id, keeping the later row");
                *row = StoredTransaction::from(message);
            }
            None => self.transactions.push(StoredTransaction::from(message)),
        }
    }

    pub fn transaction(&self, id: &str) -> Option<&StoredTransaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    pub fn unprocessed_count(&self) -> usize {
        self.transactions.iter().filter(|t| !t.is_processed).count()
    }

    fn transaction_mut(&mut self, id: &str) -> Result<&mut StoredTransaction, StoreError> {
        self.transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

impl TransactionStore for MemoryStore {
    fn fetch_unprocessed(&mut self, limit: usize) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| !t.is_processed)
            .take(limit)
            .map(|t| Message::new(&t.id, &t.user_id, &t.raw_text))
            .collect())
    }

    fn registry(&mut self) -> Result<Vec<RegistryEntry>, StoreError> {
        Ok(self.registry.clone())
    }

    fn update_normalized(&mut self, transaction_id: &str, update: &NormalizedUpdate) -> Result<(), StoreError> {
        let row = self.transaction_mut(transaction_id)?;
        row.normalized_text = Some(update.normalized_text.clone());
        if let Some(name) = &update.merchant_name {
            row.merchant_name = Some(name.clone());
        }
        if let Some(id) = &update.merchant_id {
            row.merchant_id = Some(id.clone());
        }
        row.merchant_match_confidence = Some(update.merchant_match_confidence);
        row.parsing = Some(update.parsing.clone());
        Ok(())
    }

    fn upsert_categorization(&mut self, record: &CategorizationRecord) -> Result<(), StoreError> {
        self.categorizations
            .insert(record.transaction_id.clone(), record.clone());
        Ok(())
    }

    fn insert_audit(&mut self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.audits.push(entry.clone());
        Ok(())
    }

    fn mark_processed(&mut self, transaction_id: &str) -> Result<(), StoreError> {
        let row = self.transaction_mut(transaction_id)?;
        row.is_processed = true;
        row.processed_at = Some(Utc::now());
        Ok(())
    }
}
