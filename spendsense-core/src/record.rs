//! Structured fields parsed out of a raw notification

use serde::{Deserialize, Serialize};

/// Direction of money movement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    #[default]
    Debit,
    Credit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Debit => "DEBIT",
            TransactionType::Credit => "CREDIT",
        }
    }
}

/// Payment rail mentioned in the notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[default]
    Upi,
    Imps,
    Neft,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Upi => "UPI",
            PaymentMethod::Imps => "IMPS",
            PaymentMethod::Neft => "NEFT",
            PaymentMethod::Card => "CARD",
        }
    }
}

/// Normalized view of one message. Built once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedRecord {
    /// Text handed to the classifier (reference ids stripped)
    pub normalized_text: String,
    /// Always >= 0.0; 0.0 when no amount was found
    pub amount: f64,
    /// Always "INR"
    pub currency: String,
    pub transaction_type: TransactionType,
    pub payment_method: PaymentMethod,
    /// Raw merchant phrase, empty if nothing looked like one
    pub merchant_candidate: String,
    /// Trimmed input text
    pub original: String,
}

pub const DEFAULT_CURRENCY: &str = "INR";

impl Default for NormalizedRecord {
    fn default() -> Self {
        Self {
            normalized_text: String::new(),
            amount: 0.0,
            currency: DEFAULT_CURRENCY.to_string(),
            transaction_type: TransactionType::Debit,
            payment_method: PaymentMethod::Upi,
            merchant_candidate: String::new(),
            original: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_record() {
        let rec = NormalizedRecord::default();
        assert_eq!(rec.amount, 0.0);
        assert_eq!(rec.currency, "INR");
        assert_eq!(rec.transaction_type, TransactionType::Debit);
        assert_eq!(rec.payment_method, PaymentMethod::Upi);
        assert!(rec.merchant_candidate.is_empty());
    }

    #[test]
    fn test_enum_wire_names() {
        let json = serde_json::to_string(&TransactionType::Credit).unwrap();
        assert_eq!(json, "\"CREDIT\"");
        let json = serde_json::to_string(&PaymentMethod::Neft).unwrap();
        assert_eq!(json, "\"NEFT\"");
        assert_eq!(PaymentMethod::Card.as_str(), "CARD");
    }
}
