//! Free-text notification normalizer.
//!
//! Pulls amount, direction, payment rail and a merchant phrase out of a bank
//! or payment SMS, and produces a classifier-friendly copy of the text with
//! reference numbers removed.
//!
//! Example input:
//!   Rs 450 debited via UPI SWIGGY txn ref ABCD1234

use anyhow::Result;
use regex::Regex;
use spendsense_core::record::DEFAULT_CURRENCY;
use spendsense_core::{NormalizedRecord, PaymentMethod, TransactionType};

const DEBIT_KEYWORDS: &[&str] = &["debited", "debit", "sent", "paid", "withdrawn"];
const CREDIT_KEYWORDS: &[&str] = &["credited", "credit", "received", "refund"];

/// Checked in order; first group with a hit wins.
const PAYMENT_METHOD_KEYWORDS: &[(PaymentMethod, &[&str])] = &[
    (PaymentMethod::Upi, &["upi", "vpa", "@ok", "@ybl", "@oksbi", "@ibl", "@paytm"]),
    (PaymentMethod::Imps, &["imps"]),
    (PaymentMethod::Neft, &["neft"]),
    (PaymentMethod::Card, &["card", "visa", "mastercard", "rupay"]),
];

/// Compiled patterns for [`TextNormalizer::normalize`]. Build once, reuse.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    digit_group_re: Regex,
    punctuation_re: Regex,
    amount_res: Vec<Regex>,
    merchant_re: Regex,
    caps_run_re: Regex,
    reference_re: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            digit_group_re: Regex::new(r"(\d),(\d)")?,
            punctuation_re: Regex::new(r"[^A-Za-z0-9@\s.]")?,
            amount_res: vec![
                Regex::new(r"\b(?:rs\.?|inr)\s*([0-9]+(?:\.[0-9]{1,2})?)")?,
                Regex::new(r"([0-9]+(?:\.[0-9]{1,2})?)\s*(?:rs\.?|inr)")?,
            ],
            merchant_re: Regex::new(concat!(
                r"(?i)\b(?:to|at|via|on|for)\s+",
                r"([A-Za-z0-9@.\-]+(?:\s+[A-Za-z0-9@.\-]+){0,4})"
            ))?,
            caps_run_re: Regex::new(r"\b([A-Z][A-Za-z0-9]+(?:\s+[A-Z][A-Za-z0-9]+)*)\b")?,
            reference_re: Regex::new(r"\b[0-9A-Z]{8,}\b")?,
        })
    }

    /// Normalize one raw message.
    ///
    /// Returns the canonical text and the parsed record (which carries the
    /// same text). Empty input gives empty text and a default record.
    pub fn normalize(&self, raw: &str) -> (String, NormalizedRecord) {
        let original = raw.trim();
        if original.is_empty() {
            return (String::new(), NormalizedRecord::default());
        }

        let lower = self.parsing_copy(original);
        let normalized_text = collapse_whitespace(&self.reference_re.replace_all(original, " "));

        let record = NormalizedRecord {
            normalized_text: normalized_text.clone(),
            amount: self.extract_amount(&lower),
            currency: DEFAULT_CURRENCY.to_string(),
            transaction_type: detect_transaction_type(&lower),
            payment_method: detect_payment_method(&lower),
            merchant_candidate: self.merchant_candidate(original),
            original: original.to_string(),
        };

        (normalized_text, record)
    }

    /// Lower-cased copy with punctuation stripped, for keyword and amount scans
    fn parsing_copy(&self, original: &str) -> String {
        let joined = self.digit_group_re.replace_all(original, "${1}${2}");
        let stripped = self.punctuation_re.replace_all(&joined, " ");
        collapse_whitespace(&stripped.to_lowercase())
    }

    fn extract_amount(&self, lower: &str) -> f64 {
        for re in &self.amount_res {
            if let Some(caps) = re.captures(lower) {
                if let Ok(amount) = caps[1].parse::<f64>() {
                    return amount;
                }
            }
        }
        0.0
    }

    /// Phrase after a preposition, else the longest capitalized run
    fn merchant_candidate(&self, original: &str) -> String {
        if let Some(caps) = self.merchant_re.captures(original) {
            return caps[1].trim().to_string();
        }

        let mut best = "";
        for caps in self.caps_run_re.captures_iter(original) {
            let run = caps.get(1).map_or("", |m| m.as_str());
            if run.chars().count() > best.chars().count() {
                best = run;
            }
        }
        best.to_string()
    }
}

fn detect_transaction_type(lower: &str) -> TransactionType {
    if DEBIT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return TransactionType::Debit;
    }
    if CREDIT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return TransactionType::Credit;
    }
    // Unlabelled messages are assumed to be spend
    TransactionType::Debit
}

fn detect_payment_method(lower: &str) -> PaymentMethod {
    PAYMENT_METHOD_KEYWORDS
        .iter()
        .find(|(_, kws)| kws.iter().any(|k| lower.contains(k)))
        .map(|(method, _)| *method)
        .unwrap_or(PaymentMethod::Upi)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
