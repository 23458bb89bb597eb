//! Fuzzy merchant resolution against the registry and a builtin alias table.
//!
//! Registry rows are authoritative: they are scanned first and a builtin
//! alias only takes over on a strictly higher score.

use anyhow::Result;
use regex::Regex;
use spendsense_core::{MerchantMatch, RegistryEntry};

/// Canonical merchant -> spellings seen in notifications
pub const BUILTIN_ALIASES: &[(&str, &[&str])] = &[
    ("swiggy", &["swiggy", "swiggy.in"]),
    ("zomato", &["zomato", "zomato.com"]),
    ("amazon", &["amazon", "amazonpay", "amazon.in"]),
    ("flipkart", &["flipkart", "fkrt"]),
    ("myntra", &["myntra"]),
    ("uber", &["uber", "uberindia"]),
    ("ola", &["ola", "ola cabs"]),
    ("paytm", &["paytm"]),
    ("dream11", &["dream11"]),
    ("rummycircle", &["rummycircle", "rummy"]),
    ("netflix", &["netflix"]),
    ("spotify", &["spotify"]),
    ("airtel", &["airtel"]),
    ("jio", &["jio"]),
    ("vi", &["vi", "vodafone idea"]),
];

pub const NO_CANDIDATE: &str = "no_candidate";

/// Case-insensitive normalized edit similarity in [0, 1].
///
/// Empty on either side scores 0.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

/// Running best while scanning match sources
struct Best<'a> {
    name: String,
    id: String,
    score: f64,
    alias: String,
    record: Option<&'a RegistryEntry>,
}

#[derive(Debug, Clone)]
pub struct MerchantResolver {
    noise_re: Regex,
    token_re: Regex,
}

impl MerchantResolver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            noise_re: Regex::new(r"(?i)\b(?:upi|txn|tx|ref|id|via|paid|debited|credited)\b")?,
            token_re: Regex::new(r"[a-z0-9]+")?,
        })
    }

    /// Resolve a merchant candidate against a registry snapshot.
    pub fn resolve(&self, candidate: &str, registry: &[RegistryEntry]) -> MerchantMatch {
        if candidate.trim().is_empty() {
            return MerchantMatch::unresolved(NO_CANDIDATE);
        }

        let cleaned = self
            .noise_re
            .replace_all(candidate, " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let lowered = cleaned.to_lowercase();
        let tokens: Vec<String> = self
            .token_re
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect();

        let best_token = |target: &str| {
            tokens
                .iter()
                .map(|t| similarity(t, target))
                .fold(0.0_f64, f64::max)
        };

        let mut best = Best {
            name: String::new(),
            id: String::new(),
            score: 0.0,
            alias: String::new(),
            record: None,
        };

        for entry in registry {
            let name = entry.merchant_name.to_lowercase();
            let id = entry.merchant_id.to_lowercase();
            let score = similarity(&cleaned, &name)
                .max(similarity(&cleaned, &id))
                .max(if name.is_empty() { 0.0 } else { best_token(&name) });

            if score > best.score {
                best = Best {
                    name: if entry.merchant_name.is_empty() {
                        entry.merchant_id.clone()
                    } else {
                        entry.merchant_name.clone()
                    },
                    id: entry.merchant_id.clone(),
                    score,
                    alias: name,
                    record: Some(entry),
                };
            }
        }

        for (canonical, aliases) in BUILTIN_ALIASES {
            for alias in *aliases {
                let score = similarity(&cleaned, alias).max(best_token(alias));
                // Ties stay with the registry
                if score > best.score {
                    best = Best {
                        name: capitalize(canonical),
                        id: canonical.to_string(),
                        score,
                        alias: alias.to_string(),
                        record: None,
                    };
                }
            }
        }

        MerchantMatch {
            merchant_name: best.name,
            merchant_id: best.id,
            score: best.score.clamp(0.0, 1.0),
            matched_alias: best.alias,
            matched_record: best.record.cloned(),
            candidate: candidate.to_string(),
            cleaned,
            tokens,
            reason: None,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
