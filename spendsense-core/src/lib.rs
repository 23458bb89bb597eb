//! spendsense-core: value types shared by the categorization pipeline

pub mod category;
pub mod decision;
pub mod merchant;
pub mod message;
pub mod prediction;
pub mod record;

pub use category::CategoryMap;
pub use decision::{AppliedRule, AuditRecord, Decision, PredictionSource};
pub use merchant::{MerchantMatch, RegistryEntry};
pub use message::Message;
pub use prediction::{CategoryPrediction, PredictionStatus, Suggestion};
pub use record::{NormalizedRecord, PaymentMethod, TransactionType};
