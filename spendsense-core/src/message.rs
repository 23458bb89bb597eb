use serde::{Deserialize, Serialize};

/// An unprocessed notification handed over by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub user_id: String,
    /// May be empty; the pipeline degrades instead of failing
    #[serde(default)]
    pub raw_text: String,
}

impl Message {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            raw_text: raw_text.into(),
        }
    }
}
