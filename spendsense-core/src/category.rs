//! Canonical category names and their stable ids

use std::collections::HashMap;

/// Category label -> id, as stored by the categorization table
pub const CATEGORY_IDS: &[(&str, &str)] = &[
    ("Food & Dining", "31dd2d93-25f4-43c6-9833-6816d8a1bfce"),
    ("Shopping", "b2104a33-0a09-44b1-9026-195e01c73ddc"),
    ("Transportation", "1da57196-d4fb-4785-96d1-3fbe7cc34e58"),
    ("Utilities & Bills", "429fcded-f706-4576-8858-a4421f57a8b1"),
    ("Entertainment", "bcf0aaae-f06f-4bb7-b9e5-2db48fa59d0d"),
    ("Health & Fitness", "4a71ecfa-554a-49f8-8daf-004a99dcda21"),
    ("Transfer & Wallet", "fecd0afa-5522-416e-b8b8-c08bbb3fe993"),
    ("Others", "3880903c-bc06-44f1-9eed-da04124feb70"),
    ("Education", "00bbd2d8-7f0b-4f01-b481-3d81aae5c813"),
    ("Gifts & Donations", "18e662e7-5ab7-4482-94e3-777d81a20c68"),
    ("Subscriptions", "18f7fb6a-8fe8-46fa-8765-8680064b8655"),
    ("Financial Services", "2e0c0c8b-b2f1-41fe-bda1-8e8e984ea13e"),
    ("Travel & Lodging", "308f79a8-204d-4cad-ac56-ed0f191e3937"),
    ("Personal Care", "8af77e68-fb27-4a54-9e0a-cdaa779dbbae"),
];

/// Static lookup from classifier label to category id.
///
/// Unknown labels resolve to `None`; callers must tolerate that.
#[derive(Debug, Clone)]
pub struct CategoryMap {
    ids: HashMap<String, String>,
}

impl Default for CategoryMap {
    fn default() -> Self {
        Self::from_pairs(CATEGORY_IDS.iter().copied())
    }
}

impl CategoryMap {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            ids: pairs
                .into_iter()
                .map(|(name, id)| (name.to_string(), id.to_string()))
                .collect(),
        }
    }

    pub fn id_for(&self, label: &str) -> Option<String> {
        self.ids.get(label).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_labels_map() {
        let map = CategoryMap::default();
        assert_eq!(CATEGORY_IDS.len(), 14);
        for (name, id) in CATEGORY_IDS {
            assert_eq!(map.id_for(name).as_deref(), Some(*id));
        }
        assert_eq!(
            map.id_for("Food & Dining").as_deref(),
            Some("31dd2d93-25f4-43c6-9833-6816d8a1bfce")
        );
    }

    #[test]
    fn test_unknown_label_is_none() {
        let map = CategoryMap::default();
        assert_eq!(map.id_for("Crypto"), None);
        assert_eq!(map.id_for("food & dining"), None);
    }
}
