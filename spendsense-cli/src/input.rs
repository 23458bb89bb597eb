//! File inputs for the CLI: message CSVs and registry snapshots

use anyhow::{Context, Result};
use spendsense_core::{Message, RegistryEntry};
use std::fs;
use std::path::Path;

/// Read `id,user_id,raw_text` rows. Blank `raw_text` is kept.
pub fn read_messages_csv(path: &Path) -> Result<Vec<Message>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut out = Vec::new();
    for (i, row) in rdr.deserialize().enumerate() {
        let msg: Message = row.with_context(|| format!("{} row {}", path.display(), i + 1))?;
        out.push(msg);
    }
    Ok(out)
}

/// Registry snapshot stored as a JSON array of entries
pub fn read_registry_json(path: &Path) -> Result<Vec<RegistryEntry>> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_messages_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sms.csv");
        fs::write(
            &path,
            "id,user_id,raw_text\nt1,u1,\"Rs 450 debited via UPI SWIGGY, ref ABCD1234\"\nt2,u1,\n",
        )
        .unwrap();

        let msgs = read_messages_csv(&path).unwrap();
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].raw_text.contains("SWIGGY"));
        assert_eq!(msgs[1].raw_text, "");
    }

    #[test]
    fn test_read_registry_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(
            &path,
            r#"[{"merchant_id":"m-1","merchant_name":"Swiggy","primary_category_id":"cat-1","category_confidence":0.9},
               {"merchant_id":"m-2","merchant_name":"Local Kirana"}]"#,
        )
        .unwrap();

        let reg = read_registry_json(&path).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg[0].category_confidence, Some(0.9));
        assert_eq!(reg[1].primary_category_id, None);
    }
}
