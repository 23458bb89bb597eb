use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// `$SPENDSENSE_HOME`, else `~/.spendsense`
pub fn spendsense_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("SPENDSENSE_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".spendsense"))
}

pub fn ensure_spendsense_home() -> Result<PathBuf> {
    let dir = spendsense_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

/// Relative paths are taken from the spendsense home directory
pub fn resolve_in_home(home: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        home.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_in_home() {
        let home = Path::new("/tmp/ss");
        assert_eq!(resolve_in_home(home, Path::new("model.json")), PathBuf::from("/tmp/ss/model.json"));
        assert_eq!(resolve_in_home(home, Path::new("/opt/m.json")), PathBuf::from("/opt/m.json"));
    }
}
