use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::state::{ensure_spendsense_home, resolve_in_home};

/// Env var that switches merchant rule boosting on or off
pub const BOOSTING_ENV: &str = "RULE_BOOSTING_ENABLED";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub paths: PathsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Raw confidence at or above which a prediction is AUTO
    pub auto_threshold: f64,
    /// Merchant match score needed before the registry may override
    pub override_threshold: f64,
    pub boosting_enabled: bool,
    pub batch_size: usize,
    pub model_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Naive Bayes model (JSON); relative paths resolve under the home dir
    pub model: PathBuf,
    pub calibrator: PathBuf,
    /// Registry snapshot (JSON array), optional
    pub registry: Option<PathBuf>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            auto_threshold: 0.65,
            override_threshold: 0.8,
            boosting_enabled: true,
            batch_size: 50,
            model_version: "v1".to_string(),
        }
    }
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            model: PathBuf::from("transaction_model_v1.json"),
            calibrator: PathBuf::from("calibrator_isotonic_v1.json"),
            registry: None,
        }
    }
}

impl Config {
    /// Env overrides on top of the file values
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var(BOOSTING_ENV) {
            self.pipeline.boosting_enabled = parse_flag(&v);
        }
    }

    /// Thresholds are probabilities; a zero batch would never drain
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        for (name, value) in [
            ("auto_threshold", p.auto_threshold),
            ("override_threshold", p.override_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("pipeline.{name} must be within [0, 1], got {value}");
            }
        }
        if p.batch_size == 0 {
            bail!("pipeline.batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn model_path(&self) -> Result<PathBuf> {
        Ok(resolve_in_home(&ensure_spendsense_home()?, &self.paths.model))
    }

    pub fn calibrator_path(&self) -> Result<PathBuf> {
        Ok(resolve_in_home(&ensure_spendsense_home()?, &self.paths.calibrator))
    }

    pub fn registry_path(&self) -> Result<Option<PathBuf>> {
        match &self.paths.registry {
            Some(p) => Ok(Some(resolve_in_home(&ensure_spendsense_home()?, p))),
            None => Ok(None),
        }
    }
}

/// "1", "true" and "yes" (any case) are on; everything else is off
pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_spendsense_home()?.join("config.toml"))
}

/// File values, then env overrides, then range checks
pub fn load_config() -> Result<Config> {
    let p = config_path()?;
    let mut cfg: Config = match fs::read_to_string(&p) {
        Ok(s) => toml::from_str(&s).with_context(|| format!("parse {}", p.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(e).with_context(|| format!("read {}", p.display())),
    };
    cfg.apply_env();
    cfg.validate()
        .with_context(|| format!("invalid settings in {}", p.display()))?;
    Ok(cfg)
}

/// Write a default config.toml unless one is already there.
/// Returns the path and whether a file was written.
pub fn init_config() -> Result<(PathBuf, bool)> {
    let p = config_path()?;
    if p.exists() {
        return Ok((p, false));
    }
    let cfg = Config::default();
    cfg.validate()?;
    let body = toml::to_string_pretty(&cfg).context("serialize config")?;
    fs::write(&p, body).with_context(|| format!("write {}", p.display()))?;
    Ok((p, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        for on in ["1", "true", "TRUE", "Yes", " yes "] {
            assert!(parse_flag(on), "{on}");
        }
        for off in ["0", "false", "no", "", "enabled"] {
            assert!(!parse_flag(off), "{off}");
        }
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[pipeline]
boosting_enabled = false
batch_size = 10
"#,
        )
        .unwrap();
        assert!(!cfg.pipeline.boosting_enabled);
        assert_eq!(cfg.pipeline.batch_size, 10);
        assert_eq!(cfg.pipeline.auto_threshold, 0.65);
        assert_eq!(cfg.pipeline.override_threshold, 0.8);
        assert_eq!(cfg.paths.calibrator, PathBuf::from("calibrator_isotonic_v1.json"));
        assert!(cfg.paths.registry.is_none());
    }

    #[test]
    fn test_default_config_serializes() {
        let s = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(s.contains("[pipeline]"));
        assert!(s.contains("override_threshold = 0.8"));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(Config::default().validate().is_ok());

        let mut cfg = Config::default();
        cfg.pipeline.override_threshold = 1.2;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("override_threshold"), "{err}");

        let mut cfg = Config::default();
        cfg.pipeline.auto_threshold = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.pipeline.batch_size = 0;
        assert!(cfg.validate().is_err());
    }
}
