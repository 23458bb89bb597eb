//! Isotonic confidence calibration.
//!
//! A fitted curve maps raw classifier probability to observed accuracy. The
//! curve lives in a single persisted artifact that is re-read on every
//! `calibrate` call and replaced atomically on every `fit`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("no calibration samples")]
    NoSamples,

    #[error("non-finite value {0}")]
    NonFinite(f64),

    #[error("calibration curve is empty")]
    EmptyCurve,

    #[error("malformed curve: {0}")]
    Malformed(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("curve serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reading samples: {0}")]
    Csv(#[from] csv::Error),

    #[error("replacing curve: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("calibration store lock poisoned")]
    Poisoned,
}

/// Non-decreasing piecewise-linear map from raw probability to accuracy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsotonicCurve {
    pub x_thresholds: Vec<f64>,
    pub y_thresholds: Vec<f64>,
}

impl IsotonicCurve {
    /// Fit with pool-adjacent-violators.
    ///
    /// Samples sharing a probability are pooled by their mean first.
    pub fn fit(samples: &[(f64, bool)]) -> Result<Self, CalibrationError> {
        if samples.is_empty() {
            return Err(CalibrationError::NoSamples);
        }
        if let Some((p, _)) = samples.iter().find(|(p, _)| !p.is_finite()) {
            return Err(CalibrationError::NonFinite(*p));
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        // (x, sum of y, weight) per distinct x
        let mut points: Vec<(f64, f64, f64)> = Vec::new();
        for (p, correct) in sorted {
            let y = if correct { 1.0 } else { 0.0 };
            match points.last_mut() {
                Some(last) if last.0 == p => {
                    last.1 += y;
                    last.2 += 1.0;
                }
                _ => points.push((p, y, 1.0)),
            }
        }

        // Blocks of (sum of y, weight, point count)
        let mut blocks: Vec<(f64, f64, usize)> = Vec::new();
        for &(_, sum, weight) in &points {
            blocks.push((sum, weight, 1));
            while blocks.len() >= 2 {
                let n = blocks.len();
                let (s1, w1, c1) = blocks[n - 2];
                let (s2, w2, c2) = blocks[n - 1];
                if s1 / w1 <= s2 / w2 {
                    break;
                }
                blocks.truncate(n - 2);
                blocks.push((s1 + s2, w1 + w2, c1 + c2));
            }
        }

        let fitted: Vec<f64> = blocks
            .iter()
            .flat_map(|&(sum, weight, count)| std::iter::repeat_n(sum / weight, count))
            .collect();
        let xs: Vec<f64> = points.iter().map(|p| p.0).collect();

        // Interior points of flat runs add nothing to the interpolation
        let n = xs.len();
        let mut curve = IsotonicCurve {
            x_thresholds: Vec::with_capacity(n),
            y_thresholds: Vec::with_capacity(n),
        };
        for i in 0..n {
            let interior_flat =
                i > 0 && i + 1 < n && fitted[i] == fitted[i - 1] && fitted[i] == fitted[i + 1];
            if !interior_flat {
                curve.x_thresholds.push(xs[i]);
                curve.y_thresholds.push(fitted[i]);
            }
        }

        Ok(curve)
    }

    /// Checks shape invariants of a curve read from storage
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.x_thresholds.is_empty() {
            return Err(CalibrationError::EmptyCurve);
        }
        if self.x_thresholds.len() != self.y_thresholds.len() {
            return Err(CalibrationError::Malformed("length mismatch".to_string()));
        }
        if self.x_thresholds.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(CalibrationError::Malformed("x not strictly increasing".to_string()));
        }
        if self.y_thresholds.windows(2).any(|w| !(w[0] <= w[1])) {
            return Err(CalibrationError::Malformed("y decreasing".to_string()));
        }
        Ok(())
    }

    /// Map `p` through the curve, clipping to the fitted domain
    pub fn apply(&self, p: f64) -> Result<f64, CalibrationError> {
        if !p.is_finite() {
            return Err(CalibrationError::NonFinite(p));
        }
        let (xs, ys) = (&self.x_thresholds, &self.y_thresholds);
        if xs.is_empty() || xs.len() != ys.len() {
            return Err(CalibrationError::EmptyCurve);
        }

        let last = xs.len() - 1;
        if p <= xs[0] {
            return Ok(ys[0]);
        }
        if p >= xs[last] {
            return Ok(ys[last]);
        }

        let hi = xs.partition_point(|&x| x <= p);
        let lo = hi - 1;
        let t = (p - xs[lo]) / (xs[hi] - xs[lo]);
        Ok(ys[lo] + t * (ys[hi] - ys[lo]))
    }

    pub fn domain(&self) -> Option<(f64, f64)> {
        Some((*self.x_thresholds.first()?, *self.x_thresholds.last()?))
    }
}

/// What gets persisted: the curve plus when and from how much data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationArtifact {
    pub curve: IsotonicCurve,
    pub fitted_at: DateTime<Utc>,
    pub sample_count: usize,
}

/// Single named calibration artifact. `save` must replace it atomically.
pub trait CalibrationStore: Send + Sync {
    fn load(&self) -> Result<Option<CalibrationArtifact>, CalibrationError>;

    fn save(&self, artifact: &CalibrationArtifact) -> Result<(), CalibrationError>;
}

/// JSON file written through a sibling temp file and renamed into place
#[derive(Debug, Clone)]
pub struct FileCalibrationStore {
    path: PathBuf,
}

impl FileCalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CalibrationError {
        CalibrationError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn load(&self) -> Result<Option<CalibrationArtifact>, CalibrationError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let artifact: CalibrationArtifact = serde_json::from_str(&raw)?;
        artifact.curve.validate()?;
        Ok(Some(artifact))
    }

    fn save(&self, artifact: &CalibrationArtifact) -> Result<(), CalibrationError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        serde_json::to_writer_pretty(&mut tmp, artifact)?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

/// In-process store; readers get whichever `Arc` was current
#[derive(Debug, Default)]
pub struct MemoryCalibrationStore {
    current: RwLock<Option<Arc<CalibrationArtifact>>>,
}

impl CalibrationStore for MemoryCalibrationStore {
    fn load(&self) -> Result<Option<CalibrationArtifact>, CalibrationError> {
        let guard = self.current.read().map_err(|_| CalibrationError::Poisoned)?;
        Ok(guard.as_deref().cloned())
    }

    fn save(&self, artifact: &CalibrationArtifact) -> Result<(), CalibrationError> {
        let next = Arc::new(artifact.clone());
        *self.current.write().map_err(|_| CalibrationError::Poisoned)? = Some(next);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SampleRow {
    #[serde(default)]
    predicted_confidence: f64,
    #[serde(default)]
    correct: String,
}

/// Read `predicted_confidence,correct` rows; `correct` is true for 1/true/yes
pub fn read_samples_csv(path: impl AsRef<Path>) -> Result<Vec<(f64, bool)>, CalibrationError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path.as_ref())?;

    let mut samples = Vec::new();
    for row in rdr.deserialize() {
        let row: SampleRow = row?;
        let correct = matches!(row.correct.to_lowercase().as_str(), "1" | "true" | "yes");
        samples.push((row.predicted_confidence, correct));
    }
    Ok(samples)
}

/// Applies the persisted curve; falls back to the raw value on any problem
#[derive(Clone)]
pub struct ConfidenceCalibrator {
    store: Arc<dyn CalibrationStore>,
}

impl ConfidenceCalibrator {
    pub fn new(store: Arc<dyn CalibrationStore>) -> Self {
        Self { store }
    }

    /// Fit a new curve and replace the persisted one
    pub fn fit(&self, samples: &[(f64, bool)]) -> Result<IsotonicCurve, CalibrationError> {
        let curve = IsotonicCurve::fit(samples)?;
        let artifact = CalibrationArtifact {
            curve: curve.clone(),
            fitted_at: Utc::now(),
            sample_count: samples.len(),
        };
        self.store.save(&artifact)?;
        info!(
            samples = samples.len(),
            points = curve.x_thresholds.len(),
            "calibration curve fitted"
        );
        Ok(curve)
    }

    pub fn fit_from_csv(&self, path: impl AsRef<Path>) -> Result<IsotonicCurve, CalibrationError> {
        let samples = read_samples_csv(path)?;
        self.fit(&samples)
    }

    /// Currently persisted curve, if any
    pub fn current_curve(&self) -> Result<Option<IsotonicCurve>, CalibrationError> {
        Ok(self.store.load()?.map(|a| a.curve))
    }

    /// Calibrated probability, or `p` unchanged when no curve applies
    pub fn calibrate(&self, p: f64) -> f64 {
        let artifact = match self.store.load() {
            Ok(Some(artifact)) => artifact,
            Ok(None) => return p,
            Err(e) => {
                warn!(error = %e, "calibration curve unavailable, using raw confidence");
                return p;
            }
        };

        match artifact.curve.apply(p) {
            Ok(calibrated) => calibrated,
            Err(e) => {
                debug!(error = %e, p, "calibration transform failed, using raw confidence");
                p
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<(f64, bool)> {
        vec![
            (0.1, false),
            (0.2, false),
            (0.3, true),
            (0.4, false),
            (0.5, true),
            (0.6, true),
            (0.9, true),
        ]
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_fit_pools_violators() {
        let curve = IsotonicCurve::fit(&samples()).unwrap();
        assert_eq!(curve.x_thresholds, vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.9]);
        assert_eq!(curve.y_thresholds, vec![0.0, 0.0, 0.5, 0.5, 1.0, 1.0]);
        curve.validate().unwrap();
    }

    #[test]
    fn test_apply_interpolates_and_clips() {
        let curve = IsotonicCurve::fit(&samples()).unwrap();
        assert_eq!(curve.apply(0.0).unwrap(), 0.0);
        assert_eq!(curve.apply(0.05).unwrap(), 0.0);
        assert!(approx(curve.apply(0.25).unwrap(), 0.25));
        assert!(approx(curve.apply(0.35).unwrap(), 0.5));
        assert!(approx(curve.apply(0.45).unwrap(), 0.75));
        assert_eq!(curve.apply(0.95).unwrap(), 1.0);
        assert_eq!(curve.apply(1.0).unwrap(), 1.0);
        assert!(curve.apply(f64::NAN).is_err());
    }

    #[test]
    fn test_duplicate_probabilities_are_pooled() {
        let curve = IsotonicCurve::fit(&[(0.5, true), (0.5, false), (0.8, true)]).unwrap();
        assert_eq!(curve.x_thresholds, vec![0.5, 0.8]);
        assert_eq!(curve.y_thresholds, vec![0.5, 1.0]);
    }

    #[test]
    fn test_fit_rejects_empty_and_nan() {
        assert!(matches!(IsotonicCurve::fit(&[]), Err(CalibrationError::NoSamples)));
        assert!(matches!(
            IsotonicCurve::fit(&[(f64::NAN, true)]),
            Err(CalibrationError::NonFinite(_))
        ));
    }

    #[test]
    fn test_identity_without_curve() {
        let cal = ConfidenceCalibrator::new(Arc::new(MemoryCalibrationStore::default()));
        for p in [0.0, 0.13, 0.5, 0.99, 1.0] {
            assert_eq!(cal.calibrate(p), p);
        }
        assert!(cal.current_curve().unwrap().is_none());
    }

    #[test]
    fn test_calibrate_is_monotonic() {
        let cal = ConfidenceCalibrator::new(Arc::new(MemoryCalibrationStore::default()));
        cal.fit(&samples()).unwrap();
        let mut prev = f64::NEG_INFINITY;
        for i in 0..=100 {
            let c = cal.calibrate(i as f64 / 100.0);
            assert!(c >= prev, "not monotonic at {i}: {c} < {prev}");
            assert!((0.0..=1.0).contains(&c));
            prev = c;
        }
    }

    #[test]
    fn test_nan_input_passes_through() {
        let cal = ConfidenceCalibrator::new(Arc::new(MemoryCalibrationStore::default()));
        cal.fit(&samples()).unwrap();
        assert!(cal.calibrate(f64::NAN).is_nan());
    }

    #[test]
    fn test_refit_replaces_curve() {
        let cal = ConfidenceCalibrator::new(Arc::new(MemoryCalibrationStore::default()));
        cal.fit(&samples()).unwrap();
        assert!(approx(cal.calibrate(0.45), 0.75));

        cal.fit(&[(0.2, true), (0.8, true)]).unwrap();
        assert_eq!(cal.calibrate(0.45), 1.0);
    }

    #[test]
    fn test_file_store_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCalibrationStore::new(dir.path().join("nested/calibrator.json")));
        let cal = ConfidenceCalibrator::new(store.clone());
        assert_eq!(cal.calibrate(0.45), 0.45);

        let curve = cal.fit(&samples()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.curve, curve);
        assert_eq!(loaded.sample_count, 7);

        // A second calibrator over the same file sees the curve
        let other = ConfidenceCalibrator::new(Arc::new(FileCalibrationStore::new(store.path())));
        assert!(approx(other.calibrate(0.45), 0.75));

        // Only the artifact is left behind, no temp files
        let entries = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibrator.json");
        std::fs::write(&path, "{not json").unwrap();
        let cal = ConfidenceCalibrator::new(Arc::new(FileCalibrationStore::new(&path)));
        assert_eq!(cal.calibrate(0.42), 0.42);
        assert!(cal.current_curve().is_err());
    }

    #[test]
    fn test_fit_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        std::fs::write(
            &path,
            "predicted_confidence,correct\n0.2,0\n0.4,no\n0.6,TRUE\n0.8,yes\n0.9,1\n",
        )
        .unwrap();

        let samples = read_samples_csv(&path).unwrap();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[2], (0.6, true));
        assert_eq!(samples[1], (0.4, false));

        let cal = ConfidenceCalibrator::new(Arc::new(MemoryCalibrationStore::default()));
        let curve = cal.fit_from_csv(&path).unwrap();
        assert_eq!(curve.domain(), Some((0.2, 0.9)));
        assert_eq!(cal.calibrate(0.3), 0.0);
    }

    #[test]
    fn test_readers_never_see_a_partial_curve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibrator.json");
        let writer = ConfidenceCalibrator::new(Arc::new(FileCalibrationStore::new(&path)));

        let steep = [(0.2, false), (0.8, true)];
        let flat = [(0.2, true), (0.8, true)];
        let steep_value = IsotonicCurve::fit(&steep).unwrap().apply(0.35).unwrap();
        let flat_value = IsotonicCurve::fit(&flat).unwrap().apply(0.35).unwrap();
        assert!(approx(steep_value, 0.25));
        assert_eq!(flat_value, 1.0);
        writer.fit(&steep).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..60 {
                    let samples: &[(f64, bool)] = if i % 2 == 0 { &flat } else { &steep };
                    writer.fit(samples).unwrap();
                }
            });
            for _ in 0..4 {
                scope.spawn(|| {
                    let store = FileCalibrationStore::new(&path);
                    let reader = ConfidenceCalibrator::new(Arc::new(store.clone()));
                    for _ in 0..150 {
                        let loaded = store.load();
                        assert!(matches!(loaded, Ok(Some(_))), "load failed: {loaded:?}");
                        let c = reader.calibrate(0.35);
                        assert!(
                            approx(c, steep_value) || approx(c, flat_value),
                            "unexpected calibrated value {c}"
                        );
                    }
                });
            }
        });
    }
}
