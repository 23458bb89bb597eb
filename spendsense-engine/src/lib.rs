//! spendsense-engine: merchant resolution, categorization, calibration and
//! decision fusion for transaction notifications.

pub mod calibrator;
pub mod categorizer;
pub mod classifier;
pub mod fusion;
pub mod merchant;
pub mod pipeline;
pub mod store;

pub use calibrator::{
    CalibrationArtifact, CalibrationError, CalibrationStore, ConfidenceCalibrator,
    FileCalibrationStore, IsotonicCurve, MemoryCalibrationStore,
};
pub use categorizer::Categorizer;
pub use classifier::{Classifier, ClassifierError, NaiveBayesClassifier};
pub use fusion::{DecisionFusion, FusionOutcome};
pub use merchant::MerchantResolver;
pub use pipeline::{run_batch, run_until_drained, BatchSummary, Pipeline, PipelineError, ProcessedMessage, Stage};
pub use store::{MemoryStore, StoreError, TransactionStore};
