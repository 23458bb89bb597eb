//! spendsense-ingest: turns raw transaction notifications into structured records.

pub mod normalizer;

pub use normalizer::TextNormalizer;
