//! Asset carving and extraction for Xbox 360 Fallout memory dumps
//!
//! This crate provides tools for:
//! - Carving embedded assets out of raw minidump images by signature
//! - Extracting carved assets into per-category folders
//! - Converting big-endian console formats through pluggable transcoders
//! - Harvesting plugin-record fragments (editor IDs, game settings,
//!   script sources) from an entire dump
//! - Reading Bethesda BSA archives found in memory

pub mod bsa_extract;
pub mod carver;
pub mod dump;
pub mod esm_scan;
pub mod extractor;
pub mod formats;
pub mod manifest;
pub mod registry;
pub mod task;
pub mod texpath;

pub use carver::{AnalysisResult, CarvedEntry, Carver};
pub use dump::Dump;
pub use extractor::{ExtractionOptions, ExtractionSummary, Extractor};
pub use registry::{Category, FormatKind, FormatRegistry, Metadata, ParseResult};
pub use task::{CancelToken, ProgressCallback, ProgressReport};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Failed to read dump: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(#[from] xenonutils::XenonError),

    #[error("Invalid asset format: {0}")]
    InvalidFormat(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Transcoder failed: {0}")]
    Transcoder(String),

    #[error("Manifest error: {0}")]
    ManifestError(String),
}

pub type Result<T> = std::result::Result<T, AssetError>;
