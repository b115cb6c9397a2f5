//! Analysis manifest management
//!
//! A carve of a 500 MB dump is worth keeping: the manifest is a
//! serializable image of an [`AnalysisResult`] that archives what was
//! found and where, so a dump can be re-extracted without re-scanning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::carver::AnalysisResult;
use crate::registry::FormatKind;
use crate::{AssetError, Result};

/// Manifest describing one analyzed dump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisManifest {
    /// Version of the manifest format
    pub version: String,

    /// Source dump information
    pub source: SourceInfo,

    /// Carved entries in offset order
    pub entries: Vec<ManifestEntry>,
}

/// Information about the analyzed dump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Dump path (relative or absolute)
    pub path: PathBuf,

    /// Dump length in bytes
    pub length: u64,
}

/// One carved entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub offset: u64,
    pub length: u64,
    pub format: FormatKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl AnalysisManifest {
    /// Capture an analysis result for the given dump
    pub fn from_analysis(
        dump_path: impl Into<PathBuf>,
        dump_length: u64,
        result: &AnalysisResult,
    ) -> Self {
        Self {
            version: "1.0.0".to_string(),
            source: SourceInfo {
                path: dump_path.into(),
                length: dump_length,
            },
            entries: result
                .entries
                .iter()
                .map(|entry| ManifestEntry {
                    offset: entry.offset,
                    length: entry.length,
                    format: entry.kind,
                    filename: entry.filename.clone(),
                })
                .collect(),
        }
    }

    /// Per-format entry counts
    pub fn counts(&self) -> BTreeMap<FormatKind, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.format).or_insert(0) += 1;
        }
        counts
    }

    /// Load manifest from JSON file
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| AssetError::ManifestError(e.to_string()))
    }

    /// Save manifest to JSON file
    pub fn to_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| AssetError::ManifestError(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load manifest from TOML file
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| AssetError::ManifestError(e.to_string()))
    }

    /// Save manifest to TOML file
    pub fn to_toml(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| AssetError::ManifestError(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
