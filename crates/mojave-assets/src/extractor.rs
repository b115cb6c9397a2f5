//! Writes carved entries to disk, one file per entry
//!
//! Entries extract in parallel; a shared claim table serializes name
//! collisions so two workers can never write the same path. A failure on
//! one entry is recorded in the summary and never aborts the batch.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use xenonutils::formats::nif::NifConverter;
use xenonutils::scda::{Decompiler, OpcodeTable};
use xenonutils::XenonError;

use crate::carver::{AnalysisResult, CarvedEntry};
use crate::registry::{FormatKind, FormatRegistry, Metadata};
use crate::task::{report, CancelToken, ProgressCallback};
use crate::texpath;
use crate::{AssetError, Result};

/// How many per-entry error messages the summary keeps
const MAX_RECORDED_ERRORS: usize = 20;

/// Converts a console DDX surface into a PC DDS
pub trait DdxTranscoder: Send + Sync {
    fn convert(&self, ddx: &[u8], verbose: bool) -> Result<Vec<u8>>;
}

/// Converts XMA audio into Ogg Vorbis
pub trait XmaTranscoder: Send + Sync {
    fn convert(&self, xma: &[u8]) -> Result<Vec<u8>>;
}

/// Caller-owned extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOptions {
    pub output_path: PathBuf,
    /// Formats to extract; `None` extracts everything
    #[serde(default)]
    pub include: Option<Vec<FormatKind>>,
    #[serde(default)]
    pub convert_ddx: bool,
    /// Transcode XMA audio to Ogg Vorbis alongside the raw stream
    #[serde(default)]
    pub convert_xma: bool,
    /// Rewrite big-endian NIF models to PC layout while extracting
    #[serde(default)]
    pub convert_nif: bool,
    /// When false, textures whose recovered path marks them as atlas
    /// sheets are skipped
    #[serde(default)]
    pub save_atlas: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub skip_existing: bool,
}

impl ExtractionOptions {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            include: None,
            convert_ddx: false,
            convert_xma: false,
            convert_nif: false,
            save_atlas: true,
            verbose: false,
            skip_existing: false,
        }
    }
}

/// Per-entry outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Extracted,
    Skipped,
    Failed,
}

/// Batch outcome
#[derive(Debug, Default)]
pub struct ExtractionSummary {
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The first few per-entry error messages
    pub errors: Vec<String>,
}

/// Extraction coordinator
pub struct Extractor<'a> {
    registry: &'a FormatRegistry,
    options: ExtractionOptions,
    ddx_transcoder: Option<&'a dyn DdxTranscoder>,
    xma_transcoder: Option<&'a dyn XmaTranscoder>,
    opcode_table: OpcodeTable,
}

impl<'a> Extractor<'a> {
    pub fn new(registry: &'a FormatRegistry, options: ExtractionOptions) -> Self {
        Self {
            registry,
            options,
            ddx_transcoder: None,
            xma_transcoder: None,
            opcode_table: OpcodeTable::builtin(),
        }
    }

    pub fn with_ddx_transcoder(mut self, transcoder: &'a dyn DdxTranscoder) -> Self {
        self.ddx_transcoder = Some(transcoder);
        self
    }

    pub fn with_xma_transcoder(mut self, transcoder: &'a dyn XmaTranscoder) -> Self {
        self.xma_transcoder = Some(transcoder);
        self
    }

    pub fn with_opcode_table(mut self, table: OpcodeTable) -> Self {
        self.opcode_table = table;
        self
    }

    /// Extract every selected entry of `result` out of `dump`.
    pub fn extract(
        &self,
        dump: &[u8],
        result: &AnalysisResult,
        progress: Option<&ProgressCallback>,
        cancel: &CancelToken,
    ) -> Result<ExtractionSummary> {
        let selected: Vec<&CarvedEntry> = result
            .entries
            .iter()
            .filter(|entry| self.is_selected(entry))
            .collect();
        let total = selected.len();
        tracing::info!("extracting {total} of {} entries", result.entries.len());

        let claimed: Mutex<HashSet<PathBuf>> = Mutex::new(HashSet::new());
        let done = AtomicUsize::new(0);
        let statuses: Vec<(EntryStatus, Option<String>)> = selected
            .par_iter()
            .map(|entry| {
                if cancel.is_cancelled() {
                    return (
                        EntryStatus::Failed,
                        Some("cancelled before entry".to_string()),
                    );
                }
                let status = match self.extract_entry(dump, entry, &claimed) {
                    Ok(status) => (status, None),
                    Err(e) => {
                        let message =
                            format!("{} at {:#X}: {e}", entry.kind, entry.offset);
                        tracing::warn!("{message}");
                        (EntryStatus::Failed, Some(message))
                    }
                };
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                report(
                    progress,
                    finished as f32 / total.max(1) as f32,
                    format!("extracted {finished}/{total}"),
                );
                status
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(AssetError::Cancelled);
        }

        let mut summary = ExtractionSummary::default();
        for (status, message) in statuses {
            match status {
                EntryStatus::Extracted => summary.extracted += 1,
                EntryStatus::Skipped => summary.skipped += 1,
                EntryStatus::Failed => summary.failed += 1,
            }
            if let Some(message) = message {
                if summary.errors.len() < MAX_RECORDED_ERRORS {
                    summary.errors.push(message);
                }
            }
        }
        Ok(summary)
    }

    fn is_selected(&self, entry: &CarvedEntry) -> bool {
        if let Some(include) = &self.options.include {
            if !include.contains(&entry.kind) {
                return false;
            }
        }
        if !self.options.save_atlas && is_atlas(entry) {
            return false;
        }
        true
    }

    fn extract_entry(
        &self,
        dump: &[u8],
        entry: &CarvedEntry,
        claimed: &Mutex<HashSet<PathBuf>>,
    ) -> Result<EntryStatus> {
        let module = self
            .registry
            .by_kind(entry.kind)
            .ok_or_else(|| AssetError::InvalidFormat(format!("unregistered {}", entry.kind)))?;

        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        let bytes = dump
            .get(start..end)
            .ok_or_else(|| AssetError::InvalidFormat("entry outside the dump".to_string()))?;

        let folder = self.options.output_path.join(module.output_folder());
        fs::create_dir_all(&folder)?;

        let base_name = match &entry.filename {
            Some(name) => texpath::sanitize_file_name(name),
            None => format!(
                "{}_{:08X}.{}",
                module.category().as_str(),
                entry.offset,
                module.extension()
            ),
        };

        let target = match self.claim_path(&folder, &base_name, claimed)? {
            Some(path) => path,
            None => {
                tracing::debug!("skipping existing {base_name}");
                return Ok(EntryStatus::Skipped);
            }
        };

        // Console models are rewritten to PC layout on the way out; when
        // the rewrite fails, the original bytes are kept instead
        let mut output = bytes;
        let converted;
        if entry.kind == FormatKind::Nif && self.options.convert_nif {
            match NifConverter::to_little_endian(bytes) {
                Ok(result) => {
                    for warning in &result.warnings {
                        tracing::warn!("{}: {warning}", target.display());
                    }
                    converted = result.data;
                    output = &converted;
                }
                Err(XenonError::EndiannessMismatch { .. }) => {
                    tracing::debug!("{} is already PC layout", target.display());
                }
                Err(e) => {
                    tracing::warn!("NIF conversion failed for {}: {e}", target.display());
                }
            }
        }

        fs::write(&target, output)?;
        tracing::debug!("wrote {}", target.display());

        match entry.kind {
            FormatKind::Ddx if self.options.convert_ddx => {
                self.convert_ddx(bytes, &target);
            }
            FormatKind::Xma if self.options.convert_xma => {
                self.convert_xma(bytes, &target);
            }
            FormatKind::Scda => {
                self.write_script_source(bytes, &target);
            }
            _ => {}
        }

        Ok(EntryStatus::Extracted)
    }

    /// Reserve an output path, appending `_N` until the name is free.
    ///
    /// Returns `None` when the path exists and `skip_existing` is set.
    fn claim_path(
        &self,
        folder: &Path,
        base_name: &str,
        claimed: &Mutex<HashSet<PathBuf>>,
    ) -> Result<Option<PathBuf>> {
        let (stem, extension) = match base_name.rsplit_once('.') {
            Some((stem, ext)) => (stem.to_string(), Some(ext.to_string())),
            None => (base_name.to_string(), None),
        };

        let mut claimed = claimed
            .lock()
            .map_err(|_| AssetError::InvalidFormat("claim table poisoned".to_string()))?;

        for n in 0u32.. {
            let name = match (&extension, n) {
                (Some(ext), 0) => format!("{stem}.{ext}"),
                (Some(ext), n) => format!("{stem}_{n}.{ext}"),
                (None, 0) => stem.clone(),
                (None, n) => format!("{stem}_{n}"),
            };
            let path = folder.join(name);

            if claimed.contains(&path) {
                continue;
            }
            if path.exists() {
                if self.options.skip_existing {
                    return Ok(None);
                }
                continue;
            }
            claimed.insert(path.clone());
            return Ok(Some(path));
        }
        unreachable!("collision loop is unbounded");
    }

    /// DDX entries optionally transcode to a sibling `.dds`; the original
    /// is kept either way.
    fn convert_ddx(&self, bytes: &[u8], target: &Path) {
        let Some(transcoder) = self.ddx_transcoder else {
            tracing::warn!("convert_ddx set but no transcoder provided");
            return;
        };
        match transcoder.convert(bytes, self.options.verbose) {
            Ok(dds) => {
                let dds_path = target.with_extension("dds");
                if let Err(e) = fs::write(&dds_path, dds) {
                    tracing::warn!("failed to write {}: {e}", dds_path.display());
                } else {
                    tracing::debug!("converted {}", dds_path.display());
                }
            }
            Err(e) => {
                tracing::warn!("DDX conversion failed for {}: {e}", target.display());
            }
        }
    }

    /// XMA entries optionally transcode to a sibling `.ogg`.
    fn convert_xma(&self, bytes: &[u8], target: &Path) {
        let Some(transcoder) = self.xma_transcoder else {
            tracing::warn!("convert_xma set but no transcoder provided");
            return;
        };
        match transcoder.convert(bytes) {
            Ok(ogg) => {
                let ogg_path = target.with_extension("ogg");
                if let Err(e) = fs::write(&ogg_path, ogg) {
                    tracing::warn!("failed to write {}: {e}", ogg_path.display());
                } else {
                    tracing::debug!("converted {}", ogg_path.display());
                }
            }
            Err(e) => {
                tracing::warn!("XMA conversion failed for {}: {e}", target.display());
            }
        }
    }

    /// SCDA entries get a decompiled `.txt` next to the raw record.
    fn write_script_source(&self, bytes: &[u8], target: &Path) {
        let Some(scda) = xenonutils::scda::Scda::parse(bytes) else {
            return;
        };
        let source = Decompiler::new(&self.opcode_table).decompile(scda.bytecode);
        let txt_path = target.with_extension("txt");
        if let Err(e) = fs::write(&txt_path, source) {
            tracing::warn!("failed to write {}: {e}", txt_path.display());
        }
    }
}

/// Atlas sheets are recognized by their recovered path
fn is_atlas(entry: &CarvedEntry) -> bool {
    let path = match &entry.metadata {
        Metadata::Texture {
            texture_path: Some(path),
            ..
        } => path,
        _ => return false,
    };
    path.to_ascii_lowercase().contains("atlas")
}
