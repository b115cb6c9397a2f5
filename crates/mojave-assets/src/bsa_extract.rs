//! Whole-archive BSA extraction
//!
//! Files extract in parallel; every worker opens its own read handle over
//! the archive path, so no seek position is ever shared. A payload that
//! fails to decompress marks that file failed and the rest continue.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use memmap2::Mmap;
use rayon::prelude::*;

use xenonutils::formats::bsa::BsaArchive;

use crate::task::{report, CancelToken, ProgressCallback};
use crate::texpath;
use crate::{AssetError, Result};

/// Per-file extraction record
#[derive(Debug, Clone)]
pub struct BsaFileReport {
    /// `folder\name` as stored in the archive
    pub path: String,
    pub size: Option<u64>,
    pub error: Option<String>,
}

/// Whole-archive outcome
#[derive(Debug)]
pub struct BsaExtractionReport {
    pub extracted: usize,
    pub failed: usize,
    pub files: Vec<BsaFileReport>,
}

/// Archive extractor bound to an archive path
pub struct BsaExtractor {
    archive_path: PathBuf,
    archive: BsaArchive,
}

impl BsaExtractor {
    /// Open and parse the archive tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let archive_path = path.as_ref().to_path_buf();
        let file = File::open(&archive_path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let archive = BsaArchive::parse(&mmap)?;

        tracing::info!(
            "opened {} v{}: {} folders, {} files",
            archive_path.display(),
            archive.header.version,
            archive.header.folder_count,
            archive.header.file_count,
        );

        Ok(Self {
            archive_path,
            archive,
        })
    }

    pub fn archive(&self) -> &BsaArchive {
        &self.archive
    }

    /// Extract every file under `output_dir/folder/name`.
    pub fn extract_all(
        &self,
        output_dir: &Path,
        progress: Option<&ProgressCallback>,
        cancel: &CancelToken,
    ) -> Result<BsaExtractionReport> {
        let jobs: Vec<(usize, usize)> = self
            .archive
            .folders
            .iter()
            .enumerate()
            .flat_map(|(f, folder)| (0..folder.files.len()).map(move |i| (f, i)))
            .collect();
        let total = jobs.len();
        let done = AtomicUsize::new(0);

        let files: Vec<BsaFileReport> = jobs
            .par_iter()
            .map(|&(folder_index, file_index)| {
                let folder = &self.archive.folders[folder_index];
                let file = &folder.files[file_index];
                let display_path = join_archive_path(&folder.name, &file.name, file_index);

                if cancel.is_cancelled() {
                    return BsaFileReport {
                        path: display_path,
                        size: None,
                        error: Some("cancelled".to_string()),
                    };
                }

                let outcome = self.extract_one(folder_index, file_index, output_dir);
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                report(
                    progress,
                    finished as f32 / total.max(1) as f32,
                    format!("extracted {finished}/{total}"),
                );

                match outcome {
                    Ok(size) => BsaFileReport {
                        path: display_path,
                        size: Some(size),
                        error: None,
                    },
                    Err(e) => {
                        tracing::warn!("{display_path}: {e}");
                        BsaFileReport {
                            path: display_path,
                            size: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(AssetError::Cancelled);
        }

        let extracted = files.iter().filter(|f| f.error.is_none()).count();
        Ok(BsaExtractionReport {
            extracted,
            failed: files.len() - extracted,
            files,
        })
    }

    fn extract_one(
        &self,
        folder_index: usize,
        file_index: usize,
        output_dir: &Path,
    ) -> Result<u64> {
        // Per-worker read handle over the archive
        let file_handle = File::open(&self.archive_path)?;
        let mmap = unsafe { Mmap::map(&file_handle)? };

        let folder = &self.archive.folders[folder_index];
        let file = &folder.files[file_index];
        let content = self.archive.extract_file(&mmap, file)?;

        let folder_dir = folder
            .name
            .split('\\')
            .filter(|part| !part.is_empty())
            .map(texpath::sanitize_file_name)
            .fold(output_dir.to_path_buf(), |dir, part| dir.join(part));
        fs::create_dir_all(&folder_dir)?;

        let file_name = if file.name.is_empty() {
            format!("file_{:016X}", file.hash.numeric())
        } else {
            texpath::sanitize_file_name(&file.name)
        };
        let target = folder_dir.join(file_name);
        fs::write(&target, &content)?;
        Ok(content.len() as u64)
    }
}

fn join_archive_path(folder: &str, file: &str, index: usize) -> String {
    match (folder.is_empty(), file.is_empty()) {
        (false, false) => format!("{folder}\\{file}"),
        (false, true) => format!("{folder}\\<file {index}>"),
        (true, false) => file.to_string(),
        (true, true) => format!("<file {index}>"),
    }
}
