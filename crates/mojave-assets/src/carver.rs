//! Signature-indexed carver over a memory-mapped dump
//!
//! The scan streams the dump in fixed-size chunks with a small overlap.
//! Each chunk matches signatures inside its own window (chunk plus the
//! overlap tail), so a magic straddling a boundary is still seen by the
//! chunk that owns its starting offset, and only that chunk reports it
//! (the final chunk reports everything to the end). Validation of a hit
//! reads the full mapped dump, never the window, because an asset may run
//! far past its chunk. Chunks scan in parallel; the merged candidates are
//! ordered and pruned before they become entries.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::registry::{FormatKind, FormatRegistry, Metadata};
use crate::task::{report, CancelToken, ProgressCallback};
use crate::{AssetError, Result};

/// Default scan chunk: 16 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;
/// Default boundary overlap: 1 KiB
pub const DEFAULT_OVERLAP: usize = 1024;

/// One accepted carve
#[derive(Debug, Clone)]
pub struct CarvedEntry {
    /// Absolute byte offset in the dump
    pub offset: u64,
    /// Asset length in bytes, header included
    pub length: u64,
    pub kind: FormatKind,
    /// Recovered file name, when the format could supply one
    pub filename: Option<String>,
    pub metadata: Metadata,
    /// Display priority of the owning format; lower wins conflicts
    pub priority: u8,
}

impl CarvedEntry {
    /// One past the last byte
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    fn overlaps(&self, other: &CarvedEntry) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Outcome of a full dump analysis; immutable once returned
#[derive(Debug)]
pub struct AnalysisResult {
    /// Accepted entries in ascending offset order, non-overlapping
    pub entries: Vec<CarvedEntry>,
    /// Per-format entry counts
    pub counts: BTreeMap<FormatKind, usize>,
}

/// Signature scanner over a registry
pub struct Carver<'r> {
    registry: &'r FormatRegistry,
    chunk_size: usize,
    overlap: usize,
}

impl<'r> Carver<'r> {
    pub fn new(registry: &'r FormatRegistry) -> Self {
        Self {
            registry,
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }

    /// Shrink the chunk geometry, mainly for tests
    pub fn with_chunking(mut self, chunk_size: usize, overlap: usize) -> Self {
        assert!(chunk_size > 0);
        self.chunk_size = chunk_size;
        self.overlap = overlap;
        self
    }

    /// Scan the whole dump and produce the ordered, conflict-free entry set.
    pub fn analyze(
        &self,
        data: &[u8],
        progress: Option<&ProgressCallback>,
        cancel: &CancelToken,
    ) -> Result<AnalysisResult> {
        let index = self.registry.dispatch_index();
        let longest_magic = self
            .registry
            .modules()
            .flat_map(|m| m.signatures())
            .map(|s| s.magic.len())
            .max()
            .unwrap_or(0);
        // Magic matching is confined to each chunk's window; the overlap
        // tail must cover the longest signature or a magic straddling a
        // chunk boundary could never match
        assert!(
            longest_magic <= self.overlap,
            "overlap {} shorter than longest signature {}",
            self.overlap,
            longest_magic
        );

        let chunk_count = data.len().div_ceil(self.chunk_size).max(1);

        tracing::info!(
            "scanning {} bytes in {} chunks of {} bytes",
            data.len(),
            chunk_count,
            self.chunk_size
        );

        let done = std::sync::atomic::AtomicUsize::new(0);
        let chunks: Vec<Vec<CarvedEntry>> = (0..chunk_count)
            .into_par_iter()
            .map(|chunk| -> Result<Vec<CarvedEntry>> {
                if cancel.is_cancelled() {
                    return Err(AssetError::Cancelled);
                }

                let start = chunk * self.chunk_size;
                let report_end = if chunk + 1 == chunk_count {
                    data.len()
                } else {
                    (start + self.chunk_size).min(data.len())
                };
                let candidates = self.scan_range(data, start, report_end, &index);

                let finished = done.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                report(
                    progress,
                    finished as f32 / chunk_count as f32,
                    format!("scanned chunk {finished}/{chunk_count}"),
                );
                Ok(candidates)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut candidates: Vec<CarvedEntry> = chunks.into_iter().flatten().collect();
        candidates.sort_by(|a, b| {
            (a.offset, a.priority, a.kind).cmp(&(b.offset, b.priority, b.kind))
        });

        let entries = resolve_overlaps(candidates);

        let mut counts = BTreeMap::new();
        for entry in &entries {
            *counts.entry(entry.kind).or_insert(0) += 1;
        }

        tracing::info!("carved {} entries", entries.len());
        Ok(AnalysisResult { entries, counts })
    }

    /// Scan `[start, report_end)` for signature hits.
    ///
    /// Magic bytes are matched inside the chunk window only, which extends
    /// `overlap` bytes past `report_end` so a boundary-straddling magic
    /// still matches here. Validation of a matched hit reads the full
    /// dump, because an asset may extend far past the window.
    fn scan_range(
        &self,
        data: &[u8],
        start: usize,
        report_end: usize,
        index: &[Vec<(&'static [u8], usize)>],
    ) -> Vec<CarvedEntry> {
        let window_end = report_end.saturating_add(self.overlap).min(data.len());
        let window = &data[start..window_end];
        let mut found = Vec::new();

        for local in 0..report_end - start {
            let offset = start + local;
            let table = &index[window[local] as usize];
            if table.is_empty() {
                continue;
            }

            for (magic, module_index) in table {
                if !window[local..].starts_with(magic) {
                    continue;
                }
                let module = self.registry.module_at(*module_index);
                let Some(result) = module.parse(data, offset) else {
                    continue;
                };
                if result.size < module.min_size() || result.size > module.max_size() {
                    continue;
                }

                found.push(CarvedEntry {
                    offset: offset as u64,
                    length: result.size,
                    kind: result.kind,
                    filename: result.filename,
                    metadata: result.metadata,
                    priority: module.display_priority(),
                });
                // One entry per offset; the first matching signature wins
                break;
            }
        }

        found
    }
}

/// Walk candidates sorted by `(offset, priority)` and drop conflicts.
///
/// A candidate overlapping previously accepted entries survives only when
/// it outranks every one of them (strictly lower priority number), in which
/// case the outranked entries are evicted. Equal priority keeps the first.
fn resolve_overlaps(candidates: Vec<CarvedEntry>) -> Vec<CarvedEntry> {
    let mut accepted: Vec<CarvedEntry> = Vec::new();

    for candidate in candidates {
        // Accepted entries are non-overlapping and offset-ordered, so the
        // ones overlapping the candidate form a suffix
        let mut keep = accepted.len();
        while keep > 0 && accepted[keep - 1].overlaps(&candidate) {
            keep -= 1;
        }

        if keep == accepted.len() {
            accepted.push(candidate);
        } else if accepted[keep..]
            .iter()
            .all(|prev| candidate.priority < prev.priority)
        {
            accepted.truncate(keep);
            accepted.push(candidate);
        }
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FormatRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn dxt1_dds(width: u32, height: u32) -> Vec<u8> {
        let mut d = vec![0u8; 128];
        d[0..4].copy_from_slice(b"DDS ");
        d[4..8].copy_from_slice(&124u32.to_le_bytes());
        d[12..16].copy_from_slice(&height.to_le_bytes());
        d[16..20].copy_from_slice(&width.to_le_bytes());
        d[28..32].copy_from_slice(&1u32.to_le_bytes());
        d[76..80].copy_from_slice(&32u32.to_le_bytes());
        d[80..84].copy_from_slice(&4u32.to_le_bytes());
        d[84..88].copy_from_slice(b"DXT1");
        let payload = (width as usize / 4).max(1) * (height as usize / 4).max(1) * 8;
        d.extend_from_slice(&vec![0u8; payload]);
        d
    }

    fn tiny_png() -> Vec<u8> {
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&8u32.to_be_bytes());
        ihdr.extend_from_slice(&8u32.to_be_bytes());
        ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);

        let chunk = |kind: &[u8; 4], payload: &[u8]| {
            let mut c = (payload.len() as u32).to_be_bytes().to_vec();
            c.extend_from_slice(kind);
            c.extend_from_slice(payload);
            c.extend_from_slice(&[0; 4]);
            c
        };

        let mut d = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        d.extend_from_slice(&chunk(b"IHDR", &ihdr));
        d.extend_from_slice(&chunk(b"IDAT", &[0; 16]));
        d.extend_from_slice(&chunk(b"IEND", &[]));
        d
    }

    fn analyze(data: &[u8]) -> AnalysisResult {
        let registry = FormatRegistry::builtin();
        Carver::new(&registry)
            .analyze(data, None, &CancelToken::new())
            .unwrap()
    }

    #[test]
    fn carves_a_dds_at_its_offset() {
        let mut data = vec![0u8; 0x1000];
        data.extend_from_slice(&dxt1_dds(256, 256));
        data.extend_from_slice(&[0u8; 64]);

        let result = analyze(&data);
        assert_eq!(result.entries.len(), 1);
        let entry = &result.entries[0];
        assert_eq!(entry.offset, 0x1000);
        assert_eq!(entry.length, 32896);
        assert_eq!(entry.kind, FormatKind::Dds);
        assert_eq!(result.counts[&FormatKind::Dds], 1);
    }

    #[test]
    fn higher_priority_dds_drops_overlapping_png() {
        // PNG planted inside the DDS payload region
        let mut data = vec![0u8; 0x1000];
        data.extend_from_slice(&dxt1_dds(256, 256));
        let png_at = 0x1000 + 256;
        let png = tiny_png();
        data[png_at..png_at + png.len()].copy_from_slice(&png);

        let result = analyze(&data);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].kind, FormatKind::Dds);
    }

    #[test]
    fn non_overlapping_entries_coexist() {
        let mut data = vec![0u8; 64];
        data.extend_from_slice(&tiny_png());
        data.extend_from_slice(&[0u8; 64]);
        let dds_at = data.len();
        data.extend_from_slice(&dxt1_dds(64, 64));

        let result = analyze(&data);
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.entries[0].kind, FormatKind::Png);
        assert_eq!(result.entries[1].offset, dds_at as u64);
        // Ordered by offset
        assert!(result.entries[0].offset < result.entries[1].offset);
    }

    #[test]
    fn boundary_hit_rejected_when_payload_missing() {
        let dds = dxt1_dds(256, 256);
        // Full asset exactly at the end: accepted
        let mut data = vec![0u8; 32];
        data.extend_from_slice(&dds);
        assert_eq!(analyze(&data).entries.len(), 1);

        // One byte shaved off the tail: bounds reject it
        data.truncate(data.len() - 1);
        assert_eq!(analyze(&data).entries.len(), 0);
    }

    #[test]
    fn chunk_boundaries_do_not_duplicate_or_drop_hits() {
        // Small chunks force the asset to straddle several boundaries
        let mut data = vec![0u8; 300];
        data.extend_from_slice(&dxt1_dds(64, 64));
        data.extend_from_slice(&vec![0u8; 200]);
        let png_at = data.len();
        data.extend_from_slice(&tiny_png());

        let registry = FormatRegistry::builtin();
        let result = Carver::new(&registry)
            .with_chunking(256, 64)
            .analyze(&data, None, &CancelToken::new())
            .unwrap();

        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.entries[0].offset, 300);
        assert_eq!(result.entries[1].offset, png_at as u64);
    }

    #[test]
    fn magic_straddling_chunk_boundary_matches_once() {
        // The 8-byte PNG signature starts two bytes before the 256-byte
        // chunk boundary, so only the overlap tail lets chunk 0 match it
        let mut data = vec![0u8; 254];
        data.extend_from_slice(&tiny_png());
        data.extend_from_slice(&[0u8; 200]);

        let registry = FormatRegistry::builtin();
        let result = Carver::new(&registry)
            .with_chunking(256, 64)
            .analyze(&data, None, &CancelToken::new())
            .unwrap();

        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].offset, 254);
        assert_eq!(result.entries[0].kind, FormatKind::Png);
    }

    #[test]
    fn cancellation_aborts_the_scan() {
        let data = vec![0u8; 1 << 16];
        let registry = FormatRegistry::builtin();
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = Carver::new(&registry)
            .with_chunking(4096, 64)
            .analyze(&data, None, &cancel);
        assert!(matches!(outcome, Err(AssetError::Cancelled)));
    }

    #[test]
    fn progress_reports_reach_one() {
        let data = vec![0u8; 1 << 14];
        let registry = FormatRegistry::builtin();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let callback: ProgressCallback = Arc::new(move |report| {
            calls_in.fetch_add(1, Ordering::SeqCst);
            assert!((0.0..=1.0).contains(&report.fraction));
        });

        Carver::new(&registry)
            .with_chunking(4096, 64)
            .analyze(&data, Some(&callback), &CancelToken::new())
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn later_high_priority_entry_evicts_lower_priority_overlap() {
        // A big-endian SCRO whose FormID's low bytes double as the first
        // two bytes of a DDS magic: the records overlap at [10, 12)
        let mut data = vec![0u8; 2];
        data.extend_from_slice(b"SCRO");
        data.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x0B]); // FormID 0x000B4444 ("DD")
        let dds_at = data.len();
        data.extend_from_slice(&dxt1_dds(64, 64));
        assert_eq!(&data[8..14], b"\x00\x0BDDS ");

        let result = analyze(&data);
        // DDS has priority 30 < the fragment's 70, so SCRO is evicted
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].kind, FormatKind::Dds);
        assert_eq!(result.entries[0].offset, dds_at as u64);
    }
}
