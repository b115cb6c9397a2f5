//! Whole-dump plugin-record harvesting
//!
//! Carving only sees assets whose envelope survived intact; plugin data in
//! a dump is usually shredded. These scanners sweep the entire image in
//! overlapping chunks and keep any fragment that passes its acceptance
//! rule, so a torn WEAP record still yields its editor ID and a dangling
//! script still yields its bytecode.
//!
//! Each chunk matches signatures inside its own window (chunk plus the
//! overlap tail), so a signature straddling a boundary is seen by the
//! chunk that owns its starting offset and reported exactly once. A
//! matched fragment's payload is then read from the full dump slice,
//! because subrecord payloads routinely outrun the overlap.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use rayon::prelude::*;

use xenonutils::formats::esm::{
    self, RecordHeader, SubrecordHeader, RECORD_HEADER_SIZE, SUBRECORD_HEADER_SIZE,
};
use xenonutils::scda::{Decompiler, OpcodeTable, Scda};
use xenonutils::Endianness;

use crate::carver::{DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::task::{report, CancelToken, ProgressCallback};
use crate::{AssetError, Result};

/// How far back from an EDID hit the record-header search reaches
const FORM_ID_SEARCH_WINDOW: usize = 200;

/// Every signature these sweeps match on is four bytes
const SIGNATURE_LEN: usize = 4;

/// A harvested string fragment with its source offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringHit {
    pub offset: u64,
    pub text: String,
}

/// A harvested FormID reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormIdHit {
    pub offset: u64,
    pub form_id: u32,
}

/// Everything one record sweep produces
#[derive(Debug, Default)]
pub struct EsmRecordScanResult {
    /// De-duplicated editor IDs in first-seen offset order
    pub editor_ids: Vec<StringHit>,
    /// De-duplicated game-setting names
    pub game_settings: Vec<StringHit>,
    /// Script source fragments
    pub script_texts: Vec<StringHit>,
    /// De-duplicated script FormID references
    pub form_id_refs: Vec<FormIdHit>,
    /// FormID to editor ID, first mapping wins
    pub form_id_map: BTreeMap<u32, String>,
}

/// A harvested compiled script
#[derive(Debug, Clone)]
pub struct ScdaRecord {
    pub offset: u64,
    pub bytecode: Vec<u8>,
    /// Decompiled pseudo-source
    pub source: Option<String>,
    /// FormIDs referenced by the SCRO records trailing the script
    pub form_ids: Vec<u32>,
}

/// Chunked signature sweep for EDID/GMST/SCTX/SCRO fragments
pub struct EsmRecordScanner {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for EsmRecordScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl EsmRecordScanner {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }

    pub fn with_chunking(mut self, chunk_size: usize, overlap: usize) -> Self {
        assert!(chunk_size > 0);
        // The overlap tail is what lets a boundary-straddling signature
        // match inside the chunk that owns its start
        assert!(overlap >= SIGNATURE_LEN);
        self.chunk_size = chunk_size;
        self.overlap = overlap;
        self
    }

    /// Sweep the dump and harvest every accepted fragment.
    pub fn scan(
        &self,
        data: &[u8],
        progress: Option<&ProgressCallback>,
        cancel: &CancelToken,
    ) -> Result<EsmRecordScanResult> {
        let chunk_count = data.len().div_ceil(self.chunk_size).max(1);
        let done = std::sync::atomic::AtomicUsize::new(0);

        let raw: Vec<RawHits> = (0..chunk_count)
            .into_par_iter()
            .map(|chunk| -> Result<RawHits> {
                if cancel.is_cancelled() {
                    return Err(AssetError::Cancelled);
                }
                let start = chunk * self.chunk_size;
                let end = if chunk + 1 == chunk_count {
                    data.len()
                } else {
                    (start + self.chunk_size).min(data.len())
                };
                let hits = scan_fragment_range(data, start, end, self.overlap);

                let finished = done.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                report(
                    progress,
                    finished as f32 / chunk_count as f32,
                    format!("record sweep {finished}/{chunk_count}"),
                );
                Ok(hits)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut result = EsmRecordScanResult::default();
        let mut seen_edids = BTreeSet::new();
        let mut seen_gmsts = BTreeSet::new();
        let mut seen_form_ids = BTreeSet::new();

        for hits in raw {
            for hit in hits.editor_ids {
                if seen_edids.insert(hit.text.clone()) {
                    // Correlate before the hit is moved into the result
                    if let Some((form_id, name)) = correlate_form_id(data, &hit) {
                        result.form_id_map.entry(form_id).or_insert(name);
                    }
                    result.editor_ids.push(hit);
                }
            }
            for hit in hits.game_settings {
                if seen_gmsts.insert(hit.text.clone()) {
                    result.game_settings.push(hit);
                }
            }
            result.script_texts.extend(hits.script_texts);
            for hit in hits.form_id_refs {
                if seen_form_ids.insert(hit.form_id) {
                    result.form_id_refs.push(hit);
                }
            }
        }

        tracing::info!(
            "record sweep: {} editor IDs, {} settings, {} script texts, {} FormID refs, {} mapped",
            result.editor_ids.len(),
            result.game_settings.len(),
            result.script_texts.len(),
            result.form_id_refs.len(),
            result.form_id_map.len()
        );
        Ok(result)
    }
}

#[derive(Debug, Default)]
struct RawHits {
    editor_ids: Vec<StringHit>,
    game_settings: Vec<StringHit>,
    script_texts: Vec<StringHit>,
    form_id_refs: Vec<FormIdHit>,
}

/// Scan `[start, report_end)` for fragment hits. Signatures match inside
/// the chunk window (the overlap tail covers a boundary straddle); payload
/// reads go through the full dump slice.
fn scan_fragment_range(data: &[u8], start: usize, report_end: usize, overlap: usize) -> RawHits {
    let window_end = report_end.saturating_add(overlap).min(data.len());
    let window = &data[start..window_end];
    let mut hits = RawHits::default();

    for local in 0..report_end - start {
        let offset = start + local;
        let Some(signature) = window.get(local..local + SIGNATURE_LEN) else {
            break;
        };
        match signature {
            b"EDID" | b"GMST" | b"SCTX" | b"SCRO" => {}
            _ => continue,
        }

        for endian in [Endianness::Little, Endianness::Big] {
            let Some(sub) = SubrecordHeader::parse(&data[offset..], endian) else {
                continue;
            };
            let payload_at = offset + SUBRECORD_HEADER_SIZE;
            let Some(payload) = data.get(payload_at..payload_at + sub.size as usize) else {
                continue;
            };

            let accepted = match signature {
                b"EDID" => {
                    let name = strip_nul(payload);
                    if esm::is_editor_id(name) {
                        hits.editor_ids.push(StringHit {
                            offset: offset as u64,
                            text: String::from_utf8_lossy(name).into_owned(),
                        });
                        true
                    } else {
                        false
                    }
                }
                b"GMST" => {
                    let name = strip_nul(payload);
                    if esm::is_gmst_name(name) {
                        hits.game_settings.push(StringHit {
                            offset: offset as u64,
                            text: String::from_utf8_lossy(name).into_owned(),
                        });
                        true
                    } else {
                        false
                    }
                }
                b"SCTX" => {
                    if esm::looks_like_script_source(payload) {
                        hits.script_texts.push(StringHit {
                            offset: offset as u64,
                            text: String::from_utf8_lossy(strip_nul(payload)).into_owned(),
                        });
                        true
                    } else {
                        false
                    }
                }
                b"SCRO" => {
                    if sub.size == 4 {
                        let form_id = read_u32(payload, endian);
                        if esm::is_plausible_form_id(form_id) {
                            hits.form_id_refs.push(FormIdHit {
                                offset: offset as u64,
                                form_id,
                            });
                            true
                        } else {
                            false
                        }
                    } else {
                        false
                    }
                }
                _ => false,
            };

            if accepted {
                break;
            }
        }
    }

    hits
}

/// Walk backward from an EDID hit looking for the 24-byte main-record
/// header that owns it; a match maps the record's FormID to the name.
fn correlate_form_id(data: &[u8], hit: &StringHit) -> Option<(u32, String)> {
    let offset = hit.offset as usize;

    for distance in RECORD_HEADER_SIZE..=FORM_ID_SEARCH_WINDOW {
        let Some(candidate_at) = offset.checked_sub(distance) else {
            break;
        };
        let Some(window) = data.get(candidate_at..candidate_at + RECORD_HEADER_SIZE) else {
            continue;
        };
        let Some((header, _)) = RecordHeader::parse_any(window) else {
            continue;
        };

        // The EDID must sit inside the record's declared body
        let body_start = candidate_at + RECORD_HEADER_SIZE;
        let body_end = body_start + header.data_size as usize;
        if offset >= body_start && offset < body_end {
            return Some((header.form_id, hit.text.clone()));
        }
    }
    None
}

/// Chunked sweep for SCDA compiled-script records
pub struct ScdaScanner {
    pub chunk_size: usize,
    pub overlap: usize,
    opcode_table: OpcodeTable,
}

impl Default for ScdaScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScdaScanner {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            opcode_table: OpcodeTable::builtin(),
        }
    }

    pub fn with_chunking(mut self, chunk_size: usize, overlap: usize) -> Self {
        assert!(chunk_size > 0);
        assert!(overlap >= SIGNATURE_LEN);
        self.chunk_size = chunk_size;
        self.overlap = overlap;
        self
    }

    pub fn with_opcode_table(mut self, table: OpcodeTable) -> Self {
        self.opcode_table = table;
        self
    }

    pub fn scan(
        &self,
        data: &[u8],
        progress: Option<&ProgressCallback>,
        cancel: &CancelToken,
    ) -> Result<Vec<ScdaRecord>> {
        let chunk_count = data.len().div_ceil(self.chunk_size).max(1);
        let done = std::sync::atomic::AtomicUsize::new(0);

        let chunks: Vec<Vec<ScdaRecord>> = (0..chunk_count)
            .into_par_iter()
            .map(|chunk| -> Result<Vec<ScdaRecord>> {
                if cancel.is_cancelled() {
                    return Err(AssetError::Cancelled);
                }
                let start = chunk * self.chunk_size;
                let end = if chunk + 1 == chunk_count {
                    data.len()
                } else {
                    (start + self.chunk_size).min(data.len())
                };

                // Magic matching stays inside the chunk window; the record
                // itself is parsed out of the full dump slice
                let window_end = end.saturating_add(self.overlap).min(data.len());
                let window = &data[start..window_end];

                let mut records = Vec::new();
                for local in 0..end - start {
                    if !window[local..].starts_with(b"SCDA") {
                        continue;
                    }
                    let offset = start + local;
                    let Some(scda) = Scda::parse(&data[offset..]) else {
                        continue;
                    };
                    let source = Decompiler::new(&self.opcode_table).decompile(scda.bytecode);
                    let record_end = offset + scda.total_size() as usize;
                    records.push(ScdaRecord {
                        offset: offset as u64,
                        bytecode: scda.bytecode.to_vec(),
                        source: (!source.is_empty()).then_some(source),
                        form_ids: trailing_form_ids(data, record_end),
                    });
                }

                let finished = done.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                report(
                    progress,
                    finished as f32 / chunk_count as f32,
                    format!("script sweep {finished}/{chunk_count}"),
                );
                Ok(records)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut records: Vec<ScdaRecord> = chunks.into_iter().flatten().collect();
        records.sort_by_key(|r| r.offset);
        tracing::info!("script sweep: {} SCDA records", records.len());
        Ok(records)
    }
}

/// Collect the FormIDs of the SCRO references trailing a script record.
/// The walk follows the subrecords the compiler emits after the bytecode
/// and stops at the first foreign signature.
fn trailing_form_ids(data: &[u8], mut offset: usize) -> Vec<u32> {
    let mut form_ids = Vec::new();

    loop {
        let Some(sub) = data
            .get(offset..)
            .and_then(|s| SubrecordHeader::parse(s, Endianness::Little))
        else {
            break;
        };
        let payload_at = offset + SUBRECORD_HEADER_SIZE;
        let Some(payload) = data.get(payload_at..payload_at + sub.size as usize) else {
            break;
        };

        match &sub.signature {
            b"SCRO" if sub.size == 4 => {
                let form_id = read_u32(payload, Endianness::Little);
                if esm::is_plausible_form_id(form_id) {
                    form_ids.push(form_id);
                }
            }
            // Locals and variable names sit between the script and its refs
            b"SCRV" | b"SLSD" | b"SCVR" | b"SCTX" => {}
            _ => break,
        }
        offset = payload_at + sub.size as usize;
    }

    form_ids
}

/// Write the record-sweep report files under `output_dir/esm_records/`.
pub fn write_reports(result: &EsmRecordScanResult, output_dir: &Path) -> Result<()> {
    let dir = output_dir.join("esm_records");
    fs::create_dir_all(&dir)?;

    let mut editor_ids: Vec<&str> = result.editor_ids.iter().map(|h| h.text.as_str()).collect();
    editor_ids.sort_unstable();
    fs::write(dir.join("editor_ids.txt"), lines(&editor_ids))?;

    let mut settings: Vec<&str> = result
        .game_settings
        .iter()
        .map(|h| h.text.as_str())
        .collect();
    settings.sort_unstable();
    settings.dedup();
    fs::write(dir.join("game_settings.txt"), lines(&settings))?;

    let mut map_csv = String::from("FormID,EditorID\n");
    for (form_id, name) in &result.form_id_map {
        map_csv.push_str(&format!("0x{form_id:08X},{name}\n"));
    }
    fs::write(dir.join("formid_map.csv"), map_csv)?;

    let mut refs = String::new();
    for hit in &result.form_id_refs {
        let name = result
            .form_id_map
            .get(&hit.form_id)
            .map(String::as_str)
            .unwrap_or("unknown");
        refs.push_str(&format!("0x{:08X} ({name})\n", hit.form_id));
    }
    fs::write(dir.join("formid_references.txt"), refs)?;

    let sources_dir = dir.join("script_sources");
    fs::create_dir_all(&sources_dir)?;
    for (index, hit) in result.script_texts.iter().enumerate() {
        let name = format!("sctx_{index:04}_0x{offset:08X}.txt", offset = hit.offset);
        fs::write(sources_dir.join(name), &hit.text)?;
    }

    Ok(())
}

fn lines(items: &[&str]) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(item);
        out.push('\n');
    }
    out
}

fn read_u32(payload: &[u8], endian: Endianness) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&payload[..4]);
    match endian {
        Endianness::Little => u32::from_le_bytes(buf),
        Endianness::Big => u32::from_be_bytes(buf),
    }
}

fn strip_nul(payload: &[u8]) -> &[u8] {
    payload.strip_suffix(b"\0").unwrap_or(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subrecord(sig: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = sig.to_vec();
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// A WEAP record whose body starts with an EDID, plus loose fragments.
    fn build_dump() -> Vec<u8> {
        let mut d = vec![0u8; 32];

        // Intact record header + EDID inside its body
        let edid = subrecord(b"EDID", b"WeapNVAntiMaterielRifle\0");
        d.extend_from_slice(b"WEAP");
        d.extend_from_slice(&(edid.len() as u32 + 20).to_le_bytes());
        d.extend_from_slice(&0u32.to_le_bytes());
        d.extend_from_slice(&0x0013_4D2Cu32.to_le_bytes());
        d.extend_from_slice(&[0u8; 8]);
        d.extend_from_slice(&edid);

        d.extend_from_slice(&[0u8; 24]);

        // Orphan EDID with no surrounding record
        d.extend_from_slice(&subrecord(b"EDID", b"OrphanMarker01\0"));
        d.extend_from_slice(&[0u8; 16]);

        // Duplicate of the first editor ID
        d.extend_from_slice(&subrecord(b"EDID", b"WeapNVAntiMaterielRifle\0"));
        d.extend_from_slice(&[0u8; 16]);

        // Game settings, one duplicated
        d.extend_from_slice(&subrecord(b"GMST", b"fJumpHeightMin\0"));
        d.extend_from_slice(&subrecord(b"GMST", b"fJumpHeightMin\0"));
        d.extend_from_slice(&subrecord(b"GMST", b"iMaxCharacterLevel\0"));

        // Script text and references
        d.extend_from_slice(&subrecord(b"SCTX", b"if GetStage VMS21 >= 10\n  Enable\nendif"));
        d.extend_from_slice(&subrecord(b"SCRO", &0x0013_4D2Cu32.to_le_bytes()));
        d.extend_from_slice(&subrecord(b"SCRO", &0x0013_4D2Cu32.to_le_bytes()));
        d.extend_from_slice(&subrecord(b"SCRO", &0xFFFF_FFFFu32.to_le_bytes()));

        d.extend_from_slice(&[0u8; 32]);
        d
    }

    fn scan(data: &[u8]) -> EsmRecordScanResult {
        EsmRecordScanner::new()
            .with_chunking(128, 32)
            .scan(data, None, &CancelToken::new())
            .unwrap()
    }

    #[test]
    fn harvests_and_dedupes_fragments() {
        let result = scan(&build_dump());

        let names: Vec<&str> = result.editor_ids.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(names, vec!["WeapNVAntiMaterielRifle", "OrphanMarker01"]);

        let settings: Vec<&str> = result
            .game_settings
            .iter()
            .map(|h| h.text.as_str())
            .collect();
        assert_eq!(settings, vec!["fJumpHeightMin", "iMaxCharacterLevel"]);

        assert_eq!(result.script_texts.len(), 1);
        assert!(result.script_texts[0].text.contains("GetStage"));

        // The invalid FormID is rejected, the duplicate folded
        assert_eq!(result.form_id_refs.len(), 1);
        assert_eq!(result.form_id_refs[0].form_id, 0x0013_4D2C);
    }

    #[test]
    fn correlates_form_id_with_enclosing_record() {
        let result = scan(&build_dump());
        assert_eq!(
            result.form_id_map.get(&0x0013_4D2C).map(String::as_str),
            Some("WeapNVAntiMaterielRifle")
        );
        // The orphan has no mapping
        assert_eq!(result.form_id_map.len(), 1);
    }

    #[test]
    fn scda_scanner_decompiles_and_collects_refs() {
        let mut d = vec![0u8; 16];
        let bytecode = [0x10u8, 0x00, 0x04, 0x00, 0x00, 0x00, 0x1E, 0x00];
        d.extend_from_slice(b"SCDA");
        d.extend_from_slice(&(bytecode.len() as u16).to_le_bytes());
        d.extend_from_slice(&bytecode);
        d.extend_from_slice(&subrecord(b"SCRO", &0x0010_2030u32.to_le_bytes()));
        d.extend_from_slice(&subrecord(b"SCRO", &0x0010_2031u32.to_le_bytes()));
        d.extend_from_slice(&[0u8; 8]);

        let records = ScdaScanner::new()
            .with_chunking(64, 16)
            .scan(&d, None, &CancelToken::new())
            .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.offset, 16);
        assert_eq!(record.bytecode, bytecode);
        assert_eq!(record.source.as_deref(), Some("Begin GameMode\n\tReturn\n"));
        assert_eq!(record.form_ids, vec![0x0010_2030, 0x0010_2031]);
    }

    #[test]
    fn report_files_have_the_documented_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let result = scan(&build_dump());
        write_reports(&result, dir.path()).unwrap();

        let base = dir.path().join("esm_records");
        let ids = fs::read_to_string(base.join("editor_ids.txt")).unwrap();
        assert_eq!(ids, "OrphanMarker01\nWeapNVAntiMaterielRifle\n");

        let map = fs::read_to_string(base.join("formid_map.csv")).unwrap();
        assert_eq!(map, "FormID,EditorID\n0x00134D2C,WeapNVAntiMaterielRifle\n");

        let refs = fs::read_to_string(base.join("formid_references.txt")).unwrap();
        assert_eq!(refs, "0x00134D2C (WeapNVAntiMaterielRifle)\n");

        let sources: Vec<_> = fs::read_dir(base.join("script_sources"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].starts_with("sctx_0000_0x"));
        assert!(sources[0].ends_with(".txt"));
    }

    #[test]
    fn signature_straddling_chunk_boundary_found_once() {
        // The EDID signature spans the 128-byte chunk boundary; only the
        // overlap tail of chunk 0 can match it
        let mut d = vec![0u8; 126];
        d.extend_from_slice(&subrecord(b"EDID", b"BoundaryMarker01\0"));
        d.extend_from_slice(&[0u8; 160]);

        let result = EsmRecordScanner::new()
            .with_chunking(128, 32)
            .scan(&d, None, &CancelToken::new())
            .unwrap();

        assert_eq!(result.editor_ids.len(), 1);
        assert_eq!(result.editor_ids[0].offset, 126);
        assert_eq!(result.editor_ids[0].text, "BoundaryMarker01");
    }

    #[test]
    fn scda_magic_straddling_chunk_boundary_found_once() {
        let mut d = vec![0u8; 62];
        let bytecode = [0x10u8, 0x00, 0x04, 0x00, 0x00, 0x00, 0x1E, 0x00];
        d.extend_from_slice(b"SCDA");
        d.extend_from_slice(&(bytecode.len() as u16).to_le_bytes());
        d.extend_from_slice(&bytecode);
        d.extend_from_slice(&[0u8; 80]);

        let records = ScdaScanner::new()
            .with_chunking(64, 16)
            .scan(&d, None, &CancelToken::new())
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].offset, 62);
    }

    #[test]
    fn cancellation_propagates() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = EsmRecordScanner::new()
            .with_chunking(64, 16)
            .scan(&vec![0u8; 1024], None, &cancel);
        assert!(matches!(outcome, Err(AssetError::Cancelled)));
    }
}
