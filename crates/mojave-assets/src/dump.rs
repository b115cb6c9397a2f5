//! Memory-mapped dump images

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use memmap2::Mmap;
use xenonutils::Minidump;

use crate::Result;

/// A read-only view of a dump file.
///
/// The map is shared freely across scanner threads; the minidump container
/// is parsed lazily the first time address translation is needed.
pub struct Dump {
    path: PathBuf,
    _file: File,
    mmap: Mmap,
    minidump: OnceLock<Option<Minidump>>,
}

impl Dump {
    /// Memory-map a dump file read-only
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        Ok(Self {
            path,
            _file: file,
            mmap,
            minidump: OnceLock::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// The parsed minidump container, when this dump is one
    pub fn minidump(&self) -> Option<&Minidump> {
        self.minidump
            .get_or_init(|| match Minidump::parse(&self.mmap) {
                Ok(md) => Some(md),
                Err(e) => {
                    tracing::debug!("not a minidump container: {e}");
                    None
                }
            })
            .as_ref()
    }

    /// Translate a dump-file offset to the virtual address it was captured
    /// from, when the container records it
    pub fn offset_to_va(&self, offset: u64) -> Option<u64> {
        self.minidump()?.file_offset_to_va(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn open_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.dmp");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"not a minidump, just bytes").unwrap();
        drop(f);

        let dump = Dump::open(&path).unwrap();
        assert_eq!(dump.len(), 26);
        assert_eq!(&dump.data()[..3], b"not");
        // Not a container: translation is unavailable, not an error
        assert!(dump.minidump().is_none());
        assert!(dump.offset_to_va(0).is_none());
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(Dump::open("/nonexistent/raw.dmp").is_err());
    }
}
