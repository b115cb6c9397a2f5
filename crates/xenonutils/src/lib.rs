//! # Xenon Utilities
//!
//! A collection of parsers and utilities for Xbox 360 ("Xenon") memory dumps
//! of Gamebryo-era Bethesda titles.
//!
//! ## Supported Formats
//!
//! - **Minidump**: Windows minidump container (module list, memory regions)
//! - **DDS / DDX**: DirectDraw surfaces, PC and Xbox 360 (`3XDO`/`3XDR`) variants
//! - **PNG**: chunk-walk validation and sizing
//! - **XMA**: RIFF-framed Xbox 360 audio
//! - **NIF**: Gamebryo scene files, including big-endian → little-endian conversion
//! - **BSA**: Bethesda archives (v104 zlib, v105 LZ4)
//! - **SCDA**: compiled script bytecode, with a pseudo-source decompiler
//!
//! ## Example
//!
//! ```no_run
//! use xenonutils::formats::nif::Nif;
//!
//! let data = std::fs::read("creature.nif")?;
//! let nif = Nif::parse(&data)?;
//! println!("{} blocks, {:?}", nif.info.num_blocks, nif.info.endianness);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod binary;
pub mod formats;
pub mod minidump;
pub mod scda;

// Re-export commonly used types
pub use binary::{BinaryReader, Endianness};
pub use minidump::Minidump;

/// Common error type for xenonutils
#[derive(Debug, thiserror::Error)]
pub enum XenonError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read of {len} bytes at offset {offset} past end of {available}-byte buffer")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("size mismatch: declared {declared} bytes, have {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("endianness mismatch: expected {expected:?}, file is {found:?}")]
    EndiannessMismatch {
        expected: Endianness,
        found: Endianness,
    },
}

/// Common result type for xenonutils
pub type Result<T> = std::result::Result<T, XenonError>;
