//! Structural format validators
//!
//! Each module validates a candidate hit without allocating payload memory
//! and computes the true on-disk byte length of the embedded asset, header
//! included. Validators return `None` for "not this format" and reserve
//! errors for callers that already know what they are holding.

pub mod bsa;
pub mod dds;
pub mod ddx;
pub mod esm;
pub mod nif;
pub mod png;
pub mod xma;

pub use bsa::BsaArchive;
pub use dds::DdsHeader;
pub use ddx::DdxHeader;
pub use nif::Nif;
