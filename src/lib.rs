//! Unpacks the gzip payload buried in a bzImage-style composite image.
//!
//! The image is raw setup/bootstrap bytes followed, at an offset nobody
//! tells you, by a gzip stream. [`SignatureScanner`] walks the file looking
//! for the gzip magic, [`Unpacker`] tries to inflate from each hit and
//! moves on when a hit turns out to be a coincidence.

pub mod error;
pub mod extract;
pub mod header;
pub mod output;
pub mod scanner;
pub mod utils;

pub use error::{HeaderError, UnpackError};
pub use extract::{decompress_at, extract, output_path_for, ExtractionResult, Unpacker};
pub use header::{GzipHeader, GZIP_SIGNATURE};
pub use scanner::{find_all_signatures, SignatureScanner};
