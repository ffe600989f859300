use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort an unpack run.
///
/// A signature that turns out not to start a gzip stream is *not* an error,
/// the driver swallows those and keeps scanning.
#[derive(Error, Debug)]
pub enum UnpackError {
    #[error("Failed to open input {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create output {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Gzip stream at offset {offset:#x} ends before its trailer")]
    Truncated { offset: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Why a gzip member header was rejected.
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("bad magic bytes {0:02x?}")]
    BadMagic([u8; 2]),

    #[error("unsupported compression method {0}")]
    UnsupportedMethod(u8),

    #[error("reserved flag bits set ({0:#04x})")]
    ReservedFlags(u8),

    #[error("header CRC16 mismatch (stored {stored:#06x}, computed {expected:#06x})")]
    HeaderCrc { stored: u16, expected: u16 },

    #[error("header runs past end of input")]
    Truncated,

    #[error("I/O error while reading header: {0}")]
    Io(#[source] io::Error),
}

impl HeaderError {
    /// Malformed or short header data, as opposed to the reader itself failing.
    pub fn is_format(&self) -> bool {
        !matches!(self, HeaderError::Io(_))
    }
}

impl From<io::Error> for HeaderError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            HeaderError::Truncated
        } else {
            HeaderError::Io(e)
        }
    }
}
