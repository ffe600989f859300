use log::{debug, trace};
use memchr::memmem;
use std::io::{self, Read, Seek, SeekFrom};

use crate::utils::hex;

/// Looks for the next occurrence of a short, fixed byte pattern in a
/// seekable source.
///
/// The pattern is borrowed for the scanner's lifetime and never changes.
#[derive(Debug, Clone, Copy)]
pub struct SignatureScanner<'p> {
    pattern: &'p [u8],
}

impl<'p> SignatureScanner<'p> {
    /// # Panics
    ///
    /// If `pattern` is empty, an empty pattern would match everywhere.
    pub fn new(pattern: &'p [u8]) -> Self {
        assert!(!pattern.is_empty(), "signature pattern must not be empty");
        SignatureScanner { pattern }
    }

    pub fn pattern(&self) -> &'p [u8] {
        self.pattern
    }

    /// Finds the next match at or after the current cursor of `source`.
    ///
    /// On `Some(offset)` the cursor is left exactly at `offset`, so the
    /// pattern bytes are still unread. On `None` the cursor is at end of
    /// source. Reaching the end is not an error, only a failing reader is.
    pub fn find_next<R: Read + Seek>(&self, source: &mut R) -> io::Result<Option<u64>> {
        let k = self.pattern.len();
        let start = source.stream_position()?;
        let end = source.seek(SeekFrom::End(0))?;

        // not enough bytes left to ever match
        if end.saturating_sub(start) < k as u64 {
            trace!(
                "Only {} bytes left after {:#x}, nothing to scan",
                end.saturating_sub(start),
                start
            );
            return Ok(None);
        }
        source.seek(SeekFrom::Start(start))?;

        let mut window = vec![0u8; k];
        source.read_exact(&mut window)?;
        // offset of window[0]
        let mut window_start = start;

        let mut byte = [0u8; 1];
        loop {
            if window == self.pattern {
                source.seek(SeekFrom::Start(window_start))?;
                debug!(
                    "Signature {} matched at offset {:#x} ({})",
                    hex::encode(self.pattern),
                    window_start,
                    window_start
                );
                return Ok(Some(window_start));
            }

            match source.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            window.copy_within(1.., 0);
            window[k - 1] = byte[0];
            window_start += 1;
        }

        trace!("No signature between {:#x} and end of source {:#x}", start, end);
        Ok(None)
    }
}

/// Returns the offset of every occurrence of `pattern` in `data`,
/// overlapping matches included.
pub fn find_all_signatures(data: &[u8], pattern: &[u8]) -> Vec<u64> {
    if pattern.is_empty() {
        return Vec::new();
    }
    memmem::find_iter(data, pattern)
        .map(|idx| idx as u64)
        .collect()
}
