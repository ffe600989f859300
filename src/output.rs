use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The file an unpacked payload is written to.
///
/// Created (truncated) up front so stale output from an earlier run can't
/// survive, emptied before every attempt, and removed again on drop unless
/// [`OutputSink::persist`] was called.
///
/// Only regular files are emptied or removed. A device like `/dev/null`
/// is written to and otherwise left alone.
#[derive(Debug)]
pub struct OutputSink {
    path: PathBuf,
    file: File,
    regular: bool,
    written: u64,
    persisted: bool,
}

impl OutputSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let regular = file.metadata()?.is_file();
        debug!("Created output sink {:?} (regular file: {})", path, regular);
        Ok(OutputSink {
            path: path.to_path_buf(),
            file,
            regular,
            written: 0,
            persisted: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_regular_file(&self) -> bool {
        self.regular
    }

    /// Bytes written since the last reset.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Drops whatever a previous attempt wrote.
    pub fn reset(&mut self) -> io::Result<()> {
        if self.written > 0 {
            debug!(
                "Discarding {} bytes of failed attempt in {:?}",
                self.written, self.path
            );
        }
        if self.regular {
            self.file.set_len(0)?;
            self.file.seek(SeekFrom::Start(0))?;
        }
        self.written = 0;
        Ok(())
    }

    /// Keeps the file once the sink goes away.
    pub fn persist(mut self) -> io::Result<PathBuf> {
        self.file.flush()?;
        self.persisted = true;
        Ok(self.path.clone())
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        if self.persisted || !self.regular {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Couldn't remove unused output {:?}: {}", self.path, e);
        } else {
            debug!("Removed unused output {:?}", self.path);
        }
    }
}

/// Whether both paths name the same existing file.
/// A path that doesn't exist yet never matches.
pub fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_stale_content_and_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image_unpacked");
        fs::write(&path, b"stale data from last run").unwrap();

        let sink = OutputSink::create(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        drop(sink);
        assert!(!path.exists());
    }

    #[test]
    fn reset_discards_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");

        let mut sink = OutputSink::create(&path).unwrap();
        sink.write_all(b"garbage from a false positive").unwrap();
        assert_eq!(sink.written(), 29);
        sink.reset().unwrap();
        assert_eq!(sink.written(), 0);
        sink.write_all(b"real").unwrap();

        let kept = sink.persist().unwrap();
        assert_eq!(kept, path);
        assert_eq!(fs::read(&path).unwrap(), b"real");
    }

    #[test]
    fn same_file_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bzImage");
        fs::write(&path, b"image").unwrap();

        let dotted = dir.path().join(".").join("bzImage");
        assert!(is_same_file(&path, &dotted));
        assert!(!is_same_file(&path, &dir.path().join("bzImage_unpacked")));
    }

    #[cfg(unix)]
    #[test]
    fn device_output_is_left_alone() {
        let dev_null = Path::new("/dev/null");

        let mut sink = OutputSink::create(dev_null).unwrap();
        assert!(!sink.is_regular_file());
        sink.write_all(b"false positive").unwrap();
        sink.reset().unwrap();
        assert_eq!(sink.written(), 0);
        assert_eq!(sink.path(), dev_null);
        drop(sink);

        assert!(dev_null.exists());
    }
}
