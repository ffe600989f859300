use flate2::bufread::GzDecoder;
use log::{debug, info, warn};
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{HeaderError, UnpackError};
use crate::header::{read_gzip_header, GZIP_SIGNATURE};
use crate::output::{is_same_file, OutputSink};
use crate::scanner::SignatureScanner;
use crate::utils::hex;

/// Appended to the input path to name the unpacked file.
pub const OUTPUT_SUFFIX: &str = "_unpacked";
/// Read buffer for the input while scanning, this is 64 kB.
pub const SCAN_BUFFER_SIZE: usize = 64 * 1024;
/// Chunk the decompressed data is copied in. Allocated once per run.
pub const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Terminal outcome of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionResult {
    /// A stream starting at `offset` decompressed into `bytes_written` bytes.
    Found { bytes_written: u64, offset: u64 },
    /// Input exhausted without a stream that decompresses.
    NotFound,
}

/// What happened to one candidate offset. Fatal problems are the `Err`
/// side of the surrounding `Result`, never a variant here.
#[derive(Debug)]
enum Attempt {
    Extracted(u64),
    /// The signature was a coincidence, keep scanning.
    FalsePositive(String),
}

#[derive(Debug)]
enum State {
    Scanning,
    Attempting(u64),
    Done(ExtractionResult),
}

/// `<input>_unpacked`, next to the input.
pub fn output_path_for(input: &Path) -> PathBuf {
    let mut name = OsString::from(input.as_os_str());
    name.push(OUTPUT_SUFFIX);
    PathBuf::from(name)
}

/// Scans a composite image for its gzip payload and unpacks it.
#[derive(Debug, Clone)]
pub struct Unpacker {
    input: PathBuf,
    output: PathBuf,
    search_start: u64,
}

impl Unpacker {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        let input = input.into();
        let output = output_path_for(&input);
        Unpacker {
            input,
            output,
            search_start: 0,
        }
    }

    /// Writes somewhere other than `<input>_unpacked`.
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    /// Skips everything before `offset` (e.g. a known setup header).
    pub fn search_start(mut self, offset: u64) -> Self {
        self.search_start = offset;
        self
    }

    pub fn input_path(&self) -> &Path {
        &self.input
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Runs scan -> attempt -> (retry) until a stream unpacks or the input
    /// runs out.
    ///
    /// Only the output file of a successful run is left on disk. Every false
    /// positive moves the scan one byte past the failed candidate, so the
    /// loop is bounded by the input length.
    pub fn run(&self) -> Result<ExtractionResult, UnpackError> {
        let file = File::open(&self.input).map_err(|source| UnpackError::Open {
            path: self.input.clone(),
            source,
        })?;
        let mut reader = BufReader::with_capacity(SCAN_BUFFER_SIZE, file);

        let mut sink = create_sink(&self.input, &self.output)?;

        let scanner = SignatureScanner::new(&GZIP_SIGNATURE);
        let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
        let mut attempts = 0u32;

        if self.search_start > 0 {
            info!(
                "Starting search at offset {:#0x} ({})",
                self.search_start, self.search_start
            );
        }
        debug!(
            "Scanning {:?} for {}, writing to {:?}",
            self.input,
            hex::encode(scanner.pattern()),
            sink.path()
        );
        reader.seek(SeekFrom::Start(self.search_start))?;

        let mut state = State::Scanning;
        let result = loop {
            state = match state {
                State::Scanning => match scanner.find_next(&mut reader)? {
                    Some(offset) => {
                        info!("Found gzip magic at {:#010x}", offset);
                        State::Attempting(offset)
                    }
                    None => State::Done(ExtractionResult::NotFound),
                },
                State::Attempting(offset) => {
                    attempts += 1;
                    match attempt(&mut reader, offset, &mut sink, &mut chunk)? {
                        Attempt::Extracted(bytes_written) => State::Done(ExtractionResult::Found {
                            bytes_written,
                            offset,
                        }),
                        Attempt::FalsePositive(reason) => {
                            warn!(
                                "Uncompressing failure at {:#010x} - not gzip format ({})",
                                offset, reason
                            );
                            sink.reset()?;
                            reader.seek(SeekFrom::Start(offset + 1))?;
                            State::Scanning
                        }
                    }
                }
                State::Done(result) => break result,
            };
        };

        debug!("Finished after {} attempt(s): {:?}", attempts, result);

        if let ExtractionResult::Found { bytes_written, .. } = result {
            let path = sink.persist()?;
            info!("Unpacked {} bytes into {:?}", bytes_written, path);
        }
        // a sink that wasn't persisted removes itself here

        Ok(result)
    }
}

/// Unpacks `input` into `<input>_unpacked`.
pub fn extract(input_path: &Path) -> Result<ExtractionResult, UnpackError> {
    Unpacker::new(input_path).run()
}

/// Decompresses the stream at a known `offset`, no scanning.
///
/// A candidate that isn't a gzip stream gives `NotFound` and no output file.
pub fn decompress_at(
    input_path: &Path,
    offset: u64,
    output_path: &Path,
) -> Result<ExtractionResult, UnpackError> {
    let file = File::open(input_path).map_err(|source| UnpackError::Open {
        path: input_path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::with_capacity(SCAN_BUFFER_SIZE, file);
    let mut sink = create_sink(input_path, output_path)?;
    let mut chunk = vec![0u8; COPY_CHUNK_SIZE];

    match attempt(&mut reader, offset, &mut sink, &mut chunk)? {
        Attempt::Extracted(bytes_written) => {
            sink.persist()?;
            Ok(ExtractionResult::Found {
                bytes_written,
                offset,
            })
        }
        Attempt::FalsePositive(reason) => {
            warn!("No gzip stream at {:#010x}: {}", offset, reason);
            Ok(ExtractionResult::NotFound)
        }
    }
}

/// Opens the output, refusing to truncate the image being read.
fn create_sink(input: &Path, output: &Path) -> Result<OutputSink, UnpackError> {
    if is_same_file(input, output) {
        return Err(UnpackError::Output {
            path: output.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "output is the input file, it would be overwritten",
            ),
        });
    }
    OutputSink::create(output).map_err(|source| UnpackError::Output {
        path: output.to_path_buf(),
        source,
    })
}

/// Tries to decompress the stream at `offset` into an emptied `sink`.
fn attempt<R, W>(
    reader: &mut R,
    offset: u64,
    sink: &mut W,
    chunk: &mut [u8],
) -> Result<Attempt, UnpackError>
where
    R: BufRead + Seek,
    W: Write,
{
    reader.seek(SeekFrom::Start(offset))?;

    // cheap rejection before any output gets written
    match read_gzip_header(reader) {
        Ok(header) => debug!("Gzip header at {:#x}:\n{}", offset, header),
        Err(HeaderError::Io(e)) => return Err(UnpackError::Io(e)),
        Err(e) => return Ok(Attempt::FalsePositive(format!("invalid gzip header: {}", e))),
    }
    reader.seek(SeekFrom::Start(offset))?;

    let mut decoder = GzDecoder::new(&mut *reader);
    let mut total = 0u64;
    loop {
        let n = match decoder.read(chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return classify_decode_error(e, offset, total),
        };
        sink.write_all(&chunk[..n])?;
        total += n as u64;
    }
    sink.flush()?;

    if total == 0 {
        return Ok(Attempt::FalsePositive("stream decompressed to zero bytes".to_string()));
    }

    debug!("Stream at {:#x} decompressed to {} bytes", offset, total);
    Ok(Attempt::Extracted(total))
}

/// flate2 reports bad deflate data and checksum mismatches as
/// `InvalidInput`/`InvalidData`, those mean "not a real stream".
fn classify_decode_error(e: io::Error, offset: u64, decoded: u64) -> Result<Attempt, UnpackError> {
    match e.kind() {
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Ok(Attempt::FalsePositive(
            format!("{} after {} decompressed bytes", e, decoded),
        )),
        io::ErrorKind::UnexpectedEof => Err(UnpackError::Truncated { offset }),
        _ => Err(UnpackError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Cursor;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn run_attempt(data: Vec<u8>, offset: u64) -> (Result<Attempt, UnpackError>, Vec<u8>) {
        let mut reader = Cursor::new(data);
        let mut out = Vec::new();
        let mut chunk = vec![0u8; 16];
        let res = attempt(&mut reader, offset, &mut out, &mut chunk);
        (res, out)
    }

    #[test]
    fn output_path_appends_suffix() {
        assert_eq!(
            output_path_for(Path::new("/boot/bzImage")),
            PathBuf::from("/boot/bzImage_unpacked")
        );
        assert_eq!(
            Unpacker::new("img.bin").output_path(),
            Path::new("img.bin_unpacked")
        );
    }

    #[test]
    fn attempt_decodes_across_small_chunks() {
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let mut data = vec![0xEEu8; 7];
        data.extend(gzip(&payload));
        data.extend_from_slice(b"trailing junk after the member");

        let (res, out) = run_attempt(data, 7);
        assert!(matches!(res, Ok(Attempt::Extracted(1000))));
        assert_eq!(out, payload);
    }

    #[test]
    fn corrupt_body_is_false_positive() {
        let mut data = vec![0x1F, 0x8B, 0x08, 0x00, 0, 0, 0, 0, 0, 3];
        // BTYPE 11 is reserved, the inflater rejects it
        data.extend_from_slice(&[0xFF; 16]);

        let (res, _) = run_attempt(data, 0);
        assert!(matches!(res, Ok(Attempt::FalsePositive(_))));
    }

    #[test]
    fn bad_header_writes_nothing() {
        let data = vec![0x1F, 0x8B, 0x08, 0xE0, 0, 0, 0, 0, 0, 3, 0, 0];
        let (res, out) = run_attempt(data, 0);
        assert!(matches!(res, Ok(Attempt::FalsePositive(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn empty_stream_is_false_positive() {
        let (res, _) = run_attempt(gzip(b""), 0);
        assert!(matches!(res, Ok(Attempt::FalsePositive(_))));
    }

    #[test]
    fn truncated_after_header_is_fatal() {
        let mut data = gzip(&[0x42; 4096]);
        // cut off the trailer (crc + isize)
        data.truncate(data.len() - 8);

        let (res, _) = run_attempt(data, 0);
        assert!(matches!(res, Err(UnpackError::Truncated { offset: 0 })));
    }

    #[test]
    fn decode_error_classification() {
        let bad = io::Error::new(io::ErrorKind::InvalidInput, "corrupt deflate stream");
        assert!(matches!(
            classify_decode_error(bad, 0, 0),
            Ok(Attempt::FalsePositive(_))
        ));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            classify_decode_error(denied, 0, 0),
            Err(UnpackError::Io(_))
        ));
    }
}
