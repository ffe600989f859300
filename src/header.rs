use byteorder::{ByteOrder, LittleEndian};
use flate2::Crc;
use serde::Serialize;
use std::fmt;
use std::io::Read;

pub use crate::error::HeaderError;

/// Gzip magic number followed by the only method (deflate) gzip defines.
/// This is what the scanner looks for.
pub const GZIP_SIGNATURE: [u8; 3] = [0x1F, 0x8B, 0x08];

/// Size of the fixed part of a member header.
pub const FIXED_HEADER_LEN: usize = 10;

const METHOD_DEFLATE: u8 = 8;

const FTEXT: u8 = 0x01;
const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const FRESERVED: u8 = 0xE0;

/// Anything longer is almost certainly random bytes, not a file name.
const MAX_HEADER_STRING: usize = 64 * 1024;

/// A parsed gzip member header (RFC 1952, section 2.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GzipHeader {
    /// Raw FLG byte.
    pub flags: u8,
    /// Modification time, seconds since epoch. 0 means unset,
    /// which is what the kernel build produces.
    pub mtime: u32,
    /// XFL, 2 = max compression, 4 = fastest.
    pub extra_flags: u8,
    /// OS the stream was made on.
    pub os: u8,
    /// Contents of the FEXTRA field, if any.
    pub extra: Option<Vec<u8>>,
    /// Original file name (FNAME).
    pub file_name: Option<String>,
    /// FCOMMENT.
    pub comment: Option<String>,
    /// Whether the header carried a CRC16 (which was checked).
    pub has_header_crc: bool,
    /// Total bytes the header occupies, deflate data starts right after.
    pub header_len: usize,
}

impl GzipHeader {
    pub fn is_text(&self) -> bool {
        self.flags & FTEXT != 0
    }

    pub fn os_name(&self) -> &'static str {
        match self.os {
            0 => "FAT",
            1 => "Amiga",
            2 => "VMS",
            3 => "Unix",
            4 => "VM/CMS",
            5 => "Atari TOS",
            6 => "HPFS",
            7 => "Macintosh",
            8 => "Z-System",
            9 => "CP/M",
            10 => "TOPS-20",
            11 => "NTFS",
            12 => "QDOS",
            13 => "Acorn RISCOS",
            255 => "unknown",
            _ => "unassigned",
        }
    }
}

impl fmt::Display for GzipHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Flags: {:#04x}{}", self.flags, if self.is_text() { " (text)" } else { "" })?;
        writeln!(f, "MTime: {}", self.mtime)?;
        writeln!(f, "Extra Flags: {}", self.extra_flags)?;
        writeln!(f, "OS: {} ({})", self.os_name(), self.os)?;
        if let Some(ref extra) = self.extra {
            writeln!(f, "Extra Field: {} bytes", extra.len())?;
        }
        if let Some(ref name) = self.file_name {
            writeln!(f, "File Name: {}", name)?;
        }
        if let Some(ref comment) = self.comment {
            writeln!(f, "Comment: {}", comment)?;
        }
        writeln!(f, "Header CRC: {}", if self.has_header_crc { "present" } else { "absent" })?;
        write!(f, "Header Length: {}", self.header_len)
    }
}

/// Parses a gzip member header from the current position of `reader`.
///
/// Consumes exactly `header_len` bytes on success. On failure the reader is
/// left somewhere inside the candidate header, callers seek back themselves.
pub fn read_gzip_header<R: Read>(reader: &mut R) -> Result<GzipHeader, HeaderError> {
    // every header byte is kept around for the optional FHCRC check
    let mut raw = Vec::with_capacity(FIXED_HEADER_LEN);

    read_into(reader, &mut raw, FIXED_HEADER_LEN)?;

    if raw[0..2] != GZIP_SIGNATURE[0..2] {
        return Err(HeaderError::BadMagic([raw[0], raw[1]]));
    }
    if raw[2] != METHOD_DEFLATE {
        return Err(HeaderError::UnsupportedMethod(raw[2]));
    }

    let flags = raw[3];
    if flags & FRESERVED != 0 {
        return Err(HeaderError::ReservedFlags(flags));
    }

    let mtime = LittleEndian::read_u32(&raw[4..8]);
    let extra_flags = raw[8];
    let os = raw[9];

    let extra = if flags & FEXTRA != 0 {
        let start = raw.len();
        read_into(reader, &mut raw, 2)?;
        let xlen = LittleEndian::read_u16(&raw[start..start + 2]) as usize;
        let start = raw.len();
        read_into(reader, &mut raw, xlen)?;
        Some(raw[start..].to_vec())
    } else {
        None
    };

    let file_name = if flags & FNAME != 0 {
        Some(read_zero_terminated(reader, &mut raw)?)
    } else {
        None
    };

    let comment = if flags & FCOMMENT != 0 {
        Some(read_zero_terminated(reader, &mut raw)?)
    } else {
        None
    };

    let has_header_crc = flags & FHCRC != 0;
    if has_header_crc {
        let mut crc = Crc::new();
        crc.update(&raw);
        let expected = crc.sum() as u16;

        let start = raw.len();
        read_into(reader, &mut raw, 2)?;
        let stored = LittleEndian::read_u16(&raw[start..]);
        if stored != expected {
            return Err(HeaderError::HeaderCrc { stored, expected });
        }
    }

    Ok(GzipHeader {
        flags,
        mtime,
        extra_flags,
        os,
        extra,
        file_name,
        comment,
        has_header_crc,
        header_len: raw.len(),
    })
}

/// Parses the header at the start of a byte slice.
pub fn parse_gzip_header(data: &[u8]) -> Result<GzipHeader, HeaderError> {
    let mut cursor = data;
    read_gzip_header(&mut cursor)
}

fn read_into<R: Read>(reader: &mut R, raw: &mut Vec<u8>, len: usize) -> Result<(), HeaderError> {
    let start = raw.len();
    raw.resize(start + len, 0);
    reader.read_exact(&mut raw[start..])?;
    Ok(())
}

fn read_zero_terminated<R: Read>(reader: &mut R, raw: &mut Vec<u8>) -> Result<String, HeaderError> {
    let start = raw.len();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        raw.push(byte[0]);
        if byte[0] == 0 {
            break;
        }
        if raw.len() - start > MAX_HEADER_STRING {
            return Err(HeaderError::Truncated);
        }
    }

    // ISO 8859-1 per the RFC, lossy is good enough for display
    Ok(String::from_utf8_lossy(&raw[start..raw.len() - 1]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::{Compression, GzBuilder};
    use std::io::Write;

    #[test]
    fn parses_plain_encoder_header() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::best());
        enc.write_all(b"vmlinux").unwrap();
        let data = enc.finish().unwrap();

        let header = parse_gzip_header(&data).unwrap();
        assert_eq!(header.header_len, FIXED_HEADER_LEN);
        assert_eq!(header.file_name, None);
        assert_eq!(header.extra, None);
        assert!(!header.has_header_crc);
        assert_eq!(&data[..3], &GZIP_SIGNATURE);
    }

    #[test]
    fn parses_optional_fields() {
        let mut enc = GzBuilder::new()
            .filename("vmlinux.bin")
            .comment("built by make")
            .extra(vec![1, 2, 3, 4])
            .mtime(1_700_000_000)
            .write(Vec::new(), Compression::default());
        enc.write_all(b"payload").unwrap();
        let data = enc.finish().unwrap();

        let header = parse_gzip_header(&data).unwrap();
        assert_eq!(header.file_name.as_deref(), Some("vmlinux.bin"));
        assert_eq!(header.comment.as_deref(), Some("built by make"));
        assert_eq!(header.extra, Some(vec![1, 2, 3, 4]));
        assert_eq!(header.mtime, 1_700_000_000);
        // 10 fixed + 2 xlen + 4 extra + 12 name + 14 comment
        assert_eq!(header.header_len, 42);
    }

    #[test]
    fn checks_header_crc() {
        let mut raw = vec![0x1F, 0x8B, 0x08, FHCRC, 0, 0, 0, 0, 0, 3];
        let mut crc = Crc::new();
        crc.update(&raw);
        let good = (crc.sum() as u16).to_le_bytes();

        let mut ok = raw.clone();
        ok.extend_from_slice(&good);
        let header = parse_gzip_header(&ok).unwrap();
        assert!(header.has_header_crc);
        assert_eq!(header.header_len, 12);

        raw.extend_from_slice(&[good[0] ^ 0xFF, good[1]]);
        assert!(matches!(
            parse_gzip_header(&raw),
            Err(HeaderError::HeaderCrc { .. })
        ));
    }

    #[test]
    fn rejects_malformed_headers() {
        let bad_magic = [0x1F, 0x8C, 0x08, 0, 0, 0, 0, 0, 0, 3];
        assert!(matches!(parse_gzip_header(&bad_magic), Err(HeaderError::BadMagic(_))));

        let bad_method = [0x1F, 0x8B, 0x07, 0, 0, 0, 0, 0, 0, 3];
        assert!(matches!(
            parse_gzip_header(&bad_method),
            Err(HeaderError::UnsupportedMethod(7))
        ));

        let reserved = [0x1F, 0x8B, 0x08, 0x20, 0, 0, 0, 0, 0, 3];
        assert!(matches!(
            parse_gzip_header(&reserved),
            Err(HeaderError::ReservedFlags(0x20))
        ));

        // signature at the very end of a file
        let short = [0x1F, 0x8B, 0x08, 0x00];
        let err = parse_gzip_header(&short).unwrap_err();
        assert!(matches!(err, HeaderError::Truncated));
        assert!(err.is_format());

        // name never terminated
        let unterminated = [0x1F, 0x8B, 0x08, FNAME, 0, 0, 0, 0, 0, 3, b'a', b'b'];
        assert!(matches!(
            parse_gzip_header(&unterminated),
            Err(HeaderError::Truncated)
        ));
    }

    #[test]
    fn display_lists_fields() {
        let header = GzipHeader {
            flags: FNAME,
            mtime: 0,
            extra_flags: 2,
            os: 3,
            extra: None,
            file_name: Some("vmlinux".to_string()),
            comment: None,
            has_header_crc: false,
            header_len: 18,
        };
        let shown = header.to_string();
        assert!(shown.contains("OS: Unix (3)"));
        assert!(shown.contains("File Name: vmlinux"));
        assert!(shown.contains("Header Length: 18"));
    }
}
