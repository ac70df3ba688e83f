// Record Framing
//
// One log record on disk:
//
//   MAGIC(4) flags(1) len(4 LE) payload(len) len(4 LE) MAGIC(4)
//
// The frame is closed on both ends so the file can be read two ways: a
// forward scan from the start, and an O(1) read of the last record by
// seeking back from EOF. A torn tail (crash mid-append) fails the trailer
// check and readers fall back to the forward scan, which stops at the
// last whole record.
//
// Payloads are bincode; payloads over a threshold are zlib-compressed
// when that actually shrinks them, with a flag bit saying which.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use gradekeep_core::domain::LogValue;
use gradekeep_core::port::StoreError;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::warn;

pub const MAGIC: &[u8; 4] = b"GKL1";
const FLAG_ZLIB: u8 = 0b0000_0001;

const HEADER_LEN: usize = 9; // magic + flags + len
const TRAILER_LEN: usize = 8; // len + magic
pub const FRAME_OVERHEAD: usize = HEADER_LEN + TRAILER_LEN;

/// Payloads below this size are never compressed.
const COMPRESSION_THRESHOLD: usize = 512;

/// Encode one value as a complete frame.
pub fn encode_record(value: &LogValue) -> Result<Vec<u8>, StoreError> {
    let raw = bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Encode(e.to_string()))?;
    let (payload, compressed) = maybe_compress(&raw);
    let flags = if compressed { FLAG_ZLIB } else { 0 };

    let len = (payload.len() as u32).to_le_bytes();
    let mut out = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    out.extend_from_slice(MAGIC);
    out.push(flags);
    out.extend_from_slice(&len);
    out.extend_from_slice(&payload);
    out.extend_from_slice(&len);
    out.extend_from_slice(MAGIC);
    Ok(out)
}

/// Compress if over the threshold and actually smaller.
fn maybe_compress(data: &[u8]) -> (Vec<u8>, bool) {
    if data.len() >= COMPRESSION_THRESHOLD {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        let compressed = encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .ok();
        if let Some(compressed) = compressed {
            if compressed.len() < data.len() {
                return (compressed, true);
            }
        }
    }
    (data.to_vec(), false)
}

fn decode_payload(flags: u8, payload: &[u8], origin: &str) -> Result<LogValue, StoreError> {
    let raw: Vec<u8>;
    let bytes = if flags & FLAG_ZLIB != 0 {
        let mut decoder = ZlibDecoder::new(payload);
        let mut buf = Vec::new();
        decoder
            .read_to_end(&mut buf)
            .map_err(|_| StoreError::Corrupt(origin.to_string()))?;
        raw = buf;
        raw.as_slice()
    } else {
        payload
    };
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|_| StoreError::Corrupt(origin.to_string()))?;
    Ok(value)
}

/// Result of a forward scan.
pub struct Scan {
    /// Whole records, oldest first.
    pub records: Vec<LogValue>,
    /// Byte offset where the last whole record starts.
    pub last_start: Option<usize>,
    /// Length of the valid prefix; anything past it is a torn tail.
    pub valid_len: usize,
}

/// Forward scan of a log image. Stops at the first frame that does not
/// verify, treating the remainder as a torn tail.
pub fn scan_records(data: &[u8], origin: &str) -> Scan {
    let mut records = Vec::new();
    let mut last_start = None;
    let mut pos = 0usize;

    while data.len() - pos >= FRAME_OVERHEAD {
        let header = &data[pos..pos + HEADER_LEN];
        if &header[..4] != MAGIC {
            break;
        }
        let flags = header[4];
        let len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
        let total = match len.checked_add(FRAME_OVERHEAD) {
            Some(t) => t,
            None => break,
        };
        if data.len() - pos < total {
            break;
        }
        let payload = &data[pos + HEADER_LEN..pos + HEADER_LEN + len];
        let trailer = &data[pos + HEADER_LEN + len..pos + total];
        let trailer_len =
            u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as usize;
        if trailer_len != len || &trailer[4..8] != MAGIC {
            break;
        }
        match decode_payload(flags, payload, origin) {
            Ok(value) => {
                last_start = Some(pos);
                records.push(value);
                pos += total;
            }
            Err(_) => break,
        }
    }

    if pos < data.len() {
        warn!(
            origin = %origin,
            valid = pos,
            total = data.len(),
            "Log has a torn tail; ignoring trailing bytes"
        );
    }
    Scan {
        records,
        last_start,
        valid_len: pos,
    }
}

/// The state of a log file's end, read as cheaply as the file allows.
pub struct Tail {
    /// Last whole record and its start offset.
    pub last: Option<(u64, LogValue)>,
    /// Length of the valid prefix; shorter than the file when the tail is
    /// torn.
    pub valid_len: u64,
}

/// Read the tail of an open log file.
///
/// The happy path seeks back from EOF and never touches the rest of the
/// file. When the trailer does not verify (torn tail), falls back to a
/// forward scan and reports how much of the file is valid.
pub fn tail(file: &mut File, origin: &str) -> Result<Tail, StoreError> {
    let file_len = file.metadata()?.len();
    if file_len == 0 {
        return Ok(Tail {
            last: None,
            valid_len: 0,
        });
    }

    if let Some(found) = try_read_backward(file, file_len, origin)? {
        return Ok(Tail {
            last: Some(found),
            valid_len: file_len,
        });
    }

    file.seek(SeekFrom::Start(0))?;
    let mut data = Vec::with_capacity(file_len as usize);
    file.read_to_end(&mut data)?;
    let scan = scan_records(&data, origin);
    let last = match (scan.last_start, scan.records.into_iter().next_back()) {
        (Some(start), Some(value)) => Some((start as u64, value)),
        _ => None,
    };
    Ok(Tail {
        last,
        valid_len: scan.valid_len as u64,
    })
}

fn try_read_backward(
    file: &mut File,
    file_len: u64,
    origin: &str,
) -> Result<Option<(u64, LogValue)>, StoreError> {
    if file_len < FRAME_OVERHEAD as u64 {
        return Ok(None);
    }

    let mut trailer = [0u8; TRAILER_LEN];
    file.seek(SeekFrom::Start(file_len - TRAILER_LEN as u64))?;
    file.read_exact(&mut trailer)?;
    if &trailer[4..8] != MAGIC {
        return Ok(None);
    }
    let len = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as u64;
    let total = len + FRAME_OVERHEAD as u64;
    let Some(start) = file_len.checked_sub(total) else {
        return Ok(None);
    };

    let mut header = [0u8; HEADER_LEN];
    file.seek(SeekFrom::Start(start))?;
    file.read_exact(&mut header)?;
    if &header[..4] != MAGIC {
        return Ok(None);
    }
    let flags = header[4];
    let header_len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as u64;
    if header_len != len {
        return Ok(None);
    }

    let mut payload = vec![0u8; len as usize];
    file.read_exact(&mut payload)?;
    match decode_payload(flags, &payload, origin) {
        Ok(value) => Ok(Some((start, value))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn value(tag: &str) -> LogValue {
        let mut m = BTreeMap::new();
        m.insert("tag".to_string(), LogValue::Str(tag.to_string()));
        m.insert("n".to_string(), LogValue::Int(42));
        LogValue::Map(m)
    }

    #[test]
    fn test_round_trip_small_record() {
        let v = value("one");
        let frame = encode_record(&v).unwrap();
        // small payloads stay uncompressed
        assert_eq!(frame[4] & FLAG_ZLIB, 0);
        let scan = scan_records(&frame, "test");
        assert_eq!(scan.records, vec![v]);
        assert_eq!(scan.valid_len, frame.len());
    }

    #[test]
    fn test_large_record_is_compressed() {
        let v = LogValue::Str("abc".repeat(4000));
        let frame = encode_record(&v).unwrap();
        assert_ne!(frame[4] & FLAG_ZLIB, 0);
        assert!(frame.len() < 12_000);
        let scan = scan_records(&frame, "test");
        assert_eq!(scan.records, vec![v]);
    }

    #[test]
    fn test_scan_multiple_records_in_order() {
        let mut data = Vec::new();
        for tag in ["a", "b", "c"] {
            data.extend(encode_record(&value(tag)).unwrap());
        }
        let scan = scan_records(&data, "test");
        assert_eq!(scan.records.len(), 3);
        assert_eq!(scan.records[2], value("c"));
        assert_eq!(scan.valid_len, data.len());
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let first = encode_record(&value("whole")).unwrap();
        let second = encode_record(&value("torn")).unwrap();
        let mut data = first.clone();
        data.extend(&second[..second.len() / 2]);

        let scan = scan_records(&data, "test");
        assert_eq!(scan.records, vec![value("whole")]);
        assert_eq!(scan.valid_len, first.len());
        assert_eq!(scan.last_start, Some(0));
    }

    #[test]
    fn test_tail_seeks_backward() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let mut data = Vec::new();
        let first_len = {
            let frame = encode_record(&value("a")).unwrap();
            data.extend(&frame);
            frame.len()
        };
        data.extend(encode_record(&value("b")).unwrap());
        std::fs::write(&path, &data).unwrap();

        let mut file = File::open(&path).unwrap();
        let tail = tail(&mut file, "test").unwrap();
        let (start, last) = tail.last.unwrap();
        assert_eq!(last, value("b"));
        assert_eq!(start, first_len as u64);
        assert_eq!(tail.valid_len, data.len() as u64);
    }

    #[test]
    fn test_tail_falls_back_on_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let whole = encode_record(&value("whole")).unwrap();
        let mut data = whole.clone();
        data.extend(b"garbage tail bytes");
        std::fs::write(&path, &data).unwrap();

        let mut file = File::open(&path).unwrap();
        let tail = tail(&mut file, "test").unwrap();
        let (start, last) = tail.last.unwrap();
        assert_eq!(last, value("whole"));
        assert_eq!(start, 0);
        assert_eq!(tail.valid_len, whole.len() as u64);
    }

    #[test]
    fn test_empty_log_has_no_tail_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        std::fs::write(&path, b"").unwrap();
        let mut file = File::open(&path).unwrap();
        let tail = tail(&mut file, "test").unwrap();
        assert!(tail.last.is_none());
        assert_eq!(tail.valid_len, 0);
    }
}
