//! Framing for WAL records.
//!
//! ```text
//! file:   [MAGIC "NTMA": 4 bytes][format version: 1 byte][record]*
//! record: [version: 1 byte][length: 4 bytes LE][JSON: length bytes][crc32: 4 bytes LE]
//! ```

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current record format version.
pub const CODEC_VERSION: u8 = 1;

/// Magic bytes opening every WAL file.
pub const MAGIC: [u8; 4] = *b"NTMA";

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 5;

/// Largest record body accepted on decode.
const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Encodes one record.
///
/// # Errors
/// Fails if the value cannot be serialized or exceeds the record size limit.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    if data.len() > MAX_RECORD_SIZE {
        return Err(invalid(format!(
            "record size {} exceeds maximum {MAX_RECORD_SIZE}",
            data.len()
        )));
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Decodes one record, verifying version and checksum.
///
/// A record cut short surfaces as `ErrorKind::UnexpectedEof`; every other
/// defect is `ErrorKind::InvalidData`.
///
/// # Errors
/// See above.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(invalid(format!(
            "unsupported record version {} (expected {CODEC_VERSION})",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_RECORD_SIZE {
        return Err(invalid(format!("record size {len} exceeds maximum {MAX_RECORD_SIZE}")));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&data);
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    serde_json::from_slice(&data).map_err(|e| invalid(format!("deserialization failed: {e}")))
}

/// Writes the file header.
///
/// # Errors
/// Propagates write errors.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Reads and validates the file header, returning its format version.
///
/// # Errors
/// `InvalidData` if the magic bytes or version do not match.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(invalid(format!("invalid magic bytes: {magic:?}")));
    }
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(invalid(format!("unsupported WAL format version {}", version[0])));
    }
    Ok(version[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_record_roundtrip() {
        let value = json!({"kind": "entity_insert", "id": "ent_1"});
        let mut cursor = Cursor::new(encode(&value).unwrap());
        let decoded: serde_json::Value = decode(&mut cursor).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_detects_corruption() {
        let mut encoded = encode(&"some payload".to_string()).unwrap();
        encoded[7] ^= 0xFF;
        let err = decode::<String>(&mut Cursor::new(encoded)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_record_is_eof() {
        let encoded = encode(&"some payload".to_string()).unwrap();
        let cut = encoded[..encoded.len() - 2].to_vec();
        let err = decode::<String>(&mut Cursor::new(cut)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_rejects_oversized_record() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = decode::<String>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        assert_eq!(read_header(&mut Cursor::new(&buf)).unwrap(), CODEC_VERSION);

        buf[0] = b'K';
        assert!(read_header(&mut Cursor::new(&buf)).is_err());
    }
}
