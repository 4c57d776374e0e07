// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record serialization and the length-prefixed frame format.
//!
//! A serialized record is one format-version byte followed by the MessagePack
//! encoding of the [`LogRecord`]. Chunk and snapshot files store records as
//! frames: a little-endian `u32` length followed by that many payload bytes.

use std::io::{self, Read, Write};

use crate::constants::MAX_FRAME_SIZE;
use crate::errors::{CodecError, FrameError};
use crate::record::LogRecord;

/// Version byte leading every serialized record.
pub const FORMAT_VERSION: u8 = 1;

const LENGTH_PREFIX: usize = 4;

pub fn serialize(record: &LogRecord) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![FORMAT_VERSION];
    rmp_serde::encode::write(&mut buf, record)?;
    Ok(buf)
}

pub fn deserialize(bytes: &[u8]) -> Result<LogRecord, CodecError> {
    let (version, payload) = bytes.split_first().ok_or(CodecError::Empty)?;
    if *version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(*version));
    }
    Ok(rmp_serde::from_slice(payload)?)
}

/// Size in bytes a record occupies in a frame, prefix excluded.
pub fn encoded_len(record: &LogRecord) -> Result<usize, CodecError> {
    serialize(record).map(|bytes| bytes.len())
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes is too large", payload.len()),
            )
        })?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)
}

/// Reads the next frame.
///
/// Returns `Ok(None)` on a clean end of stream, i.e. when no byte of a new
/// frame is available.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    let found = read_full(reader, &mut prefix)?;
    if found == 0 {
        return Ok(None);
    }
    if found < LENGTH_PREFIX {
        return Err(FrameError::Truncated {
            expected: LENGTH_PREFIX,
            found,
        });
    }

    let len = u32::from_le_bytes(prefix);
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(FrameError::BadLength(len));
    }

    let mut payload = vec![0u8; len as usize];
    let found = read_full(reader, &mut payload)?;
    if found < payload.len() {
        return Err(FrameError::Truncated {
            expected: payload.len(),
            found,
        });
    }
    Ok(Some(payload))
}

/// Like `read_exact`, but reports how many bytes were read before EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use std::io::Cursor;
    use std::net::{IpAddr, Ipv4Addr};
    use time::macros::datetime;

    fn sample_record() -> LogRecord {
        let mut record = LogRecord::from_raw("<13>Oct 19 10:00:00 host app: started");
        record.set("Severity", "INFO");
        record.set("SeverityValue", 2i64);
        record.set("Truncated", false);
        record.set("EventTime", datetime!(2024-10-19 10:00:00.123456 UTC));
        record.set("Payload", Value::Binary(vec![0, 1, 2, 255]));
        record.set("MessageSourceAddress", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        record.set("Hostname", Value::Undefined);
        record
    }

    #[test]
    fn test_every_value_type_survives_serialization() {
        let record = sample_record();
        let bytes = serialize(&record).expect("serialize");
        assert_eq!(bytes[0], FORMAT_VERSION);

        let decoded = deserialize(&bytes).expect("deserialize");
        assert_eq!(decoded, record);
        let names: Vec<&str> = decoded.fields().map(|(name, _)| name).collect();
        assert_eq!(names[0], "raw_event");
        assert_eq!(names[names.len() - 1], "Hostname");
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut bytes = serialize(&sample_record()).expect("serialize");
        bytes[0] = 9;
        assert!(matches!(
            deserialize(&bytes),
            Err(CodecError::UnsupportedVersion(9))
        ));
        assert!(matches!(deserialize(&[]), Err(CodecError::Empty)));
    }

    #[test]
    fn test_frame_layout_is_little_endian_length_prefix() {
        let mut out = Vec::new();
        write_frame(&mut out, b"abc").expect("write");
        assert_eq!(out, vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_read_frame_distinguishes_eof_from_truncation() {
        let mut out = Vec::new();
        write_frame(&mut out, b"first").expect("write");
        write_frame(&mut out, b"second").expect("write");
        out.truncate(out.len() - 2);

        let mut cursor = Cursor::new(out);
        assert_eq!(
            read_frame(&mut cursor).expect("first frame"),
            Some(b"first".to_vec())
        );
        assert!(matches!(
            read_frame(&mut cursor),
            Err(FrameError::Truncated {
                expected: 6,
                found: 4
            })
        ));

        let mut empty = Cursor::new(Vec::new());
        assert!(read_frame(&mut empty).expect("eof").is_none());
    }

    #[test]
    fn test_read_frame_rejects_bad_length() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 0, 1, 2]);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(FrameError::BadLength(0))
        ));

        let mut cursor = Cursor::new(u32::MAX.to_le_bytes().to_vec());
        assert!(matches!(
            read_frame(&mut cursor),
            Err(FrameError::BadLength(u32::MAX))
        ));
    }
}
