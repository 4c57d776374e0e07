// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-file snapshots of a record sequence, in the chunk frame format.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

use tracing::warn;

use crate::codec::{self, read_frame, write_frame};
use crate::errors::BufferError;
use crate::record::LogRecord;

/// Writes `records` to `path` through a temporary file renamed into place.
pub fn write<'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a LogRecord>,
) -> Result<(), BufferError> {
    let tmp = path.with_extension("tmp");
    let file = File::create(&tmp).map_err(|e| BufferError::io(&tmp, e))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        let bytes = codec::serialize(record)?;
        write_frame(&mut writer, &bytes).map_err(|e| BufferError::io(&tmp, e))?;
    }
    writer.flush().map_err(|e| BufferError::io(&tmp, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| BufferError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| BufferError::io(path, e))
}

/// Reads every record of the snapshot at `path`.
///
/// A missing file is an empty snapshot. Reading stops at the first frame that
/// cannot be decoded; the records before it are returned.
#[must_use]
pub fn read(path: &Path) -> Vec<LogRecord> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("BUFFER | cannot open snapshot {}: {e}", path.display());
            return Vec::new();
        }
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    loop {
        match read_frame(&mut reader) {
            Ok(Some(bytes)) => match codec::deserialize(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        "BUFFER | snapshot {} is corrupt after {} records: {e}",
                        path.display(),
                        records.len()
                    );
                    break;
                }
            },
            Ok(None) => break,
            Err(e) => {
                warn!(
                    "BUFFER | snapshot {} is corrupt after {} records: {e}",
                    path.display(),
                    records.len()
                );
                break;
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    fn records(n: usize) -> Vec<LogRecord> {
        (0..n)
            .map(|i| LogRecord::from_raw(format!("line {i}")))
            .collect()
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("q.snapshot");
        let written = records(20);
        write(&path, &written).expect("write");
        assert_eq!(read(&path), written);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let dir = tempdir().expect("tempdir");
        assert!(read(&dir.path().join("absent")).is_empty());
    }

    #[test]
    #[traced_test]
    fn test_truncated_snapshot_keeps_readable_prefix() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("q.snapshot");
        write(&path, &records(3)).expect("write");
        let len = fs::metadata(&path).expect("metadata").len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("open")
            .set_len(len - 3)
            .expect("truncate");

        let recovered = read(&path);
        assert_eq!(recovered, records(2));
        assert!(logs_contain("is corrupt after 2 records"));
    }
}
