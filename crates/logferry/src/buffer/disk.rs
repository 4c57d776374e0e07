// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Disk buffer made of numbered chunk files `<name>.<id>.q`.
//!
//! Records are appended to the chunk `push_id` and read back from the chunk
//! `pop_id`. A chunk is rotated once it holds `chunk_records` records and is
//! deleted once every record in it was popped. Bookkeeping only counts records
//! that have not been popped yet; it is rebuilt from the files on open.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::buffer::BufferBackend;
use crate::codec::{self, read_frame, write_frame};
use crate::constants::MAX_FRAME_SIZE;
use crate::errors::{BufferError, FrameError};
use crate::record::LogRecord;

const FRAME_PREFIX: u64 = 4;

/// Unread content of one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ChunkStats {
    records: u64,
    bytes: u64,
}

struct ChunkReader {
    id: u64,
    reader: BufReader<File>,
    /// Bytes of the chunk already consumed.
    offset: u64,
}

struct ChunkWriter {
    writer: BufWriter<File>,
    written: u64,
}

pub struct DiskBackend {
    name: String,
    directory: PathBuf,
    chunk_records: u64,
    chunks: BTreeMap<u64, ChunkStats>,
    push_id: u64,
    pop_id: u64,
    writer: Option<ChunkWriter>,
    reader: Option<ChunkReader>,
    records: u64,
    bytes: u64,
    /// Set by a successful `open`; nothing touches the files otherwise.
    opened: bool,
}

impl DiskBackend {
    #[must_use]
    pub fn new(name: &str, directory: PathBuf, chunk_records: u64) -> Self {
        Self {
            name: name.to_string(),
            directory,
            chunk_records: chunk_records.max(1),
            chunks: BTreeMap::new(),
            push_id: 1,
            pop_id: 1,
            writer: None,
            reader: None,
            records: 0,
            bytes: 0,
            opened: false,
        }
    }

    #[must_use]
    pub fn push_id(&self) -> u64 {
        self.push_id
    }

    #[must_use]
    pub fn pop_id(&self) -> u64 {
        self.pop_id
    }

    #[must_use]
    pub fn chunk_path(&self, id: u64) -> PathBuf {
        self.directory.join(format!("{}.{id}.q", self.name))
    }

    /// Ids of the chunk files of this buffer present in the directory.
    pub fn chunk_files(&self) -> Result<Vec<u64>, BufferError> {
        let entries =
            fs::read_dir(&self.directory).map_err(|e| BufferError::io(&self.directory, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BufferError::io(&self.directory, e))?;
            if let Some(id) = self.chunk_id(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn chunk_id(&self, file_name: &str) -> Option<u64> {
        file_name
            .strip_prefix(self.name.as_str())?
            .strip_prefix('.')?
            .strip_suffix(".q")?
            .parse()
            .ok()
    }

    /// Counts the readable records of a chunk. Returns the stats of the good
    /// prefix and whether the file had an unreadable tail.
    fn scan(path: &Path) -> Result<(ChunkStats, bool), BufferError> {
        let file = File::open(path).map_err(|e| BufferError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let mut stats = ChunkStats::default();
        loop {
            match read_frame(&mut reader) {
                Ok(Some(payload)) => {
                    stats.records += 1;
                    stats.bytes += payload.len() as u64;
                }
                Ok(None) => return Ok((stats, false)),
                Err(FrameError::Io(e)) => return Err(BufferError::io(path, e)),
                Err(e) => {
                    warn!(
                        "BUFFER | chunk {} is corrupt after {} records: {e}",
                        path.display(),
                        stats.records
                    );
                    return Ok((stats, true));
                }
            }
        }
    }

    fn open_writer(&mut self) -> Result<(), BufferError> {
        let path = self.chunk_path(self.push_id);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BufferError::io(&path, e))?;
        self.writer = Some(ChunkWriter {
            writer: BufWriter::new(file),
            written: 0,
        });
        self.chunks.entry(self.push_id).or_default();
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), BufferError> {
        if let Some(mut current) = self.writer.take() {
            let path = self.chunk_path(self.push_id);
            current
                .writer
                .flush()
                .map_err(|e| BufferError::io(&path, e))?;
        }
        self.push_id += 1;
        debug!("BUFFER | '{}' rotated to chunk {}", self.name, self.push_id);
        self.open_writer()
    }

    fn remove_chunk(&mut self, id: u64) {
        if let Some(stats) = self.chunks.remove(&id) {
            self.records = self.records.saturating_sub(stats.records);
            self.bytes = self.bytes.saturating_sub(stats.bytes);
        }
        let path = self.chunk_path(id);
        match fs::remove_file(&path) {
            Ok(()) => debug!("BUFFER | removed chunk {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("BUFFER | cannot remove chunk {}: {e}", path.display()),
        }
    }

    /// Drops the unread rest of the chunk being read and moves on.
    fn abandon_reader(&mut self, id: u64, error: &dyn std::fmt::Display) -> Result<(), BufferError> {
        let lost = self.chunks.get(&id).map_or(0, |stats| stats.records);
        warn!(
            "BUFFER | '{}': dropping {lost} unreadable records of chunk {id}: {error}",
            self.name
        );
        self.reader = None;
        if id == self.push_id {
            self.rotate()?;
        }
        self.remove_chunk(id);
        self.pop_id = id + 1;
        Ok(())
    }

    /// Rewrites the partially read chunk so it only holds unread records.
    fn compact_reader(&mut self) -> Result<(), BufferError> {
        let Some(current) = self.reader.take() else {
            return Ok(());
        };
        let unread = self.chunks.get(&current.id).map_or(0, |stats| stats.records);
        if unread == 0 {
            if current.id != self.push_id {
                self.remove_chunk(current.id);
                self.pop_id = current.id + 1;
            }
            return Ok(());
        }
        if current.offset == 0 {
            return Ok(());
        }
        let path = self.chunk_path(current.id);
        let tmp = path.with_extension("q.tmp");
        let copy = || -> io::Result<()> {
            let mut source = File::open(&path)?;
            source.seek(SeekFrom::Start(current.offset))?;
            let mut target = File::create(&tmp)?;
            io::copy(&mut source, &mut target)?;
            target.sync_all()?;
            fs::rename(&tmp, &path)
        };
        copy().map_err(|e| BufferError::io(&path, e))
    }
}

impl BufferBackend for DiskBackend {
    fn open(&mut self) -> Result<(), BufferError> {
        self.opened = false;
        self.chunks.clear();
        self.reader = None;
        self.writer = None;
        self.push_id = 1;
        self.pop_id = 1;
        self.records = 0;
        self.bytes = 0;
        fs::create_dir_all(&self.directory).map_err(|e| BufferError::io(&self.directory, e))?;

        for id in self.chunk_files()? {
            let path = self.chunk_path(id);
            let len = fs::metadata(&path)
                .map_err(|e| BufferError::io(&path, e))?
                .len();
            if len == 0 {
                self.remove_chunk(id);
                continue;
            }
            let (stats, _) = Self::scan(&path)?;
            if stats.records == 0 {
                self.remove_chunk(id);
                continue;
            }
            self.records += stats.records;
            self.bytes += stats.bytes;
            self.chunks.insert(id, stats);
        }

        let oldest = self.chunks.keys().next().copied();
        let newest = self.chunks.keys().next_back().copied();
        self.push_id = newest.map_or(1, |id| id + 1);
        self.pop_id = oldest.unwrap_or(self.push_id);
        self.open_writer()?;
        self.opened = true;
        if self.records > 0 {
            info!(
                "BUFFER | '{}' recovered {} records ({} bytes) in chunks {}..={}",
                self.name,
                self.records,
                self.bytes,
                self.pop_id,
                self.push_id - 1
            );
        }
        Ok(())
    }

    fn push(&mut self, record: &LogRecord) -> Result<(), BufferError> {
        if !self.opened {
            return Err(BufferError::NotOpen(self.name.clone()));
        }
        let payload = codec::serialize(record)?;
        if payload.len() > MAX_FRAME_SIZE as usize {
            return Err(BufferError::FrameTooLarge(payload.len()));
        }
        let full = self
            .writer
            .as_ref()
            .map_or(true, |current| current.written >= self.chunk_records);
        if full {
            if self.writer.is_some() {
                self.rotate()?;
            } else {
                self.open_writer()?;
            }
        }

        let path = self.chunk_path(self.push_id);
        let Some(current) = self.writer.as_mut() else {
            return Err(BufferError::io(
                &path,
                io::Error::new(ErrorKind::NotConnected, "no chunk open for writing"),
            ));
        };
        write_frame(&mut current.writer, &payload)
            .and_then(|()| current.writer.flush())
            .map_err(|e| BufferError::io(&path, e))?;
        current.written += 1;

        let size = payload.len() as u64;
        let stats = self.chunks.entry(self.push_id).or_default();
        stats.records += 1;
        stats.bytes += size;
        self.records += 1;
        self.bytes += size;
        Ok(())
    }

    fn pop(&mut self) -> Result<Option<LogRecord>, BufferError> {
        if !self.opened {
            return Ok(None);
        }
        loop {
            if self.pop_id > self.push_id {
                return Ok(None);
            }
            if self.reader.is_none() {
                let path = self.chunk_path(self.pop_id);
                match File::open(&path) {
                    Ok(file) => {
                        self.reader = Some(ChunkReader {
                            id: self.pop_id,
                            reader: BufReader::new(file),
                            offset: 0,
                        });
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound && self.pop_id < self.push_id => {
                        warn!("BUFFER | chunk {} vanished", path.display());
                        self.remove_chunk(self.pop_id);
                        self.pop_id += 1;
                        continue;
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(BufferError::io(&path, e)),
                }
            }
            let Some(current) = self.reader.as_mut() else {
                continue;
            };
            let id = current.id;

            match read_frame(&mut current.reader) {
                Ok(Some(payload)) => {
                    let record = match codec::deserialize(&payload) {
                        Ok(record) => record,
                        Err(e) => {
                            self.abandon_reader(id, &e)?;
                            continue;
                        }
                    };
                    current.offset += FRAME_PREFIX + payload.len() as u64;
                    let size = payload.len() as u64;
                    if let Some(stats) = self.chunks.get_mut(&id) {
                        stats.records = stats.records.saturating_sub(1);
                        stats.bytes = stats.bytes.saturating_sub(size);
                    }
                    self.records = self.records.saturating_sub(1);
                    self.bytes = self.bytes.saturating_sub(size);
                    return Ok(Some(record));
                }
                Ok(None) if id < self.push_id => {
                    self.reader = None;
                    self.remove_chunk(id);
                    self.pop_id = id + 1;
                }
                // caught up with the chunk being written
                Ok(None) => return Ok(None),
                Err(FrameError::Io(e)) => return Err(BufferError::io(self.chunk_path(id), e)),
                Err(e) => self.abandon_reader(id, &e)?,
            }
        }
    }

    fn len(&self) -> u64 {
        self.records
    }

    fn size(&self) -> u64 {
        self.bytes
    }

    fn close(&mut self) -> Result<(), BufferError> {
        if !self.opened {
            debug!("BUFFER | '{}' was not open, nothing to close", self.name);
            return Ok(());
        }
        self.opened = false;
        if let Some(mut current) = self.writer.take() {
            let path = self.chunk_path(self.push_id);
            current
                .writer
                .flush()
                .map_err(|e| BufferError::io(&path, e))?;
        }
        self.compact_reader()?;
        let active_is_empty = self
            .chunks
            .get(&self.push_id)
            .map_or(true, |stats| stats.records == 0);
        if active_is_empty {
            self.remove_chunk(self.push_id);
        }
        debug!(
            "BUFFER | '{}' closed with {} records in {} chunks",
            self.name,
            self.records,
            self.chunks.len()
        );
        Ok(())
    }
}
