//! Append-only write-ahead log.
//!
//! Records live in a single segment file as `[len:4][crc32:4][payload]`
//! frames, little-endian. Entries are addressed by a 1-based monotonic
//! index assigned at append time. On open the segment is scanned to rebuild
//! the offset table; a torn or corrupt tail ends the scan and is truncated
//! so the next append starts from the last intact record.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const SEGMENT_FILE: &str = "000001.wal";
const FRAME_HEADER: u64 = 8;

pub struct Wal {
    file: File,
    path: PathBuf,
    /// Byte offset of each record frame, in index order.
    offsets: Vec<u64>,
    /// End of the last intact record; appends go here.
    tail: u64,
    sync: bool,
}

impl Wal {
    /// Opens (or creates) the log under `dir`, scanning existing records and
    /// truncating any torn tail.
    pub fn open(dir: &Path, sync: bool) -> Result<Wal> {
        fs::create_dir_all(dir)?;
        let path = dir.join(SEGMENT_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut offsets = Vec::new();
        let mut pos: u64 = 0;
        loop {
            let at = pos as usize;
            if at + FRAME_HEADER as usize > data.len() {
                break;
            }
            let len =
                u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]) as usize;
            let checksum =
                u32::from_le_bytes([data[at + 4], data[at + 5], data[at + 6], data[at + 7]]);
            let body_start = at + FRAME_HEADER as usize;
            if body_start + len > data.len() {
                tracing::warn!("WAL truncated at offset {}, discarding tail", pos);
                break;
            }
            if crc32fast::hash(&data[body_start..body_start + len]) != checksum {
                tracing::warn!("WAL checksum mismatch at offset {}, discarding tail", pos);
                break;
            }
            offsets.push(pos);
            pos += FRAME_HEADER + len as u64;
        }

        if pos < data.len() as u64 {
            file.set_len(pos)?;
            file.sync_all()?;
        }

        Ok(Wal {
            file,
            path,
            offsets,
            tail: pos,
            sync,
        })
    }

    /// Index of the first record, or 0 when the log is empty.
    pub fn first_index(&self) -> u64 {
        if self.offsets.is_empty() {
            0
        } else {
            1
        }
    }

    /// Index of the last record, or 0 when the log is empty.
    pub fn last_index(&self) -> u64 {
        self.offsets.len() as u64
    }

    /// Appends a record and returns its index (`last_index + 1`).
    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        let mut frame = Vec::with_capacity(FRAME_HEADER as usize + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        frame.extend_from_slice(payload);

        self.file.seek(SeekFrom::Start(self.tail))?;
        self.file.write_all(&frame)?;
        if self.sync {
            self.file.sync_data()?;
        }

        self.offsets.push(self.tail);
        self.tail += frame.len() as u64;
        Ok(self.offsets.len() as u64)
    }

    /// Reads the record at the given 1-based index.
    pub fn read(&mut self, index: u64) -> Result<Vec<u8>> {
        if index == 0 || index > self.offsets.len() as u64 {
            return Err(Error::Storage(format!(
                "wal index {} out of range (last index {})",
                index,
                self.offsets.len()
            )));
        }
        let offset = self.offsets[(index - 1) as usize];
        self.file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; FRAME_HEADER as usize];
        self.file.read_exact(&mut header)?;
        let len =
            u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let checksum = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let mut payload = vec![0u8; len];
        self.file.read_exact(&mut payload)?;
        if crc32fast::hash(&payload) != checksum {
            return Err(Error::Storage(format!(
                "wal record {} failed checksum in {}",
                index,
                self.path.display()
            )));
        }
        Ok(payload)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
