//! Append-only log making the in-memory index durable.
//!
//! # File Format
//!
//! ```text
//! +------------------+
//! | Header (16 bytes)|
//! +------------------+
//! | Record 1         |
//! +------------------+
//! | ...              |
//! +------------------+
//! ```
//!
//! ## Record Format
//!
//! ```text
//! +-----------+--------------------------------+-----------+
//! |len:u32    | payload                        |crc32:u32  |
//! +-----------+--------------------------------+-----------+
//! payload := op_count:u32 { kind:u8 key_len:u32 key [val_len:u32 value] }*
//! ```
//!
//! - All multi-byte integers are big-endian
//! - One record holds a whole batch, so a batch replays all-or-nothing
//! - A record cut short at the end of the file is a torn write and is dropped;
//!   a checksum mismatch is corruption
//!
//! The log is never rewritten: overwritten and deleted keys stay in it, so
//! replay time grows with the total write history, not the live data.

use super::BatchOp;
use crate::error::Result;
use crate::Error;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Cursor, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
pub const HEADER_SIZE: usize = 16;

const MAGIC: &[u8; 8] = b"RANKDBLG";
const VERSION: u32 = 1;

const MAX_RECORD_SIZE: usize = 1 << 30;

const OP_PUT: u8 = 0x01;
const OP_DELETE: u8 = 0x02;

pub struct Log {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log").field("path", &self.path).finish()
    }
}

impl Log {
    pub fn open(path: impl AsRef<Path>, buffer_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        if file.metadata()?.len() == 0 {
            let mut f = file.try_clone()?;
            f.write_all(&encode_header())?;
            f.sync_all()?;
        } else {
            let mut buf = [0u8; HEADER_SIZE];
            let mut reader = File::open(&path)?;
            reader
                .read_exact(&mut buf)
                .map_err(|_| Error::CorruptedLog("Truncated header".to_string()))?;
            validate_header(&buf)?;
        }

        let writer = BufWriter::with_capacity(buffer_size, file.try_clone()?);
        Ok(Self { file, writer, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the log file.
    pub fn size(&self) -> u64 {
        self.file.metadata().map_or(0, |meta| meta.len())
    }

    pub fn append(&mut self, ops: &[BatchOp]) -> Result<()> {
        let payload = encode_payload(ops)?;
        let checksum = CRC32.checksum(&payload);

        self.writer.write_u32::<BigEndian>(payload.len() as u32)?;
        self.writer.write_all(&payload)?;
        self.writer.write_u32::<BigEndian>(checksum)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Drops everything past `len`, used to cut a torn tail after replay.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.writer.flush()?;
        self.file.set_len(len)?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn replay(&self) -> Result<ReplayIterator> {
        ReplayIterator::new(&self.path)
    }
}

fn encode_header() -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[..8].copy_from_slice(MAGIC);
    buf[8..12].copy_from_slice(&VERSION.to_be_bytes());
    buf
}

fn validate_header(buf: &[u8; HEADER_SIZE]) -> Result<()> {
    if &buf[..8] != MAGIC {
        return Err(Error::CorruptedLog("Invalid magic".to_string()));
    }
    let mut cursor = Cursor::new(&buf[8..12]);
    let version = cursor.read_u32::<BigEndian>()?;
    if version != VERSION {
        return Err(Error::CorruptedLog(format!("Unsupported version {}", version)));
    }
    Ok(())
}

fn encode_payload(ops: &[BatchOp]) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    payload.write_u32::<BigEndian>(ops.len() as u32)?;
    for op in ops {
        match op {
            BatchOp::Put(key, value) => {
                payload.write_u8(OP_PUT)?;
                payload.write_u32::<BigEndian>(key.len() as u32)?;
                payload.extend_from_slice(key);
                payload.write_u32::<BigEndian>(value.len() as u32)?;
                payload.extend_from_slice(value);
            }
            BatchOp::Delete(key) => {
                payload.write_u8(OP_DELETE)?;
                payload.write_u32::<BigEndian>(key.len() as u32)?;
                payload.extend_from_slice(key);
            }
        }
    }
    Ok(payload)
}

fn decode_payload(payload: &[u8]) -> Result<Vec<BatchOp>> {
    let corrupt = |e: std::io::Error| Error::CorruptedLog(format!("Bad record payload: {}", e));
    let mut cursor = Cursor::new(payload);
    let count = cursor.read_u32::<BigEndian>().map_err(corrupt)? as usize;

    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        let kind = cursor.read_u8().map_err(corrupt)?;
        let key = read_chunk(&mut cursor).map_err(corrupt)?;
        let op = match kind {
            OP_PUT => BatchOp::Put(key, read_chunk(&mut cursor).map_err(corrupt)?),
            OP_DELETE => BatchOp::Delete(key),
            other => return Err(Error::CorruptedLog(format!("Unknown op kind {}", other))),
        };
        ops.push(op);
    }
    Ok(ops)
}

fn read_chunk<R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let len = reader.read_u32::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Yields each logged batch in write order.
pub struct ReplayIterator {
    reader: BufReader<File>,
    valid_len: u64,
    torn: bool,
}

impl ReplayIterator {
    fn new(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;

        Ok(Self {
            reader,
            valid_len: HEADER_SIZE as u64,
            torn: false,
        })
    }

    /// Length of the file prefix made of complete records.
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// Whether replay stopped at a partially written record.
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    /// Reads the length prefix; `None` at a clean end of file.
    fn read_len(&mut self) -> Result<Option<usize>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => Ok(None),
            4 => Ok(Some(u32::from_be_bytes(buf) as usize)),
            _ => {
                self.torn = true;
                Ok(None)
            }
        }
    }

    fn read(&mut self) -> Result<Option<Vec<BatchOp>>> {
        let record_len = match self.read_len()? {
            Some(len) => len,
            None => return Ok(None),
        };
        if record_len > MAX_RECORD_SIZE {
            return Err(Error::CorruptedLog(format!(
                "Record at offset {} claims {} bytes",
                self.valid_len, record_len
            )));
        }

        let mut payload = vec![0u8; record_len];
        let mut crc_buf = [0u8; 4];
        let complete = self
            .reader
            .read_exact(&mut payload)
            .and_then(|_| self.reader.read_exact(&mut crc_buf));
        match complete {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.torn = true;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        if CRC32.checksum(&payload) != u32::from_be_bytes(crc_buf) {
            return Err(Error::CorruptedLog(format!(
                "Checksum mismatch in record at offset {}",
                self.valid_len
            )));
        }

        let ops = decode_payload(&payload)?;
        self.valid_len += (4 + record_len + 4) as u64;
        Ok(Some(ops))
    }
}

impl Iterator for ReplayIterator {
    type Item = Result<Vec<BatchOp>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.torn {
            return None;
        }
        self.read().transpose()
    }
}
