/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Append-only, durable log of irreversible blocks.
//!
//! The block log holds every irreversible block, from height 1 up to its head, with no gaps. Blocks
//! can be read by height or by hash. Appends must extend the head by exactly one height.
//!
//! ## Durability
//!
//! [`append`](BlockLog::append) writes an entry to the data file and its [index record] to the index
//! file, but does not sync either file. [`flush`](BlockLog::flush) syncs both: after it returns, every
//! previously appended block survives a crash.
//!
//! If the process crashes between a write and a flush, the data file may end in a partially written
//! ("torn") entry, and the index file may be shorter or longer than the data file. [`open`](BlockLog::open)
//! repairs all three situations:
//! 1. Index records pointing past the last valid data entry are truncated away.
//! 2. Valid data entries with no index record have their index records rebuilt.
//! 3. A torn final data entry is truncated away.
//!
//! ## Concurrency
//!
//! All methods take `&self`. Appends are serialized by an internal mutex; reads use positional file
//! reads and only ever observe entries whose writes have completed.
//!
//! [index record]: format::IndexRecord

use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    ops::ControlFlow,
    path::{Path, PathBuf},
    sync::{Mutex, RwLock},
};

use crate::types::{
    block::Block,
    data_types::{BlockHeight, CryptoHash},
};

pub(crate) mod format;

pub mod iter;

use format::{encode_entry, read_entry_at, IndexRecord, DATA_FILE, INDEX_FILE, MAGIC};
pub use iter::BlockLogIter;

/// The maximum number of blocks that a single call to [`BlockLog::read_range`] can return.
pub const MAX_READ_RANGE: u64 = 1000;

pub struct BlockLog {
    dir: PathBuf,
    compression: bool,
    writer: Mutex<LogWriter>,
    entries: RwLock<LogEntries>,
    reader: File,
}

struct LogWriter {
    data: File,
    index: File,
    data_len: u64,
}

#[derive(Default)]
struct LogEntries {
    records: Vec<IndexRecord>,
    by_id: HashMap<CryptoHash, BlockHeight>,
}

impl LogEntries {
    fn push(&mut self, record: IndexRecord) {
        self.by_id.insert(record.id, record.height);
        self.records.push(record);
    }

    fn get(&self, height: BlockHeight) -> Option<&IndexRecord> {
        if height.int() == 0 {
            return None;
        }
        self.records.get((height.int() - 1) as usize)
    }

    fn head_height(&self) -> BlockHeight {
        BlockHeight::new(self.records.len() as u64)
    }
}

impl BlockLog {
    /// Open the block log in `dir`, creating it if it does not exist, and repair any damage left by a
    /// crash. If `compression` is set, blocks appended through this handle are LZ4-compressed.
    /// Existing entries are readable regardless of `compression`.
    pub fn open(dir: &Path, compression: bool) -> Result<Self, BlockLogError> {
        std::fs::create_dir_all(dir)?;

        let data_path = dir.join(DATA_FILE);
        let mut data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&data_path)?;
        let mut data_len = data.metadata()?.len();
        if data_len == 0 {
            data.write_all(MAGIC)?;
            data.sync_all()?;
            data_len = MAGIC.len() as u64;
        } else {
            let mut magic = [0u8; 8];
            if data_len < MAGIC.len() as u64 {
                return Err(BlockLogError::Corrupted {
                    detail: "data file header is truncated".to_string(),
                });
            }
            data.seek(SeekFrom::Start(0))?;
            data.read_exact(&mut magic)?;
            if &magic != MAGIC {
                return Err(BlockLogError::Corrupted {
                    detail: "data file header has wrong magic bytes".to_string(),
                });
            }
        }

        let mut index = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(INDEX_FILE))?;
        let (entries, valid_data_len) = recover(&data, data_len, &mut index)?;

        if valid_data_len < data_len {
            log::warn!(
                "truncating {} bytes of torn data from the end of {}",
                data_len - valid_data_len,
                data_path.display()
            );
            data.set_len(valid_data_len)?;
            data.sync_all()?;
        }

        let reader = File::open(&data_path)?;
        log::info!(
            "opened block log in {} with head {}",
            dir.display(),
            entries.head_height()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            compression,
            writer: Mutex::new(LogWriter {
                data,
                index,
                data_len: valid_data_len,
            }),
            entries: RwLock::new(entries),
            reader,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /* ↓↓↓ Writes ↓↓↓ */

    /// Append `block` to the log. `block` must be at the height directly above the current head.
    pub fn append(&self, block: &Block) -> Result<(), BlockLogError> {
        let mut writer = self.writer.lock().map_err(|_| BlockLogError::LockPoisoned)?;

        let expected = self.head_height()? + 1;
        if block.height != expected {
            return Err(BlockLogError::NonSequentialAppend {
                expected,
                found: block.height,
            });
        }

        let entry = encode_entry(block, self.compression)?;
        let record = IndexRecord {
            offset: writer.data_len,
            height: block.height,
            id: block.hash,
        };

        if let Err(err) = writer.write_entry(&entry, &record) {
            writer.rollback(record.offset, (block.height.int() - 1) * IndexRecord::SIZE as u64);
            return Err(err.into());
        }
        writer.data_len += entry.len() as u64;

        self.entries
            .write()
            .map_err(|_| BlockLogError::LockPoisoned)?
            .push(record);

        Ok(())
    }

    /// Sync every appended block to disk.
    pub fn flush(&self) -> Result<(), BlockLogError> {
        let writer = self.writer.lock().map_err(|_| BlockLogError::LockPoisoned)?;
        writer.data.sync_data()?;
        writer.index.sync_data()?;
        Ok(())
    }

    /* ↓↓↓ Reads ↓↓↓ */

    /// Get the height of the newest block in the log, or 0 if the log is empty.
    pub fn head_height(&self) -> Result<BlockHeight, BlockLogError> {
        Ok(self.read_entries()?.head_height())
    }

    /// Get the hash of the newest block in the log.
    pub fn head_id(&self) -> Result<Option<CryptoHash>, BlockLogError> {
        Ok(self.read_entries()?.records.last().map(|record| record.id))
    }

    /// Get the newest block in the log.
    pub fn head(&self) -> Result<Option<Block>, BlockLogError> {
        let head = self.head_height()?;
        if head.int() == 0 {
            return Ok(None);
        }
        self.read_by_number(head)
    }

    pub fn is_empty(&self) -> Result<bool, BlockLogError> {
        Ok(self.head_height()?.int() == 0)
    }

    pub fn read_by_number(&self, height: BlockHeight) -> Result<Option<Block>, BlockLogError> {
        let record = match self.read_entries()?.get(height) {
            Some(record) => *record,
            None => return Ok(None),
        };
        let data_len = self.reader.metadata()?.len();
        match read_entry_at(&self.reader, record.offset, data_len)? {
            Some((block, _)) if block.hash == record.id => Ok(Some(block)),
            _ => Err(BlockLogError::Corrupted {
                detail: format!("entry for block at height {} is unreadable", height),
            }),
        }
    }

    pub fn read_id_by_number(&self, height: BlockHeight) -> Result<Option<CryptoHash>, BlockLogError> {
        Ok(self.read_entries()?.get(height).map(|record| record.id))
    }

    pub fn read_by_id(&self, id: &CryptoHash) -> Result<Option<Block>, BlockLogError> {
        match self.height_of(id)? {
            Some(height) => self.read_by_number(height),
            None => Ok(None),
        }
    }

    /// Get the height of the block with hash `id`, if it is in the log.
    pub fn height_of(&self, id: &CryptoHash) -> Result<Option<BlockHeight>, BlockLogError> {
        Ok(self.read_entries()?.by_id.get(id).copied())
    }

    pub fn contains(&self, id: &CryptoHash) -> Result<bool, BlockLogError> {
        Ok(self.height_of(id)?.is_some())
    }

    /// Read up to `count` consecutive blocks starting at `start`. Fewer blocks are returned if the
    /// range extends past the head.
    ///
    /// Fails with `RangeTooLarge` if `count` exceeds [`MAX_READ_RANGE`].
    pub fn read_range(&self, start: BlockHeight, count: u64) -> Result<Vec<Block>, BlockLogError> {
        if count > MAX_READ_RANGE {
            return Err(BlockLogError::RangeTooLarge {
                requested: count,
                max: MAX_READ_RANGE,
            });
        }
        let end = BlockHeight::new(start.int().saturating_add(count).saturating_sub(1));
        self.iter(start, end)?.collect()
    }

    /// Get a lazy iterator over the blocks at heights `from` to `to`, inclusive, clamped to the blocks
    /// that are in the log when this is called.
    pub fn iter(&self, from: BlockHeight, to: BlockHeight) -> Result<BlockLogIter<'_>, BlockLogError> {
        let head = self.head_height()?;
        let from = from.int().max(1);
        let to = to.int().min(head.int());
        Ok(BlockLogIter::new(self, from, to))
    }

    /// Call `visitor` on each block at heights `from` to `to`, inclusive, in order, until `visitor`
    /// returns [`ControlFlow::Break`] or the range is exhausted. Returns the number of blocks visited.
    pub fn for_each_block(
        &self,
        from: BlockHeight,
        to: BlockHeight,
        mut visitor: impl FnMut(&Block) -> ControlFlow<()>,
    ) -> Result<u64, BlockLogError> {
        let mut visited = 0;
        for block in self.iter(from, to)? {
            visited += 1;
            if visitor(&block?).is_break() {
                break;
            }
        }
        Ok(visited)
    }

    fn read_entries(&self) -> Result<std::sync::RwLockReadGuard<'_, LogEntries>, BlockLogError> {
        self.entries.read().map_err(|_| BlockLogError::LockPoisoned)
    }
}

impl LogWriter {
    fn write_entry(&mut self, entry: &[u8], record: &IndexRecord) -> std::io::Result<()> {
        self.data.seek(SeekFrom::Start(record.offset))?;
        self.data.write_all(entry)?;
        self.index
            .seek(SeekFrom::Start((record.height.int() - 1) * IndexRecord::SIZE as u64))?;
        self.index.write_all(&record.to_bytes())?;
        Ok(())
    }

    fn rollback(&mut self, data_len: u64, index_len: u64) {
        if let Err(err) = self.data.set_len(data_len) {
            log::error!("failed to roll back block log data file: {}", err);
        }
        if let Err(err) = self.index.set_len(index_len) {
            log::error!("failed to roll back block log index file: {}", err);
        }
    }
}

/// Reconcile the index file with the data file, returning the recovered entries and the length of the
/// data file up to the end of its last valid entry.
fn recover(data: &File, data_len: u64, index: &mut File) -> Result<(LogEntries, u64), BlockLogError> {
    let index_len = index.metadata()?.len();
    let mut index_bytes = Vec::with_capacity(index_len as usize);
    index.seek(SeekFrom::Start(0))?;
    index.read_to_end(&mut index_bytes)?;

    let mut records: Vec<IndexRecord> = index_bytes
        .chunks_exact(IndexRecord::SIZE)
        .map(|chunk| {
            let mut bytes = [0u8; IndexRecord::SIZE];
            bytes.copy_from_slice(chunk);
            IndexRecord::from_bytes(&bytes)
        })
        .collect();

    for (position, record) in records.iter().enumerate() {
        if record.height.int() != position as u64 + 1 {
            return Err(BlockLogError::Corrupted {
                detail: format!("index record {} has height {}", position, record.height),
            });
        }
    }

    // Drop index records whose data entries did not make it to disk.
    let mut valid_data_len = MAGIC.len() as u64;
    while let Some(last) = records.last() {
        match read_entry_at(data, last.offset, data_len)? {
            Some((block, size)) if block.hash == last.id => {
                valid_data_len = last.offset + size;
                break;
            }
            _ => {
                records.pop();
            }
        }
    }
    let indexed = records.len();

    // Rebuild index records for data entries that have none.
    let mut entries = LogEntries::default();
    for record in records {
        entries.push(record);
    }
    while let Some((block, size)) = read_entry_at(data, valid_data_len, data_len)? {
        if block.height != entries.head_height() + 1 {
            return Err(BlockLogError::Corrupted {
                detail: format!(
                    "data entry at offset {} has height {}, expected {}",
                    valid_data_len,
                    block.height,
                    entries.head_height() + 1
                ),
            });
        }
        entries.push(IndexRecord {
            offset: valid_data_len,
            height: block.height,
            id: block.hash,
        });
        valid_data_len += size;
    }

    if entries.records.len() != indexed || index_len != (indexed * IndexRecord::SIZE) as u64 {
        log::warn!(
            "rebuilding block log index: {} records on disk, {} recovered",
            index_len / IndexRecord::SIZE as u64,
            entries.records.len()
        );
        index.set_len((indexed * IndexRecord::SIZE) as u64)?;
        index.seek(SeekFrom::Start((indexed * IndexRecord::SIZE) as u64))?;
        for record in &entries.records[indexed..] {
            index.write_all(&record.to_bytes())?;
        }
        index.sync_all()?;
    }

    Ok((entries, valid_data_len))
}

/// Errors that may be encountered when operating a [`BlockLog`].
#[derive(Debug)]
pub enum BlockLogError {
    /// An append was attempted at height `found`, but the only height that can be appended is
    /// `expected`.
    NonSequentialAppend {
        expected: BlockHeight,
        found: BlockHeight,
    },

    /// A range read of `requested` blocks was attempted, but at most `max` can be read at once.
    RangeTooLarge { requested: u64, max: u64 },

    /// The log files are damaged beyond what recovery on open can repair.
    Corrupted { detail: String },

    /// A thread panicked while holding one of the log's locks.
    LockPoisoned,

    Io(std::io::Error),
}

impl From<std::io::Error> for BlockLogError {
    fn from(value: std::io::Error) -> Self {
        BlockLogError::Io(value)
    }
}

impl Display for BlockLogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BlockLogError::NonSequentialAppend { expected, found } => write!(
                f,
                "cannot append block at height {}, next height is {}",
                found, expected
            ),
            BlockLogError::RangeTooLarge { requested, max } => write!(
                f,
                "cannot read {} blocks at once, maximum is {}",
                requested, max
            ),
            BlockLogError::Corrupted { detail } => write!(f, "block log corrupted: {}", detail),
            BlockLogError::LockPoisoned => write!(f, "block log lock poisoned"),
            BlockLogError::Io(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for BlockLogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlockLogError::Io(err) => Some(err),
            _ => None,
        }
    }
}
