/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! On-disk layout of the block log.
//!
//! ## Data file (`block_log`)
//!
//! An 8-byte magic header `CHNBLKLG`, followed by one entry per block, in height order:
//!
//! |Bytes|Contents|
//! |---|---|
//! |1|Flags. Bit 0 set means the payload is LZ4-compressed.|
//! |4|Payload length, little-endian.|
//! |variable|Payload: the borsh encoding of the block, possibly LZ4-compressed with a prepended size.|
//! |4|CRC32 of the flags, length, and payload, little-endian.|
//!
//! ## Index file (`block_log.index`)
//!
//! One fixed-size [`IndexRecord`] per entry in the data file, in the same order.

use std::{fs::File, io};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Block,
    data_types::{BlockHeight, CryptoHash},
};

pub(crate) const DATA_FILE: &str = "block_log";
pub(crate) const INDEX_FILE: &str = "block_log.index";
pub(crate) const MAGIC: &[u8; 8] = b"CHNBLKLG";

pub(crate) const FLAG_LZ4: u8 = 0b0000_0001;

pub(crate) const ENTRY_HEADER_SIZE: u64 = 5;
pub(crate) const ENTRY_TRAILER_SIZE: u64 = 4;

/// Location and identity of one entry in the data file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct IndexRecord {
    pub(crate) offset: u64,
    pub(crate) height: BlockHeight,
    pub(crate) id: CryptoHash,
}

impl IndexRecord {
    pub(crate) const SIZE: usize = 48;

    pub(crate) fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(&self.offset.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.height.to_le_bytes());
        bytes[16..48].copy_from_slice(&self.id.bytes());
        bytes
    }

    pub(crate) fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&bytes[0..8]);
        let mut height = [0u8; 8];
        height.copy_from_slice(&bytes[8..16]);
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes[16..48]);
        Self {
            offset: u64::from_le_bytes(offset),
            height: BlockHeight::new(u64::from_le_bytes(height)),
            id: CryptoHash::new(id),
        }
    }
}

/// Encode `block` as a complete data file entry.
pub(crate) fn encode_entry(block: &Block, compress: bool) -> io::Result<Vec<u8>> {
    let encoded = block.try_to_vec()?;
    let (flags, payload) = if compress {
        (FLAG_LZ4, lz4_flex::compress_prepend_size(&encoded))
    } else {
        (0, encoded)
    };
    let length = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "block too large for log entry"))?;

    let mut entry = Vec::with_capacity(payload.len() + (ENTRY_HEADER_SIZE + ENTRY_TRAILER_SIZE) as usize);
    entry.push(flags);
    entry.extend_from_slice(&length.to_le_bytes());
    entry.extend_from_slice(&payload);
    let checksum = crc32fast::hash(&entry);
    entry.extend_from_slice(&checksum.to_le_bytes());

    Ok(entry)
}

/// Read the entry starting at `offset` in `data`, whose length is `data_len`.
///
/// Returns the decoded block and the total size of the entry, or `None` if the entry is incomplete,
/// fails its checksum, or does not decode. Only I/O failures are errors.
pub(crate) fn read_entry_at(
    data: &File,
    offset: u64,
    data_len: u64,
) -> io::Result<Option<(Block, u64)>> {
    if offset + ENTRY_HEADER_SIZE > data_len {
        return Ok(None);
    }
    let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
    read_exact_at(data, &mut header, offset)?;
    let flags = header[0];
    let mut length = [0u8; 4];
    length.copy_from_slice(&header[1..5]);
    let length = u32::from_le_bytes(length) as u64;

    let entry_size = ENTRY_HEADER_SIZE + length + ENTRY_TRAILER_SIZE;
    if offset + entry_size > data_len {
        return Ok(None);
    }
    let mut rest = vec![0u8; (length + ENTRY_TRAILER_SIZE) as usize];
    read_exact_at(data, &mut rest, offset + ENTRY_HEADER_SIZE)?;
    let (payload, checksum) = rest.split_at(length as usize);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header);
    hasher.update(payload);
    let mut stored_checksum = [0u8; 4];
    stored_checksum.copy_from_slice(checksum);
    if hasher.finalize() != u32::from_le_bytes(stored_checksum) {
        return Ok(None);
    }

    let decoded = if flags & FLAG_LZ4 != 0 {
        match lz4_flex::decompress_size_prepended(payload) {
            Ok(decompressed) => decompressed,
            Err(_) => return Ok(None),
        }
    } else {
        payload.to_vec()
    };

    Ok(Block::try_from_slice(&decoded)
        .ok()
        .map(|block| (block, entry_size)))
}

#[cfg(unix)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match std::os::windows::fs::FileExt::seek_read(file, buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_record_layout() {
        let record = IndexRecord {
            offset: 8,
            height: BlockHeight::new(3),
            id: CryptoHash::new([7u8; 32]),
        };
        let bytes = record.to_bytes();
        assert_eq!(&bytes[0..8], &8u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &3u64.to_le_bytes());
        assert_eq!(IndexRecord::from_bytes(&bytes), record);
    }
}
