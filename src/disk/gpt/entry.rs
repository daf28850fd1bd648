/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! GPT partition entries and the arrays holding them.

use super::GPT_ENTRY_SIZE;
use crate::error::Error;
use crate::error::Result;
use crate::guid;
use crate::store::BlockStore;
use crc32fast::Hasher;
use std::fmt;
use uuid::Uuid;

/// The offset of the name in an entry.
const NAME_OFF: usize = 56;

/// Returns the number of UTF-16 code units an entry of `entry_size` bytes can hold in its
/// name.
pub fn name_capacity(entry_size: usize) -> usize {
    entry_size.saturating_sub(NAME_OFF) / 2
}

/// Checks the entry size is large enough for the fixed fields of an entry.
fn check_entry_size(entry_size: usize) -> Result<()> {
    if entry_size < GPT_ENTRY_SIZE {
        return Err(Error::InvalidUsage(format!(
            "GPT entry size {entry_size} is smaller than {GPT_ENTRY_SIZE}"
        )));
    }
    Ok(())
}

/// A GPT partition entry.
///
/// The zero value is an unused slot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GptPartition {
    /// The partition type's GUID.
    pub type_guid: Uuid,
    /// The partition's unique GUID.
    pub guid: Uuid,
    /// The first LBA of the partition.
    pub start_lba: u64,
    /// The last LBA of the partition (inclusive).
    pub end_lba: u64,
    /// Attribute flags.
    pub attributes: u64,
    /// The partition's name.
    pub name: String,
}

impl GptPartition {
    /// Creates a partition with no attributes.
    pub fn new(type_guid: Uuid, guid: Uuid, start_lba: u64, end_lba: u64, name: &str) -> Self {
        Self {
            type_guid,
            guid,
            start_lba,
            end_lba,
            attributes: 0,
            name: name.to_owned(),
        }
    }

    /// Tells whether the slot is unused.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns the number of blocks in the partition.
    pub fn blocks(&self) -> u64 {
        self.end_lba
            .checked_sub(self.start_lba)
            .map_or(0, |n| n.saturating_add(1))
    }

    /// Checks that the name fits in an entry of `entry_size` bytes.
    pub fn check_name(&self, entry_size: usize) -> Result<()> {
        let len = self.name.encode_utf16().count();
        let capacity = name_capacity(entry_size);
        if len > capacity {
            return Err(Error::InvalidUsage(format!(
                "partition name `{}` is {len} UTF-16 code units long, entries hold {capacity}",
                self.name
            )));
        }
        Ok(())
    }

    /// Parses an entry from `record`, the whole slot of the array.
    pub fn parse(record: &[u8]) -> Result<Self> {
        check_entry_size(record.len())?;
        let u64_at =
            |off: usize| u64::from_le_bytes(record[off..(off + 8)].try_into().unwrap());
        let name: Vec<u16> = record[NAME_OFF..]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|c| *c != 0)
            .collect();
        Ok(Self {
            type_guid: guid::decode(record[0..16].try_into().unwrap()),
            guid: guid::decode(record[16..32].try_into().unwrap()),
            start_lba: u64_at(32),
            end_lba: u64_at(40),
            attributes: u64_at(48),
            name: String::from_utf16_lossy(&name),
        })
    }

    /// Writes the entry to `record`, the whole slot of the array. Bytes not used by the
    /// entry are zeroed.
    pub fn fill(&self, record: &mut [u8]) -> Result<()> {
        check_entry_size(record.len())?;
        self.check_name(record.len())?;
        record.fill(0);
        record[0..16].copy_from_slice(&guid::encode(&self.type_guid));
        record[16..32].copy_from_slice(&guid::encode(&self.guid));
        record[32..40].copy_from_slice(&self.start_lba.to_le_bytes());
        record[40..48].copy_from_slice(&self.end_lba.to_le_bytes());
        record[48..56].copy_from_slice(&self.attributes.to_le_bytes());
        let name = record[NAME_OFF..].chunks_exact_mut(2);
        for (dst, c) in name.zip(self.name.encode_utf16()) {
            dst.copy_from_slice(&c.to_le_bytes());
        }
        Ok(())
    }
}

impl fmt::Display for GptPartition {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "start={}, end={}, type={}, uuid={}",
            self.start_lba, self.end_lba, self.type_guid, self.guid
        )?;
        if self.attributes != 0 {
            write!(fmt, ", attrs={:#x}", self.attributes)?;
        }
        if !self.name.is_empty() {
            write!(fmt, ", name=\"{}\"", self.name)?;
        }
        Ok(())
    }
}

/// Iterator over the entries of an array, computing the array's checksum on the way.
///
/// Only one record is held in memory at a time.
pub struct EntryReader<'s, S: BlockStore + ?Sized> {
    /// The store to read from.
    store: &'s S,
    /// The offset of the next record, in bytes.
    off: u64,
    /// The number of records left to read.
    remaining: u32,
    /// Buffer holding the current record.
    record: Vec<u8>,
    /// Checksum of the records read so far.
    hasher: Hasher,
}

impl<'s, S: BlockStore + ?Sized> EntryReader<'s, S> {
    /// Creates a reader for `count` entries of `entry_size` bytes, starting at byte `start`.
    pub fn new(store: &'s S, start: u64, entry_size: usize, count: u32) -> Result<Self> {
        check_entry_size(entry_size)?;
        Ok(Self {
            store,
            off: start,
            remaining: count,
            record: vec![0; entry_size],
            hasher: Hasher::new(),
        })
    }

    /// Returns the checksum of the records read so far.
    ///
    /// Once the iterator is exhausted, this is the checksum of the whole array.
    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

impl<S: BlockStore + ?Sized> Iterator for EntryReader<'_, S> {
    type Item = Result<GptPartition>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        if let Err(e) = self
            .store
            .read_exact_at(&mut self.record, self.off, "GPT partition entry")
        {
            self.remaining = 0;
            return Some(Err(e));
        }
        self.hasher.update(&self.record);
        self.off += self.record.len() as u64;
        self.remaining -= 1;
        Some(GptPartition::parse(&self.record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

/// Reads `count` entries of `entry_size` bytes starting at byte `start` of `store`.
///
/// The function returns the entries along with the checksum of the array.
pub fn decode<S: BlockStore + ?Sized>(
    store: &S,
    start: u64,
    entry_size: usize,
    count: u32,
) -> Result<(Vec<GptPartition>, u32)> {
    let mut reader = EntryReader::new(store, start, entry_size, count)?;
    let entries = reader.by_ref().collect::<Result<Vec<_>>>()?;
    Ok((entries, reader.crc()))
}

/// Writes `entries` with a size of `entry_size` bytes each, starting at byte `start` of
/// `store`.
///
/// The function returns the checksum of the written array.
pub fn encode<'e, S, I>(store: &mut S, start: u64, entry_size: usize, entries: I) -> Result<u32>
where
    S: BlockStore + ?Sized,
    I: IntoIterator<Item = &'e GptPartition>,
{
    check_entry_size(entry_size)?;
    let mut record = vec![0; entry_size];
    let mut hasher = Hasher::new();
    let mut off = start;
    for entry in entries {
        entry.fill(&mut record)?;
        hasher.update(&record);
        store.write_all_at(&record, off, "GPT partition entry")?;
        off += entry_size as u64;
    }
    Ok(hasher.finalize())
}
