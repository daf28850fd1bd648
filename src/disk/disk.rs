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

//! Reading and writing partition tables at their place on a disk.

use crate::BLOCK_SIZE;
use crate::error::Error;
use crate::error::Result;
use crate::gpt::GPT_HEADER_SIZE;
use crate::gpt::GptHeader;
use crate::gpt::entry;
use crate::gpt::entry::GptPartition;
use crate::mbr::MBR_SIZE;
use crate::mbr::Mbr;
use crate::store::BlockStore;
use log::debug;
use log::warn;
use std::fmt;

/// The copy of the GPT a table has been read from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableCopy {
    /// The header at LBA 1.
    Primary,
    /// The header at the end of the disk.
    Secondary,
}

impl fmt::Display for TableCopy {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(fmt, "primary"),
            Self::Secondary => write!(fmt, "secondary"),
        }
    }
}

/// A GPT whose checksums have been verified.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GptTable {
    /// The header.
    pub header: GptHeader,
    /// All the entries of the array, including unused ones.
    pub partitions: Vec<GptPartition>,
    /// The copy the table comes from.
    pub source: TableCopy,
}

impl GptTable {
    /// Returns an iterator over used entries, along with their index in the array.
    pub fn used(&self) -> impl Iterator<Item = (usize, &GptPartition)> {
        self.partitions
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_empty())
    }
}

/// A disk, on which partition tables are stored.
#[derive(Debug)]
pub struct Disk<S: BlockStore> {
    store: S,
}

impl<S: BlockStore> Disk<S> {
    /// Creates a disk on top of the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the underlying store.
    pub fn into_inner(self) -> S {
        self.store
    }

    /// Returns the number of blocks on the disk.
    pub fn block_count(&self) -> u64 {
        self.store.len() / BLOCK_SIZE
    }

    /// Reads the MBR, without checking its signature.
    pub fn read_mbr(&self) -> Result<Mbr> {
        let mut data = [0; MBR_SIZE];
        self.store.read_exact_at(&mut data, 0, "MBR read too short")?;
        Mbr::parse(&data)
    }

    /// Writes the MBR.
    pub fn write_mbr(&mut self, mbr: &Mbr) -> Result<()> {
        self.store
            .write_all_at(&mbr.to_bytes(), 0, "MBR write too short")
    }

    /// Reads the GPT header located at `lba`.
    pub fn read_gpt(&self, lba: u64) -> Result<GptHeader> {
        let mut data = [0; GPT_HEADER_SIZE];
        self.store
            .read_exact_at(&mut data, lba * BLOCK_SIZE, "GPT read too short")?;
        GptHeader::parse(&data)
    }

    /// Writes the GPT header `hdr` at `lba`.
    pub fn write_gpt(&mut self, lba: u64, hdr: &GptHeader) -> Result<()> {
        let mut data = [0; GPT_HEADER_SIZE];
        hdr.fill(&mut data)?;
        self.store
            .write_all_at(&data, lba * BLOCK_SIZE, "GPT write too short")
    }

    /// Reads the partition entries array described by `hdr`.
    ///
    /// The function returns the entries along with the checksum of the array.
    pub fn read_gpt_partitions(&self, hdr: &GptHeader) -> Result<(Vec<GptPartition>, u32)> {
        let start = hdr.partitions_lba.saturating_mul(BLOCK_SIZE);
        if start.saturating_add(hdr.array_len_bytes()) > self.store.len() {
            return Err(Error::UnexpectedEof("GPT partition entries past end of disk"));
        }
        entry::decode(
            &self.store,
            start,
            hdr.entry_size as usize,
            hdr.partition_count,
        )
    }

    /// Writes `entries` as an array starting at `lba`, and returns its checksum.
    pub fn write_gpt_partitions<'e, I>(
        &mut self,
        lba: u64,
        entry_size: u32,
        entries: I,
    ) -> Result<u32>
    where
        I: IntoIterator<Item = &'e GptPartition>,
    {
        entry::encode(
            &mut self.store,
            lba * BLOCK_SIZE,
            entry_size as usize,
            entries,
        )
    }

    /// Reads the copy of the GPT at `lba` and verifies both of its checksums.
    fn read_verified(&self, lba: u64) -> Result<(GptHeader, Vec<GptPartition>)> {
        let hdr = self.read_gpt(lba)?;
        if !hdr.is_valid() {
            return Err(Error::ChecksumMismatch {
                what: "GPT header",
                stored: hdr.checksum,
                computed: hdr.checksum(),
            });
        }
        let (partitions, crc) = self.read_gpt_partitions(&hdr)?;
        if crc != hdr.partitions_crc {
            return Err(Error::ChecksumMismatch {
                what: "GPT partition entries",
                stored: hdr.partitions_crc,
                computed: crc,
            });
        }
        Ok((hdr, partitions))
    }

    /// Reads the GPT of the disk.
    ///
    /// If the primary copy is invalid, the secondary copy is used. If both are invalid, the
    /// function returns the error of the primary copy.
    pub fn read_table(&self) -> Result<GptTable> {
        let primary_err = match self.read_verified(1) {
            Ok((header, partitions)) => {
                return Ok(GptTable {
                    header,
                    partitions,
                    source: TableCopy::Primary,
                });
            }
            Err(e) => e,
        };
        let blocks = self.block_count();
        if blocks < 2 {
            return Err(primary_err);
        }
        let last = blocks - 1;
        // The alternate LBA of a corrupted header may itself be corrupted, so the last block
        // is tried too
        let alternate_lba = self
            .read_gpt(1)
            .ok()
            .map(|hdr| hdr.alternate_lba)
            .filter(|lba| *lba > 1 && *lba < last);
        for lba in alternate_lba.into_iter().chain([last]) {
            warn!("primary GPT is invalid ({primary_err}), trying LBA {lba}");
            match self.read_verified(lba) {
                Ok((header, partitions)) => {
                    return Ok(GptTable {
                        header,
                        partitions,
                        source: TableCopy::Secondary,
                    });
                }
                Err(e) => debug!("GPT at LBA {lba} is invalid: {e}"),
            }
        }
        Err(primary_err)
    }
}
