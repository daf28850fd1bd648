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

//! Creation of partitioned disk images.
//!
//! A [`Builder`] sizes the device, accumulates partitions, then writes every table at once in
//! [`Builder::finalize`]. Tables are written in the following order:
//! - the MBR
//! - the primary partition entries, then the primary header
//! - the secondary partition entries, then the secondary header
//!
//! A header is always written after the entries it covers, and the primary copy before the
//! secondary one. If writing is interrupted, the device is left partially written and must be
//! discarded.

use crate::BLOCK_SIZE;
use crate::disk::Disk;
use crate::error::Error;
use crate::error::Result;
use crate::gpt::GptHeader;
use crate::gpt::MIN_DISK_BLOCKS;
use crate::gpt::entry::GptPartition;
use crate::guid::IdSource;
use crate::mbr::Mbr;
use crate::mbr::MbrPartition;
use crate::store::BlockStore;
use crate::store::FileStore;
use log::debug;
use log::warn;
use std::path::Path;

/// Checks that a device of `size` bytes can be divided in blocks, and holds both copies of
/// the GPT.
fn check_size(size: u64) -> Result<()> {
    if size % BLOCK_SIZE != 0 || size / BLOCK_SIZE < MIN_DISK_BLOCKS {
        return Err(Error::InvalidSize(size));
    }
    Ok(())
}

/// Builder of a GPT disk image.
pub struct Builder<S: BlockStore> {
    /// The disk being built.
    disk: Disk<S>,
    /// The MBR to be written.
    mbr: Mbr,
    /// The primary GPT header.
    primary: GptHeader,
    /// The secondary GPT header.
    secondary: GptHeader,
    /// The partition entries, including unused slots.
    partitions: Vec<GptPartition>,
    /// The number of GPT partitions added so far.
    partitions_count: usize,
    /// The number of legacy partitions added so far.
    legacy_count: usize,
}

impl Builder<FileStore> {
    /// Creates the image file at `path`, with a size of `size` bytes.
    ///
    /// `size` must be a multiple of the block size. If it is not, or if it is too small, the
    /// file is not created.
    pub fn create<I: IdSource + ?Sized>(path: &Path, size: u64, ids: &mut I) -> Result<Self> {
        check_size(size)?;
        let store = FileStore::create(path, size)?;
        Self::new(store, ids)
    }
}

impl<S: BlockStore> Builder<S> {
    /// Creates a builder laying out a disk over the whole of `store`.
    ///
    /// Identifiers for the disk are taken from `ids`.
    pub fn new<I: IdSource + ?Sized>(store: S, ids: &mut I) -> Result<Self> {
        let size = store.len();
        check_size(size)?;
        let blocks = size / BLOCK_SIZE;
        let mbr = Mbr::new(ids.disk_id());
        let (primary, secondary) = GptHeader::new_pair(blocks, ids.guid())?;
        debug!(
            "disk of {blocks} blocks, usable blocks {}-{}, {} partition slots",
            primary.first_usable_lba, primary.last_usable_lba, primary.partition_count
        );
        debug!(
            "primary GPT at LBA {} (entries at {}), secondary GPT at LBA {} (entries at {})",
            primary.this_lba, primary.partitions_lba, secondary.this_lba, secondary.partitions_lba
        );
        let partitions = vec![GptPartition::default(); primary.partition_count as usize];
        Ok(Self {
            disk: Disk::new(store),
            mbr,
            primary,
            secondary,
            partitions,
            partitions_count: 0,
            legacy_count: 0,
        })
    }

    /// Returns the number of blocks on the disk.
    pub fn block_count(&self) -> u64 {
        self.disk.block_count()
    }

    /// Returns the primary header, whose checksums are not computed yet.
    pub fn primary(&self) -> &GptHeader {
        &self.primary
    }

    /// Returns the secondary header, whose checksums are not computed yet.
    pub fn secondary(&self) -> &GptHeader {
        &self.secondary
    }

    /// Returns the MBR to be written.
    pub fn mbr(&self) -> &Mbr {
        &self.mbr
    }

    /// Returns the number of GPT partitions that can still be added.
    pub fn remaining(&self) -> usize {
        self.partitions.len() - self.partitions_count
    }

    /// Returns the number of legacy partitions that can still be added.
    pub fn remaining_legacy(&self) -> usize {
        self.mbr.partitions.len() - self.legacy_count
    }

    /// Adds a GPT partition in the next free slot and returns the index of the slot.
    ///
    /// The function fails if every slot is taken, or if the name of the partition does not fit
    /// in an entry.
    pub fn add(&mut self, partition: GptPartition) -> Result<usize> {
        let slot = self.partitions_count;
        if slot >= self.partitions.len() {
            return Err(Error::InvalidUsage(format!(
                "only {} GPT partitions allowed",
                self.partitions.len()
            )));
        }
        partition.check_name(self.primary.entry_size as usize)?;
        if partition.start_lba < self.primary.first_usable_lba
            || partition.end_lba > self.primary.last_usable_lba
            || partition.start_lba > partition.end_lba
        {
            warn!(
                "partition {} ({}-{}) is outside of the usable blocks ({}-{})",
                slot + 1,
                partition.start_lba,
                partition.end_lba,
                self.primary.first_usable_lba,
                self.primary.last_usable_lba
            );
        }
        debug!("GPT slot {slot}: {partition}");
        self.partitions[slot] = partition;
        self.partitions_count += 1;
        Ok(slot)
    }

    /// Adds a partition in the next free slot of the MBR and returns the index of the slot.
    pub fn add_legacy(&mut self, partition: MbrPartition) -> Result<usize> {
        let slot = self.legacy_count;
        let Some(dst) = self.mbr.partitions.get_mut(slot) else {
            return Err(Error::InvalidUsage("only 4 MBR partitions allowed".to_owned()));
        };
        debug!("MBR slot {slot}: {partition}");
        *dst = partition;
        self.legacy_count += 1;
        Ok(slot)
    }

    /// Writes every table to the disk, and returns the underlying store.
    ///
    /// On failure, the disk is left partially written.
    pub fn finalize(mut self) -> Result<S> {
        debug!("writing MBR");
        self.disk.write_mbr(&self.mbr)?;

        for hdr in [&mut self.primary, &mut self.secondary] {
            debug!("writing GPT entries at LBA {}", hdr.partitions_lba);
            hdr.partitions_crc =
                self.disk
                    .write_gpt_partitions(hdr.partitions_lba, hdr.entry_size, &self.partitions)?;
            hdr.update_checksum();
            debug!(
                "writing GPT header at LBA {} (entries crc {:#010x}, checksum {:#010x})",
                hdr.this_lba, hdr.partitions_crc, hdr.checksum
            );
            self.disk.write_gpt(hdr.this_lba, hdr)?;
        }

        Ok(self.disk.into_inner())
    }
}
