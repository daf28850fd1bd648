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

//! The GUID Partition Table header.
//!
//! A GPT disk holds two copies of the table: the primary one right after the MBR, and the
//! secondary one at the end of the disk. Each copy is made of a header and a partition
//! entries array, both protected by a CRC32 checksum.

pub mod entry;

use crate::BLOCK_SIZE;
use crate::error::Error;
use crate::error::Result;
use crate::guid;
use std::fmt;
use uuid::Uuid;

/// The size of the GPT header in bytes.
pub const GPT_HEADER_SIZE: usize = 92;
/// The size of a partition entry in bytes.
pub const GPT_ENTRY_SIZE: usize = 128;
/// The only supported revision (1.0).
pub const GPT_REVISION: u32 = 0x00010000;
/// The signature in the GPT header (`EFI PART`).
pub const GPT_SIGNATURE: u64 = 0x5452415020494645;
/// The number of blocks reserved for each partition entries array.
pub const PARTITION_ARRAY_BLOCKS: u64 = 32;
/// The smallest disk, in blocks, able to hold both copies and one usable block.
pub const MIN_DISK_BLOCKS: u64 = 2 * (2 + PARTITION_ARRAY_BLOCKS);

/// Offset of the checksum field in the header.
const CHECKSUM_OFF: usize = 16;

/// A GPT header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GptHeader {
    /// The header's signature.
    pub signature: u64,
    /// The header's revision.
    pub revision: u32,
    /// The size of the header in bytes.
    pub header_size: u32,
    /// The header's checksum.
    pub checksum: u32,
    /// Reserved field.
    pub reserved: u32,
    /// The LBA of the block containing this header.
    pub this_lba: u64,
    /// The LBA of the block containing the alternate header.
    pub alternate_lba: u64,
    /// The first block usable by partitions.
    pub first_usable_lba: u64,
    /// The last block usable by partitions (inclusive).
    pub last_usable_lba: u64,
    /// The disk's GUID.
    pub disk_guid: Uuid,
    /// The LBA of the beginning of the partition entries array.
    pub partitions_lba: u64,
    /// The number of entries in the array.
    pub partition_count: u32,
    /// The size in bytes of each entry in the array.
    pub entry_size: u32,
    /// Checksum of the entries array.
    pub partitions_crc: u32,
}

impl GptHeader {
    /// Computes the primary and secondary headers of a disk of `disk_blocks` blocks.
    ///
    /// Checksums are left to zero since they depend on the partition entries.
    pub fn new_pair(disk_blocks: u64, disk_guid: Uuid) -> Result<(Self, Self)> {
        if disk_blocks < MIN_DISK_BLOCKS {
            return Err(Error::InvalidSize(disk_blocks * BLOCK_SIZE));
        }
        let partition_count = (BLOCK_SIZE / GPT_ENTRY_SIZE as u64) * PARTITION_ARRAY_BLOCKS;
        let primary = Self {
            signature: GPT_SIGNATURE,
            revision: GPT_REVISION,
            header_size: GPT_HEADER_SIZE as _,
            checksum: 0,
            reserved: 0,
            this_lba: 1,
            alternate_lba: disk_blocks - 1,
            first_usable_lba: 2 + PARTITION_ARRAY_BLOCKS,
            last_usable_lba: disk_blocks - 2 - PARTITION_ARRAY_BLOCKS,
            disk_guid,
            partitions_lba: 2,
            partition_count: partition_count as _,
            entry_size: GPT_ENTRY_SIZE as _,
            partitions_crc: 0,
        };
        let secondary = Self {
            this_lba: primary.alternate_lba,
            alternate_lba: primary.this_lba,
            partitions_lba: disk_blocks - 1 - PARTITION_ARRAY_BLOCKS,
            ..primary
        };
        Ok((primary, secondary))
    }

    /// Parses a header.
    ///
    /// The checksums are not verified. See [`Self::is_valid`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < GPT_HEADER_SIZE {
            return Err(Error::UnexpectedEof("GPT header"));
        }
        let u32_at = |off: usize| u32::from_le_bytes(data[off..(off + 4)].try_into().unwrap());
        let u64_at = |off: usize| u64::from_le_bytes(data[off..(off + 8)].try_into().unwrap());

        let signature = u64_at(0);
        if signature != GPT_SIGNATURE {
            return Err(Error::NotPresent("GPT"));
        }
        let revision = u32_at(8);
        if revision != GPT_REVISION {
            return Err(Error::Unsupported(format!("revision {revision:#010x}")));
        }
        let header_size = u32_at(12);
        if header_size as usize != GPT_HEADER_SIZE {
            return Err(Error::Unsupported(format!("header size {header_size}")));
        }
        Ok(Self {
            signature,
            revision,
            header_size,
            checksum: u32_at(16),
            reserved: u32_at(20),
            this_lba: u64_at(24),
            alternate_lba: u64_at(32),
            first_usable_lba: u64_at(40),
            last_usable_lba: u64_at(48),
            disk_guid: guid::decode(data[56..72].try_into().unwrap()),
            partitions_lba: u64_at(72),
            partition_count: u32_at(80),
            entry_size: u32_at(84),
            partitions_crc: u32_at(88),
        })
    }

    /// Returns the serialized header.
    fn encode(&self) -> [u8; GPT_HEADER_SIZE] {
        let mut data = [0; GPT_HEADER_SIZE];
        data[0..8].copy_from_slice(&self.signature.to_le_bytes());
        data[8..12].copy_from_slice(&self.revision.to_le_bytes());
        data[12..16].copy_from_slice(&self.header_size.to_le_bytes());
        data[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        data[20..24].copy_from_slice(&self.reserved.to_le_bytes());
        data[24..32].copy_from_slice(&self.this_lba.to_le_bytes());
        data[32..40].copy_from_slice(&self.alternate_lba.to_le_bytes());
        data[40..48].copy_from_slice(&self.first_usable_lba.to_le_bytes());
        data[48..56].copy_from_slice(&self.last_usable_lba.to_le_bytes());
        data[56..72].copy_from_slice(&guid::encode(&self.disk_guid));
        data[72..80].copy_from_slice(&self.partitions_lba.to_le_bytes());
        data[80..84].copy_from_slice(&self.partition_count.to_le_bytes());
        data[84..88].copy_from_slice(&self.entry_size.to_le_bytes());
        data[88..92].copy_from_slice(&self.partitions_crc.to_le_bytes());
        data
    }

    /// Writes the header to `data`.
    ///
    /// `data` must hold at least [`GPT_HEADER_SIZE`] bytes, and at least the header's
    /// declared size.
    pub fn fill(&self, data: &mut [u8]) -> Result<()> {
        let needed = GPT_HEADER_SIZE.max(self.header_size as usize);
        if data.len() < needed {
            return Err(Error::InvalidUsage(format!(
                "GPT header needs {needed} bytes, buffer has {}",
                data.len()
            )));
        }
        data[..GPT_HEADER_SIZE].copy_from_slice(&self.encode());
        Ok(())
    }

    /// Computes the checksum of the header, as if its checksum field was zero.
    ///
    /// Must be called after [`Self::partitions_crc`] is set.
    pub fn checksum(&self) -> u32 {
        let mut data = self.encode();
        data[CHECKSUM_OFF..(CHECKSUM_OFF + 4)].fill(0);
        crc32fast::hash(&data)
    }

    /// Sets the checksum field to the header's checksum.
    pub fn update_checksum(&mut self) {
        self.checksum = self.checksum();
    }

    /// Tells whether the stored checksum matches the header's content.
    pub fn is_valid(&self) -> bool {
        self.checksum == self.checksum()
    }

    /// Returns the size in bytes of the partition entries array.
    pub fn array_len_bytes(&self) -> u64 {
        self.partition_count as u64 * self.entry_size as u64
    }
}

impl fmt::Display for GptHeader {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "lba={}, alternate={}, usable={}-{}, guid={}, entries={}x{}@{}, crc={:#010x}, \
             checksum={:#010x}",
            self.this_lba,
            self.alternate_lba,
            self.first_usable_lba,
            self.last_usable_lba,
            self.disk_guid,
            self.partition_count,
            self.entry_size,
            self.partitions_lba,
            self.partitions_crc,
            self.checksum
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GptHeader {
        let (mut primary, _) = GptHeader::new_pair(8192, guid::EFI_SYSTEM).unwrap();
        primary.partitions_crc = 0x12345678;
        primary.update_checksum();
        primary
    }

    #[test]
    fn header_layout() {
        let hdr = sample();
        let data = hdr.encode();
        assert_eq!(&data[0..8], b"EFI PART");
        assert_eq!(&data[8..12], &[0, 0, 1, 0]);
        assert_eq!(&data[12..16], &[92, 0, 0, 0]);
        assert_eq!(&data[24..32], &1u64.to_le_bytes());
        assert_eq!(&data[32..40], &8191u64.to_le_bytes());
        assert_eq!(&data[40..48], &34u64.to_le_bytes());
        assert_eq!(&data[48..56], &8158u64.to_le_bytes());
        assert_eq!(
            &data[56..72],
            &[
                0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11, 0xba, 0x4b, 0x00, 0xa0, 0xc9, 0x3e,
                0xc9, 0x3b
            ]
        );
        assert_eq!(&data[72..80], &2u64.to_le_bytes());
        assert_eq!(&data[80..84], &128u32.to_le_bytes());
        assert_eq!(&data[84..88], &128u32.to_le_bytes());
        assert_eq!(&data[88..92], &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn header_roundtrip() {
        let hdr = sample();
        let mut buf = [0xff; 512];
        hdr.fill(&mut buf).unwrap();
        let parsed = GptHeader::parse(&buf).unwrap();
        assert_eq!(parsed, hdr);
        assert!(parsed.is_valid());
    }

    #[test]
    fn header_pair() {
        let (primary, secondary) = GptHeader::new_pair(1000, Uuid::nil()).unwrap();
        assert_eq!(primary.this_lba, 1);
        assert_eq!(primary.alternate_lba, 999);
        assert_eq!(primary.partitions_lba, 2);
        assert_eq!(primary.first_usable_lba, 34);
        assert_eq!(primary.last_usable_lba, 966);
        assert_eq!(primary.partition_count, 128);
        assert_eq!(primary.array_len_bytes(), 32 * 512);
        assert_eq!(secondary.this_lba, 999);
        assert_eq!(secondary.alternate_lba, 1);
        assert_eq!(secondary.partitions_lba, 967);
        // The secondary array ends right before the secondary header
        assert_eq!(
            secondary.partitions_lba * BLOCK_SIZE + secondary.array_len_bytes(),
            secondary.this_lba * BLOCK_SIZE
        );
        assert_eq!(secondary.first_usable_lba, primary.first_usable_lba);
        assert_eq!(secondary.last_usable_lba, primary.last_usable_lba);
        assert_eq!(secondary.disk_guid, primary.disk_guid);
    }

    #[test]
    fn header_pair_too_small() {
        assert!(matches!(
            GptHeader::new_pair(MIN_DISK_BLOCKS - 1, Uuid::nil()),
            Err(Error::InvalidSize(_))
        ));
        let (primary, _) = GptHeader::new_pair(MIN_DISK_BLOCKS, Uuid::nil()).unwrap();
        assert_eq!(primary.first_usable_lba, primary.last_usable_lba);
    }

    #[test]
    fn checksum_ignores_stale_field() {
        let mut hdr = sample();
        let expected = hdr.checksum();
        hdr.checksum = 0xdeadbeef;
        assert_eq!(hdr.checksum(), expected);
        assert!(!hdr.is_valid());
        hdr.update_checksum();
        assert_eq!(hdr.checksum, expected);

        // Computing over serialized bytes carrying the stale checksum gives the same value
        let mut buf = [0; GPT_HEADER_SIZE];
        hdr.checksum = 0xdeadbeef;
        hdr.fill(&mut buf).unwrap();
        let reparsed = GptHeader::parse(&buf).unwrap();
        assert_eq!(reparsed.checksum(), expected);
    }

    #[test]
    fn checksum_covers_fields() {
        let hdr = sample();
        let mut other = hdr;
        other.partitions_crc ^= 1;
        assert_ne!(other.checksum(), hdr.checksum());
    }

    #[test]
    fn parse_truncated() {
        let mut buf = [0; GPT_HEADER_SIZE];
        sample().fill(&mut buf).unwrap();
        assert!(GptHeader::parse(&buf[..91]).unwrap_err().is_truncated());
        assert!(GptHeader::parse(&[]).unwrap_err().is_truncated());
    }

    #[test]
    fn parse_not_present() {
        let mut buf = [0; GPT_HEADER_SIZE];
        sample().fill(&mut buf).unwrap();
        buf[0] = b'X';
        assert!(matches!(
            GptHeader::parse(&buf),
            Err(Error::NotPresent("GPT"))
        ));
        assert!(matches!(
            GptHeader::parse(&[0; GPT_HEADER_SIZE]),
            Err(Error::NotPresent(_))
        ));
    }

    #[test]
    fn parse_unsupported() {
        let mut buf = [0; GPT_HEADER_SIZE];
        sample().fill(&mut buf).unwrap();
        buf[8..12].copy_from_slice(&0x00020000u32.to_le_bytes());
        assert!(matches!(GptHeader::parse(&buf), Err(Error::Unsupported(_))));

        sample().fill(&mut buf).unwrap();
        buf[12..16].copy_from_slice(&96u32.to_le_bytes());
        assert!(matches!(GptHeader::parse(&buf), Err(Error::Unsupported(_))));
    }

    #[test]
    fn fill_small_buffer() {
        let mut hdr = sample();
        let mut buf = [0; 91];
        assert!(hdr.fill(&mut buf).unwrap_err().is_invalid_usage());
        hdr.header_size = 100;
        let mut buf = [0; 96];
        assert!(hdr.fill(&mut buf).unwrap_err().is_invalid_usage());
    }
}
