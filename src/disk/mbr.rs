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

//! The Master Boot Record, the legacy partition table stored in the first sector of a disk.

use crate::error::Error;
use crate::error::Result;
use std::cmp::min;
use std::fmt;

/// The size of the MBR in bytes.
pub const MBR_SIZE: usize = 512;
/// The size of a partition record in the MBR.
pub const MBR_PARTITION_SIZE: usize = 16;
/// The signature of the MBR partition table.
pub const MBR_SIGNATURE: u16 = 0xaa55;
/// The size of the bootstrap code area.
const BOOTSTRAP_SIZE: usize = 440;
/// The offset of the first partition record.
const PARTITIONS_OFF: usize = 446;

/// Partition type: FAT32 with LBA addressing.
pub const TYPE_FAT32_LBA: u8 = 0x0c;
/// Partition type: Linux.
pub const TYPE_LINUX: u8 = 0x83;
/// Partition type: protective entry of a GPT disk.
pub const TYPE_GPT_PROTECTIVE: u8 = 0xee;
/// Partition type: EFI system partition.
pub const TYPE_EFI: u8 = 0xef;

/// Returns the name of the given MBR partition type, if known.
pub fn type_name(part_type: u8) -> Option<&'static str> {
    let name = match part_type {
        0x00 => "Empty",
        0x01 => "FAT12",
        0x04 => "FAT16 <32M",
        0x05 => "Extended",
        0x06 => "FAT16",
        0x07 => "HPFS/NTFS/exFAT",
        0x0b => "W95 FAT32",
        TYPE_FAT32_LBA => "W95 FAT32 (LBA)",
        0x0e => "W95 FAT16 (LBA)",
        0x0f => "W95 Ext'd (LBA)",
        0x82 => "Linux swap / Solaris",
        TYPE_LINUX => "Linux",
        0x85 => "Linux extended",
        0x8e => "Linux LVM",
        0xa5 => "FreeBSD",
        0xa6 => "OpenBSD",
        0xa9 => "NetBSD",
        TYPE_GPT_PROTECTIVE => "GPT",
        TYPE_EFI => "EFI (FAT-12/16/32)",
        0xfd => "Linux raid auto",
        _ => return None,
    };
    Some(name)
}

/// A legacy Cylinder/Head/Sector address.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChsAddr {
    head: u8,
    sector: u8,
    cylinder: u8,
}

impl ChsAddr {
    /// The address telling that LBA addressing must be used instead.
    pub const INVALID: Self = Self {
        head: 0xff,
        sector: 0xff,
        cylinder: 0xff,
    };

    /// Creates an address from its raw bytes.
    pub const fn new(head: u8, sector: u8, cylinder: u8) -> Self {
        Self {
            head,
            sector,
            cylinder,
        }
    }

    /// Returns the head byte.
    pub fn head(&self) -> u8 {
        self.head
    }

    /// Returns the sector byte.
    pub fn sector(&self) -> u8 {
        self.sector
    }

    /// Returns the cylinder byte.
    pub fn cylinder(&self) -> u8 {
        self.cylinder
    }

    fn parse(data: &[u8]) -> Self {
        Self::new(data[0], data[1], data[2])
    }

    fn fill(&self, data: &mut [u8]) {
        data[0] = self.head;
        data[1] = self.sector;
        data[2] = self.cylinder;
    }
}

impl fmt::Display for ChsAddr {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}:{}:{}", self.head, self.sector, self.cylinder)
    }
}

/// A partition record of the MBR.
///
/// The zero value is an unused slot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MbrPartition {
    /// Partition attributes.
    pub attrs: u8,
    /// CHS address of partition start.
    pub chs_start: ChsAddr,
    /// The type of the partition.
    pub part_type: u8,
    /// CHS address of partition end.
    pub chs_end: ChsAddr,
    /// LBA address of partition start.
    pub lba_start: u32,
    /// The number of sectors in the partition.
    pub lba_size: u32,
}

impl MbrPartition {
    /// Creates a partition addressed by LBA only.
    pub fn new(part_type: u8, lba_start: u32, lba_size: u32) -> Self {
        Self {
            attrs: 0,
            chs_start: ChsAddr::INVALID,
            part_type,
            chs_end: ChsAddr::INVALID,
            lba_start,
            lba_size,
        }
    }

    /// Creates the protective partition of a GPT disk of `disk_blocks` blocks, covering
    /// everything after the MBR.
    pub fn protective(disk_blocks: u64) -> Self {
        let size = min(disk_blocks.saturating_sub(1), u32::MAX as u64);
        Self::new(TYPE_GPT_PROTECTIVE, 1, size as u32)
    }

    /// Tells whether the slot is unused.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Tells whether the partition is active.
    pub fn is_active(&self) -> bool {
        self.attrs & (1 << 7) != 0
    }

    /// Parses a partition record.
    ///
    /// `data` must be at least [`MBR_PARTITION_SIZE`] bytes long.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MBR_PARTITION_SIZE {
            return Err(Error::UnexpectedEof("MBR partition record"));
        }
        Ok(Self {
            attrs: data[0],
            chs_start: ChsAddr::parse(&data[1..4]),
            part_type: data[4],
            chs_end: ChsAddr::parse(&data[5..8]),
            lba_start: u32::from_le_bytes(data[8..12].try_into().unwrap()),
            lba_size: u32::from_le_bytes(data[12..16].try_into().unwrap()),
        })
    }

    /// Returns the serialized partition record.
    fn encode(&self) -> [u8; MBR_PARTITION_SIZE] {
        let mut data = [0; MBR_PARTITION_SIZE];
        data[0] = self.attrs;
        self.chs_start.fill(&mut data[1..4]);
        data[4] = self.part_type;
        self.chs_end.fill(&mut data[5..8]);
        data[8..12].copy_from_slice(&self.lba_start.to_le_bytes());
        data[12..16].copy_from_slice(&self.lba_size.to_le_bytes());
        data
    }

    /// Writes the partition record to `data`.
    pub fn fill(&self, data: &mut [u8]) -> Result<()> {
        if data.len() < MBR_PARTITION_SIZE {
            return Err(Error::InvalidUsage(format!(
                "MBR partition record needs {MBR_PARTITION_SIZE} bytes, buffer has {}",
                data.len()
            )));
        }
        data[..MBR_PARTITION_SIZE].copy_from_slice(&self.encode());
        Ok(())
    }
}

impl fmt::Display for MbrPartition {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(fmt, "empty");
        }
        write!(fmt, "type={:02x}", self.part_type)?;
        if let Some(name) = type_name(self.part_type) {
            write!(fmt, " ({name})")?;
        }
        write!(
            fmt,
            ", start={}, size={}, chs={}-{}",
            self.lba_start, self.lba_size, self.chs_start, self.chs_end
        )?;
        if self.is_active() {
            write!(fmt, ", bootable")?;
        }
        Ok(())
    }
}

/// A MBR partition table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mbr {
    /// The boot code.
    pub bootstrap: [u8; BOOTSTRAP_SIZE],
    /// The disk identifier.
    pub disk_id: u32,
    /// Usually zero.
    pub reserved: u16,
    /// The partition slots.
    pub partitions: [MbrPartition; 4],
    /// The partition table signature.
    pub signature: u16,
}

impl Mbr {
    /// Creates an empty table with the given disk identifier.
    pub fn new(disk_id: u32) -> Self {
        Self {
            bootstrap: [0; BOOTSTRAP_SIZE],
            disk_id,
            reserved: 0,
            partitions: [MbrPartition::default(); 4],
            signature: MBR_SIGNATURE,
        }
    }

    /// Parses a MBR without checking its signature.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MBR_SIZE {
            return Err(Error::UnexpectedEof("MBR"));
        }
        let mut partitions = [MbrPartition::default(); 4];
        for (i, p) in partitions.iter_mut().enumerate() {
            let off = PARTITIONS_OFF + i * MBR_PARTITION_SIZE;
            *p = MbrPartition::parse(&data[off..(off + MBR_PARTITION_SIZE)])?;
        }
        Ok(Self {
            bootstrap: data[..BOOTSTRAP_SIZE].try_into().unwrap(),
            disk_id: u32::from_le_bytes(data[440..444].try_into().unwrap()),
            reserved: u16::from_le_bytes(data[444..446].try_into().unwrap()),
            partitions,
            signature: u16::from_le_bytes(data[510..512].try_into().unwrap()),
        })
    }

    /// Parses a MBR, failing if its signature is not [`MBR_SIGNATURE`].
    pub fn parse_strict(data: &[u8]) -> Result<Self> {
        let mbr = Self::parse(data)?;
        if mbr.signature != MBR_SIGNATURE {
            return Err(Error::NotPresent("MBR"));
        }
        Ok(mbr)
    }

    /// Writes the MBR to `data`, which must be at least [`MBR_SIZE`] bytes long.
    pub fn fill(&self, data: &mut [u8]) -> Result<()> {
        if data.len() < MBR_SIZE {
            return Err(Error::InvalidUsage(format!(
                "MBR needs {MBR_SIZE} bytes, buffer has {}",
                data.len()
            )));
        }
        data[..MBR_SIZE].copy_from_slice(&self.to_bytes());
        Ok(())
    }

    /// Returns the serialized MBR.
    pub fn to_bytes(&self) -> [u8; MBR_SIZE] {
        let mut data = [0; MBR_SIZE];
        data[..BOOTSTRAP_SIZE].copy_from_slice(&self.bootstrap);
        data[440..444].copy_from_slice(&self.disk_id.to_le_bytes());
        data[444..446].copy_from_slice(&self.reserved.to_le_bytes());
        for (i, p) in self.partitions.iter().enumerate() {
            let off = PARTITIONS_OFF + i * MBR_PARTITION_SIZE;
            data[off..(off + MBR_PARTITION_SIZE)].copy_from_slice(&p.encode());
        }
        data[510..512].copy_from_slice(&self.signature.to_le_bytes());
        data
    }

    /// Returns the index of the first unused partition slot.
    pub fn first_free_slot(&self) -> Option<usize> {
        self.partitions.iter().position(MbrPartition::is_empty)
    }
}

impl fmt::Display for Mbr {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            "disk identifier: {:#010x}, signature: {:#06x}",
            self.disk_id, self.signature
        )?;
        for (i, p) in self.partitions.iter().enumerate() {
            writeln!(fmt, "  slot {}: {p}", i + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Boot code of a Raspberry Pi OS image.
    const RPI_BOOTSTRAP: [u8; 75] = [
        250, 184, 0, 16, 142, 208, 188, 0, 176, 184, 0, 0, 142, 216, 142, 192, 251, 190, 0, 124,
        191, 0, 6, 185, 0, 2, 243, 164, 234, 33, 6, 0, 0, 190, 190, 7, 56, 4, 117, 11, 131, 198,
        16, 129, 254, 254, 7, 117, 243, 235, 22, 180, 2, 176, 1, 187, 0, 124, 178, 128, 138, 116,
        1, 139, 76, 2, 205, 19, 234, 0, 124, 0, 0, 235, 254,
    ];
    /// Disk identifier, reserved field and the two partitions of the same image.
    const RPI_TABLE: [u8; 38] = [
        154, 72, 164, 26, 0, 0, 0, 0, 1, 64, 12, 3, 224, 255, 0, 32, 0, 0, 0, 0, 16, 0, 0, 3, 224,
        255, 131, 3, 224, 255, 0, 32, 16, 0, 0, 160, 145, 0,
    ];

    fn rpi_raw() -> [u8; MBR_SIZE] {
        let mut raw = [0; MBR_SIZE];
        raw[..RPI_BOOTSTRAP.len()].copy_from_slice(&RPI_BOOTSTRAP);
        raw[440..478].copy_from_slice(&RPI_TABLE);
        raw[510] = 0x55;
        raw[511] = 0xaa;
        raw
    }

    #[test]
    fn mbr_parse_rpi() {
        let mbr = Mbr::parse(&rpi_raw()).unwrap();
        assert_eq!(&mbr.bootstrap[..RPI_BOOTSTRAP.len()], &RPI_BOOTSTRAP);
        assert!(mbr.bootstrap[RPI_BOOTSTRAP.len()..].iter().all(|b| *b == 0));
        assert_eq!(mbr.disk_id, 446974106);
        assert_eq!(mbr.reserved, 0);
        assert_eq!(
            mbr.partitions[0],
            MbrPartition {
                attrs: 0,
                chs_start: ChsAddr::new(0, 1, 64),
                part_type: TYPE_FAT32_LBA,
                chs_end: ChsAddr::new(3, 224, 255),
                lba_start: 8192,
                lba_size: 1048576,
            }
        );
        assert_eq!(
            mbr.partitions[1],
            MbrPartition {
                attrs: 0,
                chs_start: ChsAddr::new(3, 224, 255),
                part_type: TYPE_LINUX,
                chs_end: ChsAddr::new(3, 224, 255),
                lba_start: 1056768,
                lba_size: 9543680,
            }
        );
        assert!(mbr.partitions[2].is_empty());
        assert!(mbr.partitions[3].is_empty());
        assert_eq!(mbr.signature, MBR_SIGNATURE);
        assert_eq!(mbr.first_free_slot(), Some(2));
    }

    #[test]
    fn mbr_reencode_rpi() {
        let raw = rpi_raw();
        let mbr = Mbr::parse(&raw).unwrap();
        assert_eq!(mbr.to_bytes(), raw);
    }

    #[test]
    fn mbr_roundtrip() {
        let mut mbr = Mbr::new(0xdeadbeef);
        mbr.bootstrap[0] = 0xeb;
        mbr.bootstrap[439] = 0x90;
        mbr.partitions[0] = MbrPartition::protective(1 << 20);
        mbr.partitions[3] = MbrPartition::new(TYPE_LINUX, 2048, 4096);
        assert_eq!(Mbr::parse(&mbr.to_bytes()).unwrap(), mbr);
    }

    #[test]
    fn mbr_truncated() {
        let err = Mbr::parse(&[0; 511]).unwrap_err();
        assert!(err.is_truncated());
        let err = Mbr::parse(&[]).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn mbr_signature() {
        let mut raw = rpi_raw();
        raw[511] = 0;
        // Permissive parsing keeps the bad signature
        assert_eq!(Mbr::parse(&raw).unwrap().signature, 0x0055);
        assert!(matches!(
            Mbr::parse_strict(&raw),
            Err(Error::NotPresent("MBR"))
        ));
        assert!(Mbr::parse_strict(&rpi_raw()).is_ok());
    }

    #[test]
    fn mbr_fill_small_buffer() {
        let mbr = Mbr::new(1);
        let mut buf = [0; 100];
        assert!(mbr.fill(&mut buf).unwrap_err().is_invalid_usage());
        let mut buf = [0; 8];
        assert!(MbrPartition::default().fill(&mut buf).unwrap_err().is_invalid_usage());
    }

    #[test]
    fn mbr_fill_matches_bytes() {
        let mbr = Mbr::parse(&rpi_raw()).unwrap();
        let mut buf = [0xff; 600];
        mbr.fill(&mut buf).unwrap();
        assert_eq!(&buf[..MBR_SIZE], &mbr.to_bytes());
        assert!(buf[MBR_SIZE..].iter().all(|b| *b == 0xff));

        let mut record = [0xff; 20];
        mbr.partitions[0].fill(&mut record).unwrap();
        assert_eq!(&record[..MBR_PARTITION_SIZE], &rpi_raw()[446..462]);
        assert_eq!(&record[MBR_PARTITION_SIZE..], &[0xff; 4]);
    }

    #[test]
    fn partition_empty() {
        assert!(MbrPartition::default().is_empty());
        assert!(MbrPartition::parse(&[0; 16]).unwrap().is_empty());
        assert!(!MbrPartition::new(TYPE_LINUX, 0, 0).is_empty());
        assert_eq!(format!("{}", MbrPartition::default()), "empty");
    }

    #[test]
    fn partition_protective() {
        let p = MbrPartition::protective(8192);
        assert_eq!(p.part_type, TYPE_GPT_PROTECTIVE);
        assert_eq!(p.lba_start, 1);
        assert_eq!(p.lba_size, 8191);
        assert_eq!(p.chs_start, ChsAddr::INVALID);
        assert_eq!(p.chs_end, ChsAddr::INVALID);
        let p = MbrPartition::protective(u64::MAX);
        assert_eq!(p.lba_size, u32::MAX);
    }

    #[test]
    fn partition_layout() {
        let p = MbrPartition {
            attrs: 0x80,
            chs_start: ChsAddr::new(1, 2, 3),
            part_type: TYPE_EFI,
            chs_end: ChsAddr::new(4, 5, 6),
            lba_start: 0x04030201,
            lba_size: 0x08070605,
        };
        let mut buf = [0; MBR_PARTITION_SIZE];
        p.fill(&mut buf).unwrap();
        assert_eq!(
            buf,
            [0x80, 1, 2, 3, 0xef, 4, 5, 6, 1, 2, 3, 4, 5, 6, 7, 8]
        );
        assert!(p.is_active());
    }
}
