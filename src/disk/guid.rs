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

//! Globally Unique IDentifiers as stored in GPT partition tables.
//!
//! GPT stores the first three fields of a GUID (32, 16 and 16 bits) in little-endian, and the
//! remaining 8 bytes as is. [`Uuid`] holds the canonical (big-endian) form.

use rand_core::OsRng;
use rand_core::RngCore;
use uuid::Uuid;
use uuid::uuid;

/// Converts a GUID from its on-disk form to its canonical form.
pub fn decode(bytes: &[u8; 16]) -> Uuid {
    let mut guid = *bytes;
    guid[0..4].reverse();
    guid[4..6].reverse();
    guid[6..8].reverse();
    Uuid::from_bytes(guid)
}

/// Converts a GUID from its canonical form to its on-disk form.
pub fn encode(guid: &Uuid) -> [u8; 16] {
    // The transformation is its own inverse
    let mut bytes = *guid.as_bytes();
    bytes[0..4].reverse();
    bytes[4..6].reverse();
    bytes[6..8].reverse();
    bytes
}

/// A provider of identifiers for new disks and partitions.
pub trait IdSource {
    /// Returns a new MBR disk identifier.
    fn disk_id(&mut self) -> u32;

    /// Returns a new GUID.
    fn guid(&mut self) -> Uuid;
}

/// Identifiers drawn from the operating system's random generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn disk_id(&mut self) -> u32 {
        OsRng.next_u32()
    }

    fn guid(&mut self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Deterministic identifiers, counting up from a seed.
///
/// Useful to produce reproducible images.
#[derive(Clone, Debug)]
pub struct SequentialIds(u128);

impl SequentialIds {
    /// Creates a source whose first identifier is `seed`.
    pub fn new(seed: u128) -> Self {
        Self(seed)
    }

    fn next(&mut self) -> u128 {
        let n = self.0;
        self.0 = self.0.wrapping_add(1);
        n
    }
}

impl IdSource for SequentialIds {
    fn disk_id(&mut self) -> u32 {
        self.next() as u32
    }

    fn guid(&mut self) -> Uuid {
        Uuid::from_u128(self.next())
    }
}

/// EFI System partition.
pub const EFI_SYSTEM: Uuid = uuid!("c12a7328-f81f-11d2-ba4b-00a0c93ec93b");
/// BIOS boot partition.
pub const BIOS_BOOT: Uuid = uuid!("21686148-6449-6e6f-744e-656564454649");
/// Linux filesystem data.
pub const LINUX_FILESYSTEM: Uuid = uuid!("0fc63daf-8483-4772-8e79-3d69d8477de4");
/// Microsoft basic data.
pub const MICROSOFT_BASIC_DATA: Uuid = uuid!("ebd0a0a2-b9e5-4433-87c0-68b6b72699c7");

/// Known partition types: alias, name, GUID.
const PARTITION_TYPES: &[(&str, &str, Uuid)] = &[
    ("efi", "EFI System", EFI_SYSTEM),
    (
        "mbr",
        "MBR partition scheme",
        uuid!("024dee41-33e7-11d3-9d69-0008c781f39f"),
    ),
    ("bios", "BIOS boot", BIOS_BOOT),
    (
        "msr",
        "Microsoft reserved",
        uuid!("e3c9e316-0b5c-4db8-817d-f92df00215ae"),
    ),
    ("msdata", "Microsoft basic data", MICROSOFT_BASIC_DATA),
    (
        "winre",
        "Windows recovery environment",
        uuid!("de94bba4-06d1-4d40-a16a-bfd50179d6ac"),
    ),
    (
        "swap",
        "Linux swap",
        uuid!("0657fd6d-a4ab-43c4-84e5-0933c84b4f4f"),
    ),
    ("linux", "Linux filesystem", LINUX_FILESYSTEM),
    (
        "root-x86",
        "Linux root (x86)",
        uuid!("44479540-f297-41b2-9af7-d131d5f0458a"),
    ),
    (
        "root-x86-64",
        "Linux root (x86-64)",
        uuid!("4f68bce3-e8cd-4db1-96e7-fbcaf984b709"),
    ),
    (
        "root-arm64",
        "Linux root (ARM-64)",
        uuid!("b921b045-1df0-41c3-af44-4c6f280d3fae"),
    ),
    (
        "root-riscv64",
        "Linux root (RISC-V-64)",
        uuid!("72ec70a6-cf74-40e6-bd49-4bda08e8f224"),
    ),
    (
        "home",
        "Linux home",
        uuid!("933ac7e1-2eb4-4f13-b844-0e14e2aef915"),
    ),
    (
        "raid",
        "Linux RAID",
        uuid!("a19d880f-05fc-4d3b-a006-743f0f84911e"),
    ),
    ("lvm", "Linux LVM", uuid!("e6d6d379-f507-44c2-a23c-238f2a3df928")),
    (
        "xbootldr",
        "Linux extended boot",
        uuid!("bc13c2ff-59e6-4262-a352-b275fd6f7172"),
    ),
    (
        "freebsd",
        "FreeBSD data",
        uuid!("516e7cb4-6ecf-11d6-8ff8-00022d09712b"),
    ),
    (
        "hfs",
        "Apple HFS/HFS+",
        uuid!("48465300-0000-11aa-aa11-00306543ecac"),
    ),
    (
        "apfs",
        "Apple APFS",
        uuid!("7c3457ef-0000-11aa-aa11-00306543ecac"),
    ),
];

/// Parses a partition type, given either as a GUID or as a known alias (`efi`, `linux`, ...).
pub fn parse_type(s: &str) -> Option<Uuid> {
    PARTITION_TYPES
        .iter()
        .find(|(alias, ..)| alias.eq_ignore_ascii_case(s))
        .map(|(.., guid)| *guid)
        .or_else(|| Uuid::try_parse(s).ok())
}

/// Returns the human-readable name of a partition type, if known.
pub fn type_name(guid: &Uuid) -> Option<&'static str> {
    PARTITION_TYPES
        .iter()
        .find(|(.., g)| g == guid)
        .map(|(_, name, _)| *name)
}
