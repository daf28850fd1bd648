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

//! Layout scripts, describing the partitions of a disk in the format of `sfdisk` dumps.
//!
//! Example:
//!
//! ```text
//! label: gpt
//! label-id: 2E5A1C4B-7D3F-4C2A-9B1E-0F6D8A7C5B3E
//! device: disk.img
//! unit: sectors
//! first-lba: 34
//! last-lba: 8158
//!
//! disk.img1 : start=2048, size=4096, type=C12A7328-F81F-11D2-BA4B-00A0C93EC93B, name="EFI"
//! disk.img2 : start=6144, end=8158, type=linux
//! ```
//!
//! The header is optional and ends at the first blank line. The device prefix of partition
//! lines is optional as well.

use crate::disk::GptTable;
use crate::gpt::entry::GptPartition;
use crate::guid;
use crate::guid::IdSource;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// An error in a layout script.
#[derive(Debug, Error, Eq, PartialEq)]
#[error("script line {line}: {msg}")]
pub struct ScriptError {
    /// The line on which the error occurred, starting at `1`.
    pub line: usize,
    /// A description of the error.
    pub msg: String,
}

/// A partition described in a script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptPartition {
    /// The first LBA.
    pub start: u64,
    /// The last LBA (inclusive).
    pub end: u64,
    /// The partition type.
    pub type_guid: Uuid,
    /// The partition's GUID. If not specified, one is generated when building.
    pub guid: Option<Uuid>,
    /// The partition's name.
    pub name: String,
    /// Attribute flags.
    pub attributes: u64,
}

impl ScriptPartition {
    /// Returns the entry for the partition, drawing its GUID from `ids` if not specified.
    pub fn to_gpt<I: IdSource + ?Sized>(&self, ids: &mut I) -> GptPartition {
        GptPartition {
            type_guid: self.type_guid,
            guid: self.guid.unwrap_or_else(|| ids.guid()),
            start_lba: self.start,
            end_lba: self.end,
            attributes: self.attributes,
            name: self.name.clone(),
        }
    }
}

impl From<&GptPartition> for ScriptPartition {
    fn from(p: &GptPartition) -> Self {
        Self {
            start: p.start_lba,
            end: p.end_lba,
            type_guid: p.type_guid,
            guid: Some(p.guid),
            name: p.name.clone(),
            attributes: p.attributes,
        }
    }
}

/// Splits the fields of a partition line on commas, ignoring those between double quotes.
///
/// Between quotes, a backslash escapes the next character.
fn split_fields(line: &str) -> Result<Vec<&str>, String> {
    let mut fields = vec![];
    let mut quoted = false;
    let mut escaped = false;
    let mut begin = 0;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(&line[begin..i]);
                begin = i + 1;
            }
            _ => {}
        }
    }
    if quoted {
        return Err("unterminated quote".to_owned());
    }
    fields.push(&line[begin..]);
    Ok(fields)
}

/// Returns the value between double quotes with escapes removed, or the value itself if it is
/// not quoted.
fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return value.to_owned();
    };
    let mut res = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => res.extend(chars.next()),
            c => res.push(c),
        }
    }
    res
}

/// Writes `value` between double quotes, escaping quotes and backslashes.
fn write_quoted(fmt: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    fmt.write_str("\"")?;
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            fmt.write_str("\\")?;
        }
        write!(fmt, "{c}")?;
    }
    fmt.write_str("\"")
}

/// Parses an integer given either in decimal or in hexadecimal with the `0x` prefix.
fn parse_int(name: &str, val: &str) -> Result<u64, String> {
    let res = match val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => val.parse(),
    };
    res.map_err(|_| format!("invalid value for `{name}`: {val}"))
}

impl FromStr for ScriptPartition {
    type Err = String;

    /// Parses a partition line, with or without the device prefix.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        // Strip `<device> :` if the colon comes before any value
        let values = match (line.find(':'), line.find('=')) {
            (Some(colon), Some(eq)) if colon < eq => &line[(colon + 1)..],
            (Some(colon), None) => &line[(colon + 1)..],
            _ => line,
        };

        let mut start = None;
        let mut size = None;
        let mut end = None;
        let mut type_guid = None;
        let mut part_guid = None;
        let mut name = String::new();
        let mut attributes = 0;
        for field in split_fields(values)? {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let (key, value) = match field.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (field, ""),
            };
            if value.is_empty() {
                return Err(format!("`{key}` requires a value"));
            }
            match key {
                "start" => start = Some(parse_int(key, value)?),
                "size" => size = Some(parse_int(key, value)?),
                "end" => end = Some(parse_int(key, value)?),
                "type" => {
                    let Some(t) = guid::parse_type(value) else {
                        return Err(format!("invalid value for `type`: {value}"));
                    };
                    type_guid = Some(t);
                }
                "uuid" => {
                    let Ok(g) = Uuid::try_parse(value) else {
                        return Err(format!("invalid value for `uuid`: {value}"));
                    };
                    part_guid = Some(g);
                }
                "name" => name = unquote(value),
                "attrs" => attributes = parse_int(key, value)?,
                _ => return Err(format!("unknown attribute: `{key}`")),
            }
        }

        let Some(start) = start else {
            return Err("missing `start`".to_owned());
        };
        let end = match (size, end) {
            (Some(_), Some(_)) => return Err("`size` and `end` are exclusive".to_owned()),
            (Some(0), None) => return Err("`size` must not be zero".to_owned()),
            (Some(size), None) => start
                .checked_add(size - 1)
                .ok_or_else(|| format!("invalid value for `size`: {size}"))?,
            (None, Some(end)) => end,
            (None, None) => return Err("missing `size` or `end`".to_owned()),
        };
        Ok(Self {
            start,
            end,
            type_guid: type_guid.unwrap_or(guid::LINUX_FILESYSTEM),
            guid: part_guid,
            name,
            attributes,
        })
    }
}

impl fmt::Display for ScriptPartition {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // An empty range cannot be given as a size
        if self.end >= self.start {
            write!(
                fmt,
                "start={}, size={}",
                self.start,
                (self.end - self.start).saturating_add(1)
            )?;
        } else {
            write!(fmt, "start={}, end={}", self.start, self.end)?;
        }
        write!(fmt, ", type={:X}", self.type_guid)?;
        if let Some(guid) = self.guid {
            write!(fmt, ", uuid={guid:X}")?;
        }
        if !self.name.is_empty() {
            write!(fmt, ", name=")?;
            write_quoted(fmt, &self.name)?;
        }
        if self.attributes != 0 {
            write!(fmt, ", attrs={:#x}", self.attributes)?;
        }
        Ok(())
    }
}

/// The layout of a disk.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Script {
    /// The disk's GUID.
    pub label_id: Option<Uuid>,
    /// The device the script was dumped from. Partition lines are prefixed with its name.
    pub device: Option<String>,
    /// The first usable LBA.
    pub first_lba: Option<u64>,
    /// The last usable LBA.
    pub last_lba: Option<u64>,
    /// The partitions, in order.
    pub partitions: Vec<ScriptPartition>,
}

impl Script {
    /// Creates the script describing the used entries of `table`, read from `device`.
    pub fn from_table(table: &GptTable, device: &str) -> Self {
        Self {
            label_id: Some(table.header.disk_guid),
            device: Some(device.to_owned()),
            first_lba: Some(table.header.first_usable_lba),
            last_lba: Some(table.header.last_usable_lba),
            partitions: table.used().map(|(_, p)| p.into()).collect(),
        }
    }

    /// Applies the header line `key: value`.
    fn parse_header(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "label" if value == "gpt" => {}
            "label" => return Err(format!("unsupported label: `{value}`")),
            "label-id" => {
                let Ok(g) = Uuid::try_parse(value) else {
                    return Err(format!("invalid value for `label-id`: {value}"));
                };
                self.label_id = Some(g);
            }
            "device" => self.device = Some(value.to_owned()),
            "unit" if value == "sectors" => {}
            "unit" => return Err(format!("unsupported unit: `{value}`")),
            "first-lba" => self.first_lba = Some(parse_int(key, value)?),
            "last-lba" => self.last_lba = Some(parse_int(key, value)?),
            // `sector-size`, `table-length`, ...
            _ => {}
        }
        Ok(())
    }
}

impl FromStr for Script {
    type Err = ScriptError;

    fn from_str(script: &str) -> Result<Self, Self::Err> {
        let mut res = Self::default();
        let mut header = true;
        for (i, line) in script.lines().enumerate() {
            let err = |msg| ScriptError {
                line: i + 1,
                msg,
            };
            let line = line.trim();
            if line.is_empty() {
                header = false;
                continue;
            }
            if line.starts_with('#') {
                continue;
            }
            if header && !line.contains('=') {
                let Some((key, value)) = line.split_once(':') else {
                    return Err(err(format!("invalid header line: `{line}`")));
                };
                res.parse_header(key.trim(), value.trim()).map_err(err)?;
                continue;
            }
            header = false;
            res.partitions.push(line.parse().map_err(err)?);
        }
        Ok(res)
    }
}

impl fmt::Display for Script {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(fmt, "label: gpt")?;
        if let Some(label_id) = self.label_id {
            writeln!(fmt, "label-id: {label_id:X}")?;
        }
        if let Some(device) = &self.device {
            writeln!(fmt, "device: {device}")?;
        }
        writeln!(fmt, "unit: sectors")?;
        if let Some(first_lba) = self.first_lba {
            writeln!(fmt, "first-lba: {first_lba}")?;
        }
        if let Some(last_lba) = self.last_lba {
            writeln!(fmt, "last-lba: {last_lba}")?;
        }
        writeln!(fmt)?;
        for (i, p) in self.partitions.iter().enumerate() {
            match &self.device {
                Some(device) => writeln!(fmt, "{device}{} : {p}", i + 1)?,
                None => writeln!(fmt, "{p}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::TableCopy;
    use crate::gpt::GptHeader;
    use crate::guid::SequentialIds;

    fn sample() -> Script {
        Script {
            label_id: Some(Uuid::from_u128(0x1234)),
            device: Some("/dev/sda".to_owned()),
            first_lba: Some(34),
            last_lba: Some(8158),
            partitions: vec![
                ScriptPartition {
                    start: 2048,
                    end: 6143,
                    type_guid: guid::EFI_SYSTEM,
                    guid: Some(Uuid::from_u128(1)),
                    name: "EFI, system".to_owned(),
                    attributes: 1,
                },
                ScriptPartition {
                    start: 6144,
                    end: 8158,
                    type_guid: guid::LINUX_FILESYSTEM,
                    guid: None,
                    name: String::new(),
                    attributes: 0,
                },
            ],
        }
    }

    #[test]
    fn serialize_empty() {
        let script0 = Script::default();
        let script1: Script = script0.to_string().parse().unwrap();
        assert_eq!(script0, script1);
    }

    #[test]
    fn serialize_roundtrip() {
        let script0 = sample();
        let serialized = script0.to_string();
        assert!(serialized.starts_with(
            "label: gpt\nlabel-id: 00000000-0000-0000-0000-000000001234\n"
        ));
        assert!(serialized.contains(
            "/dev/sda1 : start=2048, size=4096, type=C12A7328-F81F-11D2-BA4B-00A0C93EC93B"
        ));
        let script1: Script = serialized.parse().unwrap();
        assert_eq!(script0, script1);
    }

    #[test]
    fn parse_without_header() {
        let script: Script = "start=34, size=100, type=efi, name=\"boot\"\n\
            start=134, end=200, attrs=0x8000000000000000\n"
            .parse()
            .unwrap();
        assert_eq!(script.label_id, None);
        assert_eq!(script.partitions.len(), 2);
        assert_eq!(script.partitions[0].end, 133);
        assert_eq!(script.partitions[0].type_guid, guid::EFI_SYSTEM);
        assert_eq!(script.partitions[0].name, "boot");
        assert_eq!(script.partitions[1].end, 200);
        assert_eq!(script.partitions[1].type_guid, guid::LINUX_FILESYSTEM);
        assert_eq!(script.partitions[1].attributes, 1 << 63);
    }

    #[test]
    fn parse_partition_line() {
        let line = "img1 : start=2048, size=2048, uuid=00000000-0000-0000-0000-000000000007";
        let p: ScriptPartition = line.parse().unwrap();
        assert_eq!(p.start, 2048);
        assert_eq!(p.end, 4095);
        assert_eq!(p.guid, Some(Uuid::from_u128(7)));
        let p: ScriptPartition = "start=1, size=1, name=\"a:b\"".parse().unwrap();
        assert_eq!(p.name, "a:b");
    }

    #[test]
    fn quoted_names() {
        for name in ["a\"b, c", "back\\slash", "\"", "\\", "end\\\""] {
            let p0 = ScriptPartition {
                name: name.to_owned(),
                ..sample().partitions.remove(1)
            };
            let line = p0.to_string();
            let p1: ScriptPartition = line.parse().unwrap();
            assert_eq!(p0, p1, "{line}");
        }
        let p: ScriptPartition = r#"start=1, size=1, name="a\"b", type=efi"#.parse().unwrap();
        assert_eq!(p.name, "a\"b");
        assert_eq!(p.type_guid, guid::EFI_SYSTEM);
        assert!(r#"start=1, size=1, name="a\""#.parse::<ScriptPartition>().is_err());
    }

    #[test]
    fn reversed_range() {
        let p0 = ScriptPartition {
            start: 100,
            end: 50,
            ..sample().partitions.remove(1)
        };
        let line = p0.to_string();
        assert!(line.starts_with("start=100, end=50, "));
        let p1: ScriptPartition = line.parse().unwrap();
        assert_eq!(p0, p1);
    }

    #[test]
    fn invalid_scripts() {
        let cases = [
            "start=34",
            "size=10",
            "start=34, size=0",
            "start=34, size=10, end=50",
            "start=abc, size=1",
            "start=34, size=10, type=nonsense",
            "start=34, size=10, uuid=1234",
            "start=34, size=10, bootable",
            "start=34, size=10, color=red",
            "start=34, size=10, name=\"open",
            "start=34, size=",
        ];
        for case in cases {
            assert!(case.parse::<ScriptPartition>().is_err(), "{case}");
        }

        let err = "label: dos\n\nstart=34, size=1\n".parse::<Script>().unwrap_err();
        assert_eq!(err.line, 1);
        let err = "label: gpt\nunit: bytes\n".parse::<Script>().unwrap_err();
        assert_eq!(err.line, 2);
        let err = "label: gpt\nnonsense\n".parse::<Script>().unwrap_err();
        assert_eq!(err.line, 2);
        let err = "label: gpt\n\nstart=34, size=1\nstart=x\n"
            .parse::<Script>()
            .unwrap_err();
        assert_eq!(err.line, 4);
        assert!(err.to_string().starts_with("script line 4: "));
    }

    #[test]
    fn from_table() {
        let (header, _) = GptHeader::new_pair(8192, Uuid::from_u128(0x99)).unwrap();
        let mut partitions = vec![GptPartition::default(); 128];
        partitions[0] = GptPartition::new(guid::EFI_SYSTEM, Uuid::from_u128(1), 34, 99, "EFI");
        partitions[3] =
            GptPartition::new(guid::LINUX_FILESYSTEM, Uuid::from_u128(2), 100, 8158, "");
        let table = GptTable {
            header,
            partitions,
            source: TableCopy::Primary,
        };
        let script = Script::from_table(&table, "disk.img");
        assert_eq!(script.label_id, Some(Uuid::from_u128(0x99)));
        assert_eq!(script.first_lba, Some(34));
        assert_eq!(script.last_lba, Some(8158));
        assert_eq!(script.partitions.len(), 2);

        let reparsed: Script = script.to_string().parse().unwrap();
        let mut ids = SequentialIds::new(0);
        let entries: Vec<_> = reparsed.partitions.iter().map(|p| p.to_gpt(&mut ids)).collect();
        assert_eq!(entries[0], table.partitions[0]);
        assert_eq!(entries[1], table.partitions[3]);
    }

    #[test]
    fn generated_guid() {
        let p: ScriptPartition = "start=34, size=10".parse().unwrap();
        let mut ids = SequentialIds::new(5);
        assert_eq!(p.to_gpt(&mut ids).guid, Uuid::from_u128(5));
        assert_eq!(p.to_gpt(&mut ids).guid, Uuid::from_u128(6));
    }
}
