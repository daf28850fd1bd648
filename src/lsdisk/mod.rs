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

//! `lsdisk` prints the partition table of disk images or devices.

use disk::BLOCK_SIZE;
use disk::disk::Disk;
use disk::disk::GptTable;
use disk::error;
use disk::error::Error;
use disk::guid;
use disk::logger;
use disk::mbr;
use disk::mbr::MBR_SIGNATURE;
use disk::mbr::Mbr;
use disk::script::Script;
use disk::store::BlockStore;
use disk::store::FileStore;
use disk::util::ByteSize;
use std::ffi::OsString;
use std::fmt;
use std::fmt::Write;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Debug, Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The verbosity level.
    verbose: u8,
    /// If true, print layout scripts instead of summaries.
    script: bool,
    /// The list of disks.
    disks: Vec<PathBuf>,
}

fn parse_args<I: IntoIterator<Item = OsString>>(args: I) -> Result<Args, String> {
    let mut res: Args = Default::default();
    for arg in args {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-v" | "--verbose") => res.verbose += 1,
            Some("-vv") => res.verbose += 2,
            Some("--script") => res.script = true,
            Some(opt) if opt.starts_with('-') && opt.len() > 1 => {
                return Err(format!("invalid option `{opt}`"));
            }
            _ => res.disks.push(arg.into()),
        }
    }
    Ok(res)
}

/// Prints command usage.
fn print_usage() {
    eprintln!("lsdisk: bad usage");
    eprintln!("Try 'lsdisk --help' for more information.");
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" lsdisk [options] <disks...>");
    println!();
    println!("Prints the partition table of disks.");
    println!();
    println!("Options:");
    println!(" -h, --help\tPrints help.");
    println!(" -v, --verbose\tPrints what is being done. Repeat for more details.");
    println!(" --script\tPrints the layout script of the disk instead.");
}

/// Writes the general information about the disk.
fn write_header(out: &mut String, path: &str, blocks: u64, label: &str) -> fmt::Result {
    let byte_size = blocks * BLOCK_SIZE;
    writeln!(
        out,
        "Disk {path}: {}, {byte_size} bytes, {blocks} sectors",
        ByteSize(byte_size)
    )?;
    writeln!(out, "Units: sectors of 1 * {BLOCK_SIZE} = {BLOCK_SIZE} bytes")?;
    writeln!(out, "Disklabel type: {label}")
}

/// Writes the summary of a GPT disk.
fn write_gpt(out: &mut String, path: &str, blocks: u64, table: &GptTable) -> fmt::Result {
    write_header(out, path, blocks, "gpt")?;
    writeln!(out, "Disk identifier: {:X}", table.header.disk_guid)?;
    writeln!(
        out,
        "Usable sectors: {}-{} (read from the {} table)",
        table.header.first_usable_lba, table.header.last_usable_lba, table.source
    )?;
    if table.used().next().is_none() {
        return Ok(());
    }
    writeln!(out, "\nDevice\tStart\tEnd\tSectors\tSize\tType\tName")?;
    for (i, p) in table.used() {
        let type_name = guid::type_name(&p.type_guid)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{:X}", p.type_guid));
        writeln!(
            out,
            "{path}{}\t{}\t{}\t{}\t{}\t{type_name}\t{}",
            i + 1,
            p.start_lba,
            p.end_lba,
            p.blocks(),
            ByteSize::from_blocks(p.blocks()),
            p.name
        )?;
    }
    Ok(())
}

/// Writes the summary of a disk with only an MBR.
fn write_mbr(out: &mut String, path: &str, blocks: u64, mbr: &Mbr) -> fmt::Result {
    write_header(out, path, blocks, "dos")?;
    writeln!(out, "Disk identifier: {:#010x}", mbr.disk_id)?;
    if mbr.partitions.iter().all(|p| p.is_empty()) {
        return Ok(());
    }
    writeln!(out, "\nDevice\tBoot\tStart\tEnd\tSectors\tSize\tType")?;
    for (i, p) in mbr.partitions.iter().enumerate() {
        if p.is_empty() {
            continue;
        }
        let sectors = p.lba_size as u64;
        let type_name = mbr::type_name(p.part_type)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{:#04x}", p.part_type));
        writeln!(
            out,
            "{path}{}\t{}\t{}\t{}\t{sectors}\t{}\t{type_name}",
            i + 1,
            if p.is_active() { "*" } else { "" },
            p.lba_start,
            (p.lba_start as u64 + sectors).saturating_sub(1),
            ByteSize::from_blocks(sectors)
        )?;
    }
    Ok(())
}

/// Returns the listing of the disk at `path`.
///
/// If `script` is set, the listing is the layout script of the disk.
fn listing<S: BlockStore>(disk: &Disk<S>, path: &str, script: bool) -> Result<String, String> {
    let blocks = disk.block_count();
    let mut out = String::new();
    let res = match disk.read_table() {
        Ok(table) if script => write!(out, "{}", Script::from_table(&table, path)),
        Ok(table) => write_gpt(&mut out, path, blocks, &table),
        Err(Error::NotPresent(_)) if !script => {
            let mbr = disk.read_mbr().map_err(|e| e.to_string())?;
            if mbr.signature != MBR_SIGNATURE {
                return Err("no partition table found".to_owned());
            }
            write_mbr(&mut out, path, blocks, &mbr)
        }
        Err(e) => return Err(e.to_string()),
    };
    res.map_err(|e| e.to_string())?;
    Ok(out)
}

pub fn main<I: IntoIterator<Item = OsString>>(args: I) {
    let args = parse_args(args).unwrap_or_else(|e| {
        eprintln!("lsdisk: {e}");
        print_usage();
        exit(1);
    });
    if args.help {
        print_help();
        exit(0);
    }
    if args.disks.is_empty() {
        print_usage();
        exit(1);
    }
    if let Err(e) = logger::init("lsdisk", args.verbose) {
        error("lsdisk", e);
    }
    for (i, path) in args.disks.iter().enumerate() {
        let disk = match FileStore::open(path) {
            Ok(store) => Disk::new(store),
            Err(e) => error("lsdisk", format_args!("{}: {e}", path.display())),
        };
        match listing(&disk, &path.display().to_string(), args.script) {
            Ok(out) => {
                if i > 0 {
                    println!();
                }
                print!("{out}");
            }
            Err(e) => error("lsdisk", format_args!("{}: {e}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use disk::builder::Builder;
    use disk::gpt::entry::GptPartition;
    use disk::guid::SequentialIds;
    use disk::mbr::MbrPartition;
    use disk::store::MemStore;
    use uuid::Uuid;

    fn gpt_disk() -> Disk<MemStore> {
        let store = MemStore::new(8192 * 512);
        let mut builder = Builder::new(store, &mut SequentialIds::new(0x10)).unwrap();
        builder
            .add_legacy(MbrPartition::protective(8192))
            .unwrap();
        builder
            .add(GptPartition::new(
                guid::EFI_SYSTEM,
                Uuid::from_u128(1),
                2048,
                4095,
                "EFI",
            ))
            .unwrap();
        Disk::new(builder.finalize().unwrap())
    }

    #[test]
    fn parse() {
        let args = parse_args(["--script", "-v", "a.img", "b.img"].map(OsString::from)).unwrap();
        assert!(args.script);
        assert_eq!(args.verbose, 1);
        assert_eq!(args.disks, [PathBuf::from("a.img"), PathBuf::from("b.img")]);
        assert!(parse_args(["--list"].map(OsString::from)).is_err());
    }

    #[test]
    fn list_gpt() {
        let out = listing(&gpt_disk(), "disk.img", false).unwrap();
        assert!(out.starts_with("Disk disk.img: 4 MiB, 4194304 bytes, 8192 sectors\n"));
        assert!(out.contains("Disklabel type: gpt\n"));
        assert!(out.contains("Disk identifier: 00000000-0000-0000-0000-000000000011\n"));
        assert!(out.contains("(read from the primary table)"));
        assert!(out.contains("disk.img1\t2048\t4095\t2048\t1 MiB\tEFI System\tEFI\n"));
    }

    #[test]
    fn list_partition_to_last_lba() {
        let mut builder =
            Builder::new(MemStore::new(8192 * 512), &mut SequentialIds::new(1)).unwrap();
        builder
            .add(GptPartition::new(
                guid::LINUX_FILESYSTEM,
                Uuid::from_u128(2),
                34,
                u64::MAX,
                "",
            ))
            .unwrap();
        let disk = Disk::new(builder.finalize().unwrap());
        let out = listing(&disk, "big", false).unwrap();
        assert!(out.contains(&format!("big1\t34\t{}\t{}\t", u64::MAX, u64::MAX - 33)));
        assert!(out.contains("\t15 EiB\t"));
    }

    #[test]
    fn list_script() {
        let out = listing(&gpt_disk(), "disk.img", true).unwrap();
        let script: Script = out.parse().unwrap();
        assert_eq!(script.label_id, Some(Uuid::from_u128(0x11)));
        assert_eq!(script.device.as_deref(), Some("disk.img"));
        assert_eq!(script.partitions.len(), 1);
        assert_eq!(script.partitions[0].name, "EFI");
    }

    #[test]
    fn list_mbr() {
        let mut mbr = Mbr::new(0xdeadbeef);
        mbr.partitions[0] = MbrPartition::new(mbr::TYPE_FAT32_LBA, 8192, 2048);
        mbr.partitions[0].attrs = 0x80;
        let mut data = mbr.to_bytes().to_vec();
        data.resize(64 * 512, 0);
        let disk = Disk::new(MemStore::from(data));
        let out = listing(&disk, "sd", false).unwrap();
        assert!(out.contains("Disklabel type: dos\n"));
        assert!(out.contains("Disk identifier: 0xdeadbeef\n"));
        assert!(out.contains("sd1\t*\t8192\t10239\t2048\t1 MiB\t"));
        assert!(listing(&disk, "sd", true).is_err());
    }

    #[test]
    fn list_nothing() {
        let disk = Disk::new(MemStore::new(64 * 512));
        assert_eq!(
            listing(&disk, "blank", false).unwrap_err(),
            "no partition table found"
        );
    }
}
