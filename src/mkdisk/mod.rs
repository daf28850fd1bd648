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

//! `mkdisk` creates a disk image holding a GPT, along with a protective MBR.

use disk::builder::Builder;
use disk::error;
use disk::guid::IdSource;
use disk::guid::RandomIds;
use disk::logger;
use disk::mbr::MbrPartition;
use disk::script::Script;
use disk::script::ScriptPartition;
use disk::util::ByteSize;
use disk::util::parse_size;
use log::debug;
use log::warn;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::exit;
use uuid::Uuid;

/// Structure storing command line arguments.
#[derive(Debug, Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The verbosity level.
    verbose: u8,
    /// The path to a layout script.
    script: Option<PathBuf>,
    /// Partitions given on the command line, as script lines.
    partitions: Vec<String>,
    /// The path to the image to create.
    image: Option<PathBuf>,
    /// The size of the image.
    size: Option<String>,
}

fn parse_args<I: IntoIterator<Item = OsString>>(args: I) -> Result<Args, String> {
    let mut res: Args = Default::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-v" | "--verbose") => res.verbose += 1,
            Some("-vv") => res.verbose += 2,
            Some(opt @ ("-s" | "--script" | "-p" | "--partition")) => {
                let Some(val) = args.next() else {
                    return Err(format!("`{opt}` requires a value"));
                };
                if matches!(opt, "-s" | "--script") {
                    res.script = Some(val.into());
                } else {
                    let Ok(val) = val.into_string() else {
                        return Err("partition description is not valid UTF-8".to_owned());
                    };
                    res.partitions.push(val);
                }
            }
            Some(opt) if opt.starts_with('-') && opt.len() > 1 => {
                return Err(format!("invalid option `{opt}`"));
            }
            _ if res.image.is_none() => res.image = Some(arg.into()),
            _ if res.size.is_none() => {
                let Ok(size) = arg.into_string() else {
                    return Err("size is not valid UTF-8".to_owned());
                };
                res.size = Some(size);
            }
            _ => {
                return Err(format!(
                    "unexpected argument `{}`",
                    arg.to_string_lossy()
                ));
            }
        }
    }
    Ok(res)
}

/// Prints command usage.
fn print_usage() {
    eprintln!("mkdisk: bad usage");
    eprintln!("Try 'mkdisk --help' for more information.");
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" mkdisk [options] <image> <size>");
    println!();
    println!("Creates a disk image with a GPT partition table.");
    println!();
    println!("The size accepts the K, M, G and T binary suffixes.");
    println!();
    println!("Options:");
    println!(" -h, --help\t\t\tPrints help.");
    println!(" -v, --verbose\t\t\tPrints what is being done. Repeat for more details.");
    println!(" -s, --script <file>\t\tReads partitions from a layout script.");
    println!(" -p, --partition <partition>\tAdds a partition, as a script line.");
    println!("   \t\t\t\tExample: `start=2048, size=4096, type=efi, name=\"EFI\"`");
}

/// Identifiers using the disk GUID from a script, if any.
struct ScriptIds<'i> {
    /// The disk GUID, until used.
    label_id: Option<Uuid>,
    /// The source for all other identifiers.
    inner: &'i mut dyn IdSource,
}

impl IdSource for ScriptIds<'_> {
    fn disk_id(&mut self) -> u32 {
        self.inner.disk_id()
    }

    fn guid(&mut self) -> Uuid {
        self.label_id.take().unwrap_or_else(|| self.inner.guid())
    }
}

/// Creates the image described by `args`.
fn run(args: Args, ids: &mut dyn IdSource) -> Result<(), String> {
    let (Some(image), Some(size)) = (args.image, args.size) else {
        return Err("missing image or size".to_owned());
    };
    let size = parse_size(&size)?;

    let mut script = match &args.script {
        Some(path) => {
            let content = fs::read_to_string(path)
                .map_err(|e| format!("cannot read script `{}`: {e}", path.display()))?;
            content.parse::<Script>().map_err(|e| e.to_string())?
        }
        None => Script::default(),
    };
    for line in &args.partitions {
        let part = line
            .parse::<ScriptPartition>()
            .map_err(|e| format!("partition `{line}`: {e}"))?;
        script.partitions.push(part);
    }

    let mut ids = ScriptIds {
        label_id: script.label_id,
        inner: ids,
    };
    let mut builder = Builder::create(&image, size, &mut ids)
        .map_err(|e| format!("cannot create `{}`: {e}", image.display()))?;
    debug!(
        "creating `{}`: {}, {} blocks",
        image.display(),
        ByteSize(size),
        builder.block_count()
    );
    let first = builder.primary().first_usable_lba;
    let last = builder.primary().last_usable_lba;
    if script.first_lba.is_some_and(|lba| lba != first)
        || script.last_lba.is_some_and(|lba| lba != last)
    {
        warn!("usable blocks of the script ignored, using {first}-{last}");
    }

    builder
        .add_legacy(MbrPartition::protective(builder.block_count()))
        .map_err(|e| e.to_string())?;
    for part in &script.partitions {
        builder
            .add(part.to_gpt(&mut ids))
            .map_err(|e| e.to_string())?;
    }
    let store = builder
        .finalize()
        .map_err(|e| format!("cannot write `{}`: {e}", image.display()))?;
    store
        .reread_partitions()
        .map_err(|e| format!("cannot read partition table from `{}`: {e}", image.display()))?;
    store.close().map_err(|e| e.to_string())
}

pub fn main<I: IntoIterator<Item = OsString>>(args: I) {
    let args = parse_args(args).unwrap_or_else(|e| {
        eprintln!("mkdisk: {e}");
        print_usage();
        exit(1);
    });
    if args.help {
        print_help();
        exit(0);
    }
    if args.image.is_none() || args.size.is_none() {
        print_usage();
        exit(1);
    }
    if let Err(e) = logger::init("mkdisk", args.verbose) {
        error("mkdisk", e);
    }
    if let Err(e) = run(args, &mut RandomIds) {
        error("mkdisk", e);
    }
}
