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

//! Main of the disk image commands.
//!
//! The command to run is selected from the name of the binary, or from the first argument if
//! the binary has another name.

mod lsdisk;
mod mkdisk;

use disk::error;
use std::ffi::OsString;

/// Returns the name of the command to run, taking it from `args` if the binary's name is not
/// a command.
fn command_name<I: Iterator<Item = OsString>>(bin: &str, args: &mut I) -> Option<String> {
    match bin {
        "mkdisk" | "lsdisk" => Some(bin.to_owned()),
        _ => args.next().and_then(|s| s.into_string().ok()),
    }
}

fn main() {
    let (bin, mut args) = disk::args();
    let Some(cmd) = command_name(&bin, &mut args) else {
        error(&bin, "missing command name (`mkdisk` or `lsdisk`)");
    };
    match cmd.as_str() {
        "mkdisk" => mkdisk::main(args),
        "lsdisk" => lsdisk::main(args),
        _ => error(&bin, format_args!("invalid command name `{cmd}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_from_binary_name() {
        let mut args = [OsString::from("disk.img")].into_iter();
        assert_eq!(command_name("lsdisk", &mut args).as_deref(), Some("lsdisk"));
        assert_eq!(args.next(), Some(OsString::from("disk.img")));
    }

    #[test]
    fn command_from_first_argument() {
        let mut args = ["mkdisk", "disk.img", "4M"].map(OsString::from).into_iter();
        assert_eq!(command_name("disktools", &mut args).as_deref(), Some("mkdisk"));
        assert_eq!(args.next(), Some(OsString::from("disk.img")));
        assert_eq!(command_name("disktools", &mut std::iter::empty()), None);
    }
}
