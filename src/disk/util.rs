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

//! Sizes in bytes, as printed and as given on the command line.

use std::fmt;

/// Performs the log2 operation on the given integer.
///
/// If the result is undefined, the function returns None.
fn log2(n: u64) -> Option<u64> {
    n.checked_ilog2().map(u64::from)
}

/// Structure representing a number of bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ByteSize(pub u64);

impl ByteSize {
    /// Creates a size from a given number of blocks.
    pub fn from_blocks(cnt: u64) -> Self {
        Self(cnt.saturating_mul(crate::BLOCK_SIZE))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = log2(self.0).unwrap_or(0) / 10;
        let suffix = match order {
            0 => "bytes",
            1 => "KiB",
            2 => "MiB",
            3 => "GiB",
            4 => "TiB",
            5 => "PiB",
            _ => "EiB",
        };
        let nbr = self.0 >> (order.min(6) * 10);
        write!(fmt, "{nbr} {suffix}")
    }
}

/// Parses a size in bytes, with an optional binary suffix (`K`, `M`, `G` or `T`).
///
/// The suffix may be followed by `iB` (`MiB`) or `B` (`MB`), which mean the same thing.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let digits = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (nbr, suffix) = s.split_at(digits);
    let nbr: u64 = nbr
        .parse()
        .map_err(|_| format!("invalid size: `{s}`"))?;
    let shift = match suffix {
        "" | "B" => 0,
        "K" | "KB" | "KiB" => 10,
        "M" | "MB" | "MiB" => 20,
        "G" | "GB" | "GiB" => 30,
        "T" | "TB" | "TiB" => 40,
        _ => return Err(format!("invalid size suffix: `{suffix}`")),
    };
    nbr.checked_mul(1 << shift)
        .ok_or_else(|| format!("size too large: `{s}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytesize() {
        assert_eq!(format!("{}", ByteSize(0)).as_str(), "0 bytes");
        assert_eq!(format!("{}", ByteSize(1)).as_str(), "1 bytes");
        assert_eq!(format!("{}", ByteSize(1023)).as_str(), "1023 bytes");
        assert_eq!(format!("{}", ByteSize(1024)).as_str(), "1 KiB");
        assert_eq!(format!("{}", ByteSize(1025)).as_str(), "1 KiB");
        assert_eq!(format!("{}", ByteSize(2048)).as_str(), "2 KiB");
        assert_eq!(format!("{}", ByteSize(1024 * 1024)).as_str(), "1 MiB");
        assert_eq!(format!("{}", ByteSize::from_blocks(8192)).as_str(), "4 MiB");
        assert_eq!(
            format!("{}", ByteSize(1024 * 1024 * 1024 * 1024)).as_str(),
            "1 TiB"
        );
        assert_eq!(format!("{}", ByteSize(u64::MAX)).as_str(), "15 EiB");
    }

    #[test]
    fn size_parse() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("64K"), Ok(64 * 1024));
        assert_eq!(parse_size("4M"), Ok(4 << 20));
        assert_eq!(parse_size("4MiB"), Ok(4 << 20));
        assert_eq!(parse_size("2G"), Ok(2 << 30));
        assert_eq!(parse_size("1T"), Ok(1 << 40));
        assert!(parse_size("").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("12X").is_err());
        assert!(parse_size("-1").is_err());
        assert!(parse_size("99999999999999999999G").is_err());
    }
}
