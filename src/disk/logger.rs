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

//! Logger printing library diagnostics on the standard error.

use log::Level;
use log::LevelFilter;
use log::Log;
use log::Metadata;
use log::Record;
use log::SetLoggerError;
use std::io;
use std::io::Write;

/// Returns the maximum level of messages to be printed for the given verbosity.
pub fn level_filter(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// A logger writing `<bin>: <level>: <message>` lines on the standard error.
struct StderrLogger {
    /// The name of the command.
    bin: String,
    /// The maximum level to print.
    max: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => "error",
            Level::Warn => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        };
        let _ = writeln!(io::stderr(), "{}: {level}: {}", self.bin, record.args());
    }

    fn flush(&self) {}
}

/// Installs the logger for the command `bin`.
///
/// `verbosity` is the number of times the verbose flag has been given.
pub fn init(bin: &str, verbosity: u8) -> Result<(), SetLoggerError> {
    let max = level_filter(verbosity);
    log::set_boxed_logger(Box::new(StderrLogger {
        bin: bin.to_owned(),
        max,
    }))?;
    log::set_max_level(max);
    Ok(())
}
