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

//! Errors returned by partition table operations.

use std::io;
use thiserror::Error;

/// An error occurring while reading, writing or building a partition table.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying store failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: &'static str,
        /// The error returned by the store.
        #[source]
        source: io::Error,
    },
    /// Fewer bytes than the format demands were available.
    #[error("unexpected end of data: {0}")]
    UnexpectedEof(&'static str),

    /// The signature of the table is missing.
    #[error("{0} signature not detected")]
    NotPresent(&'static str),
    /// The table is present but uses an unsupported revision or layout.
    #[error("GPT unsupported: {0}")]
    Unsupported(String),
    /// A stored checksum does not match the data it covers.
    #[error("{what} checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    ChecksumMismatch {
        /// The checksummed structure.
        what: &'static str,
        /// The value found on disk.
        stored: u32,
        /// The value computed from the data.
        computed: u32,
    },
    /// The size of the device cannot hold a partitioned disk.
    #[error("invalid disk size: {0} bytes")]
    InvalidSize(u64),

    /// The caller broke a precondition (capacity exceeded, undersized buffer, ...).
    #[error("invalid usage: {0}")]
    InvalidUsage(String),
}

impl Error {
    /// Tells whether the error results from a programming mistake rather than from the
    /// environment.
    pub fn is_invalid_usage(&self) -> bool {
        matches!(self, Self::InvalidUsage(_))
    }

    /// Tells whether the error is caused by data being shorter than expected.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::UnexpectedEof(_))
    }

    /// Wraps an I/O error with the given context, turning short transfers into
    /// [`Error::UnexpectedEof`].
    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof(context)
        } else {
            Self::Io { context, source }
        }
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Self::io("I/O error", source)
    }
}

/// Result of partition table operations.
pub type Result<T> = std::result::Result<T, Error>;
