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

//! Backing stores on which partition tables are read and written.

use crate::error::Error;
use crate::error::Result;
use libc::ioctl;
use std::ffi::c_long;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::path::PathBuf;

/// ioctl macro: Command.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: Read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2, $a, $b, std::mem::size_of::<$c>() as c_long)
    };
}

/// ioctl command: Read a partitions table.
const BLKRRPART: c_long = 0x125f;
/// ioctl command: Get size of disk in bytes.
const BLKGETSIZE64: c_long = ior!(0x12, 114, u64);

/// Fails with [`Error::UnexpectedEof`] if `len` bytes at offset `off` do not fit in `store`.
fn check_range<S: BlockStore + ?Sized>(
    store: &S,
    off: u64,
    len: usize,
    context: &'static str,
) -> Result<()> {
    let end = off.checked_add(len as u64);
    if end.is_none_or(|end| end > store.len()) {
        return Err(Error::UnexpectedEof(context));
    }
    Ok(())
}

/// A fixed-size store supporting positioned reads and writes.
pub trait BlockStore {
    /// Reads bytes at offset `off` into `buf`, returning the number of bytes read.
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<usize>;

    /// Writes `buf` at offset `off`, returning the number of bytes written.
    fn write_at(&mut self, buf: &[u8], off: u64) -> io::Result<usize>;

    /// Returns the size of the store in bytes.
    fn len(&self) -> u64;

    /// Tells whether the store has a size of zero.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `buf` with the bytes at offset `off`.
    ///
    /// If the store ends before `buf` is filled, the function returns
    /// [`Error::UnexpectedEof`] with `context`.
    fn read_exact_at(&self, mut buf: &mut [u8], mut off: u64, context: &'static str) -> Result<()> {
        check_range(self, off, buf.len(), context)?;
        while !buf.is_empty() {
            match self.read_at(buf, off) {
                Ok(0) => return Err(Error::UnexpectedEof(context)),
                Ok(n) => {
                    buf = &mut buf[n..];
                    off += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::io(context, e)),
            }
        }
        Ok(())
    }

    /// Writes the whole of `buf` at offset `off`.
    ///
    /// If `buf` does not fit in the store, the function returns [`Error::UnexpectedEof`] with
    /// `context` and nothing is written.
    fn write_all_at(&mut self, mut buf: &[u8], mut off: u64, context: &'static str) -> Result<()> {
        check_range(self, off, buf.len(), context)?;
        while !buf.is_empty() {
            match self.write_at(buf, off) {
                Ok(0) => return Err(Error::UnexpectedEof(context)),
                Ok(n) => {
                    buf = &buf[n..];
                    off += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::io(context, e)),
            }
        }
        Ok(())
    }
}

/// Returns the size in bytes of the given device or regular file.
pub fn get_disk_size(dev: &File) -> io::Result<u64> {
    let metadata = dev.metadata()?;
    let file_type = metadata.file_type();
    if file_type.is_block_device() || file_type.is_char_device() {
        let mut size: u64 = 0;
        let ret = unsafe { ioctl(dev.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(size)
    } else if file_type.is_file() {
        Ok(metadata.len())
    } else {
        Ok(0)
    }
}

/// A store backed by a file or a device file.
#[derive(Debug)]
pub struct FileStore {
    /// The path to the file.
    path: PathBuf,
    /// The open file.
    file: File,
    /// The size of the store in bytes.
    len: u64,
}

impl FileStore {
    /// Creates the file at `path`, truncating it to `size` bytes.
    pub fn create(path: &Path, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::io("failed to create file", e))?;
        file.set_len(size)
            .map_err(|e| Error::io("failed to resize file", e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len: size,
        })
    }

    /// Opens the existing file or device at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io("failed to open file", e))?;
        let len = get_disk_size(&file).map_err(|e| Error::io("failed to get disk size", e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
        })
    }

    /// Returns the path to the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Makes the kernel read the partition table of the device.
    ///
    /// On a regular file, the function does nothing.
    pub fn reread_partitions(&self) -> io::Result<()> {
        let ret = unsafe { ioctl(self.file.as_raw_fd(), BLKRRPART as _, 0) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                // Inappropriate ioctl for device
                Some(libc::ENOTTY) => {}
                _ => return Err(err),
            }
        }
        Ok(())
    }

    /// Flushes written data to the device and closes it.
    pub fn close(self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| Error::io("failed to sync file", e))
    }
}

impl BlockStore for FileStore {
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<usize> {
        FileExt::read_at(&self.file, buf, off)
    }

    fn write_at(&mut self, buf: &[u8], off: u64) -> io::Result<usize> {
        FileExt::write_at(&self.file, buf, off)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// A store held in memory, with a fixed size.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MemStore(Vec<u8>);

impl MemStore {
    /// Creates a zeroed store of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self(vec![0; len])
    }

    /// Returns the content of the store.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the content of the store, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }

    /// Returns the underlying buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for MemStore {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl BlockStore for MemStore {
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<usize> {
        let Some(src) = usize::try_from(off).ok().and_then(|off| self.0.get(off..)) else {
            return Ok(0);
        };
        let n = buf.len().min(src.len());
        buf[..n].copy_from_slice(&src[..n]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], off: u64) -> io::Result<usize> {
        let Some(dst) = usize::try_from(off)
            .ok()
            .and_then(|off| self.0.get_mut(off..))
        else {
            return Ok(0);
        };
        let n = buf.len().min(dst.len());
        dst[..n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn len(&self) -> u64 {
        self.0.len() as u64
    }
}
