// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The capability set a filesystem implementation supplies
//!
//! Every method has a default body so implementors only write the
//! operations they support, and list them in [`Operations::provided`].
//! Unlisted operations are never called: the dispatch layer answers them
//! with `EPERM` and the operation's default reply.

use crate::buffer::LoanedBuffer;
use crate::codec::{Stat, Statfs};
use crate::errno::{Errno, OpResult};
use crate::registry::Opcode;
use async_trait::async_trait;

/// One `readdir` result entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub stat: Option<Stat>,
}

impl DirEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stat: None,
        }
    }

    pub fn with_stat(name: impl Into<String>, stat: Stat) -> Self {
        Self {
            name: name.into(),
            stat: Some(stat),
        }
    }
}

#[async_trait]
pub trait Operations: Send + Sync + 'static {
    /// Operations this implementation handles.
    fn provided(&self) -> Vec<Opcode>;

    async fn init(&self) -> OpResult<()> {
        Ok(())
    }

    async fn error(&self) -> OpResult<()> {
        Ok(())
    }

    async fn access(&self, _path: &str, _mode: u32) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn statfs(&self, _path: &str) -> OpResult<Statfs> {
        Err(Errno::ENOSYS)
    }

    async fn getattr(&self, _path: &str) -> OpResult<Stat> {
        Err(Errno::ENOSYS)
    }

    async fn fgetattr(&self, _path: &str, _fd: u64) -> OpResult<Stat> {
        Err(Errno::ENOSYS)
    }

    async fn flush(&self, _path: &str, _fd: u64) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn fsync(&self, _path: &str, _datasync: bool, _fd: u64) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn fsyncdir(&self, _path: &str, _datasync: bool, _fd: u64) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn readdir(&self, _path: &str) -> OpResult<Vec<DirEntry>> {
        Err(Errno::ENOSYS)
    }

    async fn truncate(&self, _path: &str, _size: u64) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn ftruncate(&self, _path: &str, _fd: u64, _size: u64) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    /// Times are epoch milliseconds.
    async fn utimens(&self, _path: &str, _atime: u64, _mtime: u64) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn readlink(&self, _path: &str) -> OpResult<String> {
        Err(Errno::ENOSYS)
    }

    async fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn chmod(&self, _path: &str, _mode: u32) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn mknod(&self, _path: &str, _mode: u32, _dev: u64) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn setxattr(
        &self,
        _path: &str,
        _name: &str,
        _value: LoanedBuffer,
        _position: u32,
        _flags: i32,
    ) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    /// `Ok(None)` means the attribute is not set.
    async fn getxattr(
        &self,
        _path: &str,
        _name: &str,
        _position: u32,
    ) -> OpResult<Option<Vec<u8>>> {
        Err(Errno::ENOSYS)
    }

    async fn listxattr(&self, _path: &str) -> OpResult<Vec<String>> {
        Err(Errno::ENOSYS)
    }

    async fn removexattr(&self, _path: &str, _name: &str) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    /// Returns the file handle.
    async fn open(&self, _path: &str, _flags: i32) -> OpResult<u64> {
        Err(Errno::ENOSYS)
    }

    async fn opendir(&self, _path: &str, _flags: i32) -> OpResult<u64> {
        Err(Errno::ENOSYS)
    }

    /// Fill `buf` (lent by the native layer) and return the byte count.
    async fn read(
        &self,
        _path: &str,
        _fd: u64,
        _buf: LoanedBuffer,
        _len: u32,
        _position: u64,
    ) -> OpResult<usize> {
        Err(Errno::ENOSYS)
    }

    async fn write(
        &self,
        _path: &str,
        _fd: u64,
        _buf: LoanedBuffer,
        _len: u32,
        _position: u64,
    ) -> OpResult<usize> {
        Err(Errno::ENOSYS)
    }

    async fn release(&self, _path: &str, _fd: u64) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn releasedir(&self, _path: &str, _fd: u64) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn create(&self, _path: &str, _mode: u32) -> OpResult<u64> {
        Err(Errno::ENOSYS)
    }

    async fn unlink(&self, _path: &str) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn rename(&self, _src: &str, _dest: &str) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn link(&self, _src: &str, _dest: &str) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn symlink(&self, _src: &str, _dest: &str) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn mkdir(&self, _path: &str, _mode: u32) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }

    async fn rmdir(&self, _path: &str) -> OpResult<()> {
        Err(Errno::ENOSYS)
    }
}
