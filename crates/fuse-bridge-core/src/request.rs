// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Requests as the native transport delivers them
//!
//! Argument shapes are fixed per opcode. 64-bit offsets, sizes and times
//! arrive as [`Split64`] word pairs and are combined before a handler sees
//! them.

use crate::buffer::LoanedBuffer;
use crate::codec::{combine_u64, split_u64};
use crate::registry::Opcode;

/// A 64-bit quantity carried as two 32-bit words.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Split64 {
    pub low: u32,
    pub high: u32,
}

impl Split64 {
    pub fn new(low: u32, high: u32) -> Self {
        Self { low, high }
    }

    pub fn get(self) -> u64 {
        combine_u64(self.low, self.high)
    }
}

impl From<u64> for Split64 {
    fn from(value: u64) -> Self {
        let (low, high) = split_u64(value);
        Self { low, high }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Init,
    Error,
    Access { path: String, mode: u32 },
    Statfs { path: String },
    Fgetattr { path: String, fd: u64 },
    Getattr { path: String },
    Flush { path: String, fd: u64 },
    Fsync { path: String, datasync: bool, fd: u64 },
    Fsyncdir { path: String, datasync: bool, fd: u64 },
    Readdir { path: String },
    Truncate { path: String, size: Split64 },
    Ftruncate { path: String, fd: u64, size: Split64 },
    Utimens { path: String, atime: Split64, mtime: Split64 },
    Readlink { path: String },
    Chown { path: String, uid: u32, gid: u32 },
    Chmod { path: String, mode: u32 },
    Mknod { path: String, mode: u32, dev: u64 },
    Setxattr {
        path: String,
        name: String,
        value: LoanedBuffer,
        position: u32,
        flags: i32,
    },
    Getxattr {
        path: String,
        name: String,
        value: LoanedBuffer,
        position: u32,
    },
    Listxattr { path: String, list: LoanedBuffer },
    Removexattr { path: String, name: String },
    Open { path: String, flags: i32 },
    Opendir { path: String, flags: i32 },
    Read {
        path: String,
        fd: u64,
        buf: LoanedBuffer,
        len: u32,
        offset: Split64,
    },
    Write {
        path: String,
        fd: u64,
        buf: LoanedBuffer,
        len: u32,
        offset: Split64,
    },
    Release { path: String, fd: u64 },
    Releasedir { path: String, fd: u64 },
    Create { path: String, mode: u32 },
    Unlink { path: String },
    Rename { src: String, dest: String },
    Link { src: String, dest: String },
    Symlink { src: String, dest: String },
    Mkdir { path: String, mode: u32 },
    Rmdir { path: String },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Init => Opcode::Init,
            Request::Error => Opcode::Error,
            Request::Access { .. } => Opcode::Access,
            Request::Statfs { .. } => Opcode::Statfs,
            Request::Fgetattr { .. } => Opcode::Fgetattr,
            Request::Getattr { .. } => Opcode::Getattr,
            Request::Flush { .. } => Opcode::Flush,
            Request::Fsync { .. } => Opcode::Fsync,
            Request::Fsyncdir { .. } => Opcode::Fsyncdir,
            Request::Readdir { .. } => Opcode::Readdir,
            Request::Truncate { .. } => Opcode::Truncate,
            Request::Ftruncate { .. } => Opcode::Ftruncate,
            Request::Utimens { .. } => Opcode::Utimens,
            Request::Readlink { .. } => Opcode::Readlink,
            Request::Chown { .. } => Opcode::Chown,
            Request::Chmod { .. } => Opcode::Chmod,
            Request::Mknod { .. } => Opcode::Mknod,
            Request::Setxattr { .. } => Opcode::Setxattr,
            Request::Getxattr { .. } => Opcode::Getxattr,
            Request::Listxattr { .. } => Opcode::Listxattr,
            Request::Removexattr { .. } => Opcode::Removexattr,
            Request::Open { .. } => Opcode::Open,
            Request::Opendir { .. } => Opcode::Opendir,
            Request::Read { .. } => Opcode::Read,
            Request::Write { .. } => Opcode::Write,
            Request::Release { .. } => Opcode::Release,
            Request::Releasedir { .. } => Opcode::Releasedir,
            Request::Create { .. } => Opcode::Create,
            Request::Unlink { .. } => Opcode::Unlink,
            Request::Rename { .. } => Opcode::Rename,
            Request::Link { .. } => Opcode::Link,
            Request::Symlink { .. } => Opcode::Symlink,
            Request::Mkdir { .. } => Opcode::Mkdir,
            Request::Rmdir { .. } => Opcode::Rmdir,
        }
    }

    /// The buffer the native layer lent for this call, if any.
    pub fn loaned_buffer(&self) -> Option<LoanedBuffer> {
        match self {
            Request::Read { buf, .. } | Request::Write { buf, .. } => Some(buf.clone()),
            Request::Setxattr { value, .. } | Request::Getxattr { value, .. } => {
                Some(value.clone())
            }
            Request::Listxattr { list, .. } => Some(list.clone()),
            _ => None,
        }
    }

    /// The primary path argument, for logging.
    pub fn path(&self) -> Option<&str> {
        match self {
            Request::Init | Request::Error => None,
            Request::Rename { src, .. }
            | Request::Link { src, .. }
            | Request::Symlink { src, .. } => Some(src),
            Request::Access { path, .. }
            | Request::Statfs { path }
            | Request::Fgetattr { path, .. }
            | Request::Getattr { path }
            | Request::Flush { path, .. }
            | Request::Fsync { path, .. }
            | Request::Fsyncdir { path, .. }
            | Request::Readdir { path }
            | Request::Truncate { path, .. }
            | Request::Ftruncate { path, .. }
            | Request::Utimens { path, .. }
            | Request::Readlink { path }
            | Request::Chown { path, .. }
            | Request::Chmod { path, .. }
            | Request::Mknod { path, .. }
            | Request::Setxattr { path, .. }
            | Request::Getxattr { path, .. }
            | Request::Listxattr { path, .. }
            | Request::Removexattr { path, .. }
            | Request::Open { path, .. }
            | Request::Opendir { path, .. }
            | Request::Read { path, .. }
            | Request::Write { path, .. }
            | Request::Release { path, .. }
            | Request::Releasedir { path, .. }
            | Request::Create { path, .. }
            | Request::Unlink { path }
            | Request::Mkdir { path, .. }
            | Request::Rmdir { path } => Some(path),
        }
    }
}
