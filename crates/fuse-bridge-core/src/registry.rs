// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Operation registry
//!
//! The single table of supported filesystem operations: their names, the
//! opcode the native transport uses for them, and the reply values used when
//! the operation is unimplemented, fails without values, or times out.
//! Adding an operation means adding one [`Opcode`] variant, one row in
//! [`REGISTRY`], one [`crate::Request`] variant and one dispatch arm.

use crate::codec::{StatView, StatfsView};
use crate::reply::ReplyValue;
use std::fmt;

/// Size of the implemented-opcode bitmap handed to the native layer.
pub const OPCODE_SLOTS: usize = 35;

/// Native opcode of a filesystem operation. Discriminants are the wire values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    Init = 0,
    Error = 1,
    Access = 2,
    Statfs = 3,
    Fgetattr = 4,
    Getattr = 5,
    Flush = 6,
    Fsync = 7,
    Fsyncdir = 8,
    Readdir = 9,
    Truncate = 10,
    Ftruncate = 11,
    Utimens = 12,
    Readlink = 13,
    Chown = 14,
    Chmod = 15,
    Mknod = 16,
    Setxattr = 17,
    Getxattr = 18,
    Listxattr = 19,
    Removexattr = 20,
    Open = 21,
    Opendir = 22,
    Read = 23,
    Write = 24,
    Release = 25,
    Releasedir = 26,
    Create = 27,
    Unlink = 28,
    Rename = 29,
    Link = 30,
    Symlink = 31,
    Mkdir = 32,
    Rmdir = 33,
}

/// Default reply value. Kept separate from [`ReplyValue`] so the table can
/// be a `static`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultValue {
    Int(i64),
    Stat,
    Statfs,
    EmptyNames,
    EmptyStats,
    EmptyString,
}

impl DefaultValue {
    pub fn to_reply(self) -> ReplyValue {
        match self {
            DefaultValue::Int(n) => ReplyValue::Int(n),
            DefaultValue::Stat => ReplyValue::Stat(StatView::ZEROED),
            DefaultValue::Statfs => ReplyValue::Statfs(StatfsView::ZEROED),
            DefaultValue::EmptyNames => ReplyValue::Names(Vec::new()),
            DefaultValue::EmptyStats => ReplyValue::Stats(Vec::new()),
            DefaultValue::EmptyString => ReplyValue::Str(String::new()),
        }
    }
}

/// Immutable description of one operation.
#[derive(Debug, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub opcode: Opcode,
    pub name: &'static str,
    /// `None` means replies for this operation are forwarded untouched.
    pub defaults: Option<&'static [DefaultValue]>,
}

impl OperationDescriptor {
    /// Materialize the default reply values (empty when there are none).
    pub fn default_values(&self) -> Vec<ReplyValue> {
        self.defaults
            .map(|values| values.iter().map(|v| v.to_reply()).collect())
            .unwrap_or_default()
    }
}

const fn op(
    opcode: Opcode,
    name: &'static str,
    defaults: Option<&'static [DefaultValue]>,
) -> OperationDescriptor {
    OperationDescriptor {
        opcode,
        name,
        defaults,
    }
}

const ZERO: Option<&'static [DefaultValue]> = Some(&[DefaultValue::Int(0)]);

/// Every operation, in opcode order. `REGISTRY[op as usize].opcode == op`.
pub static REGISTRY: [OperationDescriptor; 34] = [
    op(Opcode::Init, "init", None),
    op(Opcode::Error, "error", None),
    op(Opcode::Access, "access", ZERO),
    op(Opcode::Statfs, "statfs", Some(&[DefaultValue::Statfs])),
    op(Opcode::Fgetattr, "fgetattr", Some(&[DefaultValue::Stat])),
    op(Opcode::Getattr, "getattr", Some(&[DefaultValue::Stat])),
    op(Opcode::Flush, "flush", None),
    op(Opcode::Fsync, "fsync", None),
    op(Opcode::Fsyncdir, "fsyncdir", None),
    op(
        Opcode::Readdir,
        "readdir",
        Some(&[DefaultValue::EmptyNames, DefaultValue::EmptyStats]),
    ),
    op(Opcode::Truncate, "truncate", None),
    op(Opcode::Ftruncate, "ftruncate", None),
    op(Opcode::Utimens, "utimens", None),
    op(Opcode::Readlink, "readlink", Some(&[DefaultValue::EmptyString])),
    op(Opcode::Chown, "chown", None),
    op(Opcode::Chmod, "chmod", None),
    op(Opcode::Mknod, "mknod", None),
    op(Opcode::Setxattr, "setxattr", None),
    op(Opcode::Getxattr, "getxattr", None),
    op(Opcode::Listxattr, "listxattr", None),
    op(Opcode::Removexattr, "removexattr", None),
    op(Opcode::Open, "open", ZERO),
    op(Opcode::Opendir, "opendir", ZERO),
    op(Opcode::Read, "read", ZERO),
    op(Opcode::Write, "write", ZERO),
    op(Opcode::Release, "release", None),
    op(Opcode::Releasedir, "releasedir", None),
    op(Opcode::Create, "create", ZERO),
    op(Opcode::Unlink, "unlink", None),
    op(Opcode::Rename, "rename", None),
    op(Opcode::Link, "link", None),
    op(Opcode::Symlink, "symlink", None),
    op(Opcode::Mkdir, "mkdir", None),
    op(Opcode::Rmdir, "rmdir", None),
];

impl Opcode {
    /// All opcodes in registry order.
    pub const ALL: [Opcode; 34] = [
        Opcode::Init,
        Opcode::Error,
        Opcode::Access,
        Opcode::Statfs,
        Opcode::Fgetattr,
        Opcode::Getattr,
        Opcode::Flush,
        Opcode::Fsync,
        Opcode::Fsyncdir,
        Opcode::Readdir,
        Opcode::Truncate,
        Opcode::Ftruncate,
        Opcode::Utimens,
        Opcode::Readlink,
        Opcode::Chown,
        Opcode::Chmod,
        Opcode::Mknod,
        Opcode::Setxattr,
        Opcode::Getxattr,
        Opcode::Listxattr,
        Opcode::Removexattr,
        Opcode::Open,
        Opcode::Opendir,
        Opcode::Read,
        Opcode::Write,
        Opcode::Release,
        Opcode::Releasedir,
        Opcode::Create,
        Opcode::Unlink,
        Opcode::Rename,
        Opcode::Link,
        Opcode::Symlink,
        Opcode::Mkdir,
        Opcode::Rmdir,
    ];

    /// Operations answered even when the caller supplies no handler.
    pub const ALWAYS_IMPLEMENTED: [Opcode; 3] = [Opcode::Init, Opcode::Error, Opcode::Getattr];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Opcode> {
        Opcode::ALL.get(index).copied()
    }

    pub fn descriptor(self) -> &'static OperationDescriptor {
        &REGISTRY[self.index()]
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn from_name(name: &str) -> Option<Opcode> {
        let op = match name {
            "init" => Opcode::Init,
            "error" => Opcode::Error,
            "access" => Opcode::Access,
            "statfs" => Opcode::Statfs,
            "fgetattr" => Opcode::Fgetattr,
            "getattr" => Opcode::Getattr,
            "flush" => Opcode::Flush,
            "fsync" => Opcode::Fsync,
            "fsyncdir" => Opcode::Fsyncdir,
            "readdir" => Opcode::Readdir,
            "truncate" => Opcode::Truncate,
            "ftruncate" => Opcode::Ftruncate,
            "utimens" => Opcode::Utimens,
            "readlink" => Opcode::Readlink,
            "chown" => Opcode::Chown,
            "chmod" => Opcode::Chmod,
            "mknod" => Opcode::Mknod,
            "setxattr" => Opcode::Setxattr,
            "getxattr" => Opcode::Getxattr,
            "listxattr" => Opcode::Listxattr,
            "removexattr" => Opcode::Removexattr,
            "open" => Opcode::Open,
            "opendir" => Opcode::Opendir,
            "read" => Opcode::Read,
            "write" => Opcode::Write,
            "release" => Opcode::Release,
            "releasedir" => Opcode::Releasedir,
            "create" => Opcode::Create,
            "unlink" => Opcode::Unlink,
            "rename" => Opcode::Rename,
            "link" => Opcode::Link,
            "symlink" => Opcode::Symlink,
            "mkdir" => Opcode::Mkdir,
            "rmdir" => Opcode::Rmdir,
            _ => return None,
        };
        Some(op)
    }

    /// Whether requests for this operation carry a loaned buffer.
    pub fn takes_buffer(self) -> bool {
        matches!(
            self,
            Opcode::Read | Opcode::Write | Opcode::Setxattr | Opcode::Getxattr | Opcode::Listxattr
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_indexed_by_opcode() {
        for (idx, desc) in REGISTRY.iter().enumerate() {
            assert_eq!(desc.opcode.index(), idx);
            assert_eq!(Opcode::from_index(idx), Some(desc.opcode));
            assert_eq!(Opcode::from_name(desc.name), Some(desc.opcode));
            assert!(desc.opcode.index() < OPCODE_SLOTS);
        }
        assert_eq!(Opcode::from_index(REGISTRY.len()), None);
        assert_eq!(Opcode::from_name("ioctl"), None);
    }

    #[test]
    fn defaults_follow_reply_shapes() {
        assert_eq!(Opcode::Readdir.descriptor().default_values().len(), 2);
        assert_eq!(
            Opcode::Getattr.descriptor().default_values(),
            vec![ReplyValue::Stat(StatView::ZEROED)]
        );
        assert_eq!(Opcode::Read.descriptor().default_values(), vec![ReplyValue::Int(0)]);
        assert!(Opcode::Unlink.descriptor().defaults.is_none());
        assert!(Opcode::Unlink.descriptor().default_values().is_empty());
    }
}
