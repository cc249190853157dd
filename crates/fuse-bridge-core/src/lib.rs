// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Dispatch core for a native FUSE transport
//!
//! The native layer calls [`Dispatcher::dispatch`] with an opcode-specific
//! [`Request`] and a one-shot reply function. The dispatcher routes the
//! request to the caller's [`Operations`], enforces per-operation timeouts
//! and delivers exactly one marshaled reply on a later scheduler turn.
//! [`FuseMount`] drives the mount point through mount and unmount.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod errno;
pub mod error;
pub mod guard;
pub mod implemented;
pub mod lifecycle;
pub mod ops;
pub mod registry;
pub mod reply;
pub mod request;
pub mod timeout;

pub use buffer::{LoanedBuffer, ThreadControl};
pub use codec::{encode_stat, encode_statfs, FileTime, Stat, StatView, Statfs, StatfsView};
pub use config::MountConfig;
pub use dispatch::Dispatcher;
pub use errno::{Errno, OpResult, NO_XATTR_ERRNO, TIMEOUT_ERRNO};
pub use error::{ConfigError, DispatchError, LifecycleError, NativeError};
pub use implemented::ImplementedSet;
pub use lifecycle::{
    force_unmount, probe_stale, resolve_mountpoint, CommandUnmounter, FuseMount, MountRequest,
    MountState, NativeTransport, Phase, Unmounter,
};
pub use ops::{DirEntry, Operations};
pub use registry::{Opcode, OperationDescriptor, OPCODE_SLOTS, REGISTRY};
pub use reply::{NativeReply, ReplyValue};
pub use request::{Request, Split64};
pub use timeout::{OpTimeout, TimeoutPolicy, DEFAULT_TIMEOUT};
