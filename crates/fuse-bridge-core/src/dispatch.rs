// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Request dispatch
//!
//! The [`Dispatcher`] owns one route per opcode, built once from the
//! registry. A route pairs the handler that decodes the request and calls
//! into [`Operations`] with the timeout resolved for that operation. Every
//! handler runs on its own task and answers through a [`ReplyGuard`], so a
//! native reply is delivered exactly once and never on the dispatching stack.

use crate::buffer::LoanedBuffer;
use crate::codec::{encode_stat, encode_statfs, Stat, StatView};
use crate::error::DispatchError;
use crate::errno::{Errno, OpResult, NO_XATTR_ERRNO};
use crate::guard::ReplyGuard;
use crate::implemented::ImplementedSet;
use crate::ops::Operations;
use crate::registry::{Opcode, OPCODE_SLOTS, REGISTRY};
use crate::reply::{NativeReply, ReplyQueue, ReplyValue, Signal};
use crate::request::Request;
use crate::timeout::TimeoutPolicy;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

/// Room reserved on top of the name list when answering a `listxattr` size
/// query. macOS rejects answers without it.
const LISTXATTR_SLACK: usize = 128;

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type Handler = fn(Arc<Handlers>, ReplyGuard, Request) -> HandlerFuture;

#[derive(Clone, Copy)]
struct Route {
    handler: Handler,
    timeout: Option<Duration>,
}

macro_rules! route {
    ($method:ident) => {{
        let handler: Handler = |handlers, guard, request| {
            Box::pin(async move { handlers.$method(guard, request).await })
        };
        handler
    }};
}

/// Bind the request fields for one opcode, or answer `EINVAL` when the
/// request does not belong to this handler.
///
/// [`Dispatcher::dispatch`] picks the route from the request's own opcode,
/// so the `EINVAL` arm only runs if a route is bound to the wrong handler.
macro_rules! unpack {
    ($request:expr, $guard:expr, $pattern:pat) => {
        let $pattern = $request else {
            return mismatched($guard);
        };
    };
}

fn handler_for(op: Opcode) -> Handler {
    match op {
        Opcode::Init => route!(init),
        Opcode::Error => route!(error),
        Opcode::Access => route!(access),
        Opcode::Statfs => route!(statfs),
        Opcode::Fgetattr => route!(fgetattr),
        Opcode::Getattr => route!(getattr),
        Opcode::Flush => route!(flush),
        Opcode::Fsync => route!(fsync),
        Opcode::Fsyncdir => route!(fsyncdir),
        Opcode::Readdir => route!(readdir),
        Opcode::Truncate => route!(truncate),
        Opcode::Ftruncate => route!(ftruncate),
        Opcode::Utimens => route!(utimens),
        Opcode::Readlink => route!(readlink),
        Opcode::Chown => route!(chown),
        Opcode::Chmod => route!(chmod),
        Opcode::Mknod => route!(mknod),
        Opcode::Setxattr => route!(setxattr),
        Opcode::Getxattr => route!(getxattr),
        Opcode::Listxattr => route!(listxattr),
        Opcode::Removexattr => route!(removexattr),
        Opcode::Open => route!(open),
        Opcode::Opendir => route!(opendir),
        Opcode::Read => route!(read),
        Opcode::Write => route!(write),
        Opcode::Release => route!(release),
        Opcode::Releasedir => route!(releasedir),
        Opcode::Create => route!(create),
        Opcode::Unlink => route!(unlink),
        Opcode::Rename => route!(rename),
        Opcode::Link => route!(link),
        Opcode::Symlink => route!(symlink),
        Opcode::Mkdir => route!(mkdir),
        Opcode::Rmdir => route!(rmdir),
    }
}

pub struct Dispatcher {
    routes: [Option<Route>; OPCODE_SLOTS],
    handlers: Arc<Handlers>,
    queue: ReplyQueue,
    runtime: Handle,
}

impl Dispatcher {
    /// Build a dispatcher on the current tokio runtime with a route for
    /// every registered operation.
    pub fn new(ops: Arc<dyn Operations>, policy: &TimeoutPolicy) -> Result<Self, DispatchError> {
        Self::with_signals(ops, policy, |_| true)
    }

    /// Like [`Dispatcher::new`], routing only the operations the native
    /// transport can signal.
    pub fn with_signals(
        ops: Arc<dyn Operations>,
        policy: &TimeoutPolicy,
        has_signal: impl Fn(Opcode) -> bool,
    ) -> Result<Self, DispatchError> {
        let runtime = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        Ok(Self::with_handle(runtime, ops, policy, has_signal))
    }

    pub fn with_handle(
        runtime: Handle,
        ops: Arc<dyn Operations>,
        policy: &TimeoutPolicy,
        has_signal: impl Fn(Opcode) -> bool,
    ) -> Self {
        let implemented = ImplementedSet::from_provided(ops.provided());
        let mut routes = [None; OPCODE_SLOTS];
        for descriptor in REGISTRY.iter() {
            let op = descriptor.opcode;
            if !has_signal(op) {
                continue;
            }
            routes[op.index()] = Some(Route {
                handler: handler_for(op),
                timeout: policy.resolve(op),
            });
        }
        let queue = ReplyQueue::spawn(&runtime);
        Self {
            routes,
            handlers: Arc::new(Handlers {
                ops,
                implemented,
                init_waiter: Mutex::new(None),
            }),
            queue,
            runtime,
        }
    }

    pub fn implemented(&self) -> &ImplementedSet {
        &self.handlers.implemented
    }

    /// Presence bitmap handed to the native mount call.
    pub fn implemented_bitmap(&self) -> [u32; OPCODE_SLOTS] {
        self.handlers.implemented.to_bitmap()
    }

    /// Resolved timeout for `op`; `None` when it is unrouted or never times out.
    pub fn timeout_for(&self, op: Opcode) -> Option<Duration> {
        self.routes[op.index()].and_then(|route| route.timeout)
    }

    /// Register the sender completed by the next `init` request.
    pub fn on_init(&self, waiter: oneshot::Sender<()>) {
        *self.handlers.lock_init_waiter() = Some(waiter);
    }

    /// Entry point for the native transport. Always returns before `native`
    /// is called.
    pub fn dispatch(&self, native: NativeReply, request: Request) {
        let op = request.opcode();
        let signal = Signal::new(op.descriptor(), native, self.queue.clone());

        let route = match self.routes[op.index()] {
            Some(route) if self.handlers.implemented.contains(op) => route,
            _ => {
                debug!(
                    target: "fuse_bridge::dispatch",
                    op = op.name(),
                    "operation not implemented; replying with defaults"
                );
                signal.send(Errno::EPERM.code(), Vec::new());
                return;
            }
        };

        trace!(
            target: "fuse_bridge::dispatch",
            op = op.name(),
            path = request.path().unwrap_or_default(),
            "dispatching"
        );
        let guard = ReplyGuard::new(signal, request.loaned_buffer());
        if let Some(timeout) = route.timeout {
            guard.arm(&self.runtime, timeout);
        }
        let handlers = Arc::clone(&self.handlers);
        self.runtime.spawn((route.handler)(handlers, guard, request));
    }
}

fn status(result: OpResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(errno) => errno.code(),
    }
}

fn byte_count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn mismatched(guard: ReplyGuard) {
    warn!(target: "fuse_bridge::dispatch", "request routed to the wrong handler");
    guard.reply(Errno::EINVAL.code(), Vec::new());
}

struct Handlers {
    ops: Arc<dyn Operations>,
    implemented: ImplementedSet,
    init_waiter: Mutex<Option<oneshot::Sender<()>>>,
}

impl Handlers {
    fn lock_init_waiter(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<()>>> {
        self.init_waiter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn init(&self, guard: ReplyGuard, _request: Request) {
        let waiter = self.lock_init_waiter().take();
        if let Some(waiter) = waiter {
            info!(target: "fuse_bridge::dispatch", "init handshake received");
            let _ = waiter.send(());
        }
        if !self.implemented.is_provided(Opcode::Init) {
            guard.reply(0, Vec::new());
            return;
        }
        guard.reply(status(self.ops.init().await), Vec::new());
    }

    async fn error(&self, guard: ReplyGuard, _request: Request) {
        if !self.implemented.is_provided(Opcode::Error) {
            guard.reply(0, Vec::new());
            return;
        }
        guard.reply(status(self.ops.error().await), Vec::new());
    }

    async fn access(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Access { path, mode });
        guard.reply(status(self.ops.access(&path, mode).await), Vec::new());
    }

    async fn statfs(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Statfs { path });
        match self.ops.statfs(&path).await {
            Ok(statfs) => guard.reply(0, vec![ReplyValue::Statfs(encode_statfs(Some(&statfs)))]),
            Err(errno) => guard.reply(errno.code(), Vec::new()),
        };
    }

    /// Only `/` gets a synthetic entry when no handler exists.
    fn missing_getattr(&self, guard: ReplyGuard, path: &str) {
        if path == "/" {
            let root = encode_stat(Some(&Stat::synthetic_root()));
            guard.reply(0, vec![ReplyValue::Stat(root)]);
        } else {
            guard.reply(Errno::EPERM.code(), Vec::new());
        }
    }

    async fn getattr(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Getattr { path });
        if !self.implemented.is_provided(Opcode::Getattr) {
            return self.missing_getattr(guard, &path);
        }
        match self.ops.getattr(&path).await {
            Ok(stat) => guard.reply(0, vec![ReplyValue::Stat(encode_stat(Some(&stat)))]),
            Err(errno) => guard.reply(errno.code(), vec![ReplyValue::Stat(StatView::ZEROED)]),
        };
    }

    async fn fgetattr(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Fgetattr { path, fd });
        if !self.implemented.is_provided(Opcode::Fgetattr) {
            return self.missing_getattr(guard, &path);
        }
        match self.ops.fgetattr(&path, fd).await {
            Ok(stat) => guard.reply(0, vec![ReplyValue::Stat(encode_stat(Some(&stat)))]),
            Err(errno) => guard.reply(errno.code(), Vec::new()),
        };
    }

    async fn flush(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Flush { path, fd });
        guard.reply(status(self.ops.flush(&path, fd).await), Vec::new());
    }

    async fn fsync(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Fsync { path, datasync, fd });
        guard.reply(status(self.ops.fsync(&path, datasync, fd).await), Vec::new());
    }

    async fn fsyncdir(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Fsyncdir { path, datasync, fd });
        guard.reply(status(self.ops.fsyncdir(&path, datasync, fd).await), Vec::new());
    }

    async fn readdir(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Readdir { path });
        let entries = match self.ops.readdir(&path).await {
            Ok(entries) => entries,
            Err(errno) => {
                guard.reply(errno.code(), Vec::new());
                return;
            }
        };
        let stats: Vec<StatView> = if entries.iter().any(|entry| entry.stat.is_some()) {
            entries
                .iter()
                .map(|entry| encode_stat(entry.stat.as_ref()))
                .collect()
        } else {
            Vec::new()
        };
        let names = entries.into_iter().map(|entry| entry.name).collect();
        guard.reply(0, vec![ReplyValue::Names(names), ReplyValue::Stats(stats)]);
    }

    async fn truncate(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Truncate { path, size });
        guard.reply(status(self.ops.truncate(&path, size.get()).await), Vec::new());
    }

    async fn ftruncate(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Ftruncate { path, fd, size });
        guard.reply(status(self.ops.ftruncate(&path, fd, size.get()).await), Vec::new());
    }

    async fn utimens(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Utimens { path, atime, mtime });
        let result = self.ops.utimens(&path, atime.get(), mtime.get()).await;
        guard.reply(status(result), Vec::new());
    }

    async fn readlink(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Readlink { path });
        match self.ops.readlink(&path).await {
            Ok(target) => guard.reply(0, vec![ReplyValue::Str(target)]),
            Err(errno) => guard.reply(errno.code(), Vec::new()),
        };
    }

    async fn chown(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Chown { path, uid, gid });
        guard.reply(status(self.ops.chown(&path, uid, gid).await), Vec::new());
    }

    async fn chmod(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Chmod { path, mode });
        guard.reply(status(self.ops.chmod(&path, mode).await), Vec::new());
    }

    async fn mknod(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Mknod { path, mode, dev });
        guard.reply(status(self.ops.mknod(&path, mode, dev).await), Vec::new());
    }

    async fn setxattr(&self, guard: ReplyGuard, request: Request) {
        unpack!(
            request,
            guard,
            Request::Setxattr { path, name, value, position, flags }
        );
        let result = self
            .ops
            .setxattr(&path, &name, value.clone(), position, flags)
            .await;
        guard.reply(status(result), vec![ReplyValue::Buffer(value)]);
    }

    async fn getxattr(&self, guard: ReplyGuard, request: Request) {
        unpack!(
            request,
            guard,
            Request::Getxattr { path, name, value, position }
        );
        let result = self.ops.getxattr(&path, &name, position).await;
        guard.reply_with(|| {
            let code = match result {
                Ok(Some(bytes)) => {
                    value.copy_from(&bytes);
                    byte_count(bytes.len())
                }
                Ok(None) => NO_XATTR_ERRNO,
                Err(errno) => errno.code(),
            };
            (code, vec![ReplyValue::Buffer(value)])
        });
    }

    async fn listxattr(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Listxattr { path, list });
        let names = match self.ops.listxattr(&path).await {
            Ok(names) => names,
            Err(errno) => {
                guard.reply(errno.code(), vec![ReplyValue::Buffer(list)]);
                return;
            }
        };
        let needed: usize = names.iter().map(|name| name.len() + 1).sum();
        guard.reply_with(|| {
            let code = if list.is_empty() {
                byte_count(needed + LISTXATTR_SLACK)
            } else if needed > list.len() {
                Errno::ERANGE.code()
            } else {
                list.with_mut(|bytes| {
                    let mut at = 0;
                    for name in &names {
                        bytes[at..at + name.len()].copy_from_slice(name.as_bytes());
                        at += name.len();
                        bytes[at] = 0;
                        at += 1;
                    }
                });
                byte_count(needed)
            };
            (code, vec![ReplyValue::Buffer(list)])
        });
    }

    async fn removexattr(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Removexattr { path, name });
        guard.reply(status(self.ops.removexattr(&path, &name).await), Vec::new());
    }

    fn reply_handle(guard: ReplyGuard, result: OpResult<u64>) {
        match result {
            Ok(fd) => guard.reply(0, vec![ReplyValue::Int(fd as i64)]),
            Err(errno) => guard.reply(errno.code(), Vec::new()),
        };
    }

    async fn open(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Open { path, flags });
        Self::reply_handle(guard, self.ops.open(&path, flags).await);
    }

    async fn opendir(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Opendir { path, flags });
        Self::reply_handle(guard, self.ops.opendir(&path, flags).await);
    }

    async fn create(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Create { path, mode });
        Self::reply_handle(guard, self.ops.create(&path, mode).await);
    }

    /// Success carries the byte count both as the code and as the first value.
    fn reply_transfer(guard: ReplyGuard, buf: LoanedBuffer, result: OpResult<usize>) {
        let (code, count) = match result {
            Ok(count) => (byte_count(count), count as i64),
            Err(errno) => (errno.code(), 0),
        };
        guard.reply(code, vec![ReplyValue::Int(count), ReplyValue::Buffer(buf)]);
    }

    async fn read(&self, guard: ReplyGuard, request: Request) {
        unpack!(
            request,
            guard,
            Request::Read { path, fd, buf, len, offset }
        );
        let result = self.ops.read(&path, fd, buf.clone(), len, offset.get()).await;
        Self::reply_transfer(guard, buf, result);
    }

    async fn write(&self, guard: ReplyGuard, request: Request) {
        unpack!(
            request,
            guard,
            Request::Write { path, fd, buf, len, offset }
        );
        let result = self.ops.write(&path, fd, buf.clone(), len, offset.get()).await;
        Self::reply_transfer(guard, buf, result);
    }

    async fn release(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Release { path, fd });
        guard.reply(status(self.ops.release(&path, fd).await), Vec::new());
    }

    async fn releasedir(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Releasedir { path, fd });
        guard.reply(status(self.ops.releasedir(&path, fd).await), Vec::new());
    }

    async fn unlink(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Unlink { path });
        guard.reply(status(self.ops.unlink(&path).await), Vec::new());
    }

    async fn rename(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Rename { src, dest });
        guard.reply(status(self.ops.rename(&src, &dest).await), Vec::new());
    }

    async fn link(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Link { src, dest });
        guard.reply(status(self.ops.link(&src, &dest).await), Vec::new());
    }

    async fn symlink(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Symlink { src, dest });
        guard.reply(status(self.ops.symlink(&src, &dest).await), Vec::new());
    }

    async fn mkdir(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Mkdir { path, mode });
        guard.reply(status(self.ops.mkdir(&path, mode).await), Vec::new());
    }

    async fn rmdir(&self, guard: ReplyGuard, request: Request) {
        unpack!(request, guard, Request::Rmdir { path });
        guard.reply(status(self.ops.rmdir(&path).await), Vec::new());
    }
}
