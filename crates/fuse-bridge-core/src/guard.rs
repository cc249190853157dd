// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Single-fire reply guard racing handler completion against a timer

use crate::buffer::LoanedBuffer;
use crate::errno::{Errno, TIMEOUT_ERRNO};
use crate::registry::Opcode;
use crate::reply::{ReplyValue, Signal};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

struct GuardState {
    op: Opcode,
    signal: Option<Signal>,
    timer: Option<AbortHandle>,
    loaned: Option<LoanedBuffer>,
}

impl Drop for GuardState {
    /// A handler that panicked or was dropped still answers, with `EIO`.
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let Some(signal) = self.signal.take() else {
            return;
        };
        warn!(
            target: "fuse_bridge::dispatch",
            op = self.op.name(),
            "handler ended without replying"
        );
        signal.send(Errno::EIO.code(), timeout_values(self.op, self.loaned.take()));
    }
}

/// Shared between the handler's completion path and the timeout task.
/// Whichever settles first takes the pending reply; the other is a no-op.
/// If every clone is dropped unsettled, the reply is `EIO`.
#[derive(Clone)]
pub struct ReplyGuard {
    op: Opcode,
    state: Arc<Mutex<GuardState>>,
}

impl ReplyGuard {
    /// `loaned` is the buffer the request carried. Synthesized replies hand
    /// it back so the native layer can release it.
    pub fn new(signal: Signal, loaned: Option<LoanedBuffer>) -> Self {
        let op = signal.descriptor().opcode;
        Self {
            op,
            state: Arc::new(Mutex::new(GuardState {
                op,
                signal: Some(signal),
                timer: None,
                loaned,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the timeout race.
    pub fn arm(&self, handle: &Handle, timeout: Duration) {
        let guard = self.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            guard.expire(timeout);
        });
        let mut state = self.lock();
        if state.signal.is_some() {
            state.timer = Some(task.abort_handle());
        } else {
            task.abort();
        }
    }

    /// Settle with the handler's result. Returns `false` when the guard had
    /// already settled, in which case the values are dropped.
    pub fn reply(&self, code: i32, values: Vec<ReplyValue>) -> bool {
        self.reply_with(move || (code, values))
    }

    /// Like [`ReplyGuard::reply`], but builds the reply under the guard's
    /// lock. `fill` may write into the loaned buffer: it runs only while the
    /// reply is still pending, and no timeout can be sent until it returns.
    pub fn reply_with(&self, fill: impl FnOnce() -> (i32, Vec<ReplyValue>)) -> bool {
        let settled = {
            let mut state = self.lock();
            if state.signal.is_none() {
                None
            } else {
                let reply = fill();
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                state.signal.take().map(|signal| (signal, reply))
            }
        };
        match settled {
            Some((signal, (code, values))) => {
                signal.send(code, values);
                true
            }
            None => {
                debug!(
                    target: "fuse_bridge::dispatch",
                    op = self.op.name(),
                    "discarding reply for an operation that already timed out"
                );
                false
            }
        }
    }

    pub fn is_settled(&self) -> bool {
        self.lock().signal.is_none()
    }

    fn expire(&self, timeout: Duration) {
        let pending = {
            let mut state = self.lock();
            state.timer = None;
            let signal = state.signal.take();
            signal.map(|signal| (signal, state.loaned.take()))
        };
        let Some((signal, loaned)) = pending else {
            return;
        };
        warn!(
            target: "fuse_bridge::dispatch",
            op = self.op.name(),
            timeout_ms = timeout.as_millis() as u64,
            "operation timed out"
        );
        signal.send(TIMEOUT_ERRNO, timeout_values(self.op, loaned));
    }
}

/// Values of a synthesized timeout reply. Operations that were lent a
/// buffer hand it back.
pub fn timeout_values(op: Opcode, loaned: Option<LoanedBuffer>) -> Vec<ReplyValue> {
    match (op, loaned) {
        (Opcode::Read | Opcode::Write, Some(buf)) => {
            vec![ReplyValue::Int(0), ReplyValue::Buffer(buf)]
        }
        (Opcode::Setxattr | Opcode::Getxattr | Opcode::Listxattr, Some(buf)) => {
            vec![ReplyValue::Buffer(buf)]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::{NativeReply, ReplyQueue};
    use tokio::sync::mpsc;

    fn signal(op: Opcode) -> (Signal, mpsc::UnboundedReceiver<(i32, Vec<ReplyValue>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let native: NativeReply = Box::new(move |code, values| {
            let _ = tx.send((code, values));
        });
        let queue = ReplyQueue::spawn(&Handle::current());
        (Signal::new(op.descriptor(), native, queue), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn handler_reply_wins_and_cancels_timer() {
        let (signal, mut rx) = signal(Opcode::Open);
        let guard = ReplyGuard::new(signal, None);
        guard.arm(&Handle::current(), Duration::from_millis(50));

        assert!(guard.reply(0, vec![ReplyValue::Int(3)]));
        assert_eq!(rx.recv().await, Some((0, vec![ReplyValue::Int(3)])));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
        assert!(guard.is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_wins_and_late_reply_is_dropped() {
        let (signal, mut rx) = signal(Opcode::Write);
        let buf = LoanedBuffer::new(8);
        let guard = ReplyGuard::new(signal, Some(buf.clone()));
        guard.arm(&Handle::current(), Duration::from_millis(50));

        let (code, values) = rx.recv().await.expect("timeout reply");
        assert_eq!(code, TIMEOUT_ERRNO);
        assert_eq!(values, vec![ReplyValue::Int(0), ReplyValue::Buffer(buf)]);

        assert!(!guard.reply(0, vec![ReplyValue::Int(8)]));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn fill_never_runs_after_timeout() {
        let (signal, mut rx) = signal(Opcode::Getxattr);
        let buf = LoanedBuffer::new(4);
        let guard = ReplyGuard::new(signal, Some(buf.clone()));
        guard.arm(&Handle::current(), Duration::from_millis(50));
        assert_eq!(
            rx.recv().await,
            Some((TIMEOUT_ERRNO, vec![ReplyValue::Buffer(buf.clone())]))
        );

        let sent = guard.reply_with(|| {
            buf.copy_from(b"late");
            (4, vec![ReplyValue::Buffer(buf.clone())])
        });
        assert!(!sent);
        assert_eq!(buf.to_vec(), vec![0; 4]);
    }

    #[tokio::test]
    async fn dropped_guard_replies_eio_with_loan() {
        let (signal, mut rx) = signal(Opcode::Read);
        let buf = LoanedBuffer::new(8);
        let guard = ReplyGuard::new(signal, Some(buf.clone()));
        let clone = guard.clone();
        drop(guard);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        drop(clone);
        assert_eq!(
            rx.recv().await,
            Some((
                Errno::EIO.code(),
                vec![ReplyValue::Int(0), ReplyValue::Buffer(buf)]
            ))
        );
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn timeout_values_return_loaned_buffers() {
        let buf = LoanedBuffer::new(1);
        assert_eq!(
            timeout_values(Opcode::Listxattr, Some(buf.clone())),
            vec![ReplyValue::Buffer(buf.clone())]
        );
        assert!(timeout_values(Opcode::Getattr, None).is_empty());
        assert!(timeout_values(Opcode::Unlink, Some(buf)).is_empty());
    }
}
