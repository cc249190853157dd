// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Reply values, marshaling, and the deferred reply queue
//!
//! Replies never reach the native layer on the stack that dispatched the
//! request. They are posted to a [`ReplyQueue`] whose pump task calls the
//! native reply function on a later scheduler turn.

use crate::buffer::LoanedBuffer;
use crate::codec::{StatView, StatfsView};
use crate::registry::{OperationDescriptor, Opcode};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// One positional value of a native reply.
#[derive(Clone, Debug, PartialEq)]
pub enum ReplyValue {
    /// A value the handler left out. Trailing ones are stripped.
    Absent,
    Int(i64),
    Stat(StatView),
    Statfs(StatfsView),
    Names(Vec<String>),
    Stats(Vec<StatView>),
    Str(String),
    Buffer(LoanedBuffer),
}

impl ReplyValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ReplyValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&LoanedBuffer> {
        match self {
            ReplyValue::Buffer(buf) => Some(buf),
            _ => None,
        }
    }

    pub fn as_stat(&self) -> Option<&StatView> {
        match self {
            ReplyValue::Stat(view) => Some(view),
            _ => None,
        }
    }
}

/// The native transport's reply function for one invocation: error code
/// first, then the operation-specific values. Consumed on use.
pub type NativeReply = Box<dyn FnOnce(i32, Vec<ReplyValue>) + Send + 'static>;

/// Normalize handler output into the positional values the native reply
/// function expects.
///
/// For operations with configured defaults, trailing [`ReplyValue::Absent`]
/// entries are dropped and, if nothing but the error code is left, the
/// defaults are appended. Operations without defaults pass through as-is.
pub fn marshal(descriptor: &OperationDescriptor, mut values: Vec<ReplyValue>) -> Vec<ReplyValue> {
    let Some(defaults) = descriptor.defaults else {
        return values;
    };
    while matches!(values.last(), Some(ReplyValue::Absent)) {
        values.pop();
    }
    if values.is_empty() {
        values.extend(defaults.iter().map(|value| value.to_reply()));
    }
    values
}

struct PostedReply {
    op: Opcode,
    native: NativeReply,
    code: i32,
    values: Vec<ReplyValue>,
}

/// Queue drained by a single pump task that delivers replies to the native
/// layer one at a time.
#[derive(Clone)]
pub struct ReplyQueue {
    tx: mpsc::UnboundedSender<PostedReply>,
}

impl ReplyQueue {
    /// Start the pump on `handle`. It exits once every queue clone is dropped.
    pub fn spawn(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PostedReply>();
        handle.spawn(async move {
            while let Some(reply) = rx.recv().await {
                trace!(
                    target: "fuse_bridge::reply",
                    op = reply.op.name(),
                    code = reply.code,
                    values = reply.values.len(),
                    "delivering reply"
                );
                (reply.native)(reply.code, reply.values);
            }
        });
        Self { tx }
    }

    fn post(&self, reply: PostedReply) {
        let op = reply.op;
        if self.tx.send(reply).is_err() {
            warn!(
                target: "fuse_bridge::reply",
                op = op.name(),
                "reply queue closed; dropping reply"
            );
        }
    }
}

/// A native reply function bound to its operation and the queue it is
/// delivered through.
pub struct Signal {
    descriptor: &'static OperationDescriptor,
    native: NativeReply,
    queue: ReplyQueue,
}

impl Signal {
    pub fn new(
        descriptor: &'static OperationDescriptor,
        native: NativeReply,
        queue: ReplyQueue,
    ) -> Self {
        Self {
            descriptor,
            native,
            queue,
        }
    }

    pub fn descriptor(&self) -> &'static OperationDescriptor {
        self.descriptor
    }

    /// Marshal and enqueue the reply.
    pub fn send(self, code: i32, values: Vec<ReplyValue>) {
        let values = marshal(self.descriptor, values);
        self.queue.post(PostedReply {
            op: self.descriptor.opcode,
            native: self.native,
            code,
            values,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn trailing_absent_values_are_stripped_then_defaulted() {
        let desc = Opcode::Open.descriptor();
        assert_eq!(marshal(desc, vec![ReplyValue::Absent]), vec![ReplyValue::Int(0)]);
        assert_eq!(marshal(desc, vec![]), vec![ReplyValue::Int(0)]);
        assert_eq!(marshal(desc, vec![ReplyValue::Int(7)]), vec![ReplyValue::Int(7)]);
    }

    #[test]
    fn interior_absent_values_survive() {
        let desc = Opcode::Readdir.descriptor();
        let names = ReplyValue::Names(vec!["a".into()]);
        assert_eq!(
            marshal(desc, vec![ReplyValue::Absent, names.clone(), ReplyValue::Absent]),
            vec![ReplyValue::Absent, names]
        );
    }

    #[test]
    fn operations_without_defaults_pass_through() {
        let desc = Opcode::Unlink.descriptor();
        assert_eq!(marshal(desc, vec![ReplyValue::Absent]), vec![ReplyValue::Absent]);
        assert!(marshal(desc, vec![]).is_empty());
    }

    #[tokio::test]
    async fn replies_are_delivered_after_send_returns() {
        let queue = ReplyQueue::spawn(&Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let sink = Arc::clone(&seen);
        let native: NativeReply = Box::new(move |code, values| {
            sink.lock().unwrap().push((code, values));
            let _ = done_tx.send(());
        });

        Signal::new(Opcode::Access.descriptor(), native, queue).send(-13, vec![]);
        assert!(seen.lock().unwrap().is_empty());

        done_rx.await.expect("reply delivered");
        assert_eq!(*seen.lock().unwrap(), vec![(-13, vec![ReplyValue::Int(0)])]);
    }
}
