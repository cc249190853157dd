// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

#![allow(dead_code)]

use async_trait::async_trait;
use fuse_bridge_core::{
    Dispatcher, MountRequest, NativeError, NativeReply, NativeTransport, Opcode, ReplyValue,
    Request, ThreadControl, Unmounter,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type Reply = (i32, Vec<ReplyValue>);

/// Native reply function that forwards every delivery to a channel.
pub fn recorder() -> (NativeReply, mpsc::UnboundedReceiver<Reply>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let reply: NativeReply = Box::new(move |code, values| {
        let _ = tx.send((code, values));
    });
    (reply, rx)
}

/// Dispatch one request and wait for its reply.
pub async fn call(dispatcher: &Dispatcher, request: Request) -> Reply {
    let (reply, mut rx) = recorder();
    dispatcher.dispatch(reply, request);
    rx.recv().await.expect("reply delivered")
}

/// In-process stand-in for the native layer. Mounting keeps the dispatch
/// table and immediately sends the init handshake.
#[derive(Default)]
pub struct LoopbackTransport {
    mounted: Mutex<Option<(PathBuf, String, Arc<Dispatcher>)>>,
    pub unmounts: AtomicUsize,
}

impl LoopbackTransport {
    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.lock().as_ref().map(|(_, _, dispatcher)| Arc::clone(dispatcher))
    }

    pub fn options(&self) -> Option<String> {
        self.lock().as_ref().map(|(_, options, _)| options.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(PathBuf, String, Arc<Dispatcher>)>> {
        self.mounted.lock().unwrap()
    }
}

impl NativeTransport for LoopbackTransport {
    fn thread_control_size(&self) -> usize {
        128
    }

    fn has_signal(&self, _op: Opcode) -> bool {
        true
    }

    fn mount(&self, request: MountRequest) -> Result<(), NativeError> {
        if request.implemented[Opcode::Init.index()] != 1 {
            return Err(NativeError::Mount("init missing from implemented bitmap".into()));
        }
        request
            .dispatcher
            .dispatch(Box::new(|_, _| {}), Request::Init);
        *self.lock() = Some((request.path, request.options, request.dispatcher));
        Ok(())
    }

    fn unmount(&self, path: &Path, thread: &ThreadControl) -> Result<(), NativeError> {
        let mut mounted = self.lock();
        match mounted.as_ref() {
            Some((mounted_at, _, _)) if mounted_at == path && thread.size() == 128 => {
                *mounted = None;
                self.unmounts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(NativeError::Unmount(format!("{} is not mounted", path.display()))),
        }
    }
}

/// Platform unmounter that records calls instead of running a command.
/// Clones share the call log.
#[derive(Clone, Default)]
pub struct RecordingUnmounter {
    calls: Arc<Mutex<Vec<PathBuf>>>,
    fail: bool,
}

impl RecordingUnmounter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Unmounter for RecordingUnmounter {
    async fn unmount(&self, path: &Path) -> io::Result<()> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        if self.fail {
            return Err(io::Error::other("device busy"));
        }
        Ok(())
    }
}
