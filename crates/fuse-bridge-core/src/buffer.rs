// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Memory shared with the native transport
//!
//! A [`LoanedBuffer`] is lent to one operation and handed back in its reply so
//! the native layer can release it. Clones are handles to the same memory,
//! never copies.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Default)]
pub struct LoanedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl LoanedBuffer {
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bytes)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `src` to the start of the buffer, truncating to its length.
    /// Returns the number of bytes copied.
    pub fn copy_from(&self, src: &[u8]) -> usize {
        let mut guard = self.lock();
        let n = src.len().min(guard.len());
        guard[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Run `f` with mutable access to the loaned bytes.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(self.lock().as_mut_slice())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// True when both handles refer to the same loan.
    pub fn same_loan(&self, other: &LoanedBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for LoanedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoanedBuffer").field("len", &self.len()).finish()
    }
}

/// Two values are equal only when they are the same loan.
impl PartialEq for LoanedBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.same_loan(other)
    }
}

/// Per-mount control block the native layer keeps its session thread state
/// in. Allocated by the lifecycle before mounting and released by the native
/// unmount call.
#[derive(Clone, Debug)]
pub struct ThreadControl(LoanedBuffer);

impl ThreadControl {
    pub fn allocate(size: usize) -> Self {
        ThreadControl(LoanedBuffer::new(size))
    }

    pub fn size(&self) -> usize {
        self.0.len()
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.0.with_mut(f)
    }
}
