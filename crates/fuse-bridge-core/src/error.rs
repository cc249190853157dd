// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for mounting and dispatch

use std::io;
use std::path::PathBuf;

/// Failure reported by a native transport call.
#[derive(thiserror::Error, Debug)]
pub enum NativeError {
    #[error("native mount failed: {0}")]
    Mount(String),
    #[error("native unmount failed: {0}")]
    Unmount(String),
    #[error("native io error: {0}")]
    Io(#[from] io::Error),
}

/// Mount lifecycle error
#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("Mountpoint does not exist")]
    MountpointMissing,
    #[error("Mountpoint is not a directory")]
    NotADirectory,
    #[error("Mountpoint in use")]
    InUse,
    #[error("cannot stat mountpoint: {0}")]
    Stat(#[source] io::Error),
    #[error("cannot create mountpoint: {0}")]
    CreateDir(#[source] io::Error),
    #[error(transparent)]
    Native(#[from] NativeError),
    /// The platform unmount step of a close failed. The native unmount was
    /// not attempted.
    #[error("unmount failed: {0}")]
    Unmount(#[source] io::Error),
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },
    #[error("dispatcher dropped before the init handshake")]
    InitAborted,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl LifecycleError {
    pub fn is_unmount_failure(&self) -> bool {
        matches!(self, LifecycleError::Unmount(_))
    }

    pub fn is_native_failure(&self) -> bool {
        matches!(self, LifecycleError::Native(_) | LifecycleError::InitAborted)
    }

    pub fn is_mountpoint_problem(&self) -> bool {
        matches!(
            self,
            LifecycleError::MountpointMissing
                | LifecycleError::NotADirectory
                | LifecycleError::InUse
                | LifecycleError::Stat(_)
                | LifecycleError::CreateDir(_)
        )
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("no tokio runtime is available to run handlers")]
    NoRuntime,
}

/// Error loading a mount configuration
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
