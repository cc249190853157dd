// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mount and unmount lifecycle
//!
//! [`FuseMount`] validates the mount point, hands the dispatch table to the
//! native transport and waits for the init handshake. Unmounting always runs
//! the platform unmount command before the native unmount call.

use crate::buffer::ThreadControl;
use crate::config::MountConfig;
use crate::dispatch::Dispatcher;
use crate::error::{LifecycleError, NativeError};
use crate::ops::Operations;
use crate::registry::{Opcode, OPCODE_SLOTS};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Path inside the mount point probed for a stale mount.
const PROBE_ENTRY: &str = "test";

/// Everything the native mount call needs.
pub struct MountRequest {
    pub path: PathBuf,
    /// `-o...` option string, possibly empty.
    pub options: String,
    pub thread: ThreadControl,
    pub implemented: [u32; OPCODE_SLOTS],
    pub dispatcher: Arc<Dispatcher>,
}

/// The native FUSE layer.
#[cfg_attr(test, mockall::automock)]
pub trait NativeTransport: Send + Sync {
    /// Bytes to allocate for the per-mount thread control block.
    fn thread_control_size(&self) -> usize;

    /// Whether the transport has a signal entry point for `op`.
    fn has_signal(&self, op: Opcode) -> bool;

    fn mount(&self, request: MountRequest) -> Result<(), NativeError>;

    fn unmount(&self, path: &Path, thread: &ThreadControl) -> Result<(), NativeError>;
}

/// Platform-level mount point maintenance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Unmounter: Send + Sync {
    /// Force the mount at `path` off, even if its owner is gone.
    async fn unmount(&self, path: &Path) -> io::Result<()>;

    /// Whether `mountpoint` shows the signature of a dead mount.
    async fn is_stale(&self, mountpoint: &Path) -> bool {
        probe_stale(mountpoint).await
    }
}

/// Runs the OS unmount utility: `fusermount -uz` on Linux, `diskutil
/// unmount force` on macOS.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandUnmounter;

impl CommandUnmounter {
    #[cfg(target_os = "macos")]
    fn command(path: &Path) -> Command {
        let mut command = Command::new("diskutil");
        command.args(["unmount", "force"]).arg(path);
        command
    }

    #[cfg(not(target_os = "macos"))]
    fn command(path: &Path) -> Command {
        let mut command = Command::new("fusermount");
        command.arg("-uz").arg(path);
        command
    }
}

#[async_trait]
impl Unmounter for CommandUnmounter {
    async fn unmount(&self, path: &Path) -> io::Result<()> {
        let output = Self::command(path).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::other(format!(
                "unmount of {} failed: {}",
                path.display(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Forced platform unmount, usable without a [`FuseMount`].
pub async fn force_unmount(path: &Path) -> io::Result<()> {
    CommandUnmounter.unmount(path).await
}

/// True when a lookup inside `mountpoint` fails with `ENOTCONN` or `ENXIO`,
/// the errors a mount whose server has exited reports.
pub async fn probe_stale(mountpoint: &Path) -> bool {
    match tokio::fs::metadata(mountpoint.join(PROBE_ENTRY)).await {
        Ok(_) => false,
        Err(err) => is_stale_error(&err),
    }
}

fn is_stale_error(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOTCONN) | Some(libc::ENXIO))
}

/// Absolute form of `path` with `.` and `..` collapsed lexically. Symlinks
/// are left alone.
pub fn resolve_mountpoint(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    Ok(resolved)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Opening,
    Closing,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MountState {
    #[default]
    Idle,
    Opening,
    Mounted,
    Closing,
    Unmounted,
    Failed {
        phase: Phase,
    },
}

impl MountState {
    pub fn name(self) -> &'static str {
        match self {
            MountState::Idle => "idle",
            MountState::Opening => "opening",
            MountState::Mounted => "mounted",
            MountState::Closing => "closing",
            MountState::Unmounted => "unmounted",
            MountState::Failed {
                phase: Phase::Opening,
            } => "failed while opening",
            MountState::Failed {
                phase: Phase::Closing,
            } => "failed while closing",
        }
    }
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct FuseMount<T: NativeTransport, U: Unmounter = CommandUnmounter> {
    mountpoint: PathBuf,
    config: MountConfig,
    transport: T,
    unmounter: U,
    dispatcher: Arc<Dispatcher>,
    thread: Option<ThreadControl>,
    state: MountState,
}

impl<T: NativeTransport> FuseMount<T> {
    /// Must be called inside a tokio runtime.
    pub fn new(
        mountpoint: impl AsRef<Path>,
        ops: Arc<dyn Operations>,
        config: MountConfig,
        transport: T,
    ) -> Result<Self, LifecycleError> {
        let mountpoint = resolve_mountpoint(mountpoint.as_ref()).map_err(LifecycleError::Stat)?;
        let dispatcher =
            Dispatcher::with_signals(ops, &config.timeout, |op| transport.has_signal(op))?;
        Ok(Self {
            mountpoint,
            config,
            transport,
            unmounter: CommandUnmounter,
            dispatcher: Arc::new(dispatcher),
            thread: None,
            state: MountState::Idle,
        })
    }
}

impl<T: NativeTransport, U: Unmounter> FuseMount<T, U> {
    pub fn with_unmounter<V: Unmounter>(self, unmounter: V) -> FuseMount<T, V> {
        FuseMount {
            mountpoint: self.mountpoint,
            config: self.config,
            transport: self.transport,
            unmounter,
            dispatcher: self.dispatcher,
            thread: self.thread,
            state: self.state,
        }
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn state(&self) -> MountState {
        self.state
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mount and wait for the init handshake.
    pub async fn mount(&mut self) -> Result<(), LifecycleError> {
        match self.state {
            MountState::Idle
            | MountState::Unmounted
            | MountState::Failed {
                phase: Phase::Opening,
            } => {}
            state => {
                return Err(LifecycleError::InvalidState {
                    action: "mount",
                    state: state.name(),
                })
            }
        }
        self.state = MountState::Opening;
        match self.open().await {
            Ok(()) => {
                self.state = MountState::Mounted;
                info!(
                    target: "fuse_bridge::lifecycle",
                    mountpoint = %self.mountpoint.display(),
                    "mounted"
                );
                Ok(())
            }
            Err(err) => {
                self.state = MountState::Failed {
                    phase: Phase::Opening,
                };
                Err(err)
            }
        }
    }

    async fn open(&mut self) -> Result<(), LifecycleError> {
        if self.config.force && self.unmounter.is_stale(&self.mountpoint).await {
            warn!(
                target: "fuse_bridge::lifecycle",
                mountpoint = %self.mountpoint.display(),
                "stale mount detected; forcing unmount"
            );
            if let Err(err) = self.unmounter.unmount(&self.mountpoint).await {
                warn!(
                    target: "fuse_bridge::lifecycle",
                    mountpoint = %self.mountpoint.display(),
                    error = %err,
                    "forced unmount failed; mounting anyway"
                );
            }
        }

        let metadata = self.ensure_mountpoint().await?;
        if !metadata.is_dir() {
            return Err(LifecycleError::NotADirectory);
        }
        if let Ok(parent) = tokio::fs::metadata(self.mountpoint.join("..")).await {
            if parent.dev() != metadata.dev() {
                return Err(LifecycleError::InUse);
            }
        }

        let thread = ThreadControl::allocate(self.transport.thread_control_size());
        let options = self.config.option_string(&self.mountpoint);
        debug!(
            target: "fuse_bridge::lifecycle",
            mountpoint = %self.mountpoint.display(),
            options = %options,
            "calling native mount"
        );

        let (init_tx, init_rx) = oneshot::channel();
        self.dispatcher.on_init(init_tx);
        self.transport.mount(MountRequest {
            path: self.mountpoint.clone(),
            options,
            thread: thread.clone(),
            implemented: self.dispatcher.implemented_bitmap(),
            dispatcher: Arc::clone(&self.dispatcher),
        })?;
        self.thread = Some(thread);

        init_rx.await.map_err(|_| LifecycleError::InitAborted)
    }

    async fn ensure_mountpoint(&self) -> Result<std::fs::Metadata, LifecycleError> {
        match tokio::fs::metadata(&self.mountpoint).await {
            Ok(metadata) => Ok(metadata),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if !self.config.mkdir {
                    return Err(LifecycleError::MountpointMissing);
                }
                tokio::fs::create_dir_all(&self.mountpoint)
                    .await
                    .map_err(LifecycleError::CreateDir)?;
                info!(
                    target: "fuse_bridge::lifecycle",
                    mountpoint = %self.mountpoint.display(),
                    "created mountpoint"
                );
                tokio::fs::metadata(&self.mountpoint)
                    .await
                    .map_err(LifecycleError::Stat)
            }
            Err(err) => Err(LifecycleError::Stat(err)),
        }
    }

    /// Run the platform unmount, then release the native session.
    pub async fn unmount(&mut self) -> Result<(), LifecycleError> {
        match self.state {
            MountState::Mounted
            | MountState::Failed {
                phase: Phase::Closing,
            } => {}
            state => {
                return Err(LifecycleError::InvalidState {
                    action: "unmount",
                    state: state.name(),
                })
            }
        }
        self.state = MountState::Closing;
        let failed = MountState::Failed {
            phase: Phase::Closing,
        };

        if let Err(err) = self.unmounter.unmount(&self.mountpoint).await {
            self.state = failed;
            return Err(LifecycleError::Unmount(err));
        }

        let thread = match &self.thread {
            Some(thread) => thread.clone(),
            None => ThreadControl::allocate(self.transport.thread_control_size()),
        };
        if let Err(err) = self.transport.unmount(&self.mountpoint, &thread) {
            self.state = failed;
            return Err(err.into());
        }

        self.thread = None;
        self.state = MountState::Unmounted;
        info!(
            target: "fuse_bridge::lifecycle",
            mountpoint = %self.mountpoint.display(),
            "unmounted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errno::OpResult;
    use crate::request::Request;
    use tempfile::TempDir;

    struct NoOps;

    #[async_trait]
    impl Operations for NoOps {
        fn provided(&self) -> Vec<Opcode> {
            Vec::new()
        }
    }

    struct InitCounter(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl Operations for InitCounter {
        fn provided(&self) -> Vec<Opcode> {
            vec![Opcode::Init]
        }

        async fn init(&self) -> OpResult<()> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    fn transport() -> MockNativeTransport {
        let mut transport = MockNativeTransport::new();
        transport.expect_has_signal().returning(|_| true);
        transport.expect_thread_control_size().returning(|| 64);
        transport
    }

    /// A transport whose mount immediately delivers the init handshake.
    fn mounting_transport() -> MockNativeTransport {
        let mut transport = transport();
        transport.expect_mount().times(1).returning(|request| {
            assert_eq!(request.thread.size(), 64);
            request
                .dispatcher
                .dispatch(Box::new(|_, _| {}), Request::Init);
            Ok(())
        });
        transport
    }

    fn healthy_unmounter() -> MockUnmounter {
        let mut unmounter = MockUnmounter::new();
        unmounter.expect_is_stale().returning(|_| false);
        unmounter
    }

    #[tokio::test]
    async fn missing_mountpoint_fails_before_native_mount() {
        let dir = TempDir::new().unwrap();
        let mut transport = transport();
        transport.expect_mount().times(0);
        let mut mount = FuseMount::new(
            dir.path().join("absent"),
            Arc::new(NoOps),
            MountConfig::default(),
            transport,
        )
        .unwrap()
        .with_unmounter(healthy_unmounter());

        let err = mount.mount().await.unwrap_err();
        assert!(matches!(err, LifecycleError::MountpointMissing));
        assert_eq!(err.to_string(), "Mountpoint does not exist");
        assert!(err.is_mountpoint_problem());
        assert_eq!(
            mount.state(),
            MountState::Failed {
                phase: Phase::Opening
            }
        );
    }

    #[tokio::test]
    async fn mkdir_creates_mountpoint_and_waits_for_init() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/mnt");
        let ops = Arc::new(InitCounter(Default::default()));
        let config = MountConfig {
            mkdir: true,
            ..MountConfig::default()
        };
        let mut mount = FuseMount::new(&target, ops.clone(), config, mounting_transport())
            .unwrap()
            .with_unmounter(healthy_unmounter());

        mount.mount().await.unwrap();
        assert!(target.is_dir());
        assert_eq!(ops.0.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(mount.state(), MountState::Mounted);
        assert!(matches!(
            mount.mount().await,
            Err(LifecycleError::InvalidState { action: "mount", .. })
        ));
    }

    #[tokio::test]
    async fn regular_file_is_not_a_mountpoint() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let mut transport = transport();
        transport.expect_mount().times(0);
        let mut mount = FuseMount::new(&file, Arc::new(NoOps), MountConfig::default(), transport)
            .unwrap()
            .with_unmounter(healthy_unmounter());

        assert!(matches!(mount.mount().await, Err(LifecycleError::NotADirectory)));
    }

    #[tokio::test]
    async fn force_clears_stale_mount_even_when_unmount_fails() {
        let dir = TempDir::new().unwrap();
        let mut unmounter = MockUnmounter::new();
        unmounter.expect_is_stale().times(1).returning(|_| true);
        unmounter
            .expect_unmount()
            .times(1)
            .returning(|_| Err(io::Error::other("not mounted")));
        let config = MountConfig {
            force: true,
            ..MountConfig::default()
        };
        let mut mount = FuseMount::new(dir.path(), Arc::new(NoOps), config, mounting_transport())
            .unwrap()
            .with_unmounter(unmounter);

        mount.mount().await.unwrap();
        assert_eq!(mount.state(), MountState::Mounted);
    }

    #[tokio::test]
    async fn unmount_failure_skips_native_unmount() {
        let dir = TempDir::new().unwrap();
        let mut transport = mounting_transport();
        transport.expect_unmount().times(0);
        let mut unmounter = healthy_unmounter();
        unmounter
            .expect_unmount()
            .times(1)
            .returning(|_| Err(io::Error::other("device busy")));
        let mut mount = FuseMount::new(
            dir.path(),
            Arc::new(NoOps),
            MountConfig::default(),
            transport,
        )
        .unwrap()
        .with_unmounter(unmounter);

        mount.mount().await.unwrap();
        let err = mount.unmount().await.unwrap_err();
        assert!(err.is_unmount_failure());
        assert!(!err.is_native_failure());
        assert_eq!(
            mount.state(),
            MountState::Failed {
                phase: Phase::Closing
            }
        );
    }

    #[tokio::test]
    async fn unmount_releases_native_session_after_platform_unmount() {
        let dir = TempDir::new().unwrap();
        let mut transport = mounting_transport();
        transport
            .expect_unmount()
            .times(1)
            .returning(|_, thread| {
                assert_eq!(thread.size(), 64);
                Ok(())
            });
        let mut unmounter = healthy_unmounter();
        unmounter.expect_unmount().times(1).returning(|_| Ok(()));
        let mut mount = FuseMount::new(
            dir.path(),
            Arc::new(NoOps),
            MountConfig::default(),
            transport,
        )
        .unwrap()
        .with_unmounter(unmounter);

        mount.mount().await.unwrap();
        mount.unmount().await.unwrap();
        assert_eq!(mount.state(), MountState::Unmounted);
    }

    #[tokio::test]
    async fn unmount_requires_a_mount() {
        let dir = TempDir::new().unwrap();
        let mut mount = FuseMount::new(
            dir.path(),
            Arc::new(NoOps),
            MountConfig::default(),
            transport(),
        )
        .unwrap()
        .with_unmounter(healthy_unmounter());
        let err = mount.unmount().await.unwrap_err();
        assert_eq!(err.to_string(), "cannot unmount while idle");
        assert_eq!(mount.state(), MountState::Idle);
    }

    #[tokio::test]
    async fn force_leaves_a_healthy_mountpoint_alone() {
        let dir = TempDir::new().unwrap();
        let mut unmounter = MockUnmounter::new();
        unmounter.expect_is_stale().times(1).returning(|_| false);
        unmounter.expect_unmount().times(0);
        let config = MountConfig {
            force: true,
            ..MountConfig::default()
        };
        let mut mount = FuseMount::new(dir.path(), Arc::new(NoOps), config, mounting_transport())
            .unwrap()
            .with_unmounter(unmounter);

        mount.mount().await.unwrap();
        assert_eq!(mount.state(), MountState::Mounted);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn mountpoint_on_another_device_is_in_use() {
        let mut transport = transport();
        transport.expect_mount().times(0);
        let mut mount = FuseMount::new("/proc", Arc::new(NoOps), MountConfig::default(), transport)
            .unwrap()
            .with_unmounter(healthy_unmounter());

        let err = mount.mount().await.unwrap_err();
        assert!(matches!(err, LifecycleError::InUse));
        assert!(err.is_mountpoint_problem());
        assert_eq!(
            mount.state(),
            MountState::Failed {
                phase: Phase::Opening
            }
        );
    }

    #[tokio::test]
    async fn probe_of_healthy_directory_is_not_stale() {
        let dir = TempDir::new().unwrap();
        assert!(!probe_stale(dir.path()).await);
    }

    #[test]
    fn disconnected_lookups_mark_a_mount_stale() {
        assert!(is_stale_error(&io::Error::from_raw_os_error(libc::ENOTCONN)));
        assert!(is_stale_error(&io::Error::from_raw_os_error(libc::ENXIO)));
        assert!(!is_stale_error(&io::Error::from_raw_os_error(libc::ENOENT)));
        assert!(!is_stale_error(&io::Error::other("no errno")));
    }

    #[tokio::test]
    async fn mountpoint_path_is_normalized() {
        let dir = TempDir::new().unwrap();
        let mount = FuseMount::new(
            dir.path().join("a/./../b"),
            Arc::new(NoOps),
            MountConfig::default(),
            transport(),
        )
        .unwrap();
        assert_eq!(mount.mountpoint(), dir.path().join("b"));
        assert_eq!(
            resolve_mountpoint(Path::new("/../x/..")).unwrap(),
            PathBuf::from("/")
        );
    }
}
