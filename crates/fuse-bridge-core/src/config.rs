// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mount configuration

use crate::error::ConfigError;
use crate::timeout::TimeoutPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[cfg(target_os = "macos")]
const FOLDER_ICON: &str =
    "/System/Library/CoreServices/CoreTypes.bundle/Contents/Resources/GenericFolderIcon.icns";

/// Options for one mount. Every field is optional in JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub debug: bool,
    pub allow_other: bool,
    pub allow_root: bool,
    pub auto_unmount: bool,
    pub default_permissions: bool,
    pub blkdev: bool,
    pub blksize: Option<u32>,
    pub max_read: Option<u32>,
    pub fd: Option<i32>,
    pub user_id: Option<u32>,
    pub fsname: Option<String>,
    pub subtype: Option<String>,
    pub kernel_cache: bool,
    pub auto_cache: bool,
    pub umask: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Seconds.
    pub entry_timeout: Option<f64>,
    pub attr_timeout: Option<f64>,
    pub negative_timeout: Option<f64>,
    pub ac_attr_timeout: Option<f64>,
    pub noforget: bool,
    pub remember: Option<i64>,
    pub modules: Option<String>,
    /// macOS only: show the mount as a named folder in Finder.
    pub display_folder: bool,
    pub name: Option<String>,
    /// Clear a stale mount before mounting.
    pub force: bool,
    /// Create the mount point when it does not exist.
    pub mkdir: bool,
    pub timeout: TimeoutPolicy,
}

fn non_zero<T: Copy + Default + PartialEq>(value: Option<T>) -> Option<T> {
    value.filter(|v| *v != T::default())
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl MountConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Flatten the enabled options into `-o<opt>,<opt>...`, or an empty
    /// string when none are enabled.
    pub fn option_string(&self, mountpoint: &Path) -> String {
        let mut options: Vec<String> = Vec::new();
        let mut flag = |enabled: bool, name: &str| {
            if enabled {
                options.push(name.to_string());
            }
        };
        flag(self.debug, "debug");
        flag(self.allow_other, "allow_other");
        flag(self.allow_root, "allow_root");
        flag(self.auto_unmount, "auto_unmount");
        flag(self.default_permissions, "default_permissions");
        flag(self.blkdev, "blkdev");

        if let Some(v) = non_zero(self.blksize) {
            options.push(format!("blksize={v}"));
        }
        if let Some(v) = non_zero(self.max_read) {
            options.push(format!("max_read={v}"));
        }
        if let Some(v) = non_zero(self.fd) {
            options.push(format!("fd={v}"));
        }
        if let Some(v) = non_zero(self.user_id) {
            options.push(format!("user_id={v}"));
        }
        if let Some(v) = non_empty(&self.fsname) {
            options.push(format!("fsname={v}"));
        }
        if let Some(v) = non_empty(&self.subtype) {
            options.push(format!("subtype={v}"));
        }
        if self.kernel_cache {
            options.push("kernel_cache".into());
        }
        if self.auto_cache {
            options.push("auto_cache".into());
        }
        if let Some(v) = non_zero(self.umask) {
            options.push(format!("umask={v}"));
        }
        if let Some(v) = non_zero(self.uid) {
            options.push(format!("uid={v}"));
        }
        if let Some(v) = non_zero(self.gid) {
            options.push(format!("gid={v}"));
        }
        if let Some(v) = positive(self.entry_timeout) {
            options.push(format!("entry_timeout={v}"));
        }
        if let Some(v) = positive(self.attr_timeout) {
            options.push(format!("attr_timeout={v}"));
        }
        if let Some(v) = positive(self.negative_timeout) {
            options.push(format!("negative_timeout={v}"));
        }
        if let Some(v) = positive(self.ac_attr_timeout) {
            options.push(format!("ac_attr_timeout={v}"));
        }
        if self.noforget {
            options.push("noforget".into());
        }
        if let Some(v) = non_zero(self.remember) {
            options.push(format!("remember={v}"));
        }
        if let Some(v) = non_empty(&self.modules) {
            options.push(format!("modules={v}"));
        }
        options.extend(self.folder_options(mountpoint));

        if options.is_empty() {
            String::new()
        } else {
            format!("-o{}", options.join(","))
        }
    }

    #[cfg(target_os = "macos")]
    fn folder_options(&self, mountpoint: &Path) -> Vec<String> {
        if !self.display_folder {
            return Vec::new();
        }
        let label = self.name.as_deref().map(Path::new).unwrap_or(mountpoint);
        let volname = label
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut options = vec![format!("volname={volname}")];
        if Path::new(FOLDER_ICON).exists() {
            options.push(format!("volicon={FOLDER_ICON}"));
        }
        options
    }

    #[cfg(not(target_os = "macos"))]
    fn folder_options(&self, _mountpoint: &Path) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Opcode;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_config_has_no_options() {
        assert_eq!(MountConfig::default().option_string(Path::new("/mnt")), "");
    }

    #[test]
    fn options_are_flattened_in_order() {
        let config = MountConfig {
            debug: true,
            allow_other: true,
            max_read: Some(131072),
            user_id: Some(1000),
            fsname: Some("bridge".into()),
            uid: Some(0),
            attr_timeout: Some(1.5),
            negative_timeout: Some(0.0),
            noforget: true,
            ..MountConfig::default()
        };
        assert_eq!(
            config.option_string(Path::new("/mnt")),
            concat!(
                "-odebug,allow_other,max_read=131072,user_id=1000,",
                "fsname=bridge,attr_timeout=1.5,noforget"
            )
        );
    }

    #[test]
    fn load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "allow_other": true, "mkdir": true,
                 "timeout": {{ "default": 500, "read": false }} }}"#
        )
        .unwrap();
        let config = MountConfig::from_json_file(file.path()).unwrap();
        assert!(config.allow_other);
        assert!(config.mkdir);
        assert!(!config.force);
        assert_eq!(config.timeout.resolve(Opcode::Read), None);
        assert_eq!(config.timeout.resolve(Opcode::Open), Some(Duration::from_millis(500)));
    }

    #[test]
    fn load_config_reports_missing_and_malformed_files() {
        let missing = MountConfig::from_json_file(Path::new("/nonexistent/bridge.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
        assert!(matches!(MountConfig::from_json_str("{ nope"), Err(ConfigError::Parse(_))));
    }
}
