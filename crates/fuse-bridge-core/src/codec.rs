// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fixed-width encodings of `stat` and `statfs` metadata
//!
//! The native transport reads metadata as flat arrays of unsigned 32-bit
//! words. Quantities wider than 32 bits (size, block count, timestamps in
//! milliseconds) occupy two adjacent words, low word first.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of words in an encoded `stat`.
pub const STAT_WORDS: usize = 18;

/// Number of words in an encoded `statfs`.
pub const STATFS_WORDS: usize = 11;

const WORD: u64 = 1 << 32;

/// Split a 64-bit value into `(low, high)` 32-bit words.
pub const fn split_u64(value: u64) -> (u32, u32) {
    let low = value % WORD;
    ((low) as u32, ((value - low) / WORD) as u32)
}

/// Inverse of [`split_u64`].
pub const fn combine_u64(low: u32, high: u32) -> u64 {
    low as u64 + high as u64 * WORD
}

/// A timestamp as handlers supply it: raw epoch milliseconds or a clock value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileTime {
    Millis(u64),
    System(SystemTime),
}

impl FileTime {
    /// The Unix epoch, used where "no metadata available" must be signalled.
    pub const EPOCH: FileTime = FileTime::Millis(0);

    pub fn now() -> Self {
        FileTime::System(SystemTime::now())
    }

    /// Milliseconds since the Unix epoch; times before it clamp to zero.
    pub fn as_millis(self) -> u64 {
        match self {
            FileTime::Millis(ms) => ms,
            FileTime::System(t) => t
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }

    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.as_millis())
    }
}

impl From<u64> for FileTime {
    fn from(ms: u64) -> Self {
        FileTime::Millis(ms)
    }
}

impl From<SystemTime> for FileTime {
    fn from(t: SystemTime) -> Self {
        FileTime::System(t)
    }
}

/// POSIX file metadata as returned by `getattr`-style handlers.
///
/// Zero-valued fields encode as zero, except `nlink` which encodes as one.
/// Absent timestamps encode as the time of encoding.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub dev: u64,
    pub nlink: u32,
    pub ino: u64,
    pub rdev: u64,
    pub blksize: u32,
    pub blocks: u64,
    pub atime: Option<FileTime>,
    pub mtime: Option<FileTime>,
    pub ctime: Option<FileTime>,
}

impl Stat {
    /// Directory entry reported for `/` when no `getattr` handler exists.
    pub fn synthetic_root() -> Self {
        Stat {
            mode: libc::S_IFDIR as u32 | 0o755,
            size: 4096,
            atime: Some(FileTime::EPOCH),
            mtime: Some(FileTime::EPOCH),
            ctime: Some(FileTime::EPOCH),
            ..Stat::default()
        }
    }
}

/// Filesystem-wide statistics as returned by `statfs` handlers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statfs {
    pub bsize: u32,
    pub frsize: u32,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u32,
    pub namemax: u32,
}

/// Encoded `stat`: `mode, uid, gid, size(lo,hi), dev, nlink, ino, rdev,
/// blksize, blocks(lo,hi), atime(lo,hi), mtime(lo,hi), ctime(lo,hi)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatView(pub [u32; STAT_WORDS]);

impl StatView {
    /// All fields zero, one link, epoch timestamps: the "no metadata" shape
    /// used for default and error replies.
    pub const ZEROED: StatView = StatView([0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

    pub fn words(&self) -> &[u32; STAT_WORDS] {
        &self.0
    }

    pub fn mode(&self) -> u32 {
        self.0[0]
    }

    pub fn nlink(&self) -> u32 {
        self.0[6]
    }

    pub fn size(&self) -> u64 {
        combine_u64(self.0[3], self.0[4])
    }

    pub fn blocks(&self) -> u64 {
        combine_u64(self.0[10], self.0[11])
    }

    pub fn atime_ms(&self) -> u64 {
        combine_u64(self.0[12], self.0[13])
    }

    pub fn mtime_ms(&self) -> u64 {
        combine_u64(self.0[14], self.0[15])
    }

    pub fn ctime_ms(&self) -> u64 {
        combine_u64(self.0[16], self.0[17])
    }
}

/// Encoded `statfs`: `bsize, frsize, blocks, bfree, bavail, files, ffree,
/// favail, fsid, flag, namemax`, each truncated to 32 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatfsView(pub [u32; STATFS_WORDS]);

impl StatfsView {
    pub const ZEROED: StatfsView = StatfsView([0; STATFS_WORDS]);

    pub fn words(&self) -> &[u32; STATFS_WORDS] {
        &self.0
    }
}

fn put_u64(words: &mut [u32], idx: usize, value: u64) {
    let (low, high) = split_u64(value);
    words[idx] = low;
    words[idx + 1] = high;
}

/// Encode optional metadata. `None` behaves like an all-default [`Stat`].
pub fn encode_stat(stat: Option<&Stat>) -> StatView {
    let default = Stat::default();
    let stat = stat.unwrap_or(&default);
    let time = |t: Option<FileTime>| t.unwrap_or_else(FileTime::now).as_millis();

    let mut words = [0u32; STAT_WORDS];
    words[0] = stat.mode;
    words[1] = stat.uid;
    words[2] = stat.gid;
    put_u64(&mut words, 3, stat.size);
    words[5] = stat.dev as u32;
    words[6] = if stat.nlink == 0 { 1 } else { stat.nlink };
    words[7] = stat.ino as u32;
    words[8] = stat.rdev as u32;
    words[9] = stat.blksize;
    put_u64(&mut words, 10, stat.blocks);
    put_u64(&mut words, 12, time(stat.atime));
    put_u64(&mut words, 14, time(stat.mtime));
    put_u64(&mut words, 16, time(stat.ctime));
    StatView(words)
}

/// Encode optional filesystem statistics. `None` encodes as all zeros.
pub fn encode_statfs(statfs: Option<&Statfs>) -> StatfsView {
    let Some(s) = statfs else {
        return StatfsView::ZEROED;
    };
    StatfsView([
        s.bsize,
        s.frsize,
        s.blocks as u32,
        s.bfree as u32,
        s.bavail as u32,
        s.files as u32,
        s.ffree as u32,
        s.favail as u32,
        s.fsid as u32,
        s.flag,
        s.namemax,
    ])
}
