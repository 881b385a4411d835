/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

pub mod local;
pub mod read_only;
pub mod webdav;

use chrono::{DateTime, Utc};

/// One directory entry as seen by a [`FileSystem`] provider.
///
/// Change detection compares the full tuple; directory pairing matches
/// entries by `name` only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub parent: String,
    pub name: String,
    pub is_dir: bool,
    /// Last modification time, UTC, second resolution.
    pub modified: DateTime<Utc>,
    pub size: u64,
    /// Set when the entry could not be fully stat'ed (kept in listings
    /// instead of failing the whole directory).
    pub locked: bool,
}

/// Uniform capability over one side of a sync pair.
///
/// Handles are not assumed thread-safe; workers get independent handles
/// via [`FileSystem::clone_box`].
pub trait FileSystem: Send {
    fn is_read_only(&self) -> bool {
        false
    }

    /// Children of `dir`, excluding `dir` itself.
    fn list(&self, dir: &str) -> anyhow::Result<Vec<FsEntry>>;

    /// Entry for `path`, `None` if it does not exist.
    fn entry(&self, path: &str) -> anyhow::Result<Option<FsEntry>>;

    fn read_file(&self, path: &str) -> anyhow::Result<Vec<u8>>;

    /// Creates or replaces. A no-op on a read-only provider.
    fn write_file(&self, path: &str, content: &[u8]) -> anyhow::Result<()>;

    /// Idempotent: deleting an absent file is success.
    fn delete_file(&self, path: &str) -> anyhow::Result<()>;

    fn create_dir(&self, path: &str) -> anyhow::Result<()>;

    /// Recursive and idempotent.
    fn delete_dir(&self, path: &str) -> anyhow::Result<()>;

    fn is_file(&self, path: &str) -> anyhow::Result<bool>;

    fn exists(&self, path: &str) -> anyhow::Result<bool>;

    fn build_path(&self, dir: &str, name: &str) -> String;

    fn clone_box(&self) -> Box<dyn FileSystem>;
}

impl Clone for Box<dyn FileSystem> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
