/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Persistent baseline of the local side for one sync pair.
//!
//! The store is the arbiter of change direction: a path present on one
//! side only is a fresh creation when the store has no record of it, and
//! a stale leftover when it does.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};

use crate::path::is_subpath;

/// Slack added to every recorded time so that sub-second mtime rounding
/// between heterogeneous filesystems never re-triggers a sync of a file
/// this engine just wrote.
const STORED_TIME_SLACK_SECS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowEntry {
    pub is_dir: bool,
    pub size: u64,
    pub stored_time: DateTime<Utc>,
}

/// Per-pair map local-path -> [`ShadowEntry`], persisted as one blob
/// after every mutation. A crash mid-dump leaves the previous version,
/// which is fine: reconciliation is idempotent against its own baseline.
pub struct ShadowStore {
    blob_path: PathBuf,
    entries: Mutex<HashMap<String, ShadowEntry>>,
}

impl ShadowStore {
    /// Opens (or lazily creates) the store for one (remote, local) pair.
    /// An unreadable blob loads as empty, forcing a full re-baseline.
    pub fn open(remote_root: &str, local_root: &str, state_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(state_dir).with_context(|| {
            format!("failed to create state directory '{}'", state_dir.display())
        })?;
        let blob_path = state_dir.join(blob_name(remote_root, local_root));
        let entries = match fs::read(&blob_path) {
            Ok(bytes) => match bincode::deserialize(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(
                        "discarding unreadable sync state '{}': {}",
                        blob_path.display(),
                        err
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Ok(Self {
            blob_path,
            entries: Mutex::new(entries),
        })
    }

    pub fn entry(&self, path: &str) -> Option<ShadowEntry> {
        self.entries.lock().unwrap().get(path).cloned()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.entries.lock().unwrap().contains_key(path)
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .map(|e| !e.is_dir)
            .unwrap_or(false)
    }

    pub fn all_paths(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    pub fn write_file(&self, path: &str, size: u64) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            path.to_owned(),
            ShadowEntry {
                is_dir: false,
                size,
                stored_time: stored_time(),
            },
        );
        self.persist(&entries)
    }

    pub fn delete_file(&self, path: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.remove(path).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    pub fn create_dir(&self, path: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            path.to_owned(),
            ShadowEntry {
                is_dir: true,
                size: 0,
                stored_time: stored_time(),
            },
        );
        self.persist(&entries)
    }

    /// Drops the directory record and everything below it.
    pub fn delete_dir(&self, path: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|stored, _| stored != path && !is_subpath(path, stored));
        self.persist(&entries)
    }

    fn persist(&self, entries: &HashMap<String, ShadowEntry>) -> anyhow::Result<()> {
        let bytes = bincode::serialize(entries)
            .with_context(|| "failed to serialize sync state")?;
        fs::write(&self.blob_path, bytes).with_context(|| {
            format!("failed to store sync state '{}'", self.blob_path.display())
        })
    }
}

fn blob_name(remote_root: &str, local_root: &str) -> String {
    let mut hasher = Sha224::new();
    hasher.update(local_root.as_bytes());
    hasher.update(remote_root.as_bytes());
    hex::encode(hasher.finalize())
}

fn stored_time() -> DateTime<Utc> {
    Utc::now() + Duration::seconds(STORED_TIME_SLACK_SECS)
}
