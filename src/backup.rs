/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Append-only store keeping the previous content of any local file or
//! directory about to be overwritten or deleted. Backup failure is
//! journaled but never blocks the mutation itself.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use chrono::Local;
use rand::{distributions::Alphanumeric, Rng};
use walkdir::WalkDir;

use crate::journal::Journal;
use crate::path::last_element;

const TOKEN_LENGTH: usize = 4;

pub struct BackupStore {
    dir: PathBuf,
    journal: Arc<Journal>,
}

impl BackupStore {
    pub fn open(dir: PathBuf, journal: Arc<Journal>) -> anyhow::Result<Self> {
        fs::create_dir_all(&dir).with_context(|| {
            format!("failed to create backup directory '{}'", dir.display())
        })?;
        Ok(Self { dir, journal })
    }

    /// Copies the file at `local_path` (if any) under a timestamped
    /// unique name. Name generation and copy run under the journal lock
    /// so concurrent workers cannot collide.
    pub fn backup_file(&self, local_path: &str) {
        let (target, result) = self.journal.with_lock(|| {
            let target = self.dir.join(backup_name(last_element(local_path)));
            let source = Path::new(local_path);
            let result = if source.exists() {
                fs::copy(source, &target).map(|_| ()).with_context(|| {
                    format!("failed to copy '{}'", source.display())
                })
            } else {
                Ok(())
            };
            (target, result)
        });
        if let Err(err) = result {
            self.journal.record_error(
                &format!(
                    "Error: can't backup file: '{}' to '{}'",
                    local_path,
                    target.display()
                ),
                &err,
            );
        }
    }

    /// Recursive variant for directories.
    pub fn backup_dir(&self, local_path: &str) {
        let (target, result) = self.journal.with_lock(|| {
            let target = self.dir.join(backup_name(last_element(local_path)));
            let source = Path::new(local_path);
            let result = if source.exists() {
                copy_dir(source, &target)
            } else {
                Ok(())
            };
            (target, result)
        });
        if let Err(err) = result {
            self.journal.record_error(
                &format!(
                    "Error: can't backup dir: '{}' to '{}'",
                    local_path,
                    target.display()
                ),
                &err,
            );
        }
    }
}

/// `[YYYY-MM-DD HH-MM-SS <rand4>] <basename>`; the second-resolution
/// timestamp plus the random token keeps names unique across workers.
fn backup_name(basename: &str) -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect();
    format!(
        "[{} {}] {}",
        Local::now().format("%Y-%m-%d %H-%M-%S"),
        token,
        basename
    )
}

fn copy_dir(source: &Path, target: &Path) -> anyhow::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.with_context(|| "failed to read directory entry")?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .with_context(|| "failed to read directory entry")?;
        let copied = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&copied).with_context(|| {
                format!("failed to create '{}'", copied.display())
            })?;
        } else {
            fs::copy(entry.path(), &copied)
                .with_context(|| format!("failed to copy '{}'", entry.path().display()))?;
        }
    }
    Ok(())
}
