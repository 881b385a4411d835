/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{
    fs,
    io::ErrorKind,
    path::Path,
};

use anyhow::Context;
use chrono::{DateTime, Utc};

use super::{FileSystem, FsEntry};

/// Host filesystem provider.
#[derive(Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self {}
    }

    fn entry_at(&self, path: &Path) -> anyhow::Result<FsEntry> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("failed to stat '{}'", path.display()))?;
        let parent = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FsEntry {
            parent,
            name,
            is_dir: metadata.is_dir(),
            modified: modified_time(&metadata),
            size: metadata.len(),
            locked: false,
        })
    }
}

/// Some platforms advance only ctime on certain operations, so the newer
/// of mtime and ctime wins. Truncated to whole seconds.
#[cfg(unix)]
fn modified_time(metadata: &fs::Metadata) -> DateTime<Utc> {
    use std::os::unix::fs::MetadataExt;
    let seconds = metadata.mtime().max(metadata.ctime());
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}

#[cfg(not(unix))]
fn modified_time(metadata: &fs::Metadata) -> DateTime<Utc> {
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::from)
        .unwrap_or_default();
    DateTime::from_timestamp(modified.timestamp(), 0).unwrap_or_default()
}

impl FileSystem for LocalFileSystem {
    fn list(&self, dir: &str) -> anyhow::Result<Vec<FsEntry>> {
        let mut entries = vec![];
        let read_dir =
            fs::read_dir(dir).with_context(|| format!("failed to list '{}'", dir))?;
        for child in read_dir {
            let child = child.with_context(|| format!("failed to list '{}'", dir))?;
            let child_path = child.path();
            match self.entry_at(&child_path) {
                Ok(entry) => entries.push(entry),
                // Keep unreadable children visible instead of failing the directory.
                Err(_) => entries.push(FsEntry {
                    parent: dir.to_owned(),
                    name: child.file_name().to_string_lossy().into_owned(),
                    is_dir: false,
                    modified: Utc::now(),
                    size: 0,
                    locked: true,
                }),
            }
        }
        Ok(entries)
    }

    fn entry(&self, path: &str) -> anyhow::Result<Option<FsEntry>> {
        if !Path::new(path).exists() {
            return Ok(None);
        }
        self.entry_at(Path::new(path)).map(Some)
    }

    fn read_file(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("failed to read '{}'", path))
    }

    fn write_file(&self, path: &str, content: &[u8]) -> anyhow::Result<()> {
        fs::write(path, content).with_context(|| format!("failed to write '{}'", path))
    }

    fn delete_file(&self, path: &str) -> anyhow::Result<()> {
        match fs::remove_file(path) {
            Err(err) if err.kind() != ErrorKind::NotFound => {
                Err(err).with_context(|| format!("failed to delete '{}'", path))
            }
            _ => Ok(()),
        }
    }

    fn create_dir(&self, path: &str) -> anyhow::Result<()> {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory '{}'", path))
    }

    fn delete_dir(&self, path: &str) -> anyhow::Result<()> {
        if Path::new(path).is_dir() {
            fs::remove_dir_all(path)
                .with_context(|| format!("failed to delete directory '{}'", path))?;
        }
        Ok(())
    }

    fn is_file(&self, path: &str) -> anyhow::Result<bool> {
        Ok(Path::new(path).is_file())
    }

    fn exists(&self, path: &str) -> anyhow::Result<bool> {
        Ok(Path::new(path).exists())
    }

    fn build_path(&self, dir: &str, name: &str) -> String {
        Path::new(dir).join(name).to_string_lossy().into_owned()
    }

    fn clone_box(&self) -> Box<dyn FileSystem> {
        Box::new(self.clone())
    }
}
