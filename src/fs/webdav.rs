/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use chrono::{DateTime, Utc};

use super::{FileSystem, FsEntry};
use crate::dav::propfind::DavEntry;
use crate::dav::DavClient;
use crate::path::last_element;

/// Remote side of a sync pair, backed by a WebDAV endpoint.
pub struct WebDavFileSystem {
    dav: DavClient,
}

impl WebDavFileSystem {
    pub fn new(dav: DavClient) -> Self {
        Self { dav }
    }
}

/// A resource without a parseable modification date sorts as very old,
/// so it never spuriously wins a direction decision.
fn entry_time(entry: &DavEntry) -> DateTime<Utc> {
    entry.modified.unwrap_or_default()
}

impl FileSystem for WebDavFileSystem {
    fn list(&self, dir: &str) -> anyhow::Result<Vec<FsEntry>> {
        let entries = self.dav.list(dir)?;
        Ok(entries
            .iter()
            .map(|e| FsEntry {
                parent: dir.to_owned(),
                name: last_element(&e.path).to_owned(),
                is_dir: e.is_dir,
                modified: entry_time(e),
                size: e.size,
                locked: false,
            })
            .collect())
    }

    fn entry(&self, path: &str) -> anyhow::Result<Option<FsEntry>> {
        Ok(self.dav.stat(path)?.map(|e| FsEntry {
            parent: path.to_owned(),
            name: last_element(path).to_owned(),
            is_dir: e.is_dir,
            modified: entry_time(&e),
            size: e.size,
            locked: false,
        }))
    }

    fn read_file(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        self.dav.download(path)
    }

    fn write_file(&self, path: &str, content: &[u8]) -> anyhow::Result<()> {
        self.dav.upload(path, content)
    }

    fn delete_file(&self, path: &str) -> anyhow::Result<()> {
        self.dav.delete(path)
    }

    fn create_dir(&self, path: &str) -> anyhow::Result<()> {
        self.dav.mkdir(path)
    }

    /// DAV DELETE on a collection is already recursive.
    fn delete_dir(&self, path: &str) -> anyhow::Result<()> {
        self.dav.delete(path)
    }

    fn is_file(&self, path: &str) -> anyhow::Result<bool> {
        self.dav.is_file(path)
    }

    fn exists(&self, path: &str) -> anyhow::Result<bool> {
        self.dav.exists(path)
    }

    fn build_path(&self, dir: &str, name: &str) -> String {
        format!("{}/{}", dir, name)
    }

    fn clone_box(&self) -> Box<dyn FileSystem> {
        Box::new(WebDavFileSystem {
            dav: self.dav.clone(),
        })
    }
}
