/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use super::{FileSystem, FsEntry};

/// Decorator that turns any provider into a one-way mirror source:
/// readers pass through, mutators succeed without doing anything.
pub struct ReadOnlyFileSystem {
    inner: Box<dyn FileSystem>,
}

impl ReadOnlyFileSystem {
    pub fn new(inner: Box<dyn FileSystem>) -> Self {
        Self { inner }
    }
}

impl FileSystem for ReadOnlyFileSystem {
    fn is_read_only(&self) -> bool {
        true
    }

    fn list(&self, dir: &str) -> anyhow::Result<Vec<FsEntry>> {
        self.inner.list(dir)
    }

    fn entry(&self, path: &str) -> anyhow::Result<Option<FsEntry>> {
        self.inner.entry(path)
    }

    fn read_file(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        self.inner.read_file(path)
    }

    fn write_file(&self, _path: &str, _content: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn delete_file(&self, _path: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn create_dir(&self, _path: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn delete_dir(&self, _path: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_file(&self, path: &str) -> anyhow::Result<bool> {
        self.inner.is_file(path)
    }

    fn exists(&self, path: &str) -> anyhow::Result<bool> {
        self.inner.exists(path)
    }

    fn build_path(&self, dir: &str, name: &str) -> String {
        self.inner.build_path(dir, name)
    }

    fn clone_box(&self) -> Box<dyn FileSystem> {
        Box::new(ReadOnlyFileSystem {
            inner: self.inner.clone(),
        })
    }
}
