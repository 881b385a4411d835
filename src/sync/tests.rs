/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! End-to-end reconciliation scenarios over two local trees.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tempfile::TempDir;
use walkdir::WalkDir;

use super::Syncer;
use crate::fs::local::LocalFileSystem;
use crate::fs::read_only::ReadOnlyFileSystem;
use crate::fs::FileSystem;
use crate::shadow::ShadowStore;

struct Sandbox {
    remote: TempDir,
    local: TempDir,
    settings: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            remote: tempfile::tempdir().unwrap(),
            local: tempfile::tempdir().unwrap(),
            settings: tempfile::tempdir().unwrap(),
        }
    }

    fn remote_root(&self) -> String {
        self.remote.path().to_string_lossy().into_owned()
    }

    fn local_root(&self) -> String {
        self.local.path().to_string_lossy().into_owned()
    }

    fn syncer(&self) -> Syncer {
        self.syncer_with(1, 0)
    }

    fn syncer_with(&self, workers: usize, max_file_size_kb: u64) -> Syncer {
        self.syncer_custom(
            Box::new(LocalFileSystem::new()),
            Box::new(LocalFileSystem::new()),
            workers,
            max_file_size_kb,
        )
    }

    fn syncer_custom(
        &self,
        remote_fs: Box<dyn FileSystem>,
        local_fs: Box<dyn FileSystem>,
        workers: usize,
        max_file_size_kb: u64,
    ) -> Syncer {
        let mut syncer = Syncer::new(
            remote_fs,
            local_fs,
            Some(self.settings.path().join("sync.log")),
            self.settings.path(),
            max_file_size_kb,
            workers,
        )
        .unwrap();
        syncer.add_pair(&self.remote_root(), &self.local_root());
        syncer
    }

    fn run(&self) {
        self.syncer().sync(true, true);
    }

    fn shadow(&self) -> ShadowStore {
        ShadowStore::open(
            &self.remote_root(),
            &self.local_root(),
            &self.settings.path().join("state"),
        )
        .unwrap()
    }

    /// Shadow paths relative to the local root, sorted.
    fn shadow_paths(&self) -> Vec<String> {
        let root = self.local_root();
        let mut paths: Vec<String> = self
            .shadow()
            .all_paths()
            .into_iter()
            .map(|p| p.strip_prefix(&root).unwrap_or(&p).to_owned())
            .collect();
        paths.sort();
        paths
    }

    fn journal_text(&self) -> String {
        fs::read_to_string(self.settings.path().join("sync.log")).unwrap_or_default()
    }

    fn backup_names(&self) -> Vec<String> {
        match fs::read_dir(self.settings.path().join("backup")) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => vec![],
        }
    }
}

fn write(root: &Path, relative: &str, content: &[u8]) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Pushes the mtime past the shadow stored-time slack so an edit counts
/// as newer on the next run.
fn age_forward(path: &Path, seconds: u64) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(seconds))
        .unwrap();
}

/// Relative paths plus file contents, sorted, directories included.
fn tree_snapshot(root: &Path) -> Vec<(String, Option<Vec<u8>>)> {
    let mut snapshot = vec![];
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.unwrap();
        if entry.path() == root {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let content = if entry.file_type().is_file() {
            Some(fs::read(entry.path()).unwrap())
        } else {
            None
        };
        snapshot.push((relative, content));
    }
    snapshot.sort();
    snapshot
}

#[test]
fn test_empty_pair_stays_empty() {
    let sandbox = Sandbox::new();
    sandbox.run();
    assert!(tree_snapshot(sandbox.remote.path()).is_empty());
    assert!(tree_snapshot(sandbox.local.path()).is_empty());
    assert!(sandbox.shadow().all_paths().is_empty());
}

#[test]
fn test_create_propagates_to_remote() {
    let sandbox = Sandbox::new();
    sandbox.run();
    write(sandbox.local.path(), "a.txt", b"hello");

    sandbox.run();

    assert_eq!(
        b"hello".to_vec(),
        fs::read(sandbox.remote.path().join("a.txt")).unwrap()
    );
    let shadow = sandbox.shadow();
    let paths = shadow.all_paths();
    let entry = shadow.entry(&paths[0]).unwrap();
    assert!(!entry.is_dir);
    assert_eq!(5, entry.size);
    assert_eq!(vec!["/a.txt".to_owned()], sandbox.shadow_paths());
}

#[test]
fn test_delete_propagates_to_remote() {
    let sandbox = Sandbox::new();
    let local_file = write(sandbox.local.path(), "a.txt", b"hello");
    sandbox.run();
    assert!(sandbox.remote.path().join("a.txt").exists());

    fs::remove_file(local_file).unwrap();
    sandbox.run();

    assert!(!sandbox.remote.path().join("a.txt").exists());
    assert!(sandbox.shadow().all_paths().is_empty());
}

#[test]
fn test_remote_delete_propagates_to_local_with_backup() {
    let sandbox = Sandbox::new();
    write(sandbox.local.path(), "doomed.txt", b"v1");
    sandbox.run();

    fs::remove_file(sandbox.remote.path().join("doomed.txt")).unwrap();
    sandbox.run();

    assert!(!sandbox.local.path().join("doomed.txt").exists());
    assert!(sandbox.shadow().all_paths().is_empty());
    let backups = sandbox.backup_names();
    assert!(backups.iter().any(|n| n.ends_with("] doomed.txt")));
}

#[test]
fn test_edit_wins_over_stale() {
    let sandbox = Sandbox::new();
    let local_file = write(sandbox.local.path(), "a.txt", b"v1");
    sandbox.run();

    write(sandbox.local.path(), "a.txt", b"v2-edited");
    age_forward(&local_file, 60);
    sandbox.run();

    assert_eq!(
        b"v2-edited".to_vec(),
        fs::read(sandbox.remote.path().join("a.txt")).unwrap()
    );

    // The freshly written remote copy must not bounce back.
    sandbox.run();
    assert_eq!(b"v2-edited".to_vec(), fs::read(&local_file).unwrap());
}

#[test]
fn test_remote_edit_overwrites_local_after_backup() {
    let sandbox = Sandbox::new();
    write(sandbox.local.path(), "a.txt", b"v1");
    sandbox.run();

    let remote_file = write(sandbox.remote.path(), "a.txt", b"v2-remote");
    age_forward(&remote_file, 60);
    sandbox.run();

    assert_eq!(
        b"v2-remote".to_vec(),
        fs::read(sandbox.local.path().join("a.txt")).unwrap()
    );
    let backups = sandbox.backup_names();
    let backup = backups
        .iter()
        .find(|n| n.ends_with("] a.txt"))
        .expect("previous local content must be backed up");
    assert_eq!(
        b"v1".to_vec(),
        fs::read(sandbox.settings.path().join("backup").join(backup)).unwrap()
    );
}

#[test]
fn test_divergent_new_files_are_not_merged() {
    let sandbox = Sandbox::new();
    sandbox.run();

    write(sandbox.local.path(), "a.txt", b"X");
    let remote_file = write(sandbox.remote.path(), "a.txt", b"Y");
    age_forward(&remote_file, 60);

    sandbox.run();
    sandbox.run();

    // No shadow baseline: a bare mtime difference is not an edit.
    assert_eq!(b"X".to_vec(), fs::read(sandbox.local.path().join("a.txt")).unwrap());
    assert_eq!(b"Y".to_vec(), fs::read(sandbox.remote.path().join("a.txt")).unwrap());
}

#[test]
fn test_size_gate_skips_big_file_but_creates_dirs() {
    let sandbox = Sandbox::new();
    write(sandbox.local.path(), "d/e/f.bin", &[7u8; 5 * 1024]);

    sandbox.syncer_with(1, 2).sync(true, true);

    assert!(sandbox.remote.path().join("d/e").is_dir());
    assert!(!sandbox.remote.path().join("d/e/f.bin").exists());
    assert!(sandbox
        .journal_text()
        .contains("ignored create remote, big local size"));
    assert_eq!(vec!["/d".to_owned(), "/d/e".to_owned()], sandbox.shadow_paths());

    // The gated file's absence on the destination must not read back as
    // a deletion of the source.
    sandbox.syncer_with(1, 2).sync(true, true);
    assert!(sandbox.local.path().join("d/e/f.bin").exists());
}

#[test]
fn test_read_only_local_side_stays_untouched() {
    let sandbox = Sandbox::new();
    write(sandbox.remote.path(), "r.txt", b"abc");

    let syncer = sandbox.syncer_custom(
        Box::new(LocalFileSystem::new()),
        Box::new(ReadOnlyFileSystem::new(Box::new(LocalFileSystem::new()))),
        1,
        0,
    );
    syncer.sync(true, true);

    assert!(!sandbox.local.path().join("r.txt").exists());
    assert_eq!(
        b"abc".to_vec(),
        fs::read(sandbox.remote.path().join("r.txt")).unwrap()
    );
    assert!(sandbox.shadow().all_paths().is_empty());
}

#[test]
fn test_read_only_remote_skips_delete_but_drops_shadow() {
    let sandbox = Sandbox::new();
    let local_file = write(sandbox.local.path(), "f.txt", b"kept");
    sandbox.run();
    assert!(sandbox.remote.path().join("f.txt").exists());

    fs::remove_file(local_file).unwrap();
    let syncer = sandbox.syncer_custom(
        Box::new(ReadOnlyFileSystem::new(Box::new(LocalFileSystem::new()))),
        Box::new(LocalFileSystem::new()),
        1,
        0,
    );
    syncer.sync(true, true);

    // The read-only side keeps its copy; the baseline forgets the path
    // either way.
    assert!(sandbox.remote.path().join("f.txt").exists());
    assert!(sandbox.shadow().all_paths().is_empty());
}

#[test]
fn test_type_conflict_is_inert() {
    let sandbox = Sandbox::new();
    write(sandbox.remote.path(), "x/inner.txt", b"dir side");
    write(sandbox.local.path(), "x", b"file side");

    sandbox.run();

    assert!(sandbox.remote.path().join("x").is_dir());
    assert_eq!(
        b"file side".to_vec(),
        fs::read(sandbox.local.path().join("x")).unwrap()
    );
    assert!(sandbox
        .journal_text()
        .contains("can't sync file and folder"));
}

#[test]
fn test_shadow_gc_drops_phantom_records() {
    let sandbox = Sandbox::new();
    write(sandbox.local.path(), "real.txt", b"here");
    let phantom = format!("{}/phantom.txt", sandbox.local_root());
    sandbox.shadow().write_file(&phantom, 1).unwrap();

    sandbox.run();

    assert!(sandbox
        .journal_text()
        .contains("Remove info about non-existing record"));
    let local_fs = LocalFileSystem::new();
    for path in sandbox.shadow().all_paths() {
        assert!(local_fs.exists(&path).unwrap(), "stale shadow path {}", path);
    }
    assert_eq!(vec!["/real.txt".to_owned()], sandbox.shadow_paths());
}

#[test]
fn test_second_run_makes_no_updates() {
    let sandbox = Sandbox::new();
    write(sandbox.local.path(), "a.txt", b"one");
    write(sandbox.local.path(), "d/b.txt", b"two");
    write(sandbox.remote.path(), "r/c.txt", b"three");
    sandbox.run();

    let syncer = sandbox.syncer();
    syncer.sync(true, true);
    assert_eq!(
        0,
        syncer
            .stats()
            .updated_files
            .load(std::sync::atomic::Ordering::SeqCst)
    );
    assert_eq!(
        0,
        syncer
            .stats()
            .updated_dirs
            .load(std::sync::atomic::Ordering::SeqCst)
    );
}

#[test]
fn test_initial_sync_copies_remote_tree_to_local() {
    let remote = tempfile::tempdir().unwrap();
    let local_parent = tempfile::tempdir().unwrap();
    let settings = tempfile::tempdir().unwrap();
    write(remote.path(), "a.txt", b"root file");
    write(remote.path(), "d/nested.txt", b"below");

    let local_root = local_parent.path().join("mirror");
    let mut syncer = Syncer::new(
        Box::new(LocalFileSystem::new()),
        Box::new(LocalFileSystem::new()),
        None,
        settings.path(),
        0,
        1,
    )
    .unwrap();
    syncer.add_pair(
        &remote.path().to_string_lossy(),
        &local_root.to_string_lossy(),
    );
    syncer.sync(true, false);

    assert_eq!(b"root file".to_vec(), fs::read(local_root.join("a.txt")).unwrap());
    assert_eq!(b"below".to_vec(), fs::read(local_root.join("d/nested.txt")).unwrap());
}

#[test]
fn test_initial_sync_creates_both_missing_roots() {
    let parent = tempfile::tempdir().unwrap();
    let settings = tempfile::tempdir().unwrap();
    let remote_root = parent.path().join("remote");
    let local_root = parent.path().join("local");

    let mut syncer = Syncer::new(
        Box::new(LocalFileSystem::new()),
        Box::new(LocalFileSystem::new()),
        None,
        settings.path(),
        0,
        1,
    )
    .unwrap();
    syncer.add_pair(&remote_root.to_string_lossy(), &local_root.to_string_lossy());
    syncer.sync(false, false);

    assert!(remote_root.is_dir());
    assert!(local_root.is_dir());
    assert!(tree_snapshot(&remote_root).is_empty());
    assert!(tree_snapshot(&local_root).is_empty());
}

#[test]
fn test_gated_roots_are_ignored() {
    let remote = tempfile::tempdir().unwrap();
    let local_parent = tempfile::tempdir().unwrap();
    let settings = tempfile::tempdir().unwrap();
    write(remote.path(), "a.txt", b"data");
    let local_root = local_parent.path().join("never-created");

    let journal_path = settings.path().join("sync.log");
    let mut syncer = Syncer::new(
        Box::new(LocalFileSystem::new()),
        Box::new(LocalFileSystem::new()),
        Some(journal_path.clone()),
        settings.path(),
        0,
        1,
    )
    .unwrap();
    syncer.add_pair(&remote.path().to_string_lossy(), &local_root.to_string_lossy());
    syncer.sync(true, true);

    assert!(!local_root.exists());
    let journal = fs::read_to_string(journal_path).unwrap();
    assert!(journal.contains("Sync ignored: root folder not exist."));
}

fn build_wide_tree(root: &Path) {
    for subtree in ["alpha", "beta"] {
        for index in 0..10 {
            write(
                root,
                &format!("{}/file-{:02}.txt", subtree, index),
                format!("{} {}", subtree, index).as_bytes(),
            );
        }
        write(
            root,
            &format!("{}/deep/deeper/tail.txt", subtree),
            b"tail",
        );
    }
}

#[test]
fn test_worker_counts_converge_to_same_state() {
    let sequential = Sandbox::new();
    build_wide_tree(sequential.remote.path());
    sequential.syncer_with(1, 0).sync(true, true);

    for workers in [4, 16] {
        let parallel = Sandbox::new();
        build_wide_tree(parallel.remote.path());
        let syncer = parallel.syncer_with(workers, 0);
        syncer.sync(true, true);

        assert_eq!(
            tree_snapshot(sequential.local.path()),
            tree_snapshot(parallel.local.path())
        );
        assert_eq!(
            tree_snapshot(parallel.remote.path()),
            tree_snapshot(parallel.local.path())
        );
        assert_eq!(sequential.shadow_paths(), parallel.shadow_paths());
        assert!(
            syncer
                .stats()
                .processed_files
                .load(std::sync::atomic::Ordering::SeqCst)
                >= 22
        );
        assert!(parallel.backup_names().is_empty());
    }
}
