/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Two-way reconciliation of a remote and a local tree.
//!
//! The persisted shadow state decides the direction of every change: a
//! path present on one side only is ambiguous without history (newly
//! created or recently deleted), and the shadow resolves it without ever
//! reading content of the missing side.

#[cfg(test)]
mod tests;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{atomic::Ordering, Arc},
};

use anyhow::{anyhow, Context};
use log::debug;

use crate::backup::BackupStore;
use crate::fs::{FileSystem, FsEntry};
use crate::journal::Journal;
use crate::pool::WorkerPool;
use crate::shadow::ShadowStore;
use crate::stats::SyncStats;

const STATE_DIR_NAME: &str = "state";
const BACKUP_DIR_NAME: &str = "backup";

/// Reconciles a set of (remote root, local root) pairs.
pub struct Syncer {
    remote_fs: Box<dyn FileSystem>,
    local_fs: Box<dyn FileSystem>,
    pairs: Vec<(String, String)>,
    state_dir: PathBuf,
    shared: Arc<SyncShared>,
}

struct SyncShared {
    journal: Arc<Journal>,
    backup: BackupStore,
    stats: SyncStats,
    max_file_size: u64,
    max_workers: usize,
    pool: Option<WorkerPool>,
}

/// Everything one worker needs to reconcile a subtree. Cloning hands out
/// independent filesystem handles, so providers need not be thread-safe.
struct SyncCtx {
    shared: Arc<SyncShared>,
    shadow: Arc<ShadowStore>,
    remote_fs: Box<dyn FileSystem>,
    local_fs: Box<dyn FileSystem>,
}

impl SyncCtx {
    fn clone_for_worker(&self) -> SyncCtx {
        SyncCtx {
            shared: self.shared.clone(),
            shadow: self.shadow.clone(),
            remote_fs: self.remote_fs.clone_box(),
            local_fs: self.local_fs.clone_box(),
        }
    }

    fn journal(&self) -> &Journal {
        &self.shared.journal
    }
}

/// One directory pair queued for reconciliation, with the existence
/// knowledge the parent already has.
struct DirTask {
    remote_path: String,
    local_path: String,
    remote_exists: bool,
    local_exists: bool,
}

impl Syncer {
    /// `max_file_size_kb == 0` means unlimited; `max_workers <= 1` runs
    /// fully sequential with no pool.
    pub fn new(
        remote_fs: Box<dyn FileSystem>,
        local_fs: Box<dyn FileSystem>,
        journal_path: Option<PathBuf>,
        settings_dir: &Path,
        max_file_size_kb: u64,
        max_workers: usize,
    ) -> anyhow::Result<Self> {
        let journal = Arc::new(Journal::new(journal_path));
        let backup = BackupStore::open(settings_dir.join(BACKUP_DIR_NAME), journal.clone())
            .with_context(|| "failed to open backup store")?;
        let max_workers = max_workers.max(1);
        let pool = (max_workers > 1).then(|| WorkerPool::new(max_workers));
        let max_file_size = match max_file_size_kb {
            0 => u64::MAX,
            kb => kb * 1024,
        };
        Ok(Self {
            remote_fs,
            local_fs,
            pairs: vec![],
            state_dir: settings_dir.join(STATE_DIR_NAME),
            shared: Arc::new(SyncShared {
                journal,
                backup,
                stats: SyncStats::new(),
                max_file_size,
                max_workers,
                pool,
            }),
        })
    }

    pub fn add_pair(&mut self, remote_root: &str, local_root: &str) {
        self.pairs.push((remote_root.to_owned(), local_root.to_owned()));
    }

    pub fn stats(&self) -> &SyncStats {
        &self.shared.stats
    }

    /// Reconciles every registered pair. The gate flags select which
    /// single-sided root states may trigger an initial sync.
    pub fn sync(&self, only_if_remote_exist: bool, only_if_local_exist: bool) {
        for (remote_root, local_root) in &self.pairs {
            let result =
                self.sync_pair(remote_root, local_root, only_if_remote_exist, only_if_local_exist);
            if let Err(err) = result {
                self.shared.journal.record_error(
                    &format!("Error: can't sync '{}' and '{}'", remote_root, local_root),
                    &err,
                );
            }
        }
        self.shared.stats.render(&self.shared.journal, true);
        println!();
    }

    fn sync_pair(
        &self,
        remote_root: &str,
        local_root: &str,
        only_if_remote_exist: bool,
        only_if_local_exist: bool,
    ) -> anyhow::Result<()> {
        debug!("sync pair '{}' <-> '{}'", remote_root, local_root);
        let shadow = Arc::new(ShadowStore::open(remote_root, local_root, &self.state_dir)?);
        let ctx = SyncCtx {
            shared: self.shared.clone(),
            shadow,
            remote_fs: self.remote_fs.clone_box(),
            local_fs: self.local_fs.clone_box(),
        };

        sync_root(&ctx, remote_root, local_root, only_if_remote_exist, only_if_local_exist)?;

        if let Some(pool) = &self.shared.pool {
            pool.wait_idle();
        }
        // Entries for paths that merely failed to list this run must
        // survive, so the cleanup only runs after an error-free pair.
        if self.shared.stats.errors() == 0 {
            prune_shadow(&ctx)?;
        }
        Ok(())
    }
}

fn sync_root(
    ctx: &SyncCtx,
    remote_root: &str,
    local_root: &str,
    only_if_remote_exist: bool,
    only_if_local_exist: bool,
) -> anyhow::Result<()> {
    let remote_exists = ctx.remote_fs.exists(remote_root)?;
    let local_exists = ctx.local_fs.exists(local_root)?;
    ctx.shared.stats.reset_errors();

    if remote_exists && local_exists {
        let remote = ctx
            .remote_fs
            .entry(remote_root)?
            .ok_or_else(|| anyhow!("'{}' vanished during sync", remote_root))?;
        let local = ctx
            .local_fs
            .entry(local_root)?
            .ok_or_else(|| anyhow!("'{}' vanished during sync", local_root))?;
        if remote.is_dir != local.is_dir {
            ctx.journal().record(&format!(
                "Sync {} to {} - can't sync file and folder",
                remote_root, local_root
            ));
        } else if !remote.is_dir {
            sync_file(ctx, remote_root, local_root, Some(&remote), Some(&local));
        } else {
            sync_dir(
                ctx,
                DirTask {
                    remote_path: remote_root.to_owned(),
                    local_path: local_root.to_owned(),
                    remote_exists: true,
                    local_exists: true,
                },
            );
        }
    } else if remote_exists == only_if_remote_exist && local_exists == only_if_local_exist {
        initial_sync(ctx, remote_root, local_root, remote_exists, local_exists)?;
    } else {
        ctx.journal().record(&format!(
            "Sync ignored: root folder not exist. {} : {}. {} : {}",
            remote_root, remote_exists, local_root, local_exists
        ));
    }
    Ok(())
}

/// First-time branch: the root exists on at most one side.
fn initial_sync(
    ctx: &SyncCtx,
    remote_root: &str,
    local_root: &str,
    remote_exists: bool,
    local_exists: bool,
) -> anyhow::Result<()> {
    let sides = if remote_exists && !local_exists {
        Some((&ctx.remote_fs, remote_root, &ctx.local_fs, local_root))
    } else if local_exists && !remote_exists {
        Some((&ctx.local_fs, local_root, &ctx.remote_fs, remote_root))
    } else {
        // Neither exists: establish both roots as empty directories. A
        // file root gets no further treatment in this branch.
        ctx.local_fs.create_dir(local_root)?;
        ctx.shadow.create_dir(local_root)?;
        ctx.remote_fs.create_dir(remote_root)?;
        ctx.journal().record(&format!(
            "Sync dir (create local and remote): '{}' and '{}'",
            local_root, remote_root
        ));
        None
    };

    let Some((source_fs, source_path, target_fs, target_path)) = sides else {
        return Ok(());
    };

    if source_fs.is_file(source_path)? {
        ctx.shared.stats.updated_files.fetch_add(1, Ordering::SeqCst);
        let content = source_fs.read_file(source_path)?;
        target_fs.write_file(target_path, &content)?;
        ctx.shadow.write_file(local_root, content.len() as u64)?;
        ctx.journal().record(&format!(
            "Sync file(initial sync): '{}' <-> '{}'",
            local_root, remote_root
        ));
    } else {
        if !target_fs.exists(target_path)? {
            ctx.shared.stats.updated_dirs.fetch_add(1, Ordering::SeqCst);
            target_fs.create_dir(target_path)?;
            ctx.shadow.create_dir(local_root)?;
            ctx.journal().record(&format!(
                "Sync dir (initial sync): '{}' <-> '{}'",
                local_root, remote_root
            ));
        }
        sync_dir(
            ctx,
            DirTask {
                remote_path: remote_root.to_owned(),
                local_path: local_root.to_owned(),
                remote_exists: true,
                local_exists: true,
            },
        );
    }
    Ok(())
}

/// Ships the subtree to the pool when one is configured, otherwise
/// recurses on the current thread. File-level work always stays on the
/// submitting worker; parallelism is per subdirectory.
fn sync_dir(ctx: &SyncCtx, task: DirTask) {
    match &ctx.shared.pool {
        Some(pool) if ctx.shared.max_workers > 1 => {
            let worker_ctx = ctx.clone_for_worker();
            pool.submit(Box::new(move || sync_dir_inner(&worker_ctx, &task)));
        }
        _ => sync_dir_inner(ctx, &task),
    }
}

fn sync_dir_inner(ctx: &SyncCtx, task: &DirTask) {
    ctx.shared.stats.processed_dirs.fetch_add(1, Ordering::SeqCst);

    if let Err(err) = reconcile_dir(ctx, task) {
        ctx.shared.stats.record_error();
        ctx.journal().record_error(
            &format!(
                "Error: sync dir: '{}' <-> '{}'",
                task.local_path, task.remote_path
            ),
            &err,
        );
    }

    ctx.shared.stats.render(ctx.journal(), false);
}

fn reconcile_dir(ctx: &SyncCtx, task: &DirTask) -> anyhow::Result<()> {
    let remote_path = task.remote_path.as_str();
    let local_path = task.local_path.as_str();
    let mut descend = true;

    if !task.remote_exists && !task.local_exists {
        ctx.journal().record(&format!(
            "Error: sync not existing folders: {} to {}",
            remote_path, local_path
        ));
        descend = false;
    } else if !task.remote_exists {
        if ctx.shadow.exists(local_path) && !ctx.shadow.is_file(local_path) {
            // The directory was deleted remotely while the shadow knew it.
            if !ctx.local_fs.is_read_only() {
                ctx.shared.stats.updated_dirs.fetch_add(1, Ordering::SeqCst);
                ctx.shared.backup.backup_dir(local_path);
                ctx.local_fs.delete_dir(local_path)?;
                ctx.journal()
                    .record(&format!("Sync dir (delete local): '{}'", local_path));
            }
            ctx.shadow.delete_dir(local_path)?;
            descend = false;
        } else if !ctx.remote_fs.is_read_only() {
            ctx.shared.stats.updated_dirs.fetch_add(1, Ordering::SeqCst);
            ctx.remote_fs.create_dir(remote_path)?;
            ctx.shadow.create_dir(local_path)?;
            ctx.journal()
                .record(&format!("Sync dir (create remote): '{}'", remote_path));
        } else {
            descend = false;
        }
    } else if !task.local_exists {
        if ctx.shadow.exists(local_path) && !ctx.shadow.is_file(local_path) {
            if !ctx.remote_fs.is_read_only() {
                ctx.shared.stats.updated_dirs.fetch_add(1, Ordering::SeqCst);
                ctx.remote_fs.delete_dir(remote_path)?;
                ctx.journal()
                    .record(&format!("Sync dir (delete remote): '{}'", remote_path));
            }
            ctx.shadow.delete_dir(local_path)?;
            descend = false;
        } else if !ctx.local_fs.is_read_only() {
            ctx.shared.stats.updated_dirs.fetch_add(1, Ordering::SeqCst);
            ctx.local_fs.create_dir(local_path)?;
            ctx.shadow.create_dir(local_path)?;
            ctx.journal()
                .record(&format!("Sync dir (create local): '{}'", local_path));
        } else {
            descend = false;
        }
    }

    if descend {
        let mut remote_children = list_children(&*ctx.remote_fs, remote_path)?;
        let mut local_children = list_children(&*ctx.local_fs, local_path)?;
        sync_children(ctx, remote_path, local_path, &remote_children, &mut local_children, true);
        sync_children(ctx, local_path, remote_path, &local_children, &mut remote_children, false);
    }
    Ok(())
}

fn list_children(
    fs: &dyn FileSystem,
    path: &str,
) -> anyhow::Result<HashMap<String, FsEntry>> {
    Ok(fs
        .list(path)?
        .into_iter()
        .map(|entry| (entry.name.clone(), entry))
        .collect())
}

/// One pairing pass over a directory. `near` is the side being iterated;
/// matched names are removed from `far`, so after the remote-first pass
/// `far` holds exactly the local-only residual for the second pass.
fn sync_children(
    ctx: &SyncCtx,
    near_path: &str,
    far_path: &str,
    near: &HashMap<String, FsEntry>,
    far: &mut HashMap<String, FsEntry>,
    near_is_remote: bool,
) {
    let (near_fs, far_fs): (&dyn FileSystem, &dyn FileSystem) = if near_is_remote {
        (&*ctx.remote_fs, &*ctx.local_fs)
    } else {
        (&*ctx.local_fs, &*ctx.remote_fs)
    };

    for (name, near_entry) in near {
        let near_child = near_fs.build_path(near_path, name);
        let far_child = far_fs.build_path(far_path, name);
        let far_entry = far.remove(name);

        let as_dir = match &far_entry {
            Some(far_entry) => {
                if near_entry.is_dir != far_entry.is_dir {
                    ctx.journal().record(&format!(
                        "Error: sync - can't sync file and folder: '{}' to '{}'",
                        near_child, far_child
                    ));
                    continue;
                }
                near_entry.is_dir
            }
            None => near_entry.is_dir,
        };

        if as_dir {
            let task = if near_is_remote {
                DirTask {
                    remote_path: near_child,
                    local_path: far_child,
                    remote_exists: true,
                    local_exists: far_entry.is_some(),
                }
            } else {
                DirTask {
                    remote_path: far_child,
                    local_path: near_child,
                    remote_exists: far_entry.is_some(),
                    local_exists: true,
                }
            };
            sync_dir(ctx, task);
        } else if near_is_remote {
            sync_file(ctx, &near_child, &far_child, Some(near_entry), far_entry.as_ref());
        } else {
            sync_file(ctx, &far_child, &near_child, far_entry.as_ref(), Some(near_entry));
        }
    }
}

fn sync_file(
    ctx: &SyncCtx,
    remote_path: &str,
    local_path: &str,
    remote: Option<&FsEntry>,
    local: Option<&FsEntry>,
) {
    ctx.shared.stats.processed_files.fetch_add(1, Ordering::SeqCst);

    if let Err(err) = reconcile_file(ctx, remote_path, local_path, remote, local) {
        ctx.shared.stats.record_error();
        ctx.journal().record_error(
            &format!("Error: sync file: '{}' <-> '{}'", local_path, remote_path),
            &err,
        );
    }

    ctx.shared.stats.render(ctx.journal(), false);
}

/// Three-way compare of remote entry, local entry and shadow entry.
fn reconcile_file(
    ctx: &SyncCtx,
    remote_path: &str,
    local_path: &str,
    remote: Option<&FsEntry>,
    local: Option<&FsEntry>,
) -> anyhow::Result<()> {
    let stats = &ctx.shared.stats;
    let max_size = ctx.shared.max_file_size;
    let stored = ctx.shadow.entry(local_path);

    match (remote, local) {
        (Some(remote_entry), Some(local_entry)) => {
            // Without a shadow baseline a mtime difference alone is not
            // evidence of an edit, so divergent new files stay untouched.
            let update_local = remote_entry.modified > local_entry.modified
                && stored
                    .as_ref()
                    .is_some_and(|s| remote_entry.modified > s.stored_time);
            let update_remote = !update_local
                && local_entry.modified > remote_entry.modified
                && stored
                    .as_ref()
                    .is_some_and(|s| local_entry.modified > s.stored_time);

            if update_local {
                if remote_entry.size > max_size {
                    ctx.journal().record(&format!(
                        "Sync file(ignored local, big remote size - {} KB): '{}' -> '{}'",
                        remote_entry.size / 1024,
                        remote_path,
                        local_path
                    ));
                } else if !ctx.local_fs.is_read_only() {
                    stats.updated_files.fetch_add(1, Ordering::SeqCst);
                    let content = ctx.remote_fs.read_file(remote_path)?;
                    ctx.shared.backup.backup_file(local_path);
                    ctx.local_fs.write_file(local_path, &content)?;
                    ctx.shadow.write_file(local_path, content.len() as u64)?;
                    ctx.journal().record(&format!(
                        "Sync file(write local): '{}' -> '{}'",
                        remote_path, local_path
                    ));
                }
            } else if update_remote {
                if local_entry.size > max_size {
                    ctx.journal().record(&format!(
                        "Sync file(ignored remote, big local size - {} KB): '{}' -> '{}'",
                        local_entry.size / 1024,
                        local_path,
                        remote_path
                    ));
                } else if !ctx.remote_fs.is_read_only() {
                    stats.updated_files.fetch_add(1, Ordering::SeqCst);
                    let content = ctx.local_fs.read_file(local_path)?;
                    ctx.remote_fs.write_file(remote_path, &content)?;
                    ctx.shadow.write_file(local_path, content.len() as u64)?;
                    ctx.journal().record(&format!(
                        "Sync file(write remote): '{}' -> '{}'",
                        local_path, remote_path
                    ));
                }
            }
        }

        (Some(remote_entry), None) => {
            if stored.is_some() {
                // Locally deleted while the shadow knew it: the deletion
                // wins over the remote copy.
                if !ctx.remote_fs.is_read_only() {
                    stats.updated_files.fetch_add(1, Ordering::SeqCst);
                    ctx.remote_fs.delete_file(remote_path)?;
                    ctx.journal()
                        .record(&format!("Sync file(delete remote): '{}'", remote_path));
                }
                ctx.shadow.delete_file(local_path)?;
            } else if remote_entry.size > max_size {
                ctx.journal().record(&format!(
                    "Sync file(ignored create local, big remote size - {} KB): '{}' -> '{}'",
                    remote_entry.size / 1024,
                    remote_path,
                    local_path
                ));
            } else if !ctx.local_fs.is_read_only() {
                stats.updated_files.fetch_add(1, Ordering::SeqCst);
                let content = ctx.remote_fs.read_file(remote_path)?;
                ctx.shared.backup.backup_file(local_path);
                ctx.local_fs.write_file(local_path, &content)?;
                ctx.shadow.write_file(local_path, content.len() as u64)?;
                ctx.journal().record(&format!(
                    "Sync file(create local): '{}' -> '{}'",
                    remote_path, local_path
                ));
            }
        }

        (None, Some(local_entry)) => {
            if stored.is_some() {
                if !ctx.local_fs.is_read_only() {
                    stats.updated_files.fetch_add(1, Ordering::SeqCst);
                    ctx.shared.backup.backup_file(local_path);
                    ctx.local_fs.delete_file(local_path)?;
                    ctx.journal()
                        .record(&format!("Sync file(delete local): '{}'", local_path));
                }
                ctx.shadow.delete_file(local_path)?;
            } else if local_entry.size > max_size {
                ctx.journal().record(&format!(
                    "Sync file(ignored create remote, big local size - {} KB): '{}' -> '{}'",
                    local_entry.size / 1024,
                    local_path,
                    remote_path
                ));
            } else if !ctx.remote_fs.is_read_only() {
                stats.updated_files.fetch_add(1, Ordering::SeqCst);
                let content = ctx.local_fs.read_file(local_path)?;
                ctx.remote_fs.write_file(remote_path, &content)?;
                ctx.shadow.write_file(local_path, content.len() as u64)?;
                ctx.journal().record(&format!(
                    "Sync file(create remote): '{}' -> '{}'",
                    local_path, remote_path
                ));
            }
        }

        (None, None) => {}
    }
    Ok(())
}

/// Drops shadow records whose local path no longer exists. Runs only
/// after an error-free pair, so a transient listing failure never wipes
/// the baseline of paths that are still there.
fn prune_shadow(ctx: &SyncCtx) -> anyhow::Result<()> {
    for path in ctx.shadow.all_paths() {
        if matches!(ctx.local_fs.exists(&path), Ok(false)) {
            ctx.journal()
                .record(&format!("Remove info about non-existing record: {}", path));
            if ctx.shadow.is_file(&path) {
                ctx.shadow.delete_file(&path)?;
            } else {
                ctx.shadow.delete_dir(&path)?;
            }
        }
    }
    Ok(())
}
