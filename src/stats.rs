/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{
    io::{self, Write},
    sync::atomic::{AtomicU64, Ordering},
    sync::Mutex,
    time::Instant,
};

use crate::journal::Journal;

const SPINNER: &[char] = &['|', '/', '-', '\\'];
const RENDER_INTERVAL_SECS: u64 = 1;

struct Progress {
    last_render: Instant,
    frame: usize,
}

/// Counters shared by all workers plus the single-line progress
/// indicator. The error counter is reset per pair and gates the shadow
/// garbage collection.
pub struct SyncStats {
    pub processed_dirs: AtomicU64,
    pub processed_files: AtomicU64,
    pub updated_dirs: AtomicU64,
    pub updated_files: AtomicU64,
    errors: AtomicU64,
    progress: Mutex<Progress>,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStats {
    pub fn new() -> Self {
        Self {
            processed_dirs: AtomicU64::new(0),
            processed_files: AtomicU64::new(0),
            updated_dirs: AtomicU64::new(0),
            updated_files: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            progress: Mutex::new(Progress {
                last_render: Instant::now(),
                frame: 0,
            }),
        }
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reset_errors(&self) {
        self.errors.store(0, Ordering::SeqCst);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }

    /// Renders the progress line, at most once per second unless forced.
    /// Rendering shares the journal lock with record writes and backups.
    pub fn render(&self, journal: &Journal, force: bool) {
        journal.with_lock(|| {
            let mut progress = self.progress.lock().unwrap();
            if !force
                && progress.last_render.elapsed().as_secs() < RENDER_INTERVAL_SECS
            {
                return;
            }
            progress.last_render = Instant::now();
            print!(
                "{} Dirs: {} [{}] / Files: {} [{}]                  \r",
                SPINNER[progress.frame],
                self.processed_dirs.load(Ordering::SeqCst),
                self.updated_dirs.load(Ordering::SeqCst),
                self.processed_files.load(Ordering::SeqCst),
                self.updated_files.load(Ordering::SeqCst),
            );
            let _ = io::stdout().flush();
            progress.frame = (progress.frame + 1) % SPINNER.len();
        });
    }
}
