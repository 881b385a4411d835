/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The sync journal: a line-oriented UTF-8 append file recording every
//! sync decision. Sessions are delimited by a separator line so that
//! consumers can slice out the most recent one. Error records start with
//! `Error: `, warnings with `Warning: `.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use anyhow::Context;
use chrono::Local;
use log::error;

pub const SESSION_SEPARATOR: &str = "--------------";

pub struct Journal {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl Journal {
    /// `None` disables journaling; records are silently dropped.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Marks the start of a run: separator line plus a timestamp.
    pub fn begin_session(&self) {
        self.record(&format!("{}\n{}:\n", SESSION_SEPARATOR, Local::now()));
    }

    pub fn record(&self, line: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let _guard = self.lock.lock().unwrap();
        if let Err(err) = append_line(path, line) {
            error!("failed to write journal record: {:?}", err);
        }
    }

    pub fn record_error(&self, line: &str, err: &anyhow::Error) {
        self.record(&format!("{}\n{:#}", line, err));
    }

    /// Serializes arbitrary work on the journal lock. Backup copies and
    /// progress rendering share this lock with record writes.
    pub fn with_lock<T>(&self, work: impl FnOnce() -> T) -> T {
        let _guard: MutexGuard<()> = self.lock.lock().unwrap();
        work()
    }

    /// Records of the most recent session, separator excluded.
    pub fn last_session(path: &Path) -> anyhow::Result<Vec<String>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read journal '{}'", path.display()))?;
        let mut last = vec![];
        for line in content.lines() {
            if line.starts_with(SESSION_SEPARATOR) {
                last.clear();
            } else {
                last.push(line.to_owned());
            }
        }
        Ok(last)
    }
}

fn append_line(path: &Path, line: &str) -> anyhow::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open journal '{}'", path.display()))?;
    writeln!(file, "{}", line)
        .with_context(|| format!("failed to append to journal '{}'", path.display()))
}
