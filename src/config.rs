/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone)]
pub struct Config {
    /// Path of the sync journal file
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// Directory holding per-pair sync state and backups
    #[serde(default = "default_settings_dir")]
    pub settings_dir: String,
    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// One sync task: a remote half and a local half whose `sync_paths` are
/// paired by index.
#[derive(Serialize, Deserialize, Clone)]
pub struct TaskConfig {
    pub name: String,
    pub remote: EndpointConfig,
    pub local: EndpointConfig,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct EndpointConfig {
    /// Roots to synchronize, paired by index with the other half
    pub sync_paths: Vec<String>,
    /// WebDAV host; empty means this half is on the host filesystem
    #[serde(default)]
    pub server: String,
    /// 0 uses the protocol default
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_proto")]
    pub proto: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Files above this size are never transferred; 0 means unlimited
    #[serde(default)]
    pub max_file_size_kb: u64,
    /// Mutations on this half become no-ops (one-way mirroring)
    #[serde(default)]
    pub read_only: bool,
    /// Gate for the initial-sync branch when a root is missing
    #[serde(default = "default_true")]
    pub only_if_sync_path_exist: bool,
    /// Take server-side DAV locks around remote operations
    #[serde(default)]
    pub use_locks: bool,
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

impl EndpointConfig {
    pub fn is_remote(&self) -> bool {
        !self.server.is_empty()
    }
}

fn default_log_file() -> String {
    "dav-sync.log".to_owned()
}

fn default_settings_dir() -> String {
    "./dav-sync-data".to_owned()
}

fn default_proto() -> String {
    "https".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_max_threads() -> usize {
    1
}
