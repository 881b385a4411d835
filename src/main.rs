/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{path::Path, time::Instant};

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use args::{Args, Mode};
use config::{Config, EndpointConfig, TaskConfig};
use dav::DavClient;
use fs::local::LocalFileSystem;
use fs::read_only::ReadOnlyFileSystem;
use fs::webdav::WebDavFileSystem;
use fs::FileSystem;
use journal::Journal;
use sync::Syncer;

mod args;
mod backup;
mod config;
mod dav;
mod fs;
mod journal;
mod path;
mod pool;
mod shadow;
mod stats;
mod sync;

fn main() {
    let status = run();
    if let Err(ref err) = status {
        error!("{:?}", err);
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    log4rs::init_file("log4rs.yml", Default::default()).with_context(|| "failed to init logger")?;
    info!("init logger");

    info!("read configuration");
    let config = std::fs::read_to_string(&args.config_path)
        .with_context(|| "failed to read configuration file")?;
    let config: Config =
        toml::from_str(&config).with_context(|| "failed to parse configuration")?;

    match args.mode {
        Mode::Sync { task } => run_sync(&config, &task),
        Mode::LastLog => {
            for line in Journal::last_session(Path::new(&config.log_file))? {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

fn run_sync(config: &Config, task_filter: &[String]) -> anyhow::Result<()> {
    let journal = Journal::new(Some(config.log_file.clone().into()));
    journal.begin_session();

    let start = Instant::now();
    let mut tasks: Vec<&TaskConfig> = config
        .task
        .iter()
        .filter(|t| task_filter.is_empty() || task_filter.contains(&t.name))
        .collect();
    tasks.sort_by(|a, b| a.name.cmp(&b.name));

    for task in tasks {
        info!("start sync for task '{}'", task.name);
        let task_start = Instant::now();
        if let Err(err) = run_task(config, task) {
            error!("task '{}' failed: {:?}", task.name, err);
            journal.record_error(&format!("Error: can't run task '{}'", task.name), &err);
        }
        info!(
            "end sync for task '{}', sync time: {:.2} seconds",
            task.name,
            task_start.elapsed().as_secs_f64()
        );
    }

    info!("total sync time: {:.2} seconds", start.elapsed().as_secs_f64());
    Ok(())
}

fn run_task(config: &Config, task: &TaskConfig) -> anyhow::Result<()> {
    if task.remote.sync_paths.len() != task.local.sync_paths.len() {
        anyhow::bail!("not equal amount of paths to sync");
    }

    let remote_fs = build_filesystem(&task.remote)?;
    let local_fs = build_filesystem(&task.local)?;
    let max_file_size_kb = task.remote.max_file_size_kb.max(task.local.max_file_size_kb);
    let max_workers = task.remote.max_threads.max(task.local.max_threads);

    let mut syncer = Syncer::new(
        remote_fs,
        local_fs,
        Some(config.log_file.clone().into()),
        Path::new(&config.settings_dir),
        max_file_size_kb,
        max_workers,
    )?;
    for (remote_root, local_root) in task.remote.sync_paths.iter().zip(&task.local.sync_paths) {
        syncer.add_pair(remote_root, local_root);
    }
    syncer.sync(
        task.remote.only_if_sync_path_exist,
        task.local.only_if_sync_path_exist,
    );
    Ok(())
}

fn build_filesystem(endpoint: &EndpointConfig) -> anyhow::Result<Box<dyn FileSystem>> {
    let fs: Box<dyn FileSystem> = if endpoint.is_remote() {
        Box::new(WebDavFileSystem::new(DavClient::new(
            &endpoint.server,
            endpoint.port,
            &endpoint.proto,
            &endpoint.username,
            &endpoint.password,
            endpoint.use_locks,
        )?))
    } else {
        Box::new(LocalFileSystem::new())
    };
    Ok(if endpoint.read_only {
        Box::new(ReadOnlyFileSystem::new(fs))
    } else {
        fs
    })
}
