/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Bounded pool of OS threads for directory subtree tasks.
//!
//! Admission is gated on an atomic in-flight count so that outstanding
//! work never exceeds the worker count; submitters sleep while the pool
//! is saturated. A saturated pool worker runs the task itself instead of
//! waiting on the slot its own task is holding.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

type Job = Box<dyn FnOnce() + Send + 'static>;

const SUBMIT_POLL: Duration = Duration::from_millis(300);
const QUIESCE_POLL: Duration = Duration::from_millis(500);

thread_local! {
    static IS_POOL_WORKER: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let workers = (0..capacity)
            .map(|_| {
                let receiver = receiver.clone();
                let in_flight = in_flight.clone();
                thread::spawn(move || worker_loop(&receiver, &in_flight))
            })
            .collect();
        Self {
            sender: Some(sender),
            in_flight,
            capacity,
            workers,
        }
    }

    /// Blocks while the pool is saturated, then hands the job to a
    /// worker. Called from a saturated worker, the job runs inline.
    pub fn submit(&self, job: Job) {
        loop {
            let admitted = self
                .in_flight
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < self.capacity).then_some(n + 1)
                })
                .is_ok();
            if admitted {
                break;
            }
            if IS_POOL_WORKER.with(|w| w.get()) {
                job();
                return;
            }
            thread::sleep(SUBMIT_POLL);
        }
        let sent = self
            .sender
            .as_ref()
            .map(|sender| sender.send(job).is_ok())
            .unwrap_or(false);
        if !sent {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Blocks until no task is queued or running.
    pub fn wait_idle(&self) {
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            thread::sleep(QUIESCE_POLL);
        }
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>, in_flight: &AtomicUsize) {
    IS_POOL_WORKER.with(|w| w.set(true));
    loop {
        // The receiver guard must drop before the job runs, or one busy
        // worker would starve the whole pool.
        let received = receiver.lock().unwrap().recv();
        let Ok(job) = received else {
            break;
        };
        job();
        in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
