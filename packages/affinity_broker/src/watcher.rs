//! Background thread that notices exited workers and triggers periodic rebalancing.

use std::panic;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::debug;

use crate::scheduler::Shared;

/// Owns the watcher thread. Dropping it stops the thread and waits for it to finish, which may
/// take as long as one redistribution pass.
#[derive(Debug)]
pub(crate) struct Watcher {
    // Dropping the sender wakes up the thread and tells it to stop.
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Watcher {
    pub(crate) fn start(shared: Arc<Shared>) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("affinity-broker-watcher".to_owned())
            .spawn(move || watch(&shared, &stop_rx))
            .expect("failed to spawn watcher thread - we do not support operation without it");

        Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        drop(self.stop_tx.take());

        let Some(thread) = self.thread.take() else {
            return;
        };

        if let Err(payload) = thread.join() {
            // Panicking again while already unwinding would abort the process.
            if !thread::panicking() {
                panic::resume_unwind(payload);
            }
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
enum Wake {
    Exited,
    Interval,
    Stop,
}

fn watch(shared: &Shared, stop_rx: &Receiver<()>) {
    debug!("watcher started");

    loop {
        match wait(shared, stop_rx) {
            Wake::Exited => {
                shared.reclaim();
            }
            Wake::Interval => {
                shared.rebalance();
            }
            Wake::Stop => break,
        }
    }

    debug!("watcher stopped");
}

/// Polls for exited workers until one is found, the watch interval elapses or the watcher is
/// told to stop.
fn wait(shared: &Shared, stop_rx: &Receiver<()>) -> Wake {
    let interval = shared.config().get_watch_interval();
    let poll_interval = shared.config().get_exit_poll_interval();

    let started = Instant::now();

    loop {
        if shared.has_exited_workers() {
            return Wake::Exited;
        }

        let remaining = interval.saturating_sub(started.elapsed());

        if remaining.is_zero() {
            return Wake::Interval;
        }

        match stop_rx.recv_timeout(poll_interval.min(remaining)) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Wake::Stop,
        }
    }
}
