//! Debounced flush scheduling.
//!
//! A single idle timer per store instance. Every queued write arms it;
//! writes arriving before the deadline push it back, so bursts coalesce
//! into one flush. Arm, cancel, and fire are all serialized through one
//! worker thread's channel loop, so a reset can never race a concurrently
//! firing timer.
//!
//! State machine: idle -> armed (first write) -> armed (reset on each
//! write) -> firing (deadline passes) -> idle.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

enum TimerCommand {
    Arm,
    Cancel,
    Shutdown,
}

/// Handle to the debounce worker thread.
pub struct DebounceTimer {
    tx: Sender<TimerCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DebounceTimer {
    /// Spawn the worker. `on_fire` runs on the worker thread each time the
    /// idle deadline passes without a new arm.
    pub fn spawn<F>(delay: Duration, on_fire: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let handle = std::thread::spawn(move || run(delay, rx, on_fire));
        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Start or reset the idle deadline.
    pub fn arm(&self) {
        let _ = self.tx.send(TimerCommand::Arm);
    }

    /// Drop any pending deadline without firing.
    pub fn cancel(&self) {
        let _ = self.tx.send(TimerCommand::Cancel);
    }

    /// Stop the worker and wait for it to exit. A pending deadline is
    /// discarded; callers flush explicitly before shutting down.
    pub fn shutdown(&self) {
        let _ = self.tx.send(TimerCommand::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<F: Fn()>(delay: Duration, rx: Receiver<TimerCommand>, on_fire: F) {
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            Some(at) => match rx.recv_deadline(at) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    deadline = None;
                    on_fire();
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            TimerCommand::Arm => deadline = Some(Instant::now() + delay),
            TimerCommand::Cancel => deadline = None,
            TimerCommand::Shutdown => break,
        }
    }
}
