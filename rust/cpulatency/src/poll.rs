// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Busy poll
//!
//! Keeps a CPU in C0 by spinning a dedicated thread on it. The worker never
//! blocks, sleeps or yields, and the only way to end it is the cooperative
//! stop flag raised by [`PollWorker::stop`]. Signals are left to the
//! controlling thread.

use crate::Error;
use crate::Result;
use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

pub const WORKER_NAME: &str = "poll";

// Publishing every iteration would turn the spin into a store loop.
const SPINS_PUBLISH_MASK: u64 = (1 << 16) - 1;

#[derive(Debug, Clone, Default)]
pub struct PollOpts {
    /// Bind the worker to this CPU before it starts spinning.
    pub cpu: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    StoppedCleanly,
    StopFailed,
}

#[derive(Default)]
struct Shared {
    stop: AtomicBool,
    spins: AtomicU64,
}

pub struct PollWorker {
    name: String,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl PollWorker {
    /// Spawn the worker. Returns once the worker is spinning, or with the
    /// worker already gone if it could not be created or bound.
    pub fn start(opts: &PollOpts) -> Result<PollWorker> {
        info!("INIT POLL");

        let shared = Arc::new(Shared::default());
        let (started_tx, started_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn({
                let shared = shared.clone();
                let cpu = opts.cpu;
                move || poll_task(&shared, cpu, started_tx)
            })
            .map_err(Error::WorkerCreationFailed)?;
        info!("POLL CREATED");

        match started_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(Error::WorkerCreationFailed(io::Error::other(
                    "poll worker exited during start-up",
                )));
            }
        }

        let name = handle.thread().name().unwrap_or(WORKER_NAME).to_string();
        info!("POLL Thread : {name}");

        Ok(PollWorker {
            name,
            shared,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker thread is still alive.
    pub fn is_running(&self) -> bool {
        match &self.handle {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    /// Loop iterations done so far. Updated in batches.
    pub fn spins(&self) -> u64 {
        self.shared.spins.load(Ordering::Relaxed)
    }

    /// Ask the worker to stop and wait for it, however long that takes.
    pub fn stop(mut self) -> StopOutcome {
        self.join()
    }

    fn join(&mut self) -> StopOutcome {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return StopOutcome::StoppedCleanly,
        };

        self.shared.stop.store(true, Ordering::Relaxed);
        let outcome = match handle.join() {
            Ok(()) => {
                debug!("poll worker spun {} times", self.spins());
                info!("POLL STOPPED");
                StopOutcome::StoppedCleanly
            }
            Err(_) => {
                warn!("poll worker {} panicked", self.name);
                StopOutcome::StopFailed
            }
        };
        info!("EXIT POLL");
        outcome
    }
}

impl Drop for PollWorker {
    fn drop(&mut self) {
        self.join();
    }
}

impl fmt::Debug for PollWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollWorker")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("spins", &self.spins())
            .finish()
    }
}

fn poll_task(shared: &Shared, cpu: Option<usize>, started: mpsc::Sender<Result<()>>) {
    if let Some(cpu) = cpu {
        if let Err(source) = bind_to_cpu(cpu) {
            let _ = started.send(Err(Error::WorkerBindFailed { cpu, source }));
            return;
        }
    }

    info!("RUN POLL");
    let _ = started.send(Ok(()));
    drop(started);

    let mut spins: u64 = 0;
    while !shared.stop.load(Ordering::Relaxed) {
        spins = spins.wrapping_add(1);
        if spins & SPINS_PUBLISH_MASK == 0 {
            shared.spins.store(spins, Ordering::Relaxed);
        }
    }
    shared.spins.store(spins, Ordering::Relaxed);
}

fn bind_to_cpu(cpu: usize) -> io::Result<()> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    }

    let ret = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
