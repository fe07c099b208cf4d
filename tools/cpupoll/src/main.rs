// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use cpulatency::PollOpts;
use cpulatency::PollWorker;
use cpulatency::StopOutcome;

/// cpupoll: poll a CPU to keep it in C0 state.
///
/// Spins a worker thread that never sleeps until interrupted. Check with
/// `ps -eLf | grep poll`.
#[derive(Debug, Parser)]
struct Opts {
    /// Bind the poll worker to this CPU.
    #[clap(short = 'c', long, env = "CPUPOLL_CPU")]
    cpu: Option<usize>,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let worker = PollWorker::start(&PollOpts { cpu: opts.cpu })?;
    match opts.cpu {
        Some(cpu) => info!("Polling CPU {cpu}, Ctrl-C to stop"),
        None => info!("Polling, Ctrl-C to stop"),
    }

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    if worker.stop() == StopOutcome::StopFailed {
        warn!("poll worker did not exit cleanly");
    }
    Ok(())
}
