// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};

use cpulatency::read_global_latency;
use cpulatency::Error;
use cpulatency::LatencyPin;
use cpulatency::PmQosHost;
use cpulatency::SysfsHost;
use cpulatency::Target;
use cpulatency::TargetSelector;
use cpulatency::CPU_ID_ALL;

/// Permission mask of the published parameter: readable by everyone,
/// writable by nobody.
const PARAM_MODE: u32 = 0o444;

/// cpulatency: add a PM QoS request for zero latency of all CPUs or of a
/// specific CPU, and hold it until interrupted.
///
/// While the request is held, the affected CPUs do not enter idle states
/// with a non-zero exit latency.
#[derive(Debug, Parser)]
struct Opts {
    /// The id of the CPU on which the resume latency should be limited.
    /// If -1 then take the first isolated CPU. If -2 then apply zero latency
    /// to all CPUs.
    #[clap(
        short = 'c',
        long,
        env = "CPULATENCY_CPU_ID",
        default_value_t = CPU_ID_ALL,
        allow_negative_numbers = true
    )]
    cpu_id: i32,

    /// Publish the resolved cpu_id in this file (mode 0444) while the
    /// request is held.
    #[clap(long)]
    param_file: Option<PathBuf>,

    /// Print the current latency constraints and exit.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    show: bool,

    #[clap(long, default_value = "/sys", hide = true)]
    sysfs_root: PathBuf,

    #[clap(long, default_value = "/dev", hide = true)]
    dev_root: PathBuf,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// The resolved parameter, published for readers for as long as it lives.
struct ParamFile {
    path: PathBuf,
}

impl ParamFile {
    fn create(path: &Path, cpu_id: i32) -> Result<ParamFile> {
        // A leftover from an earlier run is read-only.
        let _ = fs::remove_file(path);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(PARAM_MODE)
            .open(path)
            .with_context(|| format!("Failed to create {path:?}"))?;
        writeln!(file, "{cpu_id}").with_context(|| format!("Failed to write {path:?}"))?;

        Ok(ParamFile {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for ParamFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove {:?} ({e})", self.path);
        }
    }
}

/// The `cpu_id` parameter as it reads once the request is in place: an
/// isolated CPU picked for `-1` replaces the configured value, everything
/// else keeps it, including `-1` without isolated CPUs and an explicit CPU
/// that fell back to the global request.
fn published_cpu_id(configured: i32, selected: Target) -> i32 {
    match selected {
        Target::Cpu(cpu) => i32::try_from(cpu).unwrap_or(configured),
        Target::AllCores => configured,
    }
}

fn show<W: Write>(host: &SysfsHost, out: &mut W) -> Result<()> {
    let path = host.dma_latency_path();
    let value = read_global_latency(path)?;
    writeln!(out, "{}: {value} us", path.display())?;

    for cpu in 0..host.nr_cpu_ids() {
        if !host.cpu_device_exists(cpu) {
            continue;
        }
        match host.cpu_resume_latency(cpu) {
            Ok(v) => writeln!(out, "cpu{cpu} pm_qos_resume_latency_us: {v}")?,
            Err(e) => warn!("{e:#}"),
        }
    }
    Ok(())
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

    let host = SysfsHost::with_roots(&opts.sysfs_root, &opts.dev_root)?;
    if opts.show {
        return show(&host, &mut std::io::stdout().lock());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    let pin = LatencyPin::new(&host);
    let req = match pin.start(TargetSelector::from(opts.cpu_id)) {
        Ok(req) => req,
        Err(e @ Error::InvalidTarget(_)) => {
            error!("{e}");
            std::process::exit(e.errno());
        }
        Err(e) => return Err(e).context("Failed to add PM QoS request"),
    };

    let param = match &opts.param_file {
        Some(path) => Some(ParamFile::create(
            path,
            published_cpu_id(opts.cpu_id, req.selected()),
        )?),
        None => None,
    };

    info!("Holding zero latency on {}, Ctrl-C to release", req.target());
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    drop(param);
    if let Err(e) = req.stop() {
        warn!("{e:#}");
    }
    Ok(())
}
