// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

mod report;
mod table;

use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::warn;

use report::analyze_jitter;
use report::analyze_overruns;
use report::increments;
use report::RunInfo;
use report::RunReport;
use report::TEST_MODES;
use table::Align;
use table::Cell;
use table::Table;

/// testreport: summarize latency test results.
///
/// Reads `latency-*` result files and prints one line per file with the
/// run's parameters, machine state and jitter/overrun statistics per test
/// mode.
#[derive(Debug, Parser)]
#[clap(version)]
struct Opts {
    /// Number of initial lines to be skipped.
    #[clap(short = 'i', value_name = "N", default_value = "10")]
    init: usize,

    /// Percentile defining outliers, between 0 and 100.
    #[clap(short = 'p', value_name = "P", default_value = "0", value_parser = parse_percentile)]
    outlier: f64,

    /// Add line with column numbers to header.
    #[clap(short = 'n', action = clap::ArgAction::SetTrue)]
    number_cols: bool,

    /// Enable verbose output.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// latency-* files with test results.
    files: Vec<PathBuf>,
}

fn parse_percentile(s: &str) -> Result<f64> {
    let p: f64 = s.parse().with_context(|| format!("{s:?} is not a number"))?;
    if !(0.0..=100.0).contains(&p) {
        bail!("Percentile {p} must be between 0 and 100");
    }
    Ok(p)
}

fn load(path: &Path) -> Result<RunReport> {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => bail!("{path:?} is not a file"),
    };
    let info = RunInfo::from_file_name(&name)?;
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {path:?}"))?;
    RunReport::parse(info, &content).with_context(|| format!("Failed to parse {path:?}"))
}

fn text(s: &str) -> Cell {
    Cell::Text(s.to_string())
}

fn opt_text(s: &Option<String>) -> Cell {
    match s {
        Some(s) => text(s),
        None => Cell::Missing,
    }
}

fn build_table(reports: &[RunReport], init: usize, outlier: f64) -> Table {
    let mut t = Table::new();
    let num = t.add_column("data", "", "num", "1", Align::Right, 3);
    let param = t.add_column("data", "", "kernel parameter", "1", Align::Left, 20);
    let load = t.add_column("data", "", "load", "1", Align::Left, 5);
    let quality = t.add_column("data", "", "quality", "1", Align::Left, 7);
    let cpuid = t.add_column("data", "", "cpuid", "1", Align::Left, 5);
    let latency = t.add_column("data", "", "latency", "1", Align::Left, 4);
    let performance = t.add_column("data", "", "performance", "1", Align::Left, 3);
    let temp = t.add_column("data", "", "temp", "C", Align::Right, 5);
    let freq = t.add_column("data", "", "freq", "MHz", Align::Right, 6);
    let poll = t.add_column("data", "", "poll", "%", Align::Right, 5);

    let modes: Vec<&str> = TEST_MODES
        .iter()
        .copied()
        .filter(|mode| reports.iter().any(|r| r.tests.contains_key(*mode)))
        .collect();
    let mut mode_cols = vec![];
    for mode in modes.iter() {
        let section = format!("{mode} latency");
        let jitter = ["mean", "stdev", "max"]
            .map(|label| t.add_column(&section, "jitter", label, "ns", Align::Right, 7));
        let overruns =
            ["mean", "max"].map(|label| t.add_column(&section, "overruns", label, "1", Align::Right, 6));
        mode_cols.push((*mode, jitter, overruns));
    }

    for r in reports {
        let row = t.add_row();
        t.set(row, num, text(&r.info.num));
        t.set(row, param, text(&r.info.params));
        t.set(row, load, text(&r.info.load));
        t.set(row, quality, text(&r.info.quality));
        t.set(row, cpuid, text(&format!("cpu{}", r.info.cpuid)));
        t.set(row, latency, text(&r.info.latency));
        t.set(
            row,
            performance,
            text(if r.info.performance { "yes" } else { "no" }),
        );
        t.set(row, temp, opt_text(&r.coretemp));
        t.set(row, freq, opt_text(&r.cpufreq));
        t.set(row, poll, opt_text(&r.poll));

        for (mode, jitter_cols, overrun_cols) in mode_cols.iter() {
            let test = match r.tests.get(*mode) {
                Some(test) => test,
                None => continue,
            };

            let jitter = test.jitter.get(init..).unwrap_or(&[]);
            if let Some(stats) = analyze_jitter(jitter, outlier) {
                for (c, v) in jitter_cols.iter().zip([stats.mean, stats.stdev, stats.max]) {
                    t.set(row, *c, Cell::Num(v, 0));
                }
            }

            let overruns = increments(&test.overruns);
            if let Some(stats) = analyze_overruns(overruns.get(init..).unwrap_or(&[])) {
                for (c, v) in overrun_cols.iter().zip([stats.mean, stats.max]) {
                    t.set(row, *c, Cell::Num(v, 0));
                }
            }
        }
    }

    t
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Warn,
        1 => simplelog::LevelFilter::Info,
        _ => simplelog::LevelFilter::Debug,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Off)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let mut reports = vec![];
    for path in opts.files.iter() {
        match load(path) {
            Ok(r) => reports.push(r),
            Err(e) => warn!("Skipping {path:?}: {e:#}"),
        }
    }

    let table = build_table(&reports, opts.init, opts.outlier);
    table.write(&mut std::io::stdout().lock(), opts.number_cols)?;
    Ok(())
}
