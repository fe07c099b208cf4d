// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Parsing and statistics for latency test result files.
//!
//! A result file is named
//! `latency-<host>-<k1>-<k2>-<k3>-<num>-<year>-<month>-<day>-<params...>-<load>-<quality>`
//! and holds the output of the latency tests followed, after a
//! `Loaded modules` line, by a description of the machine.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use log::{debug, warn};

/// Test modes in report order.
pub const TEST_MODES: [&str; 3] = ["kern", "kthreads", "user"];

const SECTION_END: &str = "------------";
const MODULES_MARKER: &str = "Loaded modules";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub host: String,
    pub kernel: String,
    pub num: String,
    pub date: String,
    /// Kernel parameters not broken out into their own field.
    pub params: String,
    pub load: String,
    pub quality: String,
    pub cpuid: String,
    /// Which latency pinning was active: `-`, `user`, `cpu` or `kern`.
    pub latency: String,
    pub performance: bool,
}

impl RunInfo {
    pub fn from_file_name(name: &str) -> Result<RunInfo> {
        let cols: Vec<&str> = name.split('-').collect();
        if cols.len() < 11 {
            bail!("Result file name {name:?} has too few fields");
        }

        let mut info = RunInfo {
            host: cols[1].to_string(),
            kernel: cols[2..5].join("-"),
            num: cols[5].to_string(),
            date: cols[6..9].join("-"),
            params: String::new(),
            load: cols[cols.len() - 2].to_string(),
            quality: cols[cols.len() - 1].to_string(),
            cpuid: "0".to_string(),
            latency: "-".to_string(),
            performance: false,
        };

        let mut params = vec![];
        for p in &cols[9..cols.len() - 2] {
            match *p {
                "nolatency" => info.latency = "user".to_string(),
                "nocpulatency" => info.latency = "cpu".to_string(),
                "nocpulatencyall" => info.latency = "kern".to_string(),
                "performance" => info.performance = true,
                p => match p.strip_prefix("cpu") {
                    Some(id) => info.cpuid = id.to_string(),
                    None => params.push(p),
                },
            }
        }
        info.params = params.join("-");

        Ok(info)
    }
}

/// Raw samples of one latency test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyTest {
    /// Per-period `lat max - lat min`, in ns.
    pub jitter: Vec<i64>,
    /// Cumulative overrun counter.
    pub overruns: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub info: RunInfo,
    /// Latency tests by mode.
    pub tests: BTreeMap<String, LatencyTest>,
    pub coretemp: Option<String>,
    pub cpufreq: Option<String>,
    pub poll: Option<String>,
}

#[derive(Clone, Copy)]
enum Section {
    None,
    Environment,
    Topology,
    Temperatures,
}

fn parse_field(s: &str, line: &str) -> Result<i64> {
    s.trim()
        .parse::<i64>()
        .with_context(|| format!("Failed to parse {:?} in line {:?}", s.trim(), line))
}

impl RunReport {
    pub fn parse(mut info: RunInfo, content: &str) -> Result<RunReport> {
        let mut lines = content.lines();
        let mut tests = BTreeMap::new();
        let mut current: Option<(String, String, LatencyTest)> = None;

        for line in lines.by_ref() {
            if line.contains(MODULES_MARKER) {
                break;
            }
            if line.contains("test:") {
                let name = line.split_whitespace().next().unwrap_or("");
                current = match name.split_once('/') {
                    Some((mode, kind)) => {
                        Some((mode.to_string(), kind.to_string(), LatencyTest::default()))
                    }
                    None => {
                        warn!("Ignoring test without mode/type: {line:?}");
                        None
                    }
                };
                continue;
            }
            if line.contains(SECTION_END) {
                if let Some((mode, kind, test)) = current.take() {
                    if kind == "latency" {
                        tests.insert(mode, test);
                    } else {
                        debug!("Skipping {mode}/{kind} test");
                    }
                }
                continue;
            }
            if let Some((_, kind, test)) = current.as_mut() {
                let cols: Vec<&str> = line.split('|').collect();
                if cols[0] != "RTD" || kind != "latency" {
                    continue;
                }
                if cols.len() < 7 {
                    bail!("Truncated latency line {line:?}");
                }
                let lat_min = parse_field(cols[1], line)?;
                let lat_max = parse_field(cols[4], line)?;
                test.jitter.push(lat_max - lat_min);
                test.overruns.push(parse_field(cols[6], line)?);
            }
        }

        let mut coretemp = None;
        let mut cpufreq = None;
        let mut poll = None;
        let mut section = Section::None;
        for line in lines {
            if line.contains("Environment") {
                section = Section::Environment;
            } else if line.contains("CPU topology") {
                section = Section::Topology;
            } else if line.contains("CPU core temperatures") {
                section = Section::Temperatures;
            }
            if line.trim().is_empty() {
                section = Section::None;
                continue;
            }

            match section {
                Section::None => {}
                Section::Environment => {
                    if line.contains("tests run on cpu") {
                        if let Some((_, cpu)) = line.split_once(':') {
                            info.cpuid = cpu.trim().to_string();
                        }
                    }
                }
                Section::Topology => {
                    let cpu = format!("cpu{}", info.cpuid);
                    let cols: Vec<&str> = line.split_whitespace().collect();
                    if cols.first() == Some(&cpu.as_str()) {
                        if let Some(freq) = cols.get(4) {
                            cpufreq = Some(freq.to_string());
                        }
                        if let Some(p) = cols.get(8) {
                            poll = Some(p.trim_end_matches('%').to_string());
                        }
                    }
                }
                Section::Temperatures => {
                    let core = format!("Core {}:", info.cpuid);
                    if let Some(rest) = line.trim_start().strip_prefix(&core) {
                        if let Some(temp) = rest.split_whitespace().next() {
                            coretemp = Some(
                                temp.trim_start_matches('+')
                                    .trim_end_matches(['°', 'C'])
                                    .to_string(),
                            );
                        }
                    }
                }
            }
        }

        Ok(RunReport {
            info,
            tests,
            coretemp,
            cpufreq,
            poll,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterStats {
    pub mean: f64,
    pub stdev: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverrunStats {
    pub mean: f64,
    pub max: f64,
}

/// Percentile with linear interpolation between the closest ranks.
/// `sorted` must be sorted and non-empty. `p` is clamped to `0..=100`.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let last = sorted.len() - 1;
    let rank = (p.clamp(0.0, 100.0) / 100.0 * last as f64).clamp(0.0, last as f64);
    let lo = rank.floor() as usize;
    let hi = (rank.ceil() as usize).min(last);
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

/// Mean and (population) standard deviation of the jitter, leaving out the
/// `outlier` percent at either end, and the maximum over all samples.
pub fn analyze_jitter(data: &[i64], outlier: f64) -> Option<JitterStats> {
    if data.is_empty() {
        return None;
    }
    let values: Vec<f64> = data.iter().map(|&v| v as f64).collect();

    let core: Vec<f64> = if outlier > 0.0 {
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let lo = percentile(&sorted, outlier);
        let hi = percentile(&sorted, 100.0 - outlier);
        values
            .iter()
            .copied()
            .filter(|v| *v >= lo && *v <= hi)
            .collect()
    } else {
        values.clone()
    };
    if core.is_empty() {
        return None;
    }

    let m = mean(&core);
    let var = core.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / core.len() as f64;
    let max = values.iter().copied().fold(f64::MIN, f64::max);

    Some(JitterStats {
        mean: m,
        stdev: var.sqrt(),
        max,
    })
}

/// Mean and maximum of per-period overrun increments.
pub fn analyze_overruns(increments: &[i64]) -> Option<OverrunStats> {
    if increments.is_empty() {
        return None;
    }
    let values: Vec<f64> = increments.iter().map(|&v| v as f64).collect();
    Some(OverrunStats {
        mean: mean(&values),
        max: values.iter().copied().fold(f64::MIN, f64::max),
    })
}

/// Differences between consecutive samples of a cumulative counter.
pub fn increments(counter: &[i64]) -> Vec<i64> {
    counter.windows(2).map(|w| w[1] - w[0]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: &str = "latency-rtpc-4.4.115-rtai-5-3-2018-03-01-isolcpus=1-cpu1-nocpulatencyall-idle-good";

    fn sample() -> String {
        let mut s = String::from("kern/latency test: periodic\n");
        s.push_str("RTH|    lat min|    ovl min|    lat avg|    lat max|    ovl max|   overruns\n");
        for (i, (min, max)) in [(-100, 400), (-50, 250), (-20, 980)].iter().enumerate() {
            s.push_str(&format!("RTD|{min:11}|{min:11}|{:11}|{max:11}|{max:11}|{:11}\n", 0, i * 2));
        }
        s.push_str("------------------------------\n");
        s.push_str("user/preempt test:\n");
        s.push_str("RTD|  1|  2|  3|  4|  5\n");
        s.push_str("------------------------------\n");
        s.push_str("Loaded modules:\n  rtai_hal\n\n");
        s.push_str("Environment:\n  tests run on cpu: 2\n\n");
        s.push_str("CPU topology:\n");
        s.push_str("  cpu2  0 0 0 3400 800 3400 C6 12%\n");
        s.push_str("  cpu20 0 0 0 1200 800 3400 C6 99%\n\n");
        s.push_str("CPU core temperatures:\n  Core 2:        +45.0°C  (high = +80.0°C)\n\n");
        s
    }

    #[test]
    fn test_file_name() {
        let info = RunInfo::from_file_name(NAME).unwrap();
        assert_eq!(info.host, "rtpc");
        assert_eq!(info.kernel, "4.4.115-rtai-5");
        assert_eq!(info.num, "3");
        assert_eq!(info.date, "2018-03-01");
        assert_eq!(info.params, "isolcpus=1");
        assert_eq!(info.cpuid, "1");
        assert_eq!(info.latency, "kern");
        assert!(!info.performance);
        assert_eq!(info.load, "idle");
        assert_eq!(info.quality, "good");
    }

    #[test]
    fn test_file_name_too_short() {
        assert!(RunInfo::from_file_name("latency-rtpc-4.4").is_err());
    }

    #[test]
    fn test_parse_report() {
        let info = RunInfo::from_file_name(NAME).unwrap();
        let report = RunReport::parse(info, &sample()).unwrap();

        let kern = &report.tests["kern"];
        assert_eq!(kern.jitter, vec![500, 300, 1000]);
        assert_eq!(kern.overruns, vec![0, 2, 4]);
        assert!(!report.tests.contains_key("user"));

        assert_eq!(report.info.cpuid, "2");
        assert_eq!(report.cpufreq.as_deref(), Some("3400"));
        assert_eq!(report.poll.as_deref(), Some("12"));
        assert_eq!(report.coretemp.as_deref(), Some("45.0"));
    }

    #[test]
    fn test_parse_bad_number() {
        let info = RunInfo::from_file_name(NAME).unwrap();
        let content = "kern/latency test:\nRTD| x| 0| 0| 1| 0| 0\n";
        assert!(RunReport::parse(info, content).is_err());
    }

    #[test]
    fn test_analyze_jitter() {
        let stats = analyze_jitter(&[2, 4, 4, 4, 5, 5, 7, 9], 0.0).unwrap();
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.stdev, 2.0);
        assert_eq!(stats.max, 9.0);
        assert!(analyze_jitter(&[], 0.0).is_none());
    }

    #[test]
    fn test_analyze_jitter_outliers() {
        let data: Vec<i64> = (1..=100).collect();
        let stats = analyze_jitter(&data, 5.0).unwrap();
        // 5th and 95th percentile are 5.95 and 95.05: 6..=95 remain.
        assert_eq!(stats.mean, 50.5);
        assert_eq!(stats.max, 100.0);
    }

    #[test]
    fn test_analyze_jitter_outliers_beyond_range() {
        let data: Vec<i64> = (1..=10).collect();
        // Both tails overlap, nothing is left in between.
        assert_eq!(analyze_jitter(&data, 150.0), None);
        assert_eq!(analyze_jitter(&data, 100.0), None);

        let sorted: Vec<f64> = data.iter().map(|&v| v as f64).collect();
        assert_eq!(percentile(&sorted, 150.0), 10.0);
        assert_eq!(percentile(&sorted, -50.0), 1.0);
        assert_eq!(percentile(&[4.0], 100.0), 4.0);
    }

    #[test]
    fn test_overruns() {
        let inc = increments(&[0, 2, 2, 7]);
        assert_eq!(inc, vec![2, 0, 5]);
        let stats = analyze_overruns(&inc).unwrap();
        assert_eq!(stats.max, 5.0);
        assert!((stats.mean - 7.0 / 3.0).abs() < 1e-9);
        assert!(analyze_overruns(&[]).is_none());
    }
}
