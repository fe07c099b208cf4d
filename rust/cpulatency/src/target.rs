// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use crate::PmQosHost;
use log::{debug, info, warn};
use std::fmt;

/// `cpu_id` parameter value selecting every CPU.
pub const CPU_ID_ALL: i32 = -2;
/// `cpu_id` parameter value selecting the first isolated CPU.
pub const CPU_ID_AUTO_ISOLATED: i32 = -1;

/// Which CPUs the latency request should cover, as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSelector {
    AllCores,
    AutoIsolated,
    SpecificCore(usize),
}

impl From<i32> for TargetSelector {
    /// `-1` picks the first isolated CPU, any other negative value means all
    /// CPUs, and anything else is an explicit CPU id.
    fn from(cpu_id: i32) -> Self {
        match cpu_id {
            CPU_ID_AUTO_ISOLATED => TargetSelector::AutoIsolated,
            id if id < 0 => TargetSelector::AllCores,
            id => TargetSelector::SpecificCore(id as usize),
        }
    }
}

/// A resolved selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    AllCores,
    Cpu(usize),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::AllCores => write!(f, "all CPUs"),
            Target::Cpu(cpu) => write!(f, "CPU {cpu}"),
        }
    }
}

impl TargetSelector {
    /// Resolve the selection against the host. Only `AutoIsolated` looks at
    /// the host, and it never fails: without an isolated CPU it falls back to
    /// all CPUs.
    pub fn resolve(self, host: &dyn PmQosHost) -> Target {
        match self {
            TargetSelector::AllCores => Target::AllCores,
            TargetSelector::SpecificCore(cpu) => Target::Cpu(cpu),
            TargetSelector::AutoIsolated => match first_isolated_cpu(host) {
                Some(cpu) => {
                    info!("cpulatency: first isolated CPU is {cpu}");
                    Target::Cpu(cpu)
                }
                None => {
                    info!("no isolated CPU - set latency for all CPUs to zero");
                    Target::AllCores
                }
            },
        }
    }
}

fn first_isolated_cpu(host: &dyn PmQosHost) -> Option<usize> {
    let isolated = match host.isolated_cpus() {
        Ok(mask) => mask,
        Err(e) => {
            warn!("Failed to read isolated CPUs ({e:#})");
            return None;
        }
    };

    debug!("isolated CPUs: {isolated} ({} total)", isolated.weight());
    isolated.first().filter(|&cpu| cpu < host.nr_cpu_ids())
}
