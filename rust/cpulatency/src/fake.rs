// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! In-memory [`PmQosHost`] that keeps score of the requests handed out.
//!
//! The aggregate values it reports follow the kernel: the global constraint
//! is the minimum of all active global requests, or
//! [`PM_QOS_CPU_LATENCY_DEFAULT_US`] when there are none.

use crate::pm::PM_QOS_CPU_LATENCY_DEFAULT_US;
use crate::Cpumask;
use crate::PmQosHost;
use crate::QosRequest;
use crate::ResumeLatencySupport;
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Requests {
    next_id: u64,
    global: BTreeMap<u64, i32>,
    cpu: BTreeMap<u64, (usize, i32)>,
    added: usize,
    removed: usize,
}

#[derive(Debug, Clone)]
pub struct FakeHost {
    nr_cpu_ids: usize,
    present: Cpumask,
    isolated: Cpumask,
    support: ResumeLatencySupport,
    refuse_requests: bool,
    requests: Arc<Mutex<Requests>>,
}

impl FakeHost {
    /// A host with `nr_cpu_ids` present CPUs, none isolated, and per-CPU
    /// resume latency support.
    pub fn new(nr_cpu_ids: usize) -> FakeHost {
        let mut present = Cpumask::new(nr_cpu_ids);
        for cpu in 0..nr_cpu_ids {
            let _ = present.set_cpu(cpu);
        }

        FakeHost {
            nr_cpu_ids,
            present,
            isolated: Cpumask::new(nr_cpu_ids),
            support: ResumeLatencySupport::Supported,
            refuse_requests: false,
            requests: Arc::new(Mutex::new(Requests::default())),
        }
    }

    pub fn with_isolated(mut self, cpus: &[usize]) -> FakeHost {
        for &cpu in cpus {
            let _ = self.isolated.set_cpu(cpu);
        }
        self
    }

    pub fn with_support(mut self, support: ResumeLatencySupport) -> FakeHost {
        self.support = support;
        self
    }

    /// Take a CPU's device away, as if it was never registered.
    pub fn without_cpu(mut self, cpu: usize) -> FakeHost {
        let _ = self.present.clear_cpu(cpu);
        self
    }

    /// Make every request registration fail.
    pub fn refusing_requests(mut self) -> FakeHost {
        self.refuse_requests = true;
        self
    }

    /// Aggregate global latency constraint.
    pub fn global_latency(&self) -> i32 {
        let requests = self.requests.lock().unwrap();
        requests
            .global
            .values()
            .copied()
            .min()
            .unwrap_or(PM_QOS_CPU_LATENCY_DEFAULT_US)
    }

    /// Aggregate resume latency constraint of one CPU, if any is active.
    pub fn cpu_latency(&self, cpu: usize) -> Option<i32> {
        let requests = self.requests.lock().unwrap();
        requests
            .cpu
            .values()
            .filter(|(c, _)| *c == cpu)
            .map(|(_, v)| *v)
            .min()
    }

    pub fn nr_global_requests(&self) -> usize {
        self.requests.lock().unwrap().global.len()
    }

    pub fn nr_cpu_requests(&self, cpu: usize) -> usize {
        let requests = self.requests.lock().unwrap();
        requests.cpu.values().filter(|(c, _)| *c == cpu).count()
    }

    /// Requests currently registered, of any scope.
    pub fn nr_active(&self) -> usize {
        let requests = self.requests.lock().unwrap();
        requests.global.len() + requests.cpu.len()
    }

    /// Total (added, removed) over the lifetime of the host.
    pub fn totals(&self) -> (usize, usize) {
        let requests = self.requests.lock().unwrap();
        (requests.added, requests.removed)
    }

    fn register(&self, cpu: Option<usize>, value_us: i32) -> Result<Box<dyn QosRequest>> {
        if self.refuse_requests {
            bail!("PM QoS request refused");
        }
        if value_us < 0 {
            bail!("Latency value must be non-negative");
        }

        let mut requests = self.requests.lock().unwrap();
        let id = requests.next_id;
        requests.next_id += 1;
        requests.added += 1;
        match cpu {
            Some(cpu) => {
                requests.cpu.insert(id, (cpu, value_us));
            }
            None => {
                requests.global.insert(id, value_us);
            }
        }

        Ok(Box::new(FakeRequest {
            id,
            requests: self.requests.clone(),
        }))
    }
}

impl PmQosHost for FakeHost {
    fn nr_cpu_ids(&self) -> usize {
        self.nr_cpu_ids
    }

    fn isolated_cpus(&self) -> Result<Cpumask> {
        Ok(self.isolated.clone())
    }

    fn cpu_device_exists(&self, cpu: usize) -> bool {
        self.present.test_cpu(cpu)
    }

    fn resume_latency_support(&self) -> ResumeLatencySupport {
        self.support
    }

    fn add_global_request(&self, value_us: i32) -> Result<Box<dyn QosRequest>> {
        self.register(None, value_us)
    }

    fn add_cpu_request(&self, cpu: usize, value_us: i32) -> Result<Box<dyn QosRequest>> {
        if !self.present.test_cpu(cpu) {
            bail!("No device for CPU {cpu}");
        }
        self.register(Some(cpu), value_us)
    }
}

struct FakeRequest {
    id: u64,
    requests: Arc<Mutex<Requests>>,
}

impl QosRequest for FakeRequest {
    fn remove(self: Box<Self>) -> Result<()> {
        let mut requests = self.requests.lock().unwrap();
        let found =
            requests.global.remove(&self.id).is_some() || requests.cpu.remove(&self.id).is_some();
        if !found {
            bail!("PM QoS request {} is not registered", self.id);
        }
        requests.removed += 1;
        Ok(())
    }
}
