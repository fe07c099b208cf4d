// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! PM QoS access.
//!
//! [`PmQosHost`] is the seam between the latency pin and whatever hands out
//! PM QoS requests. [`SysfsHost`] talks to the interfaces Linux exposes to
//! user space, see
//! https://www.kernel.org/doc/html/latest/admin-guide/pm/cpuidle.html#power-management-quality-of-service-for-cpus
//!
//! * the global CPU latency request is held by keeping `/dev/cpu_dma_latency`
//!   open after writing the requested value to it; closing the file drops the
//!   request.
//! * the per-CPU resume latency lives in
//!   `/sys/devices/system/cpu/cpuN/power/pm_qos_resume_latency_us`. Writing
//!   `n/a` there asks for zero latency, `0` means no constraint.

use crate::misc::read_trimmed;
use crate::read_cpulist;
use crate::Cpumask;
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Value of the global CPU latency QoS when nobody holds a request.
pub const PM_QOS_CPU_LATENCY_DEFAULT_US: i32 = 2_000_000_000;

/// What `pm_qos_resume_latency_us` reads back as while zero latency is
/// requested, and what has to be written to request it.
pub const RESUME_LATENCY_ZERO: &str = "n/a";

/// Whether the host supports per-device (per-CPU) resume latency requests.
/// Kernels built without `CONFIG_PM` do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeLatencySupport {
    Supported,
    Unsupported,
}

/// A registered PM QoS request. Removing it consumes it, so a request can
/// only ever be released once.
pub trait QosRequest: Send {
    fn remove(self: Box<Self>) -> Result<()>;
}

pub trait PmQosHost {
    /// Number of CPU ids the host can hand out.
    fn nr_cpu_ids(&self) -> usize;

    /// CPUs excluded from general scheduling (`isolcpus=`).
    fn isolated_cpus(&self) -> Result<Cpumask>;

    /// Whether a CPU device exists for `cpu`.
    fn cpu_device_exists(&self, cpu: usize) -> bool;

    fn resume_latency_support(&self) -> ResumeLatencySupport;

    /// Register a latency request that applies to all CPUs.
    fn add_global_request(&self, value_us: i32) -> Result<Box<dyn QosRequest>>;

    /// Register a resume latency request on a single CPU device.
    fn add_cpu_request(&self, cpu: usize, value_us: i32) -> Result<Box<dyn QosRequest>>;
}

pub struct SysfsHost {
    cpu_root: PathBuf,
    dma_latency: PathBuf,
    nr_cpu_ids: usize,
}

impl SysfsHost {
    pub fn new() -> Result<SysfsHost> {
        Self::with_roots(Path::new("/sys"), Path::new("/dev"))
    }

    /// Build a host whose sysfs and devtmpfs are mounted somewhere other
    /// than `/sys` and `/dev`.
    pub fn with_roots(sysfs_root: &Path, dev_root: &Path) -> Result<SysfsHost> {
        let cpu_root = sysfs_root.join("devices/system/cpu");
        let possible = read_trimmed(&cpu_root.join("possible"))?;
        let nr_cpu_ids = match read_cpulist(&possible)?.into_iter().max() {
            Some(max) => max + 1,
            None => bail!("No possible CPUs listed in {:?}", cpu_root.join("possible")),
        };
        debug!("nr_cpu_ids={nr_cpu_ids} possible={possible}");

        Ok(SysfsHost {
            cpu_root,
            dma_latency: dev_root.join("cpu_dma_latency"),
            nr_cpu_ids,
        })
    }

    fn resume_latency_path(&self, cpu: usize) -> PathBuf {
        self.cpu_root
            .join(format!("cpu{cpu}"))
            .join("power/pm_qos_resume_latency_us")
    }

    /// Path of the file exposing the aggregate global latency constraint.
    pub fn dma_latency_path(&self) -> &Path {
        &self.dma_latency
    }

    /// Current content of a CPU's `pm_qos_resume_latency_us`.
    pub fn cpu_resume_latency(&self, cpu: usize) -> Result<String> {
        read_trimmed(&self.resume_latency_path(cpu))
    }
}

impl PmQosHost for SysfsHost {
    fn nr_cpu_ids(&self) -> usize {
        self.nr_cpu_ids
    }

    fn isolated_cpus(&self) -> Result<Cpumask> {
        let path = self.cpu_root.join("isolated");
        if !path.exists() {
            debug!("{path:?} missing, assuming no isolated CPUs");
            return Ok(Cpumask::new(self.nr_cpu_ids));
        }
        Cpumask::from_cpulist(&read_trimmed(&path)?, self.nr_cpu_ids)
    }

    fn cpu_device_exists(&self, cpu: usize) -> bool {
        cpu < self.nr_cpu_ids && self.cpu_root.join(format!("cpu{cpu}")).is_dir()
    }

    fn resume_latency_support(&self) -> ResumeLatencySupport {
        if std::fs::exists(self.resume_latency_path(0)).unwrap_or(false) {
            ResumeLatencySupport::Supported
        } else {
            ResumeLatencySupport::Unsupported
        }
    }

    fn add_global_request(&self, value_us: i32) -> Result<Box<dyn QosRequest>> {
        Ok(Box::new(GlobalLatencyRequest::add(
            &self.dma_latency,
            value_us,
        )?))
    }

    fn add_cpu_request(&self, cpu: usize, value_us: i32) -> Result<Box<dyn QosRequest>> {
        Ok(Box::new(CpuResumeLatencyRequest::add(
            self.resume_latency_path(cpu),
            value_us,
        )?))
    }
}

/// Global latency request, alive for as long as the file stays open.
pub struct GlobalLatencyRequest {
    file: File,
}

impl GlobalLatencyRequest {
    pub fn add(path: &Path, value_us: i32) -> Result<GlobalLatencyRequest> {
        if value_us < 0 {
            bail!("Latency value must be non-negative");
        }

        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open {path:?}"))?;
        file.write_all(&value_us.to_le_bytes())
            .with_context(|| format!("Failed to write latency request to {path:?}"))?;
        Ok(GlobalLatencyRequest { file })
    }
}

impl QosRequest for GlobalLatencyRequest {
    fn remove(self: Box<Self>) -> Result<()> {
        drop(self.file);
        Ok(())
    }
}

/// Per-CPU resume latency request. The sysfs attribute holds a single user
/// request, so removing it puts back whatever was there before.
pub struct CpuResumeLatencyRequest {
    path: PathBuf,
    previous: String,
}

impl CpuResumeLatencyRequest {
    pub fn add(path: PathBuf, value_us: i32) -> Result<CpuResumeLatencyRequest> {
        if value_us < 0 {
            bail!("Latency value must be non-negative");
        }

        let previous = read_trimmed(&path)?;
        let value = match value_us {
            0 => RESUME_LATENCY_ZERO.to_string(),
            v => v.to_string(),
        };
        write_attr(&path, &value)?;
        Ok(CpuResumeLatencyRequest { path, previous })
    }
}

impl QosRequest for CpuResumeLatencyRequest {
    fn remove(self: Box<Self>) -> Result<()> {
        write_attr(&self.path, &self.previous)
    }
}

fn write_attr(path: &Path, value: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to open {path:?}"))?;
    write!(file, "{value}").with_context(|| format!("Failed to write {value:?} to {path:?}"))?;
    Ok(())
}

/// Read the aggregate global latency constraint, in microseconds.
pub fn read_global_latency(path: &Path) -> Result<i32> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {path:?}"))?;
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)
        .map_err(|e| anyhow!("Failed to read latency from {path:?}: {e}"))?;
    Ok(i32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fake_sysfs(nr_cpus: usize, isolated: Option<&str>, with_power: bool) -> TempDir {
        let tmp = TempDir::new().unwrap();
        let cpu_root = tmp.path().join("sys/devices/system/cpu");
        fs::create_dir_all(&cpu_root).unwrap();
        fs::write(cpu_root.join("possible"), format!("0-{}\n", nr_cpus - 1)).unwrap();
        if let Some(isolated) = isolated {
            fs::write(cpu_root.join("isolated"), format!("{isolated}\n")).unwrap();
        }
        for cpu in 0..nr_cpus {
            let power = cpu_root.join(format!("cpu{cpu}/power"));
            fs::create_dir_all(&power).unwrap();
            if with_power {
                fs::write(power.join("pm_qos_resume_latency_us"), "0\n").unwrap();
            }
        }
        fs::create_dir_all(tmp.path().join("dev")).unwrap();
        fs::write(tmp.path().join("dev/cpu_dma_latency"), b"").unwrap();
        tmp
    }

    fn host(tmp: &TempDir) -> SysfsHost {
        SysfsHost::with_roots(&tmp.path().join("sys"), &tmp.path().join("dev")).unwrap()
    }

    #[test]
    fn test_possible_and_devices() {
        let tmp = fake_sysfs(4, None, true);
        let host = host(&tmp);
        assert_eq!(host.nr_cpu_ids(), 4);
        assert!(host.cpu_device_exists(3));
        assert!(!host.cpu_device_exists(4));
        assert!(!host.cpu_device_exists(1000));
    }

    #[test]
    fn test_isolated_cpus() {
        let tmp = fake_sysfs(8, Some("3,5-6"), true);
        let isolated = host(&tmp).isolated_cpus().unwrap();
        assert_eq!(isolated.iter().collect::<Vec<_>>(), vec![3, 5, 6]);

        let tmp = fake_sysfs(8, Some(""), true);
        assert!(host(&tmp).isolated_cpus().unwrap().is_empty());

        let tmp = fake_sysfs(8, None, true);
        assert!(host(&tmp).isolated_cpus().unwrap().is_empty());
    }

    #[test]
    fn test_resume_latency_support() {
        let tmp = fake_sysfs(2, None, true);
        assert_eq!(host(&tmp).resume_latency_support(), ResumeLatencySupport::Supported);

        let tmp = fake_sysfs(2, None, false);
        assert_eq!(host(&tmp).resume_latency_support(), ResumeLatencySupport::Unsupported);
    }

    #[test]
    fn test_global_request_writes_le_value() {
        let tmp = fake_sysfs(2, None, true);
        let host = host(&tmp);
        let req = host.add_global_request(0).unwrap();
        assert_eq!(read_global_latency(host.dma_latency_path()).unwrap(), 0);
        req.remove().unwrap();
    }

    #[test]
    fn test_global_request_rejects_negative() {
        let tmp = fake_sysfs(2, None, true);
        assert!(host(&tmp).add_global_request(-1).is_err());
    }

    #[test]
    fn test_global_request_missing_device() {
        let tmp = fake_sysfs(2, None, true);
        fs::remove_file(tmp.path().join("dev/cpu_dma_latency")).unwrap();
        assert!(host(&tmp).add_global_request(0).is_err());
    }

    #[test]
    fn test_cpu_request_restores_previous() {
        let tmp = fake_sysfs(4, None, true);
        let host = host(&tmp);
        let req = host.add_cpu_request(2, 0).unwrap();
        assert_eq!(host.cpu_resume_latency(2).unwrap(), RESUME_LATENCY_ZERO);
        assert_eq!(host.cpu_resume_latency(1).unwrap(), "0");

        req.remove().unwrap();
        assert_eq!(host.cpu_resume_latency(2).unwrap(), "0");
    }

    #[test]
    fn test_cpu_request_nonzero_value() {
        let tmp = fake_sysfs(2, None, true);
        let host = host(&tmp);
        let req = host.add_cpu_request(1, 20).unwrap();
        assert_eq!(host.cpu_resume_latency(1).unwrap(), "20");
        req.remove().unwrap();
    }
}
