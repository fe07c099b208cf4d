// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Latency pin
//!
//! Holds a zero-latency PM QoS request, either for all CPUs or for a single
//! CPU, from [`LatencyPin::start`] until the returned [`ActiveRequest`] is
//! stopped. While it is held, the affected CPUs do not enter idle states with
//! a non-zero exit latency.
//!
//!```
//!     use cpulatency::fake::FakeHost;
//!     use cpulatency::{LatencyPin, Target, TargetSelector};
//!
//!     let host = FakeHost::new(4).with_isolated(&[2, 3]);
//!     let pin = LatencyPin::new(&host);
//!     let req = pin.start(TargetSelector::AutoIsolated).unwrap();
//!     assert_eq!(req.target(), Target::Cpu(2));
//!     assert_eq!(host.cpu_latency(2), Some(0));
//!
//!     req.stop().unwrap();
//!     assert_eq!(host.nr_active(), 0);
//!```

use crate::Error;
use crate::PmQosHost;
use crate::QosRequest;
use crate::ResumeLatencySupport;
use crate::Result;
use crate::Target;
use crate::TargetSelector;
use log::{info, warn};
use std::fmt;

/// The only latency this crate ever requests.
pub const LATENCY_US: i32 = 0;

pub struct LatencyPin<'a> {
    host: &'a dyn PmQosHost,
    support: ResumeLatencySupport,
}

impl<'a> LatencyPin<'a> {
    /// Probe the host for per-CPU resume latency support. The answer is
    /// kept for the lifetime of the pin.
    pub fn new(host: &'a dyn PmQosHost) -> LatencyPin<'a> {
        let support = host.resume_latency_support();
        if support == ResumeLatencySupport::Unsupported {
            info!("cpulatency: per-CPU resume latency not supported, using the global request");
        }
        Self::with_support(host, support)
    }

    pub fn with_support(host: &'a dyn PmQosHost, support: ResumeLatencySupport) -> LatencyPin<'a> {
        LatencyPin { host, support }
    }

    pub fn support(&self) -> ResumeLatencySupport {
        self.support
    }

    /// Resolve `selector` and register the matching zero-latency request.
    ///
    /// Fails with [`Error::InvalidTarget`] if an explicit CPU has no device,
    /// in which case nothing has been registered.
    pub fn start(&self, selector: TargetSelector) -> Result<ActiveRequest> {
        info!("INIT CPULATENCY");

        let selected = selector.resolve(self.host);
        let (target, request) = match selected {
            Target::AllCores => (Target::AllCores, self.add_global()?),
            Target::Cpu(cpu) => {
                if !self.host.cpu_device_exists(cpu) {
                    return Err(Error::InvalidTarget(cpu));
                }
                match self.support {
                    ResumeLatencySupport::Supported => {
                        info!("cpulatency: setting latency for CPU {cpu} to zero");
                        let request = self.host.add_cpu_request(cpu, LATENCY_US)?;
                        (Target::Cpu(cpu), request)
                    }
                    ResumeLatencySupport::Unsupported => {
                        info!("cpulatency: no per-CPU PM QoS, applying CPU {cpu} request to all CPUs");
                        (Target::AllCores, self.add_global()?)
                    }
                }
            }
        };

        Ok(ActiveRequest {
            selected,
            target,
            request: Some(request),
        })
    }

    fn add_global(&self) -> Result<Box<dyn QosRequest>> {
        info!("cpulatency: setting latency of all CPUs to zero");
        Ok(self.host.add_global_request(LATENCY_US)?)
    }
}

/// A registered zero-latency request. Released by [`ActiveRequest::stop`],
/// or when dropped.
pub struct ActiveRequest {
    selected: Target,
    target: Target,
    request: Option<Box<dyn QosRequest>>,
}

impl ActiveRequest {
    /// Where the request actually applies.
    pub fn target(&self) -> Target {
        self.target
    }

    /// What the selector resolved to, before any fallback to the global
    /// request.
    pub fn selected(&self) -> Target {
        self.selected
    }

    pub fn stop(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let request = match self.request.take() {
            Some(request) => request,
            None => return Ok(()),
        };

        info!("cpulatency: removing PM QoS request");
        let res = request.remove();
        info!("EXIT CPULATENCY");
        Ok(res?)
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to remove PM QoS request ({e:#})");
        }
    }
}

impl fmt::Debug for ActiveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveRequest")
            .field("selected", &self.selected)
            .field("target", &self.target)
            .field("held", &self.request.is_some())
            .finish()
    }
}
