// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # CPU latency pinning and busy polling
//!
//! Two independent toggles for latency sensitive workloads on Linux:
//!
//! * [`LatencyPin`] registers a zero-latency PM QoS request, for all CPUs or
//!   for a single one, so that the affected CPUs stay out of deep idle
//!   states for as long as the returned [`ActiveRequest`] lives.
//! * [`PollWorker`] spins a thread that keeps a CPU in C0 until stopped.
//!
//! Host access goes through [`PmQosHost`]. [`SysfsHost`] is the real thing,
//! [`fake::FakeHost`] keeps everything in memory.

mod cpumask;
pub use cpumask::read_cpulist;
pub use cpumask::Cpumask;

mod error;
pub use error::Error;
pub use error::Result;

pub mod fake;

mod latency;
pub use latency::ActiveRequest;
pub use latency::LatencyPin;
pub use latency::LATENCY_US;

mod misc;

pub mod pm;
pub use pm::read_global_latency;
pub use pm::PmQosHost;
pub use pm::QosRequest;
pub use pm::ResumeLatencySupport;
pub use pm::SysfsHost;

mod poll;
pub use poll::PollOpts;
pub use poll::PollWorker;
pub use poll::StopOutcome;
pub use poll::WORKER_NAME;

mod target;
pub use target::Target;
pub use target::TargetSelector;
pub use target::CPU_ID_ALL;
pub use target::CPU_ID_AUTO_ISOLATED;
