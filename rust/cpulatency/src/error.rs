// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The explicitly requested CPU has no device on this host.
    #[error("Invalid CPU id {0}")]
    InvalidTarget(usize),

    #[error("failed to create poll worker")]
    WorkerCreationFailed(#[source] std::io::Error),

    #[error("failed to bind poll worker to CPU {cpu}")]
    WorkerBindFailed {
        cpu: usize,
        #[source]
        source: std::io::Error,
    },

    /// The kernel interface refused the PM QoS request.
    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

impl Error {
    /// errno-style code a loader reports for this failure.
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidTarget(_) => libc::EINVAL,
            Error::WorkerCreationFailed(_) => libc::EFAULT,
            Error::WorkerBindFailed { .. } => libc::EINVAL,
            Error::Host(e) => e
                .downcast_ref::<std::io::Error>()
                .and_then(|ioe| ioe.raw_os_error())
                .unwrap_or(libc::EIO),
        }
    }
}
