// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use anyhow::bail;
use anyhow::Result;
use std::path::Path;

/// Read a sysfs attribute with trailing nulls and whitespace removed.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn read_trimmed(path: &Path) -> Result<String> {
    let val = match std::fs::read_to_string(path) {
        Ok(val) => val,
        Err(_) => {
            bail!("Failed to open or read file {:?}", path);
        }
    };

    Ok(val.trim_end_matches('\0').trim().to_string())
}
