// SPDX-License-Identifier: MPL-2.0

//! Pinning of worker threads to processing units.
//!
//! Pinning is a hint: where it is unsupported, workers run unpinned.

use std::io;

use cosmic_frames_config::Worker;
use tracing::{debug, warn};

/// Pin the calling thread to `cpu`.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> io::Result<()> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    set.set(cpu)?;
    sched_setaffinity(Pid::from_raw(0), &set)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu: usize) -> io::Result<()> {
    Ok(())
}

/// Apply the worker's affinity hint to the calling thread.
pub(crate) fn apply(role: &str, worker: &Worker) {
    let Some(cpu) = worker.cpu else {
        return;
    };

    match pin_current_thread(cpu) {
        Ok(()) => debug!(role, cpu, "pinned worker"),
        Err(why) => warn!(role, cpu, ?why, "failed to pin worker, running unpinned"),
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use nix::sched::CpuSet;

    use super::*;

    #[test]
    fn out_of_range_cpu_is_an_error() {
        assert!(pin_current_thread(CpuSet::count() + 1).is_err());
    }
}
