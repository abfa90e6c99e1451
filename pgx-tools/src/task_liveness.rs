//! pid+starttime liveness checks, used to decide whether a progress row
//! left by a previous run is still "in progress" or safely reclaimable.
//!
//! Grounded on the same `pid`/`starttime` pairing the teacher's
//! `task_tracking` module uses via `procfs::check_process_running`: a
//! bare pid is not enough, since pids wrap around and get reused.

use proxmox_sys::linux::procfs;

/// Returns `true` if `pid` is currently running and its process start
/// time still matches `pstart` (i.e. it's the same process that wrote
/// the progress row, not a later, unrelated process reusing the pid).
pub fn is_owner_alive(pid: i32, pstart: u64) -> bool {
    if pid <= 0 {
        return false;
    }
    match procfs::check_process_running(pid) {
        Some(stat) => stat.starttime == pstart,
        None => false,
    }
}

/// Current process's pid and start time, for stamping progress rows
/// this worker is about to claim.
pub fn current_pid_and_start() -> anyhow::Result<(i32, u64)> {
    let pid = std::process::id() as i32;
    let stat = procfs::PidStat::read_from_pid(nix::unistd::Pid::from_raw(pid))?;
    Ok((pid, stat.starttime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_pid_is_not_alive() {
        assert!(!is_owner_alive(0, 0));
    }

    #[test]
    fn current_process_is_alive() {
        let (pid, pstart) = current_pid_and_start().expect("read own pidstat");
        assert!(is_owner_alive(pid, pstart));
    }
}
