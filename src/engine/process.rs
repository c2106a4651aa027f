//! Process liveness checks and signal delivery by PID.
//!
//! Used for the fallback path of `stop()`, when the task that owns the child
//! handle did not observe an exit in time.

/// Check if a process is still alive.
pub fn pid_is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        // Signal 0 doesn't send a signal but checks if the process exists
        let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if result == 0 {
            return true;
        }
        // EPERM means it exists but we don't have permission
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        true // Non-Unix: can't check liveness, assume running
    }
}

/// Send SIGKILL to `pid`. Returns true if the signal was delivered.
#[cfg(unix)]
pub fn force_kill(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) == 0 }
}

#[cfg(not(unix))]
pub fn force_kill(_pid: u32) -> bool {
    false
}
