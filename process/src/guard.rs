//! Process-group ownership for spawned tools.

use tokio::process::{Child, Command};

/// Owns a spawned tool and the process group it leads.
///
/// Dropping an armed guard kills the whole group, so a timed-out or
/// cancelled run leaves nothing behind. The leader's pid is captured at
/// spawn because `Child::id` is gone once the leader has been reaped, while
/// workers forked by the tool may still hold its output pipes.
pub(crate) struct ChildGuard {
    child: Option<Child>,
    #[cfg_attr(not(unix), allow(dead_code))]
    group: Option<u32>,
}

impl ChildGuard {
    pub(crate) fn new(child: Child) -> Self {
        let group = child.id();
        Self {
            child: Some(child),
            group,
        }
    }

    pub(crate) fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// SIGKILL every remaining member of the tool's process group.
    ///
    /// Returns false when no group could be signalled.
    #[cfg(unix)]
    pub(crate) fn kill_group(&self) -> bool {
        let Some(pgid) = self.group.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
            return false;
        };
        // SAFETY: killpg only sends a signal; the group was created by
        // `set_new_session` for this child.
        unsafe { libc::killpg(pgid, libc::SIGKILL) == 0 }
    }

    #[cfg(not(unix))]
    pub(crate) fn kill_group(&self) -> bool {
        false
    }

    /// Release the leader after it exited on its own.
    pub(crate) fn disarm(&mut self) {
        self.child = None;
        self.group = None;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.child.is_none() {
            return;
        }
        let killed = self.kill_group();
        if let Some(child) = self.child.as_mut() {
            if !killed {
                let _ = child.start_kill();
            }
            let _ = child.try_wait();
        }
    }
}

/// Start the child in a new session (Unix) so it leads its own process
/// group. `ansible-playbook` forks workers; killing only the leader would
/// orphan them.
#[cfg(unix)]
pub(crate) fn set_new_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(crate) fn set_new_session(_cmd: &mut Command) {}
