//! Current working directory probe for a PTY's shell, used to surface a
//! `cwd_update` when the shell changes directory. Best-effort: not every
//! platform/sandbox exposes it.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Current working directory of `pid`, or `None` if it can't be determined.
pub fn current_directory(pid: u32) -> Option<String> {
    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sys_pid]),
        true,
        ProcessRefreshKind::everything(),
    );
    let process = system.process(sys_pid)?;
    let cwd = process.cwd()?;
    Some(cwd.to_string_lossy().into_owned())
}
