//! Walk the descendants of a PTY's shell to see what's actually running
//! (e.g. a foreground vim or a tmux-attached client), used for the side
//! status that's richer than "the shell is alive". Depth-capped: a runaway
//! fork bomb should slow a probe, not wedge it.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

const MAX_DEPTH: usize = 10;

/// Command names of every descendant of `pid`, breadth-first, depth-capped.
/// Never errors: an unreadable process table just yields an empty vec.
pub fn descendant_command_names(pid: u32) -> Vec<String> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::everything(),
    );

    let root = Pid::from_u32(pid);
    let mut names = Vec::new();
    let mut frontier = vec![root];
    let mut depth = 0;

    while !frontier.is_empty() && depth < MAX_DEPTH {
        let mut next = Vec::new();
        for parent in &frontier {
            for (child_pid, process) in system.processes() {
                if process.parent() == Some(*parent) {
                    names.push(process.name().to_string_lossy().into_owned());
                    next.push(*child_pid);
                }
            }
        }
        frontier = next;
        depth += 1;
    }
    names
}
