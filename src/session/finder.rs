// Session Environment Finder
//
// Locates an environment variable inside a running session by scanning
// the processes owned by the session user and keeping the ones whose
// cgroup places them in the session's systemd scope. Used to reach the
// user's D-Bus session bus from a system daemon.

use std::fs;
use std::path::Path;
use sysinfo::{ProcessRefreshKind, System, UpdateKind};
use tracing::{debug, trace};

/// Scope unit name logind creates for a session
pub fn scope_name(sid: &str) -> String {
    format!("session-{}.scope", sid)
}

/// Does the cgroup file content place the process in the scope?
pub fn cgroup_in_scope(cgroup: &str, scope: &str) -> bool {
    cgroup
        .lines()
        .filter_map(|line| line.rsplit(':').next())
        .any(|path| path.split('/').any(|unit| unit == scope))
}

/// Value of `name` in a `KEY=VALUE` environment list
pub fn environ_value<S: AsRef<str>>(environ: &[S], name: &str) -> Option<String> {
    environ.iter().find_map(|entry| {
        let (key, value) = entry.as_ref().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Find an environment variable set by some process of the session
pub fn find_session_variable(proc_root: &Path, uid: u32, scope: &str, name: &str) -> Option<String> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessRefreshKind::new()
            .with_user(UpdateKind::Always)
            .with_environ(UpdateKind::Always),
    );

    for (pid, process) in system.processes() {
        let owned = process.user_id().is_some_and(|user| **user == uid);
        if !owned {
            continue;
        }

        let cgroup = match fs::read_to_string(proc_root.join(pid.to_string()).join("cgroup")) {
            Ok(content) => content,
            Err(e) => {
                trace!(pid = %pid, error = %e, "Can't read process cgroup");
                continue;
            }
        };

        if !cgroup_in_scope(&cgroup, scope) {
            continue;
        }

        if let Some(value) = environ_value(process.environ(), name) {
            debug!(pid = %pid, scope, name, "Found session variable");
            return Some(value);
        }
    }

    None
}
