//! Process tree discovery and forced termination.
//!
//! Descendants are listed before anything is killed: once a parent dies its
//! children are reparented and can no longer be found through it.

use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Every transitive child of `root` in a `(pid, ppid)` table, parents first
pub fn descendants_of(root: u32, table: &[(u32, u32)]) -> Vec<u32> {
    let mut found = Vec::new();
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);

    while let Some(parent) = queue.pop_front() {
        for &(pid, ppid) in table {
            if ppid == parent && seen.insert(pid) {
                found.push(pid);
                queue.push_back(pid);
            }
        }
    }
    found
}

/// Parent pid from the contents of `/proc/<pid>/stat`. The command name may
/// itself contain spaces and parentheses, so fields are read after the last `)`.
pub fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// Snapshot of `(pid, ppid)` for every process on the host
#[cfg(target_os = "linux")]
pub fn process_table() -> Vec<(u32, u32)> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
            // Processes exit while the table is being read.
            let stat = std::fs::read_to_string(entry.path().join("stat")).ok()?;
            Some((pid, parse_stat_ppid(&stat)?))
        })
        .collect()
}

/// Snapshot of `(pid, ppid)` for every process on the host
#[cfg(windows)]
pub fn process_table() -> Vec<(u32, u32)> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
        TH32CS_SNAPPROCESS,
    };

    let mut table = Vec::new();
    unsafe {
        let snapshot = match CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Process snapshot failed: {}", e);
                return table;
            }
        };
        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };
        if Process32FirstW(snapshot, &mut entry).is_ok() {
            loop {
                table.push((entry.th32ProcessID, entry.th32ParentProcessID));
                if Process32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }
        let _ = CloseHandle(snapshot);
    }
    table
}

/// Other Unix systems rely on the process group alone
#[cfg(all(unix, not(target_os = "linux")))]
pub fn process_table() -> Vec<(u32, u32)> {
    Vec::new()
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("kill({}) failed: {}", pid, e);
    }
}

#[cfg(windows)]
fn kill_pid(pid: u32) {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess};

    unsafe {
        match OpenProcess(PROCESS_TERMINATE, false, pid) {
            Ok(handle) => {
                let _ = TerminateProcess(handle, 1);
                let _ = CloseHandle(handle);
            }
            Err(e) => debug!("OpenProcess({}) failed: {}", pid, e),
        }
    }
}

/// Job Object closing with kill-on-close semantics
#[cfg(windows)]
struct JobObjectHandle {
    handle: windows::Win32::Foundation::HANDLE,
}

// SAFETY: a job HANDLE is an opaque kernel reference usable from any thread.
#[cfg(windows)]
unsafe impl Send for JobObjectHandle {}
#[cfg(windows)]
unsafe impl Sync for JobObjectHandle {}

#[cfg(windows)]
impl Drop for JobObjectHandle {
    fn drop(&mut self) {
        use windows::Win32::Foundation::CloseHandle;
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

#[cfg(windows)]
impl JobObjectHandle {
    fn create() -> windows::core::Result<Self> {
        use windows::Win32::System::JobObjects::{
            CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
            JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectExtendedLimitInformation,
            SetInformationJobObject,
        };

        unsafe {
            let job = Self {
                handle: CreateJobObjectW(None, None)?,
            };
            let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = std::mem::zeroed();
            info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
            SetInformationJobObject(
                job.handle,
                JobObjectExtendedLimitInformation,
                (&raw const info).cast(),
                std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )?;
            Ok(job)
        }
    }

    fn assign(&self, pid: u32) -> windows::core::Result<()> {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::JobObjects::AssignProcessToJobObject;
        use windows::Win32::System::Threading::{OpenProcess, PROCESS_ALL_ACCESS};

        unsafe {
            let process = OpenProcess(PROCESS_ALL_ACCESS, false, pid)?;
            let assigned = AssignProcessToJobObject(self.handle, process);
            let _ = CloseHandle(process);
            assigned
        }
    }

    fn terminate(&self) {
        use windows::Win32::System::JobObjects::TerminateJobObject;
        unsafe {
            if let Err(e) = TerminateJobObject(self.handle, 1) {
                debug!("TerminateJobObject failed: {}", e);
            }
        }
    }
}

/// Owns the OS-level grouping of one driver process and its descendants.
///
/// On Unix the driver leads its own process group (set at spawn). On Windows
/// the driver is placed in a kill-on-close Job Object, so dropping the guard
/// also reclaims anything still running in the job.
pub struct ProcessTree {
    root: u32,
    #[cfg(windows)]
    job: Option<JobObjectHandle>,
}

impl ProcessTree {
    /// Track the tree rooted at an already spawned child
    pub fn attach(root: u32) -> Self {
        #[cfg(windows)]
        {
            let job = match JobObjectHandle::create() {
                Ok(job) => match job.assign(root) {
                    Ok(()) => Some(job),
                    Err(e) => {
                        tracing::warn!("Could not assign driver {} to a job object: {}", root, e);
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!("Could not create job object: {}", e);
                    None
                }
            };
            Self { root, job }
        }
        #[cfg(not(windows))]
        {
            Self { root }
        }
    }

    /// Force-kill the root and every descendant. Returns how many
    /// descendants were found.
    pub fn kill(&self) -> usize {
        let descendants = descendants_of(self.root, &process_table());

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;
            if let Err(e) = killpg(Pid::from_raw(self.root as i32), Signal::SIGKILL) {
                debug!("killpg({}) failed: {}", self.root, e);
            }
        }
        #[cfg(windows)]
        {
            if let Some(job) = &self.job {
                job.terminate();
            }
        }

        // Catches descendants that left the group or job.
        for &pid in descendants.iter().rev() {
            kill_pid(pid);
        }
        kill_pid(self.root);

        descendants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descendants_walks_transitively() {
        let table = [(10, 1), (11, 10), (12, 11), (13, 10), (20, 1), (21, 20)];
        let mut found = descendants_of(10, &table);
        found.sort();
        assert_eq!(found, vec![11, 12, 13]);
    }

    #[test]
    fn test_descendants_tolerates_cycles_and_self_parent() {
        let table = [(5, 5), (6, 5), (5, 6)];
        assert_eq!(descendants_of(5, &table), vec![6]);
    }

    #[test]
    fn test_parse_stat_ppid() {
        assert_eq!(parse_stat_ppid("1234 (sleep) S 77 1234 1234 0 -1"), Some(77));
        assert_eq!(parse_stat_ppid("9 (a (b) c) R 3 9 9 0"), Some(3));
        assert_eq!(parse_stat_ppid("garbage"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_table_contains_self() {
        let me = std::process::id();
        assert!(process_table().iter().any(|&(pid, _)| pid == me));
    }
}
