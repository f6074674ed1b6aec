//! Discovery of worker processes already running on this machine.
//!
//! Independent of the [`SessionManager`](crate::orchestrator::manager::SessionManager):
//! it finds "foreign" workers a human started by hand. Each platform family
//! has its own [`ProcessDetector`] implementation; the text parsers are
//! plain functions so they can be exercised against canned command output.

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, warn};

use crate::models::process::RunningProcessInfo;
use crate::{AppError, Result};

/// Interpreters that launch script-based workers (`node /usr/bin/claude`).
const INTERPRETERS: &[&str] = &["node", "nodejs", "bun", "deno", "python", "python3"];

/// Platform process-table access.
pub trait ProcessDetector: Send + Sync {
    /// List running processes whose executable matches the worker name.
    ///
    /// An empty list is a normal result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProcessQuery` only if the enumeration mechanism
    /// itself cannot be used.
    fn find_running_processes(&self) -> Result<Vec<RunningProcessInfo>>;

    /// Whether a process with `pid` exists. Never signals the process.
    fn is_process_running(&self, pid: u32) -> bool;

    /// Working directory of `pid`, when the platform exposes it.
    fn get_process_cwd(&self, pid: u32) -> Option<PathBuf>;
}

/// Detector for the current platform.
#[must_use]
pub fn detector_for_platform(executable: &str) -> Box<dyn ProcessDetector> {
    if cfg!(windows) {
        Box::new(TasklistDetector::new(executable))
    } else {
        Box::new(PsDetector::new(executable))
    }
}

// ── POSIX ────────────────────────────────────────────────────────────────────

/// `ps`-based detector for Linux, macOS and the BSDs.
#[derive(Debug, Clone)]
pub struct PsDetector {
    executable: String,
}

impl PsDetector {
    /// Detector matching processes named `executable`.
    #[must_use]
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl ProcessDetector for PsDetector {
    fn find_running_processes(&self) -> Result<Vec<RunningProcessInfo>> {
        let stdout = run_listing("ps", &["-e", "-ww", "-o", "pid=,args="])?;
        let mut processes = parse_ps_output(&stdout, &self.executable, Some(std::process::id()));
        for process in &mut processes {
            process.working_directory = self.get_process_cwd(process.pid);
        }
        debug!(
            executable = %self.executable,
            count = processes.len(),
            "process scan complete"
        );
        Ok(processes)
    }

    fn is_process_running(&self, pid: u32) -> bool {
        signal_probe(pid)
    }

    fn get_process_cwd(&self, pid: u32) -> Option<PathBuf> {
        process_cwd(pid)
    }
}

/// Parse `ps -o pid=,args=` output, keeping processes that match `executable`.
///
/// Each line is `<pid> <command line>` with optional leading padding.
#[must_use]
pub fn parse_ps_output(
    output: &str,
    executable: &str,
    exclude_pid: Option<u32>,
) -> Vec<RunningProcessInfo> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (pid, command) = line.split_once(char::is_whitespace)?;
            let pid = pid.parse::<u32>().ok()?;
            let command = command.trim();
            if Some(pid) == exclude_pid || !matches_executable(command, executable) {
                return None;
            }
            Some(RunningProcessInfo {
                pid,
                command: command.to_owned(),
                working_directory: None,
            })
        })
        .collect()
}

// ── Windows ──────────────────────────────────────────────────────────────────

/// `tasklist`-based detector for Windows.
#[derive(Debug, Clone)]
pub struct TasklistDetector {
    executable: String,
}

impl TasklistDetector {
    /// Detector matching images named `executable` (`.exe` optional).
    #[must_use]
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    fn image_name(&self) -> String {
        format!("{}.exe", strip_exe(&self.executable))
    }
}

impl ProcessDetector for TasklistDetector {
    fn find_running_processes(&self) -> Result<Vec<RunningProcessInfo>> {
        let filter = format!("IMAGENAME eq {}", self.image_name());
        let stdout = run_listing("tasklist", &["/FI", &filter, "/FO", "CSV", "/NH"])?;
        Ok(parse_tasklist_output(&stdout, &self.executable))
    }

    fn is_process_running(&self, pid: u32) -> bool {
        let filter = format!("PID eq {pid}");
        run_listing("tasklist", &["/FI", &filter, "/FO", "CSV", "/NH"])
            .is_ok_and(|out| out.lines().any(|l| l.trim_start().starts_with('"')))
    }

    fn get_process_cwd(&self, _pid: u32) -> Option<PathBuf> {
        None
    }
}

/// Parse `tasklist /FO CSV /NH` output, keeping images that match `executable`.
///
/// Lines look like `"claude.exe","4120","Console","1","51,220 K"`; the
/// informational line printed when nothing matches is ignored.
#[must_use]
pub fn parse_tasklist_output(output: &str, executable: &str) -> Vec<RunningProcessInfo> {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with('"'))
        .filter_map(|line| {
            let fields = split_csv_line(line.trim());
            let image = fields.first()?;
            let pid = fields.get(1)?.parse::<u32>().ok()?;
            if !matches_executable(image, executable) {
                return None;
            }
            Some(RunningProcessInfo {
                pid,
                command: image.clone(),
                working_directory: None,
            })
        })
        .collect()
}

// ── Shared helpers ───────────────────────────────────────────────────────────

/// Whether `command` launches `executable`, directly or via an interpreter.
///
/// For interpreted workers any path component of the script counts, so
/// `node /usr/lib/node_modules/claude/cli.js` is a `claude` worker.
#[must_use]
pub fn matches_executable(command: &str, executable: &str) -> bool {
    let wanted = strip_exe(executable);
    let mut tokens = command.split_whitespace();
    let Some(first) = tokens.next() else {
        return false;
    };
    let first = basename(first);
    if first.eq_ignore_ascii_case(wanted) {
        return true;
    }
    if INTERPRETERS.iter().any(|i| first.eq_ignore_ascii_case(i)) {
        if let Some(script) = tokens.next() {
            return script
                .split(['/', '\\'])
                .any(|component| strip_exe(component).eq_ignore_ascii_case(wanted));
        }
    }
    false
}

fn basename(token: &str) -> &str {
    let name = token.rsplit(['/', '\\']).next().unwrap_or(token);
    strip_exe(name)
}

fn strip_exe(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".exe") {
        &name[..len - 4]
    } else {
        name
    }
}

/// Split one CSV line whose fields are all double-quoted.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn run_listing(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| AppError::ProcessQuery(format!("failed to execute {program}: {err}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(program, status = %output.status, stderr = %stderr.trim(), "process listing failed");
        return Err(AppError::ProcessQuery(format!(
            "{program} exited with {}",
            output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(unix)]
fn signal_probe(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // Signal "none" only checks permission and existence.
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn signal_probe(_pid: u32) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn process_cwd(pid: u32) -> Option<PathBuf> {
    std::fs::read_link(format!("/proc/{pid}/cwd")).ok()
}

#[cfg(target_os = "macos")]
fn process_cwd(pid: u32) -> Option<PathBuf> {
    let pid = pid.to_string();
    let stdout = run_listing("lsof", &["-a", "-p", &pid, "-d", "cwd", "-Fn"]).ok()?;
    stdout
        .lines()
        .find_map(|line| line.strip_prefix('n'))
        .map(PathBuf::from)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn process_cwd(_pid: u32) -> Option<PathBuf> {
    None
}
