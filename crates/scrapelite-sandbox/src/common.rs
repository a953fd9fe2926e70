//! Bounded child-process execution shared by the provisioner and the runner.
//!
//! Every child is spawned as the leader of its own process group and wrapped
//! in a [`ChildGuard`]. The guard kills and reaps the whole group when it is
//! dropped without having been waited on, so an early return, an error or a
//! panic never leaves a process tree behind.

use anyhow::{Context, Result};
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Memory / exit poll interval in milliseconds
pub const MEMORY_CHECK_INTERVAL_MS: u64 = 100;

/// Per-stream capture bound. Output past this is drained and discarded.
pub const MAX_CAPTURE_BYTES: usize = 16 * 1024 * 1024;

// ─── Launch spec ──────────────────────────────────────────────────────────────

/// Program plus arguments, kept as data so wrappers (e.g. a virtual display)
/// can be layered before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Run `self` as the trailing command of `program prefix_args...`.
    pub fn wrapped_in<I, S>(self, program: impl Into<String>, prefix_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args: Vec<String> = prefix_args.into_iter().map(Into::into).collect();
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: program.into(),
            args,
        }
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build a `Command` with a cleared environment plus `env`.
    pub fn command(&self, cwd: &Path, env: &[(String, String)]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(cwd)
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

// ─── Process handle ──────────────────────────────────────────────────────────

/// Owns a spawned process group. Dropping an unfinished guard kills and reaps it.
pub struct ChildGuard {
    child: Child,
    pgid: u32,
    started: Instant,
    finished: bool,
}

impl ChildGuard {
    /// Spawn `cmd` as a new process-group leader.
    pub fn spawn(cmd: &mut Command) -> io::Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd.spawn()?;
        let pgid = child.id();
        Ok(Self {
            child,
            pgid,
            started: Instant::now(),
            finished: false,
        })
    }

    /// Kill every process in the group (display wrapper, browser, script).
    fn kill_group(&mut self) {
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            let _ = killpg(Pid::from_raw(self.pgid as i32), Signal::SIGKILL);
        }
        let _ = self.child.kill();
    }

    fn reap(&mut self) {
        let _ = self.child.wait();
        self.finished = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.kill_group();
            self.reap();
        }
    }
}

// ─── Bounded wait ────────────────────────────────────────────────────────────

/// Why a process was killed before it exited on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Timeout,
    MemoryLimit { used_bytes: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct WaitLimits {
    pub timeout: Duration,
    /// `None` disables memory polling.
    pub memory_limit_bytes: Option<u64>,
}

impl WaitLimits {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            memory_limit_bytes: None,
        }
    }
}

/// Captured result of a bounded process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub elapsed: Duration,
    pub termination: Option<Termination>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.termination.is_none() && self.exit_code == 0
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut captured = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let room = MAX_CAPTURE_BYTES.saturating_sub(captured.len());
                    captured.extend_from_slice(&buf[..n.min(room)]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        captured
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Wait for the guarded process under `limits`.
///
/// stdout/stderr are drained on background threads while the process runs;
/// a child writing more than a pipe buffer would otherwise block forever.
/// Once the leader exits (or is killed) the rest of its group is killed too,
/// so lingering grandchildren cannot hold the pipes open.
pub fn wait_bounded(mut guard: ChildGuard, limits: WaitLimits) -> Result<ProcessOutput> {
    let stdout_handle = guard.child.stdout.take().map(spawn_reader);
    let stderr_handle = guard.child.stderr.take().map(spawn_reader);
    let check_interval = Duration::from_millis(MEMORY_CHECK_INTERVAL_MS);

    let (exit_code, termination) = loop {
        match guard.child.try_wait() {
            Ok(Some(status)) => {
                guard.finished = true;
                break (status.code().unwrap_or(-1), None);
            }
            Ok(None) => {}
            Err(e) => {
                guard.kill_group();
                guard.reap();
                let _ = join_reader(stdout_handle);
                let _ = join_reader(stderr_handle);
                return Err(anyhow::anyhow!("Failed to wait for process: {}", e));
            }
        }

        let elapsed = guard.started.elapsed();
        if elapsed >= limits.timeout {
            guard.kill_group();
            guard.reap();
            break (-1, Some(Termination::Timeout));
        }

        if let Some(limit) = limits.memory_limit_bytes {
            if let Some(used) = process_group_memory(guard.pgid) {
                if used > limit {
                    guard.kill_group();
                    guard.reap();
                    break (-1, Some(Termination::MemoryLimit { used_bytes: used }));
                }
            }
        }

        thread::sleep(check_interval.min(limits.timeout - elapsed));
    };
    let elapsed = guard.started.elapsed();

    // Leader is gone; take down whatever it left in the group.
    guard.kill_group();

    Ok(ProcessOutput {
        stdout: join_reader(stdout_handle),
        stderr: join_reader(stderr_handle),
        exit_code,
        elapsed,
        termination,
    })
}

/// Spawn `spec` in `cwd` with exactly `env` and wait under `limits`.
pub fn run_bounded(
    spec: &LaunchSpec,
    cwd: &Path,
    env: &[(String, String)],
    limits: WaitLimits,
) -> Result<ProcessOutput> {
    let mut cmd = spec.command(cwd, env);
    let guard = ChildGuard::spawn(&mut cmd)
        .with_context(|| format!("Failed to spawn `{}`", spec.display()))?;
    wait_bounded(guard, limits)
}

// ─── Memory accounting ───────────────────────────────────────────────────────

/// Resident memory of one process in bytes (Linux: `/proc/<pid>/status` VmRSS).
#[cfg(target_os = "linux")]
pub fn get_process_memory(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;

    for line in status.lines() {
        if line.starts_with("VmRSS:") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                if let Ok(rss_kb) = parts[1].parse::<u64>() {
                    return Some(rss_kb * 1024);
                }
            }
            break;
        }
    }

    None
}

/// Resident memory of one process in bytes (macOS: `ps -o rss=`).
#[cfg(target_os = "macos")]
pub fn get_process_memory(pid: u32) -> Option<u64> {
    let output = Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .ok()?;

    if output.status.success() {
        let rss_str = String::from_utf8_lossy(&output.stdout);
        if let Ok(rss_kb) = rss_str.trim().parse::<u64>() {
            return Some(rss_kb * 1024);
        }
    }

    None
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn get_process_memory(_pid: u32) -> Option<u64> {
    None
}

/// Process group id from the contents of `/proc/<pid>/stat`.
///
/// The command name may itself contain spaces or parentheses, so fields are
/// counted from the last `)`: state, ppid, pgrp.
#[cfg(any(target_os = "linux", test))]
fn parse_stat_pgrp(stat: &str) -> Option<u32> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm.split_whitespace().nth(2)?.parse().ok()
}

/// Summed resident memory of every process in group `pgid` (Linux).
#[cfg(target_os = "linux")]
pub fn process_group_memory(pgid: u32) -> Option<u64> {
    let mut total = 0u64;
    let mut found = false;
    for entry in std::fs::read_dir("/proc").ok()?.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            continue;
        };
        if parse_stat_pgrp(&stat) == Some(pgid) {
            if let Some(rss) = get_process_memory(pid) {
                total += rss;
                found = true;
            }
        }
    }
    found.then_some(total)
}

/// Leader-only approximation where group enumeration is unavailable.
#[cfg(not(target_os = "linux"))]
pub fn process_group_memory(pgid: u32) -> Option<u64> {
    get_process_memory(pgid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_check_interval() {
        assert_eq!(MEMORY_CHECK_INTERVAL_MS, 100);
    }

    #[test]
    fn test_launch_spec_wrapping() {
        let inner = LaunchSpec::new("npx", ["ts-node", "scraper.ts"]);
        let wrapped = inner.wrapped_in("xvfb-run", ["-a"]);
        assert_eq!(wrapped.program, "xvfb-run");
        assert_eq!(wrapped.args, vec!["-a", "npx", "ts-node", "scraper.ts"]);
        assert_eq!(wrapped.display(), "xvfb-run -a npx ts-node scraper.ts");
    }

    #[test]
    fn test_parse_stat_pgrp_handles_odd_comm() {
        let stat = "4242 (my (weird) proc) S 1 4200 4200 0 -1 4194560";
        assert_eq!(parse_stat_pgrp(stat), Some(4200));
        assert_eq!(parse_stat_pgrp("garbage"), None);
    }

    #[cfg(unix)]
    fn sh_env() -> Vec<(String, String)> {
        vec![("PATH".to_string(), std::env::var("PATH").unwrap_or_default())]
    }

    #[cfg(unix)]
    #[test]
    fn test_run_bounded_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec::new("/bin/sh", ["-c", "echo out; echo err >&2; exit 3"]);
        let out = run_bounded(&spec, dir.path(), &sh_env(), WaitLimits::timeout(Duration::from_secs(10))).unwrap();
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.exit_code, 3);
        assert!(out.termination.is_none());
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_bounded_env_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = sh_env();
        env.push(("ONLY_THIS".to_string(), "yes".to_string()));
        let spec = LaunchSpec::new("/bin/sh", ["-c", "echo \"$ONLY_THIS:${HOME:-unset}\""]);
        let out = run_bounded(&spec, dir.path(), &env, WaitLimits::timeout(Duration::from_secs(10))).unwrap();
        assert_eq!(out.stdout.trim(), "yes:unset");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_bounded_timeout_kills_group() {
        let dir = tempfile::tempdir().unwrap();
        // The background sleep shares the group and keeps stdout open until killed.
        let spec = LaunchSpec::new("/bin/sh", ["-c", "echo started; sleep 30 & sleep 30"]);
        let started = Instant::now();
        let out = run_bounded(&spec, dir.path(), &sh_env(), WaitLimits::timeout(Duration::from_millis(500))).unwrap();
        assert_eq!(out.termination, Some(Termination::Timeout));
        assert_eq!(out.exit_code, -1);
        assert_eq!(out.stdout.trim(), "started");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_bounded_missing_program_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec::new("/nonexistent/scrapelite-tool", Vec::<String>::new());
        let err = run_bounded(&spec, dir.path(), &sh_env(), WaitLimits::timeout(Duration::from_secs(1))).unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
