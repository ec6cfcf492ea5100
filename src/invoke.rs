//! Inference-tool wrapper: executable discovery and subprocess invocation.
//!
//! The external phylogenetic inference tool (IQ-TREE or compatible) is
//! driven as a plain subprocess: arguments are passed as a literal array,
//! never through a shell, and every invocation runs under a wall-clock
//! timeout. On Unix the child is started in its own process group so a
//! timed-out run can be killed together with any helpers it spawned.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Binary names probed on the search path when no explicit path is given.
pub const TOOL_CANDIDATES: [&str; 2] = ["iqtree2", "iqtree"];

/// How much trailing diagnostic text to keep in a failure message.
const EXCERPT_LEN: usize = 400;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors surfaced by the power-analysis pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PowerError {
    #[error("inference tool not found (tried {tried:?})")]
    ExecutableNotFound { tried: Vec<String> },
    #[error("inference tool exited with status {status}: {stderr_excerpt}")]
    ToolFailed { status: i32, stderr_excerpt: String },
    #[error("inference tool timed out after {0:?}")]
    Timeout(Duration),
    #[error("no simulated alignments found in {}", .dir.display())]
    NoSimulationOutput { dir: PathBuf },
    #[error("no replicate produced a usable fit table; power is undefined")]
    NoUsableReplicates,
    #[error("expected tree file missing: {}", .path.display())]
    MissingTree { path: PathBuf },
    #[error("worker pool setup failed: {0}")]
    WorkerPool(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A resolved inference-tool executable.
#[derive(Debug, Clone)]
pub struct ToolInstallation {
    /// Path or bare command name of the executable.
    pub executable: PathBuf,
}

/// Captured streams of an invocation that exited with status zero.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolInstallation {
    /// Resolve the inference tool: an explicit path first, then the
    /// candidate binary names on the search path, each probed by running
    /// it with `--version`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, PowerError> {
        let mut tried = Vec::new();
        if let Some(path) = explicit {
            if path.exists() || probe(path) {
                return Ok(ToolInstallation {
                    executable: path.to_path_buf(),
                });
            }
            tried.push(path.display().to_string());
        }
        for candidate in TOOL_CANDIDATES {
            if probe(Path::new(candidate)) {
                log::info!("using inference tool '{}'", candidate);
                return Ok(ToolInstallation {
                    executable: PathBuf::from(candidate),
                });
            }
            tried.push(candidate.to_string());
        }
        Err(PowerError::ExecutableNotFound { tried })
    }

    /// Run the tool with the given argument list, capturing both streams.
    ///
    /// Arguments reach the child verbatim; nothing is shell-interpreted.
    /// A run exceeding `timeout` is killed (the whole process group on
    /// Unix) and reported as [`PowerError::Timeout`]. A non-zero exit
    /// status becomes [`PowerError::ToolFailed`] carrying the tail of the
    /// tool's diagnostics.
    pub fn invoke(&self, args: &[String], timeout: Duration) -> Result<RunOutput, PowerError> {
        log::debug!("invoking {} {}", self.executable.display(), args.join(" "));

        let mut cmd = Command::new(&self.executable);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());

        // On Unix, start in a new process group for clean kill on timeout.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;

        // Drain the pipes on background threads. A chatty run would
        // otherwise fill the pipe buffer and block before we ever see it
        // exit.
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let child_pid = child.id() as i32;
        let start = Instant::now();

        // Poll for completion; None means the run timed out and was killed.
        let status = loop {
            match child.try_wait()? {
                Some(status) => break Some(status),
                None => {
                    if start.elapsed() > timeout {
                        log::warn!(
                            "inference tool exceeded {:?} timeout, killing process group",
                            timeout
                        );
                        kill_child(&mut child, child_pid);
                        let _ = child.wait();
                        break None;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };

        let stdout = collect_reader(stdout_reader);
        let stderr = collect_reader(stderr_reader);

        let status = match status {
            Some(status) => status,
            None => return Err(PowerError::Timeout(timeout)),
        };

        if !status.success() {
            return Err(PowerError::ToolFailed {
                status: status.code().unwrap_or(-1),
                stderr_excerpt: failure_excerpt(&stdout, &stderr),
            });
        }

        Ok(RunOutput { stdout, stderr })
    }
}

/// Check that a candidate executable runs at all (`--version` exits
/// cleanly).
fn probe(executable: &Path) -> bool {
    Command::new(executable)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        let _ = source.read_to_string(&mut buf);
        buf
    })
}

fn collect_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.join().unwrap_or_default(),
        None => String::new(),
    }
}

/// Kill the child, and on Unix its whole process group: SIGTERM first,
/// SIGKILL after a grace period.
fn kill_child(child: &mut Child, child_pid: i32) {
    #[cfg(unix)]
    {
        let _ = child;
        unsafe {
            libc::kill(-child_pid, libc::SIGTERM);
        }
        thread::sleep(Duration::from_millis(500));
        unsafe {
            libc::kill(-child_pid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child_pid;
        let _ = child.kill();
    }
}

/// Tail of the diagnostics for error messages: stderr if the tool wrote
/// any, otherwise stdout (some tools report errors there).
fn failure_excerpt(stdout: &str, stderr: &str) -> String {
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    tail(source.trim(), EXCERPT_LEN)
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &s[start..])
}
