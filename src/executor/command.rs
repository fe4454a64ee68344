//! Shell command execution.

use crate::engine::ActionContext;
use crate::error::{ConvergeError, Result};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

/// How often a running child is checked for exit or cancellation.
const WAIT_INTERVAL: Duration = Duration::from_millis(20);

/// How long output readers may lag behind the shell's exit.
const PIPE_GRACE: Duration = Duration::from_millis(250);

/// A shell command to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command line, passed to the shell.
    pub command: String,

    /// Working directory.
    pub cwd: Option<PathBuf>,

    /// Environment variables (merged with the inherited environment).
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    /// Create a spec for a command line with no extra options.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Result of executing a shell command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (None if killed by signal).
    pub exit_code: Option<i32>,

    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,

    /// Execution duration.
    pub duration: Duration,

    /// Whether command succeeded (exit code 0).
    pub success: bool,
}

impl CommandOutput {
    /// Turn a non-zero exit into [`ConvergeError::CommandFailed`].
    pub fn into_result(self, command: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ConvergeError::CommandFailed {
                command: command.to_string(),
                code: self.exit_code,
            })
        }
    }
}

/// Execute a shell command, capturing its output.
///
/// The child is killed as soon as the context is cancelled or its deadline
/// passes; the returned error is then [`ConvergeError::Timeout`] or
/// [`ConvergeError::Cancelled`].
pub fn execute(spec: &CommandSpec, ctx: &ActionContext) -> Result<CommandOutput> {
    ctx.check()?;
    let start = Instant::now();

    let (shell, flag) = shell();
    let mut cmd = Command::new(shell);
    cmd.arg(flag).arg(&spec.command);

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    // Own process group, so a kill reaches the shell's children too.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("Running: {}", spec.command);
    let mut child = cmd.spawn().map_err(|e| {
        debug!("Failed to spawn '{}': {}", spec.command, e);
        ConvergeError::CommandFailed {
            command: spec.command.clone(),
            code: None,
        }
    })?;

    let stdout = drain(child.stdout.take(), "stdout");
    let stderr = drain(child.stderr.take(), "stderr");

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if ctx.is_cancelled() {
            debug!("Killing '{}'", spec.command);
            kill(&mut child);
            // Readers are left detached; orphaned grandchildren may hold the pipes.
            drop((stdout, stderr));
            ctx.check()?;
            return Err(ConvergeError::Cancelled {
                reason: "cancelled".to_string(),
            });
        }
        thread::sleep(WAIT_INTERVAL);
    };

    // Background children (`daemon &`) inherit the pipes and may keep them
    // open long after the shell exits; wait only briefly for the readers.
    let grace = Instant::now() + PIPE_GRACE;
    while !(finished(&stdout) && finished(&stderr))
        && Instant::now() < grace
        && !ctx.is_cancelled()
    {
        thread::sleep(WAIT_INTERVAL);
    }
    if !(finished(&stdout) && finished(&stderr)) {
        debug!("'{}' left output pipes open, detaching readers", spec.command);
    }

    let stdout = collect(stdout);
    let stderr = collect(stderr);

    Ok(CommandOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        duration: start.elapsed(),
        success: status.success(),
    })
}

/// Execute a command and return success/failure.
pub fn execute_check(spec: &CommandSpec) -> Result<bool> {
    Ok(execute(spec, &ActionContext::default())?.success)
}

/// Output read so far from one child stream.
struct Capture {
    buffer: Arc<Mutex<String>>,
    handle: JoinHandle<()>,
}

/// Read a child stream to the end on its own thread, logging each line.
fn drain<R: Read + Send + 'static>(stream: Option<R>, label: &'static str) -> Option<Capture> {
    let stream = stream?;
    let buffer = Arc::new(Mutex::new(String::new()));
    let shared = Arc::clone(&buffer);
    let handle = thread::spawn(move || {
        for line in BufReader::new(stream)
            .lines()
            .map_while(std::result::Result::ok)
        {
            debug!("[{}] {}", label, line);
            let mut output = shared.lock().unwrap_or_else(|p| p.into_inner());
            output.push_str(&line);
            output.push('\n');
        }
    });
    Some(Capture { buffer, handle })
}

fn finished(capture: &Option<Capture>) -> bool {
    capture.as_ref().is_none_or(|c| c.handle.is_finished())
}

fn kill(child: &mut std::process::Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            // SAFETY: signalling a process group we created; no memory is touched.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Everything captured so far. A reader still blocked on an inherited pipe
/// is left detached.
fn collect(capture: Option<Capture>) -> String {
    let Some(capture) = capture else {
        return String::new();
    };
    if capture.handle.is_finished() {
        let _ = capture.handle.join();
    }
    let output = capture.buffer.lock().unwrap_or_else(|p| p.into_inner());
    output.clone()
}

/// Shell and the flag that passes it a command line.
///
/// Recipes run unattended, so this is a plain non-interactive shell rather
/// than the user's login shell.
fn shell() -> (String, &'static str) {
    if cfg!(target_os = "windows") {
        (
            std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string()),
            "/C",
        )
    } else {
        ("/bin/sh".to_string(), "-c")
    }
}
