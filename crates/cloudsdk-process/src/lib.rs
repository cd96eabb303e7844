//! Helpers for driving the external Cloud SDK tools.
//!
//! The SDK installer and `gcloud components` can run for minutes and print a lot. Commands run
//! here capture a bounded amount of stdout/stderr, can be given a wall-clock timeout, stop when a
//! [`CancellationToken`] fires, and can stream each output line to a callback while running.

use std::{
    collections::BTreeMap,
    fmt,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

pub use tokio_util::sync::CancellationToken;

/// Lines longer than this are delivered to the line callback in pieces.
const MAX_LINE_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives every line the child prints, without the trailing newline.
pub type LineCallback = Arc<dyn Fn(OutputStream, &str) + Send + Sync>;

/// Captured stdout/stderr from a command, truncated to a maximum size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Set when either stdout or stderr had more bytes than were captured.
    pub truncated: bool,
}

impl BoundedOutput {
    pub fn combined(&self) -> String {
        let mut s = String::new();
        s.push_str(&self.stdout);
        if !self.stderr.is_empty() {
            if !s.is_empty() && !s.ends_with('\n') {
                s.push('\n');
            }
            s.push_str(&self.stderr);
        }
        s
    }
}

/// Options controlling command execution.
#[derive(Clone)]
pub struct RunOptions {
    /// Kill the process if it hasn't exited after this duration.
    pub timeout: Option<Duration>,
    /// Maximum bytes to capture *per stream* (stdout and stderr).
    pub max_bytes: usize,
    /// When cancelled, the process tree is terminated and `cancelled` is set on the result.
    pub cancellation: Option<CancellationToken>,
    /// How long to wait after a graceful termination signal before force-killing.
    pub kill_grace: Duration,
    /// Extra environment variables for the child.
    pub env: BTreeMap<String, String>,
    pub on_line: Option<LineCallback>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_bytes: 4 * 1024 * 1024,
            cancellation: None,
            kill_grace: Duration::from_millis(250),
            env: BTreeMap::new(),
            on_line: None,
        }
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("timeout", &self.timeout)
            .field("max_bytes", &self.max_bytes)
            .field("cancellation", &self.cancellation.is_some())
            .field("kill_grace", &self.kill_grace)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("on_line", &self.on_line.is_some())
            .finish()
    }
}

/// A full command invocation (cwd + program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(cwd: &Path, program: &Path, args: &[String]) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            program: program.to_path_buf(),
            args: args.to_vec(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') || arg.contains('\t') {
                write!(f, " \"{}\"", arg.replace('"', "\\\""))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub output: BoundedOutput,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// A command that ran but did not succeed (non-zero exit, timeout or cancellation).
#[derive(Debug, Clone)]
pub struct CommandFailure {
    pub command: CommandSpec,
    pub status: ExitStatus,
    pub output: BoundedOutput,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` exited with {}", self.command, self.status)?;
        if self.timed_out {
            write!(f, " (timed out)")?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        let stderr = self.output.stderr.trim();
        if !stderr.is_empty() {
            write!(f, "\nstderr:\n{stderr}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CommandFailure {}

/// Error returned by [`run_command_checked`].
#[derive(Debug)]
pub enum RunCommandError {
    Io {
        command: CommandSpec,
        source: io::Error,
    },
    Failed(Box<CommandFailure>),
}

impl RunCommandError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Failed(failure) if failure.cancelled)
    }
}

impl fmt::Display for RunCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { command, source } => write!(f, "failed to run `{command}`: {source}"),
            Self::Failed(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for RunCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Failed(err) => Some(err.as_ref()),
        }
    }
}

/// Run a command, capturing at most `opts.max_bytes` bytes of stdout and stderr each.
///
/// Always returns the exit status. On timeout the process tree is killed and `timed_out` is
/// set; on cancellation it is killed and `cancelled` is set.
pub fn run_command(
    cwd: &Path,
    program: &Path,
    args: &[String],
    opts: RunOptions,
) -> io::Result<CommandResult> {
    let command = CommandSpec::new(cwd, program, args);
    run_command_spec(&command, opts)
}

/// Run a command and treat non-zero exits, timeouts and cancellation as errors.
pub fn run_command_checked(
    cwd: &Path,
    program: &Path,
    args: &[String],
    opts: RunOptions,
) -> Result<CommandResult, RunCommandError> {
    let command = CommandSpec::new(cwd, program, args);
    let result = run_command_spec(&command, opts).map_err(|source| RunCommandError::Io {
        command: command.clone(),
        source,
    })?;

    if result.timed_out || result.cancelled || !result.status.success() {
        return Err(RunCommandError::Failed(Box::new(CommandFailure {
            command,
            status: result.status,
            output: result.output,
            timed_out: result.timed_out,
            cancelled: result.cancelled,
        })));
    }

    Ok(result)
}

fn run_command_spec(command: &CommandSpec, opts: RunOptions) -> io::Result<CommandResult> {
    tracing::debug!(target: "cloudsdk.process", command = %command, "spawning");

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.cwd)
        .envs(&opts.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group so a kill reaches the installer's children as well.
    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;

        cmd.pre_exec(|| {
            // SAFETY: `setpgid` is async-signal-safe and does not allocate.
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn()?;

    let Some(stdout) = child.stdout.take() else {
        return Err(io::Error::other("child stdout was not captured"));
    };
    let Some(stderr) = child.stderr.take() else {
        return Err(io::Error::other("child stderr was not captured"));
    };

    let max_bytes = opts.max_bytes;
    let stdout_cb = opts.on_line.clone();
    let stderr_cb = opts.on_line.clone();
    let stdout_handle =
        thread::spawn(move || read_bounded(stdout, max_bytes, OutputStream::Stdout, stdout_cb));
    let stderr_handle =
        thread::spawn(move || read_bounded(stderr, max_bytes, OutputStream::Stderr, stderr_cb));

    let start = Instant::now();
    let mut timed_out = false;
    let mut cancelled = false;

    let status = if opts.timeout.is_some() || opts.cancellation.is_some() {
        let poll = Duration::from_millis(50);
        loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }

            if let Some(token) = opts.cancellation.as_ref() {
                if token.is_cancelled() {
                    cancelled = true;
                    break terminate_process_tree(&mut child, opts.kill_grace)?;
                }
            }

            if let Some(timeout) = opts.timeout {
                if start.elapsed() >= timeout {
                    timed_out = true;
                    break terminate_process_tree(&mut child, opts.kill_grace)?;
                }

                thread::sleep(poll.min(timeout.saturating_sub(start.elapsed())));
            } else {
                thread::sleep(poll);
            }
        }
    } else {
        child.wait()?
    };

    let (stdout_bytes, stdout_truncated) = join_reader(stdout_handle, "stdout")??;
    let (stderr_bytes, stderr_truncated) = join_reader(stderr_handle, "stderr")??;

    tracing::debug!(
        target: "cloudsdk.process",
        command = %command,
        status = %status,
        timed_out,
        cancelled,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "finished"
    );

    Ok(CommandResult {
        status,
        output: BoundedOutput {
            stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            truncated: stdout_truncated || stderr_truncated,
        },
        timed_out,
        cancelled,
    })
}

fn terminate_process_tree(
    child: &mut std::process::Child,
    grace: Duration,
) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        let pid = child.id() as i32;
        // Negative pid targets the process group created in `pre_exec`.
        unsafe {
            let _ = libc::kill(-pid, libc::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(Duration::from_millis(25));
        }

        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
        child.wait()
    }

    #[cfg(windows)]
    {
        let _ = grace;
        let pid = child.id().to_string();
        let _ = Command::new("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let _ = child.kill();
        child.wait()
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = grace;
        let _ = child.kill();
        child.wait()
    }
}

fn join_reader(
    handle: thread::JoinHandle<io::Result<(Vec<u8>, bool)>>,
    stream: &'static str,
) -> io::Result<io::Result<(Vec<u8>, bool)>> {
    handle
        .join()
        .map_err(|_| io::Error::other(format!("{stream} reader thread panicked")))
}

fn read_bounded(
    reader: impl Read,
    max_bytes: usize,
    stream: OutputStream,
    on_line: Option<LineCallback>,
) -> io::Result<(Vec<u8>, bool)> {
    let mut reader = BufReader::new(reader);
    let mut out = Vec::new();
    let mut truncated = false;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = (&mut reader)
            .take(MAX_LINE_BYTES)
            .read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }

        if let Some(callback) = on_line.as_ref() {
            let text = String::from_utf8_lossy(&line);
            callback(stream, text.trim_end_matches(['\r', '\n']));
        }

        if out.len() < max_bytes {
            let to_store = (max_bytes - out.len()).min(n);
            out.extend_from_slice(&line[..to_store]);
            if to_store < n {
                truncated = true;
            }
        } else {
            truncated = true;
        }
    }

    Ok((out, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_bounded_truncates_and_reports_lines() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: LineCallback = Arc::new(move |stream: OutputStream, line: &str| {
            sink.lock().unwrap().push((stream, line.to_string()));
        });

        let input = b"first\r\nsecond\nthird".as_slice();
        let (bytes, truncated) =
            read_bounded(input, 8, OutputStream::Stderr, Some(callback)).unwrap();

        assert_eq!(bytes, b"first\r\ns");
        assert!(truncated);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (OutputStream::Stderr, "first".to_string()),
                (OutputStream::Stderr, "second".to_string()),
                (OutputStream::Stderr, "third".to_string()),
            ]
        );
    }

    #[test]
    fn command_spec_display_quotes_spaces() {
        let spec = CommandSpec::new(
            Path::new("."),
            Path::new("gcloud"),
            &["components".into(), "install".into(), "app engine".into()],
        );
        assert_eq!(spec.to_string(), "gcloud components install \"app engine\"");
    }

    #[test]
    fn combined_output_joins_streams() {
        let output = BoundedOutput {
            stdout: "out".into(),
            stderr: "err\n".into(),
            truncated: false,
        };
        assert_eq!(output.combined(), "out\nerr\n");
    }
}
