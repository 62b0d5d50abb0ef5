//! Command runner abstraction and the process-backed implementation.
//!
//! The channel shells out to the system `ssh` client. A [`CommandRunner`]
//! seam keeps the channel testable without spawning processes; the real
//! [`ProcessCommandRunner`] supports streaming a script payload over stdin,
//! relaying progress lines live, and enforcing a wall-clock deadline.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::ChannelError;

const DEADLINE_POLL: Duration = Duration::from_millis(25);

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Per-invocation execution options.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunOptions {
    /// Payload written to the child's stdin before waiting; the pipe is
    /// closed once the payload has been written.
    pub stdin: Option<String>,
    /// Wall-clock ceiling for the whole invocation. The child is killed on
    /// expiry and the run reported as a timeout.
    pub timeout: Option<Duration>,
    /// When set, stdout lines are relayed to the local terminal as they
    /// arrive in addition to being captured.
    pub stream_progress: bool,
}

/// Output captured from a remote command executed over SSH.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code reported by the remote command.
    pub exit_code: Option<i32>,
    /// Captured standard output stream.
    pub stdout: String,
    /// Captured standard error stream.
    pub stderr: String,
}

impl RemoteCommandOutput {
    /// Returns `true` when the remote command exited zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Spawn`] if the command cannot be started,
    /// [`ChannelError::Io`] if feeding stdin or collecting output fails, and
    /// [`ChannelError::Timeout`] when the deadline in `options` expires.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        options: &RunOptions,
    ) -> Result<CommandOutput, ChannelError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        options: &RunOptions,
    ) -> Result<CommandOutput, ChannelError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if options.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|err| ChannelError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        })?;

        if let Some(payload) = &options.stdin {
            write_stdin(&mut child, payload, program)?;
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_task = capture_stdout(stdout_pipe, options.stream_progress);
        let stderr_task = capture_stderr(stderr_pipe);

        let code = wait_with_deadline(&mut child, options.timeout, program)?;
        let stdout = join_capture(stdout_task, program)?;
        let stderr = join_capture(stderr_task, program)?;

        Ok(CommandOutput {
            code,
            stdout,
            stderr,
        })
    }
}

fn write_stdin(child: &mut Child, payload: &str, program: &str) -> Result<(), ChannelError> {
    let Some(mut handle) = child.stdin.take() else {
        return Err(ChannelError::Io {
            program: program.to_owned(),
            message: String::from("stdin pipe was not opened"),
        });
    };
    // Dropping the handle afterwards closes the pipe so the child sees EOF.
    handle
        .write_all(payload.as_bytes())
        .map_err(|err| ChannelError::Io {
            program: program.to_owned(),
            message: err.to_string(),
        })
}

fn capture_stdout(
    pipe: Option<ChildStdout>,
    stream_progress: bool,
) -> Option<JoinHandle<io::Result<String>>> {
    let pipe = pipe?;
    if !stream_progress {
        return Some(thread::spawn(move || read_all(pipe)));
    }
    Some(thread::spawn(move || {
        let mut captured = String::new();
        let reader = BufReader::new(pipe);
        let mut terminal = io::stdout();
        for line in reader.lines() {
            let text = line?;
            writeln!(terminal, "{text}")?;
            captured.push_str(&text);
            captured.push('\n');
        }
        Ok(captured)
    }))
}

fn capture_stderr(pipe: Option<ChildStderr>) -> Option<JoinHandle<io::Result<String>>> {
    let pipe = pipe?;
    Some(thread::spawn(move || read_all(pipe)))
}

fn read_all(mut pipe: impl Read) -> io::Result<String> {
    let mut buffer = Vec::new();
    pipe.read_to_end(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn join_capture(
    task: Option<JoinHandle<io::Result<String>>>,
    program: &str,
) -> Result<String, ChannelError> {
    let Some(task) = task else {
        return Ok(String::new());
    };
    match task.join() {
        Ok(Ok(captured)) => Ok(captured),
        Ok(Err(err)) => Err(ChannelError::Io {
            program: program.to_owned(),
            message: err.to_string(),
        }),
        Err(_) => Err(ChannelError::Io {
            program: program.to_owned(),
            message: String::from("output capture thread panicked"),
        }),
    }
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
    program: &str,
) -> Result<Option<i32>, ChannelError> {
    let Some(limit) = timeout else {
        let status = child.wait().map_err(|err| ChannelError::Io {
            program: program.to_owned(),
            message: err.to_string(),
        })?;
        return Ok(status.code());
    };

    let deadline = Instant::now() + limit;
    loop {
        let waited = child.try_wait().map_err(|err| ChannelError::Io {
            program: program.to_owned(),
            message: err.to_string(),
        })?;
        if let Some(status) = waited {
            return Ok(status.code());
        }
        if Instant::now() >= deadline {
            child.kill().ok();
            child.wait().ok();
            return Err(ChannelError::Timeout {
                program: program.to_owned(),
                limit_secs: limit.as_secs(),
            });
        }
        thread::sleep(DEADLINE_POLL);
    }
}
