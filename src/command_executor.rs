//! command_executor.rs - Spawns external programs and collects their output.
//!
//! `CommandExecutor` is the seam between the pipeline and the operating
//! system. The production `SystemExecutor` runs each program in its own
//! process group, captures its output and enforces an optional timeout;
//! tests substitute a scripted executor and never touch a real disk.
//!
//! Classification (success vs. `CommandFailure`) is not done here; see
//! `runner::ProcessRunner`.

use crate::process_guard::{kill_process_group, CommandProcessGroup};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often a running child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to keep reading after the child exited before giving up on
/// descendants that still hold the pipe open
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Which streams end up in `RawOutput::output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// stdout and stderr share one pipe, so interleaving is preserved
    #[default]
    Merged,
    /// stdout is data to be parsed; stderr is kept apart for diagnostics
    StdoutOnly,
}

/// One external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Fail the calling stage on non-zero exit (false = best-effort)
    pub must_succeed: bool,
    /// `None` blocks until the program exits
    pub timeout: Option<Duration>,
    pub capture: CaptureMode,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            must_succeed: true,
            timeout: None,
            capture: CaptureMode::Merged,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Ignore failure of this command
    pub fn best_effort(mut self) -> Self {
        self.must_succeed = false;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stdout_only(mut self) -> Self {
        self.capture = CaptureMode::StdoutOnly;
        self
    }

    /// Space-joined command line, as echoed to the log
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Whatever the program produced, unclassified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// Merged stdout+stderr, or stdout alone in `StdoutOnly` mode
    pub output: String,
    /// stderr in `StdoutOnly` mode; empty otherwise
    pub stderr: String,
    /// `None` when the program was terminated by a signal
    pub exit_code: Option<i32>,
    /// The timeout fired and the process group was killed
    pub timed_out: bool,
}

impl RawOutput {
    /// Normal exit with status 0
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs one program to completion.
///
/// `Err` means the program could not be started at all.
pub trait CommandExecutor: Send {
    fn execute(&mut self, spec: &CommandSpec) -> io::Result<RawOutput>;
}

/// Executes real programs on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn execute(&mut self, spec: &CommandSpec) -> io::Result<RawOutput> {
        debug!("Spawning: {}", spec);

        let mut command = Command::new(&spec.program);
        command.args(&spec.args).stdin(Stdio::null()).in_new_process_group();

        let merged_reader = match spec.capture {
            CaptureMode::Merged => {
                let (read_end, write_end) = nix::unistd::pipe().map_err(io::Error::from)?;
                let stderr_end = write_end.try_clone()?;
                command
                    .stdout(Stdio::from(write_end))
                    .stderr(Stdio::from(stderr_end));
                Some(File::from(read_end))
            }
            CaptureMode::StdoutOnly => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
                None
            }
        };

        let mut child = command.spawn()?;
        // The parent's copies of the pipe write ends live in `command`;
        // they must be closed or the reader never sees EOF.
        drop(command);

        let (tx, rx) = mpsc::channel();
        match merged_reader {
            Some(file) => spawn_reader(file, Stream::Out, tx),
            None => {
                if let Some(stdout) = child.stdout.take() {
                    spawn_reader(stdout, Stream::Out, tx.clone());
                }
                if let Some(stderr) = child.stderr.take() {
                    spawn_reader(stderr, Stream::Err, tx);
                }
            }
        }

        let mut collected = Collected::default();
        let (status, timed_out) = wait_collecting(&mut child, spec.timeout, &rx, &mut collected)?;
        collected.drain(&rx);

        if timed_out {
            warn!("{} timed out and was killed", spec.program);
        }

        Ok(RawOutput {
            output: String::from_utf8_lossy(&collected.out).into_owned(),
            stderr: String::from_utf8_lossy(&collected.err).into_owned(),
            exit_code: status.and_then(|s| s.code()),
            timed_out,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Out,
    Err,
}

#[derive(Default)]
struct Collected {
    out: Vec<u8>,
    err: Vec<u8>,
}

impl Collected {
    fn push(&mut self, (stream, chunk): (Stream, Vec<u8>)) {
        match stream {
            Stream::Out => self.out.extend_from_slice(&chunk),
            Stream::Err => self.err.extend_from_slice(&chunk),
        }
    }

    /// Read until every writer closed, or until the pipe stays quiet for
    /// `DRAIN_GRACE`.
    fn drain(&mut self, rx: &Receiver<(Stream, Vec<u8>)>) {
        while let Ok(chunk) = rx.recv_timeout(DRAIN_GRACE) {
            self.push(chunk);
        }
    }
}

fn spawn_reader<R>(mut source: R, stream: Stream, tx: Sender<(Stream, Vec<u8>)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match source.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Wait for `child`, reading output as it arrives. On timeout the whole
/// process group is killed and `(None, true)` is returned.
fn wait_collecting(
    child: &mut Child,
    timeout: Option<Duration>,
    rx: &Receiver<(Stream, Vec<u8>)>,
    collected: &mut Collected,
) -> io::Result<(Option<ExitStatus>, bool)> {
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => collected.push(chunk),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
        }

        if let Some(status) = child.try_wait()? {
            return Ok((Some(status), false));
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            if let Err(e) = kill_process_group(child.id()) {
                warn!("Failed to kill process group {}: {}", child.id(), e);
                child.kill()?;
            }
            child.wait()?;
            return Ok((None, true));
        }
    }
}
