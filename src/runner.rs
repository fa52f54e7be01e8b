//! Process Runner
//!
//! The only way pipeline stages invoke external tools. Every call:
//!
//! 1. echoes `$ <command line>` to the event stream
//! 2. runs the program through a `CommandExecutor`
//! 3. emits each non-empty, trimmed output line as a separate log line
//! 4. classifies the result according to `CommandSpec::must_succeed`
//!
//! A must-succeed call that exits non-zero, times out or dies on a signal
//! becomes `InstallError::CommandFailure`. A best-effort call always
//! reports success and leaves a note in the log instead.

use crate::command_executor::{CommandExecutor, CommandSpec};
use crate::error::{InstallError, Result};
use crate::events::EventSink;
use tracing::{debug, info, warn};

/// Exit code reported when the program never produced one
pub const ABNORMAL_EXIT: i32 = -1;

/// Result of a successful (or ignored) invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured output; stdout alone for `StdoutOnly` captures
    pub output: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Non-empty trimmed lines of the captured output
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.output.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// Runs commands on behalf of the pipeline and narrates them.
pub struct ProcessRunner<E: CommandExecutor> {
    executor: E,
    events: EventSink,
}

impl<E: CommandExecutor> ProcessRunner<E> {
    pub fn new(executor: E, events: EventSink) -> Self {
        Self { executor, events }
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Give the executor back (tests inspect what was run).
    pub fn into_executor(self) -> E {
        self.executor
    }

    /// Emit a narrative line (not command output).
    pub fn note(&self, text: impl Into<String>) {
        let text = text.into();
        info!("{}", text);
        self.events.log(text);
    }

    /// Invoke `spec` and classify the result.
    pub fn run(&mut self, spec: &CommandSpec) -> Result<CommandOutput> {
        let command_line = spec.command_line();
        info!("$ {}", command_line);
        self.events.log(format!("$ {}", command_line));

        let raw = match self.executor.execute(spec) {
            Ok(raw) => raw,
            Err(e) => {
                let reason = format!("failed to start {}: {}", spec.program, e);
                return self.classify_failure(spec, ABNORMAL_EXIT, &reason, String::new());
            }
        };

        for line in raw.output.lines().chain(raw.stderr.lines()) {
            let line = line.trim();
            if !line.is_empty() {
                debug!("  {}", line);
                self.events.log(line);
            }
        }

        if raw.success() {
            return Ok(CommandOutput {
                output: raw.output,
                exit_code: 0,
            });
        }

        let exit_code = if raw.timed_out {
            ABNORMAL_EXIT
        } else {
            raw.exit_code.unwrap_or(ABNORMAL_EXIT)
        };

        let mut diagnostic = raw.output.clone();
        if !raw.stderr.is_empty() {
            if !diagnostic.is_empty() && !diagnostic.ends_with('\n') {
                diagnostic.push('\n');
            }
            diagnostic.push_str(&raw.stderr);
        }
        if raw.timed_out {
            if let Some(limit) = spec.timeout {
                diagnostic.push_str(&format!("\n(timed out after {}s)", limit.as_secs()));
            }
        }

        self.classify_failure(spec, exit_code, &diagnostic, raw.output)
    }

    fn classify_failure(
        &self,
        spec: &CommandSpec,
        exit_code: i32,
        diagnostic: &str,
        output: String,
    ) -> Result<CommandOutput> {
        if spec.must_succeed {
            warn!("Command failed (exit {}): {}", exit_code, spec);
            return Err(InstallError::command_failure(
                exit_code,
                spec.command_line(),
                diagnostic.trim_end(),
            ));
        }

        let note = format!("Note: '{}' failed (exit {}), continuing", spec.program, exit_code);
        warn!("{}", note);
        self.events.log(note);
        Ok(CommandOutput { output, exit_code })
    }
}
