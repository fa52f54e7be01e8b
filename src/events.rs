//! Events pushed from the install worker to whoever is watching.
//!
//! The worker owns an `EventSink`; the presentation side owns the matching
//! `Receiver<InstallEvent>`. Delivery is one-way and is the only interaction
//! point between the two threads.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};

/// A milestone reached by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub message: String,
    /// 0-100, non-decreasing over one run
    pub percent: u8,
}

/// One line of narrative or command output, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
}

/// Terminal state of a pipeline run. Exactly one is emitted per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Succeeded,
    Failed(String),
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "Installation complete"),
            Self::Failed(reason) => write!(f, "Installation failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    Progress(ProgressEvent),
    Log(LogLine),
    Finished(PipelineOutcome),
}

/// Sending half of the event channel.
///
/// A dropped receiver is not an error for the worker: the install keeps
/// going (it cannot be cancelled) and events are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<InstallEvent>,
}

impl EventSink {
    /// Create a sink and its receiving end.
    pub fn channel() -> (Self, Receiver<InstallEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    pub fn log(&self, text: impl Into<String>) {
        self.send(InstallEvent::Log(LogLine { text: text.into() }));
    }

    pub fn progress(&self, message: impl Into<String>, percent: u8) {
        self.send(InstallEvent::Progress(ProgressEvent {
            message: message.into(),
            percent: percent.min(100),
        }));
    }

    pub fn finish(&self, outcome: PipelineOutcome) {
        self.send(InstallEvent::Finished(outcome));
    }

    fn send(&self, event: InstallEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Event receiver dropped; discarding install event");
        }
    }
}
