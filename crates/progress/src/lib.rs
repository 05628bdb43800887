use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod human;
pub mod json;
pub mod lines;
pub mod redact;

/// Coarse phase a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Download,
    Install,
    Venv,
    Deps,
}

/// One progress update. `percent` is advisory and may move backwards between
/// sub-steps of the same stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, message: impl Into<String>, percent: Option<u8>) -> Self {
        Self {
            stage,
            message: message.into(),
            percent: percent.map(|p| p.min(100)),
        }
    }
}

/// Receives progress events synchronously from whichever task produced them.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

struct ChannelSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is watching any more.
        let _ = self.sender.send(event);
    }
}

/// Cheap, cloneable handle threaded through every long operation.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub fn new(sink: impl ProgressSink + 'static) -> Self {
        Self {
            sink: Some(Arc::new(sink)),
        }
    }

    pub fn none() -> Self {
        Self { sink: None }
    }

    /// Pull-style variant: events are queued on an unbounded channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(ChannelSink { sender }), receiver)
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn emit(&self, event: ProgressEvent) {
        tracing::trace!(
            stage = %event.stage,
            percent = ?event.percent,
            message = %event.message,
            "progress"
        );
        if let Some(sink) = &self.sink {
            sink.on_progress(event);
        }
    }

    pub fn report(&self, stage: Stage, message: impl Into<String>, percent: Option<u8>) {
        if self.sink.is_some() {
            self.emit(ProgressEvent::new(stage, message, percent));
        }
    }

    pub fn done(&self, stage: Stage, message: impl Into<String>) {
        self.report(stage, message, Some(100));
    }

    /// Forwards every non-empty line of a tool output chunk as a bare message.
    pub fn log_chunk(&self, stage: Stage, chunk: &str) {
        if self.sink.is_none() {
            return;
        }
        for line in lines::split_lines(chunk) {
            self.emit(ProgressEvent::new(stage, line, None));
        }
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Stage::Download => "download",
            Stage::Install => "install",
            Stage::Venv => "venv",
            Stage::Deps => "deps",
        };
        write!(f, "{value}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn closure_sink_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let reporter = ProgressReporter::new(move |event: ProgressEvent| {
            sink_seen.lock().unwrap().push(event);
        });

        reporter.report(Stage::Download, "fetching", Some(30));
        reporter.done(Stage::Install, "installed");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].stage, Stage::Download);
        assert_eq!(seen[1].percent, Some(100));
    }

    #[test]
    fn percent_is_clamped() {
        let event = ProgressEvent::new(Stage::Deps, "x", Some(250));
        assert_eq!(event.percent, Some(100));
    }

    #[test]
    fn log_chunk_splits_lines_and_drops_blanks() {
        let (reporter, mut rx) = ProgressReporter::channel();
        reporter.log_chunk(Stage::Deps, "Resolved 3 packages\r\n\n  Installed 3 packages  \n");
        drop(reporter);

        let mut messages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.percent, None);
            messages.push(event.message);
        }
        assert_eq!(
            messages,
            vec!["Resolved 3 packages", "Installed 3 packages"]
        );
    }

    #[test]
    fn disabled_reporter_is_silent() {
        let reporter = ProgressReporter::none();
        assert!(!reporter.is_enabled());
        reporter.report(Stage::Venv, "nothing listens", None);
    }

    #[test]
    fn stage_serializes_lowercase() {
        let event = ProgressEvent::new(Stage::Venv, "ready", Some(100));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"stage":"venv","message":"ready","percent":100}"#);
    }
}
