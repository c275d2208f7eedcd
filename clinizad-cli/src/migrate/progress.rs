//! Progress events from a worker run to the presentation layer.
//!
//! One-directional FIFO queue: the worker is the producer, the presentation
//! loop drains it on a fixed interval. The channel is unbounded because no
//! event may ever be dropped; FIFO order is the only ordering guarantee.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::migrate::types::CupsCode;

/// Severity of a log line shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Event sent from a worker run to the presentation context.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Log line for the run console.
    Log { level: LogLevel, message: String },
    /// Statistic update, keyed by label.
    Stat { label: String, value: String },
    /// Progress percentage with a short status message.
    Progress { percent: u8, message: String },
    /// Transient state message (e.g. "Connecting to database...").
    State(String),
    /// Result rows of a CUPS search, plus the unlimited match count.
    SearchResult { rows: Vec<CupsCode>, total: i64 },
    /// A CUPS search failed.
    SearchError(String),
    /// Terminal event: the run is over.
    Finished { success: bool },
}

/// Worker-side handle: event sender plus the cooperative cancellation flag.
///
/// Send errors are ignored: a closed receiver means the presentation side
/// has gone away and there is nobody left to inform.
#[derive(Clone)]
pub struct RunContext {
    event_tx: mpsc::UnboundedSender<ProgressEvent>,
    cancel: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(event_tx: mpsc::UnboundedSender<ProgressEvent>, cancel: Arc<AtomicBool>) -> Self {
        RunContext { event_tx, cancel }
    }

    /// Create a context together with its receiver and cancel handle.
    pub fn channel() -> (
        Self,
        mpsc::UnboundedReceiver<ProgressEvent>,
        Arc<AtomicBool>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));
        (RunContext::new(tx, cancel.clone()), rx, cancel)
    }

    /// Cancellation is advisory: workers check this between database round
    /// trips, never mid-batch.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn send(&self, event: ProgressEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.send(ProgressEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn stat(&self, label: &str, value: impl ToString) {
        self.send(ProgressEvent::Stat {
            label: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn progress(&self, percent: u8, message: impl Into<String>) {
        self.send(ProgressEvent::Progress {
            percent: percent.min(100),
            message: message.into(),
        });
    }

    pub fn state(&self, message: impl Into<String>) {
        self.send(ProgressEvent::State(message.into()));
    }

    pub fn finish(&self, success: bool) {
        self.send(ProgressEvent::Finished { success });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_fifo_order() {
        let (ctx, mut rx, _cancel) = RunContext::channel();

        ctx.info("first");
        ctx.stat("Total", 3);
        ctx.progress(50, "halfway");
        ctx.finish(true);

        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::Log { message, .. }) if message == "first"
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::Stat { value, .. }) if value == "3"
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::Progress { percent: 50, .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::Finished { success: true })
        ));
    }

    #[tokio::test]
    async fn test_cancel_flag_is_shared() {
        let (ctx, _rx, cancel) = RunContext::channel();

        assert!(!ctx.is_cancelled());
        cancel.store(true, Ordering::Relaxed);
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_send_with_closed_receiver_does_not_panic() {
        let (ctx, rx, _cancel) = RunContext::channel();
        drop(rx);

        ctx.info("nobody is listening");
        ctx.finish(false);
    }

    #[test]
    fn test_progress_percent_is_clamped() {
        let (ctx, mut rx, _cancel) = RunContext::channel();
        ctx.progress(180, "overshoot");

        let event = rx.try_recv().expect("event queued");
        assert!(matches!(event, ProgressEvent::Progress { percent: 100, .. }));
    }
}
