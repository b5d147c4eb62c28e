//! Ordered progress channel between an orchestrator and its caller.
//!
//! The sending half also keeps a timestamped copy of every message, which the
//! backup run writes into the archive as `backup.log`.

use chrono::{SecondsFormat, Utc};
use collection_vault_core::{ProgressEvent, RunSummary};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Create a connected sink/stream pair for one run.
pub fn channel() -> (ProgressSink, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ProgressSink {
            tx: Some(tx),
            log: Vec::new(),
        },
        ProgressStream { rx },
    )
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    log: Vec<String>,
}

impl ProgressSink {
    /// A sink nobody listens to; messages still reach `tracing` and the run log.
    pub fn detached() -> Self {
        Self {
            tx: None,
            log: Vec::new(),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.emit(Level::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.emit(Level::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.emit(Level::Error, message.into());
    }

    /// Every message emitted so far, formatted as `[time] LEVEL: message`.
    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    /// Send the terminal event. Consuming the sink guarantees exactly one.
    pub fn complete(mut self, success: bool, message: impl Into<String>, stats: Option<RunSummary>) {
        let message = message.into();
        if success {
            info!(%message, "run complete");
        } else {
            error!(%message, "run complete");
        }
        self.send(ProgressEvent::Complete {
            success,
            message,
            stats,
        });
    }

    fn emit(&mut self, level: Level, message: String) {
        match level {
            Level::Info => info!("{message}"),
            Level::Warn => warn!("{message}"),
            Level::Error => error!("{message}"),
        }
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.log.push(format!("[{now}] {}: {message}", level.label()));

        let event = match level {
            Level::Error => ProgressEvent::Error { message },
            Level::Info | Level::Warn => ProgressEvent::Progress { message },
        };
        self.send(event);
    }

    fn send(&mut self, event: ProgressEvent) {
        // A caller that stopped listening does not stop the run.
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                self.tx = None;
            }
        }
    }
}

#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Drain events until the sending side is gone.
    pub async fn collect(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    pub fn into_inner(self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        self.rx
    }
}
