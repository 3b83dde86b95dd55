//! Human-facing notification sink.
//!
//! The engine only produces plain text; how it reaches a person (chat bot,
//! e-mail, log file) is up to the implementation.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

/// Fire-and-forget text sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, text: &str);
}

/// Arc wrapper for Notifier trait objects.
pub type DynNotifier = Arc<dyn Notifier>;

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, text: &str) {
        info!(target: "basket::notify", message = %text, "Notification");
    }
}

/// Recording notifier for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded messages, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.messages.lock().last().cloned()
    }

    /// Number of messages that start with `prefix`.
    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.starts_with(prefix))
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, text: &str) {
        self.messages.lock().push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.notify("PnL status: total PnL $1.00");
        notifier.notify("Auto-close completed.");

        assert_eq!(notifier.messages().len(), 2);
        assert_eq!(notifier.last().as_deref(), Some("Auto-close completed."));
        assert_eq!(notifier.count_with_prefix("PnL status"), 1);
    }
}
