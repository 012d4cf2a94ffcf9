//! User-facing notifications.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    /// Informational.
    Info,
    /// Something completed.
    Success,
    /// Something was lost or degraded.
    Warning,
    /// An operation failed.
    Error,
}

/// A toast-style message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Severity.
    pub level: NotificationLevel,
    /// Message text.
    pub message: String,
}

impl Notification {
    /// Creates a notification.
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    /// Creates a warning notification.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, message)
    }

    /// Creates an error notification.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }
}

/// Surface for user-facing messages and the sign-in prompt.
///
/// Implemented by the presentation layer.
pub trait Notifier: Send + Sync {
    /// Shows a notification.
    fn notify(&self, notification: Notification);

    /// Asks the user to sign in again.
    fn prompt_sign_in(&self);
}

/// A notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Info | NotificationLevel::Success => {
                tracing::info!(message = %notification.message, "notification")
            }
            NotificationLevel::Warning => {
                tracing::warn!(message = %notification.message, "notification")
            }
            NotificationLevel::Error => {
                tracing::error!(message = %notification.message, "notification")
            }
        }
    }

    fn prompt_sign_in(&self) {
        tracing::warn!("sign-in required");
    }
}

/// A notifier that records everything, for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
    sign_in_prompts: AtomicUsize,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns recorded notifications.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    /// Returns recorded messages of the given level.
    pub fn messages(&self, level: NotificationLevel) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .filter(|n| n.level == level)
            .map(|n| n.message.clone())
            .collect()
    }

    /// Number of sign-in prompts.
    pub fn sign_in_prompts(&self) -> usize {
        self.sign_in_prompts.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }

    fn prompt_sign_in(&self) {
        self.sign_in_prompts.fetch_add(1, Ordering::SeqCst);
    }
}
