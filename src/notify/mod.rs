//! Outbound notifications
//!
//! The moderation guard and the clerk executor only see the [`Notifier`]
//! trait. Delivery is fire-and-forget from their perspective: a failed send
//! is logged by the caller and never undoes the state change that caused it.

mod http;

pub use http::{HttpNotifier, HttpNotifierSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

/// A plain-text email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Email {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self { to: to.into(), subject: subject.into(), body: body.into() }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider rejected message (status={status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("notifier misconfigured: {0}")]
    Config(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), NotifyError>;
}

/// Writes emails to the log instead of sending them.
///
/// Used when no provider is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        info!(to = %email.to, subject = %email.subject, "Email (log only)");
        Ok(())
    }
}

/// Keeps every sent email in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Email>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|e| NotifyError::Transport(format!("mailbox poisoned: {}", e)))?;
        sent.push(email.clone());
        Ok(())
    }
}

/// Rejects every message; counts attempts.
#[derive(Debug, Default)]
pub struct FailingNotifier {
    attempts: Mutex<usize>,
}

impl FailingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().map(|a| *a).unwrap_or(0)
    }
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _email: &Email) -> Result<(), NotifyError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            *attempts += 1;
        }
        Err(NotifyError::Transport("connection refused".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_notifier_records() {
        let notifier = MemoryNotifier::new();
        notifier.send(&Email::new("a@b.org", "Hi", "Body")).await.unwrap();
        assert_eq!(notifier.count(), 1);
        assert_eq!(notifier.sent()[0].subject, "Hi");
    }

    #[tokio::test]
    async fn test_failing_notifier_counts_attempts() {
        let notifier = FailingNotifier::new();
        assert!(notifier.send(&Email::new("a@b.org", "Hi", "Body")).await.is_err());
        assert_eq!(notifier.attempts(), 1);
    }
}
