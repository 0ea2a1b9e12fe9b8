//! Clipboard access.
//!
//! `SystemClipboard` wraps `arboard` (a fresh handle per write, on the
//! blocking pool). `MemoryClipboard` keeps the last value for headless runs
//! and tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait ClipboardService: Send + Sync {
    async fn set_text(&self, text: &str) -> Result<(), ClipboardError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClipboard;

#[async_trait]
impl ClipboardService for SystemClipboard {
    async fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let mut cb = arboard::Clipboard::new()
                .map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
            cb.set_text(text)
                .map_err(|e| ClipboardError::Unavailable(e.to_string()))
        })
        .await
        .map_err(|e| ClipboardError::Task(e.to_string()))?
    }
}

/// Shared in-memory clipboard; clones see the same content.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    content: Arc<Mutex<Option<String>>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_text(&self) -> Option<String> {
        self.content.lock().clone()
    }
}

#[async_trait]
impl ClipboardService for MemoryClipboard {
    async fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        *self.content.lock() = Some(text.to_string());
        Ok(())
    }
}

/// A clipboard that always fails; exercises the "never change the result" path.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BrokenClipboard;

#[cfg(test)]
#[async_trait]
impl ClipboardService for BrokenClipboard {
    async fn set_text(&self, _text: &str) -> Result<(), ClipboardError> {
        Err(ClipboardError::Unavailable("no display".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_clipboard_is_shared_between_clones() {
        let a = MemoryClipboard::new();
        let b = a.clone();
        assert_eq!(a.get_text(), None);
        b.set_text("copied").await.unwrap();
        assert_eq!(a.get_text().as_deref(), Some("copied"));
    }
}
