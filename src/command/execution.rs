//! `ExecutionHandle`: the future every `execute_async` / `toggle_async` /
//! `cancel_async` call returns immediately.
//!
//! Either already resolved (guard rejections, dispatch errors) or backed by a
//! spawned tokio task. A panicking task resolves to a failed result, so no
//! error crosses the async boundary. Dropping the handle detaches the task.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;
use tracing::warn;

use super::result::CommandResult;

#[derive(Debug)]
pub struct ExecutionHandle {
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Ready(Option<CommandResult>),
    Task(JoinHandle<CommandResult>),
}

impl ExecutionHandle {
    pub fn ready(result: CommandResult) -> Self {
        Self {
            inner: Inner::Ready(Some(result)),
        }
    }

    /// Spawn `body` on the current tokio runtime.
    pub fn spawn<F>(body: F) -> Self
    where
        F: Future<Output = CommandResult> + Send + 'static,
    {
        Self {
            inner: Inner::Task(tokio::spawn(body)),
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.inner {
            Inner::Ready(_) => true,
            Inner::Task(h) => h.is_finished(),
        }
    }
}

impl Future for ExecutionHandle {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            Inner::Ready(slot) => Poll::Ready(slot.take().unwrap_or_else(CommandResult::rejected)),
            Inner::Task(handle) => Pin::new(handle).poll(cx).map(|joined| {
                joined.unwrap_or_else(|e| {
                    warn!("command task ended abnormally: {e}");
                    CommandResult::rejected()
                })
            }),
        }
    }
}
