//! CLIPBOARD: copy a fixed text.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::{
    Command, CommandFactory, CommandKind, CommandMetadata, CommandResult, CommandSpec,
    ExecutionHandle,
};
use crate::clipboard::ClipboardService;
use crate::error::{CommandError, Result};
use crate::sink::StreamHandler;
use crate::template::{NoOpTemplatingPolicy, TemplatingPolicy};

pub struct ClipboardCommand {
    meta: CommandMetadata,
    text: String,
    clipboard: Arc<dyn ClipboardService>,
}

impl Command for ClipboardCommand {
    fn metadata(&self) -> &CommandMetadata {
        &self.meta
    }

    fn execute_async(&self) -> ExecutionHandle {
        let text = self.text.clone();
        let name = self.meta.name.clone();
        let clipboard = Arc::clone(&self.clipboard);
        ExecutionHandle::spawn(async move {
            let start = Instant::now();
            match clipboard.set_text(&text).await {
                Ok(()) => {
                    info!(command = %name, chars = text.chars().count(), "copied to clipboard");
                    CommandResult::ok(start)
                }
                Err(e) => {
                    warn!(command = %name, "clipboard copy failed: {e}");
                    CommandResult::failure(start)
                }
            }
        })
    }
}

pub struct ClipboardCommandFactory {
    clipboard: Arc<dyn ClipboardService>,
}

impl ClipboardCommandFactory {
    pub fn new(clipboard: Arc<dyn ClipboardService>) -> Self {
        Self { clipboard }
    }
}

impl CommandFactory for ClipboardCommandFactory {
    fn kind(&self) -> CommandKind {
        CommandKind::Clipboard
    }

    fn templating_policy(&self) -> Arc<dyn TemplatingPolicy> {
        Arc::new(NoOpTemplatingPolicy(CommandKind::Clipboard))
    }

    fn create_command(
        &self,
        meta: CommandMetadata,
        _sink: Arc<dyn StreamHandler>,
    ) -> Result<Arc<dyn Command>> {
        let CommandSpec::Clipboard(spec) = &meta.spec else {
            return Err(CommandError::invalid(self.kind(), format!("got {}", meta.kind())));
        };
        Ok(Arc::new(ClipboardCommand {
            text: spec.text_to_copy.clone(),
            clipboard: Arc::clone(&self.clipboard),
            meta,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::{BrokenClipboard, MemoryClipboard};
    use crate::command::ClipboardSpec;
    use crate::sink::NoOpStreamHandler;

    fn meta(text: &str) -> CommandMetadata {
        CommandMetadata::new(
            "copy",
            "copy something",
            CommandSpec::Clipboard(ClipboardSpec {
                text_to_copy: text.into(),
            }),
        )
    }

    #[tokio::test]
    async fn copies_text() {
        let cb = MemoryClipboard::new();
        let f = ClipboardCommandFactory::new(Arc::new(cb.clone()));
        let cmd = f.create_command(meta("secret"), Arc::new(NoOpStreamHandler)).unwrap();
        let r = cmd.execute_async().await;
        assert!(r.success);
        assert_eq!(r.status, 0);
        assert_eq!(cb.get_text().as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn clipboard_failure_is_a_failed_result() {
        let f = ClipboardCommandFactory::new(Arc::new(BrokenClipboard));
        let cmd = f.create_command(meta("x"), Arc::new(NoOpStreamHandler)).unwrap();
        let r = cmd.execute_async().await;
        assert!(!r.success);
        assert_eq!(r.status, -1);
    }
}
