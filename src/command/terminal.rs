//! TERMINAL: run one shell line to completion.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::{
    Command, CommandFactory, CommandKind, CommandMetadata, CommandResult, CommandSpec,
    ExecutionHandle, TerminalSpec,
};
use crate::clipboard::ClipboardService;
use crate::error::{CommandError, Result};
use crate::executor::{ProcessRequest, run_process};
use crate::sink::StreamHandler;
use crate::template::{Parameters, TemplateEngine, TemplatingPolicy};

pub struct TerminalCommand {
    meta: CommandMetadata,
    spec: TerminalSpec,
    sink: Arc<dyn StreamHandler>,
    clipboard: Arc<dyn ClipboardService>,
}

impl Command for TerminalCommand {
    fn metadata(&self) -> &CommandMetadata {
        &self.meta
    }

    fn execute_async(&self) -> ExecutionHandle {
        let name = self.meta.name.clone();
        let spec = self.spec.clone();
        let sink = Arc::clone(&self.sink);
        let clipboard = Arc::clone(&self.clipboard);
        ExecutionHandle::spawn(async move {
            let start = Instant::now();
            let request = ProcessRequest::for_terminal(&spec, &spec.command_text);
            let outcome = match run_process(&request, &name, &sink, None).await {
                Ok(o) => o,
                Err(e) => {
                    warn!(command = %name, "failed to launch: {e}");
                    return CommandResult::failure(start);
                }
            };
            if spec.copy_output
                && outcome.success()
                && let Some(line) = &outcome.extractable
            {
                match clipboard.set_text(line).await {
                    Ok(()) => debug!(command = %name, "output copied to clipboard"),
                    Err(e) => warn!(command = %name, "copying output failed: {e}"),
                }
            }
            CommandResult::from_exit(outcome.status, start)
        })
    }
}

/// Renders `commandText`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalTemplatingPolicy;

impl TemplatingPolicy for TerminalTemplatingPolicy {
    fn kind(&self) -> CommandKind {
        CommandKind::Terminal
    }

    fn templatable_fields<'a>(&self, meta: &'a CommandMetadata) -> Vec<&'a str> {
        match &meta.spec {
            CommandSpec::Terminal(t) => vec![t.command_text.as_str()],
            _ => Vec::new(),
        }
    }

    fn render(
        &self,
        meta: &CommandMetadata,
        params: &Parameters,
        engine: &TemplateEngine,
    ) -> Result<CommandMetadata> {
        let CommandSpec::Terminal(t) = &meta.spec else {
            return Err(CommandError::invalid(self.kind(), format!("got {}", meta.kind())));
        };
        let rendered = TerminalSpec {
            command_text: engine.render(&t.command_text, params)?,
            ..t.clone()
        };
        Ok(meta.with_spec(CommandSpec::Terminal(rendered)))
    }
}

pub(crate) fn validate_terminal(kind: CommandKind, spec: &TerminalSpec) -> Result<()> {
    if spec.command_text.trim().is_empty() {
        return Err(CommandError::invalid(kind, "commandText must not be empty"));
    }
    Ok(())
}

pub struct TerminalCommandFactory {
    clipboard: Arc<dyn ClipboardService>,
}

impl TerminalCommandFactory {
    pub fn new(clipboard: Arc<dyn ClipboardService>) -> Self {
        Self { clipboard }
    }
}

impl CommandFactory for TerminalCommandFactory {
    fn kind(&self) -> CommandKind {
        CommandKind::Terminal
    }

    fn templating_policy(&self) -> Arc<dyn TemplatingPolicy> {
        Arc::new(TerminalTemplatingPolicy)
    }

    fn validate(&self, meta: &CommandMetadata) -> Result<()> {
        match &meta.spec {
            CommandSpec::Terminal(t) => validate_terminal(self.kind(), t),
            _ => Err(CommandError::invalid(self.kind(), format!("got {}", meta.kind()))),
        }
    }

    fn create_command(
        &self,
        meta: CommandMetadata,
        sink: Arc<dyn StreamHandler>,
    ) -> Result<Arc<dyn Command>> {
        let CommandSpec::Terminal(spec) = &meta.spec else {
            return Err(CommandError::invalid(self.kind(), format!("got {}", meta.kind())));
        };
        Ok(Arc::new(TerminalCommand {
            spec: spec.clone(),
            sink,
            clipboard: Arc::clone(&self.clipboard),
            meta,
        }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::clipboard::MemoryClipboard;
    use crate::sink::{MemoryStreamHandler, StreamKind};

    fn meta(line: &str, copy_output: bool) -> CommandMetadata {
        CommandMetadata::new(
            "hello",
            "",
            CommandSpec::Terminal(TerminalSpec {
                command_text: line.into(),
                copy_output,
                ..TerminalSpec::default()
            }),
        )
    }

    #[tokio::test]
    async fn echo_hello_world() {
        let mem = MemoryStreamHandler::new();
        let f = TerminalCommandFactory::new(Arc::new(MemoryClipboard::new()));
        let cmd = f
            .create_command(meta("echo Hello, world!", false), Arc::new(mem.clone()))
            .unwrap();
        let r = cmd.execute_async().await;
        assert!(r.success);
        assert_eq!(r.status, 0);
        assert_eq!(mem.lines(StreamKind::Stdout), vec!["Hello, world!"]);
    }

    #[tokio::test]
    async fn exit_code_is_reported() {
        let f = TerminalCommandFactory::new(Arc::new(MemoryClipboard::new()));
        let cmd = f
            .create_command(meta("exit 7", false), Arc::new(MemoryStreamHandler::new()))
            .unwrap();
        let r = cmd.execute_async().await;
        assert!(!r.success);
        assert_eq!(r.status, 7);
    }

    #[tokio::test]
    async fn copy_output_puts_single_line_on_clipboard() {
        let cb = MemoryClipboard::new();
        let f = TerminalCommandFactory::new(Arc::new(cb.clone()));
        let cmd = f
            .create_command(meta("echo '  token-123  '", true), Arc::new(MemoryStreamHandler::new()))
            .unwrap();
        assert!(cmd.execute_async().await.success);
        assert_eq!(cb.get_text().as_deref(), Some("token-123"));
    }

    #[test]
    fn policy_renders_command_text_only() {
        let mut m = meta("echo ${who}", false);
        if let CommandSpec::Terminal(t) = &mut m.spec {
            t.path = Some("${not_rendered}".into());
        }
        let params = Parameters::from([("who".to_string(), "me".to_string())]);
        let out = TerminalTemplatingPolicy
            .render(&m, &params, &TemplateEngine::new())
            .unwrap();
        let CommandSpec::Terminal(t) = out.spec else {
            panic!("wrong spec");
        };
        assert_eq!(t.command_text, "echo me");
        assert_eq!(t.path.as_deref(), Some("${not_rendered}"));
        assert!(TerminalCommandFactory::new(Arc::new(MemoryClipboard::new()))
            .validate(&meta("  ", false))
            .is_err());
    }
}
