/*!
TERMINAL_TOGGLE: a long-running shell line with a separate stop action.

Guards (independent CAS flags)
  start   claimed by `execute_async` for the lifetime of the main process
  stop    claimed by `cancel_async` while it terminates the main process
  script  claimed by `toggle_async` while the stop script runs

Stop script reconciliation
  `toggle_async` runs `toggleCommandText` as its own process named
  "<name> (toggle)" with the same environment and working directory. It does
  not require the main process to be running (the script may address
  something the main command left behind). When the script succeeds and the
  main process is still alive afterwards, the main process gets the usual
  grace period and is then terminated. The toggle result is the script's
  result. Without a stop script `toggle_async` is `cancel_async`.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{info, warn};

use super::result::STATUS_CANCELLED;
use super::terminal::validate_terminal;
use super::{
    Command, CommandFactory, CommandKind, CommandMetadata, CommandResult, CommandSpec,
    ExecutionHandle, TerminalToggleSpec, ToggleCommand,
};
use crate::error::{CommandError, Result};
use crate::executor::{ProcessRequest, ProcessSlot, STOP_GRACE, run_process};
use crate::sink::StreamHandler;
use crate::template::{Parameters, TemplateEngine, TemplatingPolicy};
use crate::toggle::{ToggleGuard, ToggleRegistry};
use crate::utils::elapsed_ms;

/// Registry key: working directory plus command line.
pub fn terminal_identity(spec: &TerminalToggleSpec) -> String {
    format!(
        "terminal:{}|{}",
        spec.terminal.path.as_deref().unwrap_or(""),
        spec.terminal.command_text
    )
}

struct ToggleState {
    meta: CommandMetadata,
    spec: TerminalToggleSpec,
    identity: String,
    sink: Arc<dyn StreamHandler>,
    start: Arc<ToggleGuard>,
    stop: Arc<ToggleGuard>,
    script: Arc<ToggleGuard>,
    main: ProcessSlot,
    stop_requested: AtomicBool,
}

pub struct TerminalToggleCommand {
    state: Arc<ToggleState>,
}

impl TerminalToggleCommand {
    pub fn new(meta: CommandMetadata, spec: TerminalToggleSpec, sink: Arc<dyn StreamHandler>) -> Self {
        Self {
            state: Arc::new(ToggleState {
                identity: terminal_identity(&spec),
                meta,
                spec,
                sink,
                start: ToggleGuard::new(),
                stop: ToggleGuard::new(),
                script: ToggleGuard::new(),
                main: ProcessSlot::new(),
                stop_requested: AtomicBool::new(false),
            }),
        }
    }
}

impl Command for TerminalToggleCommand {
    fn metadata(&self) -> &CommandMetadata {
        &self.state.meta
    }

    fn execute_async(&self) -> ExecutionHandle {
        let Some(claim) = self.state.start.try_claim() else {
            info!(command = %self.state.meta.name, "already running");
            return ExecutionHandle::ready(CommandResult::rejected());
        };
        self.state.stop_requested.store(false, Ordering::Release);
        let st = Arc::clone(&self.state);
        ExecutionHandle::spawn(async move {
            let _claim = claim;
            let start = Instant::now();
            let name = st.meta.name.as_str();
            let request = ProcessRequest::for_terminal(&st.spec.terminal, &st.spec.terminal.command_text);
            info!(command = %name, "starting toggle command");
            let result = match run_process(&request, name, &st.sink, Some(&st.main)).await {
                Ok(_) if st.stop_requested.swap(false, Ordering::AcqRel) => {
                    CommandResult::cancelled(start)
                }
                Ok(outcome) => CommandResult::from_exit(outcome.status, start),
                Err(e) => {
                    warn!(command = %name, "failed to launch: {e}");
                    CommandResult::failure(start)
                }
            };
            info!(command = %name, status = result.status, "toggle command finished");
            result
        })
    }

    fn as_toggle(&self) -> Option<&dyn ToggleCommand> {
        Some(self)
    }
}

impl ToggleCommand for TerminalToggleCommand {
    fn identity(&self) -> &str {
        &self.state.identity
    }

    fn toggle_async(&self) -> ExecutionHandle {
        let script = self
            .state
            .spec
            .toggle_command_text
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);
        let Some(script) = script else {
            return self.cancel_async();
        };
        let Some(claim) = self.state.script.try_claim() else {
            return ExecutionHandle::ready(CommandResult::rejected());
        };
        let st = Arc::clone(&self.state);
        ExecutionHandle::spawn(async move {
            let _claim = claim;
            let start = Instant::now();
            let script_name = format!("{} (toggle)", st.meta.name);
            info!(command = %st.meta.name, "running stop script");
            let request = ProcessRequest::for_terminal(&st.spec.terminal, &script);
            let outcome = match run_process(&request, &script_name, &st.sink, None).await {
                Ok(o) => o,
                Err(e) => {
                    warn!(command = %script_name, "failed to launch: {e}");
                    return CommandResult::failure(start);
                }
            };
            if outcome.success()
                && let Some(main) = st.main.get().filter(|h| h.is_alive())
                && let Some(_stop) = st.stop.try_claim()
            {
                st.stop_requested.store(true, Ordering::Release);
                if !main.wait_exit(STOP_GRACE).await {
                    main.stop(STOP_GRACE).await;
                }
            }
            CommandResult::from_exit(outcome.status, start)
        })
    }

    fn cancel_async(&self) -> ExecutionHandle {
        let Some(claim) = self.state.stop.try_claim() else {
            return ExecutionHandle::ready(CommandResult::rejected());
        };
        let Some(main) = self.state.main.get().filter(|h| h.is_alive()) else {
            return ExecutionHandle::ready(CommandResult::rejected());
        };
        self.state.stop_requested.store(true, Ordering::Release);
        let name = self.state.meta.name.clone();
        ExecutionHandle::spawn(async move {
            let _claim = claim;
            let start = Instant::now();
            main.stop(STOP_GRACE).await;
            info!(command = %name, "toggle command stopped");
            CommandResult::new(true, STATUS_CANCELLED, elapsed_ms(start))
        })
    }

    fn is_running(&self) -> bool {
        self.state.start.is_claimed() && self.state.main.is_alive()
    }

    fn is_busy(&self) -> bool {
        self.state.start.is_claimed() || self.state.stop.is_claimed() || self.state.script.is_claimed()
    }
}

/// Renders `commandText` and `toggleCommandText`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalToggleTemplatingPolicy;

impl TemplatingPolicy for TerminalToggleTemplatingPolicy {
    fn kind(&self) -> CommandKind {
        CommandKind::TerminalToggle
    }

    fn templatable_fields<'a>(&self, meta: &'a CommandMetadata) -> Vec<&'a str> {
        match &meta.spec {
            CommandSpec::TerminalToggle(t) => std::iter::once(t.terminal.command_text.as_str())
                .chain(t.toggle_command_text.as_deref())
                .collect(),
            _ => Vec::new(),
        }
    }

    fn render(
        &self,
        meta: &CommandMetadata,
        params: &Parameters,
        engine: &TemplateEngine,
    ) -> Result<CommandMetadata> {
        let CommandSpec::TerminalToggle(t) = &meta.spec else {
            return Err(CommandError::invalid(self.kind(), format!("got {}", meta.kind())));
        };
        let mut rendered = t.clone();
        rendered.terminal.command_text = engine.render(&t.terminal.command_text, params)?;
        rendered.toggle_command_text = engine.render_opt(t.toggle_command_text.as_deref(), params)?;
        Ok(meta.with_spec(CommandSpec::TerminalToggle(rendered)))
    }
}

pub struct TerminalToggleCommandFactory {
    toggles: Arc<ToggleRegistry>,
}

impl TerminalToggleCommandFactory {
    pub fn new(toggles: Arc<ToggleRegistry>) -> Self {
        Self { toggles }
    }
}

impl CommandFactory for TerminalToggleCommandFactory {
    fn kind(&self) -> CommandKind {
        CommandKind::TerminalToggle
    }

    fn templating_policy(&self) -> Arc<dyn TemplatingPolicy> {
        Arc::new(TerminalToggleTemplatingPolicy)
    }

    fn validate(&self, meta: &CommandMetadata) -> Result<()> {
        match &meta.spec {
            CommandSpec::TerminalToggle(t) => validate_terminal(self.kind(), &t.terminal),
            _ => Err(CommandError::invalid(self.kind(), format!("got {}", meta.kind()))),
        }
    }

    fn create_command(
        &self,
        meta: CommandMetadata,
        sink: Arc<dyn StreamHandler>,
    ) -> Result<Arc<dyn Command>> {
        let CommandSpec::TerminalToggle(spec) = &meta.spec else {
            return Err(CommandError::invalid(self.kind(), format!("got {}", meta.kind())));
        };
        let spec = spec.clone();
        let identity = terminal_identity(&spec);
        let cmd: Arc<dyn Command> =
            self.toggles
                .get_or_create(&identity, move || -> Arc<dyn ToggleCommand> {
                    Arc::new(TerminalToggleCommand::new(meta, spec, sink))
                });
        Ok(cmd)
    }
}
