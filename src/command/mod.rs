/*!
Command model and dispatch contract.

  metadata.rs       CommandKind / CommandMetadata / per-kind specs
  result.rs         CommandResult
  execution.rs      ExecutionHandle (future handed to callers)
  factory.rs        CommandFactory trait + FactoryTable
  clipboard.rs      CLIPBOARD
  terminal.rs       TERMINAL
  terminal_toggle.rs TERMINAL_TOGGLE
  rest.rs           REST
  tunnel.rs         TUNNEL_TOGGLE

Every kind contributes exactly one factory and one templating policy; the
registry only ever talks to the traits declared here.
*/

pub mod clipboard;
pub mod execution;
pub mod factory;
pub mod metadata;
pub mod rest;
pub mod result;
pub mod terminal;
pub mod terminal_toggle;
pub mod tunnel;

pub use execution::ExecutionHandle;
pub use factory::{CommandFactory, FactoryTable};
pub use metadata::{
    AuthType, ClipboardSpec, CommandKind, CommandMetadata, CommandSpec, HttpMethod, RestSpec,
    TerminalSpec, TerminalToggleSpec, TunnelSpec,
};
pub use result::CommandResult;

/// A runtime command bound to one metadata instance.
pub trait Command: Send + Sync {
    fn metadata(&self) -> &CommandMetadata;

    /// Start the command. The handle resolves once the body and all of its
    /// output forwarding have finished.
    fn execute_async(&self) -> ExecutionHandle;

    fn as_toggle(&self) -> Option<&dyn ToggleCommand> {
        None
    }
}

/// A command with independent start and stop actions.
pub trait ToggleCommand: Command {
    /// Registry key derived from the defining fields.
    fn identity(&self) -> &str;

    /// Run the kind's stop action (a stop script for terminals, a plain
    /// cancel otherwise).
    fn toggle_async(&self) -> ExecutionHandle;

    /// Stop the live resource: graceful, grace period, forced.
    fn cancel_async(&self) -> ExecutionHandle;

    /// Start slot claimed AND the external resource is alive.
    fn is_running(&self) -> bool;

    /// Start slot claimed, regardless of the external state.
    fn is_busy(&self) -> bool;
}
