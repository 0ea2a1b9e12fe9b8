//! cmdvault: named, templated commands organized by category and group.
//!
//! Kinds: clipboard copy, terminal line, toggleable terminal line, REST call,
//! toggleable SSH tunnel. Everything is reached through [`CommandRegistry`].
//!
//! Modules:
//!   template   `${name}` engine and per-kind templating policies
//!   command    metadata, results, the Command/Factory contract, one module per kind
//!   executor   shell process runner with live handles
//!   toggle     start/stop guards and the identity-keyed toggle registry
//!   sink       output stream consumers
//!   clipboard  system / in-memory clipboard
//!   config     commands.json / parameters.json persistence
//!   registry   the facade

pub mod clipboard;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod registry;
pub mod sink;
pub mod template;
pub mod toggle;
pub mod utils;

pub use command::{
    Command, CommandKind, CommandMetadata, CommandResult, CommandSpec, ExecutionHandle,
    ToggleCommand,
};
pub use config::{CommandMetadataWrapper, ConfigService};
pub use error::{CommandError, Result};
pub use registry::{CommandRegistry, ExecOptions};
pub use template::{TemplateEngine, TemplateError};
