/*!
`exec.rs`

Implements `cmdvault exec <category> <group> <name>`.

Parameters:
  --param KEY=VALUE                 repeatable, overrides group parameters
  --param-file params.(json|yaml)   merged under the CLI values

Output sink for the command's streams:
  --sink console   (default) live lines on the terminal
  --sink file      <config dir>/logs/<name>_<stream>.log
  --sink quiet     discard

Toggle kinds (TERMINAL_TOGGLE, TUNNEL_TOGGLE) run in the foreground until
they end on their own or Ctrl-C cancels them through the stop path. A stop
that arrives while the toggle is still starting finds nothing to stop; it is
retried until the run ends.

JSON Output:
{
  "status": "ok" | "failed",
  "category": "dev",
  "group": "db",
  "name": "tunnel",
  "type": "TUNNEL_TOGGLE",
  "result": { "success": true, "status": 0, "executionTimeMs": 42, "captured": { ... } }
}
*/

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, ValueEnum};
use cmdvault::sink::{FileStreamHandler, NoOpStreamHandler, StreamHandler};
use cmdvault::{CommandRegistry, CommandResult, ExecOptions, ExecutionHandle};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cmd::console::ConsoleStreamHandler;
use crate::cmd::format::{Role, StyleOptions, box_header, color, emoji, table};
use crate::cmd::shared::{
    load_param_file_into_map, open_registry, output_error, parse_param_pairs, print_json,
};

const STOP_RETRY: Duration = Duration::from_millis(250);

#[derive(ValueEnum, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SinkChoice {
    #[default]
    Console,
    File,
    Quiet,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    pub category: String,
    pub group: String,
    pub name: String,

    /// Provide parameter (KEY=VALUE), repeatable
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Load parameters from file (JSON or YAML). CLI --param overrides file entries
    #[arg(long = "param-file", value_name = "PATH")]
    pub param_file: Option<String>,

    /// Where the command's output streams go
    #[arg(long, value_enum, default_value_t = SinkChoice::Console)]
    pub sink: SinkChoice,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute_exec(args: ExecArgs, config_dir: &Path) -> Result<()> {
    let (cat, group, name) = (args.category.as_str(), args.group.as_str(), args.name.as_str());

    let mut overrides = match parse_param_pairs(&args.params) {
        Ok(m) => m,
        Err(e) => return output_error(args.json, "Exec Error", &e.to_string()),
    };
    if let Some(pf) = &args.param_file
        && let Err(e) = load_param_file_into_map(pf, &mut overrides)
    {
        return output_error(args.json, "Exec Error", &format!("{e:#}"));
    }

    let registry = open_registry(config_dir, None)?;
    let style = StyleOptions::detect();
    let sink: Arc<dyn StreamHandler> = match args.sink {
        SinkChoice::Console => Arc::new(ConsoleStreamHandler::new(style.clone(), args.json)),
        SinkChoice::File => Arc::new(FileStreamHandler::new(registry.config().logs_dir())),
        SinkChoice::Quiet => Arc::new(NoOpStreamHandler),
    };
    let opts = ExecOptions {
        overrides,
        sink: Some(sink),
    };

    let kind = match registry.get_command_metadata(cat, group, name) {
        Ok(meta) => meta.kind(),
        Err(e) => return output_error(args.json, "Exec Error", &e.to_string()),
    };
    let mut handle = match registry.try_execute_with(cat, group, name, &opts) {
        Ok(h) => h,
        Err(e) => return output_error(args.json, "Exec Error", &e.to_string()),
    };
    debug!(category = cat, group, name, %kind, "started");

    let result = if kind.is_toggle() {
        if !args.json {
            println!(
                "{} {}",
                emoji("run", &style),
                color(Role::Dim, format!("{name} running; press Ctrl-C to stop"), &style)
            );
        }
        let (tx, mut interrupts) = mpsc::unbounded_channel();
        let relay = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(()).is_err() {
                    break;
                }
            }
        });
        let result = wait_foreground(&mut handle, &mut interrupts, || {
            stop(&registry, cat, group, name, &opts)
        })
        .await;
        relay.abort();
        result
    } else {
        handle.await
    };

    report(&args, kind.as_str(), &result, &style);
    if !result.success {
        anyhow::bail!("{name} failed with status {}", result.status);
    }
    Ok(())
}

/// Await a foreground toggle run. Every interrupt calls `stop`; while the last
/// stop was refused the call repeats every `STOP_RETRY` until the run ends.
async fn wait_foreground<S, F>(
    handle: &mut ExecutionHandle,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
    mut stop: S,
) -> CommandResult
where
    S: FnMut() -> F,
    F: Future<Output = bool>,
{
    let mut pending = false;
    loop {
        tokio::select! {
            r = &mut *handle => return r,
            Some(()) = interrupts.recv() => {
                info!("interrupt received; stopping");
                pending = !stop().await;
            }
            _ = tokio::time::sleep(STOP_RETRY), if pending => {
                debug!("retrying stop");
                pending = !stop().await;
            }
        }
    }
}

/// True once the toggle acknowledged the stop.
async fn stop(registry: &CommandRegistry, cat: &str, group: &str, name: &str, opts: &ExecOptions) -> bool {
    match registry.try_cancel_with(cat, group, name, opts) {
        Ok(h) => {
            let stopped = h.await;
            debug!(command = name, success = stopped.success, "stop finished");
            stopped.success
        }
        Err(e) => {
            warn!(command = name, "stop failed: {e}");
            false
        }
    }
}

fn report(args: &ExecArgs, kind: &str, result: &CommandResult, style: &StyleOptions) {
    if args.json {
        print_json(&serde_json::json!({
            "status": if result.success { "ok" } else { "failed" },
            "category": args.category,
            "group": args.group,
            "name": args.name,
            "type": kind,
            "result": result,
        }));
        return;
    }

    let (tag, title) = if result.success {
        ("success", "Exec Success")
    } else {
        ("error", "Exec Failed")
    };
    let header = box_header(
        format!("{} {title} ({})", emoji(tag, style), args.name),
        Some(format!(
            "status={} • {} ms",
            result.status, result.execution_time_ms
        )),
        style,
    );
    println!("{header}");

    if !result.captured.is_empty() {
        let rows: Vec<Vec<String>> = result
            .captured
            .iter()
            .map(|(k, v)| vec![k.clone(), v.clone()])
            .collect();
        println!(
            "{}",
            color(Role::Accent, "Captured (saved to group parameters):", style)
        );
        println!("{}", table(&["NAME", "VALUE"], &rows, style));
    }
}
