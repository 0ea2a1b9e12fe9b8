/*!
`get.rs`

Implements `cmdvault get <category> <group> <name>`: the stored record, the
placeholders its templatable fields reference, which of those the group
parameters (plus `--param` overrides) resolve, and, for toggle kinds,
whether an instance is currently running.

With `--render` the record is shown after templating; missing parameters
then fail the command.

JSON Output Shape:
{
  "status": "ok",
  "category": "dev",
  "group": "db",
  "name": "tunnel",
  "command": { ...record... },
  "placeholders": [ { "name": "host", "value": "db.internal" }, { "name": "user", "value": null } ],
  "running": false
}
*/

use anyhow::{Context, Result};
use clap::Args;
use cmdvault::CommandRegistry;

use crate::cmd::format::{Role, StyleOptions, box_header, color, emoji, table};
use crate::cmd::shared::{parse_param_pairs, print_json};

#[derive(Args, Debug)]
pub struct GetArgs {
    pub category: String,
    pub group: String,
    pub name: String,

    /// Show the record with placeholders substituted
    #[arg(long)]
    pub render: bool,

    /// Override a group parameter (KEY=VALUE), repeatable
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute_get(args: GetArgs, registry: &CommandRegistry) -> Result<()> {
    let (cat, group, name) = (args.category.as_str(), args.group.as_str(), args.name.as_str());
    let overrides = parse_param_pairs(&args.params)?;

    let meta = if args.render {
        registry
            .render_command(cat, group, name, &overrides)
            .with_context(|| format!("Failed to render {cat}/{group}/{name}"))?
    } else {
        registry.get_command_metadata(cat, group, name)?
    };
    let record = registry.serialize_metadata(&meta)?;
    let placeholders = registry.placeholder_names(cat, group, name)?;

    let mut params = registry.group_parameters(cat, group);
    params.extend(overrides);
    let resolved: Vec<(String, Option<String>)> = placeholders
        .into_iter()
        .map(|p| {
            let v = params.get(&p).cloned();
            (p, v)
        })
        .collect();
    let running = meta.kind().is_toggle() && registry.is_running_from_config(cat, group, name);

    if args.json {
        let items: Vec<serde_json::Value> = resolved
            .iter()
            .map(|(k, v)| serde_json::json!({"name": k, "value": v}))
            .collect();
        print_json(&serde_json::json!({
            "status": "ok",
            "category": cat,
            "group": group,
            "name": name,
            "command": record,
            "placeholders": items,
            "running": running,
        }));
        return Ok(());
    }

    let style = StyleOptions::detect();
    let mut subtitle = format!("{cat}/{group} • {}", meta.kind());
    if running {
        subtitle.push_str(" • running");
    }
    println!(
        "{}",
        box_header(format!("{} {name}", emoji("info", &style)), Some(subtitle), &style)
    );
    if !meta.description.is_empty() {
        println!("{}", color(Role::Secondary, &meta.description, &style));
    }

    println!("\n{}", color(Role::Accent, "Record:", &style));
    println!(
        "{}",
        serde_json::to_string_pretty(&record).unwrap_or_else(|_| record.to_string())
    );

    println!();
    if resolved.is_empty() {
        println!(
            "{}",
            color(Role::Dim, format!("{} No placeholders", emoji("info", &style)), &style)
        );
        return Ok(());
    }
    let rows: Vec<Vec<String>> = resolved
        .iter()
        .map(|(k, v)| match v {
            Some(v) => vec![k.clone(), v.clone()],
            None => vec![k.clone(), color(Role::Warning, "(unset)", &style)],
        })
        .collect();
    println!("{}", color(Role::Accent, "Placeholders:", &style));
    println!("{}", table(&["NAME", "VALUE"], &rows, &style));
    Ok(())
}
