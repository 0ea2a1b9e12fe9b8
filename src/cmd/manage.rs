/*!
`manage.rs`

Mutating subcommands over the stored command tree and group parameters:

  add <category> <group> --file record.(json|yaml)   insert or replace by name
  remove <category> <group> <name>
  group add|remove <category> <group>
  category add|remove <category>
  param set <category> <group> <key> <value>
  param unset <category> <group> <key>
  param list <category> <group>

A record file holds one command object or an array of them. Every record is
validated by its kind's factory before anything is written.
*/

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use cmdvault::{CommandMetadata, CommandRegistry};

use crate::cmd::format::{Role, StyleOptions, color, emoji, table};
use crate::cmd::shared::{parse_json_or_yaml, print_json};

/* -------------------------------------------------------------------------- */
/* Argument Structs                                                           */
/* -------------------------------------------------------------------------- */

#[derive(Args, Debug)]
pub struct AddArgs {
    pub category: String,
    pub group: String,

    /// Command record(s) to store (JSON or YAML)
    #[arg(short, long, value_name = "PATH")]
    pub file: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    pub category: String,
    pub group: String,
    pub name: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct GroupArgs {
    #[command(subcommand)]
    pub action: GroupAction,
}

#[derive(Subcommand, Debug)]
pub enum GroupAction {
    /// Create an empty group
    Add { category: String, group: String },
    /// Remove an empty group
    Remove { category: String, group: String },
}

#[derive(Args, Debug)]
pub struct CategoryArgs {
    #[command(subcommand)]
    pub action: CategoryAction,
}

#[derive(Subcommand, Debug)]
pub enum CategoryAction {
    /// Create an empty category
    Add { category: String },
    /// Remove a category that has no groups
    Remove { category: String },
}

#[derive(Args, Debug)]
pub struct ParamArgs {
    #[command(subcommand)]
    pub action: ParamAction,

    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum ParamAction {
    /// Store a group parameter
    Set {
        category: String,
        group: String,
        key: String,
        value: String,
    },
    /// Delete a group parameter
    Unset {
        category: String,
        group: String,
        key: String,
    },
    /// Show a group's parameters
    List { category: String, group: String },
}

/* -------------------------------------------------------------------------- */
/* Entry Points                                                               */
/* -------------------------------------------------------------------------- */

pub fn execute_add(args: AddArgs, registry: &CommandRegistry) -> Result<()> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read record file: {}", args.file))?;
    let value = parse_json_or_yaml(&args.file, &raw)?;
    let records = parse_records(registry, &value)?;

    let mut saved = Vec::with_capacity(records.len());
    for meta in records {
        let name = meta.name.clone();
        let replaced = registry
            .save_command(&args.category, &args.group, meta)
            .with_context(|| format!("failed to save '{name}'"))?;
        saved.push((name, replaced));
    }

    if args.json {
        let items: Vec<serde_json::Value> = saved
            .iter()
            .map(|(n, r)| serde_json::json!({"name": n, "replaced": r}))
            .collect();
        print_json(&serde_json::json!({
            "status": "ok",
            "category": args.category,
            "group": args.group,
            "saved": items,
        }));
    } else {
        for (name, replaced) in &saved {
            let verb = if *replaced { "Replaced" } else { "Added" };
            done(&format!("{verb} {}/{}/{name}", args.category, args.group));
        }
    }
    Ok(())
}

pub fn execute_remove(args: RemoveArgs, registry: &CommandRegistry) -> Result<()> {
    let removed = registry.remove_command(&args.category, &args.group, &args.name)?;
    if args.json {
        print_json(&serde_json::json!({
            "status": "ok",
            "removed": registry.serialize_metadata(&removed)?,
        }));
    } else {
        done(&format!("Removed {}/{}/{}", args.category, args.group, args.name));
    }
    Ok(())
}

pub fn execute_group(args: GroupArgs, registry: &CommandRegistry) -> Result<()> {
    match args.action {
        GroupAction::Add { category, group } => {
            if registry.add_empty_group(&category, &group)? {
                done(&format!("Created group {category}/{group}"));
            } else {
                note(&format!("Group {category}/{group} already exists"));
            }
        }
        GroupAction::Remove { category, group } => {
            registry.remove_group(&category, &group)?;
            done(&format!("Removed group {category}/{group}"));
        }
    }
    Ok(())
}

pub fn execute_category(args: CategoryArgs, registry: &CommandRegistry) -> Result<()> {
    match args.action {
        CategoryAction::Add { category } => {
            if registry.add_empty_category(&category)? {
                done(&format!("Created category {category}"));
            } else {
                note(&format!("Category {category} already exists"));
            }
        }
        CategoryAction::Remove { category } => {
            registry.remove_category(&category)?;
            done(&format!("Removed category {category}"));
        }
    }
    Ok(())
}

pub fn execute_param(args: ParamArgs, registry: &CommandRegistry) -> Result<()> {
    match args.action {
        ParamAction::Set {
            category,
            group,
            key,
            value,
        } => {
            registry.save_group_parameter(&category, &group, &key, &value)?;
            done(&format!("Set {key} for {category}/{group}"));
        }
        ParamAction::Unset {
            category,
            group,
            key,
        } => {
            if registry.remove_group_parameter(&category, &group, &key)? {
                done(&format!("Unset {key} for {category}/{group}"));
            } else {
                note(&format!("{key} was not set for {category}/{group}"));
            }
        }
        ParamAction::List { category, group } => {
            let params: std::collections::BTreeMap<String, String> =
                registry.group_parameters(&category, &group).into_iter().collect();
            if args.json {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "category": category,
                    "group": group,
                    "parameters": params,
                }));
                return Ok(());
            }
            let style = StyleOptions::detect();
            if params.is_empty() {
                note(&format!("No parameters for {category}/{group}"));
                return Ok(());
            }
            let rows: Vec<Vec<String>> = params.into_iter().map(|(k, v)| vec![k, v]).collect();
            println!(
                "{} {}",
                emoji("param", &style),
                color(Role::Accent, format!("{category}/{group}"), &style)
            );
            println!("{}", table(&["KEY", "VALUE"], &rows, &style));
        }
    }
    Ok(())
}

/* -------------------------------------------------------------------------- */
/* Helpers                                                                    */
/* -------------------------------------------------------------------------- */

/// One record or an array of records. Fails on the first invalid entry.
fn parse_records(registry: &CommandRegistry, value: &serde_json::Value) -> Result<Vec<CommandMetadata>> {
    let items: Vec<&serde_json::Value> = match value {
        serde_json::Value::Array(arr) => arr.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            registry
                .parse_metadata(raw)
                .with_context(|| format!("invalid command record #{}", i + 1))
        })
        .collect()
}

fn done(msg: &str) {
    let style = StyleOptions::detect();
    println!("{} {}", emoji("success", &style), color(Role::Success, msg, &style));
}

fn note(msg: &str) {
    let style = StyleOptions::detect();
    println!("{} {}", emoji("info", &style), color(Role::Dim, msg, &style));
}
