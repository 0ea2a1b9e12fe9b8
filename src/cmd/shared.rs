/*!
Shared helpers for the subcommand modules.

  open_registry          registry rooted at the resolved config directory
  parse_param_pairs      repeated `--param KEY=VALUE` into a map
  load_param_file_into_map  JSON / YAML object merged under CLI values
  print_json             pretty JSON to stdout
  output_error           error in the selected output mode, then bail
*/

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cmdvault::CommandRegistry;
use cmdvault::sink::StreamHandler;

use crate::cmd::format::{Role, StyleOptions, box_header, color, emoji};

/// Build the registry for `config_dir` and make sure its documents exist.
/// Must run inside the tokio runtime (the toggle sweeper is spawned here).
pub fn open_registry(
    config_dir: &Path,
    sink: Option<Arc<dyn StreamHandler>>,
) -> Result<CommandRegistry> {
    let mut builder = CommandRegistry::builder(config_dir);
    if let Some(sink) = sink {
        builder = builder.sink(sink);
    }
    let registry = builder.build();
    registry
        .config()
        .initialize()
        .with_context(|| format!("Failed to initialize config dir: {}", config_dir.display()))?;
    Ok(registry)
}

/// `KEY=VALUE` pairs. Keys are trimmed and must be non-empty; values keep
/// everything after the first `=`.
pub fn parse_param_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for kv in pairs {
        let Some((k, v)) = kv.split_once('=') else {
            anyhow::bail!("invalid --param (expected KEY=VALUE): {kv}");
        };
        let key = k.trim();
        if key.is_empty() {
            anyhow::bail!("invalid --param (empty key): {kv}");
        }
        out.insert(key.to_string(), v.to_string());
    }
    Ok(out)
}

/// Merge a JSON or YAML object into `provided`; keys already present win.
/// Non-string scalars are stored in their JSON text form.
pub fn load_param_file_into_map(path: &str, provided: &mut HashMap<String, String>) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read param file: {path}"))?;
    let value = parse_json_or_yaml(path, &raw)?;

    let obj = value
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("param file root must be an object"))?;

    for (k, v) in obj {
        if provided.contains_key(k) {
            continue;
        }
        let s = match v {
            serde_json::Value::String(sv) => sv.clone(),
            other => other.to_string(),
        };
        provided.insert(k.clone(), s);
    }
    Ok(())
}

/// `.yaml` / `.yml` parse as YAML, everything else as JSON.
pub fn parse_json_or_yaml(path: &str, raw: &str) -> Result<serde_json::Value> {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".yaml") || lower.ends_with(".yml") {
        let yaml_v: serde_yaml::Value =
            serde_yaml::from_str(raw).context("failed to parse YAML file")?;
        serde_json::to_value(yaml_v).context("failed to convert YAML to JSON")
    } else {
        serde_json::from_str(raw).context("failed to parse JSON file")
    }
}

pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Print `msg` as a JSON error object or a red box, then return it as the error.
pub fn output_error(json: bool, title: &str, msg: &str) -> Result<()> {
    if json {
        print_json(&serde_json::json!({"status":"error","error":msg}));
    } else {
        let style = StyleOptions::detect();
        let boxed = box_header(
            format!("{} {title}", emoji("error", &style)),
            Some(color(Role::Error, msg, &style)),
            &style,
        );
        println!("{boxed}");
    }
    anyhow::bail!(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_pairs_split_on_first_equals() {
        let map = parse_param_pairs(&["host=example.com".into(), "q=a=b".into()]).unwrap();
        assert_eq!(map["host"], "example.com");
        assert_eq!(map["q"], "a=b");
    }

    #[test]
    fn param_pairs_reject_malformed() {
        assert!(parse_param_pairs(&["novalue".into()]).is_err());
        assert!(parse_param_pairs(&[" =x".into()]).is_err());
    }

    #[test]
    fn param_file_json_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{ "a": 1, "b": "x" }"#).unwrap();
        let mut provided = HashMap::new();
        provided.insert("b".into(), "override".into());
        load_param_file_into_map(path.to_str().unwrap(), &mut provided).unwrap();
        assert_eq!(provided["a"], "1");
        assert_eq!(provided["b"], "override");
    }

    #[test]
    fn param_file_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.yml");
        std::fs::write(&path, "host: db.internal\nport: 5432\n").unwrap();
        let mut provided = HashMap::new();
        load_param_file_into_map(path.to_str().unwrap(), &mut provided).unwrap();
        assert_eq!(provided["host"], "db.internal");
        assert_eq!(provided["port"], "5432");
    }

    #[test]
    fn param_file_root_must_be_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, "[1,2]").unwrap();
        let mut provided = HashMap::new();
        assert!(load_param_file_into_map(path.to_str().unwrap(), &mut provided).is_err());
    }
}
