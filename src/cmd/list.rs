/*!
`list.rs`

Implements `cmdvault list [categories|groups|commands] [--category C] [--json]`.

JSON Output Shape (commands):
{
  "status": "ok",
  "subject": "commands",
  "count": 2,
  "items": [
    { "category": "dev", "group": "db", "name": "tunnel", "type": "TUNNEL_TOGGLE", "description": "" }
  ]
}

`categories` items are plain strings; `groups` items are
`{ "category": .., "group": .., "commands": N }`.
*/

use anyhow::Result;
use clap::Args;
use cmdvault::{CommandMetadataWrapper, CommandRegistry};

use crate::cmd::format::{Role, StyleOptions, box_header, color, emoji, table};
use crate::cmd::subject::Subject;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// What to list (categories|groups|commands)
    #[arg(value_enum, default_value_t = Subject::Commands)]
    pub subject: Subject,

    /// Only entries below this category
    #[arg(short = 'c', long)]
    pub category: Option<String>,

    /// Output JSON instead of human-readable text
    #[arg(long)]
    pub json: bool,
}

pub fn execute_list(args: ListArgs, registry: &CommandRegistry) -> Result<()> {
    let wrapper = registry.load();
    let rows = collect_rows(&wrapper, args.subject, args.category.as_deref());

    if args.json {
        let items: Vec<serde_json::Value> = rows.iter().map(|r| r.to_json(args.subject)).collect();
        crate::cmd::shared::print_json(&serde_json::json!({
            "status": "ok",
            "subject": args.subject.as_str(),
            "count": items.len(),
            "items": items,
        }));
        return Ok(());
    }

    let style = StyleOptions::detect();
    let title = format!(
        "{} {} ({})",
        emoji("list", &style),
        capitalize(args.subject.as_str()),
        rows.len()
    );
    let subtitle = format!("dir={}", registry.config().dir().display());
    println!("{}", box_header(title, Some(subtitle), &style));

    if rows.is_empty() {
        println!("{}", color(Role::Dim, format!("{} (none)", emoji("info", &style)), &style));
        return Ok(());
    }

    let (headers, cells): (&[&str], Vec<Vec<String>>) = match args.subject {
        Subject::Categories => (
            &["#", "CATEGORY"],
            rows.iter()
                .enumerate()
                .map(|(i, r)| vec![(i + 1).to_string(), r.category.clone()])
                .collect(),
        ),
        Subject::Groups => (
            &["#", "CATEGORY", "GROUP", "COMMANDS"],
            rows.iter()
                .enumerate()
                .map(|(i, r)| {
                    vec![
                        (i + 1).to_string(),
                        r.category.clone(),
                        r.group.clone(),
                        r.count.to_string(),
                    ]
                })
                .collect(),
        ),
        Subject::Commands => (
            &["#", "CATEGORY", "GROUP", "NAME", "TYPE", "DESCRIPTION"],
            rows.iter()
                .enumerate()
                .map(|(i, r)| {
                    vec![
                        (i + 1).to_string(),
                        r.category.clone(),
                        r.group.clone(),
                        r.name.clone(),
                        r.kind.clone(),
                        r.description.replace('\n', " "),
                    ]
                })
                .collect(),
        ),
    };
    println!("{}", table(headers, &cells, &style));

    if matches!(args.subject, Subject::Commands) {
        println!(
            "\n{} {}",
            emoji("info", &style),
            color(
                Role::Dim,
                "Use `cmdvault get <category> <group> <name>` for details",
                &style
            )
        );
    }
    Ok(())
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Row {
    category: String,
    group: String,
    name: String,
    kind: String,
    description: String,
    count: usize,
}

impl Row {
    fn to_json(&self, subject: Subject) -> serde_json::Value {
        match subject {
            Subject::Categories => serde_json::json!(self.category),
            Subject::Groups => serde_json::json!({
                "category": self.category,
                "group": self.group,
                "commands": self.count,
            }),
            Subject::Commands => serde_json::json!({
                "category": self.category,
                "group": self.group,
                "name": self.name,
                "type": self.kind,
                "description": self.description,
            }),
        }
    }
}

fn collect_rows(wrapper: &CommandMetadataWrapper, subject: Subject, only: Option<&str>) -> Vec<Row> {
    let wanted = |c: &str| only.is_none_or(|o| o == c);
    let mut rows = Vec::new();
    for category in wrapper.categories().filter(|c| wanted(c)) {
        if subject == Subject::Categories {
            rows.push(Row {
                category: category.to_string(),
                ..Row::default()
            });
            continue;
        }
        let Some(groups) = wrapper.groups(category) else {
            continue;
        };
        for group in groups {
            let commands = wrapper.commands(category, group).unwrap_or_default();
            if subject == Subject::Groups {
                rows.push(Row {
                    category: category.to_string(),
                    group: group.to_string(),
                    count: commands.len(),
                    ..Row::default()
                });
                continue;
            }
            for meta in commands {
                rows.push(Row {
                    category: category.to_string(),
                    group: group.to_string(),
                    name: meta.name.clone(),
                    kind: meta.kind().as_str().to_string(),
                    description: meta.description.clone(),
                    count: 0,
                });
            }
        }
    }
    rows
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use cmdvault::command::{ClipboardSpec, CommandSpec};
    use cmdvault::CommandMetadata;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(subcommand)]
        cmd: TestSub,
    }

    #[derive(clap::Subcommand, Debug)]
    enum TestSub {
        List(ListArgs),
    }

    fn sample() -> CommandMetadataWrapper {
        let mut w = CommandMetadataWrapper::new();
        let copy = |name: &str| {
            CommandMetadata::new(
                name,
                "",
                CommandSpec::Clipboard(ClipboardSpec {
                    text_to_copy: "x".into(),
                }),
            )
        };
        w.upsert("dev", "db", copy("one"));
        w.upsert("dev", "db", copy("two"));
        w.upsert("ops", "web", copy("three"));
        w.add_group("ops", "empty");
        w
    }

    #[test]
    fn clap_defaults_to_commands() {
        let cli = TestCli::try_parse_from(["t", "list"]).unwrap();
        let TestSub::List(a) = cli.cmd;
        assert_eq!(a.subject, Subject::Commands);
        let cli = TestCli::try_parse_from(["t", "list", "groups", "-c", "dev"]).unwrap();
        let TestSub::List(a) = cli.cmd;
        assert_eq!(a.subject, Subject::Groups);
        assert_eq!(a.category.as_deref(), Some("dev"));
    }

    #[test]
    fn rows_per_subject() {
        let w = sample();
        assert_eq!(collect_rows(&w, Subject::Categories, None).len(), 2);

        let groups = collect_rows(&w, Subject::Groups, Some("ops"));
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().any(|r| r.group == "empty" && r.count == 0));

        let commands = collect_rows(&w, Subject::Commands, None);
        assert_eq!(commands.len(), 3);
        assert!(commands.iter().all(|r| r.kind == "CLIPBOARD"));
    }

    #[test]
    fn capitalizes_titles() {
        assert_eq!(capitalize("groups"), "Groups");
        assert_eq!(capitalize(""), "");
    }
}
