//! Command metadata value types.
//!
//! The persisted record is a flat JSON object: the common `name`,
//! `description` and `type` fields next to the kind-specific ones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Clipboard,
    Terminal,
    TerminalToggle,
    Rest,
    TunnelToggle,
}

impl CommandKind {
    pub const ALL: [CommandKind; 5] = [
        CommandKind::Clipboard,
        CommandKind::Terminal,
        CommandKind::TerminalToggle,
        CommandKind::Rest,
        CommandKind::TunnelToggle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Clipboard => "CLIPBOARD",
            CommandKind::Terminal => "TERMINAL",
            CommandKind::TerminalToggle => "TERMINAL_TOGGLE",
            CommandKind::Rest => "REST",
            CommandKind::TunnelToggle => "TUNNEL_TOGGLE",
        }
    }

    pub fn is_toggle(&self) -> bool {
        matches!(self, CommandKind::TerminalToggle | CommandKind::TunnelToggle)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact tag match, the same rule the record decoder applies.
impl FromStr for CommandKind {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CommandError::UnsupportedKind(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub spec: CommandSpec,
}

impl CommandMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>, spec: CommandSpec) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            spec,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match &self.spec {
            CommandSpec::Clipboard(_) => CommandKind::Clipboard,
            CommandSpec::Terminal(_) => CommandKind::Terminal,
            CommandSpec::TerminalToggle(_) => CommandKind::TerminalToggle,
            CommandSpec::Rest(_) => CommandKind::Rest,
            CommandSpec::TunnelToggle(_) => CommandKind::TunnelToggle,
        }
    }

    /// Same metadata with a different kind-specific payload.
    pub fn with_spec(&self, spec: CommandSpec) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            spec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandSpec {
    Clipboard(ClipboardSpec),
    Terminal(TerminalSpec),
    TerminalToggle(TerminalToggleSpec),
    Rest(RestSpec),
    TunnelToggle(TunnelSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardSpec {
    #[serde(default)]
    pub text_to_copy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSpec {
    #[serde(default)]
    pub command_text: String,
    /// Environment overlay.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Replaces PATH entirely when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_path_variable: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub copy_output: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalToggleSpec {
    #[serde(flatten)]
    pub terminal: TerminalSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toggle_command_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Only methods that carry a payload send `requestBody`.
    pub fn sends_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestSpec {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Dot path into the JSON response; the whole body is copied when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_clipboard: Option<String>,
    /// parameter name -> dot path, stored into the group parameters on success.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub captures: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthType {
    #[default]
    Password,
    PrivateKey,
}

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const MIN_CONNECT_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_KEEPALIVE_SEC: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelSpec {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub strict_host_key_checking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts_path: Option<String>,
    #[serde(default = "default_bind_host")]
    pub local_bind_host: String,
    #[serde(default)]
    pub local_port: u16,
    #[serde(default)]
    pub remote_host: String,
    #[serde(default)]
    pub remote_port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_keepalive")]
    pub keep_alive_interval_sec: u64,
}

impl Default for TunnelSpec {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_SSH_PORT,
            username: String::new(),
            auth_type: AuthType::Password,
            password: None,
            private_key_path: None,
            passphrase: None,
            strict_host_key_checking: false,
            known_hosts_path: None,
            local_bind_host: DEFAULT_BIND_HOST.to_string(),
            local_port: 0,
            remote_host: String::new(),
            remote_port: 0,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            keep_alive_interval_sec: DEFAULT_KEEPALIVE_SEC,
        }
    }
}

impl TunnelSpec {
    pub fn effective_connect_timeout_ms(&self) -> u64 {
        self.connect_timeout_ms.max(MIN_CONNECT_TIMEOUT_MS)
    }
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}
fn default_bind_host() -> String {
    DEFAULT_BIND_HOST.to_string()
}
fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}
fn default_keepalive() -> u64 {
    DEFAULT_KEEPALIVE_SEC
}
fn is_false(b: &bool) -> bool {
    !*b
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_parse_and_display() {
        for k in CommandKind::ALL {
            assert_eq!(k.as_str().parse::<CommandKind>().unwrap(), k);
            assert_eq!(k.to_string(), k.as_str());
        }
        for tag in ["terminal_toggle", "Terminal", " REST"] {
            assert!(matches!(
                tag.parse::<CommandKind>(),
                Err(CommandError::UnsupportedKind(k)) if k == tag
            ));
        }
        assert!(matches!(
            "SCRIPT".parse::<CommandKind>(),
            Err(CommandError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn terminal_toggle_record_is_flat() {
        let raw = json!({
            "name": "server",
            "description": "dev server",
            "type": "TERMINAL_TOGGLE",
            "commandText": "npm run dev",
            "path": "/srv/app",
            "arguments": {"PORT": "8080"},
            "toggleCommandText": "pkill -f vite"
        });
        let meta: CommandMetadata = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(meta.kind(), CommandKind::TerminalToggle);
        let CommandSpec::TerminalToggle(spec) = &meta.spec else {
            panic!("wrong spec");
        };
        assert_eq!(spec.terminal.command_text, "npm run dev");
        assert_eq!(spec.terminal.arguments.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(spec.toggle_command_text.as_deref(), Some("pkill -f vite"));
        assert_eq!(serde_json::to_value(&meta).unwrap(), raw);
    }

    #[test]
    fn tunnel_defaults_apply() {
        let meta: CommandMetadata = serde_json::from_value(json!({
            "name": "db",
            "type": "TUNNEL_TOGGLE",
            "host": "bastion",
            "username": "ops",
            "localPort": 15432,
            "remoteHost": "db.internal",
            "remotePort": 5432,
            "connectTimeoutMs": 10
        }))
        .unwrap();
        let CommandSpec::TunnelToggle(t) = meta.spec else {
            panic!("wrong spec");
        };
        assert_eq!(t.port, 22);
        assert_eq!(t.auth_type, AuthType::Password);
        assert_eq!(t.local_bind_host, "127.0.0.1");
        assert_eq!(t.keep_alive_interval_sec, 30);
        assert_eq!(t.effective_connect_timeout_ms(), 1_000);
        assert!(!t.strict_host_key_checking);
    }

    #[test]
    fn rest_method_defaults_to_get() {
        let meta: CommandMetadata = serde_json::from_value(json!({
            "name": "who",
            "type": "REST",
            "url": "http://localhost/api"
        }))
        .unwrap();
        let CommandSpec::Rest(r) = meta.spec else {
            panic!("wrong spec");
        };
        assert_eq!(r.method, HttpMethod::Get);
        assert!(!r.method.sends_body());
        assert!(HttpMethod::Patch.sends_body());
    }
}
