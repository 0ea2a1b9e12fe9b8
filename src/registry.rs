/*!
Command registry facade.

  execute_from_config(category, group, name)
    load metadata -> group parameters (+ caller overrides) -> templating policy
    -> factory -> command (shared instance for busy toggles) -> execute_async

Errors before execution starts (unknown command, unsupported kind, missing
template parameters) are returned by the `try_*` variants and become an
immediate failed result in the plain variants. Successful results carrying
captured values are merged into the group parameters before they resolve.

Mutations (commands, groups, categories, parameters) go straight to the
config service.
*/

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::clipboard::{ClipboardService, SystemClipboard};
use crate::command::clipboard::ClipboardCommandFactory;
use crate::command::rest::RestCommandFactory;
use crate::command::terminal::TerminalCommandFactory;
use crate::command::terminal_toggle::TerminalToggleCommandFactory;
use crate::command::tunnel::TunnelToggleCommandFactory;
use crate::command::{
    Command, CommandFactory, CommandMetadata, CommandResult, ExecutionHandle, FactoryTable,
    ToggleCommand,
};
use crate::config::{CommandMetadataWrapper, ConfigService, MetadataCodec, merged_parameters};
use crate::error::{CommandError, Result};
use crate::sink::{StreamHandler, TracingStreamHandler};
use crate::template::{Parameters, PolicyResolver, TemplateEngine};
use crate::toggle::{SWEEP_INTERVAL, ToggleRegistry};

/// Per-call execution options.
#[derive(Clone, Default)]
pub struct ExecOptions {
    /// Applied on top of the stored group parameters.
    pub overrides: Parameters,
    /// Sink for this call; the registry default otherwise.
    pub sink: Option<Arc<dyn StreamHandler>>,
}

pub struct RegistryBuilder {
    config_dir: PathBuf,
    clipboard: Arc<dyn ClipboardService>,
    sink: Arc<dyn StreamHandler>,
    sweep_interval: Option<Duration>,
    builtins: bool,
    extra: Vec<Arc<dyn CommandFactory>>,
}

impl RegistryBuilder {
    pub fn clipboard(mut self, clipboard: Arc<dyn ClipboardService>) -> Self {
        self.clipboard = clipboard;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn StreamHandler>) -> Self {
        self.sink = sink;
        self
    }

    /// `None` disables the background sweep.
    pub fn sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Skip the five built-in factories.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    /// Register (or replace) the factory for its kind.
    pub fn factory(mut self, factory: Arc<dyn CommandFactory>) -> Self {
        self.extra.push(factory);
        self
    }

    pub fn build(self) -> CommandRegistry {
        let toggles = match self.sweep_interval {
            Some(every) => ToggleRegistry::with_sweeper(every),
            None => ToggleRegistry::new(),
        };
        let mut table = FactoryTable::new();
        if self.builtins {
            let cb = &self.clipboard;
            table.register(Arc::new(ClipboardCommandFactory::new(Arc::clone(cb))));
            table.register(Arc::new(TerminalCommandFactory::new(Arc::clone(cb))));
            table.register(Arc::new(TerminalToggleCommandFactory::new(Arc::clone(&toggles))));
            table.register(Arc::new(RestCommandFactory::new(Arc::clone(cb))));
            table.register(Arc::new(TunnelToggleCommandFactory::new(Arc::clone(&toggles))));
        }
        for f in self.extra {
            table.register(f);
        }
        let mut policies = PolicyResolver::new();
        for kind in table.kinds() {
            if let Ok(f) = table.get(kind) {
                policies.register(f.templating_policy());
            }
        }
        let factories = Arc::new(table);
        let codec: Arc<dyn MetadataCodec> = factories.clone();
        CommandRegistry {
            config: Arc::new(ConfigService::new(self.config_dir, codec)),
            factories,
            policies,
            engine: TemplateEngine::new(),
            toggles,
            sink: self.sink,
        }
    }
}

pub struct CommandRegistry {
    factories: Arc<FactoryTable>,
    policies: PolicyResolver,
    engine: TemplateEngine,
    config: Arc<ConfigService>,
    toggles: Arc<ToggleRegistry>,
    sink: Arc<dyn StreamHandler>,
}

impl CommandRegistry {
    /// Builder with the system clipboard, a tracing sink and the 30 s sweep.
    pub fn builder(config_dir: impl Into<PathBuf>) -> RegistryBuilder {
        RegistryBuilder {
            config_dir: config_dir.into(),
            clipboard: Arc::new(SystemClipboard),
            sink: Arc::new(TracingStreamHandler),
            sweep_interval: Some(SWEEP_INTERVAL),
            builtins: true,
            extra: Vec::new(),
        }
    }

    pub fn config(&self) -> &ConfigService {
        &self.config
    }

    pub fn toggles(&self) -> &Arc<ToggleRegistry> {
        &self.toggles
    }

    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    /* ---- metadata ---- */

    pub fn parse_metadata(&self, raw: &Value) -> Result<CommandMetadata> {
        self.factories.parse_record(raw)
    }

    pub fn serialize_metadata(&self, meta: &CommandMetadata) -> Result<Value> {
        self.factories.serialize_record(meta)
    }

    pub fn load(&self) -> CommandMetadataWrapper {
        self.config.load()
    }

    pub fn reload(&self) -> CommandMetadataWrapper {
        self.config.reload()
    }

    pub fn get_command_metadata(&self, category: &str, group: &str, name: &str) -> Result<CommandMetadata> {
        self.config
            .load()
            .find(category, group, name)
            .cloned()
            .ok_or_else(|| CommandError::NotFound {
                category: category.to_string(),
                group: group.to_string(),
                name: name.to_string(),
            })
    }

    /// Placeholder names the command's templatable fields reference.
    pub fn placeholder_names(&self, category: &str, group: &str, name: &str) -> Result<BTreeSet<String>> {
        let meta = self.get_command_metadata(category, group, name)?;
        self.factories.get(meta.kind())?;
        Ok(self
            .policies
            .resolve(meta.kind())
            .placeholder_names(&meta, &self.engine))
    }

    /// Stored metadata rendered with the group parameters and `overrides`.
    pub fn render_command(
        &self,
        category: &str,
        group: &str,
        name: &str,
        overrides: &Parameters,
    ) -> Result<CommandMetadata> {
        let meta = self.get_command_metadata(category, group, name)?;
        self.factories.get(meta.kind())?;
        let params = merged_parameters(self.config.group_parameters(category, group), overrides);
        self.policies.render(&meta, &params, &self.engine)
    }

    /* ---- commands ---- */

    pub fn create_command(
        &self,
        meta: CommandMetadata,
        sink: Option<Arc<dyn StreamHandler>>,
    ) -> Result<Arc<dyn Command>> {
        let factory = self.factories.get(meta.kind())?;
        factory.validate(&meta)?;
        factory.create_command(meta, sink.unwrap_or_else(|| Arc::clone(&self.sink)))
    }

    fn resolve(&self, category: &str, group: &str, name: &str, opts: &ExecOptions) -> Result<Arc<dyn Command>> {
        let meta = self.render_command(category, group, name, &opts.overrides)?;
        debug!(category, group, name, kind = %meta.kind(), "resolved command");
        self.create_command(meta, opts.sink.clone())
    }

    pub fn try_execute_from_config(&self, category: &str, group: &str, name: &str) -> Result<ExecutionHandle> {
        self.try_execute_with(category, group, name, &ExecOptions::default())
    }

    pub fn try_execute_with(
        &self,
        category: &str,
        group: &str,
        name: &str,
        opts: &ExecOptions,
    ) -> Result<ExecutionHandle> {
        let cmd = self.resolve(category, group, name, opts)?;
        let handle = cmd.execute_async();
        let config = Arc::clone(&self.config);
        let (category, group) = (category.to_string(), group.to_string());
        Ok(ExecutionHandle::spawn(async move {
            let result = handle.await;
            if result.success
                && !result.captured.is_empty()
                && let Err(e) = config.merge_group_parameters(&category, &group, &result.captured)
            {
                warn!(category = %category, group = %group, "storing captured parameters failed: {e}");
            }
            result
        }))
    }

    pub fn execute_from_config(&self, category: &str, group: &str, name: &str) -> ExecutionHandle {
        self.execute_with(category, group, name, &ExecOptions::default())
    }

    pub fn execute_with(&self, category: &str, group: &str, name: &str, opts: &ExecOptions) -> ExecutionHandle {
        self.try_execute_with(category, group, name, opts)
            .unwrap_or_else(|e| rejected(category, group, name, e))
    }

    /* ---- toggles ---- */

    fn with_toggle(
        &self,
        category: &str,
        group: &str,
        name: &str,
        opts: &ExecOptions,
        f: impl FnOnce(&dyn ToggleCommand) -> ExecutionHandle,
    ) -> Result<ExecutionHandle> {
        let cmd = self.resolve(category, group, name, opts)?;
        let toggle = cmd
            .as_toggle()
            .ok_or_else(|| CommandError::NotToggleable(name.to_string()))?;
        Ok(f(toggle))
    }

    pub fn try_toggle_from_config(&self, category: &str, group: &str, name: &str) -> Result<ExecutionHandle> {
        self.with_toggle(category, group, name, &ExecOptions::default(), |t| t.toggle_async())
    }

    pub fn toggle_from_config(&self, category: &str, group: &str, name: &str) -> ExecutionHandle {
        self.try_toggle_from_config(category, group, name)
            .unwrap_or_else(|e| rejected(category, group, name, e))
    }

    pub fn try_cancel_from_config(&self, category: &str, group: &str, name: &str) -> Result<ExecutionHandle> {
        self.try_cancel_with(category, group, name, &ExecOptions::default())
    }

    pub fn try_cancel_with(
        &self,
        category: &str,
        group: &str,
        name: &str,
        opts: &ExecOptions,
    ) -> Result<ExecutionHandle> {
        self.with_toggle(category, group, name, opts, |t| t.cancel_async())
    }

    pub fn cancel_from_config(&self, category: &str, group: &str, name: &str) -> ExecutionHandle {
        self.try_cancel_from_config(category, group, name)
            .unwrap_or_else(|e| rejected(category, group, name, e))
    }

    /// False for unknown, non-toggle or idle commands.
    pub fn is_running_from_config(&self, category: &str, group: &str, name: &str) -> bool {
        self.resolve(category, group, name, &ExecOptions::default())
            .ok()
            .is_some_and(|cmd| cmd.as_toggle().is_some_and(|t| t.is_running()))
    }

    /* ---- persistence ---- */

    /// Insert or replace by name. True when an existing command was replaced.
    pub fn save_command(&self, category: &str, group: &str, meta: CommandMetadata) -> Result<bool> {
        let factory = self.factories.get(meta.kind())?;
        factory.validate(&meta)?;
        self.config.update(|w| Ok(w.upsert(category, group, meta)))
    }

    pub fn remove_command(&self, category: &str, group: &str, name: &str) -> Result<CommandMetadata> {
        self.config.update(|w| w.remove_command(category, group, name))
    }

    pub fn add_empty_group(&self, category: &str, group: &str) -> Result<bool> {
        self.config.update(|w| Ok(w.add_group(category, group)))
    }

    pub fn remove_group(&self, category: &str, group: &str) -> Result<()> {
        self.config.update(|w| w.remove_group(category, group))
    }

    pub fn add_empty_category(&self, category: &str) -> Result<bool> {
        self.config.update(|w| Ok(w.add_category(category)))
    }

    pub fn remove_category(&self, category: &str) -> Result<()> {
        self.config.update(|w| w.remove_category(category))
    }

    pub fn group_parameters(&self, category: &str, group: &str) -> Parameters {
        self.config.group_parameters(category, group)
    }

    pub fn save_group_parameter(&self, category: &str, group: &str, key: &str, value: &str) -> Result<()> {
        self.config.save_group_parameter(category, group, key, value)
    }

    pub fn remove_group_parameter(&self, category: &str, group: &str, key: &str) -> Result<bool> {
        self.config.remove_group_parameter(category, group, key)
    }
}

fn rejected(category: &str, group: &str, name: &str, err: CommandError) -> ExecutionHandle {
    warn!(category, group, name, "command not started: {err}");
    ExecutionHandle::ready(CommandResult::rejected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::MemoryClipboard;
    use crate::command::rest::stub;
    use crate::command::{
        ClipboardSpec, CommandKind, CommandSpec, RestSpec, TerminalSpec, TerminalToggleSpec,
    };
    use crate::sink::{MemoryStreamHandler, StreamKind};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        registry: CommandRegistry,
        clipboard: MemoryClipboard,
        sink: MemoryStreamHandler,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clipboard = MemoryClipboard::new();
        let sink = MemoryStreamHandler::new();
        let registry = CommandRegistry::builder(dir.path())
            .clipboard(Arc::new(clipboard.clone()))
            .sink(Arc::new(sink.clone()))
            .sweep_interval(None)
            .build();
        Fixture {
            _dir: dir,
            registry,
            clipboard,
            sink,
        }
    }

    fn terminal(name: &str, line: &str) -> CommandMetadata {
        CommandMetadata::new(
            name,
            "",
            CommandSpec::Terminal(TerminalSpec {
                command_text: line.into(),
                ..TerminalSpec::default()
            }),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn templated_terminal_uses_group_parameters() {
        let fx = fixture();
        let reg = &fx.registry;
        reg.save_command("Dev", "Shell", terminal("greet", "echo Hello, ${who}!"))
            .unwrap();
        reg.save_group_parameter("Dev", "Shell", "who", "world").unwrap();

        let r = reg.execute_from_config("Dev", "Shell", "greet").await;
        assert!(r.success);
        assert_eq!(fx.sink.lines(StreamKind::Stdout), vec!["Hello, world!"]);

        let opts = ExecOptions {
            overrides: Parameters::from([("who".to_string(), "there".to_string())]),
            sink: None,
        };
        assert!(reg.execute_with("Dev", "Shell", "greet", &opts).await.success);
        assert_eq!(fx.sink.lines(StreamKind::Stdout)[1], "Hello, there!");
    }

    #[test]
    fn render_overrides_win_over_group_parameters() {
        let fx = fixture();
        let reg = &fx.registry;
        reg.save_command("Dev", "Shell", terminal("greet", "echo ${who} at ${place}"))
            .unwrap();
        reg.save_group_parameter("Dev", "Shell", "who", "world").unwrap();
        reg.save_group_parameter("Dev", "Shell", "place", "home").unwrap();

        let overrides = Parameters::from([("who".to_string(), "there".to_string())]);
        let rendered = reg.render_command("Dev", "Shell", "greet", &overrides).unwrap();
        let CommandSpec::Terminal(t) = rendered.spec else {
            panic!("wrong spec");
        };
        assert_eq!(t.command_text, "echo there at home");
        assert_eq!(reg.group_parameters("Dev", "Shell")["who"], "world");
    }

    #[tokio::test]
    async fn dispatch_errors_surface_locally() {
        let fx = fixture();
        let reg = &fx.registry;
        reg.save_command("Dev", "Shell", terminal("t", "echo ${missing}")).unwrap();

        let err = reg.try_execute_from_config("Dev", "Shell", "t").unwrap_err();
        assert!(matches!(err, CommandError::Template(_)));
        assert!(err.to_string().contains("missing"));

        let r = reg.execute_from_config("Dev", "Shell", "t").await;
        assert_eq!((r.success, r.status), (false, -1));

        assert!(matches!(
            reg.try_execute_from_config("Dev", "Shell", "nope"),
            Err(CommandError::NotFound { .. })
        ));
        assert!(matches!(
            reg.try_cancel_from_config("Dev", "Shell", "t"),
            Err(CommandError::Template(_))
        ));
        assert_eq!(
            reg.placeholder_names("Dev", "Shell", "t").unwrap(),
            BTreeSet::from(["missing".to_string()])
        );
    }

    #[tokio::test]
    async fn non_toggle_cannot_be_cancelled() {
        let fx = fixture();
        fx.registry
            .save_command("Dev", "Shell", terminal("t", "true"))
            .unwrap();
        assert!(matches!(
            fx.registry.try_cancel_from_config("Dev", "Shell", "t"),
            Err(CommandError::NotToggleable(_))
        ));
        assert!(!fx.registry.is_running_from_config("Dev", "Shell", "t"));
    }

    #[test]
    fn unsupported_kind_is_local_to_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let reg = CommandRegistry::builder(dir.path())
            .without_builtins()
            .factory(Arc::new(ClipboardCommandFactory::new(Arc::new(MemoryClipboard::new()))))
            .sweep_interval(None)
            .build();
        let err = reg.save_command("C", "G", terminal("t", "ls")).unwrap_err();
        assert!(matches!(err, CommandError::UnsupportedKind(k) if k == "TERMINAL"));
        let clip = CommandMetadata::new(
            "c",
            "",
            CommandSpec::Clipboard(ClipboardSpec {
                text_to_copy: "x".into(),
            }),
        );
        assert!(!reg.save_command("C", "G", clip.clone()).unwrap());
        assert_eq!(reg.serialize_metadata(&clip).unwrap()["type"], "CLIPBOARD");
        assert_eq!(reg.get_command_metadata("C", "G", "c").unwrap(), clip);
    }

    #[tokio::test]
    async fn rest_captures_are_written_back() {
        let (base, _server) =
            stub::serve(200, r#"{"data":{"user":{"email":"a@b.com","id":42}}}"#, 1).await;
        let fx = fixture();
        let reg = &fx.registry;
        reg.save_group_parameter("Api", "Users", "base", &base).unwrap();
        reg.save_command(
            "Api",
            "Users",
            CommandMetadata::new(
                "me",
                "",
                CommandSpec::Rest(RestSpec {
                    url: "${base}/me".into(),
                    to_clipboard: Some("data.user.email".into()),
                    captures: BTreeMap::from([("user_id".to_string(), "data.user.id".to_string())]),
                    ..RestSpec::default()
                }),
            ),
        )
        .unwrap();

        let r = reg.execute_from_config("Api", "Users", "me").await;
        assert!(r.success);
        assert_eq!(fx.clipboard.get_text().as_deref(), Some("a@b.com"));
        assert_eq!(
            reg.group_parameters("Api", "Users").get("user_id").map(String::as_str),
            Some("42")
        );
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn toggle_lifecycle_through_the_registry() {
        let fx = fixture();
        let reg = &fx.registry;
        reg.save_command(
            "Dev",
            "Servers",
            CommandMetadata::new(
                "sleeper",
                "",
                CommandSpec::TerminalToggle(TerminalToggleSpec {
                    terminal: TerminalSpec {
                        command_text: "sleep ${secs}".into(),
                        ..TerminalSpec::default()
                    },
                    toggle_command_text: None,
                }),
            ),
        )
        .unwrap();
        reg.save_group_parameter("Dev", "Servers", "secs", "30").unwrap();

        let cancel_early = reg.cancel_from_config("Dev", "Servers", "sleeper").await;
        assert_eq!(cancel_early.status, -1);

        let run = reg.execute_from_config("Dev", "Servers", "sleeper");
        for _ in 0..200 {
            if reg.is_running_from_config("Dev", "Servers", "sleeper") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reg.is_running_from_config("Dev", "Servers", "sleeper"));
        let again = reg.execute_from_config("Dev", "Servers", "sleeper").await;
        assert_eq!(again.status, -1);
        assert_eq!(reg.toggles().running().len(), 1);

        let stop = reg.toggle_from_config("Dev", "Servers", "sleeper").await;
        assert_eq!((stop.success, stop.status), (true, 130));
        let main = run.await;
        assert_eq!((main.success, main.status), (false, 130));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reg.is_running_from_config("Dev", "Servers", "sleeper"));
    }

    #[test]
    fn group_and_category_management() {
        let fx = fixture();
        let reg = &fx.registry;
        assert!(reg.add_empty_category("Ops").unwrap());
        assert!(reg.add_empty_group("Ops", "Deploy").unwrap());
        assert!(!reg.add_empty_group("Ops", "Deploy").unwrap());
        reg.save_command("Ops", "Deploy", terminal("ship", "make deploy")).unwrap();
        assert!(reg.save_command("Ops", "Deploy", terminal("ship", "make ship")).unwrap());

        let err = reg.remove_group("Ops", "Deploy").unwrap_err();
        assert!(matches!(err, CommandError::GroupNotEmpty { count: 1, .. }));
        assert!(matches!(
            reg.remove_category("Ops"),
            Err(CommandError::CategoryNotEmpty { .. })
        ));

        let removed = reg.remove_command("Ops", "Deploy", "ship").unwrap();
        let CommandSpec::Terminal(t) = removed.spec else {
            panic!("wrong spec");
        };
        assert_eq!(t.command_text, "make ship");
        reg.remove_group("Ops", "Deploy").unwrap();
        reg.remove_category("Ops").unwrap();
        assert_eq!(reg.reload().categories().count(), 0);
        assert_eq!(
            reg.parse_metadata(&serde_json::json!({"name": "x", "type": "TERMINAL", "commandText": "ls"}))
                .unwrap()
                .kind(),
            CommandKind::Terminal
        );
    }
}
