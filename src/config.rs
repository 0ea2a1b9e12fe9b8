/*!
Persistent configuration.

Two JSON documents live in the config directory:

  commands.json    { "<category>": { "<group>": [ <command record>, ... ] } }
  parameters.json  { "<category>": { "<group>": { "<key>": "<value>" } } }

Both are cached after the first read and fully rewritten (pretty JSON) on
every change. A missing, empty or malformed document reads as empty with a
warning. Records that do not decode (unknown `type`, failed validation) are
left out of the command list but kept verbatim and written back on save, so
an unrelated change never drops them from disk.

Config directory: explicit path, else `$CMDVAULT_HOME`, else
`<data local dir>/cmdvault`.
*/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::command::{CommandMetadata, FactoryTable};
use crate::error::{CommandError, Result};
use crate::template::Parameters;

pub const COMMANDS_FILE: &str = "commands.json";
pub const PARAMETERS_FILE: &str = "parameters.json";
pub const LOGS_DIR: &str = "logs";
pub const HOME_ENV: &str = "CMDVAULT_HOME";

/// `$CMDVAULT_HOME`, else `<data local dir>/cmdvault`, else `./.cmdvault`.
pub fn default_config_dir() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV)
        && !home.trim().is_empty()
    {
        return PathBuf::from(home);
    }
    dirs::data_local_dir()
        .map(|d| d.join("cmdvault"))
        .unwrap_or_else(|| PathBuf::from(".cmdvault"))
}

/// Converts between persisted records and metadata.
pub trait MetadataCodec: Send + Sync {
    fn decode(&self, raw: &Value) -> Result<CommandMetadata>;
    fn encode(&self, meta: &CommandMetadata) -> Result<Value>;
}

impl MetadataCodec for FactoryTable {
    fn decode(&self, raw: &Value) -> Result<CommandMetadata> {
        self.parse_record(raw)
    }

    fn encode(&self, meta: &CommandMetadata) -> Result<Value> {
        self.serialize_record(meta)
    }
}

/* ---------------------------------------------------------------------------
 * CommandMetadataWrapper
 * ------------------------------------------------------------------------- */

type Groups = BTreeMap<String, Vec<CommandMetadata>>;

/// category -> group -> ordered commands. Names are unique per group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandMetadataWrapper {
    categories: BTreeMap<String, Groups>,
    /// Raw records that failed to decode, by (category, group).
    undecoded: BTreeMap<(String, String), Vec<Value>>,
}

impl CommandMetadataWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn groups(&self, category: &str) -> Option<impl Iterator<Item = &str>> {
        self.categories
            .get(category)
            .map(|g| g.keys().map(String::as_str))
    }

    pub fn commands(&self, category: &str, group: &str) -> Option<&[CommandMetadata]> {
        self.categories
            .get(category)?
            .get(group)
            .map(Vec::as_slice)
    }

    /// (category, group, command) for every stored command.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &CommandMetadata)> {
        self.categories.iter().flat_map(|(c, groups)| {
            groups
                .iter()
                .flat_map(move |(g, cmds)| cmds.iter().map(move |m| (c.as_str(), g.as_str(), m)))
        })
    }

    pub fn find(&self, category: &str, group: &str, name: &str) -> Option<&CommandMetadata> {
        self.commands(category, group)?
            .iter()
            .find(|m| m.name == name)
    }

    /// Records kept from disk that no factory could decode.
    pub fn undecoded(&self, category: &str, group: &str) -> &[Value] {
        self.undecoded
            .get(&(category.to_string(), group.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Insert or replace (same name, same position). True when replaced.
    /// An undecodable record with the same name is dropped.
    pub fn upsert(&mut self, category: &str, group: &str, meta: CommandMetadata) -> bool {
        let key = (category.to_string(), group.to_string());
        if let Some(raw) = self.undecoded.get_mut(&key) {
            raw.retain(|r| r.get("name").and_then(Value::as_str) != Some(meta.name.as_str()));
            if raw.is_empty() {
                self.undecoded.remove(&key);
            }
        }
        let cmds = self
            .categories
            .entry(category.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default();
        match cmds.iter_mut().find(|m| m.name == meta.name) {
            Some(slot) => {
                *slot = meta;
                true
            }
            None => {
                cmds.push(meta);
                false
            }
        }
    }

    pub fn remove_command(&mut self, category: &str, group: &str, name: &str) -> Result<CommandMetadata> {
        let not_found = || CommandError::NotFound {
            category: category.to_string(),
            group: group.to_string(),
            name: name.to_string(),
        };
        let cmds = self
            .categories
            .get_mut(category)
            .and_then(|g| g.get_mut(group))
            .ok_or_else(not_found)?;
        let idx = cmds.iter().position(|m| m.name == name).ok_or_else(not_found)?;
        Ok(cmds.remove(idx))
    }

    /// False when the category already existed.
    pub fn add_category(&mut self, category: &str) -> bool {
        if self.categories.contains_key(category) {
            return false;
        }
        self.categories.insert(category.to_string(), Groups::new());
        true
    }

    /// Creates the category when needed. False when the group already existed.
    pub fn add_group(&mut self, category: &str, group: &str) -> bool {
        let groups = self.categories.entry(category.to_string()).or_default();
        if groups.contains_key(group) {
            return false;
        }
        groups.insert(group.to_string(), Vec::new());
        true
    }

    pub fn remove_group(&mut self, category: &str, group: &str) -> Result<()> {
        let groups = self
            .categories
            .get_mut(category)
            .ok_or_else(|| CommandError::CategoryNotFound(category.to_string()))?;
        let cmds = groups.get(group).ok_or_else(|| CommandError::GroupNotFound {
            category: category.to_string(),
            group: group.to_string(),
        })?;
        let count = cmds.len()
            + self
                .undecoded
                .get(&(category.to_string(), group.to_string()))
                .map_or(0, Vec::len);
        if count > 0 {
            return Err(CommandError::GroupNotEmpty {
                category: category.to_string(),
                group: group.to_string(),
                count,
            });
        }
        groups.remove(group);
        Ok(())
    }

    pub fn remove_category(&mut self, category: &str) -> Result<()> {
        let groups = self
            .categories
            .get(category)
            .ok_or_else(|| CommandError::CategoryNotFound(category.to_string()))?;
        if !groups.is_empty() {
            return Err(CommandError::CategoryNotEmpty {
                category: category.to_string(),
                count: groups.len(),
            });
        }
        self.categories.remove(category);
        Ok(())
    }

    pub fn command_count(&self) -> usize {
        self.iter().count()
    }

    fn decode(doc: &Value, codec: &dyn MetadataCodec) -> Self {
        let mut wrapper = Self::new();
        let Some(categories) = doc.as_object() else {
            warn!("commands document is not a JSON object; using empty configuration");
            return wrapper;
        };
        for (category, groups) in categories {
            wrapper.add_category(category);
            let Some(groups) = groups.as_object() else {
                warn!(category = %category, "category is not a JSON object; skipped");
                continue;
            };
            for (group, records) in groups {
                wrapper.add_group(category, group);
                let Some(records) = records.as_array() else {
                    warn!(category = %category, group = %group, "group is not a JSON array; skipped");
                    continue;
                };
                for raw in records {
                    match codec.decode(raw) {
                        Ok(meta) => {
                            wrapper.upsert(category, group, meta);
                        }
                        Err(e) => {
                            warn!(category = %category, group = %group, "keeping undecodable record as is: {e}");
                            wrapper
                                .undecoded
                                .entry((category.clone(), group.clone()))
                                .or_default()
                                .push(raw.clone());
                        }
                    }
                }
            }
        }
        wrapper
    }

    fn encode(&self, codec: &dyn MetadataCodec) -> Result<Value> {
        let mut root = Map::new();
        for (category, groups) in &self.categories {
            let mut group_map = Map::new();
            for (group, cmds) in groups {
                let mut records = cmds
                    .iter()
                    .map(|m| codec.encode(m))
                    .collect::<Result<Vec<_>>>()?;
                records.extend(self.undecoded(category, group).iter().cloned());
                group_map.insert(group.clone(), Value::Array(records));
            }
            root.insert(category.clone(), Value::Object(group_map));
        }
        Ok(Value::Object(root))
    }
}

/* ---------------------------------------------------------------------------
 * ConfigService
 * ------------------------------------------------------------------------- */

type ParameterDocument = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

#[derive(Default)]
struct Cache {
    commands: Option<CommandMetadataWrapper>,
    parameters: Option<ParameterDocument>,
}

pub struct ConfigService {
    dir: PathBuf,
    codec: Arc<dyn MetadataCodec>,
    cache: RwLock<Cache>,
    /// Serializes read-modify-write cycles.
    writer: Mutex<()>,
}

impl ConfigService {
    pub fn new(dir: impl Into<PathBuf>, codec: Arc<dyn MetadataCodec>) -> Self {
        Self {
            dir: dir.into(),
            codec,
            cache: RwLock::new(Cache::default()),
            writer: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn commands_path(&self) -> PathBuf {
        self.dir.join(COMMANDS_FILE)
    }

    pub fn parameters_path(&self) -> PathBuf {
        self.dir.join(PARAMETERS_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join(LOGS_DIR)
    }

    /// Create the directory and any missing or empty document.
    pub fn initialize(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CommandError::io(&self.dir, e))?;
        for path in [self.commands_path(), self.parameters_path()] {
            let empty = std::fs::read_to_string(&path)
                .map(|s| s.trim().is_empty())
                .unwrap_or(true);
            if empty {
                write_pretty(&path, &Value::Object(Map::new()))?;
                debug!(path = %path.display(), "initialized empty document");
            }
        }
        Ok(())
    }

    /// True when `path` exists and parses as JSON.
    pub fn is_valid_json_file(path: &Path) -> bool {
        std::fs::read_to_string(path)
            .ok()
            .is_some_and(|s| serde_json::from_str::<Value>(&s).is_ok())
    }

    /// Cached command document.
    pub fn load(&self) -> CommandMetadataWrapper {
        if let Some(w) = &self.cache.read().commands {
            return w.clone();
        }
        self.reload()
    }

    /// Re-read both documents from disk.
    pub fn reload(&self) -> CommandMetadataWrapper {
        let doc = read_document(&self.commands_path());
        let wrapper = CommandMetadataWrapper::decode(&doc, self.codec.as_ref());
        let mut cache = self.cache.write();
        cache.commands = Some(wrapper.clone());
        cache.parameters = None;
        wrapper
    }

    pub fn save(&self, wrapper: &CommandMetadataWrapper) -> Result<()> {
        let doc = wrapper.encode(self.codec.as_ref())?;
        std::fs::create_dir_all(&self.dir).map_err(|e| CommandError::io(&self.dir, e))?;
        write_pretty(&self.commands_path(), &doc)?;
        self.cache.write().commands = Some(wrapper.clone());
        Ok(())
    }

    /// Load, apply `f`, save. Nothing is written when `f` fails.
    pub fn update<R>(&self, f: impl FnOnce(&mut CommandMetadataWrapper) -> Result<R>) -> Result<R> {
        let _guard = self.writer.lock();
        let mut wrapper = self.load();
        let out = f(&mut wrapper)?;
        self.save(&wrapper)?;
        Ok(out)
    }

    fn parameters(&self) -> ParameterDocument {
        if let Some(p) = &self.cache.read().parameters {
            return p.clone();
        }
        let doc = read_document(&self.parameters_path());
        let params: ParameterDocument = serde_json::from_value(doc).unwrap_or_else(|e| {
            warn!("parameters document malformed ({e}); using empty parameters");
            ParameterDocument::new()
        });
        self.cache.write().parameters = Some(params.clone());
        params
    }

    fn update_parameters<R>(&self, f: impl FnOnce(&mut ParameterDocument) -> R) -> Result<R> {
        let _guard = self.writer.lock();
        let mut doc = self.parameters();
        let out = f(&mut doc);
        std::fs::create_dir_all(&self.dir).map_err(|e| CommandError::io(&self.dir, e))?;
        write_pretty(&self.parameters_path(), &serde_json::to_value(&doc)?)?;
        self.cache.write().parameters = Some(doc);
        Ok(out)
    }

    pub fn group_parameters(&self, category: &str, group: &str) -> Parameters {
        self.parameters()
            .get(category)
            .and_then(|g| g.get(group))
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn save_group_parameter(&self, category: &str, group: &str, key: &str, value: &str) -> Result<()> {
        self.update_parameters(|doc| {
            doc.entry(category.to_string())
                .or_default()
                .entry(group.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
        })
    }

    /// Merge `values` into the group's parameters.
    pub fn merge_group_parameters(
        &self,
        category: &str,
        group: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.update_parameters(|doc| {
            doc.entry(category.to_string())
                .or_default()
                .entry(group.to_string())
                .or_default()
                .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        })
    }

    /// True when the key existed.
    pub fn remove_group_parameter(&self, category: &str, group: &str, key: &str) -> Result<bool> {
        self.update_parameters(|doc| {
            let Some(groups) = doc.get_mut(category) else {
                return false;
            };
            let Some(params) = groups.get_mut(group) else {
                return false;
            };
            let removed = params.remove(key).is_some();
            if params.is_empty() {
                groups.remove(group);
            }
            if groups.is_empty() {
                doc.remove(category);
            }
            removed
        })
    }
}

fn read_document(path: &Path) -> Value {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "document missing; using empty");
            return Value::Object(Map::new());
        }
        Err(e) => {
            warn!(path = %path.display(), "cannot read document ({e}); using empty");
            return Value::Object(Map::new());
        }
    };
    if text.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!(path = %path.display(), "malformed JSON ({e}); using empty");
        Value::Object(Map::new())
    })
}

/// Full rewrite through a temp file in the same directory.
fn write_pretty(path: &Path, doc: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text).map_err(|e| CommandError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| CommandError::io(path, e))
}

/// Group parameters with per-call overrides on top.
pub fn merged_parameters(base: Parameters, overrides: &Parameters) -> Parameters {
    let mut out = base;
    out.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}
