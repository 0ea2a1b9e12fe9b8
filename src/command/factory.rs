//! Factory contract and the kind -> factory table.
//!
//! A factory owns everything kind-specific about persisted records: parsing,
//! validation, serialization, the templating policy and command construction.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{Command, CommandKind, CommandMetadata};
use crate::error::{CommandError, Result};
use crate::sink::StreamHandler;
use crate::template::TemplatingPolicy;

pub trait CommandFactory: Send + Sync {
    fn kind(&self) -> CommandKind;

    fn templating_policy(&self) -> Arc<dyn TemplatingPolicy>;

    /// Kind-specific checks beyond the JSON shape.
    fn validate(&self, _meta: &CommandMetadata) -> Result<()> {
        Ok(())
    }

    fn parse_metadata(&self, raw: &Value) -> Result<CommandMetadata> {
        let meta = parse_tagged(self.kind(), raw)?;
        self.validate(&meta)?;
        Ok(meta)
    }

    fn serialize_metadata(&self, meta: &CommandMetadata) -> Result<Value> {
        if meta.kind() != self.kind() {
            return Err(CommandError::invalid(
                self.kind(),
                format!("cannot serialize {} metadata", meta.kind()),
            ));
        }
        Ok(serde_json::to_value(meta)?)
    }

    fn create_command(
        &self,
        meta: CommandMetadata,
        sink: Arc<dyn StreamHandler>,
    ) -> Result<Arc<dyn Command>>;
}

/// The `type` tag of a raw record.
pub fn record_kind(raw: &Value) -> Result<CommandKind> {
    let tag = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::MalformedRecord("missing string field 'type'".into()))?;
    tag.parse()
}

fn parse_tagged(kind: CommandKind, raw: &Value) -> Result<CommandMetadata> {
    if !raw.is_object() {
        return Err(CommandError::invalid(kind, "record is not a JSON object"));
    }
    let tagged = record_kind(raw)?;
    if tagged != kind {
        return Err(CommandError::invalid(kind, format!("record is tagged {tagged}")));
    }
    let meta: CommandMetadata =
        serde_json::from_value(raw.clone()).map_err(|e| CommandError::invalid(kind, e.to_string()))?;
    if meta.name.trim().is_empty() {
        return Err(CommandError::invalid(kind, "name must not be empty"));
    }
    Ok(meta)
}

#[derive(Clone, Default)]
pub struct FactoryTable {
    factories: HashMap<CommandKind, Arc<dyn CommandFactory>>,
}

impl FactoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn CommandFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn get(&self, kind: CommandKind) -> Result<&Arc<dyn CommandFactory>> {
        self.factories
            .get(&kind)
            .ok_or_else(|| CommandError::UnsupportedKind(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<CommandKind> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Dispatch a raw record on its `type` tag.
    pub fn parse_record(&self, raw: &Value) -> Result<CommandMetadata> {
        self.get(record_kind(raw)?)?.parse_metadata(raw)
    }

    pub fn serialize_record(&self, meta: &CommandMetadata) -> Result<Value> {
        self.get(meta.kind())?.serialize_metadata(meta)
    }
}
