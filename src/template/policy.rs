//! Per-kind templating policies.
//!
//! A policy knows which fields of its kind's metadata carry placeholders and
//! produces a rendered copy. The input metadata is never mutated.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::{Parameters, TemplateEngine};
use crate::command::{CommandKind, CommandMetadata};
use crate::error::{CommandError, Result};

pub trait TemplatingPolicy: Send + Sync {
    fn kind(&self) -> CommandKind;

    /// Raw text of every templatable field, in declaration order.
    fn templatable_fields<'a>(&self, meta: &'a CommandMetadata) -> Vec<&'a str>;

    /// New metadata with the templatable fields rendered against `params`.
    fn render(
        &self,
        meta: &CommandMetadata,
        params: &Parameters,
        engine: &TemplateEngine,
    ) -> Result<CommandMetadata>;

    /// Union of placeholder names across all templatable fields.
    fn placeholder_names(&self, meta: &CommandMetadata, engine: &TemplateEngine) -> BTreeSet<String> {
        self.templatable_fields(meta)
            .into_iter()
            .flat_map(|f| engine.extract_placeholder_names(Some(f)))
            .collect()
    }
}

/// Policy for kinds without templatable fields.
#[derive(Debug, Clone, Copy)]
pub struct NoOpTemplatingPolicy(pub CommandKind);

impl TemplatingPolicy for NoOpTemplatingPolicy {
    fn kind(&self) -> CommandKind {
        self.0
    }

    fn templatable_fields<'a>(&self, _meta: &'a CommandMetadata) -> Vec<&'a str> {
        Vec::new()
    }

    fn render(
        &self,
        meta: &CommandMetadata,
        _params: &Parameters,
        _engine: &TemplateEngine,
    ) -> Result<CommandMetadata> {
        Ok(meta.clone())
    }
}

/// kind -> policy lookup. Kinds with no registered policy fall back to no-op.
#[derive(Clone, Default)]
pub struct PolicyResolver {
    policies: HashMap<CommandKind, Arc<dyn TemplatingPolicy>>,
}

impl PolicyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, policy: Arc<dyn TemplatingPolicy>) {
        self.policies.insert(policy.kind(), policy);
    }

    pub fn resolve(&self, kind: CommandKind) -> Arc<dyn TemplatingPolicy> {
        self.policies
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(NoOpTemplatingPolicy(kind)))
    }

    pub fn render(
        &self,
        meta: &CommandMetadata,
        params: &Parameters,
        engine: &TemplateEngine,
    ) -> Result<CommandMetadata> {
        let policy = self.resolve(meta.kind());
        if policy.kind() != meta.kind() {
            return Err(CommandError::UnsupportedKind(meta.kind().to_string()));
        }
        policy.render(meta, params, engine)
    }
}
