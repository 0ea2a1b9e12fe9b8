/*!
Placeholder templating.

Placeholders use the `${name}` form. Names may contain ASCII letters, digits,
`_`, `-` and `.`.

  extract_placeholder_names(text) -> BTreeSet<String>
  render(text, params)            -> Result<String, TemplateError>

Rendering is strict: a placeholder without a matching parameter fails the
whole render and reports every missing name, so an unrendered `${..}` never
reaches a shell command line or a request URL.

Per-kind field selection lives in `policy.rs`.
*/

pub mod policy;

pub use policy::{NoOpTemplatingPolicy, PolicyResolver, TemplatingPolicy};

use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use thiserror::Error;

/// Group parameter mapping as consumed by the engine.
pub type Parameters = HashMap<String, String>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("missing template parameter(s): {}", .0.join(", "))]
    MissingParameters(Vec<String>),
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").unwrap_or_else(|e| panic!("placeholder regex: {e}"))
    })
}

/// Stateless `${name}` substitution engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    /// Every distinct placeholder name in `text`. `None` / empty text -> empty set.
    pub fn extract_placeholder_names(&self, text: Option<&str>) -> BTreeSet<String> {
        let Some(text) = text.filter(|t| !t.is_empty()) else {
            return BTreeSet::new();
        };
        placeholder_regex()
            .captures_iter(text)
            .map(|c| c[1].to_string())
            .collect()
    }

    /// Placeholder names in `text` with no entry in `params`.
    pub fn missing_parameters(&self, text: &str, params: &Parameters) -> BTreeSet<String> {
        self.extract_placeholder_names(Some(text))
            .into_iter()
            .filter(|n| !params.contains_key(n))
            .collect()
    }

    /// Substitute every placeholder. Text without placeholders is returned as-is.
    pub fn render(&self, text: &str, params: &Parameters) -> Result<String, TemplateError> {
        let missing = self.missing_parameters(text, params);
        if !missing.is_empty() {
            return Err(TemplateError::MissingParameters(missing.into_iter().collect()));
        }
        let rendered = placeholder_regex().replace_all(text, |c: &Captures<'_>| {
            params.get(&c[1]).cloned().unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }

    /// `render` over an optional field.
    pub fn render_opt(
        &self,
        text: Option<&str>,
        params: &Parameters,
    ) -> Result<Option<String>, TemplateError> {
        text.map(|t| self.render(t, params)).transpose()
    }
}
