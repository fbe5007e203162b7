//! Argument coercion — repairs model-proposed arguments against a tool schema.
//!
//! Rules are tried in order and the first one that produces a mapping wins:
//!
//! 1. **exact** — keep the proposed keys the schema declares.
//! 2. **synonyms** — for every synonym table whose target the schema
//!    declares, copy the first proposed synonym onto the target key.
//!
//! When no rule matches, the proposed arguments pass through unchanged and
//! the provider gets to decide.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::catalog::ToolDescriptor;

/// Argument mapping passed to a tool.
pub type Arguments = Map<String, Value>;

/// Alternative key names for one schema property, in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynonymTable {
    pub target: String,
    pub synonyms: Vec<String>,
}

impl SynonymTable {
    pub fn new(target: &str, synonyms: &[&str]) -> Self {
        Self {
            target: target.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Built-in tables for common near-miss names.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("query", &["query", "search", "q", "text"]),
            Self::new("path", &["path", "file", "filename"]),
        ]
    }

    fn lookup<'a>(&self, proposed: &'a Arguments) -> Option<&'a Value> {
        self.synonyms.iter().find_map(|key| proposed.get(key))
    }
}

/// One coercion heuristic.
#[derive(Debug, Clone)]
pub enum Rule {
    Exact,
    Synonyms(Vec<SynonymTable>),
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Exact => "exact",
            Rule::Synonyms(_) => "synonyms",
        }
    }

    /// Apply the rule; `None` means no match.
    pub fn apply(&self, declared: &Map<String, Value>, proposed: &Arguments) -> Option<Arguments> {
        let coerced: Arguments = match self {
            Rule::Exact => proposed
                .iter()
                .filter(|(key, _)| declared.contains_key(*key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            Rule::Synonyms(tables) => tables
                .iter()
                .filter(|table| declared.contains_key(&table.target))
                .filter_map(|table| {
                    table
                        .lookup(proposed)
                        .map(|value| (table.target.clone(), value.clone()))
                })
                .collect(),
        };

        (!coerced.is_empty()).then_some(coerced)
    }
}

/// Ordered rule table applied to every tool invocation.
#[derive(Debug, Clone)]
pub struct ArgumentCoercer {
    rules: Vec<Rule>,
}

impl ArgumentCoercer {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Default rules plus `extra` synonym tables appended after the built-ins.
    pub fn with_synonyms(extra: &[SynonymTable]) -> Self {
        let mut tables = SynonymTable::defaults();
        tables.extend(extra.iter().cloned());
        Self::new(vec![Rule::Exact, Rule::Synonyms(tables)])
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Coerce `proposed` to the descriptor's declared properties.
    pub fn coerce(&self, descriptor: &ToolDescriptor, proposed: &Arguments) -> Arguments {
        let empty = Map::new();
        let declared = descriptor.properties().unwrap_or(&empty);

        for rule in &self.rules {
            if let Some(coerced) = rule.apply(declared, proposed) {
                debug!("Coerced arguments for {} via {} rule", descriptor.id(), rule.name());
                return coerced;
            }
        }

        debug!("No coercion rule matched for {}, passing arguments through", descriptor.id());
        proposed.clone()
    }
}

impl Default for ArgumentCoercer {
    fn default() -> Self {
        Self::with_synonyms(&[])
    }
}
