//! Tool catalog — qualified tool ids mapped to their descriptors.
//!
//! Descriptors are keyed by `provider:tool`. The catalog never holds a
//! connection; listing opens one, reads the tools and closes it again.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::provider::{ToolProvider, ToolSpec};
use crate::Result;

/// A tool offered by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub provider_id: String,
    pub tool_name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn from_spec(provider_id: &str, spec: ToolSpec) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            tool_name: spec.name,
            description: spec.description,
            input_schema: spec.input_schema,
        }
    }

    /// Qualified id, `provider:tool`.
    pub fn id(&self) -> String {
        qualified_id(&self.provider_id, &self.tool_name)
    }

    /// Declared schema properties, if the schema has any.
    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.input_schema.get("properties").and_then(Value::as_object)
    }

    pub fn declares(&self, property: &str) -> bool {
        self.properties().is_some_and(|p| p.contains_key(property))
    }
}

pub fn qualified_id(provider_id: &str, tool_name: &str) -> String {
    format!("{provider_id}:{tool_name}")
}

/// Descriptors in provider order, indexed by qualified id.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    entries: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// List a provider's tools over a scoped connection and record them.
    ///
    /// On failure the provider's previous descriptors are left untouched.
    pub async fn refresh(&mut self, provider: &dyn ToolProvider) -> Result<usize> {
        let mut connection = provider.open().await?;
        let listed = connection.list_tools().await;
        if let Err(e) = connection.close().await {
            warn!("Closing provider {} failed: {}", provider.id(), e);
        }

        let specs = listed?;
        Ok(self.replace_provider(provider.id(), specs))
    }

    /// Replace every descriptor owned by `provider_id`.
    pub fn replace_provider(&mut self, provider_id: &str, specs: Vec<ToolSpec>) -> usize {
        self.entries.retain(|d| d.provider_id != provider_id);

        let mut added = 0;
        for spec in specs {
            let descriptor = ToolDescriptor::from_spec(provider_id, spec);
            let id = descriptor.id();
            if let Some(existing) = self.entries.iter_mut().find(|d| d.id() == id) {
                warn!("Provider {} listed {} twice, keeping the last", provider_id, id);
                *existing = descriptor;
                continue;
            }
            self.entries.push(descriptor);
            added += 1;
        }

        self.reindex();
        debug!("Catalog now holds {} tools ({} from {})", self.len(), added, provider_id);
        added
    }

    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id(), i))
            .collect();
    }

    pub fn lookup(&self, tool_id: &str) -> Option<&ToolDescriptor> {
        self.index.get(tool_id).map(|&i| &self.entries[i])
    }

    /// Descriptors owned by one provider.
    pub fn list(&self, provider_id: &str) -> Vec<&ToolDescriptor> {
        self.entries
            .iter()
            .filter(|d| d.provider_id == provider_id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}
