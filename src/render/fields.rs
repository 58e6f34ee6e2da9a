//! Dynamic field discovery for schema-less record sets.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::dashboard::models::{ID_FIELD, IMAGES_FIELD, Record, STATUS_FIELD};

/// Fields that never become dynamic columns.
pub const HIDDEN_FIELDS: &[&str] = &[ID_FIELD, STATUS_FIELD, IMAGES_FIELD];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_grouped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl FieldDescriptor {
    /// `group.field` keys are grouped under `group` and displayed as `field`.
    pub fn new(name: &str) -> Self {
        match name.split_once('.') {
            Some((group, field)) if !group.is_empty() && !field.is_empty() => Self {
                name: name.to_string(),
                display_name: field.to_string(),
                description: None,
                is_grouped: true,
                group: Some(group.to_string()),
            },
            _ => Self {
                name: name.to_string(),
                display_name: name.to_string(),
                description: None,
                is_grouped: false,
                group: None,
            },
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// Union of keys across `records` in first-seen order, minus hidden fields.
pub fn discover_fields(records: &[Record]) -> Vec<FieldDescriptor> {
    let mut seen = HashSet::new();
    let mut fields = Vec::new();
    for key in records.iter().flat_map(Record::keys) {
        if HIDDEN_FIELDS.contains(&key.as_str()) || !seen.insert(key.as_str()) {
            continue;
        }
        fields.push(FieldDescriptor::new(key));
    }
    fields
}

/// Stable fingerprint of the key set a record set exposes.
fn fingerprint(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .flat_map(Record::keys)
        .filter(|k| seen.insert(k.as_str()))
        .cloned()
        .collect()
}

struct CatalogEntry {
    fingerprint: Vec<String>,
    fields: Arc<Vec<FieldDescriptor>>,
}

/// Per-tab memo of field descriptors, recomputed only when the tab's
/// observed key set changes.
#[derive(Default)]
pub struct FieldCatalog {
    entries: HashMap<String, CatalogEntry>,
    descriptions: HashMap<String, HashMap<String, String>>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach column descriptions for a tab. Drops the memoized entry.
    pub fn set_descriptions(&mut self, tab: &str, descriptions: HashMap<String, String>) {
        self.entries.remove(tab);
        self.descriptions.insert(tab.to_string(), descriptions);
    }

    pub fn fields_for(&mut self, tab: &str, records: &[Record]) -> Arc<Vec<FieldDescriptor>> {
        let print = fingerprint(records);
        if let Some(entry) = self.entries.get(tab)
            && entry.fingerprint == print
        {
            return Arc::clone(&entry.fields);
        }

        let descriptions = self.descriptions.get(tab);
        let fields: Vec<FieldDescriptor> = discover_fields(records)
            .into_iter()
            .map(|f| {
                let description = descriptions.and_then(|d| d.get(&f.name).cloned());
                f.with_description(description)
            })
            .collect();
        tracing::debug!(tab, columns = fields.len(), "field catalog recomputed");

        let fields = Arc::new(fields);
        self.entries.insert(
            tab.to_string(),
            CatalogEntry {
                fingerprint: print,
                fields: Arc::clone(&fields),
            },
        );
        fields
    }
}
