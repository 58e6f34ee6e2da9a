use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier field of every stored document.
pub const ID_FIELD: &str = "_id";

/// Approval status field, rendered as the fixed first table column.
pub const STATUS_FIELD: &str = "status";

/// Nested object holding attached images, keyed by label.
pub const IMAGES_FIELD: &str = "images";

pub const TOTAL_QUANTITY: &str = "totalQuantity";
pub const TOTAL_DEFECTS: &str = "totalDefects";
pub const DEFECT_RATE: &str = "defectRate";

/// A schema-less document: field name → JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wrap a JSON value; `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Persisted identifier, if any. Numeric ids are rendered as strings.
    pub fn id(&self) -> Option<String> {
        match self.0.get(ID_FIELD)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Look up a field by exact key, falling back to dotted traversal.
    pub fn get(&self, name: &str) -> Option<&Value> {
        lookup(&self.0, name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Resolve `path` in `map`: exact key first, then `prefix.rest` traversal
/// into nested objects for every prefix that exists.
pub fn lookup<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(v) = map.get(path) {
        return Some(v);
    }
    for (idx, _) in path.match_indices('.') {
        let (head, rest) = (&path[..idx], &path[idx + 1..]);
        if let Some(Value::Object(inner)) = map.get(head) {
            if let Some(v) = lookup(inner, rest) {
                return Some(v);
            }
        }
    }
    None
}

/// Non-NaN, non-infinite f64 view of a JSON number; everything else is zero.
pub fn finite_number(value: Option<&Value>) -> f64 {
    value
        .and_then(Value::as_f64)
        .filter(|f| f.is_finite())
        .unwrap_or(0.0)
}

/// Defects per hundred processed units; zero when nothing was processed.
pub fn defect_rate(defects: f64, quantity: f64) -> f64 {
    if quantity > 0.0 && defects.is_finite() && quantity.is_finite() {
        let rate = defects / quantity * 100.0;
        if rate.is_finite() { rate } else { 0.0 }
    } else {
        0.0
    }
}

/// One summarized group (e.g. one factory) of the defect analytics query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationRow {
    pub key: String,
    pub total_quantity: f64,
    pub total_defects: f64,
    pub defect_rate: f64,
    pub counters: BTreeMap<String, f64>,
}

impl AggregationRow {
    /// Build a row from an aggregation result document. Rows with a null or
    /// empty group key yield `None`; absent measures read as zero.
    pub fn from_document(doc: &Value, counters: &[String]) -> Option<Self> {
        let map = doc.as_object()?;
        let key = match map.get(ID_FIELD)? {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let total_quantity = finite_number(map.get(TOTAL_QUANTITY));
        let total_defects = finite_number(map.get(TOTAL_DEFECTS));
        let counters = counters
            .iter()
            .map(|name| (name.clone(), finite_number(map.get(name))))
            .collect();
        Some(Self {
            key,
            total_quantity,
            total_defects,
            defect_rate: defect_rate(total_defects, total_quantity),
            counters,
        })
    }

    pub fn counter(&self, name: &str) -> f64 {
        self.counters.get(name).copied().unwrap_or(0.0)
    }
}

/// Stored under `images.<label>` by the attach endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub data: String,
    pub uploaded_by: String,
    pub uploaded_at: String,
}
