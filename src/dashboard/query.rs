//! Aggregation pipeline construction.
//!
//! Stages serialize in the document-database wire shape (`{"$match": {...}}`),
//! so a pipeline built here and one posted to `/api/query` are the same type.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::{AccessSection, AnalyticsSection, EmptyRestriction};
use crate::errors::DashboardError;

use super::models::{DEFECT_RATE, TOTAL_DEFECTS, TOTAL_QUANTITY};

/// One step of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "$match")]
    Match(Map<String, Value>),
    #[serde(rename = "$group")]
    Group(Map<String, Value>),
    #[serde(rename = "$addFields")]
    AddFields(Map<String, Value>),
    #[serde(rename = "$project")]
    Project(Map<String, Value>),
    #[serde(rename = "$sort")]
    Sort(Map<String, Value>),
    #[serde(rename = "$limit")]
    Limit(usize),
}

/// `"$field"` reference expression.
pub fn field_ref(name: &str) -> Value {
    Value::String(format!("${}", name))
}

/// Whitespace-insensitive key expression: `{"$trim": {"input": "$field"}}`.
pub fn trimmed_ref(name: &str) -> Value {
    json!({ "$trim": { "input": field_ref(name) } })
}

/// Scratch field holding the trimmed access value between the two
/// restriction stages; `$group` drops it.
pub const ACCESS_KEY: &str = "_accessKey";

fn single(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

// ── Date range ────────────────────────────────────────────────────────

/// Inclusive calendar-day range; either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    /// Parse `YYYY-MM-DD` bounds. Blank strings count as absent.
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self, DashboardError> {
        let from = parse_day("from", from)?;
        let to = parse_day("to", to)?;
        if let (Some(f), Some(t)) = (from, to) {
            if f > t {
                return Err(DashboardError::invalid(
                    "from",
                    format!("{} is after {}", f, t),
                ));
            }
        }
        Ok(Self { from, to })
    }

    pub fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// `$match` condition for a date-string field, or `None` when unbounded.
    ///
    /// The upper bound is exclusive on the following day so timestamps on the
    /// last day (`2024-03-01T17:30`) still match.
    fn condition(&self) -> Option<Value> {
        if self.is_open() {
            return None;
        }
        let mut cond = Map::new();
        if let Some(from) = self.from {
            cond.insert("$gte".into(), json!(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.to {
            let next = to + Duration::days(1);
            cond.insert("$lt".into(), json!(next.format("%Y-%m-%d").to_string()));
        }
        Some(Value::Object(cond))
    }
}

fn parse_day(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>, DashboardError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| DashboardError::invalid(field, format!("'{}' is not a YYYY-MM-DD date", v))),
    }
}

// ── Access restriction ────────────────────────────────────────────────

/// Caller identity as sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessScope {
    pub role: String,
    pub allowed: Vec<String>,
}

impl AccessScope {
    pub fn new(role: impl Into<String>, allowed: Vec<String>) -> Self {
        Self {
            role: role.into(),
            allowed,
        }
    }
}

/// Group values a query may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restriction {
    Unrestricted,
    /// Only these values; an empty list matches nothing.
    Only(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    pub privileged_roles: Vec<String>,
    pub empty_restriction: EmptyRestriction,
}

impl AccessPolicy {
    pub fn from_config(section: &AccessSection) -> Self {
        Self {
            privileged_roles: section.privileged_roles.clone(),
            empty_restriction: section.empty_restriction,
        }
    }

    pub fn is_privileged(&self, role: &str) -> bool {
        self.privileged_roles.iter().any(|r| r == role)
    }

    pub fn restriction(&self, scope: &AccessScope) -> Restriction {
        if self.is_privileged(&scope.role) {
            return Restriction::Unrestricted;
        }
        let allowed: Vec<String> = scope
            .allowed
            .iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if !allowed.is_empty() {
            return Restriction::Only(allowed);
        }
        match self.empty_restriction {
            EmptyRestriction::Deny => {
                tracing::info!(role = %scope.role, "no factory access configured; query restricted to nothing");
                Restriction::Only(Vec::new())
            }
            EmptyRestriction::Allow => {
                tracing::warn!(role = %scope.role, "no factory access configured; running unrestricted query");
                Restriction::Unrestricted
            }
        }
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::from_config(&AccessSection::default())
    }
}

impl Restriction {
    /// Stages keeping only documents whose trimmed `access_field` is allowed.
    fn stages(&self, access_field: &str) -> Vec<Stage> {
        match self {
            Restriction::Unrestricted => Vec::new(),
            Restriction::Only(values) => vec![
                Stage::AddFields(single(ACCESS_KEY, trimmed_ref(access_field))),
                Stage::Match(single(ACCESS_KEY, json!({ "$in": values }))),
            ],
        }
    }
}

// ── Measures ──────────────────────────────────────────────────────────

/// Numeric source fields summed per group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureSet {
    pub quantity_field: String,
    pub defect_field: String,
    pub counters: Vec<String>,
}

impl MeasureSet {
    pub fn from_config(section: &AnalyticsSection) -> Self {
        Self {
            quantity_field: section.quantity_field.clone(),
            defect_field: section.defect_field.clone(),
            counters: section.counters.clone(),
        }
    }
}

// ── Pipelines ─────────────────────────────────────────────────────────

/// Parameters of the per-group defect analytics query.
#[derive(Debug, Clone)]
pub struct AggregationQuery {
    pub collection: String,
    pub group_by: String,
    /// Field the restriction applies to, independent of `group_by`.
    pub access_field: String,
    pub date_field: String,
    pub date_range: DateRange,
    pub restriction: Restriction,
    pub measures: MeasureSet,
}

impl AggregationQuery {
    /// restrict → date filter → group/sum → drop empty keys → ratio → sort.
    pub fn pipeline(&self) -> Vec<Stage> {
        let mut stages = self.restriction.stages(&self.access_field);
        if let Some(cond) = self.date_range.condition() {
            stages.push(Stage::Match(single(&self.date_field, cond)));
        }

        let mut group = Map::new();
        group.insert("_id".into(), trimmed_ref(&self.group_by));
        group.insert(
            TOTAL_QUANTITY.into(),
            json!({ "$sum": field_ref(&self.measures.quantity_field) }),
        );
        group.insert(
            TOTAL_DEFECTS.into(),
            json!({ "$sum": field_ref(&self.measures.defect_field) }),
        );
        for counter in &self.measures.counters {
            group.insert(counter.clone(), json!({ "$sum": field_ref(counter) }));
        }
        stages.push(Stage::Group(group));
        stages.push(exclude_empty_keys());

        let quantity = field_ref(TOTAL_QUANTITY);
        let defects = field_ref(TOTAL_DEFECTS);
        stages.push(Stage::AddFields(single(
            DEFECT_RATE,
            json!({
                "$cond": [
                    { "$gt": [quantity, 0] },
                    { "$multiply": [{ "$divide": [defects, quantity] }, 100] },
                    0
                ]
            }),
        )));
        stages.push(Stage::Sort(single("_id", json!(1))));
        stages
    }
}

/// Distinct non-empty trimmed values of `access_field` visible under
/// `restriction`, ascending.
pub fn factory_list_pipeline(access_field: &str, restriction: &Restriction) -> Vec<Stage> {
    let mut stages = restriction.stages(access_field);
    let mut group = Map::new();
    group.insert("_id".into(), trimmed_ref(access_field));
    group.insert("count".into(), json!({ "$sum": 1 }));
    stages.push(Stage::Group(group));
    stages.push(exclude_empty_keys());
    stages.push(Stage::Sort(single("_id", json!(1))));
    stages
}

fn exclude_empty_keys() -> Stage {
    Stage::Match(single("_id", json!({ "$nin": [null, ""] })))
}
