//! In-process evaluator for aggregation pipelines and simple queries.
//!
//! Operates on JSON documents loaded from the document store. Supports the
//! stage and operator subset the dashboard issues; anything else is rejected
//! with [`DashboardError::Pipeline`] rather than silently ignored.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use crate::errors::DashboardError;

use super::models::{ID_FIELD, lookup};
use super::query::Stage;

type EngineResult<T> = Result<T, DashboardError>;

fn pipeline_err(msg: impl Into<String>) -> DashboardError {
    DashboardError::Pipeline(msg.into())
}

/// Run `stages` over `docs` in order.
pub fn aggregate(docs: Vec<Value>, stages: &[Stage]) -> EngineResult<Vec<Value>> {
    let mut docs = docs;
    for stage in stages {
        docs = match stage {
            Stage::Match(filter) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            Stage::Group(spec) => group(&docs, spec)?,
            Stage::AddFields(fields) => docs
                .into_iter()
                .map(|doc| add_fields(doc, fields))
                .collect::<EngineResult<_>>()?,
            Stage::Project(spec) => docs
                .iter()
                .map(|doc| project(doc, spec))
                .collect::<EngineResult<_>>()?,
            Stage::Sort(spec) => sort(docs, spec)?,
            Stage::Limit(n) => {
                docs.truncate(*n);
                docs
            }
        };
    }
    Ok(docs)
}

/// Filter `docs` and optionally project each match.
pub fn find(
    docs: Vec<Value>,
    filter: &Map<String, Value>,
    projection: Option<&Map<String, Value>>,
) -> EngineResult<Vec<Value>> {
    let mut out = Vec::new();
    for doc in docs {
        if !matches(&doc, filter)? {
            continue;
        }
        match projection {
            Some(spec) if !spec.is_empty() => out.push(project(&doc, spec)?),
            _ => out.push(doc),
        }
    }
    Ok(out)
}

fn resolve<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    doc.as_object().and_then(|map| lookup(map, path))
}

/// Finite numbers become JSON numbers; NaN and infinities become `null`.
pub fn number_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

// ── Filters ───────────────────────────────────────────────────────────

/// Whether `doc` satisfies every condition in `filter`.
pub fn matches(doc: &Value, filter: &Map<String, Value>) -> EngineResult<bool> {
    for (field, cond) in filter {
        let ok = match field.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(field, cond)? {
                    all &= matches(doc, sub)?;
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(field, cond)? {
                    any |= matches(doc, sub)?;
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(pipeline_err(format!("unsupported top-level operator {}", op)));
            }
            _ => field_matches(resolve(doc, field), cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(op: &str, cond: &'a Value) -> EngineResult<Vec<&'a Map<String, Value>>> {
    cond.as_array()
        .ok_or_else(|| pipeline_err(format!("{} expects an array", op)))?
        .iter()
        .map(|v| {
            v.as_object()
                .ok_or_else(|| pipeline_err(format!("{} entries must be objects", op)))
        })
        .collect()
}

fn is_operator_object(cond: &Value) -> bool {
    match cond {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn field_matches(value: Option<&Value>, cond: &Value) -> EngineResult<bool> {
    if !is_operator_object(cond) {
        return Ok(values_equal(value, cond));
    }
    let Value::Object(ops) = cond else {
        return Ok(false);
    };
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => values_equal(value, arg),
            "$ne" => !values_equal(value, arg),
            "$in" => in_list(op, value, arg)?,
            "$nin" => !in_list(op, value, arg)?,
            "$gt" => ordered(value, arg, |o| o == Ordering::Greater),
            "$gte" => ordered(value, arg, |o| o != Ordering::Less),
            "$lt" => ordered(value, arg, |o| o == Ordering::Less),
            "$lte" => ordered(value, arg, |o| o != Ordering::Greater),
            "$exists" => value.is_some() == arg.as_bool().unwrap_or(true),
            other => return Err(pipeline_err(format!("unsupported operator {}", other))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_list(op: &str, value: Option<&Value>, arg: &Value) -> EngineResult<bool> {
    let list = arg
        .as_array()
        .ok_or_else(|| pipeline_err(format!("{} expects an array", op)))?;
    Ok(list.iter().any(|candidate| values_equal(value, candidate)))
}

/// Missing fields equal `null`; numbers compare by value.
fn values_equal(value: Option<&Value>, other: &Value) -> bool {
    match (value.unwrap_or(&Value::Null), other) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

/// Range comparisons only hold between values of the same type.
fn ordered(value: Option<&Value>, arg: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    match value {
        Some(v) if type_rank(v) == type_rank(arg) && !v.is_null() => pred(compare_json(v, arg)),
        _ => false,
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < numbers < strings < booleans < arrays < objects.
pub fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_json(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

// ── Expressions ───────────────────────────────────────────────────────

/// Evaluate an aggregation expression against `doc`.
pub fn eval_expr(doc: &Value, expr: &Value) -> EngineResult<Value> {
    match expr {
        Value::String(s) if s.starts_with('$') && s.len() > 1 => {
            Ok(resolve(doc, &s[1..]).cloned().unwrap_or(Value::Null))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| eval_expr(doc, item))
            .collect::<EngineResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) if map.len() == 1 => {
            let (op, arg) = map.iter().next().ok_or_else(|| pipeline_err("empty expression"))?;
            if op.starts_with('$') {
                eval_operator(doc, op, arg)
            } else {
                Ok(Value::Object(eval_object(doc, map)?))
            }
        }
        Value::Object(map) => Ok(Value::Object(eval_object(doc, map)?)),
        other => Ok(other.clone()),
    }
}

fn eval_object(doc: &Value, map: &Map<String, Value>) -> EngineResult<Map<String, Value>> {
    let mut out = Map::new();
    for (k, v) in map {
        out.insert(k.clone(), eval_expr(doc, v)?);
    }
    Ok(out)
}

fn eval_args(doc: &Value, op: &str, arg: &Value, arity: Option<usize>) -> EngineResult<Vec<Value>> {
    let items = arg
        .as_array()
        .ok_or_else(|| pipeline_err(format!("{} expects an array of arguments", op)))?;
    if let Some(n) = arity {
        if items.len() != n {
            return Err(pipeline_err(format!("{} expects {} arguments", op, n)));
        }
    }
    items.iter().map(|item| eval_expr(doc, item)).collect()
}

fn eval_operator(doc: &Value, op: &str, arg: &Value) -> EngineResult<Value> {
    match op {
        "$literal" => Ok(arg.clone()),
        "$add" | "$multiply" => {
            let args = eval_args(doc, op, arg, None)?;
            let mut acc = if op == "$add" { 0.0 } else { 1.0 };
            for v in &args {
                match v.as_f64() {
                    Some(f) if op == "$add" => acc += f,
                    Some(f) => acc *= f,
                    None => return Ok(Value::Null),
                }
            }
            Ok(number_value(acc))
        }
        "$subtract" | "$divide" => {
            let args = eval_args(doc, op, arg, Some(2))?;
            let (Some(a), Some(b)) = (args[0].as_f64(), args[1].as_f64()) else {
                return Ok(Value::Null);
            };
            if op == "$subtract" {
                Ok(number_value(a - b))
            } else if b == 0.0 {
                Ok(Value::Null)
            } else {
                Ok(number_value(a / b))
            }
        }
        "$gt" | "$gte" | "$lt" | "$lte" | "$eq" | "$ne" => {
            let args = eval_args(doc, op, arg, Some(2))?;
            let ord = compare_json(&args[0], &args[1]);
            let result = match op {
                "$gt" => ord == Ordering::Greater,
                "$gte" => ord != Ordering::Less,
                "$lt" => ord == Ordering::Less,
                "$lte" => ord != Ordering::Greater,
                "$eq" => ord == Ordering::Equal,
                _ => ord != Ordering::Equal,
            };
            Ok(Value::Bool(result))
        }
        "$ifNull" => {
            let args = eval_args(doc, op, arg, Some(2))?;
            let mut args = args.into_iter();
            let first = args.next().unwrap_or(Value::Null);
            if first.is_null() {
                Ok(args.next().unwrap_or(Value::Null))
            } else {
                Ok(first)
            }
        }
        "$trim" => {
            let input = arg
                .get("input")
                .ok_or_else(|| pipeline_err("$trim missing 'input'"))?;
            Ok(match eval_expr(doc, input)? {
                Value::String(s) => Value::String(s.trim().to_string()),
                other => other,
            })
        }
        "$cond" => {
            let (cond, then, otherwise) = match arg {
                Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                Value::Object(map) => (
                    map.get("if").ok_or_else(|| pipeline_err("$cond missing 'if'"))?,
                    map.get("then").ok_or_else(|| pipeline_err("$cond missing 'then'"))?,
                    map.get("else").ok_or_else(|| pipeline_err("$cond missing 'else'"))?,
                ),
                _ => return Err(pipeline_err("$cond expects [if, then, else]")),
            };
            if truthy(&eval_expr(doc, cond)?) {
                eval_expr(doc, then)
            } else {
                eval_expr(doc, otherwise)
            }
        }
        other => Err(pipeline_err(format!("unsupported expression operator {}", other))),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

// ── Stages ────────────────────────────────────────────────────────────

/// Running `$sum` that stays integral until a fractional input appears.
#[derive(Default)]
struct Sum {
    int: i64,
    float: f64,
    is_float: bool,
}

impl Sum {
    fn add(&mut self, v: &Value) {
        let Value::Number(n) = v else {
            return;
        };
        match n.as_i64() {
            Some(i) if !self.is_float => match self.int.checked_add(i) {
                Some(total) => self.int = total,
                None => {
                    self.is_float = true;
                    self.float = self.int as f64 + i as f64;
                }
            },
            _ => {
                if !self.is_float {
                    self.is_float = true;
                    self.float = self.int as f64;
                }
                if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
                    self.float += f;
                }
            }
        }
    }

    fn value(&self) -> Value {
        if self.is_float {
            number_value(self.float)
        } else {
            Value::from(self.int)
        }
    }
}

enum Accumulator {
    Sum(Sum),
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
}

impl Accumulator {
    fn parse(field: &str, spec: &Value) -> EngineResult<(Self, Value)> {
        let map = spec
            .as_object()
            .filter(|m| m.len() == 1)
            .ok_or_else(|| pipeline_err(format!("$group field '{}' must be a single accumulator", field)))?;
        let (op, expr) = map
            .iter()
            .next()
            .ok_or_else(|| pipeline_err(format!("$group field '{}' is empty", field)))?;
        let acc = match op.as_str() {
            "$sum" => Accumulator::Sum(Sum::default()),
            "$count" => return Ok((Accumulator::Sum(Sum::default()), Value::from(1))),
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            other => return Err(pipeline_err(format!("unsupported accumulator {}", other))),
        };
        Ok((acc, expr.clone()))
    }

    fn push(&mut self, v: Value) {
        match self {
            Accumulator::Sum(sum) => sum.add(&v),
            Accumulator::Min(_) | Accumulator::Max(_) if v.is_null() => {}
            Accumulator::Min(cur) => {
                if cur.as_ref().is_none_or(|c| compare_json(&v, c) == Ordering::Less) {
                    *cur = Some(v);
                }
            }
            Accumulator::Max(cur) => {
                if cur.as_ref().is_none_or(|c| compare_json(&v, c) == Ordering::Greater) {
                    *cur = Some(v);
                }
            }
            Accumulator::First(cur) => {
                if cur.is_none() {
                    *cur = Some(v);
                }
            }
        }
    }

    fn value(&self) -> Value {
        match self {
            Accumulator::Sum(sum) => sum.value(),
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) => {
                v.clone().unwrap_or(Value::Null)
            }
        }
    }
}

fn group(docs: &[Value], spec: &Map<String, Value>) -> EngineResult<Vec<Value>> {
    let key_expr = spec
        .get(ID_FIELD)
        .ok_or_else(|| pipeline_err("$group requires an _id"))?;
    let fields: Vec<(&String, &Value)> = spec.iter().filter(|(k, _)| *k != ID_FIELD).collect();

    // Accumulators are validated even when there are no documents.
    for (name, acc_spec) in &fields {
        Accumulator::parse(name, acc_spec)?;
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(Value, Vec<Accumulator>, Vec<Value>)> = Vec::new();

    for doc in docs {
        let key = eval_expr(doc, key_expr)?;
        let canonical = key.to_string();
        let slot = match index.get(&canonical) {
            Some(&i) => i,
            None => {
                let mut accs = Vec::with_capacity(fields.len());
                let mut exprs = Vec::with_capacity(fields.len());
                for (name, acc_spec) in &fields {
                    let (acc, expr) = Accumulator::parse(name, acc_spec)?;
                    accs.push(acc);
                    exprs.push(expr);
                }
                groups.push((key, accs, exprs));
                index.insert(canonical, groups.len() - 1);
                groups.len() - 1
            }
        };
        let (_, accs, exprs) = &mut groups[slot];
        for (acc, expr) in accs.iter_mut().zip(exprs.iter()) {
            acc.push(eval_expr(doc, expr)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accs, _)| {
            let mut out = Map::new();
            out.insert(ID_FIELD.to_string(), key);
            for ((name, _), acc) in fields.iter().zip(accs.iter()) {
                out.insert((*name).clone(), acc.value());
            }
            Value::Object(out)
        })
        .collect())
}

fn add_fields(doc: Value, fields: &Map<String, Value>) -> EngineResult<Value> {
    let mut computed = Vec::with_capacity(fields.len());
    for (name, expr) in fields {
        computed.push((name.clone(), eval_expr(&doc, expr)?));
    }
    let mut map = match doc {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (name, value) in computed {
        map.insert(name, value);
    }
    Ok(Value::Object(map))
}

fn is_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

fn project(doc: &Value, spec: &Map<String, Value>) -> EngineResult<Value> {
    let inclusion = spec
        .iter()
        .any(|(k, v)| k != ID_FIELD && is_flag(v) != Some(false));

    if !inclusion {
        let mut map = doc.as_object().cloned().unwrap_or_default();
        for (name, _) in spec {
            map.remove(name);
        }
        return Ok(Value::Object(map));
    }

    let mut out = Map::new();
    let keep_id = spec.get(ID_FIELD).and_then(is_flag).unwrap_or(true);
    if keep_id {
        if let Some(id) = resolve(doc, ID_FIELD) {
            out.insert(ID_FIELD.to_string(), id.clone());
        }
    }
    for (name, v) in spec {
        if name == ID_FIELD && is_flag(v).is_some() {
            continue;
        }
        match is_flag(v) {
            Some(true) => {
                if let Some(found) = resolve(doc, name) {
                    out.insert(name.clone(), found.clone());
                }
            }
            Some(false) => {
                return Err(pipeline_err(format!(
                    "cannot exclude '{}' in an inclusion projection",
                    name
                )));
            }
            None => {
                out.insert(name.clone(), eval_expr(doc, v)?);
            }
        }
    }
    Ok(Value::Object(out))
}

fn sort(mut docs: Vec<Value>, spec: &Map<String, Value>) -> EngineResult<Vec<Value>> {
    let mut keys = Vec::with_capacity(spec.len());
    for (field, dir) in spec {
        let descending = match dir.as_i64() {
            Some(1) => false,
            Some(-1) => true,
            _ => return Err(pipeline_err(format!("$sort direction for '{}' must be 1 or -1", field))),
        };
        keys.push((field.as_str(), descending));
    }
    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let av = resolve(a, field).unwrap_or(&Value::Null);
            let bv = resolve(b, field).unwrap_or(&Value::Null);
            let ord = compare_json(av, bv);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::query::{
        ACCESS_KEY, AccessPolicy, AccessScope, AggregationQuery, DateRange, MeasureSet,
        Restriction, factory_list_pipeline,
    };
    use serde_json::json;

    fn filter(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    fn inspections() -> Vec<Value> {
        vec![
            json!({"_id": "1", "factory": "Factory A", "Date": "2024-01-03", "processed quantity": 100, "total NG": 4, "scratch": 3, "dent": 1}),
            json!({"_id": "2", "factory": "Factory B", "Date": "2024-01-04", "processed quantity": 50, "total NG": 1, "scratch": 1}),
            json!({"_id": "3", "factory": "Factory A", "Date": "2024-01-31T16:00", "processed quantity": 100, "total NG": 2, "dent": 2}),
            json!({"_id": "4", "factory": "", "Date": "2024-01-05", "processed quantity": 10, "total NG": 10}),
            json!({"_id": "5", "Date": "2024-01-05", "processed quantity": 10}),
            json!({"_id": "6", "factory": "Factory C", "Date": "2024-02-10", "processed quantity": "n/a", "total NG": 0}),
        ]
    }

    fn analytics_query(restriction: Restriction, range: DateRange) -> AggregationQuery {
        AggregationQuery {
            collection: "inspections".into(),
            group_by: "factory".into(),
            access_field: "factory".into(),
            date_field: "Date".into(),
            date_range: range,
            restriction,
            measures: MeasureSet {
                quantity_field: "processed quantity".into(),
                defect_field: "total NG".into(),
                counters: vec!["scratch".into(), "dent".into()],
            },
        }
    }

    #[test]
    fn test_match_operators() {
        let doc = json!({"a": 5, "s": "x", "n": null});
        assert!(matches(&doc, &filter(json!({"a": 5}))).unwrap());
        assert!(matches(&doc, &filter(json!({"a": 5.0}))).unwrap());
        assert!(matches(&doc, &filter(json!({"a": {"$gte": 5, "$lt": 6}}))).unwrap());
        assert!(!matches(&doc, &filter(json!({"a": {"$gt": 5}}))).unwrap());
        assert!(matches(&doc, &filter(json!({"s": {"$in": ["x", "y"]}}))).unwrap());
        assert!(matches(&doc, &filter(json!({"missing": {"$nin": ["x"]}}))).unwrap());
        assert!(!matches(&doc, &filter(json!({"missing": {"$nin": [null, ""]}}))).unwrap());
        assert!(!matches(&doc, &filter(json!({"n": {"$nin": [null]}}))).unwrap());
        assert!(matches(&doc, &filter(json!({"missing": {"$exists": false}}))).unwrap());
        assert!(matches(&doc, &filter(json!({"$or": [{"a": 1}, {"s": "x"}]}))).unwrap());
        assert!(!matches(&doc, &filter(json!({"$and": [{"a": 5}, {"s": "y"}]}))).unwrap());
    }

    #[test]
    fn test_range_operators_do_not_cross_types() {
        let doc = json!({"a": "10"});
        assert!(!matches(&doc, &filter(json!({"a": {"$gt": 5}}))).unwrap());
    }

    #[test]
    fn test_unknown_operator_errors() {
        let doc = json!({"a": 1});
        let err = matches(&doc, &filter(json!({"a": {"$regex": "x"}}))).unwrap_err();
        assert!(matches!(err, DashboardError::Pipeline(_)));
    }

    #[test]
    fn test_expressions() {
        let doc = json!({"q": 200, "d": 5, "zero": 0});
        assert_eq!(eval_expr(&doc, &json!({"$divide": ["$d", "$q"]})).unwrap(), json!(0.025));
        assert_eq!(eval_expr(&doc, &json!({"$divide": ["$d", "$zero"]})).unwrap(), Value::Null);
        assert_eq!(eval_expr(&doc, &json!({"$add": ["$q", "$d", 1]})).unwrap(), json!(206.0));
        assert_eq!(eval_expr(&doc, &json!({"$ifNull": ["$missing", 7]})).unwrap(), json!(7));
        assert_eq!(
            eval_expr(&doc, &json!({"$cond": {"if": {"$gt": ["$q", 0]}, "then": "yes", "else": "no"}}))
                .unwrap(),
            json!("yes")
        );
    }

    #[test]
    fn test_sum_keeps_integers_and_ignores_non_numbers() {
        let docs = vec![json!({"k": "a", "v": 1}), json!({"k": "a", "v": "x"}), json!({"k": "a"})];
        let out = group(&docs, &filter(json!({"_id": "$k", "total": {"$sum": "$v"}}))).unwrap();
        assert_eq!(out, vec![json!({"_id": "a", "total": 1})]);

        let docs = vec![json!({"k": "a", "v": 1}), json!({"k": "a", "v": 0.5})];
        let out = group(&docs, &filter(json!({"_id": "$k", "total": {"$sum": "$v"}}))).unwrap();
        assert_eq!(out[0]["total"], json!(1.5));
    }

    #[test]
    fn test_group_min_max_first() {
        let docs = vec![
            json!({"k": 1, "v": 3}),
            json!({"k": 1, "v": 9}),
            json!({"k": 1, "v": null}),
            json!({"k": 1, "v": 1}),
        ];
        let out = group(
            &docs,
            &filter(json!({"_id": "$k", "lo": {"$min": "$v"}, "hi": {"$max": "$v"}, "first": {"$first": "$v"}})),
        )
        .unwrap();
        assert_eq!(out[0]["lo"], json!(1));
        assert_eq!(out[0]["hi"], json!(9));
        assert_eq!(out[0]["first"], json!(3));
    }

    #[test]
    fn test_group_without_id_fails() {
        assert!(group(&[], &filter(json!({"total": {"$sum": 1}}))).is_err());
        assert!(group(&[], &filter(json!({"_id": null, "total": {"$push": "$a"}}))).is_err());
    }

    #[test]
    fn test_project_inclusion_and_exclusion() {
        let doc = json!({"_id": "1", "a": 1, "b": 2, "c": {"d": 4}});
        assert_eq!(
            project(&doc, &filter(json!({"a": 1, "c.d": 1}))).unwrap(),
            json!({"_id": "1", "a": 1, "c.d": 4})
        );
        assert_eq!(
            project(&doc, &filter(json!({"_id": 0, "a": 1}))).unwrap(),
            json!({"a": 1})
        );
        assert_eq!(
            project(&doc, &filter(json!({"b": 0, "c": 0}))).unwrap(),
            json!({"_id": "1", "a": 1})
        );
        assert!(project(&doc, &filter(json!({"a": 1, "b": 0}))).is_err());
    }

    #[test]
    fn test_sort_multi_key_and_limit() {
        let docs = vec![
            json!({"a": 2, "b": "x"}),
            json!({"a": 1, "b": "z"}),
            json!({"a": 2, "b": "a"}),
            json!({"b": "m"}),
        ];
        let out = aggregate(
            docs,
            &[
                Stage::Sort(filter(json!({"a": -1, "b": 1}))),
                Stage::Limit(3),
            ],
        )
        .unwrap();
        assert_eq!(out[0]["b"], "a");
        assert_eq!(out[1]["b"], "x");
        assert_eq!(out[2]["b"], "z");
    }

    #[test]
    fn test_analytics_pipeline_end_to_end() {
        let range = DateRange::parse(Some("2024-01-01"), Some("2024-01-31")).unwrap();
        let query = analytics_query(Restriction::Unrestricted, range);
        let rows = aggregate(inspections(), &query.pipeline()).unwrap();

        assert_eq!(rows.len(), 2, "empty/missing keys and out-of-range rows dropped");
        assert_eq!(rows[0]["_id"], "Factory A");
        assert_eq!(rows[0]["totalQuantity"], json!(200));
        assert_eq!(rows[0]["totalDefects"], json!(6));
        assert_eq!(rows[0]["scratch"], json!(3));
        assert_eq!(rows[0]["dent"], json!(3));
        assert!((rows[0]["defectRate"].as_f64().unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(rows[1]["_id"], "Factory B");
        assert_eq!(rows[1]["dent"], json!(0));
    }

    #[test]
    fn test_zero_quantity_rate_is_zero_not_nan() {
        let query = analytics_query(Restriction::Only(vec!["Factory C".into()]), DateRange::default());
        let rows = aggregate(inspections(), &query.pipeline()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["totalQuantity"], json!(0));
        assert_eq!(rows[0]["defectRate"], json!(0));
    }

    #[test]
    fn test_restricted_result_is_subset_of_allowed() {
        let policy = AccessPolicy::default();
        for allowed in [vec!["Factory A"], vec!["Factory B", "Factory Z"], vec!["Nope"]] {
            let allowed: Vec<String> = allowed.into_iter().map(String::from).collect();
            let restriction = policy.restriction(&AccessScope::new("member", allowed.clone()));
            let query = analytics_query(restriction, DateRange::default());
            let rows = aggregate(inspections(), &query.pipeline()).unwrap();
            for row in rows {
                let key = row["_id"].as_str().unwrap().to_string();
                assert!(allowed.contains(&key), "{} leaked outside {:?}", key, allowed);
            }
        }
    }

    #[test]
    fn test_privileged_sees_every_group() {
        let policy = AccessPolicy::default();
        let restriction = policy.restriction(&AccessScope::new("admin", vec!["Factory A".into()]));
        let query = analytics_query(restriction, DateRange::default());
        let rows = aggregate(inspections(), &query.pipeline()).unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r["_id"].as_str().unwrap()).collect();
        assert_eq!(keys, vec!["Factory A", "Factory B", "Factory C"]);
    }

    #[test]
    fn test_factory_list_pipeline_drops_empty_keys() {
        let rows = aggregate(inspections(), &factory_list_pipeline("factory", &Restriction::Unrestricted))
            .unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r["_id"].as_str().unwrap()).collect();
        assert_eq!(keys, vec!["Factory A", "Factory B", "Factory C"]);
    }

    #[test]
    fn test_trim_expression() {
        let doc = json!({"name": "  Factory A ", "n": 3});
        assert_eq!(eval_expr(&doc, &json!({"$trim": {"input": "$name"}})).unwrap(), json!("Factory A"));
        assert_eq!(eval_expr(&doc, &json!({"$trim": {"input": "$n"}})).unwrap(), json!(3));
        assert_eq!(eval_expr(&doc, &json!({"$trim": {"input": "$missing"}})).unwrap(), Value::Null);
        assert!(eval_expr(&doc, &json!({"$trim": "$name"})).is_err());
    }

    #[test]
    fn test_padded_group_keys_merge_and_stay_visible() {
        let docs = vec![
            json!({"factory": "Factory A", "processed quantity": 10, "total NG": 1}),
            json!({"factory": " Factory A ", "processed quantity": 30, "total NG": 3}),
            json!({"factory": "Factory B", "processed quantity": 5, "total NG": 0}),
        ];
        let restriction = AccessPolicy::default()
            .restriction(&AccessScope::new("member", vec!["Factory A".into()]));
        let query = analytics_query(restriction, DateRange::default());
        let rows = aggregate(docs.clone(), &query.pipeline()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["_id"], "Factory A");
        assert_eq!(rows[0]["totalQuantity"], json!(40));
        assert!(rows[0].get(ACCESS_KEY).is_none());

        let factories = aggregate(docs, &factory_list_pipeline("factory", &Restriction::Unrestricted)).unwrap();
        let keys: Vec<&str> = factories.iter().map(|r| r["_id"].as_str().unwrap()).collect();
        assert_eq!(keys, vec!["Factory A", "Factory B"]);
    }

    #[test]
    fn test_member_grouping_by_worker_sees_only_own_factory() {
        let docs = vec![
            json!({"factory": "Factory A", "worker name": "Kim", "processed quantity": 10}),
            json!({"factory": "Factory A", "worker name": "Lee", "processed quantity": 20}),
            json!({"factory": "Factory B", "worker name": "Park", "processed quantity": 30}),
        ];
        let restriction = AccessPolicy::default()
            .restriction(&AccessScope::new("member", vec!["Factory A".into()]));
        let mut query = analytics_query(restriction, DateRange::default());
        query.group_by = "worker name".into();
        let rows = aggregate(docs, &query.pipeline()).unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r["_id"].as_str().unwrap()).collect();
        assert_eq!(keys, vec!["Kim", "Lee"]);
    }

    #[test]
    fn test_find_with_projection() {
        let out = find(
            inspections(),
            &filter(json!({"factory": "Factory A"})),
            Some(&filter(json!({"Date": 1}))),
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], json!({"_id": "1", "Date": "2024-01-03"}));
    }

    #[test]
    fn test_number_value_rejects_non_finite() {
        assert_eq!(number_value(f64::NAN), Value::Null);
        assert_eq!(number_value(f64::INFINITY), Value::Null);
        assert_eq!(number_value(1.5), json!(1.5));
    }
}
