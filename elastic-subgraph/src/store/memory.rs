//! An in-memory document store.
//!
//! Evaluates the subset of the store query DSL generated by this crate (`bool`, `term`,
//! `terms`, `ids`, `range`, `match`, `exists`, `geo_distance`, `nested`, `match_all`) with the
//! store's sort semantics: missing values sort last, multi-valued fields sort by their
//! minimum (ascending) or maximum (descending), `search_after` resumes strictly after a
//! sort position. Every executed query is recorded.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use parking_lot::RwLock;
use serde_json::Map;
use serde_json::Value;

use super::ID_FIELD;
use super::QueryDescriptor;
use super::SearchCapability;
use super::SearchHit;
use super::SearchResult;
use super::SortClause;
use super::SortOrder;
use super::parse_geo_point;
use crate::error::StoreError;

const EARTH_RADIUS_KM: f64 = 6371.0088;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    indices: RwLock<HashMap<String, Vec<StoredDocument>>>,
    executed: Mutex<Vec<(String, QueryDescriptor)>>,
    unavailable: Mutex<Option<String>>,
}

#[derive(Clone, Debug)]
struct StoredDocument {
    id: String,
    source: Map<String, Value>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `index` if needed, so that searching it succeeds even while it is empty.
    pub fn create_index(&self, index: &str) {
        self.indices.write().entry(index.to_string()).or_default();
    }

    /// Adds or replaces a document. Non-object sources are stored as empty documents.
    pub fn insert(&self, index: &str, id: impl Into<String>, source: Value) {
        let id = id.into();
        let source = match source {
            Value::Object(source) => source,
            _ => Map::new(),
        };
        let mut indices = self.indices.write();
        let documents = indices.entry(index.to_string()).or_default();
        match documents.iter_mut().find(|doc| doc.id == id) {
            Some(existing) => existing.source = source,
            None => documents.push(StoredDocument { id, source }),
        }
    }

    /// Makes every following query fail with [`StoreError::Unavailable`], or heals the store.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.lock() = reason.map(str::to_string);
    }

    /// Every query executed so far, with the index it targeted.
    pub fn executed_queries(&self) -> Vec<(String, QueryDescriptor)> {
        self.executed.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.executed.lock().len()
    }

    pub fn clear_executed_queries(&self) {
        self.executed.lock().clear();
    }
}

#[async_trait]
impl SearchCapability for InMemoryStore {
    async fn execute_query(
        &self,
        index: &str,
        query: &QueryDescriptor,
    ) -> Result<SearchResult, StoreError> {
        self.executed
            .lock()
            .push((index.to_string(), query.clone()));
        if let Some(reason) = self.unavailable.lock().clone() {
            return Err(StoreError::Unavailable(reason));
        }
        let indices = self.indices.read();
        let documents = indices
            .get(index)
            .ok_or_else(|| StoreError::MissingIndex(index.to_string()))?;

        let mut matched = Vec::new();
        for document in documents {
            if matches(&query.query, document)? {
                let key = sort_key(document, &query.sort);
                matched.push((key, document));
            }
        }
        let total = matched.len() as u64;
        matched.sort_by(|(a, _), (b, _)| compare_keys(a, b, &query.sort));
        if let Some(after) = &query.search_after {
            if after.len() != query.sort.len() {
                return Err(StoreError::Rejected(format!(
                    "search_after has {} values but the query sorts on {} fields",
                    after.len(),
                    query.sort.len()
                )));
            }
            matched.retain(|(key, _)| compare_keys(key, after, &query.sort) == Ordering::Greater);
        }
        let hits = matched
            .into_iter()
            .skip(query.from)
            .take(query.size)
            .map(|(sort, document)| SearchHit {
                id: document.id.clone(),
                source: document.source.clone(),
                sort,
            })
            .collect();
        Ok(SearchResult { hits, total })
    }
}

fn rejected(reason: impl Into<String>) -> StoreError {
    StoreError::Rejected(reason.into())
}

/// Splits `{"<kind>": body}` into its single entry.
fn single_entry(value: &Value) -> Result<(&str, &Value), StoreError> {
    match value.as_object() {
        Some(object) if object.len() == 1 => object
            .iter()
            .next()
            .map(|(key, body)| (key.as_str(), body))
            .ok_or_else(|| rejected("empty clause")),
        _ => Err(rejected(format!("expected a single-key clause, got {value}"))),
    }
}

fn matches(clause: &Value, document: &StoredDocument) -> Result<bool, StoreError> {
    let (kind, body) = single_entry(clause)?;
    match kind {
        "match_all" => Ok(true),
        "bool" => matches_bool(body, document),
        "ids" => {
            let values = body
                .get("values")
                .and_then(Value::as_array)
                .ok_or_else(|| rejected("ids requires values"))?;
            Ok(values.iter().any(|value| value.as_str() == Some(&document.id)))
        }
        "exists" => {
            let field = body
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| rejected("exists requires a field"))?;
            Ok(!field_values(document, field).is_empty())
        }
        "term" => {
            let (field, expected) = single_entry(body)?;
            let expected = expected.get("value").unwrap_or(expected);
            Ok(field_values(document, field)
                .iter()
                .any(|value| values_equal(value, expected)))
        }
        "terms" => {
            let (field, expected) = single_entry(body)?;
            let expected = expected
                .as_array()
                .ok_or_else(|| rejected("terms requires an array"))?;
            Ok(field_values(document, field)
                .iter()
                .any(|value| expected.iter().any(|e| values_equal(value, e))))
        }
        "range" => {
            let (field, bounds) = single_entry(body)?;
            let bounds = bounds
                .as_object()
                .ok_or_else(|| rejected("range requires bounds"))?;
            Ok(field_values(document, field)
                .iter()
                .any(|value| within_bounds(value, bounds)))
        }
        "match" => {
            let (field, query) = single_entry(body)?;
            let query = query.get("query").unwrap_or(query);
            let wanted = tokens(&value_text(query));
            Ok(field_values(document, field).iter().any(|value| {
                let present = tokens(&value_text(value));
                wanted.iter().any(|token| present.contains(token))
            }))
        }
        "geo_distance" => matches_geo_distance(body, document),
        "nested" => {
            let path = body
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| rejected("nested requires a path"))?;
            let query = body
                .get("query")
                .ok_or_else(|| rejected("nested requires a query"))?;
            for element in field_values(document, path) {
                if element.is_object() && matches(query, &narrowed(document, path, element))? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(rejected(format!("unsupported query clause `{other}`"))),
    }
}

fn matches_bool(body: &Value, document: &StoredDocument) -> Result<bool, StoreError> {
    let clauses = |name: &str| -> Vec<&Value> {
        match body.get(name) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(item @ Value::Object(_)) => vec![item],
            _ => Vec::new(),
        }
    };
    let required: Vec<&Value> = clauses("must")
        .into_iter()
        .chain(clauses("filter"))
        .collect();
    for clause in &required {
        if !matches(clause, document)? {
            return Ok(false);
        }
    }
    for clause in clauses("must_not") {
        if matches(clause, document)? {
            return Ok(false);
        }
    }
    let should = clauses("should");
    let minimum = body
        .get("minimum_should_match")
        .and_then(Value::as_u64)
        .unwrap_or(if required.is_empty() && !should.is_empty() {
            1
        } else {
            0
        });
    let mut satisfied = 0;
    for clause in should {
        if matches(clause, document)? {
            satisfied += 1;
        }
    }
    Ok(satisfied >= minimum)
}

fn matches_geo_distance(body: &Value, document: &StoredDocument) -> Result<bool, StoreError> {
    let body = body
        .as_object()
        .ok_or_else(|| rejected("geo_distance requires an object"))?;
    let distance_km = body
        .get("distance")
        .and_then(parse_distance_km)
        .ok_or_else(|| rejected("geo_distance requires a distance"))?;
    let (field, origin) = body
        .iter()
        .find(|(key, _)| key.as_str() != "distance")
        .ok_or_else(|| rejected("geo_distance requires a field"))?;
    let origin = parse_geo_point(origin).ok_or_else(|| rejected("invalid geo_distance origin"))?;
    Ok(geo_points(document, field)
        .into_iter()
        .any(|point| haversine_km(origin, point) <= distance_km))
}

/// Geo points at `path`. A pair of numbers is a single point in `[lon, lat]` form.
fn geo_points(document: &StoredDocument, path: &str) -> Vec<(f64, f64)> {
    let values = field_values(document, path);
    if values.len() == 2 && values.iter().all(Value::is_number) {
        return parse_geo_point(&Value::Array(values)).into_iter().collect();
    }
    values.iter().filter_map(parse_geo_point).collect()
}

/// A copy of `document` where the `nested` object at `path` holds only `element`, so that
/// every clause of a `nested` query is checked against the same element.
fn narrowed(document: &StoredDocument, path: &str, element: Value) -> StoredDocument {
    let mut source = document.source.clone();
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().unwrap_or(path);
    let mut current = &mut source;
    for segment in segments {
        let slot = current
            .entry(segment)
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(next) => next,
            _ => return document.clone(),
        };
    }
    current.insert(last.to_string(), element);
    StoredDocument {
        id: document.id.clone(),
        source,
    }
}

/// All values found at a dotted path, looking through arrays of objects.
///
/// A path that continues below a scalar (`title.keyword`) addresses a multi-field of that
/// scalar and resolves to the scalar itself.
fn field_values(document: &StoredDocument, path: &str) -> Vec<Value> {
    if path == ID_FIELD {
        return vec![Value::String(document.id.clone())];
    }
    let mut segments = path.split('.');
    let mut current: Vec<&Value> = match segments.next() {
        Some(first) => flatten(document.source.get(first)),
        None => return Vec::new(),
    };
    for segment in segments {
        if !current.is_empty() && current.iter().all(|value| !value.is_object()) {
            break;
        }
        current = current
            .iter()
            .filter_map(|value| value.as_object().and_then(|object| object.get(segment)))
            .flat_map(|value| flatten(Some(value)))
            .collect();
    }
    current.into_iter().cloned().collect()
}

fn flatten(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter(|item| !item.is_null()).collect(),
        Some(value) => vec![value],
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::Number(b)) | (Value::Number(b), Value::String(a)) => {
            a.parse::<f64>().ok() == b.as_f64()
        }
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn within_bounds(value: &Value, bounds: &Map<String, Value>) -> bool {
    bounds.iter().all(|(operator, bound)| {
        let Some(ordering) = compare_values(value, bound) else {
            return false;
        };
        match operator.as_str() {
            "gt" => ordering == Ordering::Greater,
            "gte" => ordering != Ordering::Less,
            "lt" => ordering == Ordering::Less,
            "lte" => ordering != Ordering::Greater,
            _ => false,
        }
    })
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn parse_distance_km(value: &Value) -> Option<f64> {
    match value {
        Value::Number(meters) => Some(meters.as_f64()? / 1000.0),
        Value::String(text) => {
            let text = text.trim();
            if let Some(km) = text.strip_suffix("km") {
                km.trim().parse().ok()
            } else if let Some(m) = text.strip_suffix('m') {
                m.trim().parse::<f64>().ok().map(|m| m / 1000.0)
            } else {
                text.parse::<f64>().ok().map(|m| m / 1000.0)
            }
        }
        _ => None,
    }
}

fn haversine_km((lat1, lon1): (f64, f64), (lat2, lon2): (f64, f64)) -> f64 {
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

fn sort_key(document: &StoredDocument, sort: &[SortClause]) -> Vec<Value> {
    sort.iter()
        .map(|clause| {
            let values = field_values(document, &clause.field);
            let wanted = match clause.order {
                SortOrder::Asc => Ordering::Less,
                SortOrder::Desc => Ordering::Greater,
            };
            values
                .into_iter()
                .reduce(|best, value| {
                    if compare_values(&value, &best) == Some(wanted) {
                        value
                    } else {
                        best
                    }
                })
                .unwrap_or(Value::Null)
        })
        .collect()
}

fn compare_keys(a: &[Value], b: &[Value], sort: &[SortClause]) -> Ordering {
    for ((a, b), clause) in a.iter().zip(b).zip(sort) {
        let ordering = match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            // missing values sort last in both directions
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ordering = compare_values(a, b).unwrap_or(Ordering::Equal);
                match clause.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
