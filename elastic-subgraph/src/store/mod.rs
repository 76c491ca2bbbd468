//! Capabilities consumed from the document store.
//!
//! The subgraph never talks to a store driver directly: it issues [`QueryDescriptor`]s
//! through a [`SearchCapability`] and resolves relations through a [`BatchLookup`].
//! Both are shared, read-only, and called concurrently without locking.

pub mod lookup;
pub mod memory;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use indexmap::IndexSet;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::error::LookupError;
use crate::error::StoreError;

/// Field holding the document identity, both in queries and in generated types.
pub const ID_FIELD: &str = "_id";

/// The string form of a key value, as used to group documents by key.
pub(crate) fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(key) => Some(key.clone()),
        Value::Number(key) => Some(key.to_string()),
        Value::Bool(key) => Some(key.to_string()),
        _ => None,
    }
}

/// Reads a geo point stored as `{lat, lon}`, `"lat,lon"` or `[lon, lat]`.
pub(crate) fn parse_geo_point(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::Object(point) => Some((point.get("lat")?.as_f64()?, point.get("lon")?.as_f64()?)),
        Value::String(text) => {
            let (lat, lon) = text.split_once(',')?;
            Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
        }
        Value::Array(pair) if pair.len() == 2 => Some((pair[1].as_f64()?, pair[0].as_f64()?)),
        _ => None,
    }
}

/// Executes searches against an index.
#[async_trait]
pub trait SearchCapability: Send + Sync {
    async fn execute_query(
        &self,
        index: &str,
        query: &QueryDescriptor,
    ) -> Result<SearchResult, StoreError>;
}

/// Resolves the related documents of many parents at once.
///
/// Parents without related documents may be absent from the returned map or map to `None`.
#[async_trait]
pub trait BatchLookup: Send + Sync {
    async fn lookup_many(
        &self,
        relation: &str,
        ids: &IndexSet<String>,
    ) -> Result<HashMap<String, Option<Vec<Value>>>, LookupError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One sort criterion, on a store field path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortClause {
    pub field: String,
    pub order: SortOrder,
    /// Path of the innermost `nested` object holding `field`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_path: Option<String>,
}

impl SortClause {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
            nested_path: None,
        }
    }

    pub fn with_nested_path(mut self, path: impl Into<String>) -> Self {
        self.nested_path = Some(path.into());
        self
    }
}

impl fmt::Display for SortClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.order {
            SortOrder::Asc => write!(f, "{}:asc", self.field),
            SortOrder::Desc => write!(f, "{}:desc", self.field),
        }
    }
}

/// A structured search: a store-native query clause plus sort, paging and resume position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Query clause in the store's query DSL.
    pub query: Value,
    pub sort: Vec<SortClause>,
    pub from: usize,
    pub size: usize,
    /// Sort values of the last hit seen; only hits strictly after it are returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_after: Option<Vec<Value>>,
}

impl QueryDescriptor {
    pub fn new(query: Value) -> Self {
        Self {
            query,
            sort: Vec::new(),
            from: 0,
            size: 10,
            search_after: None,
        }
    }

    /// The `_search` request body a store driver sends for this descriptor.
    pub fn to_request_body(&self) -> Value {
        let sort: Vec<Value> = self
            .sort
            .iter()
            .map(|clause| {
                let order = match clause.order {
                    SortOrder::Asc => "asc",
                    SortOrder::Desc => "desc",
                };
                let mut options = json!({ "order": order });
                if let (Some(path), Value::Object(options)) = (&clause.nested_path, &mut options) {
                    options.insert("nested".to_string(), json!({ "path": path }));
                }
                json!({ (clause.field.clone()): options })
            })
            .collect();
        let mut body = json!({
            "query": self.query,
            "sort": sort,
            "from": self.from,
            "size": self.size,
            "track_total_hits": true,
        });
        if let (Some(after), Value::Object(body)) = (&self.search_after, &mut body) {
            body.insert("search_after".to_string(), Value::Array(after.clone()));
        }
        body
    }
}

/// One matching document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub source: Map<String, Value>,
    /// Values of the requested sort clauses for this hit, in clause order.
    #[serde(default)]
    pub sort: Vec<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    /// Number of documents matching the query, regardless of paging.
    pub total: u64,
}
