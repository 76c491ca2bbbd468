//! Search, pagination and connection resolvers of one entity.
//!
//! Every resolver call compiles its arguments into a single [`QueryDescriptor`] and issues
//! exactly one read against the [`SearchCapability`]. Results are ordered by the requested
//! sort followed by the configured tie-breaker, which makes offsets and cursors stable.

pub(crate) mod cursor;
pub(crate) mod filter;
pub(crate) mod projection;
pub(crate) mod sort;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use self::cursor::decode_cursor;
use self::cursor::encode_cursor;
use self::filter::compile_filter;
use self::projection::project_hit;
use self::sort::compile_sort;
use crate::configuration::Limits;
use crate::error::FieldError;
use crate::error::QueryError;
use crate::mapping::TypedField;
use crate::store::ID_FIELD;
use crate::store::QueryDescriptor;
use crate::store::SearchCapability;
use crate::store::SearchResult;
use crate::store::SortClause;
use crate::store::SortOrder;
use crate::store::key_string;

/// One page of an offset pagination.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<Value>,
    /// Number of documents matching the filter.
    pub total: u64,
    pub offset: usize,
    pub limit: usize,
    pub has_next_page: bool,
}

/// A cursor connection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub edges: Vec<Edge>,
    pub page_info: PageInfo,
    pub total_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Edge {
    pub node: Value,
    pub cursor: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// The resolvers of one entity, bound to its index and the shared search capability.
#[derive(Clone)]
pub struct EntityResolvers {
    index: String,
    fields: Arc<TypedField>,
    store: Arc<dyn SearchCapability>,
    limits: Limits,
}

impl fmt::Debug for EntityResolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityResolvers")
            .field("index", &self.index)
            .field("type_name", &self.fields.name)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl EntityResolvers {
    /// Binds the resolvers of the entity described by `fields` to `index` in `store`.
    pub fn build(
        fields: Arc<TypedField>,
        index: impl Into<String>,
        store: Arc<dyn SearchCapability>,
        limits: Limits,
    ) -> Self {
        Self {
            index: index.into(),
            fields,
            store,
            limits,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn fields(&self) -> &TypedField {
        &self.fields
    }

    /// The matching documents, in sort order, up to `limit`.
    pub async fn search(
        &self,
        filter: Option<&Value>,
        sort: Option<&Value>,
        limit: Option<i64>,
    ) -> Result<Vec<Value>, FieldError> {
        let (query, sort) = self.compile(filter, sort)?;
        let size = self.limit("limit", limit)?;
        let result = self.execute(query, sort, 0, size, None).await?;
        Ok(self.items(&result))
    }

    /// One page of matching documents plus the total number of matches.
    ///
    /// An offset past the last match yields an empty page.
    pub async fn paginate(
        &self,
        filter: Option<&Value>,
        sort: Option<&Value>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Page, FieldError> {
        let (query, sort) = self.compile(filter, sort)?;
        let offset = non_negative("offset", offset.unwrap_or(0))?;
        let limit = self.limit("limit", limit)?;
        let result = self.execute(query, sort, offset, limit, None).await?;
        let items = self.items(&result);
        Ok(Page {
            has_next_page: ((offset + items.len()) as u64) < result.total,
            items,
            total: result.total,
            offset,
            limit,
        })
    }

    /// Forward cursor pagination: the first `first` matches after the position `after`.
    ///
    /// One more hit than requested is read to tell whether a next page exists.
    pub async fn connect(
        &self,
        filter: Option<&Value>,
        sort: Option<&Value>,
        first: Option<i64>,
        after: Option<&str>,
    ) -> Result<Connection, FieldError> {
        let (query, sort) = self.compile(filter, sort)?;
        let first = self.limit("first", first)?;
        let search_after = after
            .map(|cursor| decode_cursor(cursor, &sort))
            .transpose()?;
        let has_previous_page = search_after.is_some();
        let result = self
            .execute(query, sort.clone(), 0, first + 1, search_after)
            .await?;
        let has_next_page = result.hits.len() > first;
        let edges: Vec<Edge> = result
            .hits
            .iter()
            .take(first)
            .map(|hit| Edge {
                node: project_hit(hit, &self.fields),
                cursor: encode_cursor(&sort, &hit.sort),
            })
            .collect();
        Ok(Connection {
            page_info: PageInfo {
                has_next_page,
                has_previous_page,
                start_cursor: edges.first().map(|edge| edge.cursor.clone()),
                end_cursor: edges.last().map(|edge| edge.cursor.clone()),
            },
            edges,
            total_count: result.total,
        })
    }

    /// Documents whose `key_field` holds one of `keys`, by key.
    ///
    /// Keys without a document are absent from the result.
    pub async fn find_by_keys(
        &self,
        key_field: &str,
        keys: &IndexSet<String>,
    ) -> Result<HashMap<String, Value>, FieldError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let path = if key_field == ID_FIELD {
            ID_FIELD
        } else {
            self.fields
                .child(key_field)
                .filter(|field| field.scalar_type().is_some())
                .map(|field| field.path.as_str())
                .ok_or_else(|| QueryError::UnknownField {
                    field: key_field.to_string(),
                    context: "entity key",
                })?
        };
        let query = json!({ "terms": { (path): keys.iter().collect::<Vec<_>>() } });
        let sort = vec![SortClause::new(ID_FIELD, SortOrder::Asc)];
        let result = self.execute(query, sort, 0, keys.len(), None).await?;
        let mut found = HashMap::with_capacity(keys.len());
        for item in self.items(&result) {
            if let Some(key) = item.get(key_field).and_then(key_string) {
                found.entry(key).or_insert(item);
            }
        }
        Ok(found)
    }

    fn compile(
        &self,
        filter: Option<&Value>,
        sort: Option<&Value>,
    ) -> Result<(Value, Vec<SortClause>), QueryError> {
        let query = compile_filter(filter, &self.fields)?;
        let sort = compile_sort(sort, &self.fields, &self.limits.tie_breaker)?;
        Ok((query, sort))
    }

    fn limit(&self, argument: &str, requested: Option<i64>) -> Result<usize, QueryError> {
        let Some(requested) = requested else {
            return Ok(self.limits.default_limit);
        };
        let requested = non_negative(argument, requested)?;
        if requested > self.limits.max_limit {
            tracing::warn!(
                index = %self.index,
                requested,
                max_limit = self.limits.max_limit,
                "{argument} is clamped to the maximum page size"
            );
            return Ok(self.limits.max_limit);
        }
        Ok(requested)
    }

    async fn execute(
        &self,
        query: Value,
        sort: Vec<SortClause>,
        from: usize,
        size: usize,
        search_after: Option<Vec<Value>>,
    ) -> Result<SearchResult, FieldError> {
        let descriptor = QueryDescriptor {
            query,
            sort,
            from,
            size,
            search_after,
        };
        tracing::debug!(index = %self.index, from, size, "searching index");
        Ok(self.store.execute_query(&self.index, &descriptor).await?)
    }

    fn items(&self, result: &SearchResult) -> Vec<Value> {
        result
            .hits
            .iter()
            .map(|hit| project_hit(hit, &self.fields))
            .collect()
    }
}

fn non_negative(argument: &str, value: i64) -> Result<usize, QueryError> {
    usize::try_from(value).map_err(|_| QueryError::InvalidArgument {
        argument: argument.to_string(),
        reason: format!("must not be negative, got {value}"),
    })
}
