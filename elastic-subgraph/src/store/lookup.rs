//! A [`BatchLookup`] answering relations from an index of the search capability.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexSet;
use serde_json::Value;
use serde_json::json;

use super::BatchLookup;
use super::ID_FIELD;
use super::QueryDescriptor;
use super::SearchCapability;
use super::SortClause;
use super::SortOrder;
use super::key_string;
use crate::error::LookupError;
use crate::mapping::TypedField;
use crate::resolvers::projection::project_hit;

/// Where the related documents of one relation live.
#[derive(Clone, Debug)]
pub struct RelationTarget {
    pub index: String,
    /// Store path of the field holding the parent id.
    pub foreign_key: String,
    /// Typed tree of the related entity, used to shape the documents.
    pub fields: Arc<TypedField>,
}

/// Resolves each relation batch with a `terms` query on the foreign key.
///
/// Hits are read in `_id` order. When a page is full, the next one resumes after its last
/// hit and only asks for the parents that have fewer than `max_related` documents, so a
/// parent with many related documents never crowds out the others.
pub struct StoreRelationLookup {
    store: Arc<dyn SearchCapability>,
    relations: HashMap<String, RelationTarget>,
    max_related: usize,
}

impl fmt::Debug for StoreRelationLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRelationLookup")
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .field("max_related", &self.max_related)
            .finish_non_exhaustive()
    }
}

impl StoreRelationLookup {
    pub fn new(store: Arc<dyn SearchCapability>, max_related: usize) -> Self {
        Self {
            store,
            relations: HashMap::new(),
            max_related,
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>, target: RelationTarget) -> Self {
        self.relations.insert(relation.into(), target);
        self
    }

    pub fn add_relation(&mut self, relation: impl Into<String>, target: RelationTarget) {
        self.relations.insert(relation.into(), target);
    }
}

#[async_trait]
impl BatchLookup for StoreRelationLookup {
    async fn lookup_many(
        &self,
        relation: &str,
        ids: &IndexSet<String>,
    ) -> Result<HashMap<String, Option<Vec<Value>>>, LookupError> {
        let target = self
            .relations
            .get(relation)
            .ok_or_else(|| LookupError::UnknownRelation(relation.to_string()))?;
        let mut related: HashMap<String, Option<Vec<Value>>> =
            ids.iter().map(|id| (id.clone(), None)).collect();
        if self.max_related == 0 {
            return Ok(related);
        }
        // parents that may still receive documents
        let mut open: IndexSet<String> = ids.clone();
        let mut search_after = None;
        while !open.is_empty() {
            let mut descriptor = QueryDescriptor::new(json!({
                "terms": { (target.foreign_key.as_str()): open.iter().collect::<Vec<_>>() }
            }));
            descriptor.sort = vec![SortClause::new(ID_FIELD, SortOrder::Asc)];
            descriptor.size = open.len().saturating_mul(self.max_related);
            descriptor.search_after = search_after.take();
            let result = self
                .store
                .execute_query(&target.index, &descriptor)
                .await
                .map_err(|e| LookupError::Failed {
                    relation: relation.to_string(),
                    reason: e.to_string(),
                })?;

            for hit in &result.hits {
                let document = project_hit(hit, &target.fields);
                for parent in foreign_keys(&hit.source, &target.foreign_key) {
                    if !open.contains(&parent) {
                        continue;
                    }
                    if let Some(slot) = related.get_mut(&parent) {
                        let documents = slot.get_or_insert_with(Vec::new);
                        documents.push(document.clone());
                        if documents.len() >= self.max_related {
                            open.swap_remove(&parent);
                        }
                    }
                }
            }
            match result.hits.last() {
                Some(last) if result.hits.len() == descriptor.size => {
                    search_after = Some(last.sort.clone());
                }
                _ => break,
            }
            tracing::debug!(
                relation,
                open = open.len(),
                "related documents continue on the next page"
            );
        }
        Ok(related)
    }
}

/// String forms of the values at a dotted path, looking through arrays.
fn foreign_keys(source: &serde_json::Map<String, Value>, path: &str) -> Vec<String> {
    let mut current: Vec<&Value> = Vec::new();
    for (depth, segment) in path.split('.').enumerate() {
        let next: Vec<&Value> = if depth == 0 {
            source.get(segment).into_iter().collect()
        } else {
            current
                .iter()
                .filter_map(|value| value.get(segment))
                .collect()
        };
        current = next
            .into_iter()
            .flat_map(|value| match value {
                Value::Array(items) => items.iter().collect(),
                value => vec![value],
            })
            .collect();
    }
    current.into_iter().filter_map(key_string).collect()
}
