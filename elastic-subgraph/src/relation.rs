//! Per-request batching of relation lookups.
//!
//! A [`RelationBatcher`] accumulates the parent ids requested for each relation and turns
//! them into one [`BatchLookup::lookup_many`] call per relation when flushed. Results are
//! memoized for the lifetime of the batcher, which is one request: asking again for the
//! same parent never causes more I/O, and nothing is shared between requests.
//!
//! The executor drives batching explicitly ([`enqueue`](RelationBatcher::enqueue) during a
//! resolution pass, [`flush`](RelationBatcher::flush) at its end). Independent callers can
//! use [`resolve_relation`](RelationBatcher::resolve_relation), which yields once before
//! flushing so that concurrent callers polled in the same round share the batch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use futures::future::join_all;
use indexmap::IndexMap;
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::LookupError;
use crate::store::BatchLookup;

type BatchResult = Result<Arc<HashMap<String, Option<Vec<Value>>>>, LookupError>;
type Batch = Shared<BoxFuture<'static, BatchResult>>;

/// Related documents of one parent; `None` when there are none.
pub type Related = Option<Vec<Value>>;

pub struct RelationBatcher {
    lookup: Arc<dyn BatchLookup>,
    state: Mutex<BatcherState>,
}

#[derive(Default)]
struct BatcherState {
    /// Ids queued since the last flush, per relation.
    pending: IndexMap<String, IndexSet<String>>,
    /// The batch answering each (relation, id) that was flushed, in flight or done.
    batches: HashMap<String, HashMap<String, Batch>>,
}

impl fmt::Debug for RelationBatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RelationBatcher")
            .field("pending", &state.pending)
            .field("relations", &state.batches.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RelationBatcher {
    pub fn new(lookup: Arc<dyn BatchLookup>) -> Self {
        Self {
            lookup,
            state: Mutex::new(BatcherState::default()),
        }
    }

    /// Queues `parent_id` for the next flush of `relation`, unless it is already known.
    pub fn enqueue(&self, relation: &str, parent_id: &str) {
        let mut state = self.state.lock();
        let known = state
            .batches
            .get(relation)
            .is_some_and(|batches| batches.contains_key(parent_id));
        if !known {
            state
                .pending
                .entry(relation.to_string())
                .or_default()
                .insert(parent_id.to_string());
        }
    }

    /// Issues one lookup per relation with queued ids and waits for all of them.
    pub async fn flush(&self) {
        let started: Vec<Batch> = {
            let mut state = self.state.lock();
            let pending = std::mem::take(&mut state.pending);
            let mut started = Vec::with_capacity(pending.len());
            for (relation, ids) in pending {
                tracing::debug!(relation = %relation, ids = ids.len(), "flushing relation batch");
                let lookup = self.lookup.clone();
                let batch_relation = relation.clone();
                let batch_ids = ids.clone();
                let batch: Batch = async move {
                    lookup
                        .lookup_many(&batch_relation, &batch_ids)
                        .await
                        .map(Arc::new)
                }
                .boxed()
                .shared();
                let batches = state.batches.entry(relation).or_default();
                for id in ids {
                    batches.insert(id, batch.clone());
                }
                started.push(batch);
            }
            started
        };
        join_all(started).await;
    }

    /// The result for a parent whose batch has completed, `None` otherwise.
    pub fn get(&self, relation: &str, parent_id: &str) -> Option<Result<Related, LookupError>> {
        let state = self.state.lock();
        let batch = state.batches.get(relation)?.get(parent_id)?;
        batch
            .peek()
            .map(|result| related_of(result.clone(), parent_id))
    }

    /// Resolves the related documents of one parent, coalescing with every other request for
    /// the same relation made before the batch is flushed.
    ///
    /// A missing parent id, or a parent without related documents, resolves to `None`.
    pub async fn resolve_relation(
        &self,
        parent_id: Option<&str>,
        relation: &str,
    ) -> Result<Related, LookupError> {
        let Some(parent_id) = parent_id else {
            return Ok(None);
        };
        self.enqueue(relation, parent_id);
        tokio::task::yield_now().await;
        self.flush().await;
        let batch = {
            let state = self.state.lock();
            state
                .batches
                .get(relation)
                .and_then(|batches| batches.get(parent_id))
                .cloned()
        };
        match batch {
            Some(batch) => related_of(batch.await, parent_id),
            None => Ok(None),
        }
    }
}

fn related_of(result: BatchResult, parent_id: &str) -> Result<Related, LookupError> {
    let related = result?;
    Ok(related
        .get(parent_id)
        .cloned()
        .flatten()
        .filter(|documents| !documents.is_empty()))
}
