use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use elastic_subgraph::Request;
use elastic_subgraph::build_federated_schema;
use elastic_subgraph::error::LookupError;
use elastic_subgraph::store::BatchLookup;
use indexmap::IndexSet;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;

use crate::common;

const CONTENT_QUERY: &str = r#"
query($representations: [_Any!]!) {
  _entities(representations: $representations) {
    ... on Content {
      id
      related { _id title }
    }
  }
}
"#;

/// Answers every relation with one document per id, except `c3` which has none.
#[derive(Default)]
struct CountingLookup {
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl BatchLookup for CountingLookup {
    async fn lookup_many(
        &self,
        relation: &str,
        ids: &IndexSet<String>,
    ) -> Result<HashMap<String, Option<Vec<Value>>>, LookupError> {
        self.calls
            .lock()
            .push((relation.to_string(), ids.iter().cloned().collect()));
        Ok(ids
            .iter()
            .map(|id| {
                let documents = (id != "c3")
                    .then(|| vec![json!({"_id": format!("{id}-a"), "title": format!("About {id}")})]);
                (id.clone(), documents)
            })
            .collect())
    }
}

#[test]
fn composes_subgraph_sdl() {
    let schema =
        build_federated_schema(&common::configuration(), common::store(), None).unwrap();
    let sdl = schema.sdl();
    assert!(sdl.contains("type Ecommerce @key(fields: \"order_id\")"));
    assert!(sdl.contains("ecommerceSearch("));
    assert!(sdl.contains("ecommercePagination("));
    assert!(sdl.contains("articleConnection("));
    assert!(sdl.contains(
        "extend type Content @key(fields: \"id\") {\n  id: ID! @external\n  ecommerces: [Ecommerce]\n  related: [Article]\n}"
    ));
    for bookkeeping in ["_index", "_score", "_shard", "_version"] {
        assert!(!sdl.contains(bookkeeping), "{bookkeeping} leaked into the SDL");
    }
    // the prelude is added when serving, not published
    assert!(!sdl.contains("scalar _Any"));
    assert!(schema.to_string().contains("_entities(representations: [_Any!]!): [_Entity]!"));

    let mut entity_types: Vec<&str> = schema.entity_types().collect();
    entity_types.sort_unstable();
    assert_eq!(entity_types, ["Content", "Ecommerce"]);
}

#[tokio::test]
async fn relation_fields_are_resolved_in_one_batch() {
    let lookup = Arc::new(CountingLookup::default());
    let schema = build_federated_schema(
        &common::configuration(),
        common::store(),
        Some(lookup.clone()),
    )
    .unwrap();
    let request = Request::new(CONTENT_QUERY).with_variables(json!({"representations": [
        {"__typename": "Content", "id": "c1"},
        {"__typename": "Content", "id": "c2"},
        {"__typename": "Content", "id": "c3"},
        {"__typename": "Content", "id": "c1"}
    ]}));
    let response = schema.execute(&request).await;
    assert_eq!(response.errors, vec![]);
    assert_eq!(
        response.data,
        Some(json!({"_entities": [
            {"id": "c1", "related": [{"_id": "c1-a", "title": "About c1"}]},
            {"id": "c2", "related": [{"_id": "c2-a", "title": "About c2"}]},
            {"id": "c3", "related": null},
            {"id": "c1", "related": [{"_id": "c1-a", "title": "About c1"}]}
        ]}))
    );
    assert_eq!(
        *lookup.calls.lock(),
        vec![(
            "Content.related".to_string(),
            vec!["c1".to_string(), "c2".to_string(), "c3".to_string()]
        )]
    );
}

#[tokio::test]
async fn relation_batches_are_not_shared_between_requests() {
    let lookup = Arc::new(CountingLookup::default());
    let schema = build_federated_schema(
        &common::configuration(),
        common::store(),
        Some(lookup.clone()),
    )
    .unwrap();
    let request = Request::new(CONTENT_QUERY).with_variables(json!({"representations": [
        {"__typename": "Content", "id": "c2"}
    ]}));
    let (first, second) = futures::join!(schema.execute(&request), schema.execute(&request));
    assert_eq!(first, second);
    assert_eq!(lookup.calls.lock().len(), 2);
}

#[tokio::test]
async fn store_lookup_groups_documents_by_foreign_key() {
    let store = common::store();
    let schema =
        build_federated_schema(&common::configuration(), store.clone(), None).unwrap();
    let request = Request::new(
        r#"query($representations: [_Any!]!) {
          _entities(representations: $representations) {
            ... on Content {
              id
              ecommerces { order_id customer_first_name }
              related { title }
            }
          }
        }"#,
    )
    .with_variables(json!({"representations": [
        {"__typename": "Content", "id": "ZO0299602996"},
        {"__typename": "Content", "id": "c1"}
    ]}));
    let response = schema.execute(&request).await;
    assert_eq!(response.errors, vec![]);
    assert_eq!(
        response.data,
        Some(json!({"_entities": [
            {
                "id": "ZO0299602996",
                "ecommerces": [
                    {"order_id": "584677", "customer_first_name": "Eddie"},
                    {"order_id": "584021", "customer_first_name": "Mary"}
                ],
                "related": null
            },
            {
                "id": "c1",
                "ecommerces": null,
                "related": [{"title": "Autumn collection"}, {"title": "Care instructions"}]
            }
        ]}))
    );
    // one read per relation
    assert_eq!(store.query_count(), 2);
}

#[tokio::test]
async fn failed_lookups_only_null_the_relation() {
    let store = common::store();
    let schema =
        build_federated_schema(&common::configuration(), store.clone(), None).unwrap();
    store.set_unavailable(Some("maintenance"));
    let request = Request::new(CONTENT_QUERY).with_variables(json!({"representations": [
        {"__typename": "Content", "id": "c1"},
        {"__typename": "Content", "id": "c2"}
    ]}));
    let response = schema.execute(&request).await;
    assert_eq!(
        response.data,
        Some(json!({"_entities": [
            {"id": "c1", "related": null},
            {"id": "c2", "related": null}
        ]}))
    );
    assert_eq!(response.errors.len(), 2);
    for (index, error) in response.errors.iter().enumerate() {
        assert_eq!(error.extensions["code"], json!("LOOKUP_ERROR"));
        assert_eq!(
            serde_json::to_value(&error.path).unwrap(),
            json!(["_entities", index, "related"])
        );
    }
}

#[tokio::test]
async fn local_entities_resolve_by_key() {
    let store = common::store();
    let schema =
        build_federated_schema(&common::configuration(), store.clone(), None).unwrap();
    let request = Request::new(
        r#"query($representations: [_Any!]!) {
          _entities(representations: $representations) {
            __typename
            ... on Ecommerce { customer_full_name products { product_name } }
          }
        }"#,
    )
    .with_variables(json!({"representations": [
        {"__typename": "Ecommerce", "order_id": "584021"},
        {"__typename": "Unknown", "id": "1"},
        {"__typename": "Ecommerce", "order_id": "584058"}
    ]}));
    let response = schema.execute(&request).await;
    assert_eq!(
        response.data,
        Some(json!({"_entities": [
            {
                "__typename": "Ecommerce",
                "customer_full_name": "Mary Bailey",
                "products": [{"product_name": "Jersey dress - multicolor"}]
            },
            null,
            {
                "__typename": "Ecommerce",
                "customer_full_name": "Gwen Butler",
                "products": [{"product_name": "Shoulder bag - black"}]
            }
        ]}))
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        serde_json::to_value(&response.errors[0].path).unwrap(),
        json!(["_entities", 1])
    );
    assert_eq!(store.query_count(), 1);
}
