//! Execution of GraphQL requests against a [`FederatedSchema`].

mod engine;
mod input_coercion;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::ast::OperationType;

use self::engine::Engine;
use self::input_coercion::coerce_variable_values;
use crate::error::RequestError;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::merge::FederatedSchema;
use crate::relation::RelationBatcher;

impl FederatedSchema {
    /// Executes one query operation.
    ///
    /// Requests that fail validation get no data. Once execution starts, a failing field
    /// becomes `null` with an error located at its path, and every other field still resolves.
    /// Relation batching is scoped to this call.
    #[tracing::instrument(skip_all, fields(operation_name = request.operation_name.as_deref()))]
    pub async fn execute(&self, request: &Request) -> Response {
        let document =
            match ExecutableDocument::parse_and_validate(&self.schema, &request.query, "query") {
                Ok(document) => document,
                Err(e) => {
                    let messages = e.errors.iter().map(|e| e.to_json().message).collect();
                    return reject(RequestError::Validation(messages));
                }
            };
        let operation = match document
            .operations
            .get(request.operation_name.as_deref())
        {
            Ok(operation) => operation,
            Err(e) => {
                return reject(RequestError::UnknownOperation(
                    e.to_graphql_error(&document.sources).message,
                ));
            }
        };
        match operation.operation_type {
            OperationType::Query => {}
            OperationType::Mutation => {
                return reject(RequestError::UnsupportedOperation("mutation"));
            }
            OperationType::Subscription => {
                return reject(RequestError::UnsupportedOperation("subscription"));
            }
        }
        let variables = match coerce_variable_values(operation, &request.variables) {
            Ok(variables) => variables,
            Err(e) => return reject(e),
        };

        let engine = Engine {
            schema: self,
            document: &document,
            variables: &variables,
            batcher: self.lookup.clone().map(RelationBatcher::new),
        };
        let output = engine
            .execute(&operation.selection_set.ty, &operation.selection_set.selections)
            .await;
        tracing::debug!(errors = output.errors.len(), "executed operation");
        Response {
            data: Some(output.data),
            errors: output.errors,
        }
    }
}

fn reject(error: RequestError) -> Response {
    tracing::debug!(%error, "rejected request");
    Response::from_errors(error.to_graphql_errors())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indexmap::IndexSet;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::configuration::Limits;
    use crate::mapping::FieldMapping;
    use crate::mapping::translate;
    use crate::merge::MergeOptions;
    use crate::merge::merge;
    use crate::store::memory::InMemoryStore;
    use crate::subgraph::EntitySchema;

    fn schema() -> (Arc<InMemoryStore>, FederatedSchema) {
        let store = Arc::new(InMemoryStore::new());
        store.insert("books", "b1", json!({"title": "Dune", "year": 1965, "tags": ["sf"]}));
        store.insert("books", "b2", json!({"title": "Emma", "year": 1815, "tags": "classic"}));
        store.insert("books", "b3", json!({"title": "Ubik", "year": 1969}));
        let mapping = FieldMapping::from_json(&json!({"properties": {
            "title": {"type": "keyword"},
            "year": {"type": "integer"},
            "tags": {"type": "keyword"}
        }}))
        .unwrap();
        let plurals: IndexSet<String> = ["tags".to_string()].into_iter().collect();
        let fields = translate("Book", &mapping, &plurals).unwrap();
        let entity = EntitySchema::new("book", fields, "books", store.clone(), Limits::default())
            .with_key("title");
        let schema = merge(&[entity.to_unit()], &[], &MergeOptions::default()).unwrap();
        (store, schema)
    }

    #[tokio::test]
    async fn resolves_aliases_fragments_and_variables() {
        let (store, schema) = schema();
        let request = Request::new(
            r#"
            query Books($min: Int = 1900, $withTags: Boolean!) {
              recent: bookSearch(filter: { year: { gte: $min } }, sort: [{ field: year }]) {
                ...bookFields
                tags @include(if: $withTags)
              }
              bookPagination(limit: 1) { total hasNextPage items { __typename title } }
            }
            fragment bookFields on Book { _id title }
            "#,
        )
        .with_variables(json!({"withTags": false}));
        let response = schema.execute(&request).await;
        assert_eq!(response.errors, vec![]);
        assert_eq!(
            response.data,
            Some(json!({
                "recent": [
                    {"_id": "b1", "title": "Dune"},
                    {"_id": "b3", "title": "Ubik"}
                ],
                "bookPagination": {
                    "total": 3,
                    "hasNextPage": true,
                    "items": [{"__typename": "Book", "title": "Dune"}]
                }
            }))
        );
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn field_errors_keep_siblings() {
        let (_, schema) = schema();
        let request = Request::new(
            r#"{
              bookConnection(first: 1, after: "not a cursor") { totalCount }
              bookSearch(limit: 1) { title }
            }"#,
        );
        let response = schema.execute(&request).await;
        assert_eq!(
            response.data,
            Some(json!({"bookConnection": null, "bookSearch": [{"title": "Dune"}]}))
        );
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].extensions["code"], json!("CURSOR_ERROR"));
        assert_eq!(
            serde_json::to_value(&response.errors[0].path).unwrap(),
            json!(["bookConnection"])
        );
    }

    #[tokio::test]
    async fn entities_resolve_by_key_in_one_read() {
        let (store, schema) = schema();
        let request = Request::new(
            r#"query($representations: [_Any!]!) {
              _entities(representations: $representations) {
                ... on Book { _id year }
              }
            }"#,
        )
        .with_variables(json!({"representations": [
            {"__typename": "Book", "title": "Ubik"},
            {"__typename": "Book", "title": "Missing"},
            {"__typename": "Book", "title": "Dune"}
        ]}));
        let response = schema.execute(&request).await;
        assert_eq!(response.errors, vec![]);
        assert_eq!(
            response.data,
            Some(json!({"_entities": [
                {"_id": "b3", "year": 1969},
                null,
                {"_id": "b1", "year": 1965}
            ]}))
        );
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_execution() {
        let (store, schema) = schema();
        let response = schema.execute(&Request::new("{ bookSearch { nope } }")).await;
        assert_eq!(response.data, None);
        assert_eq!(
            response.errors[0].extensions["code"],
            json!("GRAPHQL_VALIDATION_FAILED")
        );

        let request = Request::new("query($limit: Int!) { bookSearch(limit: $limit) { title } }");
        let response = schema.execute(&request).await;
        assert_eq!(response.errors[0].extensions["code"], json!("BAD_USER_INPUT"));

        let request = Request::new("query A { _service { sdl } } query B { _service { sdl } }")
            .with_operation_name("C");
        let response = schema.execute(&request).await;
        assert_eq!(response.data, None);
        assert_eq!(store.query_count(), 0);
    }

    #[tokio::test]
    async fn service_sdl_is_served() {
        let (_, schema) = schema();
        let response = schema.execute(&Request::new("{ _service { sdl } }")).await;
        let sdl = response.data.unwrap()["_service"]["sdl"].clone();
        assert_eq!(sdl, json!(schema.sdl()));
        assert!(schema.sdl().contains("type Book @key(fields: \"title\")"));
    }
}
