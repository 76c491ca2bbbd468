use elastic_subgraph::FederatedSchema;
use elastic_subgraph::Request;
use elastic_subgraph::build_federated_schema;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::Value;
use serde_json::json;

use crate::common;

fn schema() -> FederatedSchema {
    build_federated_schema(&common::configuration(), common::store(), None).unwrap()
}

async fn data(schema: &FederatedSchema, request: Request) -> Value {
    let response = schema.execute(&request).await;
    assert_eq!(response.errors, vec![]);
    response.data.unwrap()
}

#[tokio::test]
async fn search_filters_on_keyword_variants_and_projects_nested_documents() {
    let request = Request::new(
        r#"{
          ecommerceSearch(filter: { customer_first_name_keyword: { in: ["Eddie", "Gwen"] } }) {
            order_id
            products { product_name price }
            geoip { city_name location { lat lon } }
          }
        }"#,
    );
    assert_eq!(
        data(&schema(), request).await,
        json!({"ecommerceSearch": [
            {
                "order_id": "584677",
                "products": [
                    {"product_name": "Basic T-shirt - dark blue/white", "price": 11.99},
                    {"product_name": "Sweatshirt - grey multicolor", "price": 24.99}
                ],
                "geoip": {"city_name": "Cairo", "location": {"lat": 30.1, "lon": 31.3}}
            },
            {
                "order_id": "584058",
                "products": [{"product_name": "Shoulder bag - black", "price": 199.98}],
                // stored as [lon, lat]
                "geoip": {"city_name": "New York", "location": {"lat": 40.8, "lon": -74.0}}
            }
        ]})
    );
}

#[rstest]
#[case::text_match(r#"{ products: { product_name: { match: "dress" } } }"#, &["584021"])]
#[case::range(r#"{ taxful_total_price: { gt: 40 } }"#, &["584021", "584058"])]
#[case::geo_within(
    r#"{ geoip: { location: { within: { lat: 25.2, lon: 55.27, distanceKm: 50 } } } }"#,
    &["584021"]
)]
#[case::geo_within_array_point(
    r#"{ geoip: { location: { within: { lat: 40.71, lon: -74.0, distanceKm: 25 } } } }"#,
    &["584058"]
)]
#[case::combinators(
    r#"{ OR: [{ customer_first_name: { match: "gwen" } }, { NOT: { currency: { eq: "EUR" } } }] }"#,
    &["584058"]
)]
#[case::ids(r#"{ _id: { in: ["o1", "o3"] } }"#, &["584677", "584058"])]
#[tokio::test]
async fn filters(#[case] filter: &str, #[case] expected: &[&str]) {
    let request = Request::new(format!(
        "{{ ecommerceSearch(filter: {filter}) {{ order_id }} }}"
    ));
    let orders: Vec<Value> = expected
        .iter()
        .map(|order_id| json!({"order_id": order_id}))
        .collect();
    assert_eq!(
        data(&schema(), request).await,
        json!({"ecommerceSearch": orders})
    );
}

#[tokio::test]
async fn connection_pages_follow_cursors() {
    let store = common::store();
    let schema = build_federated_schema(&common::configuration(), store.clone(), None).unwrap();
    let query = r#"
      query($after: String) {
        ecommerceConnection(
          first: 2
          after: $after
          sort: [{ field: taxful_total_price, direction: DESC }]
        ) {
          totalCount
          edges { node { order_id } }
          pageInfo { hasNextPage hasPreviousPage endCursor }
        }
      }
    "#;
    let first = data(&schema, Request::new(query)).await;
    let connection = &first["ecommerceConnection"];
    assert_eq!(connection["totalCount"], json!(3));
    assert_eq!(
        connection["edges"],
        json!([{"node": {"order_id": "584058"}}, {"node": {"order_id": "584021"}}])
    );
    assert_eq!(connection["pageInfo"]["hasNextPage"], json!(true));
    assert_eq!(connection["pageInfo"]["hasPreviousPage"], json!(false));

    let after = connection["pageInfo"]["endCursor"].clone();
    store.clear_executed_queries();
    let second = data(
        &schema,
        Request::new(query).with_variables(json!({ "after": after })),
    )
    .await;
    let connection = &second["ecommerceConnection"];
    assert_eq!(
        connection["edges"],
        json!([{"node": {"order_id": "584677"}}])
    );
    assert_eq!(connection["pageInfo"]["hasNextPage"], json!(false));
    assert_eq!(connection["pageInfo"]["hasPreviousPage"], json!(true));
    assert_eq!(store.query_count(), 1);
}

#[tokio::test]
async fn pagination_clamps_the_limit() {
    let request = Request::new(
        "{ ecommercePagination(offset: 1, limit: 500) { total offset limit hasNextPage items { _id } } }",
    );
    assert_eq!(
        data(&schema(), request).await,
        json!({"ecommercePagination": {
            "total": 3,
            "offset": 1,
            "limit": 100,
            "hasNextPage": false,
            "items": [{"_id": "o2"}, {"_id": "o3"}]
        }})
    );
}

#[tokio::test]
async fn invalid_filters_from_variables_are_field_errors() {
    let request = Request::new(
        r#"query($filter: EcommerceFilter) {
          ecommerceSearch(filter: $filter) { order_id }
          articleSearch { title }
        }"#,
    )
    .with_variables(json!({"filter": {"currency": {"gt": "EUR"}}}));
    let response = schema().execute(&request).await;
    let data = response.data.unwrap();
    assert_eq!(data["ecommerceSearch"], Value::Null);
    assert_eq!(data["articleSearch"].as_array().map(Vec::len), Some(3));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].extensions["code"], json!("QUERY_ERROR"));
}

#[tokio::test]
async fn store_failures_are_field_errors() {
    let store = common::store();
    let schema = build_federated_schema(&common::configuration(), store.clone(), None).unwrap();
    store.set_unavailable(Some("cluster is red"));
    let response = schema
        .execute(&Request::new("{ ecommerceSearch { order_id } }"))
        .await;
    assert_eq!(response.data, Some(json!({"ecommerceSearch": null})));
    assert_eq!(response.errors[0].extensions["code"], json!("STORE_ERROR"));
    assert!(response.errors[0].message.contains("cluster is red"));
}
