use std::path::Path;
use std::sync::Arc;

use elastic_subgraph::Configuration;
use elastic_subgraph::store::memory::InMemoryStore;
use serde_json::json;

pub(crate) const CONFIG: &str = "tests/testdata/config.yaml";

pub(crate) fn configuration() -> Configuration {
    Configuration::from_file(Path::new(CONFIG)).unwrap()
}

/// Three orders of the ecommerce sample index and three articles.
pub(crate) fn store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.insert(
        "kibana_sample_data_ecommerce",
        "o1",
        json!({
            "order_id": "584677",
            "customer_first_name": "Eddie",
            "customer_full_name": "Eddie Underwood",
            "currency": "EUR",
            "sku": ["ZO0549605496", "ZO0299602996"],
            "taxful_total_price": 36.98,
            "total_quantity": 2,
            "order_date": "2019-12-02T09:28:48+00:00",
            "geoip": {"city_name": "Cairo", "location": {"lat": 30.1, "lon": 31.3}},
            "products": [
                {"product_name": "Basic T-shirt - dark blue/white", "price": 11.99, "quantity": 1},
                {"product_name": "Sweatshirt - grey multicolor", "price": 24.99, "quantity": 1}
            ]
        }),
    );
    store.insert(
        "kibana_sample_data_ecommerce",
        "o2",
        json!({
            "order_id": "584021",
            "customer_first_name": "Mary",
            "customer_full_name": "Mary Bailey",
            "currency": "EUR",
            "sku": "ZO0299602996",
            "taxful_total_price": 53.98,
            "total_quantity": 2,
            "order_date": "2019-12-01T21:59:02+00:00",
            "geoip": {"city_name": "Dubai", "location": "25.3,55.3"},
            "products": {"product_name": "Jersey dress - multicolor", "price": 24.99, "quantity": 2}
        }),
    );
    store.insert(
        "kibana_sample_data_ecommerce",
        "o3",
        json!({
            "order_id": "584058",
            "customer_first_name": "Gwen",
            "customer_full_name": "Gwen Butler",
            "currency": "EUR",
            "sku": ["ZO0635406354"],
            "taxful_total_price": 199.98,
            "total_quantity": 1,
            "order_date": "2019-11-30T22:32:10+00:00",
            "geoip": {"city_name": "New York", "location": [-74.0, 40.8]},
            "products": [{"product_name": "Shoulder bag - black", "price": 199.98, "quantity": 1}]
        }),
    );
    store.insert(
        "articles",
        "a1",
        json!({"title": "Autumn collection", "content_id": "c1", "published": "2019-10-01"}),
    );
    store.insert(
        "articles",
        "a2",
        json!({"title": "Care instructions", "content_id": "c1", "published": "2019-10-05"}),
    );
    store.insert(
        "articles",
        "a3",
        json!({"title": "Shipping times", "content_id": "c2", "published": "2019-11-12"}),
    );
    store
}
