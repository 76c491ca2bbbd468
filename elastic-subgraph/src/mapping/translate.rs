use std::collections::BTreeMap;
use std::collections::HashSet;
use std::str::FromStr;

use heck::ToUpperCamelCase;
use indexmap::IndexSet;

use super::FieldMapping;
use super::GraphType;
use super::LeafKind;
use super::MappingNode;
use super::ScalarType;
use super::TypedField;
use crate::error::MappingError;

/// Translates `mapping` into the typed field tree of the entity `type_name`.
///
/// A node is list-valued when its GraphQL name, its store name or its dotted path is in
/// `plural_fields`, or when the mapping declares it `nested`. Leaves carrying a `keyword` multi-field get an exact-match
/// filter variant named `<field>_<multi-field>`.
///
/// The translation is pure: the same inputs always produce the same tree, and any
/// unsupported kind fails the whole translation.
pub fn translate(
    type_name: &str,
    mapping: &FieldMapping,
    plural_fields: &IndexSet<String>,
) -> Result<TypedField, MappingError> {
    if mapping.properties.is_empty() {
        return Err(MappingError::EmptyObject {
            path: type_name.to_string(),
        });
    }
    let mut translator = Translator {
        plural_fields,
        type_names: HashSet::from([type_name.to_string()]),
    };
    let children = translator.properties(type_name, "", &mapping.properties)?;
    tracing::debug!(
        type_name,
        fields = children.len(),
        "translated field mapping"
    );
    Ok(TypedField {
        name: type_name.to_string(),
        path: String::new(),
        graph_type: GraphType::Object(type_name.to_string()),
        is_list: false,
        nested: false,
        children: Some(children),
        filter_variant: None,
        analyzer: None,
        ignore_above: None,
    })
}

struct Translator<'a> {
    plural_fields: &'a IndexSet<String>,
    /// Generated object type names, which must stay unique across the tree.
    type_names: HashSet<String>,
}

impl Translator<'_> {
    fn properties(
        &mut self,
        parent_type: &str,
        parent_path: &str,
        properties: &BTreeMap<String, MappingNode>,
    ) -> Result<Vec<TypedField>, MappingError> {
        let mut names = HashSet::new();
        let mut fields = Vec::with_capacity(properties.len());
        for (key, node) in properties {
            let path = join_path(parent_path, key);
            let field = self.node(parent_type, &path, key, node)?;
            let generated = std::iter::once(&field.name)
                .chain(field.filter_variant.as_ref().map(|variant| &variant.name));
            for name in generated {
                if !names.insert(name.clone()) {
                    return Err(MappingError::NameCollision {
                        path: path.clone(),
                        name: name.clone(),
                    });
                }
            }
            fields.push(field);
        }
        Ok(fields)
    }

    fn node(
        &mut self,
        parent_type: &str,
        path: &str,
        key: &str,
        node: &MappingNode,
    ) -> Result<TypedField, MappingError> {
        let name = graphql_name(key, path)?;
        let plural = [name.as_str(), key, path]
            .iter()
            .any(|candidate| self.plural_fields.contains(*candidate));
        match (node.kind.as_deref(), &node.properties) {
            (None | Some("object"), Some(properties)) => {
                self.object(parent_type, path, name, properties, plural, false)
            }
            (Some("nested"), Some(properties)) => {
                self.object(parent_type, path, name, properties, plural, true)
            }
            (Some("object" | "nested"), None) => Err(MappingError::EmptyObject {
                path: path.to_string(),
            }),
            (None, None) => Err(MappingError::MissingKind {
                path: path.to_string(),
            }),
            (Some(kind), _) => leaf(path, name, kind, node, plural),
        }
    }

    fn object(
        &mut self,
        parent_type: &str,
        path: &str,
        name: String,
        properties: &BTreeMap<String, MappingNode>,
        is_list: bool,
        nested: bool,
    ) -> Result<TypedField, MappingError> {
        if properties.is_empty() {
            return Err(MappingError::EmptyObject {
                path: path.to_string(),
            });
        }
        let type_name = format!("{parent_type}{}", name.to_upper_camel_case());
        if !self.type_names.insert(type_name.clone()) {
            return Err(MappingError::NameCollision {
                path: path.to_string(),
                name: type_name,
            });
        }
        let children = self.properties(&type_name, path, properties)?;
        Ok(TypedField {
            name,
            path: path.to_string(),
            graph_type: GraphType::Object(type_name),
            is_list: is_list || nested,
            nested,
            children: Some(children),
            filter_variant: None,
            analyzer: None,
            ignore_above: None,
        })
    }
}

fn leaf(
    path: &str,
    name: String,
    kind: &str,
    node: &MappingNode,
    is_list: bool,
) -> Result<TypedField, MappingError> {
    let kind = leaf_kind(path, kind)?;
    let mut filter_variant = None;
    for (sub_key, sub_node) in &node.fields {
        let sub_path = join_path(path, sub_key);
        let Some(sub_kind) = sub_node.kind.as_deref() else {
            return Err(MappingError::MissingKind { path: sub_path });
        };
        let sub_kind = leaf_kind(&sub_path, sub_kind)?;
        if sub_kind != LeafKind::Keyword || kind == LeafKind::Keyword || filter_variant.is_some() {
            continue;
        }
        let sub_name = graphql_name(sub_key, &sub_path)?;
        filter_variant = Some(Box::new(TypedField {
            name: format!("{name}_{sub_name}"),
            path: sub_path,
            graph_type: GraphType::Scalar(ScalarType::Keyword),
            is_list,
            nested: false,
            children: None,
            filter_variant: None,
            analyzer: None,
            ignore_above: sub_node.ignore_above,
        }));
    }
    Ok(TypedField {
        name,
        path: path.to_string(),
        graph_type: GraphType::Scalar(kind.scalar_type()),
        is_list,
        nested: false,
        children: None,
        filter_variant,
        analyzer: node.analyzer.clone(),
        ignore_above: node.ignore_above,
    })
}

fn leaf_kind(path: &str, kind: &str) -> Result<LeafKind, MappingError> {
    LeafKind::from_str(kind).map_err(|_| MappingError::UnsupportedKind {
        path: path.to_string(),
        kind: kind.to_string(),
    })
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Turns a store field name into a GraphQL name (`[_A-Za-z][_0-9A-Za-z]*`).
///
/// Characters outside the GraphQL alphabet become `_`; names starting with a digit get a
/// leading `_`. Names reserved for introspection (`__` prefix) are rejected.
fn graphql_name(key: &str, path: &str) -> Result<String, MappingError> {
    let mut name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    if name.is_empty() || name.starts_with("__") {
        return Err(MappingError::InvalidName {
            path: path.to_string(),
            name: key.to_string(),
        });
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn mapping(properties: serde_json::Value) -> FieldMapping {
        FieldMapping::from_json(&json!({ "properties": properties })).unwrap()
    }

    fn no_plurals() -> IndexSet<String> {
        IndexSet::new()
    }

    #[rstest]
    #[case("text", ScalarType::Text)]
    #[case("keyword", ScalarType::Keyword)]
    #[case("byte", ScalarType::Int)]
    #[case("short", ScalarType::Int)]
    #[case("integer", ScalarType::Int)]
    #[case("long", ScalarType::Int)]
    #[case("half_float", ScalarType::Float)]
    #[case("float", ScalarType::Float)]
    #[case("scaled_float", ScalarType::Float)]
    #[case("double", ScalarType::Float)]
    #[case("date", ScalarType::Date)]
    #[case("geo_point", ScalarType::GeoPoint)]
    #[case("boolean", ScalarType::Boolean)]
    fn leaf_kinds_map_to_fixed_types(#[case] kind: &str, #[case] expected: ScalarType) {
        let tree = translate("Doc", &mapping(json!({"f": {"type": kind}})), &no_plurals()).unwrap();
        let field = tree.child("f").unwrap();
        assert_eq!(field.graph_type, GraphType::Scalar(expected));
        assert!(!field.is_list);
    }

    #[rstest]
    #[case(json!({"f": {"type": "ip"}}), "f")]
    #[case(json!({"o": {"properties": {"g": {"type": "binary"}}}}), "o.g")]
    #[case(json!({"t": {"type": "text", "fields": {"raw": {"type": "wildcard"}}}}), "t.raw")]
    fn unknown_kinds_fail_without_partial_tree(
        #[case] properties: serde_json::Value,
        #[case] path: &str,
    ) {
        let err = translate("Doc", &mapping(properties), &no_plurals()).unwrap_err();
        match err {
            MappingError::UnsupportedKind { path: at, .. } => assert_eq!(at, path),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn keyword_multi_field_becomes_filter_variant() {
        let tree = translate(
            "Doc",
            &mapping(json!({
                "title": {"type": "text", "fields": {"keyword": {"type": "keyword", "ignore_above": 256}}}
            })),
            &no_plurals(),
        )
        .unwrap();
        let title = tree.child("title").unwrap();
        assert_eq!(title.graph_type, GraphType::Scalar(ScalarType::Text));
        let variant = title.filter_variant.as_deref().unwrap();
        assert_eq!(variant.name, "title_keyword");
        assert_eq!(variant.path, "title.keyword");
        assert_eq!(variant.graph_type, GraphType::Scalar(ScalarType::Keyword));
        assert_eq!(variant.ignore_above, Some(256));
        assert_eq!(tree.child("title_keyword"), Some(variant));
    }

    #[test]
    fn plural_names_and_paths_yield_lists() {
        let plurals: IndexSet<String> = ["products".to_string(), "geoip.region_name".to_string()]
            .into_iter()
            .collect();
        let tree = translate(
            "Ecommerce",
            &mapping(json!({
                "products": {"properties": {"sku": {"type": "keyword"}}},
                "geoip": {"properties": {"region_name": {"type": "keyword"}, "city_name": {"type": "keyword"}}},
                "sku": {"type": "keyword"}
            })),
            &plurals,
        )
        .unwrap();
        let products = tree.child("products").unwrap();
        assert!(products.is_list);
        assert_eq!(products.object_type(), Some("EcommerceProducts"));
        assert!(!products.child("sku").unwrap().is_list);
        let geoip = tree.child("geoip").unwrap();
        assert!(!geoip.is_list);
        assert!(geoip.child("region_name").unwrap().is_list);
        assert!(!geoip.child("city_name").unwrap().is_list);
        assert!(!tree.child("sku").unwrap().is_list);
    }

    #[test]
    fn nested_mapping_marks_repeated_documents() {
        let tree = translate(
            "Doc",
            &mapping(json!({"lines": {"type": "nested", "properties": {"qty": {"type": "integer"}}}})),
            &no_plurals(),
        )
        .unwrap();
        let lines = tree.child("lines").unwrap();
        assert!(lines.is_list);
        assert!(lines.nested);
        assert!(!lines.child("qty").unwrap().nested);
    }

    #[test]
    fn store_names_mark_plural_fields() {
        let plurals: IndexSet<String> = ["@tags".to_string(), "geo-ip.zone-id".to_string()]
            .into_iter()
            .collect();
        let tree = translate(
            "Doc",
            &mapping(json!({
                "@tags": {"type": "keyword"},
                "geo-ip": {"properties": {"zone-id": {"type": "keyword"}}}
            })),
            &plurals,
        )
        .unwrap();
        assert!(tree.child("_tags").unwrap().is_list);
        let geoip = tree.child("geo_ip").unwrap();
        assert!(!geoip.is_list);
        assert!(geoip.child("zone_id").unwrap().is_list);
    }

    #[test]
    fn translation_is_independent_of_key_order() {
        let a: FieldMapping = serde_json::from_str(
            r#"{"properties": {"b": {"type": "long"}, "a": {"type": "keyword"}}}"#,
        )
        .unwrap();
        let b: FieldMapping = serde_json::from_str(
            r#"{"properties": {"a": {"type": "keyword"}, "b": {"type": "long"}}}"#,
        )
        .unwrap();
        let first = translate("Doc", &a, &no_plurals()).unwrap();
        assert_eq!(first, translate("Doc", &b, &no_plurals()).unwrap());
        assert_eq!(first, translate("Doc", &a, &no_plurals()).unwrap());
        let names: Vec<_> = first.children().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn names_are_made_graphql_safe() {
        let tree = translate(
            "Doc",
            &mapping(json!({"@timestamp": {"type": "date"}, "3d": {"type": "boolean"}})),
            &no_plurals(),
        )
        .unwrap();
        let field = tree.child("_timestamp").unwrap();
        assert_eq!(field.path, "@timestamp");
        assert_eq!(field.source_key(), "@timestamp");
        assert!(tree.child("_3d").is_some());

        let err = translate("Doc", &mapping(json!({"__meta": {"type": "keyword"}})), &no_plurals())
            .unwrap_err();
        assert!(matches!(err, MappingError::InvalidName { .. }));
    }

    #[test]
    fn colliding_generated_names_fail() {
        let err = translate(
            "Doc",
            &mapping(json!({
                "title": {"type": "text", "fields": {"keyword": {"type": "keyword"}}},
                "title_keyword": {"type": "keyword"}
            })),
            &no_plurals(),
        )
        .unwrap_err();
        assert!(matches!(err, MappingError::NameCollision { .. }));
    }

    #[test]
    fn empty_objects_and_kindless_leaves_fail() {
        let err = translate("Doc", &mapping(json!({"o": {"type": "object"}})), &no_plurals())
            .unwrap_err();
        assert_eq!(err, MappingError::EmptyObject { path: "o".into() });
        let err = translate("Doc", &mapping(json!({"o": {}})), &no_plurals()).unwrap_err();
        assert_eq!(err, MappingError::MissingKind { path: "o".into() });
        let err = translate("Doc", &FieldMapping::default(), &no_plurals()).unwrap_err();
        assert_eq!(err, MappingError::EmptyObject { path: "Doc".into() });
    }
}
