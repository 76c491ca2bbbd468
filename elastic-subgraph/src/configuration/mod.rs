//! Logic for loading configuration in to an object model

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use displaydoc::Display;
use heck::ToUpperCamelCase;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::store::ID_FIELD;

/// Configuration error.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not read {path}: {error}
    CannotReadFile { path: String, error: String },

    /// could not deserialize configuration: {0}
    DeserializeConfigError(String),

    /// mapping of entity '{entity}' is not valid JSON or YAML: {error}
    InvalidMappingDocument { entity: String, error: String },

    /// entity name '{0}' is used more than once
    DuplicateEntity(String),

    /// type name '{0}' is used by more than one entity
    DuplicateTypeName(String),

    /// extension type '{0}' declares no key fields
    MissingKeyFields(String),

    /// relation field '{field}' refers to unknown entity '{entity}'
    UnknownEntity { field: String, entity: String },

    /// relation field '{field}' uses '{key_field}', which is not a key field of its type
    UnknownKeyField { field: String, key_field: String },

    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// The configuration of an elastic subgraph.
///
/// Can be created through `serde::Deserialize` from YAML or JSON,
/// or inline in Rust code with `serde_json::json!` and `serde_json::from_value`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Indexed entities served by this subgraph, one set of root fields each.
    #[serde(default)]
    pub entities: Vec<EntityConfig>,

    /// Relation fields added to types owned by other subgraphs.
    #[serde(default)]
    pub extensions: Vec<ExtensionConfig>,

    /// Type names left out when merging type definitions.
    /// Defaults to the GraphQL built-in scalars.
    #[serde(default = "default_excluded_types")]
    pub excluded_types: Vec<String>,

    /// Query size limits.
    #[serde(default)]
    pub limits: Limits,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            extensions: Vec::new(),
            excluded_types: default_excluded_types(),
            limits: Limits::default(),
        }
    }
}

/// One indexed entity.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EntityConfig {
    /// Prefix of the root fields (`<name>Search`, `<name>Pagination`, `<name>Connection`).
    pub name: String,

    /// Name of the generated object type.
    /// Defaults to the upper camel case form of `name`.
    #[serde(default)]
    pub type_name: Option<String>,

    /// The document store index holding the documents.
    pub index: String,

    /// The field mapping of the index.
    pub mapping: MappingSource,

    /// Field names or dotted paths holding arrays of values.
    #[serde(default)]
    pub plural_fields: Vec<String>,

    /// Field used as the federation key of the type.
    /// When set, the type can be resolved by reference from other subgraphs.
    #[serde(default)]
    pub key: Option<String>,
}

impl EntityConfig {
    pub fn type_name(&self) -> String {
        self.type_name
            .clone()
            .unwrap_or_else(|| self.name.to_upper_camel_case())
    }

    /// Reads the mapping document, from the configuration or from its file.
    pub fn mapping_document(&self) -> Result<Value, ConfigurationError> {
        match &self.mapping {
            MappingSource::Inline(value) => Ok(value.clone()),
            MappingSource::File { file } => {
                let contents = std::fs::read_to_string(file).map_err(|e| {
                    ConfigurationError::CannotReadFile {
                        path: file.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                // YAML is a superset of JSON
                serde_yaml::from_str(&contents).map_err(|e| {
                    ConfigurationError::InvalidMappingDocument {
                        entity: self.name.clone(),
                        error: e.to_string(),
                    }
                })
            }
        }
    }
}

/// Where a field mapping comes from.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum MappingSource {
    /// A JSON or YAML file, relative to the configuration file.
    File { file: PathBuf },
    /// The mapping itself.
    Inline(Value),
}

/// Fields added to a type owned by another subgraph.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExtensionConfig {
    /// The extended type.
    pub type_name: String,

    /// Fields of the `@key` directive.
    pub key_fields: Vec<String>,

    /// Fields owned by the other subgraph that this one receives, with their GraphQL type.
    /// Key fields must be listed.
    #[serde(default)]
    pub external_fields: BTreeMap<String, String>,

    /// Relation fields added to the type.
    #[serde(default)]
    pub fields: BTreeMap<String, RelationFieldConfig>,
}

/// A field resolving the documents of an entity related to the extended type by foreign key.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RelationFieldConfig {
    /// Name of the related entity.
    pub entity: String,

    /// Store path, in the related entity's documents, holding the parent key.
    pub foreign_key: String,

    /// Key field of the extended type matched against `foreign_key`.
    /// Defaults to the first key field.
    #[serde(default)]
    pub key_field: Option<String>,

    /// Whether the field returns every related document or only the first one.
    #[serde(default = "default_true")]
    pub list: bool,
}

/// Query size limits.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Limits {
    /// Page size used when a query sets no limit.
    pub default_limit: usize,

    /// Largest page size; larger limits are clamped.
    pub max_limit: usize,

    /// Store field appended to every sort, so that ordering and cursors are stable.
    pub tie_breaker: String,

    /// Largest number of related documents returned per parent by a relation field.
    pub max_related: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 1000,
            tie_breaker: ID_FIELD.to_string(),
            max_related: 100,
        }
    }
}

fn default_excluded_types() -> Vec<String> {
    ["String", "Int", "Float", "Boolean", "ID"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}

/// Parse configuration from a string in YAML syntax
impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let configuration: Configuration = serde_yaml::from_str(s)
            .map_err(|e| ConfigurationError::DeserializeConfigError(e.to_string()))?;
        configuration.validate()?;
        Ok(configuration)
    }
}

impl Configuration {
    /// Loads and validates a configuration file.
    ///
    /// Relative mapping file paths are resolved against the directory of the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigurationError::CannotReadFile {
                path: path.display().to_string(),
                error: e.to_string(),
            })?;
        let mut configuration: Configuration = contents.parse()?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for entity in &mut configuration.entities {
            if let MappingSource::File { file } = &mut entity.mapping {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
        Ok(configuration)
    }

    /// Checks the consistency rules serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.limits.max_limit == 0 || self.limits.default_limit > self.limits.max_limit {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid limits",
                error: format!(
                    "default_limit ({}) must be at most max_limit ({}), which must be positive",
                    self.limits.default_limit, self.limits.max_limit
                ),
            });
        }
        let mut names = HashSet::new();
        let mut type_names = HashSet::new();
        for entity in &self.entities {
            if !names.insert(entity.name.as_str()) {
                return Err(ConfigurationError::DuplicateEntity(entity.name.clone()));
            }
            if !type_names.insert(entity.type_name()) {
                return Err(ConfigurationError::DuplicateTypeName(entity.type_name()));
            }
        }
        for extension in &self.extensions {
            if extension.key_fields.is_empty() {
                return Err(ConfigurationError::MissingKeyFields(
                    extension.type_name.clone(),
                ));
            }
            for (name, relation) in &extension.fields {
                let field = format!("{}.{name}", extension.type_name);
                if !names.contains(relation.entity.as_str()) {
                    return Err(ConfigurationError::UnknownEntity {
                        field,
                        entity: relation.entity.clone(),
                    });
                }
                if let Some(key_field) = &relation.key_field {
                    if !extension.key_fields.contains(key_field) {
                        return Err(ConfigurationError::UnknownKeyField {
                            field,
                            key_field: key_field.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&EntityConfig> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    /// The JSON schema of the configuration.
    pub fn json_schema() -> RootSchema {
        schemars::schema_for!(Configuration)
    }
}
