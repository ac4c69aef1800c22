//! Schema registry for resource field definitions
//!
//! The graph and the cache never guess at structure: every attribute default and every
//! relationship (its kind, related type, declared inverse, async and polymorphic flags) comes from
//! a [SchemaService]. [SchemaRegistry] is the bundled implementation; schemas can be registered in
//! code or loaded from TOML:
//!
//! ```toml
//! [post.attributes.title]
//! default = "untitled"
//!
//! [post.relationships.comments]
//! kind = "hasMany"
//! type = "comment"
//! inverse = "post"
//! async = false
//!
//! [comment.relationships.post]
//! kind = "belongsTo"
//! type = "post"
//! inverse = "comments"
//! async = false
//! ```
//!
//! `inverse = false` declares that a relationship has no inverse; omitting `inverse` lets the
//! graph discover one by convention.

use parking_lot::RwLock;
use serde::{de::Deserializer, ser::Serializer, Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    fs::read_to_string,
    path::Path,
    sync::Arc,
};

use crate::error::RelgraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    BelongsTo,
    HasMany,
    /// Inverse-only bookkeeping edge; never declared in a schema.
    Implicit,
}

impl RelationshipKind {
    pub fn is_collection(&self) -> bool {
        !matches!(self, RelationshipKind::BelongsTo)
    }
}

impl std::fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationshipKind::BelongsTo => write!(f, "belongsTo"),
            RelationshipKind::HasMany => write!(f, "hasMany"),
            RelationshipKind::Implicit => write!(f, "implicit"),
        }
    }
}

/// The declared `inverse` option of a relationship field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum InverseSpec {
    /// No option given; the inverse is discovered by convention.
    #[default]
    Unset,
    /// Explicitly no inverse (`inverse = false`).
    None,
    Named(String),
}

impl InverseSpec {
    pub fn is_unset(&self) -> bool {
        matches!(self, InverseSpec::Unset)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInverse {
    Flag(bool),
    Named(String),
}

fn deserialize_inverse<'de, D: Deserializer<'de>>(de: D) -> Result<InverseSpec, D::Error> {
    Ok(match Option::<RawInverse>::deserialize(de)? {
        None | Some(RawInverse::Flag(true)) => InverseSpec::Unset,
        Some(RawInverse::Flag(false)) => InverseSpec::None,
        Some(RawInverse::Named(name)) => InverseSpec::Named(name),
    })
}

fn serialize_inverse<S: Serializer>(inverse: &InverseSpec, ser: S) -> Result<S::Ok, S::Error> {
    match inverse {
        InverseSpec::Unset => ser.serialize_none(),
        InverseSpec::None => ser.serialize_bool(false),
        InverseSpec::Named(name) => ser.serialize_str(name),
    }
}

fn default_async() -> bool {
    true
}

/// Schema-declared metadata for a relationship field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipField {
    pub kind: RelationshipKind,
    #[serde(rename = "type")]
    pub related_type: String,
    #[serde(
        default,
        deserialize_with = "deserialize_inverse",
        serialize_with = "serialize_inverse",
        skip_serializing_if = "InverseSpec::is_unset"
    )]
    pub inverse: InverseSpec,
    #[serde(rename = "async", default = "default_async")]
    pub is_async: bool,
    #[serde(default)]
    pub polymorphic: bool,
}

impl RelationshipField {
    pub fn belongs_to(related_type: &str) -> Self {
        RelationshipField {
            kind: RelationshipKind::BelongsTo,
            related_type: related_type.to_string(),
            inverse: InverseSpec::Unset,
            is_async: true,
            polymorphic: false,
        }
    }

    pub fn has_many(related_type: &str) -> Self {
        RelationshipField {
            kind: RelationshipKind::HasMany,
            ..RelationshipField::belongs_to(related_type)
        }
    }

    pub fn inverse(mut self, key: &str) -> Self {
        self.inverse = InverseSpec::Named(key.to_string());
        self
    }

    pub fn no_inverse(mut self) -> Self {
        self.inverse = InverseSpec::None;
        self
    }

    pub fn sync(mut self) -> Self {
        self.is_async = false;
        self
    }

    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSchema {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeField>,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipField>,
    /// Abstract (polymorphic) types this type may be assigned to.
    #[serde(default)]
    pub implements: Vec<String>,
}

impl ResourceSchema {
    pub fn new() -> Self {
        ResourceSchema::default()
    }

    pub fn attribute(mut self, name: &str, default: Option<Value>) -> Self {
        self.attributes
            .insert(name.to_string(), AttributeField { default });
        self
    }

    pub fn relationship(mut self, name: &str, field: RelationshipField) -> Self {
        self.relationships.insert(name.to_string(), field);
        self
    }

    pub fn implements(mut self, base_type: &str) -> Self {
        self.implements.push(base_type.to_string());
        self
    }
}

/// Read access to resource schemas. Implementations must be cheap to query; the graph memoizes
/// what it derives from them.
pub trait SchemaService: Send + Sync {
    fn resource(&self, resource_type: &str) -> Option<Arc<ResourceSchema>>;

    fn has_resource(&self, resource_type: &str) -> bool {
        self.resource(resource_type).is_some()
    }

    fn attributes_for(&self, resource_type: &str) -> BTreeMap<String, AttributeField> {
        self.resource(resource_type)
            .map(|schema| schema.attributes.clone())
            .unwrap_or_default()
    }

    fn relationships_for(&self, resource_type: &str) -> BTreeMap<String, RelationshipField> {
        self.resource(resource_type)
            .map(|schema| schema.relationships.clone())
            .unwrap_or_default()
    }

    fn relationship_for(&self, resource_type: &str, field: &str) -> Option<RelationshipField> {
        self.resource(resource_type)
            .and_then(|schema| schema.relationships.get(field).cloned())
    }

    fn attribute_for(&self, resource_type: &str, field: &str) -> Option<AttributeField> {
        self.resource(resource_type)
            .and_then(|schema| schema.attributes.get(field).cloned())
    }

    /// Whether a record of `actual` type may occupy a slot declared for `declared`.
    fn is_polymorphic_compatible(&self, declared: &str, actual: &str) -> bool {
        declared == actual
            || self
                .resource(actual)
                .is_some_and(|schema| schema.implements.iter().any(|t| t == declared))
    }
}

/// Thread-safe registry of resource schemas.
pub struct SchemaRegistry(Arc<RwLock<HashMap<String, Arc<ResourceSchema>>>>);

impl Clone for SchemaRegistry {
    fn clone(&self) -> Self {
        SchemaRegistry(self.0.clone())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        SchemaRegistry::create()
    }
}

impl SchemaRegistry {
    pub fn create() -> Self {
        SchemaRegistry(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Parse a TOML document mapping resource type names to [ResourceSchema]s.
    pub fn from_toml_str(content: &str) -> Result<Self, RelgraphError> {
        let schemas: BTreeMap<String, ResourceSchema> = toml::from_str(content)?;
        let registry = SchemaRegistry::create();
        for (name, schema) in schemas {
            registry.register(name, schema);
        }
        Ok(registry)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RelgraphError> {
        tracing::debug!("[SchemaRegistry::load] Reading schemas from {:?}", path.as_ref());
        SchemaRegistry::from_toml_str(&read_to_string(path)?)
    }

    /// Register a schema definition
    ///
    /// If a schema with this name already exists, it will be overwritten and a log message emitted.
    pub fn register(&self, resource_type: String, definition: ResourceSchema) {
        let mut writer = self.0.write();
        if writer.contains_key(&resource_type) {
            tracing::info!(
                "[SchemaRegistry::register] Overwriting existing schema: {}",
                resource_type
            );
        }
        writer.insert(resource_type, Arc::new(definition));
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<ResourceSchema>> {
        self.0.read().get(resource_type).cloned()
    }

    pub fn list_schemas(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl SchemaService for SchemaRegistry {
    fn resource(&self, resource_type: &str) -> Option<Arc<ResourceSchema>> {
        self.get(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BLOG: &str = r#"
[post.attributes.title]
default = "untitled"

[post.relationships.comments]
kind = "hasMany"
type = "comment"
inverse = "post"
async = false

[post.relationships.tags]
kind = "hasMany"
type = "tag"
inverse = false

[comment.relationships.post]
kind = "belongsTo"
type = "post"
async = false
"#;

    #[test]
    fn test_toml_schema_loading() {
        let registry = SchemaRegistry::from_toml_str(BLOG).unwrap();
        assert_eq!(registry.list_schemas(), vec!["comment", "post"]);

        let comments = registry.relationship_for("post", "comments").unwrap();
        assert_eq!(comments.kind, RelationshipKind::HasMany);
        assert_eq!(comments.inverse, InverseSpec::Named("post".to_string()));
        assert!(!comments.is_async);

        let tags = registry.relationship_for("post", "tags").unwrap();
        assert_eq!(tags.inverse, InverseSpec::None);
        assert!(tags.is_async, "async defaults to true");

        let post = registry.relationship_for("comment", "post").unwrap();
        assert_eq!(post.inverse, InverseSpec::Unset);

        let title = registry.attribute_for("post", "title").unwrap();
        assert_eq!(title.default, Some(json!("untitled")));
    }

    #[test]
    fn test_schema_overwrite() {
        let registry = SchemaRegistry::create();
        registry.register(
            "post".to_string(),
            ResourceSchema::new().attribute("title", None),
        );
        registry.register(
            "post".to_string(),
            ResourceSchema::new().attribute("body", None),
        );
        let post = registry.get("post").unwrap();
        assert!(post.attributes.contains_key("body"));
        assert!(!post.attributes.contains_key("title"));
    }

    #[test]
    fn test_polymorphic_compatibility() {
        let registry = SchemaRegistry::create();
        registry.register("video".to_string(), ResourceSchema::new().implements("media"));
        registry.register("note".to_string(), ResourceSchema::new());

        assert!(registry.is_polymorphic_compatible("media", "video"));
        assert!(registry.is_polymorphic_compatible("note", "note"));
        assert!(!registry.is_polymorphic_compatible("media", "note"));
    }

    #[test]
    fn test_arc_clone_cheap() {
        let registry = SchemaRegistry::create();
        registry.register("post".to_string(), ResourceSchema::new());
        let a = registry.get("post").unwrap();
        let b = registry.clone().get("post").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
