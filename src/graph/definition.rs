//! Edge definition resolution.
//!
//! A relationship field is "upgraded" the first time anything touches it: its schema metadata is
//! paired with the metadata of its inverse (declared, discovered by convention, or a synthesized
//! implicit inverse) and the result is memoized for both sides. Resolution never changes once
//! cached; schemas are assumed immutable for the lifetime of a graph.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    error::RelgraphError,
    schema::{InverseSpec, RelationshipField, RelationshipKind, SchemaService},
};

/// The fully resolved, side-specific definition of a relationship field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradedMeta {
    pub kind: RelationshipKind,
    /// The related type.
    pub resource_type: String,
    pub key: String,
    pub is_async: bool,
    pub is_implicit: bool,
    pub is_collection: bool,
    pub is_polymorphic: bool,

    pub inverse_kind: RelationshipKind,
    pub inverse_key: String,
    pub inverse_type: String,
    pub inverse_is_async: bool,
    pub inverse_is_implicit: bool,
    pub inverse_is_collection: bool,
    pub inverse_is_polymorphic: bool,
}

#[derive(Debug, Clone)]
struct MetaSide {
    kind: RelationshipKind,
    resource_type: String,
    key: String,
    is_async: bool,
    is_implicit: bool,
    is_collection: bool,
    is_polymorphic: bool,
}

impl MetaSide {
    fn from_field(key: &str, field: &RelationshipField) -> Self {
        MetaSide {
            kind: field.kind,
            resource_type: field.related_type.clone(),
            key: key.to_string(),
            is_async: field.is_async,
            is_implicit: false,
            is_collection: field.kind.is_collection(),
            is_polymorphic: field.polymorphic,
        }
    }

    fn implicit(owner_type: &str, key: String) -> Self {
        MetaSide {
            kind: RelationshipKind::Implicit,
            resource_type: owner_type.to_string(),
            key,
            is_async: false,
            is_implicit: true,
            is_collection: true,
            is_polymorphic: false,
        }
    }

    fn with_inverse(&self, inverse: &MetaSide) -> UpgradedMeta {
        UpgradedMeta {
            kind: self.kind,
            resource_type: self.resource_type.clone(),
            key: self.key.clone(),
            is_async: self.is_async,
            is_implicit: self.is_implicit,
            is_collection: self.is_collection,
            is_polymorphic: self.is_polymorphic,
            inverse_kind: inverse.kind,
            inverse_key: inverse.key.clone(),
            inverse_type: inverse.resource_type.clone(),
            inverse_is_async: inverse.is_async,
            inverse_is_implicit: inverse.is_implicit,
            inverse_is_collection: inverse.is_collection,
            inverse_is_polymorphic: inverse.is_polymorphic,
        }
    }
}

pub fn implicit_key_for(resource_type: &str, field: &str) -> String {
    format!("implicit-{resource_type}:{field}")
}

/// Both sides of a resolved relationship.
#[derive(Debug, Clone)]
pub struct EdgeDefinition {
    pub lhs_key: String,
    pub lhs_model_names: Vec<String>,
    pub lhs_base_type: String,
    pub lhs_field: String,
    pub lhs: Arc<UpgradedMeta>,
    pub lhs_is_polymorphic: bool,

    pub rhs_key: String,
    pub rhs_model_names: Vec<String>,
    pub rhs_base_type: String,
    pub rhs_field: String,
    pub rhs: Arc<UpgradedMeta>,
    pub rhs_is_polymorphic: bool,

    pub has_inverse: bool,
    pub is_self_referential: bool,
    pub is_reflexive: bool,
}

impl EdgeDefinition {
    /// Whether `(resource_type, field)` names the left hand side of this edge.
    pub fn is_lhs(&self, resource_type: &str, field: &str) -> bool {
        if field != self.lhs_field {
            return false;
        }
        self.is_self_referential
            || resource_type == self.lhs_base_type
            || self.lhs_model_names.iter().any(|t| t == resource_type)
    }
}

/// Memoized edge definitions, shared by every edge of a graph.
#[derive(Debug, Default)]
pub struct DefinitionCache {
    edges: Vec<EdgeDefinition>,
    // `None` records that the field is known not to exist.
    by_field: HashMap<String, HashMap<String, Option<usize>>>,
    metas: HashMap<String, HashMap<String, Arc<UpgradedMeta>>>,
}

impl DefinitionCache {
    pub fn new() -> Self {
        DefinitionCache::default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn lookup(&self, resource_type: &str, field: &str) -> Option<Option<usize>> {
        self.by_field
            .get(resource_type)
            .and_then(|fields| fields.get(field))
            .copied()
    }

    fn set(&mut self, resource_type: &str, field: &str, index: Option<usize>) {
        self.by_field
            .entry(resource_type.to_string())
            .or_default()
            .insert(field.to_string(), index);
    }

    fn edge_at(&self, index: usize) -> Result<&EdgeDefinition, RelgraphError> {
        self.edges.get(index).ok_or_else(|| {
            RelgraphError::Definition(format!("edge definition {index} is not cached"))
        })
    }

    /// The resolved edge for `(resource_type, field)`, if it has been resolved.
    pub fn peek(&self, resource_type: &str, field: &str) -> Option<&EdgeDefinition> {
        self.lookup(resource_type, field)
            .flatten()
            .and_then(|index| self.edges.get(index))
    }

    /// The side-specific definition for `(resource_type, field)`, resolving it on first access.
    pub fn meta_for(
        &mut self,
        schema: &dyn SchemaService,
        polymorphic: &HashMap<String, HashSet<String>>,
        resource_type: &str,
        field: &str,
    ) -> Result<Arc<UpgradedMeta>, RelgraphError> {
        if let Some(meta) = self
            .metas
            .get(resource_type)
            .and_then(|fields| fields.get(field))
        {
            return Ok(meta.clone());
        }
        let index = self
            .resolve(schema, polymorphic, resource_type, field)?
            .ok_or_else(|| {
                RelgraphError::Definition(format!(
                    "Could not determine relationship information for {resource_type}.{field}"
                ))
            })?;
        let edge = self.edge_at(index)?;
        let meta = if edge.is_lhs(resource_type, field) {
            edge.lhs.clone()
        } else {
            edge.rhs.clone()
        };
        self.metas
            .entry(resource_type.to_string())
            .or_default()
            .insert(field.to_string(), meta.clone());
        Ok(meta)
    }

    /// Resolve and memoize the edge definition for `(resource_type, field)`.
    ///
    /// Returns `Ok(None)` when neither the type nor any of its registered polymorphic equivalents
    /// declares the field.
    pub fn resolve(
        &mut self,
        schema: &dyn SchemaService,
        polymorphic: &HashMap<String, HashSet<String>>,
        resource_type: &str,
        field: &str,
    ) -> Result<Option<usize>, RelgraphError> {
        if let Some(cached) = self.lookup(resource_type, field) {
            return Ok(cached);
        }

        let Some(declared) = schema.relationship_for(resource_type, field) else {
            return Ok(self.resolve_through_polymorphic(polymorphic, resource_type, field));
        };
        let definition = MetaSide::from_field(field, &declared);
        let inverse_type = declared.related_type.clone();

        let inverse = match &declared.inverse {
            InverseSpec::None => None,
            InverseSpec::Named(inverse_key) => {
                match schema.relationship_for(&inverse_type, inverse_key) {
                    Some(inverse_field) => {
                        if inverse_field.inverse == InverseSpec::None {
                            return Err(RelgraphError::Definition(format!(
                                "The {inverse_type}.{inverse_key} relationship declares no inverse, \
                                 but it was named as the inverse of {resource_type}.{field}"
                            )));
                        }
                        Some(MetaSide::from_field(inverse_key, &inverse_field))
                    }
                    None if declared.polymorphic => {
                        tracing::debug!(
                            "[DefinitionCache::resolve] {inverse_type} does not declare \
                             {inverse_key}; using a placeholder inverse for {resource_type}.{field}"
                        );
                        Some(MetaSide {
                            kind: RelationshipKind::BelongsTo,
                            resource_type: resource_type.to_string(),
                            key: inverse_key.clone(),
                            is_async: declared.is_async,
                            is_implicit: false,
                            is_collection: false,
                            is_polymorphic: false,
                        })
                    }
                    None => {
                        return Err(RelgraphError::Definition(format!(
                            "We found no field named '{inverse_key}' on the schema for \
                             '{inverse_type}' to be the inverse of the '{field}' relationship on \
                             '{resource_type}'"
                        )))
                    }
                }
            }
            InverseSpec::Unset => {
                convention_inverse(schema, resource_type, field, &inverse_type)?
                    .map(|(inverse_key, inverse_field)| {
                        MetaSide::from_field(&inverse_key, &inverse_field)
                    })
            }
        };

        let index = match inverse {
            None => self.insert_implicit(resource_type, field, &inverse_type, definition),
            Some(inverse) => self.insert_pair(resource_type, field, &inverse_type, definition, inverse)?,
        };
        Ok(Some(index))
    }

    fn resolve_through_polymorphic(
        &mut self,
        polymorphic: &HashMap<String, HashSet<String>>,
        resource_type: &str,
        field: &str,
    ) -> Option<usize> {
        let mut alternates: Vec<&String> = polymorphic
            .get(resource_type)
            .map(|types| types.iter().collect())
            .unwrap_or_default();
        alternates.sort();
        for alternate in alternates {
            if let Some(Some(index)) = self.lookup(alternate, field) {
                self.set(resource_type, field, Some(index));
                if let Some(edge) = self.edges.get_mut(index) {
                    let names = if edge.lhs_field == field {
                        &mut edge.lhs_model_names
                    } else {
                        &mut edge.rhs_model_names
                    };
                    if !names.iter().any(|t| t == resource_type) {
                        names.push(resource_type.to_string());
                    }
                }
                return Some(index);
            }
        }
        // not memoized: a polymorphic equivalent registered later may still declare the field
        None
    }

    fn insert_implicit(
        &mut self,
        resource_type: &str,
        field: &str,
        inverse_type: &str,
        definition: MetaSide,
    ) -> usize {
        let inverse_key = implicit_key_for(resource_type, field);
        let inverse = MetaSide::implicit(resource_type, inverse_key.clone());
        let edge = EdgeDefinition {
            lhs_key: format!("{resource_type}:{field}"),
            lhs_model_names: vec![resource_type.to_string()],
            lhs_base_type: resource_type.to_string(),
            lhs_field: field.to_string(),
            lhs: Arc::new(definition.with_inverse(&inverse)),
            lhs_is_polymorphic: definition.is_polymorphic,
            rhs_key: inverse_key.clone(),
            rhs_model_names: vec![inverse_type.to_string()],
            rhs_base_type: inverse_type.to_string(),
            rhs_field: inverse_key.clone(),
            rhs: Arc::new(inverse.with_inverse(&definition)),
            rhs_is_polymorphic: false,
            has_inverse: false,
            is_self_referential: resource_type == inverse_type,
            is_reflexive: false,
        };
        let index = self.edges.len();
        self.edges.push(edge);
        self.set(inverse_type, &inverse_key, Some(index));
        self.set(resource_type, field, Some(index));
        index
    }

    fn insert_pair(
        &mut self,
        resource_type: &str,
        field: &str,
        inverse_type: &str,
        definition: MetaSide,
        inverse: MetaSide,
    ) -> Result<usize, RelgraphError> {
        // The type the inverse field points at; differs from `resource_type` when the inverse is
        // declared against an abstract type.
        let base_type = inverse.resource_type.clone();
        let inverse_key = inverse.key.clone();

        let cached = self
            .lookup(&base_type, field)
            .flatten()
            .or_else(|| self.lookup(inverse_type, &inverse_key).flatten());
        if let Some(index) = cached {
            let edge = self.edges.get_mut(index).ok_or_else(|| {
                RelgraphError::Definition(format!("edge definition {index} is not cached"))
            })?;
            if !edge.has_inverse {
                return Err(RelgraphError::Definition(format!(
                    "The {inverse_type}.{inverse_key} relationship declares no inverse, but it \
                     was resolved as the inverse for {resource_type}.{field}"
                )));
            }
            let names = if edge.lhs_base_type == base_type {
                &mut edge.lhs_model_names
            } else {
                &mut edge.rhs_model_names
            };
            if !names.iter().any(|t| t == resource_type) {
                names.push(resource_type.to_string());
            }
            self.set(resource_type, field, Some(index));
            return Ok(index);
        }

        let mut lhs_model_names = vec![resource_type.to_string()];
        if resource_type != base_type {
            lhs_model_names.push(base_type.clone());
        }
        let is_self_referential = resource_type == inverse_type;
        let edge = EdgeDefinition {
            lhs_key: format!("{base_type}:{field}"),
            lhs_model_names,
            lhs_base_type: base_type.clone(),
            lhs_field: field.to_string(),
            lhs: Arc::new(definition.with_inverse(&inverse)),
            lhs_is_polymorphic: definition.is_polymorphic,
            rhs_key: format!("{inverse_type}:{inverse_key}"),
            rhs_model_names: vec![inverse_type.to_string()],
            rhs_base_type: inverse_type.to_string(),
            rhs_field: inverse_key.clone(),
            rhs: Arc::new(inverse.with_inverse(&definition)),
            rhs_is_polymorphic: inverse.is_polymorphic,
            has_inverse: true,
            is_self_referential,
            is_reflexive: is_self_referential && field == inverse_key,
        };
        let index = self.edges.len();
        self.edges.push(edge);
        self.set(&base_type, field, Some(index));
        self.set(resource_type, field, Some(index));
        self.set(inverse_type, &inverse_key, Some(index));
        Ok(index)
    }
}

/// Find the inverse of `owner_type.field` on `related_type` when none is declared: the single
/// field pointing back at `owner_type` whose own inverse is unset or names `field`.
fn convention_inverse(
    schema: &dyn SchemaService,
    owner_type: &str,
    field: &str,
    related_type: &str,
) -> Result<Option<(String, RelationshipField)>, RelgraphError> {
    let Some(related) = schema.resource(related_type) else {
        return Ok(None);
    };
    let candidates: Vec<(&String, &RelationshipField)> = related
        .relationships
        .iter()
        .filter(|(_, candidate)| {
            schema.is_polymorphic_compatible(&candidate.related_type, owner_type)
        })
        .filter(|(_, candidate)| match &candidate.inverse {
            InverseSpec::Unset => true,
            InverseSpec::Named(name) => name == field,
            InverseSpec::None => false,
        })
        .collect();

    let exact: Vec<&(&String, &RelationshipField)> = candidates
        .iter()
        .filter(|(_, candidate)| candidate.inverse == InverseSpec::Named(field.to_string()))
        .collect();
    let chosen = match (exact.len(), candidates.len()) {
        (1, _) => exact[0],
        (0, 0) => return Ok(None),
        (0, 1) => &candidates[0],
        _ => {
            let names: Vec<&str> = candidates.iter().map(|(name, _)| name.as_str()).collect();
            return Err(RelgraphError::Definition(format!(
                "Found more than one possible inverse for {owner_type}.{field} on \
                 {related_type}: {names:?}; declare the inverse explicitly"
            )));
        }
    };
    Ok(Some((chosen.0.clone(), chosen.1.clone())))
}
