//! Stable resource identifiers and the identity service that hands them out.
//!
//! An [Identifier] stands in for a resource without requiring the resource to be materialized.
//! Identity is its `lid`: two identifiers are the same key if and only if they share a `lid`. The
//! server `id` is attached once known and is visible to every clone of the identifier, so edges
//! stored before the id was assigned observe it as well.

use parking_lot::RwLock;
use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};
use std::{
    cmp::Ordering,
    collections::HashMap,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    sync::Arc,
};
use uuid::Uuid;

use crate::error::RelgraphError;

#[derive(Debug)]
struct IdentifierInner {
    resource_type: String,
    lid: String,
    id: RwLock<Option<String>>,
}

/// Opaque, process-wide unique handle for a resource.
///
/// Cloning is cheap (reference counted). Equality, hashing and ordering only consider the `lid`.
#[derive(Clone, Debug)]
pub struct Identifier(Arc<IdentifierInner>);

impl Identifier {
    fn new(resource_type: &str, id: Option<&str>, lid: String) -> Self {
        Identifier(Arc::new(IdentifierInner {
            resource_type: resource_type.to_string(),
            lid,
            id: RwLock::new(id.map(str::to_string)),
        }))
    }

    pub fn resource_type(&self) -> &str {
        &self.0.resource_type
    }

    pub fn lid(&self) -> &str {
        &self.0.lid
    }

    pub fn id(&self) -> Option<String> {
        self.0.id.read().clone()
    }

    /// True when both handles point at the same allocation, which is stronger than `==`.
    pub fn ptr_eq(&self, other: &Identifier) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn as_ref_payload(&self) -> ResourceRef {
        ResourceRef {
            resource_type: self.resource_type().to_string(),
            id: self.id(),
            lid: Some(self.lid().to_string()),
        }
    }

    fn assign_id(&self, id: &str) {
        *self.0.id.write() = Some(id.to_string());
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.0.lid == other.0.lid
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.lid.hash(state);
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.lid.cmp(&other.0.lid)
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{}:{}", self.resource_type(), id),
            None => write!(f, "{}:{}", self.resource_type(), self.lid()),
        }
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Identifier", 3)?;
        state.serialize_field("type", self.resource_type())?;
        state.serialize_field("id", &self.id())?;
        state.serialize_field("lid", self.lid())?;
        state.end()
    }
}

/// A resource identifier object as it appears in a payload: `{ type, id?, lid? }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

impl ResourceRef {
    pub fn new(resource_type: &str, id: &str) -> Self {
        ResourceRef {
            resource_type: resource_type.to_string(),
            id: Some(id.to_string()),
            lid: None,
        }
    }

    /// Check that the reference is resolvable: a non-empty type and either an id or a lid.
    pub fn validate(&self) -> Result<(), RelgraphError> {
        if self.resource_type.trim().is_empty() {
            return Err(RelgraphError::Payload(format!(
                "resource reference {self:?} is missing a type"
            )));
        }
        let has_id = self.id.as_deref().is_some_and(|id| !id.is_empty());
        let has_lid = self.lid.as_deref().is_some_and(|lid| !lid.is_empty());
        if !has_id && !has_lid {
            return Err(RelgraphError::Payload(format!(
                "resource reference of type '{}' has neither an id nor a lid",
                self.resource_type
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct IdentifierIndex {
    by_lid: HashMap<String, Identifier>,
    by_id: HashMap<(String, String), Identifier>,
}

/// The identity service: hands out one [Identifier] per resource and reconciles client generated
/// identifiers with server assigned ids.
///
/// Cheap to clone; clones share the same index.
#[derive(Debug, Clone, Default)]
pub struct IdentifierCache(Arc<RwLock<IdentifierIndex>>);

impl IdentifierCache {
    pub fn new() -> Self {
        IdentifierCache::default()
    }

    fn server_lid(resource_type: &str, id: &str) -> String {
        format!("@lid:{resource_type}-{id}")
    }

    /// Return the identifier for `reference`, creating it if it has never been seen.
    pub fn get_or_create(&self, reference: &ResourceRef) -> Result<Identifier, RelgraphError> {
        reference.validate()?;
        if let Some(found) = self.peek(reference) {
            if let (None, Some(id)) = (found.id(), reference.id.as_deref()) {
                found.assign_id(id);
                self.0.write().by_id.insert(
                    (found.resource_type().to_string(), id.to_string()),
                    found.clone(),
                );
            }
            return Ok(found);
        }

        let id = reference.id.as_deref().filter(|id| !id.is_empty());
        let lid = match (&reference.lid, id) {
            (Some(lid), _) if !lid.is_empty() => lid.clone(),
            (_, Some(id)) => IdentifierCache::server_lid(&reference.resource_type, id),
            _ => {
                return Err(RelgraphError::Payload(format!(
                    "resource reference {reference:?} has neither an id nor a lid"
                )))
            }
        };
        let identifier = Identifier::new(&reference.resource_type, id, lid);
        let mut index = self.0.write();
        index
            .by_lid
            .insert(identifier.lid().to_string(), identifier.clone());
        if let Some(id) = id {
            index.by_id.insert(
                (reference.resource_type.clone(), id.to_string()),
                identifier.clone(),
            );
        }
        tracing::trace!("[IdentifierCache::get_or_create] created {identifier}");
        Ok(identifier)
    }

    /// Create an identifier for a record that only exists client side.
    pub fn create_local(&self, resource_type: &str) -> Identifier {
        let identifier = Identifier::new(resource_type, None, format!("@lid:{}", Uuid::new_v4()));
        self.0
            .write()
            .by_lid
            .insert(identifier.lid().to_string(), identifier.clone());
        identifier
    }

    pub fn peek(&self, reference: &ResourceRef) -> Option<Identifier> {
        let index = self.0.read();
        if let Some(found) = reference.lid.as_ref().and_then(|lid| index.by_lid.get(lid)) {
            return Some(found.clone());
        }
        reference.id.as_ref().and_then(|id| {
            index
                .by_id
                .get(&(reference.resource_type.clone(), id.clone()))
                .cloned()
        })
    }

    /// Attach a server assigned `id` to `identifier`.
    ///
    /// Returns `Some((stale, kept))` when another identifier already owns `(type, id)`: the caller
    /// must issue a `MergeIdentifiers` operation moving `stale` into `kept` before discarding
    /// `stale`. Afterwards lookups by the stale lid resolve to `kept`.
    pub fn update_record_identifier(
        &self,
        identifier: &Identifier,
        id: &str,
    ) -> Result<Option<(Identifier, Identifier)>, RelgraphError> {
        if id.is_empty() {
            return Err(RelgraphError::Payload(format!(
                "cannot assign an empty id to {identifier}"
            )));
        }
        match identifier.id() {
            Some(existing) if existing == id => return Ok(None),
            Some(existing) => {
                return Err(RelgraphError::Protocol(format!(
                    "cannot change the id of {identifier} from '{existing}' to '{id}'"
                )))
            }
            None => {}
        }

        let key = (identifier.resource_type().to_string(), id.to_string());
        let mut index = self.0.write();
        if let Some(kept) = index.by_id.get(&key).cloned() {
            if kept != *identifier {
                tracing::debug!(
                    "[IdentifierCache::update_record_identifier] {} collides with {kept}, merging",
                    identifier.lid()
                );
                index
                    .by_lid
                    .insert(identifier.lid().to_string(), kept.clone());
                return Ok(Some((identifier.clone(), kept)));
            }
        }
        identifier.assign_id(id);
        index.by_id.insert(key, identifier.clone());
        Ok(None)
    }

    /// Drop every index entry pointing at `identifier`.
    pub fn forget(&self, identifier: &Identifier) {
        let mut index = self.0.write();
        index.by_lid.retain(|_, v| v != identifier);
        index.by_id.retain(|_, v| v != identifier);
    }

    pub fn len(&self) -> usize {
        self.0.read().by_lid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_get_or_create_is_stable() {
        let cache = IdentifierCache::new();
        let a = cache.get_or_create(&ResourceRef::new("post", "1")).unwrap();
        let b = cache.get_or_create(&ResourceRef::new("post", "1")).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.lid(), "@lid:post-1");
        assert_eq!(format!("{a}"), "post:1");
    }

    #[test]
    fn test_reference_validation() {
        let cache = IdentifierCache::new();
        let missing_type = ResourceRef {
            resource_type: "".to_string(),
            id: Some("1".to_string()),
            lid: None,
        };
        assert!(cache.get_or_create(&missing_type).is_err());

        let missing_id = ResourceRef {
            resource_type: "post".to_string(),
            id: None,
            lid: None,
        };
        assert!(matches!(
            cache.get_or_create(&missing_id),
            Err(RelgraphError::Payload(_))
        ));
    }

    #[test]
    fn test_local_identifier_receives_id() {
        let cache = IdentifierCache::new();
        let local = cache.create_local("post");
        let clone = local.clone();
        assert_eq!(local.id(), None);

        assert_eq!(cache.update_record_identifier(&local, "7").unwrap(), None);
        assert_eq!(clone.id(), Some("7".to_string()));
        let found = cache.peek(&ResourceRef::new("post", "7")).unwrap();
        assert!(found.ptr_eq(&local));
    }

    #[test]
    fn test_id_collision_requests_merge() {
        let cache = IdentifierCache::new();
        let existing = cache.get_or_create(&ResourceRef::new("post", "7")).unwrap();
        let local = cache.create_local("post");

        let merge = cache.update_record_identifier(&local, "7").unwrap();
        assert_eq!(merge, Some((local.clone(), existing.clone())));

        let by_lid = ResourceRef {
            resource_type: "post".to_string(),
            id: None,
            lid: Some(local.lid().to_string()),
        };
        assert!(cache.peek(&by_lid).unwrap().ptr_eq(&existing));
    }

    #[test]
    fn test_changing_an_assigned_id_is_rejected() {
        let cache = IdentifierCache::new();
        let post = cache.get_or_create(&ResourceRef::new("post", "1")).unwrap();
        assert!(cache.update_record_identifier(&post, "2").is_err());
    }
}
