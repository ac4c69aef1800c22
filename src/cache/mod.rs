//! Cache module: resource state and the commit lifecycle.
//!
//! The [Cache] owns one [CachedResource] per identifier and the [Graph] holding their
//! relationships. Server payloads come in through [Cache::put]; local edits through
//! [Cache::set_attr] and [Cache::update]. The view layer is told about every observable change
//! through [CacheCapabilities::notify_change] and polls the query methods when it re-renders.

mod resource;


pub use resource::CachedResource;

use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use crate::{
    config::GraphConfig,
    document::{ApiError, PrimaryData, ResourceDocument, ResourceObject},
    error::RelgraphError,
    event::{CacheCapabilities, NotificationKind},
    graph::{Graph, Operation, RelatedData, RelationshipView, Scheduler},
    identifier::{Identifier, IdentifierCache},
    schema::SchemaService,
};

pub struct Cache {
    graph: Graph,
    resources: HashMap<Identifier, CachedResource>,
    tombstones: HashMap<Identifier, CachedResource>,
    schema: Arc<dyn SchemaService>,
    capabilities: Arc<dyn CacheCapabilities>,
    identity: IdentifierCache,
    config: GraphConfig,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("resources", &self.resources.len())
            .field("tombstones", &self.tombstones.len())
            .field("graph", &self.graph)
            .finish()
    }
}

impl Cache {
    pub fn new(
        schema: Arc<dyn SchemaService>,
        capabilities: Arc<dyn CacheCapabilities>,
        scheduler: Arc<dyn Scheduler>,
        identity: IdentifierCache,
        config: GraphConfig,
    ) -> Self {
        let graph = Graph::new(
            schema.clone(),
            capabilities.clone(),
            scheduler,
            identity.clone(),
            config.clone(),
        );
        Cache {
            graph,
            resources: HashMap::new(),
            tombstones: HashMap::new(),
            schema,
            capabilities,
            identity,
            config,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn identity(&self) -> &IdentifierCache {
        &self.identity
    }

    pub fn peek(&self, identifier: &Identifier) -> Option<&CachedResource> {
        self.resources.get(identifier)
    }

    fn peek_mut(&mut self, identifier: &Identifier) -> Result<&mut CachedResource, RelgraphError> {
        self.resources
            .get_mut(identifier)
            .ok_or_else(|| RelgraphError::NotFound(format!("{identifier} is not in the cache")))
    }

    fn notify(&self, identifier: &Identifier, kind: NotificationKind, key: Option<&str>) {
        self.capabilities.notify_change(identifier, kind, key);
    }

    /// Store every resource of a server document. Returns the identifiers of the primary data.
    pub fn put(&mut self, document: ResourceDocument) -> Result<Vec<Identifier>, RelgraphError> {
        if !document.errors.is_empty() {
            tracing::debug!(
                "[Cache::put] document carries {} errors; they are reported through \
                 commit_was_rejected",
                document.errors.len()
            );
        }
        let primary = match &document.data {
            None => 0,
            Some(PrimaryData::One(_)) => 1,
            Some(PrimaryData::Many(resources)) => resources.len(),
        };
        let mut identifiers = Vec::with_capacity(primary);
        for (index, resource) in document.resources().into_iter().enumerate() {
            let identifier = self.identity.get_or_create(&resource.as_ref_payload())?;
            let calculate_changes = self.capabilities.has_record(&identifier);
            self.upsert(&identifier, resource, calculate_changes)?;
            if index < primary {
                identifiers.push(identifier);
            }
        }
        Ok(identifiers)
    }

    /// Merge one server resource. Returns the attribute keys whose visible value changed.
    ///
    /// Relationship payloads for declared fields are queued on the graph; undeclared ones are
    /// ignored.
    pub fn upsert(
        &mut self,
        identifier: &Identifier,
        resource: &ResourceObject,
        calculate_changes: bool,
    ) -> Result<Vec<String>, RelgraphError> {
        let cached = self.resources.entry(identifier.clone()).or_default();
        let is_first_load = cached.remote_attrs.is_none();
        if cached.id.is_none() {
            cached.id = resource.id.clone().or_else(|| identifier.id());
        }
        let empty = Map::new();
        let attrs = resource.attributes.as_ref().unwrap_or(&empty);
        let changed = cached.merge_remote(attrs, calculate_changes && !is_first_load);

        if let Some(relationships) = &resource.relationships {
            for (field, payload) in relationships {
                if self
                    .schema
                    .relationship_for(identifier.resource_type(), field)
                    .is_none()
                {
                    tracing::debug!(
                        "[Cache::upsert] ignoring undeclared relationship {identifier}.{field}"
                    );
                    continue;
                }
                self.graph.push(Operation::UpdateRelationship {
                    record: identifier.clone(),
                    field: field.clone(),
                    value: payload.clone(),
                })?;
            }
        }

        if is_first_load {
            self.notify(identifier, NotificationKind::Added, None);
        }
        for key in changed.iter() {
            self.notify(identifier, NotificationKind::Attributes, Some(key));
        }
        Ok(changed)
    }

    /// Register a record created on the client.
    pub fn client_did_create(
        &mut self,
        identifier: &Identifier,
        attrs: Option<Map<String, Value>>,
        relationships: BTreeMap<String, RelatedData>,
    ) -> Result<(), RelgraphError> {
        tracing::debug!("[Cache::client_did_create] {identifier}");
        let cached = self.resources.entry(identifier.clone()).or_default();
        cached.is_new = true;
        cached.local_attrs = Some(attrs.unwrap_or_default());
        cached.refresh_changes();
        self.graph.set_new(identifier, true);

        for (field, data) in relationships {
            let op = match data {
                RelatedData::One(value) => Operation::ReplaceRelatedRecord {
                    record: identifier.clone(),
                    field,
                    value,
                },
                RelatedData::Many(value) => Operation::ReplaceRelatedRecords {
                    record: identifier.clone(),
                    field,
                    value,
                },
            };
            self.graph.update(op, false)?;
        }
        Ok(())
    }

    pub fn set_attr(&mut self, identifier: &Identifier, key: &str, value: Value) {
        self.resources
            .entry(identifier.clone())
            .or_default()
            .set_local(key, value);
        self.notify(identifier, NotificationKind::Attributes, Some(key));
    }

    /// Local, then inflight, then remote, then the schema default.
    pub fn get_attr(&self, identifier: &Identifier, key: &str) -> Option<Value> {
        self.resources
            .get(identifier)
            .and_then(|cached| cached.attr(key))
            .cloned()
            .or_else(|| {
                self.schema
                    .attribute_for(identifier.resource_type(), key)
                    .and_then(|field| field.default)
            })
    }

    pub fn changed_attrs(&self, identifier: &Identifier) -> BTreeMap<String, (Value, Value)> {
        self.resources
            .get(identifier)
            .map(|cached| cached.changes.clone())
            .unwrap_or_default()
    }

    pub fn has_changed_attrs(&self, identifier: &Identifier) -> bool {
        self.resources
            .get(identifier)
            .is_some_and(CachedResource::has_changed_attrs)
    }

    /// Discard uncommitted attribute edits, returning the keys that were dirty.
    ///
    /// A record that was never saved is deleted from the graph.
    pub fn rollback_attrs(&mut self, identifier: &Identifier) -> Result<Vec<String>, RelgraphError> {
        let cached = self.peek_mut(identifier)?;
        cached.is_deleted = false;
        let dirty = cached.rollback();
        let was_new = cached.is_new;
        if was_new {
            cached.is_deletion_committed = true;
            cached.is_deleted = true;
            cached.is_new = false;
        }
        let had_errors = cached.errors.take().is_some();

        if was_new {
            self.graph.push(Operation::DeleteRecord {
                record: identifier.clone(),
                is_new: true,
            })?;
        }
        if had_errors {
            self.notify(identifier, NotificationKind::Errors, None);
        }
        self.notify(identifier, NotificationKind::State, None);
        for key in dirty.iter() {
            self.notify(identifier, NotificationKind::Attributes, Some(key));
        }
        Ok(dirty)
    }

    /// Freeze local edits while a save is in flight.
    pub fn will_commit(&mut self, identifier: &Identifier) -> Result<(), RelgraphError> {
        self.peek_mut(identifier)?.freeze_inflight();
        Ok(())
    }

    /// A save succeeded. Returns the identifier that owns the record afterwards, which differs
    /// from `identifier` when the server assigned an id that was already known.
    pub fn did_commit(
        &mut self,
        identifier: &Identifier,
        data: Option<ResourceObject>,
    ) -> Result<Identifier, RelgraphError> {
        self.peek_mut(identifier)?;
        let mut identifier = identifier.clone();

        if let Some(id) = data.as_ref().and_then(|data| data.id.as_deref()) {
            if identifier.id().is_none() {
                if let Some((stale, kept)) = self.identity.update_record_identifier(&identifier, id)? {
                    self.graph.update(
                        Operation::MergeIdentifiers {
                            record: stale.clone(),
                            value: kept.clone(),
                        },
                        false,
                    )?;
                    self.graph.set_new(&stale, false);
                    if let Some(resource) = self.resources.remove(&stale) {
                        self.resources.entry(kept.clone()).or_insert(resource);
                    }
                    identifier = kept;
                }
                self.notify(&identifier, NotificationKind::Identity, None);
            }
        }

        let calculate_changes = self.capabilities.has_record(&identifier);
        let cached = self.peek_mut(&identifier)?;
        cached.is_new = false;
        if cached.id.is_none() {
            cached.id = identifier.id();
        }
        self.graph.set_new(&identifier, false);

        let cached = self.peek_mut(&identifier)?;
        if cached.is_deleted {
            cached.is_deletion_committed = true;
            self.graph.push(Operation::DeleteRecord {
                record: identifier.clone(),
                is_new: false,
            })?;
            self.notify(&identifier, NotificationKind::State, None);
            return Ok(identifier);
        }

        let attrs = data.as_ref().and_then(|data| data.attributes.as_ref());
        let changed = cached.commit_inflight(attrs, calculate_changes);
        let had_errors = cached.errors.take().is_some();

        if let Some(relationships) = data.and_then(|data| data.relationships) {
            for (field, payload) in relationships {
                if self
                    .schema
                    .relationship_for(identifier.resource_type(), &field)
                    .is_some()
                {
                    self.graph.push(Operation::UpdateRelationship {
                        record: identifier.clone(),
                        field,
                        value: payload,
                    })?;
                }
            }
        }

        if had_errors {
            self.notify(&identifier, NotificationKind::Errors, None);
        }
        self.notify(&identifier, NotificationKind::State, None);
        for key in changed.iter() {
            self.notify(&identifier, NotificationKind::Attributes, Some(key));
        }
        Ok(identifier)
    }

    /// A save failed. Inflight edits return to the local tier so a retry resumes from them.
    pub fn commit_was_rejected(
        &mut self,
        identifier: &Identifier,
        errors: Option<Vec<ApiError>>,
    ) -> Result<(), RelgraphError> {
        let cached = self.peek_mut(identifier)?;
        cached.unfreeze_inflight();
        if errors.is_some() {
            cached.errors = errors;
            self.notify(identifier, NotificationKind::Errors, None);
        }
        self.notify(identifier, NotificationKind::State, None);
        Ok(())
    }

    pub fn set_is_deleted(&mut self, identifier: &Identifier, is_deleted: bool) -> Result<(), RelgraphError> {
        self.peek_mut(identifier)?.is_deleted = is_deleted;
        self.notify(identifier, NotificationKind::State, None);
        Ok(())
    }

    pub fn is_empty(&self, identifier: &Identifier) -> bool {
        self.resources
            .get(identifier)
            .is_none_or(CachedResource::is_empty)
    }

    pub fn is_new(&self, identifier: &Identifier) -> bool {
        self.resources.get(identifier).is_some_and(|c| c.is_new)
    }

    pub fn is_deleted(&self, identifier: &Identifier) -> bool {
        self.resources.get(identifier).is_some_and(|c| c.is_deleted)
    }

    pub fn is_deletion_committed(&self, identifier: &Identifier) -> bool {
        self.resources
            .get(identifier)
            .is_some_and(|c| c.is_deletion_committed)
    }

    pub fn get_errors(&self, identifier: &Identifier) -> Vec<ApiError> {
        self.resources
            .get(identifier)
            .and_then(|c| c.errors.clone())
            .unwrap_or_default()
    }

    pub fn get_relationship(
        &mut self,
        identifier: &Identifier,
        field: &str,
    ) -> Result<RelationshipView, RelgraphError> {
        self.graph.get_data(identifier, field)
    }

    /// Apply a local relationship mutation.
    pub fn update(&mut self, op: Operation) -> Result<(), RelgraphError> {
        self.graph.update(op, false)
    }

    /// Run the graph's pending remote and local work.
    pub fn flush(&mut self) -> Result<(), RelgraphError> {
        self.graph.flush()
    }

    /// Release the cached state of `identifier`.
    ///
    /// The host dematerializes the record before calling this. When no identifier reachable from
    /// `identifier` still has a materialized record, the whole cluster is removed from the graph
    /// and disconnected from the view layer.
    pub fn unload_record(&mut self, identifier: &Identifier) -> Result<(), RelgraphError> {
        let Some(mut cached) = self.resources.remove(identifier) else {
            tracing::debug!("[Cache::unload_record] {identifier} is not cached");
            return self.graph.unload(identifier, false);
        };
        tracing::debug!("[Cache::unload_record] {identifier}");
        let notify_removed = !cached.is_deletion_committed;
        if cached.is_new || cached.is_deletion_committed {
            self.graph.push(Operation::DeleteRecord {
                record: identifier.clone(),
                is_new: cached.is_new,
            })?;
        } else {
            self.graph.unload(identifier, false)?;
        }
        cached.local_attrs = None;
        cached.remote_attrs = None;
        cached.inflight_attrs = None;
        cached.changes.clear();
        self.tombstone(identifier.clone(), cached);

        let related = self.all_related_identifiers(identifier);
        let mut removed = false;
        if related.iter().all(|r| !self.capabilities.has_record(r)) {
            for member in related.iter() {
                self.notify(member, NotificationKind::Removed, None);
                removed = true;
                self.disconnect(member)?;
            }
        }
        if !removed && notify_removed {
            self.notify(identifier, NotificationKind::Removed, None);
        }
        Ok(())
    }

    fn disconnect(&mut self, identifier: &Identifier) -> Result<(), RelgraphError> {
        tracing::trace!("[Cache::disconnect] {identifier}");
        self.graph.remove(identifier)?;
        if let Some(cached) = self.resources.remove(identifier) {
            self.tombstone(identifier.clone(), cached);
        }
        self.identity.forget(identifier);
        self.capabilities.disconnect_record(identifier);
        Ok(())
    }

    fn tombstone(&mut self, identifier: Identifier, cached: CachedResource) {
        self.tombstones.insert(identifier, cached);
        if self.tombstones.len() > self.config.tombstone_capacity {
            self.flush_tombstones();
        }
    }

    /// Drop the state of unloaded resources.
    pub fn flush_tombstones(&mut self) {
        if !self.tombstones.is_empty() {
            tracing::debug!("[Cache::flush_tombstones] clearing {}", self.tombstones.len());
            self.tombstones.clear();
        }
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Every identifier reachable from `root` through the local or remote membership of a
    /// declared edge, `root` first, in breadth-first order.
    pub fn all_related_identifiers(&self, root: &Identifier) -> Vec<Identifier> {
        let mut seen = HashSet::from([root.clone()]);
        let mut queue = VecDeque::from([root.clone()]);
        let mut related = Vec::new();
        while let Some(current) = queue.pop_front() {
            for next in self.graph.related_identifiers(&current) {
                if seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
            related.push(current);
        }
        related
    }
}
