//! Graph: the node/edge store and operation dispatcher.
//!
//! Every edge is addressed by an `(identifier, field)` pair and created lazily on first access.
//! Remote operations are queued by [Graph::push] and applied as one transaction per flush; local
//! operations are applied immediately through [Graph::update]. Collection edges touched by remote
//! updates are rebuilt by a deferred local sync pass.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use super::{
    definition::{DefinitionCache, UpgradedMeta},
    edge::{BelongsToEdge, Edge, HasManyEdge, ImplicitEdge, RelationshipView},
    operation::Operation,
    schedule::{FlushQueue, Scheduler},
};
use crate::{
    config::GraphConfig,
    error::RelgraphError,
    event::{CacheCapabilities, NotificationKind},
    identifier::{Identifier, IdentifierCache},
    schema::{RelationshipKind, SchemaService},
};

type EdgeMap = HashMap<String, Option<Edge>>;

#[derive(Debug, Default)]
struct PushedUpdates {
    deletions: Vec<Operation>,
    has_many: Vec<Operation>,
    belongs_to: Vec<Operation>,
}

impl PushedUpdates {
    fn len(&self) -> usize {
        self.deletions.len() + self.has_many.len() + self.belongs_to.len()
    }
}

/// Mutable access to an existing edge without borrowing the rest of the graph.
pub(crate) fn edge_slot<'a>(
    identifiers: &'a mut HashMap<Identifier, EdgeMap>,
    identifier: &Identifier,
    field: &str,
) -> Option<&'a mut Edge> {
    identifiers
        .get_mut(identifier)
        .and_then(|edges| edges.get_mut(field))
        .and_then(Option::as_mut)
}

pub struct Graph {
    pub(crate) identifiers: HashMap<Identifier, EdgeMap>,
    pub(crate) definitions: DefinitionCache,
    pub(crate) polymorphic_types: HashMap<String, HashSet<String>>,
    pub(crate) schema: Arc<dyn SchemaService>,
    pub(crate) capabilities: Arc<dyn CacheCapabilities>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) identity: IdentifierCache,
    pub(crate) config: GraphConfig,
    pub(crate) new_records: HashSet<Identifier>,
    pub(crate) removing: Option<Identifier>,
    pushed: PushedUpdates,
    will_sync_remote: bool,
    will_sync_local: bool,
    pending_sync: Vec<(Identifier, String)>,
    pending_sync_keys: HashSet<(Identifier, String)>,
    transaction: Option<HashSet<(Identifier, String)>>,
    silence_notifications: bool,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.identifiers.len())
            .field("definitions", &self.definitions.len())
            .field("polymorphic_types", &self.polymorphic_types)
            .field("pending_remote", &self.pushed.len())
            .field("pending_sync", &self.pending_sync.len())
            .finish()
    }
}

impl Graph {
    pub fn new(
        schema: Arc<dyn SchemaService>,
        capabilities: Arc<dyn CacheCapabilities>,
        scheduler: Arc<dyn Scheduler>,
        identity: IdentifierCache,
        config: GraphConfig,
    ) -> Self {
        Graph {
            identifiers: HashMap::new(),
            definitions: DefinitionCache::new(),
            polymorphic_types: HashMap::new(),
            schema,
            capabilities,
            scheduler,
            identity,
            config,
            new_records: HashSet::new(),
            removing: None,
            pushed: PushedUpdates::default(),
            will_sync_remote: false,
            will_sync_local: false,
            pending_sync: Vec::new(),
            pending_sync_keys: HashSet::new(),
            transaction: None,
            silence_notifications: false,
        }
    }

    pub fn schema(&self) -> &Arc<dyn SchemaService> {
        &self.schema
    }

    pub fn identity(&self) -> &IdentifierCache {
        &self.identity
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// The side-specific definition of `identifier.field`, resolved and memoized on first use.
    pub fn get_definition(
        &mut self,
        identifier: &Identifier,
        field: &str,
    ) -> Result<Arc<UpgradedMeta>, RelgraphError> {
        self.definitions.meta_for(
            self.schema.as_ref(),
            &self.polymorphic_types,
            identifier.resource_type(),
            field,
        )
    }

    pub(crate) fn ensure_edge(
        &mut self,
        identifier: &Identifier,
        field: &str,
    ) -> Result<(), RelgraphError> {
        if self.has(identifier, field) {
            return Ok(());
        }
        let definition = self.get_definition(identifier, field)?;
        let edge = match definition.kind {
            RelationshipKind::BelongsTo => {
                Edge::BelongsTo(BelongsToEdge::new(definition, identifier.clone()))
            }
            RelationshipKind::HasMany => {
                Edge::HasMany(HasManyEdge::new(definition, identifier.clone()))
            }
            RelationshipKind::Implicit => {
                Edge::Implicit(ImplicitEdge::new(definition, identifier.clone()))
            }
        };
        self.identifiers
            .entry(identifier.clone())
            .or_default()
            .insert(field.to_string(), Some(edge));
        Ok(())
    }

    /// The edge for `identifier.field`, created if it does not exist yet.
    pub fn get(&mut self, identifier: &Identifier, field: &str) -> Result<&mut Edge, RelgraphError> {
        self.ensure_edge(identifier, field)?;
        edge_slot(&mut self.identifiers, identifier, field).ok_or_else(|| {
            RelgraphError::NotFound(format!("no edge for {identifier}.{field}"))
        })
    }

    /// Read an existing edge without creating it.
    pub fn peek(&self, identifier: &Identifier, field: &str) -> Option<&Edge> {
        self.identifiers
            .get(identifier)
            .and_then(|edges| edges.get(field))
            .and_then(Option::as_ref)
    }

    pub fn has(&self, identifier: &Identifier, field: &str) -> bool {
        self.peek(identifier, field).is_some()
    }

    /// Field names of every live edge owned by `identifier`, sorted.
    pub fn edge_keys(&self, identifier: &Identifier) -> Vec<String> {
        let mut keys: Vec<String> = self
            .identifiers
            .get(identifier)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|(_, edge)| edge.is_some())
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn node_count(&self) -> usize {
        self.identifiers.len()
    }

    /// Record that `a` and `b` may stand in for one another. Symmetric.
    pub fn register_polymorphic_type(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.polymorphic_types
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.polymorphic_types
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    pub fn is_polymorphic_equivalent(&self, a: &str, b: &str) -> bool {
        a == b
            || self
                .polymorphic_types
                .get(a)
                .is_some_and(|types| types.contains(b))
    }

    pub(crate) fn assert_polymorphic_type(
        &mut self,
        owner: &Identifier,
        definition: &UpgradedMeta,
        value: &Identifier,
    ) -> Result<(), RelgraphError> {
        let declared = definition.resource_type.as_str();
        let actual = value.resource_type();
        if declared == actual {
            return Ok(());
        }
        if !self.is_polymorphic_equivalent(declared, actual)
            && !self.schema.is_polymorphic_compatible(declared, actual)
        {
            if self.config.strict_polymorphism {
                return Err(RelgraphError::PolymorphicMismatch {
                    declared: declared.to_string(),
                    actual: actual.to_string(),
                    field: format!("{}.{}", owner.resource_type(), definition.key),
                });
            }
            tracing::warn!(
                "[Graph::assert_polymorphic_type] '{actual}' is not declared compatible with \
                 '{declared}' for {}.{}; registering them as polymorphic equivalents",
                owner.resource_type(),
                definition.key
            );
        }
        let declared = declared.to_string();
        self.register_polymorphic_type(&declared, actual);
        Ok(())
    }

    pub fn set_new(&mut self, identifier: &Identifier, is_new: bool) {
        if is_new {
            self.new_records.insert(identifier.clone());
        } else {
            self.new_records.remove(identifier);
        }
    }

    pub fn is_new(&self, identifier: &Identifier) -> bool {
        self.new_records.contains(identifier)
    }

    /// Whether the node for `identifier` can be dropped entirely. Any edge with an async inverse
    /// keeps the node alive.
    pub fn is_releasable(&self, identifier: &Identifier) -> bool {
        match self.identifiers.get(identifier) {
            None => true,
            Some(edges) => !edges
                .values()
                .flatten()
                .any(|edge| edge.definition().inverse_is_async),
        }
    }

    pub(crate) fn notify_change(&self, identifier: &Identifier, key: &str) {
        if self.removing.as_ref() == Some(identifier) {
            return;
        }
        self.capabilities
            .notify_change(identifier, NotificationKind::Relationships, Some(key));
    }

    pub(crate) fn add_to_transaction(&mut self, identifier: &Identifier, field: &str) {
        if let Some(transaction) = self.transaction.as_mut() {
            if let Some(edge) = edge_slot(&mut self.identifiers, identifier, field) {
                edge.bump_transaction();
                transaction.insert((identifier.clone(), field.to_string()));
            }
        }
    }

    fn finalize(&mut self) {
        if let Some(transaction) = self.transaction.take() {
            for (identifier, field) in transaction {
                if let Some(edge) = edge_slot(&mut self.identifiers, &identifier, &field) {
                    edge.reset_transaction();
                }
            }
        }
    }

    /// Queue a remote operation. The queue is applied by [Graph::flush_remote_queue], which is
    /// requested from the scheduler once per batch.
    pub fn push(&mut self, op: Operation) -> Result<(), RelgraphError> {
        let kind = match &op {
            Operation::DeleteRecord { .. } => None,
            Operation::ReplaceRelatedRecord { .. } => Some(RelationshipKind::BelongsTo),
            Operation::MergeIdentifiers { .. } => {
                return Err(RelgraphError::Protocol(format!(
                    "{op} cannot be queued; apply merges with update"
                )))
            }
            Operation::AddToRelatedRecords { record, field, .. }
            | Operation::RemoveFromRelatedRecords { record, field, .. }
            | Operation::ReplaceRelatedRecords { record, field, .. }
            | Operation::UpdateRelationship { record, field, .. } => {
                Some(self.get(record, field)?.definition().kind)
            }
        };
        match kind {
            None => self.pushed.deletions.push(op),
            Some(RelationshipKind::HasMany) => self.pushed.has_many.push(op),
            Some(RelationshipKind::BelongsTo) => self.pushed.belongs_to.push(op),
            Some(RelationshipKind::Implicit) => {
                return Err(RelgraphError::Protocol(format!(
                    "Cannot push a remote update for an implicit relationship: {op}"
                )))
            }
        }
        if !self.will_sync_remote {
            self.will_sync_remote = true;
            self.scheduler.schedule(FlushQueue::Coalesce);
        }
        Ok(())
    }

    /// Apply one operation. Remote-only operations are rejected when `is_remote` is false.
    pub fn update(&mut self, op: Operation, is_remote: bool) -> Result<(), RelgraphError> {
        if !is_remote
            && matches!(
                op,
                Operation::UpdateRelationship { .. } | Operation::DeleteRecord { .. }
            )
        {
            return Err(RelgraphError::Protocol(format!(
                "{op} can only be applied as a remote update"
            )));
        }
        if let Some(field) = op.field() {
            if self.get_definition(op.record(), field)?.is_implicit {
                return Err(RelgraphError::Protocol(format!(
                    "Cannot mutate an implicit relationship: {op}"
                )));
            }
        }
        tracing::trace!("[Graph::update] {op} remote={is_remote}");

        match op {
            Operation::MergeIdentifiers { record, value } => self.merge_identifier(&record, &value),
            Operation::DeleteRecord { record, .. } => self.delete_record(&record),
            Operation::ReplaceRelatedRecord {
                record,
                field,
                value,
            } => self.replace_related_record(&record, &field, value, is_remote),
            Operation::AddToRelatedRecords {
                record,
                field,
                value,
                index,
            } => self.add_to_related_records(&record, &field, value, index, is_remote),
            Operation::RemoveFromRelatedRecords {
                record,
                field,
                value,
                ..
            } => self.remove_from_related_records(&record, &field, value, is_remote),
            Operation::ReplaceRelatedRecords {
                record,
                field,
                value,
            } => self.replace_related_records(&record, &field, value, is_remote),
            Operation::UpdateRelationship {
                record,
                field,
                value,
            } => self.update_relationship(&record, &field, value),
        }
    }

    /// Apply every queued remote operation as one transaction: deletions, then collection
    /// updates, then scalar updates.
    ///
    /// A failing operation does not stop the batch; the first error is returned once the batch
    /// has been applied.
    pub fn flush_remote_queue(&mut self) -> Result<(), RelgraphError> {
        if !self.will_sync_remote {
            return Ok(());
        }
        self.will_sync_remote = false;
        self.transaction = Some(HashSet::new());
        let PushedUpdates {
            deletions,
            has_many,
            belongs_to,
        } = std::mem::take(&mut self.pushed);
        tracing::debug!(
            "[Graph::flush_remote_queue] applying {} deletions, {} hasMany and {} belongsTo updates",
            deletions.len(),
            has_many.len(),
            belongs_to.len()
        );

        let mut first_error = None;
        for op in deletions.into_iter().chain(has_many).chain(belongs_to) {
            let description = op.to_string();
            if let Err(e) = self.update(op, true) {
                tracing::warn!("[Graph::flush_remote_queue] {description} failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        self.finalize();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn schedule_local_sync(&mut self, identifier: &Identifier, field: &str) {
        let key = (identifier.clone(), field.to_string());
        if self.pending_sync_keys.insert(key.clone()) {
            self.pending_sync.push(key);
        }
        if !self.will_sync_local {
            self.will_sync_local = true;
            self.scheduler.schedule(FlushQueue::Sync);
        }
    }

    /// Rebuild the local view of every collection edge touched by remote updates and notify
    /// each of them once.
    pub fn flush_local_queue(&mut self) {
        if !self.will_sync_local {
            return;
        }
        self.will_sync_local = false;
        let pending = std::mem::take(&mut self.pending_sync);
        self.pending_sync_keys.clear();
        let silenced = std::mem::take(&mut self.silence_notifications);
        tracing::debug!(
            "[Graph::flush_local_queue] syncing {} relationships (silenced: {silenced})",
            pending.len()
        );

        for (identifier, field) in pending {
            match edge_slot(&mut self.identifiers, &identifier, &field) {
                Some(Edge::HasMany(edge)) => {
                    if edge.is_dirty {
                        edge.sync_remote_to_local();
                    }
                }
                _ => continue,
            }
            if !silenced {
                self.notify_change(&identifier, &field);
            }
        }
    }

    /// Drop the notifications of the next local sync pass.
    pub fn silence_notifications(&mut self) {
        self.silence_notifications = true;
    }

    /// Run pending remote and local work. Hosts call this once per turn.
    pub fn flush(&mut self) -> Result<(), RelgraphError> {
        let remote = self.flush_remote_queue();
        self.flush_local_queue();
        remote
    }

    pub fn has_pending_work(&self) -> bool {
        self.will_sync_remote || self.will_sync_local
    }

    pub(crate) fn take_edge(&mut self, identifier: &Identifier, field: &str) -> Option<Edge> {
        self.identifiers
            .get_mut(identifier)
            .and_then(|edges| edges.get_mut(field))
            .and_then(Option::take)
    }

    pub(crate) fn put_edge(&mut self, identifier: &Identifier, field: &str, edge: Edge) {
        self.identifiers
            .entry(identifier.clone())
            .or_default()
            .insert(field.to_string(), Some(edge));
    }

    /// Dematerialize every edge of `identifier`.
    ///
    /// Declared edges stay in the graph, emptied, so the record can be rematerialized later;
    /// implicit edges are dropped.
    pub fn unload(&mut self, identifier: &Identifier, silence: bool) -> Result<(), RelgraphError> {
        if !self.identifiers.contains_key(identifier) {
            return Ok(());
        }
        tracing::debug!("[Graph::unload] {identifier} (silenced: {silence})");
        let releasable = self.is_releasable(identifier);
        let mut first_error = None;
        for key in self.edge_keys(identifier) {
            let Some(mut edge) = self.take_edge(identifier, &key) else {
                continue;
            };
            if let Err(e) = self.destroy_relationship(&mut edge, releasable, silence) {
                first_error.get_or_insert(e);
            }
            if !edge.is_implicit() {
                self.put_edge(identifier, &key, edge);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Unload `identifier` and forget its node entirely.
    pub fn remove(&mut self, identifier: &Identifier) -> Result<(), RelgraphError> {
        if let Some(removing) = &self.removing {
            return Err(RelgraphError::Protocol(format!(
                "Cannot remove {identifier} while still removing {removing}"
            )));
        }
        self.removing = Some(identifier.clone());
        let result = self.unload(identifier, false);
        self.identifiers.remove(identifier);
        self.new_records.remove(identifier);
        self.removing = None;
        result
    }

    /// The view-layer payload for `identifier.field`.
    pub fn get_data(
        &mut self,
        identifier: &Identifier,
        field: &str,
    ) -> Result<RelationshipView, RelgraphError> {
        match self.get(identifier, field)? {
            Edge::BelongsTo(edge) => Ok(edge.get_data()),
            Edge::HasMany(edge) => {
                if edge.is_dirty {
                    edge.sync_remote_to_local();
                }
                Ok(edge.get_data())
            }
            Edge::Implicit(_) => Err(RelgraphError::Protocol(format!(
                "{identifier}.{field} is an implicit relationship and has no data"
            ))),
        }
    }

    /// Every identifier referenced by the local or remote view of a declared edge of
    /// `identifier`.
    pub fn related_identifiers(&self, identifier: &Identifier) -> Vec<Identifier> {
        let mut seen = HashSet::new();
        let mut related = Vec::new();
        for key in self.edge_keys(identifier) {
            let Some(edge) = self.peek(identifier, &key) else {
                continue;
            };
            if edge.is_implicit() {
                continue;
            }
            for value in edge.related_identifiers() {
                if seen.insert(value.clone()) {
                    related.push(value);
                }
            }
        }
        related
    }

    /// Drop every node, edge, pending operation and memoized definition.
    pub fn destroy(&mut self) {
        tracing::debug!("[Graph::destroy] dropping {} nodes", self.identifiers.len());
        self.identifiers.clear();
        self.definitions = DefinitionCache::new();
        self.polymorphic_types.clear();
        self.new_records.clear();
        self.removing = None;
        self.pushed = PushedUpdates::default();
        self.will_sync_remote = false;
        self.will_sync_local = false;
        self.pending_sync.clear();
        self.pending_sync_keys.clear();
        self.transaction = None;
        self.silence_notifications = false;
    }
}
