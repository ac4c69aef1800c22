use serde_json::Value;
use std::{collections::HashSet, sync::Arc};

use super::definition::UpgradedMeta;
use crate::{document::Links, identifier::Identifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeState {
    pub has_received_data: bool,
    pub is_empty: bool,
    pub has_dematerialized_inverse: bool,
    pub is_stale: bool,
    pub has_failed_load_attempt: bool,
}

impl Default for EdgeState {
    fn default() -> Self {
        EdgeState {
            has_received_data: false,
            is_empty: true,
            has_dematerialized_inverse: false,
            is_stale: false,
            has_failed_load_attempt: false,
        }
    }
}

/// The data member of a [RelationshipView].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelatedData {
    One(Option<Identifier>),
    Many(Vec<Identifier>),
}

impl RelatedData {
    pub fn identifiers(&self) -> Vec<Identifier> {
        match self {
            RelatedData::One(value) => value.iter().cloned().collect(),
            RelatedData::Many(values) => values.clone(),
        }
    }
}

/// What the view layer reads for one relationship. `data` is absent until membership is known.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipView {
    pub data: Option<RelatedData>,
    pub links: Option<Links>,
    pub meta: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct BelongsToEdge {
    pub definition: Arc<UpgradedMeta>,
    pub identifier: Identifier,
    pub local_state: Option<Identifier>,
    pub remote_state: Option<Identifier>,
    pub state: EdgeState,
    pub transaction_ref: u32,
    pub links: Option<Links>,
    pub meta: Option<Value>,
}

impl BelongsToEdge {
    pub fn new(definition: Arc<UpgradedMeta>, identifier: Identifier) -> Self {
        BelongsToEdge {
            definition,
            identifier,
            local_state: None,
            remote_state: None,
            state: EdgeState::default(),
            transaction_ref: 0,
            links: None,
            meta: None,
        }
    }

    pub fn get_data(&self) -> RelationshipView {
        let data = match &self.local_state {
            Some(value) => Some(RelatedData::One(Some(value.clone()))),
            None if self.state.has_received_data => Some(RelatedData::One(None)),
            None => None,
        };
        RelationshipView {
            data,
            links: self.links.clone(),
            meta: self.meta.clone(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.local_state = None;
        self.remote_state = None;
        self.state.has_received_data = false;
        self.state.is_empty = true;
    }
}

/// A collection edge.
///
/// Remote changes never touch `local_state` directly; they mark the edge dirty and the next
/// [HasManyEdge::sync_remote_to_local] rebuilds the local view as the remote baseline with
/// uncommitted local `additions` and `removals` layered on top.
#[derive(Debug, Clone)]
pub struct HasManyEdge {
    pub definition: Arc<UpgradedMeta>,
    pub identifier: Identifier,
    pub local_state: Vec<Identifier>,
    pub remote_state: Vec<Identifier>,
    pub local_members: HashSet<Identifier>,
    pub remote_members: HashSet<Identifier>,
    pub additions: HashSet<Identifier>,
    pub removals: HashSet<Identifier>,
    pub is_dirty: bool,
    pub state: EdgeState,
    pub transaction_ref: u32,
    pub links: Option<Links>,
    pub meta: Option<Value>,
}

fn insert_at(list: &mut Vec<Identifier>, value: Identifier, index: Option<usize>) {
    match index {
        Some(index) if index < list.len() => list.insert(index, value),
        _ => list.push(value),
    }
}

impl HasManyEdge {
    pub fn new(definition: Arc<UpgradedMeta>, identifier: Identifier) -> Self {
        HasManyEdge {
            definition,
            identifier,
            local_state: Vec::new(),
            remote_state: Vec::new(),
            local_members: HashSet::new(),
            remote_members: HashSet::new(),
            additions: HashSet::new(),
            removals: HashSet::new(),
            is_dirty: false,
            state: EdgeState::default(),
            transaction_ref: 0,
            links: None,
            meta: None,
        }
    }

    pub fn get_data(&self) -> RelationshipView {
        RelationshipView {
            data: self
                .state
                .has_received_data
                .then(|| RelatedData::Many(self.local_state.clone())),
            links: self.links.clone(),
            meta: self.meta.clone(),
        }
    }

    /// Bring the local view up to date before a local edit reads or changes it.
    pub(crate) fn sync_if_dirty(&mut self) {
        if self.is_dirty {
            self.sync_remote_to_local();
        }
    }

    /// Returns false when `value` is already a local member.
    pub(crate) fn add_local(&mut self, value: &Identifier, index: Option<usize>) -> bool {
        self.sync_if_dirty();
        if !self.local_members.insert(value.clone()) {
            return false;
        }
        insert_at(&mut self.local_state, value.clone(), index);
        if !self.removals.remove(value) && !self.remote_members.contains(value) {
            self.additions.insert(value.clone());
        }
        true
    }

    pub(crate) fn remove_local(&mut self, value: &Identifier) -> bool {
        self.sync_if_dirty();
        if !self.local_members.remove(value) {
            return false;
        }
        self.local_state.retain(|member| member != value);
        if !self.additions.remove(value) && self.remote_members.contains(value) {
            self.removals.insert(value.clone());
        }
        true
    }

    pub(crate) fn add_remote(&mut self, value: &Identifier, index: Option<usize>) -> bool {
        if !self.remote_members.insert(value.clone()) {
            return false;
        }
        insert_at(&mut self.remote_state, value.clone(), index);
        self.is_dirty = true;
        true
    }

    pub(crate) fn remove_remote(&mut self, value: &Identifier) -> bool {
        if !self.remote_members.remove(value) {
            return false;
        }
        self.remote_state.retain(|member| member != value);
        self.is_dirty = true;
        true
    }

    /// Replace the remote view verbatim. Duplicates must already be dropped.
    pub(crate) fn set_remote(&mut self, values: Vec<Identifier>) {
        self.remote_members = values.iter().cloned().collect();
        self.remote_state = values;
        self.is_dirty = true;
    }

    /// Replace the local view verbatim, re-deriving the pending edits against the remote view.
    pub(crate) fn set_local(&mut self, values: Vec<Identifier>) {
        self.is_dirty = false;
        self.local_members = values.iter().cloned().collect();
        self.additions = values
            .iter()
            .filter(|value| !self.remote_members.contains(*value))
            .cloned()
            .collect();
        self.removals = self
            .remote_state
            .iter()
            .filter(|value| !self.local_members.contains(*value))
            .cloned()
            .collect();
        self.local_state = values;
    }

    /// Rebuild `local_state` as `(remote - removals) + additions`, then drop pending edits the
    /// remote view has caught up with.
    ///
    /// Each addition is placed in front of the member that followed it in the previous local
    /// view, or at the end when nothing that followed it survived.
    pub fn sync_remote_to_local(&mut self) {
        let mut next: Vec<Identifier> = self
            .remote_state
            .iter()
            .filter(|value| !self.removals.contains(*value))
            .cloned()
            .collect();
        let mut members: HashSet<Identifier> = next.iter().cloned().collect();
        let mut anchor: Option<Identifier> = None;
        for value in self.local_state.iter().rev() {
            if self.additions.contains(value) && members.insert(value.clone()) {
                let position = anchor
                    .as_ref()
                    .and_then(|anchor| next.iter().position(|member| member == anchor))
                    .unwrap_or(next.len());
                next.insert(position, value.clone());
                anchor = Some(value.clone());
            } else if members.contains(value) {
                anchor = Some(value.clone());
            }
        }
        let remote_members = &self.remote_members;
        self.additions.retain(|value| !remote_members.contains(value));
        self.removals.retain(|value| remote_members.contains(value));
        self.local_state = next;
        self.local_members = members;
        self.is_dirty = false;
    }

    /// Fold the membership of `other`, an edge of a record merged into this one, into both views.
    /// Returns true if the local view changed.
    pub(crate) fn absorb(&mut self, mut other: HasManyEdge) -> bool {
        self.sync_if_dirty();
        other.sync_if_dirty();
        for value in other.remote_state {
            if self.remote_members.insert(value.clone()) {
                self.remote_state.push(value);
            }
        }
        let mut local = self.local_state.clone();
        let before = local.len();
        for value in other.local_state {
            if !self.local_members.contains(&value) {
                local.push(value);
            }
        }
        let changed = local.len() != before;
        self.set_local(local);
        self.state.has_received_data |= other.state.has_received_data;
        self.state.is_empty = self.local_state.is_empty();
        changed
    }

    /// Remove `value` from every view. Returns true if it was a local member.
    pub(crate) fn remove_completely(&mut self, value: &Identifier) -> bool {
        if self.remote_members.remove(value) {
            self.remote_state.retain(|member| member != value);
        }
        self.additions.remove(value);
        self.removals.remove(value);
        if self.local_members.remove(value) {
            self.local_state.retain(|member| member != value);
            return true;
        }
        false
    }

    /// Swap `from` for `to` in every view, preserving position. Returns true if the local view
    /// changed.
    pub(crate) fn replace_member(&mut self, from: &Identifier, to: &Identifier) -> bool {
        fn swap(
            list: &mut Vec<Identifier>,
            members: &mut HashSet<Identifier>,
            from: &Identifier,
            to: &Identifier,
        ) -> bool {
            if !members.remove(from) {
                return false;
            }
            if members.insert(to.clone()) {
                for member in list.iter_mut() {
                    if member == from {
                        *member = to.clone();
                    }
                }
            } else {
                list.retain(|member| member != from);
            }
            true
        }
        swap(&mut self.remote_state, &mut self.remote_members, from, to);
        if self.additions.remove(from) {
            self.additions.insert(to.clone());
        }
        if self.removals.remove(from) {
            self.removals.insert(to.clone());
        }
        swap(&mut self.local_state, &mut self.local_members, from, to)
    }

    pub(crate) fn clear(&mut self) {
        self.remote_members.clear();
        self.remote_state.clear();
        self.local_members.clear();
        self.local_state.clear();
        self.additions.clear();
        self.removals.clear();
        self.is_dirty = false;
    }
}

/// Inverse-only bookkeeping for a relationship declared on one side only.
#[derive(Debug, Clone)]
pub struct ImplicitEdge {
    pub definition: Arc<UpgradedMeta>,
    pub identifier: Identifier,
    pub local_members: HashSet<Identifier>,
    pub remote_members: HashSet<Identifier>,
}

impl ImplicitEdge {
    pub fn new(definition: Arc<UpgradedMeta>, identifier: Identifier) -> Self {
        ImplicitEdge {
            definition,
            identifier,
            local_members: HashSet::new(),
            remote_members: HashSet::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.local_members.clear();
        self.remote_members.clear();
    }
}

#[derive(Debug, Clone)]
pub enum Edge {
    BelongsTo(BelongsToEdge),
    HasMany(HasManyEdge),
    Implicit(ImplicitEdge),
}

impl Edge {
    pub fn definition(&self) -> &Arc<UpgradedMeta> {
        match self {
            Edge::BelongsTo(edge) => &edge.definition,
            Edge::HasMany(edge) => &edge.definition,
            Edge::Implicit(edge) => &edge.definition,
        }
    }

    pub fn identifier(&self) -> &Identifier {
        match self {
            Edge::BelongsTo(edge) => &edge.identifier,
            Edge::HasMany(edge) => &edge.identifier,
            Edge::Implicit(edge) => &edge.identifier,
        }
    }

    pub(crate) fn set_identifier(&mut self, identifier: Identifier) {
        match self {
            Edge::BelongsTo(edge) => edge.identifier = identifier,
            Edge::HasMany(edge) => edge.identifier = identifier,
            Edge::Implicit(edge) => edge.identifier = identifier,
        }
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self, Edge::Implicit(_))
    }

    pub fn state(&self) -> Option<&EdgeState> {
        match self {
            Edge::BelongsTo(edge) => Some(&edge.state),
            Edge::HasMany(edge) => Some(&edge.state),
            Edge::Implicit(_) => None,
        }
    }

    pub fn as_belongs_to(&self) -> Option<&BelongsToEdge> {
        match self {
            Edge::BelongsTo(edge) => Some(edge),
            _ => None,
        }
    }

    pub fn as_has_many(&self) -> Option<&HasManyEdge> {
        match self {
            Edge::HasMany(edge) => Some(edge),
            _ => None,
        }
    }

    pub fn as_implicit(&self) -> Option<&ImplicitEdge> {
        match self {
            Edge::Implicit(edge) => Some(edge),
            _ => None,
        }
    }

    /// Every identifier referenced by either view, local first, without duplicates.
    pub fn related_identifiers(&self) -> Vec<Identifier> {
        let mut seen = HashSet::new();
        let mut related = Vec::new();
        let mut visit = |value: &Identifier| {
            if seen.insert(value.clone()) {
                related.push(value.clone());
            }
        };
        match self {
            Edge::BelongsTo(edge) => {
                edge.local_state.iter().for_each(&mut visit);
                edge.remote_state.iter().for_each(&mut visit);
            }
            Edge::HasMany(edge) => {
                edge.local_state.iter().for_each(&mut visit);
                edge.remote_state.iter().for_each(&mut visit);
            }
            Edge::Implicit(edge) => {
                let mut local: Vec<&Identifier> = edge.local_members.iter().collect();
                local.sort();
                let mut remote: Vec<&Identifier> = edge.remote_members.iter().collect();
                remote.sort();
                local.into_iter().for_each(&mut visit);
                remote.into_iter().for_each(&mut visit);
            }
        }
        related
    }

    pub(crate) fn bump_transaction(&mut self) {
        match self {
            Edge::BelongsTo(edge) => edge.transaction_ref += 1,
            Edge::HasMany(edge) => edge.transaction_ref += 1,
            Edge::Implicit(_) => {}
        }
    }

    pub(crate) fn reset_transaction(&mut self) {
        match self {
            Edge::BelongsTo(edge) => edge.transaction_ref = 0,
            Edge::HasMany(edge) => edge.transaction_ref = 0,
            Edge::Implicit(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{identifier::IdentifierCache, schema::RelationshipKind};

    fn definition() -> Arc<UpgradedMeta> {
        Arc::new(UpgradedMeta {
            kind: RelationshipKind::HasMany,
            resource_type: "comment".to_string(),
            key: "comments".to_string(),
            is_async: false,
            is_implicit: false,
            is_collection: true,
            is_polymorphic: false,
            inverse_kind: RelationshipKind::BelongsTo,
            inverse_key: "post".to_string(),
            inverse_type: "post".to_string(),
            inverse_is_async: false,
            inverse_is_implicit: false,
            inverse_is_collection: false,
            inverse_is_polymorphic: false,
        })
    }

    #[test]
    fn test_local_edits_survive_remote_sync() {
        let ids = IdentifierCache::new();
        let post = ids.create_local("post");
        let [c1, c2, c3] = ["c1", "c2", "c3"].map(|_| ids.create_local("comment"));
        let mut edge = HasManyEdge::new(definition(), post);

        edge.set_remote(vec![c1.clone(), c3.clone()]);
        edge.sync_remote_to_local();
        assert_eq!(edge.local_state, vec![c1.clone(), c3.clone()]);

        assert!(edge.add_local(&c2, None));
        assert!(edge.remove_local(&c3));
        assert!(!edge.add_local(&c2, None), "duplicate add is a no-op");

        edge.set_remote(vec![c3.clone(), c1.clone()]);
        edge.sync_remote_to_local();
        assert_eq!(edge.local_state, vec![c1.clone(), c2.clone()]);
        assert!(edge.removals.contains(&c3));

        // the server catches up with both edits
        edge.set_remote(vec![c1.clone(), c2.clone()]);
        edge.sync_remote_to_local();
        assert!(edge.additions.is_empty());
        assert!(edge.removals.is_empty());
        assert_eq!(edge.local_state, vec![c1, c2]);
    }

    #[test]
    fn test_replace_member_keeps_position() {
        let ids = IdentifierCache::new();
        let post = ids.create_local("post");
        let [a, b, c] = ["a", "b", "c"].map(|_| ids.create_local("comment"));
        let mut edge = HasManyEdge::new(definition(), post);
        edge.set_remote(vec![a.clone(), b.clone()]);
        edge.sync_remote_to_local();

        assert!(edge.replace_member(&a, &c));
        assert_eq!(edge.local_state, vec![c.clone(), b.clone()]);
        assert_eq!(edge.remote_state, vec![c.clone(), b.clone()]);

        // merging into an existing member collapses the duplicate
        assert!(edge.replace_member(&b, &c));
        assert_eq!(edge.local_state, vec![c]);
    }

    #[test]
    fn test_indexed_addition_keeps_its_place_across_sync() {
        let ids = IdentifierCache::new();
        let post = ids.create_local("post");
        let [a, b, c, x, y] = ["a", "b", "c", "x", "y"].map(|_| ids.create_local("comment"));
        let mut edge = HasManyEdge::new(definition(), post);
        edge.set_remote(vec![a.clone(), b.clone()]);
        edge.sync_remote_to_local();

        assert!(edge.add_local(&x, Some(0)));
        assert!(edge.add_local(&y, None));
        assert_eq!(edge.local_state, vec![x.clone(), a.clone(), b.clone(), y.clone()]);

        edge.set_remote(vec![a.clone(), b.clone(), c.clone()]);
        edge.sync_remote_to_local();
        assert_eq!(edge.local_state, vec![x, a, b, c, y]);
    }

    #[test]
    fn test_local_edit_syncs_a_dirty_edge_first() {
        let ids = IdentifierCache::new();
        let post = ids.create_local("post");
        let [a, b] = ["a", "b"].map(|_| ids.create_local("comment"));
        let mut edge = HasManyEdge::new(definition(), post);

        edge.set_remote(vec![a.clone(), b.clone()]);
        assert!(edge.is_dirty);
        assert!(edge.remove_local(&a), "a remote-only member can be removed locally");
        assert!(!edge.is_dirty);
        assert_eq!(edge.local_state, vec![b.clone()]);
        assert!(edge.removals.contains(&a));

        edge.set_remote(vec![b.clone()]);
        assert!(!edge.add_local(&b, Some(0)), "b is already a member once synced");
    }

    #[test]
    fn test_absorb_unions_both_views() {
        let ids = IdentifierCache::new();
        let post = ids.create_local("post");
        let [a, b, c] = ["a", "b", "c"].map(|_| ids.create_local("comment"));
        let mut edge = HasManyEdge::new(definition(), post.clone());
        edge.set_remote(vec![a.clone()]);
        edge.sync_remote_to_local();

        let mut merged = HasManyEdge::new(definition(), post);
        merged.set_remote(vec![b.clone()]);
        merged.sync_remote_to_local();
        merged.add_local(&c, None);

        assert!(edge.absorb(merged));
        assert_eq!(edge.remote_state, vec![a.clone(), b.clone()]);
        assert_eq!(edge.local_state, vec![a, b, c.clone()]);
        assert_eq!(edge.additions, HashSet::from([c]));
        assert!(edge.removals.is_empty());
    }
}
