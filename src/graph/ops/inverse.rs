//! Inverse maintenance shared by every mutation, plus the removal and dematerialization paths.

use crate::{
    error::RelgraphError,
    graph::{
        base::{edge_slot, Graph},
        edge::Edge,
    },
    identifier::Identifier,
};

impl Graph {
    /// Make `value` a member of `identifier.key`, the inverse side of a relationship `value` just
    /// gained `identifier` on.
    pub(crate) fn add_to_inverse(
        &mut self,
        identifier: &Identifier,
        key: &str,
        value: &Identifier,
        is_remote: bool,
    ) -> Result<(), RelgraphError> {
        let definition = self.get(identifier, key)?.definition().clone();
        self.assert_polymorphic_type(identifier, &definition, value)?;
        let inverse_key = definition.inverse_key.as_str();

        let mut notify = false;
        let mut remote_changed = false;
        let mut stale_remote = None;
        let mut stale_local = None;
        match edge_slot(&mut self.identifiers, identifier, key) {
            Some(Edge::BelongsTo(edge)) => {
                edge.state.has_received_data = true;
                edge.state.is_empty = false;
                if is_remote {
                    stale_remote = edge
                        .remote_state
                        .replace(value.clone())
                        .filter(|old| old != value);
                    remote_changed = true;
                }
                if edge.local_state.as_ref() != Some(value) {
                    let previous = edge.local_state.replace(value.clone());
                    if !is_remote {
                        stale_local = previous;
                    }
                    notify = true;
                }
            }
            Some(Edge::HasMany(edge)) => {
                if is_remote {
                    if edge.add_remote(value, None) {
                        edge.state.has_received_data = true;
                        edge.state.is_empty = false;
                        remote_changed = true;
                    }
                } else if edge.add_local(value, None) {
                    edge.state.has_received_data = true;
                    edge.state.is_empty = false;
                    notify = true;
                }
            }
            Some(Edge::Implicit(edge)) => {
                if is_remote {
                    if edge.remote_members.insert(value.clone()) {
                        edge.local_members.insert(value.clone());
                    }
                } else {
                    edge.local_members.insert(value.clone());
                }
            }
            None => {}
        }

        if remote_changed {
            self.add_to_transaction(identifier, key);
            if definition.is_collection {
                self.schedule_local_sync(identifier, key);
            }
        }
        if let Some(old) = stale_remote {
            self.remove_from_inverse(&old, inverse_key, identifier, true)?;
        }
        if let Some(old) = stale_local {
            self.remove_from_inverse(&old, inverse_key, identifier, false)?;
        }
        if notify {
            self.notify_change(identifier, key);
        }
        Ok(())
    }

    /// Remove `value` from `identifier.key`, the inverse side of a relationship `value` just lost
    /// `identifier` on.
    pub(crate) fn remove_from_inverse(
        &mut self,
        identifier: &Identifier,
        key: &str,
        value: &Identifier,
        is_remote: bool,
    ) -> Result<(), RelgraphError> {
        self.ensure_edge(identifier, key)?;
        let mut notify = false;
        let mut remote_changed = false;
        let mut is_collection = false;
        match edge_slot(&mut self.identifiers, identifier, key) {
            Some(Edge::BelongsTo(edge)) => {
                if is_remote && edge.remote_state.as_ref() == Some(value) {
                    edge.remote_state = None;
                    edge.state.is_empty = true;
                    remote_changed = true;
                }
                if edge.local_state.as_ref() == Some(value) {
                    edge.local_state = None;
                    edge.state.is_empty = true;
                    notify = true;
                }
            }
            Some(Edge::HasMany(edge)) => {
                is_collection = true;
                if is_remote {
                    remote_changed = edge.remove_remote(value);
                } else {
                    notify = edge.remove_local(value);
                }
            }
            Some(Edge::Implicit(edge)) => {
                if is_remote {
                    edge.remote_members.remove(value);
                }
                edge.local_members.remove(value);
            }
            None => {}
        }

        if remote_changed {
            self.add_to_transaction(identifier, key);
            if is_collection {
                self.schedule_local_sync(identifier, key);
            }
        }
        if notify {
            self.notify_change(identifier, key);
        }
        Ok(())
    }

    /// A remote update re-confirmed `value` as a member of `identifier.key`'s inverse; views
    /// bound to a collection that already lists it need to hear about it.
    pub(crate) fn notify_inverse_of_potential_materialization(
        &mut self,
        identifier: &Identifier,
        key: &str,
        value: &Identifier,
        is_remote: bool,
    ) {
        if let Some(Edge::HasMany(edge)) = self.peek(identifier, key) {
            if is_remote && edge.remote_members.contains(value) {
                self.notify_change(identifier, key);
            }
        }
    }

    /// Strip `value` from every view of `identifier.key`.
    pub(crate) fn remove_identifier_completely_from_relationship(
        &mut self,
        identifier: &Identifier,
        key: &str,
        value: &Identifier,
        silence: bool,
    ) {
        let notify = match edge_slot(&mut self.identifiers, identifier, key) {
            Some(Edge::BelongsTo(edge)) => {
                if edge.remote_state.as_ref() == Some(value) {
                    edge.remote_state = None;
                }
                if edge.local_state.as_ref() == Some(value) {
                    edge.local_state = None;
                    true
                } else {
                    false
                }
            }
            Some(Edge::HasMany(edge)) => edge.remove_completely(value),
            Some(Edge::Implicit(edge)) => {
                edge.remote_members.remove(value);
                edge.local_members.remove(value);
                false
            }
            None => false,
        };
        if notify && !silence {
            self.notify_change(identifier, key);
        }
    }

    /// Detach the owner of `edge` from every inverse it appears in, then empty `edge`.
    ///
    /// `edge` must already be out of the graph (taken or its node removed).
    pub(crate) fn remove_completely_from_inverse(&mut self, edge: &mut Edge) {
        let identifier = edge.identifier().clone();
        let definition = edge.definition().clone();
        for related in edge.related_identifiers() {
            if self.has(&related, &definition.inverse_key) {
                self.remove_identifier_completely_from_relationship(
                    &related,
                    &definition.inverse_key,
                    &identifier,
                    false,
                );
            }
        }

        match edge {
            Edge::BelongsTo(edge) => {
                if !definition.is_async {
                    edge.clear();
                }
                edge.local_state = None;
            }
            Edge::HasMany(edge) => {
                if !definition.is_async {
                    edge.clear();
                    self.notify_change(&identifier, &definition.key);
                }
            }
            Edge::Implicit(edge) => edge.clear(),
        }
    }

    /// Tear down `edge` while its owner is being unloaded.
    pub(crate) fn destroy_relationship(
        &mut self,
        edge: &mut Edge,
        releasable: bool,
        silence: bool,
    ) -> Result<(), RelgraphError> {
        if edge.is_implicit() {
            if releasable {
                self.remove_completely_from_inverse(edge);
            }
            return Ok(());
        }

        let identifier = edge.identifier().clone();
        let definition = edge.definition().clone();
        if !definition.inverse_is_implicit {
            for related in edge.related_identifiers() {
                self.notify_inverse_of_dematerialization(
                    &related,
                    &definition.inverse_key,
                    &identifier,
                    silence,
                )?;
            }
        }

        if !definition.inverse_is_implicit && !definition.inverse_is_async {
            match edge {
                Edge::BelongsTo(edge) => {
                    edge.state.is_stale = true;
                    edge.clear();
                }
                Edge::HasMany(edge) => {
                    edge.state.is_stale = true;
                    edge.clear();
                }
                Edge::Implicit(_) => {}
            }
            if !definition.is_async && !silence {
                self.notify_change(&identifier, &definition.key);
            }
        }
        Ok(())
    }

    fn notify_inverse_of_dematerialization(
        &mut self,
        inverse_identifier: &Identifier,
        inverse_key: &str,
        identifier: &Identifier,
        silence: bool,
    ) -> Result<(), RelgraphError> {
        match self.peek(inverse_identifier, inverse_key) {
            None => return Ok(()),
            Some(Edge::BelongsTo(edge)) => {
                // a belongsTo that has since moved on locally keeps its value
                if edge
                    .local_state
                    .as_ref()
                    .is_some_and(|local| local != identifier)
                {
                    return Ok(());
                }
            }
            Some(_) => {}
        }
        self.remove_dematerialized_inverse(inverse_identifier, inverse_key, identifier, silence);
        Ok(())
    }

    /// `inverse` was unloaded. A sync relationship (or a never-saved `inverse`) treats this as a
    /// client side delete; an async one only records that its inverse is gone.
    fn remove_dematerialized_inverse(
        &mut self,
        identifier: &Identifier,
        key: &str,
        inverse: &Identifier,
        silence: bool,
    ) {
        let inverse_is_new = self.is_new(inverse);
        let new_records = &self.new_records;
        match edge_slot(&mut self.identifiers, identifier, key) {
            Some(Edge::BelongsTo(edge)) => {
                if !edge.definition.is_async || inverse_is_new {
                    if edge.local_state.as_ref() == Some(inverse) {
                        edge.local_state = None;
                    }
                    if edge.remote_state.as_ref() == Some(inverse) {
                        edge.remote_state = None;
                        edge.state.has_received_data = true;
                        edge.state.is_empty = true;
                        if edge
                            .local_state
                            .as_ref()
                            .is_some_and(|local| !new_records.contains(local))
                        {
                            edge.local_state = None;
                        }
                    }
                } else {
                    edge.state.has_dematerialized_inverse = true;
                }
            }
            Some(Edge::HasMany(edge)) => {
                if !edge.definition.is_async || inverse_is_new {
                    edge.remove_completely(inverse);
                } else {
                    edge.state.has_dematerialized_inverse = true;
                }
            }
            Some(Edge::Implicit(_)) | None => return,
        }
        if !silence {
            self.notify_change(identifier, key);
        }
    }

    pub(crate) fn delete_record(&mut self, identifier: &Identifier) -> Result<(), RelgraphError> {
        let Some(edges) = self.identifiers.remove(identifier) else {
            return Ok(());
        };
        tracing::debug!("[Graph::delete_record] {identifier}");
        let mut edges: Vec<(String, Edge)> = edges
            .into_iter()
            .filter_map(|(key, edge)| edge.map(|edge| (key, edge)))
            .collect();
        edges.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, mut edge) in edges {
            self.remove_completely_from_inverse(&mut edge);
        }
        self.new_records.remove(identifier);
        Ok(())
    }
}
