use crate::{
    error::RelgraphError,
    graph::{
        base::{edge_slot, Graph},
        edge::Edge,
    },
    identifier::Identifier,
};

impl Graph {
    /// Move every edge of `record` onto `value` and repoint each inverse at `value`.
    ///
    /// When `value` already owns an edge for the same field, the edge of `record` is folded into
    /// it: collection members are unioned, and a scalar keeps the value `value` already had,
    /// detaching whatever `record` pointed at instead.
    pub(crate) fn merge_identifier(
        &mut self,
        record: &Identifier,
        value: &Identifier,
    ) -> Result<(), RelgraphError> {
        if record == value {
            return Ok(());
        }
        let Some(edges) = self.identifiers.remove(record) else {
            return Ok(());
        };
        tracing::debug!("[Graph::merge_identifier] {record} -> {value}");
        let mut edges: Vec<(String, Edge)> = edges
            .into_iter()
            .filter_map(|(key, edge)| edge.map(|edge| (key, edge)))
            .collect();
        edges.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, mut edge) in edges {
            edge.set_identifier(value.clone());
            let inverse_key = edge.definition().inverse_key.clone();
            for related in edge.related_identifiers() {
                self.merge_in_relationship(&related, &inverse_key, record, value)?;
            }
            if self.has(value, &key) {
                self.merge_into_existing_edge(value, &key, edge)?;
            } else {
                self.put_edge(value, &key, edge);
            }
        }
        // a self-referencing edge may have recreated the node
        self.identifiers.remove(record);
        if self.new_records.remove(record) {
            tracing::debug!("[Graph::merge_identifier] {record} was new; {value} is not");
        }
        Ok(())
    }

    fn merge_into_existing_edge(
        &mut self,
        value: &Identifier,
        key: &str,
        edge: Edge,
    ) -> Result<(), RelgraphError> {
        let inverse_key = edge.definition().inverse_key.clone();
        let mut detach_remote = None;
        let mut detach_local = None;
        let mut orphan = None;
        let notify = match (edge_slot(&mut self.identifiers, value, key), edge) {
            (Some(Edge::HasMany(existing)), Edge::HasMany(merged)) => existing.absorb(merged),
            (Some(Edge::BelongsTo(existing)), Edge::BelongsTo(merged)) => {
                existing.state.has_received_data |= merged.state.has_received_data;
                if existing.remote_state.is_none() {
                    existing.remote_state = merged.remote_state;
                } else if merged.remote_state.is_some() && existing.remote_state != merged.remote_state
                {
                    detach_remote = merged.remote_state;
                }
                let adopted = existing.local_state.is_none() && merged.local_state.is_some();
                if adopted {
                    existing.local_state = merged.local_state;
                } else if merged.local_state.is_some() && existing.local_state != merged.local_state {
                    detach_local = merged.local_state;
                }
                existing.state.is_empty = existing.local_state.is_none();
                adopted
            }
            (Some(Edge::Implicit(existing)), Edge::Implicit(merged)) => {
                existing.remote_members.extend(merged.remote_members);
                existing.local_members.extend(merged.local_members);
                false
            }
            (_, merged) => {
                orphan = Some(merged);
                false
            }
        };
        tracing::debug!("[Graph::merge_identifier] folded an edge into existing {value}.{key}");

        if let Some(mut merged) = orphan {
            tracing::warn!(
                "[Graph::merge_identifier] {value}.{key} has a different kind than the merged edge; \
                 detaching the merged members"
            );
            self.remove_completely_from_inverse(&mut merged);
        }
        if let Some(stale) = detach_remote {
            self.remove_from_inverse(&stale, &inverse_key, value, true)?;
        }
        if let Some(stale) = detach_local {
            self.remove_from_inverse(&stale, &inverse_key, value, false)?;
        }
        if notify {
            self.notify_change(value, key);
        }
        Ok(())
    }

    fn merge_in_relationship(
        &mut self,
        identifier: &Identifier,
        key: &str,
        from: &Identifier,
        to: &Identifier,
    ) -> Result<(), RelgraphError> {
        self.ensure_edge(identifier, key)?;
        let notify = match edge_slot(&mut self.identifiers, identifier, key) {
            Some(Edge::BelongsTo(edge)) => {
                if edge.remote_state.as_ref() == Some(from) {
                    edge.remote_state = Some(to.clone());
                }
                if edge.local_state.as_ref() == Some(from) {
                    edge.local_state = Some(to.clone());
                    true
                } else {
                    false
                }
            }
            Some(Edge::HasMany(edge)) => edge.replace_member(from, to),
            Some(Edge::Implicit(edge)) => {
                if edge.remote_members.remove(from) {
                    edge.remote_members.insert(to.clone());
                }
                if edge.local_members.remove(from) {
                    edge.local_members.insert(to.clone());
                }
                false
            }
            None => false,
        };
        if notify {
            self.notify_change(identifier, key);
        }
        Ok(())
    }
}
