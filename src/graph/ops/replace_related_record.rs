use crate::{
    error::RelgraphError,
    graph::{
        base::{edge_slot, Graph},
        edge::Edge,
    },
    identifier::Identifier,
    schema::RelationshipKind,
};

impl Graph {
    /// Set a belongsTo relationship.
    ///
    /// In a 1:1 graph replacing a value can cause up to four transitions: the old value loses its
    /// inverse, the new value gains one, and the new value's previous owner loses it. Remote
    /// updates also bring the local view back in line with the remote one, unless the local value
    /// is a record that has never been saved and the server reports nothing.
    pub(crate) fn replace_related_record(
        &mut self,
        record: &Identifier,
        field: &str,
        value: Option<Identifier>,
        is_remote: bool,
    ) -> Result<(), RelgraphError> {
        let inverse_key = self.expect_kind(
            record,
            field,
            RelationshipKind::BelongsTo,
            "replaceRelatedRecord",
        )?;
        if let Some(value) = &value {
            let definition = self.get_definition(record, field)?;
            self.assert_polymorphic_type(record, &definition, value)?;
        }
        if is_remote {
            self.add_to_transaction(record, field);
        }

        let (existing, local) = match edge_slot(&mut self.identifiers, record, field) {
            Some(Edge::BelongsTo(edge)) => {
                let existing = if is_remote {
                    edge.remote_state.clone()
                } else {
                    edge.local_state.clone()
                };
                if value == existing {
                    // known to be empty now, even if it was before
                    edge.state.has_received_data = true;
                }
                (existing, edge.local_state.clone())
            }
            _ => return Ok(()),
        };

        if value == existing {
            if !is_remote {
                return Ok(());
            }
            let local_is_new = local.as_ref().is_some_and(|l| self.is_new(l));
            if local_is_new && existing.is_none() {
                return Ok(());
            }
            match &existing {
                Some(current) if local.as_ref() == Some(current) => {
                    self.notify_inverse_of_potential_materialization(
                        current,
                        &inverse_key,
                        record,
                        is_remote,
                    );
                }
                _ => self.reset_local_to_remote(record, field, &inverse_key, local, &existing)?,
            }
            return Ok(());
        }

        if let Some(old) = &existing {
            self.remove_from_inverse(old, &inverse_key, record, is_remote)?;
        }

        if let Some(Edge::BelongsTo(edge)) = edge_slot(&mut self.identifiers, record, field) {
            if is_remote {
                edge.remote_state = value.clone();
            } else {
                edge.local_state = value.clone();
            }
            edge.state.has_received_data = true;
            edge.state.is_empty = value.is_none();
            edge.state.is_stale = false;
            edge.state.has_failed_load_attempt = false;
        }

        if let Some(value) = &value {
            self.add_to_inverse(value, &inverse_key, record, is_remote)?;
        }

        if !is_remote {
            self.notify_change(record, field);
            return Ok(());
        }

        let (local, remote) = match self.peek(record, field) {
            Some(Edge::BelongsTo(edge)) => (edge.local_state.clone(), edge.remote_state.clone()),
            _ => return Ok(()),
        };
        if local.as_ref().is_some_and(|l| self.is_new(l)) && remote.is_none() {
            return Ok(());
        }
        if local != remote {
            // a local value that was never the remote value was only ever a local edit
            let local = local.filter(|l| existing.as_ref() != Some(l));
            self.reset_local_to_remote(record, field, &inverse_key, local, &remote)?;
        }
        Ok(())
    }

    /// Point the local view of `record.field` at `remote`, moving the local inverse membership
    /// off `stale_local`.
    fn reset_local_to_remote(
        &mut self,
        record: &Identifier,
        field: &str,
        inverse_key: &str,
        stale_local: Option<Identifier>,
        remote: &Option<Identifier>,
    ) -> Result<(), RelgraphError> {
        if let Some(Edge::BelongsTo(edge)) = edge_slot(&mut self.identifiers, record, field) {
            edge.local_state = remote.clone();
        }
        if let Some(old) = stale_local.filter(|old| Some(old) != remote.as_ref()) {
            self.remove_from_inverse(&old, inverse_key, record, false)?;
        }
        if let Some(current) = remote {
            self.add_to_inverse(current, inverse_key, record, false)?;
        }
        self.notify_change(record, field);
        Ok(())
    }
}
