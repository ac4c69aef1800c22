use std::collections::HashSet;

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
    /// Replace the membership of a hasMany relationship.
    ///
    /// The new list is taken verbatim (duplicates dropped, order preserved) and only the members
    /// that actually entered or left touch their inverses. A remote replace schedules a local sync;
    /// a local replace notifies immediately.
    pub(crate) fn replace_related_records(
        &mut self,
        record: &Identifier,
        field: &str,
        values: Vec<Identifier>,
        is_remote: bool,
    ) -> Result<(), RelgraphError> {
        let inverse_key = self.expect_kind(
            record,
            field,
            RelationshipKind::HasMany,
            "replaceRelatedRecords",
        )?;
        let definition = self.get_definition(record, field)?;

        let mut seen = HashSet::new();
        let mut next = Vec::with_capacity(values.len());
        for value in values {
            if seen.insert(value.clone()) {
                self.assert_polymorphic_type(record, &definition, &value)?;
                next.push(value);
            }
        }
        if is_remote {
            self.add_to_transaction(record, field);
        }

        let Some(Edge::HasMany(edge)) = edge_slot(&mut self.identifiers, record, field) else {
            return Ok(());
        };
        if !is_remote {
            edge.sync_if_dirty();
        }
        edge.state.has_received_data = true;
        edge.state.is_empty = next.is_empty();
        let (previous, previous_members) = if is_remote {
            (&edge.remote_state, &edge.remote_members)
        } else {
            (&edge.local_state, &edge.local_members)
        };
        let changed = *previous != next;
        let added: Vec<Identifier> = next
            .iter()
            .filter(|value| !previous_members.contains(*value))
            .cloned()
            .collect();
        let removed: Vec<Identifier> = previous
            .iter()
            .filter(|value| !seen.contains(*value))
            .cloned()
            .collect();
        if changed {
            if is_remote {
                edge.set_remote(next);
            } else {
                edge.set_local(next);
            }
        }

        for value in added.iter() {
            self.add_to_inverse(value, &inverse_key, record, is_remote)?;
        }
        for value in removed.iter() {
            self.remove_from_inverse(value, &inverse_key, record, is_remote)?;
        }

        if changed {
            if is_remote {
                self.schedule_local_sync(record, field);
            } else {
                self.notify_change(record, field);
            }
        }
        Ok(())
    }
}
