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
    /// Remove members from a hasMany relationship. Absent members are skipped.
    pub(crate) fn remove_from_related_records(
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
            "removeFromRelatedRecords",
        )?;

        let mut changed = false;
        for value in values.iter() {
            let removed = match edge_slot(&mut self.identifiers, record, field) {
                Some(Edge::HasMany(edge)) => {
                    let removed = if is_remote {
                        edge.remove_remote(value)
                    } else {
                        edge.remove_local(value)
                    };
                    if removed {
                        edge.state.is_empty = if is_remote {
                            edge.remote_state.is_empty()
                        } else {
                            edge.local_state.is_empty()
                        };
                    }
                    removed
                }
                _ => false,
            };
            if removed {
                changed = true;
                self.remove_from_inverse(value, &inverse_key, record, is_remote)?;
            }
        }

        if changed {
            if is_remote {
                self.add_to_transaction(record, field);
                self.schedule_local_sync(record, field);
            } else {
                self.notify_change(record, field);
            }
        }
        Ok(())
    }
}
