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
    /// Add members to a hasMany relationship, starting at `index` when given. Members already
    /// present are skipped.
    pub(crate) fn add_to_related_records(
        &mut self,
        record: &Identifier,
        field: &str,
        values: Vec<Identifier>,
        index: Option<usize>,
        is_remote: bool,
    ) -> Result<(), RelgraphError> {
        let inverse_key = self.expect_kind(
            record,
            field,
            RelationshipKind::HasMany,
            "addToRelatedRecords",
        )?;
        let definition = self.get_definition(record, field)?;
        for value in values.iter() {
            self.assert_polymorphic_type(record, &definition, value)?;
        }

        let mut changed = false;
        for (offset, value) in values.iter().enumerate() {
            let position = index.map(|index| index + offset);
            let added = match edge_slot(&mut self.identifiers, record, field) {
                Some(Edge::HasMany(edge)) => {
                    let added = if is_remote {
                        edge.add_remote(value, position)
                    } else {
                        edge.add_local(value, position)
                    };
                    if added {
                        edge.state.has_received_data = true;
                        edge.state.is_empty = false;
                    }
                    added
                }
                _ => false,
            };
            if added {
                changed = true;
                self.add_to_inverse(value, &inverse_key, record, is_remote)?;
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
