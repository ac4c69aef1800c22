use crate::{
    document::{RelationshipData, RelationshipPayload},
    error::RelgraphError,
    graph::{
        base::{edge_slot, Graph},
        edge::Edge,
    },
    identifier::{Identifier, ResourceRef},
    schema::RelationshipKind,
};

enum Resolved {
    One(Option<Identifier>),
    Many(Vec<Identifier>),
}

impl Graph {
    fn resolve_reference(&self, reference: &ResourceRef) -> Result<Identifier, RelgraphError> {
        reference.validate()?;
        if !self.schema.has_resource(&reference.resource_type) {
            return Err(RelgraphError::Payload(format!(
                "relationship data references the unknown type '{}'",
                reference.resource_type
            )));
        }
        self.identity.get_or_create(reference)
    }

    /// Apply a whole relationship payload from a normalized document.
    ///
    /// The payload is validated completely before any state changes. A missing `data` member leaves
    /// membership untouched, except on a sync relationship that has never received data, where it
    /// means the relationship is known to be empty.
    pub(crate) fn update_relationship(
        &mut self,
        record: &Identifier,
        field: &str,
        payload: RelationshipPayload,
    ) -> Result<(), RelgraphError> {
        let definition = self.get_definition(record, field)?;
        let RelationshipPayload { data, links, meta } = payload;

        let resolved = match (definition.kind, data) {
            (RelationshipKind::BelongsTo, Some(RelationshipData::Many(_))) => {
                return Err(RelgraphError::Payload(format!(
                    "{record}.{field} is a belongsTo relationship but the payload data is an array"
                )))
            }
            (RelationshipKind::HasMany, Some(RelationshipData::One(_))) => {
                return Err(RelgraphError::Payload(format!(
                    "{record}.{field} is a hasMany relationship but the payload data is not an array"
                )))
            }
            (RelationshipKind::Implicit, _) => {
                return Err(RelgraphError::Protocol(format!(
                    "Cannot update the implicit relationship {record}.{field}"
                )))
            }
            (_, None) => None,
            (RelationshipKind::BelongsTo, Some(RelationshipData::Null)) => {
                Some(Resolved::One(None))
            }
            (RelationshipKind::BelongsTo, Some(RelationshipData::One(reference))) => {
                Some(Resolved::One(Some(self.resolve_reference(&reference)?)))
            }
            (RelationshipKind::HasMany, Some(RelationshipData::Null)) => {
                Some(Resolved::Many(Vec::new()))
            }
            (RelationshipKind::HasMany, Some(RelationshipData::Many(references))) => Some(
                Resolved::Many(
                    references
                        .iter()
                        .map(|reference| self.resolve_reference(reference))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
            ),
        };

        let (had_received_data, previous_related) = match self.get(record, field)? {
            Edge::BelongsTo(edge) => (
                edge.state.has_received_data,
                edge.links
                    .as_ref()
                    .and_then(|links| links.related_href().map(str::to_string)),
            ),
            Edge::HasMany(edge) => (
                edge.state.has_received_data,
                edge.links
                    .as_ref()
                    .and_then(|links| links.related_href().map(str::to_string)),
            ),
            Edge::Implicit(_) => (false, None),
        };
        let has_updated_link = links
            .as_ref()
            .and_then(|links| links.related_href())
            .is_some_and(|href| previous_related.as_deref() != Some(href));

        let resolved = match resolved {
            Some(resolved) => Some(resolved),
            None if !definition.is_async && !had_received_data => {
                if links.is_some() && self.config.warn_on_link_only_sync {
                    tracing::warn!(
                        "[Graph::update_relationship] {record}.{field} is a sync relationship but \
                         the payload only carries links; treating it as empty. Sync \
                         relationships should include data."
                    );
                }
                Some(match definition.kind {
                    RelationshipKind::HasMany => Resolved::Many(Vec::new()),
                    _ => Resolved::One(None),
                })
            }
            None => None,
        };

        if let Some(edge) = edge_slot(&mut self.identifiers, record, field) {
            match edge {
                Edge::BelongsTo(edge) => {
                    if links.is_some() {
                        edge.links = links;
                    }
                    if meta.is_some() {
                        edge.meta = meta;
                    }
                }
                Edge::HasMany(edge) => {
                    if links.is_some() {
                        edge.links = links;
                    }
                    if meta.is_some() {
                        edge.meta = meta;
                    }
                }
                Edge::Implicit(_) => {}
            }
        }

        let applied = resolved.is_some();
        match resolved {
            Some(Resolved::One(value)) => {
                self.replace_related_record(record, field, value, true)?
            }
            Some(Resolved::Many(values)) => {
                self.replace_related_records(record, field, values, true)?
            }
            None => {}
        }

        let notify = match edge_slot(&mut self.identifiers, record, field) {
            Some(Edge::BelongsTo(edge)) => {
                edge.state.has_failed_load_attempt = false;
                if applied {
                    edge.state.has_received_data = true;
                    edge.state.is_stale = false;
                    edge.state.has_dematerialized_inverse = false;
                    edge.state.is_empty = edge.remote_state.is_none();
                    false
                } else if has_updated_link {
                    edge.state.is_stale = true;
                    true
                } else {
                    false
                }
            }
            Some(Edge::HasMany(edge)) => {
                edge.state.has_failed_load_attempt = false;
                if applied {
                    edge.state.has_received_data = true;
                    edge.state.is_stale = false;
                    edge.state.has_dematerialized_inverse = false;
                    edge.state.is_empty = edge.remote_state.is_empty();
                    false
                } else if has_updated_link {
                    // data delivered earlier in this batch is newer than the link
                    let stale = !had_received_data || edge.transaction_ref == 0;
                    edge.state.is_stale = stale;
                    stale
                } else {
                    false
                }
            }
            _ => false,
        };
        if notify {
            self.notify_change(record, field);
        }
        Ok(())
    }
}
