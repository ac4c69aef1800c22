//! Operation handlers.
//!
//! Each handler is an `impl Graph` block applying one [crate::graph::Operation] kind. Handlers are
//! shared between local and remote application and branch on `is_remote` only where the two
//! views differ. Inverse maintenance lives in [inverse].

mod add_to_related;
mod inverse;
mod merge_identifier;
mod remove_from_related;
mod replace_related_record;
mod replace_related_records;
mod update_relationship;

use super::{base::Graph, edge::Edge};
use crate::{error::RelgraphError, identifier::Identifier, schema::RelationshipKind};

impl Graph {
    /// Ensure `identifier.field` exists and is of `kind`, returning its inverse key.
    pub(crate) fn expect_kind(
        &mut self,
        identifier: &Identifier,
        field: &str,
        kind: RelationshipKind,
        operation: &str,
    ) -> Result<String, RelgraphError> {
        let edge: &Edge = self.get(identifier, field)?;
        let definition = edge.definition();
        if definition.kind != kind {
            return Err(RelgraphError::Protocol(format!(
                "{operation} can only be applied to a {kind} relationship, but \
                 {identifier}.{field} is a {}",
                definition.kind
            )));
        }
        Ok(definition.inverse_key.clone())
    }
}
