use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::{
    document::RelationshipPayload,
    error::RelgraphError,
    identifier::{Identifier, IdentifierCache, ResourceRef},
};

/// The wire discriminant of an [Operation].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    ReplaceRelatedRecord,
    AddToRelatedRecords,
    RemoveFromRelatedRecords,
    ReplaceRelatedRecords,
    UpdateRelationship,
    DeleteRecord,
    MergeIdentifiers,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ReplaceRelatedRecord => "replaceRelatedRecord",
            OperationKind::AddToRelatedRecords => "addToRelatedRecords",
            OperationKind::RemoveFromRelatedRecords => "removeFromRelatedRecords",
            OperationKind::ReplaceRelatedRecords => "replaceRelatedRecords",
            OperationKind::UpdateRelationship => "updateRelationship",
            OperationKind::DeleteRecord => "deleteRecord",
            OperationKind::MergeIdentifiers => "mergeIdentifiers",
        }
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = RelgraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replaceRelatedRecord" => Ok(OperationKind::ReplaceRelatedRecord),
            "addToRelatedRecords" => Ok(OperationKind::AddToRelatedRecords),
            "removeFromRelatedRecords" => Ok(OperationKind::RemoveFromRelatedRecords),
            "replaceRelatedRecords" => Ok(OperationKind::ReplaceRelatedRecords),
            "updateRelationship" => Ok(OperationKind::UpdateRelationship),
            "deleteRecord" => Ok(OperationKind::DeleteRecord),
            "mergeIdentifiers" => Ok(OperationKind::MergeIdentifiers),
            other => Err(RelgraphError::Protocol(format!(
                "{other} is not a known graph operation"
            ))),
        }
    }
}

/// A graph mutation. Every mutation, local or remote, is expressed as one of these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    ReplaceRelatedRecord {
        record: Identifier,
        field: String,
        value: Option<Identifier>,
    },
    AddToRelatedRecords {
        record: Identifier,
        field: String,
        value: Vec<Identifier>,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    RemoveFromRelatedRecords {
        record: Identifier,
        field: String,
        value: Vec<Identifier>,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    ReplaceRelatedRecords {
        record: Identifier,
        field: String,
        value: Vec<Identifier>,
    },
    /// Remote only: apply a relationship payload as received from the server.
    UpdateRelationship {
        record: Identifier,
        field: String,
        value: RelationshipPayload,
    },
    /// Remote only: the record is gone; detach it from every inverse.
    DeleteRecord {
        record: Identifier,
        #[serde(rename = "isNew")]
        is_new: bool,
    },
    /// Move every edge of `record` onto `value`.
    MergeIdentifiers { record: Identifier, value: Identifier },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::ReplaceRelatedRecord { .. } => OperationKind::ReplaceRelatedRecord,
            Operation::AddToRelatedRecords { .. } => OperationKind::AddToRelatedRecords,
            Operation::RemoveFromRelatedRecords { .. } => OperationKind::RemoveFromRelatedRecords,
            Operation::ReplaceRelatedRecords { .. } => OperationKind::ReplaceRelatedRecords,
            Operation::UpdateRelationship { .. } => OperationKind::UpdateRelationship,
            Operation::DeleteRecord { .. } => OperationKind::DeleteRecord,
            Operation::MergeIdentifiers { .. } => OperationKind::MergeIdentifiers,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn record(&self) -> &Identifier {
        match self {
            Operation::ReplaceRelatedRecord { record, .. }
            | Operation::AddToRelatedRecords { record, .. }
            | Operation::RemoveFromRelatedRecords { record, .. }
            | Operation::ReplaceRelatedRecords { record, .. }
            | Operation::UpdateRelationship { record, .. }
            | Operation::DeleteRecord { record, .. }
            | Operation::MergeIdentifiers { record, .. } => record,
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Operation::ReplaceRelatedRecord { field, .. }
            | Operation::AddToRelatedRecords { field, .. }
            | Operation::RemoveFromRelatedRecords { field, .. }
            | Operation::ReplaceRelatedRecords { field, .. }
            | Operation::UpdateRelationship { field, .. } => Some(field),
            Operation::DeleteRecord { .. } | Operation::MergeIdentifiers { .. } => None,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.field() {
            Some(field) => write!(f, "{}({}.{})", self.name(), self.record(), field),
            None => write!(f, "{}({})", self.name(), self.record()),
        }
    }
}

fn one_or_many<'de, D: serde::Deserializer<'de>>(de: D) -> Result<Vec<ResourceRef>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<ResourceRef>),
        One(ResourceRef),
    }
    Ok(match OneOrMany::deserialize(de)? {
        OneOrMany::Many(refs) => refs,
        OneOrMany::One(reference) => vec![reference],
    })
}

/// The serialized form of an [Operation], with resource references in place of identifiers.
///
/// Deserializing an unknown `op` discriminant fails.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum OperationPayload {
    ReplaceRelatedRecord {
        record: ResourceRef,
        field: String,
        value: Option<ResourceRef>,
    },
    AddToRelatedRecords {
        record: ResourceRef,
        field: String,
        #[serde(deserialize_with = "one_or_many")]
        value: Vec<ResourceRef>,
        #[serde(default)]
        index: Option<usize>,
    },
    RemoveFromRelatedRecords {
        record: ResourceRef,
        field: String,
        #[serde(deserialize_with = "one_or_many")]
        value: Vec<ResourceRef>,
        #[serde(default)]
        index: Option<usize>,
    },
    ReplaceRelatedRecords {
        record: ResourceRef,
        field: String,
        value: Vec<ResourceRef>,
    },
    UpdateRelationship {
        record: ResourceRef,
        field: String,
        value: RelationshipPayload,
    },
    DeleteRecord {
        record: ResourceRef,
        #[serde(rename = "isNew", default)]
        is_new: bool,
    },
    MergeIdentifiers { record: ResourceRef, value: ResourceRef },
}

impl OperationPayload {
    pub fn from_json(content: &str) -> Result<Self, RelgraphError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Resolve every reference through the identity service.
    pub fn resolve(self, identifiers: &IdentifierCache) -> Result<Operation, RelgraphError> {
        let resolve_all = |refs: Vec<ResourceRef>| -> Result<Vec<Identifier>, RelgraphError> {
            refs.iter()
                .map(|reference| identifiers.get_or_create(reference))
                .collect()
        };
        Ok(match self {
            OperationPayload::ReplaceRelatedRecord {
                record,
                field,
                value,
            } => Operation::ReplaceRelatedRecord {
                record: identifiers.get_or_create(&record)?,
                field,
                value: value
                    .map(|reference| identifiers.get_or_create(&reference))
                    .transpose()?,
            },
            OperationPayload::AddToRelatedRecords {
                record,
                field,
                value,
                index,
            } => Operation::AddToRelatedRecords {
                record: identifiers.get_or_create(&record)?,
                field,
                value: resolve_all(value)?,
                index,
            },
            OperationPayload::RemoveFromRelatedRecords {
                record,
                field,
                value,
                index,
            } => Operation::RemoveFromRelatedRecords {
                record: identifiers.get_or_create(&record)?,
                field,
                value: resolve_all(value)?,
                index,
            },
            OperationPayload::ReplaceRelatedRecords {
                record,
                field,
                value,
            } => Operation::ReplaceRelatedRecords {
                record: identifiers.get_or_create(&record)?,
                field,
                value: resolve_all(value)?,
            },
            OperationPayload::UpdateRelationship {
                record,
                field,
                value,
            } => Operation::UpdateRelationship {
                record: identifiers.get_or_create(&record)?,
                field,
                value,
            },
            OperationPayload::DeleteRecord { record, is_new } => Operation::DeleteRecord {
                record: identifiers.get_or_create(&record)?,
                is_new,
            },
            OperationPayload::MergeIdentifiers { record, value } => Operation::MergeIdentifiers {
                record: identifiers.get_or_create(&record)?,
                value: identifiers.get_or_create(&value)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names_round_trip() {
        for kind in [
            OperationKind::ReplaceRelatedRecord,
            OperationKind::AddToRelatedRecords,
            OperationKind::RemoveFromRelatedRecords,
            OperationKind::ReplaceRelatedRecords,
            OperationKind::UpdateRelationship,
            OperationKind::DeleteRecord,
            OperationKind::MergeIdentifiers,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_discriminant_fails() {
        let err = "removeEverything".parse::<OperationKind>().unwrap_err();
        assert!(err.is_protocol());

        let parsed = OperationPayload::from_json(
            r#"{"op": "removeEverything", "record": {"type": "post", "id": "1"}}"#,
        );
        assert!(matches!(parsed, Err(RelgraphError::Serialization(_))));
    }

    #[test]
    fn test_payload_resolution() {
        let identifiers = IdentifierCache::new();
        let op = OperationPayload::from_json(
            r#"{
                "op": "addToRelatedRecords",
                "record": {"type": "post", "id": "1"},
                "field": "comments",
                "value": {"type": "comment", "id": "2"}
            }"#,
        )
        .unwrap()
        .resolve(&identifiers)
        .unwrap();
        assert_eq!(op.kind(), OperationKind::AddToRelatedRecords);
        assert_eq!(op.field(), Some("comments"));
        assert_eq!(format!("{op}"), "addToRelatedRecords(post:1.comments)");
        match op {
            Operation::AddToRelatedRecords { value, index, .. } => {
                assert_eq!(value.len(), 1);
                assert_eq!(value[0].id().as_deref(), Some("2"));
                assert_eq!(index, None);
            }
            other => panic!("unexpected {other}"),
        }
    }
}
