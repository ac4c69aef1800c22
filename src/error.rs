use std::{fmt, io};

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

use crate::event::StoreEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum RelgraphError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Unresolvable relationship definition: {0}")]
    Definition(String),
    #[error("Malformed relationship payload: {0}")]
    Payload(String),
    #[error("The '{actual}' type is not compatible with '{declared}' and cannot be assigned to the '{field}' relationship")]
    PolymorphicMismatch {
        declared: String,
        actual: String,
        field: String,
    },
    #[error("Relationship protocol misuse: {0}")]
    Protocol(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Notification channel error: {0}")]
    Channel(String),
}

impl RelgraphError {
    /// Errors raised because the schema or the normalization layer produced something the graph
    /// cannot interpret. These are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RelgraphError::Config(_)
                | RelgraphError::Definition(_)
                | RelgraphError::Payload(_)
                | RelgraphError::PolymorphicMismatch { .. }
        )
    }

    /// Errors raised because a caller used the graph API out of order or out of bounds.
    pub fn is_protocol(&self) -> bool {
        matches!(self, RelgraphError::Protocol(_))
    }
}

impl From<toml::de::Error> for RelgraphError {
    fn from(src: toml::de::Error) -> RelgraphError {
        RelgraphError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for RelgraphError {
    fn from(src: toml::ser::Error) -> RelgraphError {
        RelgraphError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for RelgraphError {
    fn from(src: JsonError) -> RelgraphError {
        RelgraphError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for RelgraphError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => RelgraphError::NotFound(format!("{x}")),
            _ => RelgraphError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for RelgraphError {
    fn from(x: fmt::Error) -> Self {
        RelgraphError::Serialization(format!("{x}"))
    }
}

impl From<TokioSendError<StoreEvent>> for RelgraphError {
    fn from(x: TokioSendError<StoreEvent>) -> Self {
        RelgraphError::Channel(format!(
            "Channel update send Error, could not transmit store event {:?}",
            x.0
        ))
    }
}
