use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt::{Display, Formatter},
};
use tokio::sync::mpsc::UnboundedSender;

use crate::{error::RelgraphError, identifier::Identifier};

/// Which facet of a resource changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    Attributes,
    Relationships,
    /// Lifecycle flags (new, deleted, commit state) changed.
    State,
    Errors,
    Identity,
    /// The resource was loaded into the cache for the first time.
    Added,
    Removed,
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            NotificationKind::Attributes => "attributes",
            NotificationKind::Relationships => "relationships",
            NotificationKind::State => "state",
            NotificationKind::Errors => "errors",
            NotificationKind::Identity => "identity",
            NotificationKind::Added => "added",
            NotificationKind::Removed => "removed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StoreEvent {
    /// Identifier, kind of change, field name when the change is scoped to one field
    Notification(Identifier, NotificationKind, Option<String>),
    /// The view layer should release whatever it materialized for this identifier
    Disconnected(Identifier),
}

impl StoreEvent {
    pub fn identifier(&self) -> &Identifier {
        match self {
            StoreEvent::Notification(identifier, _, _) => identifier,
            StoreEvent::Disconnected(identifier) => identifier,
        }
    }
}

impl Display for StoreEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            StoreEvent::Notification(identifier, kind, Some(key)) => {
                write!(f, "Notification({identifier}, {kind}, {key})")
            }
            StoreEvent::Notification(identifier, kind, None) => {
                write!(f, "Notification({identifier}, {kind})")
            }
            StoreEvent::Disconnected(identifier) => write!(f, "Disconnected({identifier})"),
        }
    }
}

/// What the graph and the cache need from the layer that materializes records.
pub trait CacheCapabilities: Send + Sync {
    fn notify_change(&self, identifier: &Identifier, kind: NotificationKind, key: Option<&str>);

    /// Whether a record object is currently materialized for `identifier`.
    fn has_record(&self, identifier: &Identifier) -> bool;

    fn disconnect_record(&self, identifier: &Identifier);
}

/// [CacheCapabilities] that forward every notification over a tokio channel.
///
/// Materialization is tracked explicitly through [ChannelCapabilities::materialize] and
/// [ChannelCapabilities::dematerialize].
pub struct ChannelCapabilities {
    tx: UnboundedSender<StoreEvent>,
    materialized: RwLock<HashSet<Identifier>>,
}

impl ChannelCapabilities {
    pub fn new(tx: UnboundedSender<StoreEvent>) -> Self {
        ChannelCapabilities {
            tx,
            materialized: RwLock::new(HashSet::new()),
        }
    }

    pub fn materialize(&self, identifier: &Identifier) {
        self.materialized.write().insert(identifier.clone());
    }

    pub fn dematerialize(&self, identifier: &Identifier) {
        self.materialized.write().remove(identifier);
    }

    fn send(&self, event: StoreEvent) {
        if let Err(e) = self.tx.send(event) {
            let err = RelgraphError::from(e);
            tracing::warn!("[ChannelCapabilities::send] {err}");
        }
    }
}

impl CacheCapabilities for ChannelCapabilities {
    fn notify_change(&self, identifier: &Identifier, kind: NotificationKind, key: Option<&str>) {
        tracing::trace!("[ChannelCapabilities::notify_change] {identifier} {kind} {key:?}");
        self.send(StoreEvent::Notification(
            identifier.clone(),
            kind,
            key.map(str::to_string),
        ));
    }

    fn has_record(&self, identifier: &Identifier) -> bool {
        self.materialized.read().contains(identifier)
    }

    fn disconnect_record(&self, identifier: &Identifier) {
        self.dematerialize(identifier);
        self.send(StoreEvent::Disconnected(identifier.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{IdentifierCache, ResourceRef};
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn test_channel_capabilities_forward_events() {
        let (tx, mut rx) = unbounded_channel();
        let capabilities = ChannelCapabilities::new(tx);
        let ids = IdentifierCache::new();
        let post = ids.get_or_create(&ResourceRef::new("post", "1")).unwrap();

        capabilities.materialize(&post);
        assert!(capabilities.has_record(&post));
        capabilities.notify_change(&post, NotificationKind::Attributes, Some("title"));
        capabilities.disconnect_record(&post);
        assert!(!capabilities.has_record(&post));

        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Notification(
                post.clone(),
                NotificationKind::Attributes,
                Some("title".to_string())
            )
        );
        let disconnected = rx.try_recv().unwrap();
        assert_eq!(disconnected, StoreEvent::Disconnected(post.clone()));
        assert_eq!(format!("{disconnected}"), "Disconnected(post:1)");
    }

    #[test]
    fn test_closed_channel_does_not_panic() {
        let (tx, rx) = unbounded_channel();
        drop(rx);
        let capabilities = ChannelCapabilities::new(tx);
        let post = IdentifierCache::new().create_local("post");
        capabilities.notify_change(&post, NotificationKind::State, None);
    }
}
