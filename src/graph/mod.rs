//! Graph module: relationship state between records.
//!
//! Every relationship is stored as an edge keyed by `(identifier, field)`, holding a confirmed
//! remote view and a speculative local view. The graph keeps the inverse side of every edge in
//! step without ever touching the records themselves; everything is done by [Identifier].
//!
//! # Module Organization
//!
//! - [`definition`]: edge definition resolution (inverse discovery, implicit edges, memoization)
//! - [`edge`]: the three edge kinds and the view-layer payload
//! - [`operation`]: the closed operation vocabulary
//! - [`schedule`]: the host scheduling hook
//! - `base`: the node/edge store, queues and dispatcher
//! - `ops`: one handler per operation kind
//!
//! # Public API
//!
//! ```rust
//! use relgraph::graph::{Graph, Operation, TickScheduler};
//! ```
//!
//! [Identifier]: crate::identifier::Identifier

mod base;
pub mod definition;
pub mod edge;
pub mod operation;
mod ops;
pub mod schedule;


pub use base::Graph;
pub use definition::{implicit_key_for, DefinitionCache, EdgeDefinition, UpgradedMeta};
pub use edge::{
    BelongsToEdge, Edge, EdgeState, HasManyEdge, ImplicitEdge, RelatedData, RelationshipView,
};
pub use operation::{Operation, OperationKind, OperationPayload};
pub use schedule::{FlushQueue, Scheduler, TickScheduler};
