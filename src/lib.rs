//! # relgraph
//!
//! A relationship graph and resource cache for client-side data stores.
//!
//! ## Overview
//!
//! relgraph keeps two views of every association between records: the **remote** view the server
//! last confirmed, and the **local** view the application is editing. Updating one side of a
//! relationship updates its inverse, server payloads are batched and applied in a fixed order, and
//! the view layer hears about each observable change exactly once per flush.
//!
//! ### Key Features
//!
//! - **Bidirectional inverses**: declared, conventional and implicit inverse edges kept in step
//! - **Local edits survive server pushes**: collection additions and removals are replayed onto
//!   every remote update until the server catches up
//! - **Batched remote updates**: deletions, then collections, then scalars, in one transaction
//! - **Identifier merging**: a saved record that turns out to be a known resource is folded into it
//! - **Three-tier attributes**: remote, in-flight and local values with rollback and rejection
//! - **Unload reachability**: a cluster of records is released once nothing in it is materialized
//!
//! ## Architecture
//!
//! - **[`identifier`]**: stable handles for resources (`Identifier`, `IdentifierCache`)
//! - **[`schema`]**: attribute and relationship declarations (`SchemaService`, `SchemaRegistry`)
//! - **[`graph`]**: edges, operations and the flush queues (`Graph`, `Operation`)
//! - **[`cache`]**: per-resource attribute state and the commit lifecycle (`Cache`)
//! - **[`document`]**: the JSON:API document shapes accepted by the cache
//! - **[`event`]**: notifications towards the view layer (`CacheCapabilities`, `StoreEvent`)
//! - **[`config`]**: tunables, loadable from TOML
//!
//! ## Quick Start
//!
//! ```rust
//! use relgraph::{
//!     cache::Cache,
//!     config::GraphConfig,
//!     document::ResourceDocument,
//!     event::ChannelCapabilities,
//!     graph::{RelatedData, TickScheduler},
//!     identifier::IdentifierCache,
//!     schema::SchemaRegistry,
//! };
//! use std::sync::Arc;
//! use tokio::sync::mpsc::unbounded_channel;
//!
//! # fn main() -> Result<(), relgraph::RelgraphError> {
//! let schema = SchemaRegistry::from_toml_str(
//!     r#"
//! [post.relationships.comments]
//! kind = "hasMany"
//! type = "comment"
//! inverse = "post"
//! async = false
//!
//! [comment.relationships.post]
//! kind = "belongsTo"
//! type = "post"
//! inverse = "comments"
//! async = false
//! "#,
//! )?;
//! let (tx, _events) = unbounded_channel();
//! let mut cache = Cache::new(
//!     Arc::new(schema),
//!     Arc::new(ChannelCapabilities::new(tx)),
//!     Arc::new(TickScheduler::new()),
//!     IdentifierCache::new(),
//!     GraphConfig::default(),
//! );
//!
//! let document = ResourceDocument::from_json(
//!     r#"{ "data": { "type": "comment", "id": "1",
//!          "relationships": { "post": { "data": { "type": "post", "id": "1" } } } } }"#,
//! )?;
//! let comment = cache.put(document)?.remove(0);
//! cache.flush()?;
//!
//! let post = cache.get_relationship(&comment, "post")?;
//! let Some(RelatedData::One(Some(post))) = post.data else {
//!     panic!("comment.post should be known");
//! };
//! let comments = cache.get_relationship(&post, "comments")?;
//! assert_eq!(comments.data, Some(RelatedData::Many(vec![comment])));
//! # Ok(())
//! # }
//! ```
//!
//! ## Scheduling
//!
//! The graph never runs deferred work by itself. It asks its [`graph::Scheduler`] for a flush
//! when the first remote update of a batch is pushed, and again when local views need to be
//! rebuilt; the host answers by calling [`graph::Graph::flush`] (or [`cache::Cache::flush`]) at
//! the end of its turn. [`graph::TickScheduler`] records the requests for hosts that poll.
//!
//! ## Logging
//!
//! Everything is reported through `tracing`, prefixed with `[Type::method]`. Payload problems
//! that are tolerated (links-only sync relationships, polymorphic assignments in lenient mode)
//! log at `warn`; batch and lifecycle steps at `debug`; per-operation detail at `trace`.

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod graph;
pub mod identifier;
pub mod schema;
#[cfg(test)]
mod tests;

pub use error::*;
