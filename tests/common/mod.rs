//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use relgraph::{
    cache::Cache,
    config::{ConfigProvider, TomlConfigProvider},
    document::ResourceDocument,
    event::{ChannelCapabilities, StoreEvent},
    graph::{BelongsToEdge, HasManyEdge, TickScheduler},
    identifier::{Identifier, IdentifierCache, ResourceRef},
    schema::SchemaRegistry,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times. Later calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Posts with sync comments and an async author.
pub const BLOG_SCHEMA: &str = r#"
[post.attributes.title]
default = "untitled"

[post.relationships.comments]
kind = "hasMany"
type = "comment"
inverse = "post"
async = false

[post.relationships.author]
kind = "belongsTo"
type = "user"
inverse = "posts"

[comment.attributes.body]

[comment.relationships.post]
kind = "belongsTo"
type = "post"
inverse = "comments"
async = false

[user.attributes.name]

[user.relationships.posts]
kind = "hasMany"
type = "post"
inverse = "author"
"#;

/// A cache over [BLOG_SCHEMA], loaded from disk the way a host would, with a tick scheduler the
/// test drives by hand.
#[allow(dead_code)]
pub struct Store {
    pub cache: Cache,
    pub ids: IdentifierCache,
    pub capabilities: Arc<ChannelCapabilities>,
    pub scheduler: Arc<TickScheduler>,
    pub events: UnboundedReceiver<StoreEvent>,
    _dir: TempDir,
}

#[allow(dead_code)]
impl Store {
    pub fn new() -> Self {
        init_logging();
        let dir = TempDir::new().unwrap();
        let schema_path = dir.path().join("schema.toml");
        std::fs::write(&schema_path, BLOG_SCHEMA).unwrap();
        let schema = SchemaRegistry::load(&schema_path).unwrap();
        let config = TomlConfigProvider::new(dir.path().join("relgraph.toml"))
            .get_config()
            .unwrap();

        let (tx, events) = unbounded_channel();
        let capabilities = Arc::new(ChannelCapabilities::new(tx));
        let scheduler = Arc::new(TickScheduler::new());
        let ids = IdentifierCache::new();
        let cache = Cache::new(
            Arc::new(schema),
            capabilities.clone(),
            scheduler.clone(),
            ids.clone(),
            config,
        );
        Store {
            cache,
            ids,
            capabilities,
            scheduler,
            events,
            _dir: dir,
        }
    }

    pub fn record(&self, resource_type: &str, id: &str) -> Identifier {
        self.ids
            .get_or_create(&ResourceRef::new(resource_type, id))
            .unwrap()
    }

    /// Store a JSON:API document and run the resulting work.
    pub fn put(&mut self, json: &str) -> Vec<Identifier> {
        let identifiers = self
            .cache
            .put(ResourceDocument::from_json(json).unwrap())
            .unwrap();
        self.tick();
        identifiers
    }

    /// Answer every flush the graph asked for.
    pub fn tick(&mut self) {
        while !self.scheduler.take_pending().is_empty() {
            self.cache.flush().unwrap();
        }
    }

    /// The edge after its local view has caught up with pending remote changes.
    pub fn has_many(&mut self, identifier: &Identifier, field: &str) -> HasManyEdge {
        self.cache.get_relationship(identifier, field).unwrap();
        self.cache
            .graph_mut()
            .get(identifier, field)
            .unwrap()
            .as_has_many()
            .cloned()
            .unwrap()
    }

    pub fn belongs_to(&mut self, identifier: &Identifier, field: &str) -> BelongsToEdge {
        self.cache
            .graph_mut()
            .get(identifier, field)
            .unwrap()
            .as_belongs_to()
            .cloned()
            .unwrap()
    }

    pub fn drain(&mut self) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
