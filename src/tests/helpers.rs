//! Shared test utilities for graph and cache testing

use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::{
    cache::Cache,
    config::GraphConfig,
    event::{ChannelCapabilities, StoreEvent},
    graph::{Graph, TickScheduler},
    identifier::{Identifier, IdentifierCache, ResourceRef},
    schema::{RelationshipField, ResourceSchema, SchemaRegistry},
};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Posts, comments, users, tags and media.
///
/// `post.comments`/`comment.post` are sync and declared on both sides, `post.author`/`user.posts`
/// are async, `post.tags` and `post.editor` have implicit inverses, and `post.hero` is a
/// polymorphic `media` slot that `image` implements and `video` does not.
pub fn blog_schema() -> SchemaRegistry {
    let schema = SchemaRegistry::create();
    schema.register(
        "post".to_string(),
        ResourceSchema::new()
            .attribute("title", Some(json!("untitled")))
            .attribute("body", None)
            .relationship(
                "comments",
                RelationshipField::has_many("comment").inverse("post").sync(),
            )
            .relationship("author", RelationshipField::belongs_to("user").inverse("posts"))
            .relationship("tags", RelationshipField::has_many("tag").no_inverse().sync())
            .relationship(
                "editor",
                RelationshipField::belongs_to("user").no_inverse().sync(),
            )
            .relationship(
                "hero",
                RelationshipField::belongs_to("media")
                    .no_inverse()
                    .sync()
                    .polymorphic(),
            ),
    );
    schema.register(
        "comment".to_string(),
        ResourceSchema::new().attribute("body", None).relationship(
            "post",
            RelationshipField::belongs_to("post").inverse("comments").sync(),
        ),
    );
    schema.register(
        "user".to_string(),
        ResourceSchema::new()
            .attribute("name", None)
            .relationship("posts", RelationshipField::has_many("post").inverse("author")),
    );
    schema.register(
        "tag".to_string(),
        ResourceSchema::new().attribute("name", None),
    );
    schema.register("media".to_string(), ResourceSchema::new());
    schema.register(
        "image".to_string(),
        ResourceSchema::new().attribute("src", None).implements("media"),
    );
    schema.register("video".to_string(), ResourceSchema::new());
    schema
}

/// A [Graph] over [blog_schema] wired to a channel and a tick scheduler.
pub struct GraphFixture {
    pub graph: Graph,
    pub ids: IdentifierCache,
    pub capabilities: Arc<ChannelCapabilities>,
    pub scheduler: Arc<TickScheduler>,
    pub events: UnboundedReceiver<StoreEvent>,
}

impl GraphFixture {
    pub fn new() -> Self {
        GraphFixture::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        init_logging();
        let (tx, events) = unbounded_channel();
        let capabilities = Arc::new(ChannelCapabilities::new(tx));
        let scheduler = Arc::new(TickScheduler::new());
        let ids = IdentifierCache::new();
        let graph = Graph::new(
            Arc::new(blog_schema()),
            capabilities.clone(),
            scheduler.clone(),
            ids.clone(),
            config,
        );
        GraphFixture {
            graph,
            ids,
            capabilities,
            scheduler,
            events,
        }
    }

    pub fn record(&self, resource_type: &str, id: &str) -> Identifier {
        self.ids
            .get_or_create(&ResourceRef::new(resource_type, id))
            .unwrap()
    }

    /// Every event emitted since the last drain.
    pub fn drain(&mut self) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A [Cache] over [blog_schema] wired to a channel and a tick scheduler.
pub struct CacheFixture {
    pub cache: Cache,
    pub ids: IdentifierCache,
    pub capabilities: Arc<ChannelCapabilities>,
    pub events: UnboundedReceiver<StoreEvent>,
}

impl CacheFixture {
    pub fn new() -> Self {
        CacheFixture::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        init_logging();
        let (tx, events) = unbounded_channel();
        let capabilities = Arc::new(ChannelCapabilities::new(tx));
        let ids = IdentifierCache::new();
        let cache = Cache::new(
            Arc::new(blog_schema()),
            capabilities.clone(),
            Arc::new(TickScheduler::new()),
            ids.clone(),
            config,
        );
        CacheFixture {
            cache,
            ids,
            capabilities,
            events,
        }
    }

    pub fn record(&self, resource_type: &str, id: &str) -> Identifier {
        self.ids
            .get_or_create(&ResourceRef::new(resource_type, id))
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
