//! Performance benchmarks for relationship graph operations
//!
//! These benchmarks measure:
//! - Ingesting a JSON:API document with a large hasMany relationship
//! - A remote replace with local edits replayed on top
//! - Merging an identifier that sits in many collections
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use relgraph::{
    cache::Cache,
    config::GraphConfig,
    document::ResourceDocument,
    event::ChannelCapabilities,
    graph::{Operation, TickScheduler},
    identifier::{Identifier, IdentifierCache, ResourceRef},
    schema::SchemaRegistry,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::unbounded_channel;

const SCHEMA: &str = r#"
[post.relationships.comments]
kind = "hasMany"
type = "comment"
inverse = "post"
async = false

[comment.relationships.post]
kind = "belongsTo"
type = "post"
inverse = "comments"
async = false

[tag.relationships.posts]
kind = "hasMany"
type = "post"
"#;

const COMMENTS: usize = 1_000;

fn new_cache() -> (Cache, IdentifierCache) {
    let schema = SchemaRegistry::from_toml_str(SCHEMA).unwrap();
    // The receiver is dropped; notifications are logged and discarded.
    let (tx, _rx) = unbounded_channel();
    let ids = IdentifierCache::new();
    let cache = Cache::new(
        Arc::new(schema),
        Arc::new(ChannelCapabilities::new(tx)),
        Arc::new(TickScheduler::new()),
        ids.clone(),
        GraphConfig::default(),
    );
    (cache, ids)
}

fn post_document(comments: usize) -> String {
    let data: Vec<_> = (0..comments)
        .map(|i| json!({ "type": "comment", "id": i.to_string() }))
        .collect();
    json!({
        "data": {
            "type": "post",
            "id": "1",
            "attributes": { "title": "Benchmarks" },
            "relationships": { "comments": { "data": data } }
        }
    })
    .to_string()
}

fn comment(ids: &IdentifierCache, i: usize) -> Identifier {
    ids.get_or_create(&ResourceRef::new("comment", &i.to_string()))
        .unwrap()
}

// Benchmark: document ingestion and the remote flush it triggers
fn bench_put_has_many(c: &mut Criterion) {
    let document = post_document(COMMENTS);

    c.bench_function("put_has_many_1000", |b| {
        b.iter_batched(
            || (new_cache().0, ResourceDocument::from_json(&document).unwrap()),
            |(mut cache, document)| {
                cache.put(document).unwrap();
                cache.flush().unwrap();
                cache
            },
            BatchSize::SmallInput,
        );
    });
}

// Benchmark: remote replace with pending local additions and removals
fn bench_remote_replace_with_local_edits(c: &mut Criterion) {
    let document = post_document(COMMENTS);

    c.bench_function("remote_replace_with_local_edits", |b| {
        b.iter_batched(
            || {
                let (mut cache, ids) = new_cache();
                cache
                    .put(ResourceDocument::from_json(&document).unwrap())
                    .unwrap();
                cache.flush().unwrap();
                let post = ids
                    .get_or_create(&ResourceRef::new("post", "1"))
                    .unwrap();
                cache
                    .update(Operation::AddToRelatedRecords {
                        record: post.clone(),
                        field: "comments".to_string(),
                        value: (COMMENTS..COMMENTS + 50).map(|i| comment(&ids, i)).collect(),
                        index: None,
                    })
                    .unwrap();
                cache
                    .update(Operation::RemoveFromRelatedRecords {
                        record: post.clone(),
                        field: "comments".to_string(),
                        value: (0..50).map(|i| comment(&ids, i)).collect(),
                        index: None,
                    })
                    .unwrap();
                let replacement: Vec<Identifier> =
                    (COMMENTS / 2..COMMENTS).map(|i| comment(&ids, i)).collect();
                (cache, post, replacement)
            },
            |(mut cache, post, replacement)| {
                cache
                    .graph_mut()
                    .push(Operation::ReplaceRelatedRecords {
                        record: post.clone(),
                        field: "comments".to_string(),
                        value: replacement,
                    })
                    .unwrap();
                cache.flush().unwrap();
                cache.get_relationship(&post, "comments").unwrap()
            },
            BatchSize::SmallInput,
        );
    });
}

// Benchmark: merging a client-side identifier that belongs to many tag collections
fn bench_merge_identifiers(c: &mut Criterion) {
    c.bench_function("merge_identifiers_100_tags", |b| {
        b.iter_batched(
            || {
                let (mut cache, ids) = new_cache();
                let draft = ids.create_local("post");
                let known = ids.get_or_create(&ResourceRef::new("post", "1")).unwrap();
                for i in 0..100 {
                    let tag = ids
                        .get_or_create(&ResourceRef::new("tag", &i.to_string()))
                        .unwrap();
                    cache
                        .update(Operation::AddToRelatedRecords {
                            record: tag,
                            field: "posts".to_string(),
                            value: vec![draft.clone()],
                            index: None,
                        })
                        .unwrap();
                }
                (cache, draft, known)
            },
            |(mut cache, draft, known)| {
                cache
                    .graph_mut()
                    .update(
                        Operation::MergeIdentifiers {
                            record: draft,
                            value: known,
                        },
                        false,
                    )
                    .unwrap();
                cache
            },
            BatchSize::SmallInput,
        );
    });
}

// Benchmark group configuration
criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(50);
    targets =
        bench_put_has_many,
        bench_remote_replace_with_local_edits,
        bench_merge_identifiers
}

criterion_main!(benches);
