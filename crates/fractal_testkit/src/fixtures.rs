//! Test fixtures and cache helpers.
//!
//! The blog fixture models three entity types linked by two relations:
//! `user.posts -> post.authorId` and `post.comments -> comment.postId`.

use fractal_cache::{
    CacheContext, DiffEngine, EntityConfig, EntityPool, Intent, RelationConfig, Schema, Value,
};
use fractal_sync::{Dataset, MemoryAdapter, PlanExecutor};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Post statuses cycled through by [`blog_dataset`].
pub const STATUSES: [&str; 3] = ["published", "draft", "archived"];

/// Schema of the blog fixture.
pub fn blog_schema() -> Schema {
    Schema::new()
        .with_entity(EntityConfig::new("user", ["name", "email"]))
        .with_entity(EntityConfig::new("post", ["title", "authorId", "status", "score"]))
        .with_entity(EntityConfig::new("comment", ["body", "postId", "approved"]))
        .with_relation(RelationConfig::new("posts", "user", "post", "authorId"))
        .with_relation(RelationConfig::new("comments", "post", "comment", "postId"))
}

/// Deterministic blog data.
///
/// User `u{i}` writes posts `p{i}_{j}`; post `p{i}_{j}` has comments
/// `c{i}_{j}_{k}`. Field values are derived from the indices, so lists
/// sorted on them have ties.
pub fn blog_dataset(users: usize, posts_per_user: usize, comments_per_post: usize) -> Dataset {
    let mut dataset = Dataset::new();
    for u in 0..users {
        let user = format!("u{u}");
        dataset = dataset.with_entity(
            "user",
            &user,
            [
                ("name", Value::from(format!("user {u}"))),
                ("email", Value::from(format!("user{u}@example.com"))),
            ],
        );
        for p in 0..posts_per_user {
            let post = format!("p{u}_{p}");
            let score = i64::try_from((u * 7 + p * 3) % 10).unwrap_or_default();
            dataset = dataset.with_entity(
                "post",
                &post,
                [
                    ("title", Value::from(format!("post {p} by {u}"))),
                    ("authorId", Value::from(user.as_str())),
                    ("status", Value::from(STATUSES[p % STATUSES.len()])),
                    ("score", Value::from(score)),
                ],
            );
            for c in 0..comments_per_post {
                dataset = dataset.with_entity(
                    "comment",
                    &format!("c{u}_{p}_{c}"),
                    [
                        ("body", Value::from(format!("comment {c}"))),
                        ("postId", Value::from(post.as_str())),
                        ("approved", Value::from(c % 2 == 0)),
                    ],
                );
            }
        }
    }
    dataset
}

/// A cache wired to an in-memory backend.
pub struct CacheHarness {
    /// Shared schema.
    pub schema: Arc<Schema>,
    /// Cache under test.
    pub context: Arc<CacheContext>,
    /// Planner.
    pub engine: Arc<DiffEngine>,
    /// Backend.
    pub adapter: Arc<MemoryAdapter>,
}

impl CacheHarness {
    /// Creates a harness over `schema` and `dataset` with default strategies.
    pub fn new(schema: Schema, dataset: Dataset) -> Self {
        let schema = Arc::new(schema);
        Self::with_engine(
            DiffEngine::with_defaults(Arc::clone(&schema)),
            schema,
            dataset,
        )
    }

    /// Creates a harness with a custom planner.
    pub fn with_engine(engine: DiffEngine, schema: Arc<Schema>, dataset: Dataset) -> Self {
        Self {
            context: Arc::new(CacheContext::new(Arc::clone(&schema))),
            engine: Arc::new(engine),
            adapter: Arc::new(MemoryAdapter::new(Arc::clone(&schema), dataset)),
            schema,
        }
    }

    /// The blog fixture with 3 users, 4 posts each, 3 comments per post.
    pub fn blog() -> Self {
        Self::new(blog_schema(), blog_dataset(3, 4, 3))
    }

    /// A new executor over the harness.
    pub fn executor(&self) -> PlanExecutor<MemoryAdapter> {
        PlanExecutor::new(
            Arc::clone(&self.adapter),
            Arc::clone(&self.context),
            Arc::clone(&self.engine),
        )
    }

    /// Number of requests needed to answer `intent` now.
    pub fn plan_len(&self, intent: &Intent) -> usize {
        self.context
            .plan(&self.engine, intent)
            .expect("intent should plan")
            .len()
    }

    /// Whether the cache answers `intent` without any request.
    pub fn is_answered(&self, intent: &Intent) -> bool {
        self.plan_len(intent) == 0
    }

    /// Whether every cached record keeps data and field mask in step.
    pub fn all_records_sound(&self) -> bool {
        self.context.read().pool.iter_all().all(|r| r.is_sound())
    }
}

/// A temporary directory for JSON input and output files.
pub struct TempWorkspace {
    dir: TempDir,
}

impl TempWorkspace {
    /// Creates an empty workspace.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Root directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `name` inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes `value` as pretty JSON and returns the file path.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> PathBuf {
        let path = self.file(name);
        let json = serde_json::to_string_pretty(value).expect("Failed to serialize fixture");
        std::fs::write(&path, json).expect("Failed to write fixture");
        path
    }

    /// Reads a JSON file back.
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> T {
        let text = std::fs::read_to_string(self.file(name)).expect("Failed to read fixture");
        serde_json::from_str(&text).expect("Failed to parse fixture")
    }
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
