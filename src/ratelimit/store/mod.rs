//! Ordered-set stores with an atomic pipeline primitive.
//!
//! The sliding window algorithm only needs a per-key collection of
//! timestamped members and a way to run a short list of operations on it as
//! one indivisible unit. [`AtomicWindowStore`] is that capability; the
//! algorithm itself lives in the shared backend.

mod local;
mod redis_store;

pub use local::LocalWindowStore;
pub use redis_store::RedisWindowStore;

use async_trait::async_trait;

use crate::error::Result;

/// One step of an atomic window pipeline, applied to a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowOp {
    /// Remove every member whose score is strictly below `score`
    RemoveBefore { score: u64 },
    /// Add `member` with the given score
    Insert { score: u64, member: String },
    /// Count the members of the collection
    Count,
    /// Expire the whole collection after `ttl_ms` milliseconds
    Expire { ttl_ms: u64 },
}

impl WindowOp {
    pub fn name(&self) -> &'static str {
        match self {
            WindowOp::RemoveBefore { .. } => "remove_before",
            WindowOp::Insert { .. } => "insert",
            WindowOp::Count => "count",
            WindowOp::Expire { .. } => "expire",
        }
    }
}

/// The reply to one [`WindowOp`], in the same position as the op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpReply {
    Removed(u64),
    Inserted(u64),
    Count(u64),
    Expired(bool),
}

/// A store of per-key ordered collections offering atomic pipelines.
#[async_trait]
pub trait AtomicWindowStore: Send + Sync {
    /// Run `ops` against `key` as one unit relative to every other client,
    /// returning one reply per op in order.
    async fn execute_atomic(&self, key: &str, ops: &[WindowOp]) -> Result<Vec<OpReply>>;

    /// Score of the oldest member under `key`, if any.
    async fn oldest_score(&self, key: &str) -> Result<Option<u64>>;
}
