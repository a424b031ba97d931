//! Redis sorted-set window store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Pipeline, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{AtomicWindowStore, OpReply, WindowOp};
use crate::error::{GatekeeperError, Result};

/// An [`AtomicWindowStore`] backed by Redis sorted sets.
///
/// Pipelines run inside `MULTI`/`EXEC`, so every op of a pipeline applies as
/// one unit relative to other clients.
///
/// The connection is opened on first use. A failed attempt leaves the slot
/// empty and the next call dials again, so a server that is down at startup
/// is picked up once it comes back. Once established, the connection manager
/// reconnects on its own after transient failures.
pub struct RedisWindowStore {
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisWindowStore {
    /// Create a store for the Redis server at `url`.
    ///
    /// Only the URL is checked here; no connection is made until the first
    /// pipeline runs.
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        info!(url = %redact(url), "Shared store configured");
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    /// Whether a connection has been established yet.
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        debug!("Connecting to shared store");
        let connection = ConnectionManager::new(self.client.clone()).await?;
        info!("Connected to shared store");
        *slot = Some(connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl AtomicWindowStore for RedisWindowStore {
    async fn execute_atomic(&self, key: &str, ops: &[WindowOp]) -> Result<Vec<OpReply>> {
        let pipe = window_pipeline(key, ops);
        let mut conn = self.connection().await?;
        let values: Vec<Value> = pipe.query_async(&mut conn).await?;
        decode_replies(ops, &values)
    }

    async fn oldest_score(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.connection().await?;
        let oldest: Vec<(String, f64)> = conn.zrange_withscores(key, 0, 0).await?;
        Ok(oldest.first().map(|(_, score)| *score as u64))
    }
}

/// Build the `MULTI`/`EXEC` pipeline for `ops` on `key`.
fn window_pipeline(key: &str, ops: &[WindowOp]) -> Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for op in ops {
        match op {
            WindowOp::RemoveBefore { score } => {
                // Exclusive bound: an entry scored exactly at the window start stays.
                pipe.zrembyscore(key, "-inf", format!("({}", score));
            }
            WindowOp::Insert { score, member } => {
                pipe.zadd(key, member, *score);
            }
            WindowOp::Count => {
                pipe.zcard(key);
            }
            WindowOp::Expire { ttl_ms } => {
                pipe.pexpire(key, i64::try_from(*ttl_ms).unwrap_or(i64::MAX));
            }
        }
    }
    pipe
}

/// Map raw `EXEC` replies onto the ops that produced them.
fn decode_replies(ops: &[WindowOp], values: &[Value]) -> Result<Vec<OpReply>> {
    if values.len() != ops.len() {
        return Err(GatekeeperError::MalformedResponse(format!(
            "expected {} replies, got {}",
            ops.len(),
            values.len()
        )));
    }

    ops.iter()
        .zip(values)
        .map(|(op, value)| {
            let n: i64 = redis::from_redis_value(value).map_err(|e| {
                GatekeeperError::MalformedResponse(format!("{} reply: {}", op.name(), e))
            })?;
            let n = u64::try_from(n).map_err(|_| {
                GatekeeperError::MalformedResponse(format!("{} reply is negative: {}", op.name(), n))
            })?;
            Ok(match op {
                WindowOp::RemoveBefore { .. } => OpReply::Removed(n),
                WindowOp::Insert { .. } => OpReply::Inserted(n),
                WindowOp::Count => OpReply::Count(n),
                WindowOp::Expire { .. } => OpReply::Expired(n == 1),
            })
        })
        .collect()
}

/// Strip credentials from a connection URL before logging it.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
