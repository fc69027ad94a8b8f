//! Redis-backed [`Store`].

use super::{Store, Transition};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, ExistenceCheck, RedisError, Script, SetExpiry, SetOptions};
use std::time::Duration;
use tracing::{debug, error};

/// Remove one entry from a list and, only if it was present, add a member to a
/// sorted set.
const LIST_TO_SORTED_SET_LUA: &str = r"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed > 0 then
  redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
end
return removed
";

/// Remove one entry from a list and, only if it was present, push a value onto
/// another list.
const LIST_TO_LIST_LUA: &str = r"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed > 0 then
  redis.call('LPUSH', KEYS[2], ARGV[2])
end
return removed
";

/// Move every entry of one list to another, tail first.
const DRAIN_LUA: &str = r"
local moved = 0
while redis.call('RPOPLPUSH', KEYS[1], KEYS[2]) do
  moved = moved + 1
end
return moved
";

/// Bound on a single non-blocking command when none is configured.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(3);

fn failed<'a>(op: &'static str, key: &'a str) -> impl FnOnce(RedisError) -> StoreError + 'a {
    move |e| {
        error!(error = %e, key = %key, op, "redis command failed");
        StoreError::Redis(e)
    }
}

fn blocking_bound(wait: Duration, operation_timeout: Duration) -> Duration {
    wait.saturating_add(operation_timeout)
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PSETEX and PX reject zero.
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Store adapter over a Redis server.
///
/// Holds two auto-reconnecting connections: one shared by ordinary commands, one
/// reserved for blocking pops so a long `BRPOPLPUSH` never stalls other calls.
/// Concurrent blocking pops on the same store queue behind each other.
///
/// Every command on the shared connection fails once the operation timeout passes
/// without a reply. A blocking pop is bounded by its own wait plus the operation
/// timeout.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    blocking: ConnectionManager,
    list_to_sorted_set: Script,
    list_to_list: Script,
    drain: Script,
    operation_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the server at `url` with [`DEFAULT_OPERATION_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Self::connect_with_timeout(url, DEFAULT_OPERATION_TIMEOUT).await
    }

    /// Connect to the server at `url`, bounding connection attempts and every
    /// command reply by `operation_timeout`. A zero timeout uses the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect_with_timeout(
        url: &str,
        operation_timeout: Duration,
    ) -> StoreResult<Self> {
        let operation_timeout = if operation_timeout.is_zero() {
            DEFAULT_OPERATION_TIMEOUT
        } else {
            operation_timeout
        };
        let client = redis::Client::open(url)?;
        let conn = client
            .get_connection_manager_with_config(
                ConnectionManagerConfig::new()
                    .set_connection_timeout(operation_timeout)
                    .set_response_timeout(operation_timeout),
            )
            .await?;
        // Replies to blocking pops are bounded per call in `pop_push`.
        let blocking = client
            .get_connection_manager_with_config(
                ConnectionManagerConfig::new().set_connection_timeout(operation_timeout),
            )
            .await?;
        debug!(
            operation_timeout_ms = operation_timeout.as_millis(),
            "connected to redis"
        );
        Ok(Self::from_managers(conn, blocking, operation_timeout))
    }

    /// Build a store from existing connection managers. `operation_timeout` bounds
    /// blocking pops beyond their own wait; the managers' own response timeouts
    /// bound everything else.
    #[must_use]
    pub fn from_managers(
        conn: ConnectionManager,
        blocking: ConnectionManager,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            conn,
            blocking,
            list_to_sorted_set: Script::new(LIST_TO_SORTED_SET_LUA),
            list_to_list: Script::new(LIST_TO_LIST_LUA),
            drain: Script::new(DRAIN_LUA),
            operation_timeout,
        }
    }

    /// Bound applied to each command reply.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(failed("GET", key))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn
                .pset_ex::<_, _, ()>(key, value, ttl_millis(ttl))
                .await
                .map_err(failed("PSETEX", key)),
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(failed("SET", key)),
        }
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let options = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::PX(ttl_millis(ttl)));
        let reply: Option<String> = conn
            .set_options(key, value, options)
            .await
            .map_err(failed("SET NX", key))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.del(key).await.map_err(failed("DEL", key))?;
        Ok(removed > 0)
    }

    async fn push(&self, list: &str, value: &str) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.lpush(list, value).await.map_err(failed("LPUSH", list))?;
        Ok(len)
    }

    async fn pop_push(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> StoreResult<Option<String>> {
        // A zero BRPOPLPUSH timeout blocks forever, so fall back to the non-blocking form.
        if timeout.is_zero() {
            let mut conn = self.conn.clone();
            let value: Option<String> = conn
                .rpoplpush(source, destination)
                .await
                .map_err(failed("RPOPLPUSH", source))?;
            return Ok(value);
        }
        let mut conn = self.blocking.clone();
        let bound = blocking_bound(timeout, self.operation_timeout);
        let value: Option<String> = tokio::time::timeout(
            bound,
            conn.brpoplpush(source, destination, timeout.as_secs_f64()),
        )
        .await
        .map_err(|_| {
            error!(
                key = %source,
                bound_ms = bound.as_millis(),
                "redis BRPOPLPUSH got no reply"
            );
            StoreError::Unavailable(format!(
                "BRPOPLPUSH on {source} got no reply within {}ms",
                bound.as_millis()
            ))
        })?
        .map_err(failed("BRPOPLPUSH", source))?;
        Ok(value)
    }

    async fn remove(&self, list: &str, value: &str) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let removed: usize = conn
            .lrem(list, 1, value)
            .await
            .map_err(failed("LREM", list))?;
        Ok(removed)
    }

    async fn range(&self, list: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn
            .lrange(list, start, stop)
            .await
            .map_err(failed("LRANGE", list))?;
        Ok(values)
    }

    async fn len(&self, list: &str) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(list).await.map_err(failed("LLEN", list))?;
        Ok(len)
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(set, member, score)
            .await
            .map_err(failed("ZADD", set))
    }

    async fn zrem(&self, set: &str, member: &str) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.zrem(set, member).await.map_err(failed("ZREM", set))?;
        Ok(removed)
    }

    async fn zrange_by_score(
        &self,
        set: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let count = isize::try_from(limit).unwrap_or(isize::MAX);
        let members: Vec<String> = conn
            .zrangebyscore_limit(set, "-inf", max_score, 0, count)
            .await
            .map_err(failed("ZRANGEBYSCORE", set))?;
        Ok(members)
    }

    async fn zcard(&self, set: &str) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.zcard(set).await.map_err(failed("ZCARD", set))?;
        Ok(len)
    }

    async fn apply(&self, transition: Transition<'_>) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let op = transition.name();
        let count: usize = match transition {
            Transition::ListToSortedSet {
                from,
                remove,
                to,
                insert,
                score,
            } => self
                .list_to_sorted_set
                .key(from)
                .key(to)
                .arg(remove)
                .arg(insert)
                .arg(score)
                .invoke_async(&mut conn)
                .await
                .map_err(failed(op, from))?,
            Transition::ListToList {
                from,
                remove,
                to,
                insert,
            } => self
                .list_to_list
                .key(from)
                .key(to)
                .arg(remove)
                .arg(insert)
                .invoke_async(&mut conn)
                .await
                .map_err(failed(op, from))?,
            Transition::Drain { from, to } => self
                .drain
                .key(from)
                .key(to)
                .invoke_async(&mut conn)
                .await
                .map_err(failed(op, from))?,
        };
        debug!(op, count, "transition applied");
        Ok(count)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(failed("PING", ""))?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::UnexpectedResponse(reply))
        }
    }
}
