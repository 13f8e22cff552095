// Redis lock store
//
// obtain  -> SET key value NX PX ttl
// renew   -> Lua compare-and-swap on the stored owner
// release -> Lua compare-and-delete on the stored owner
// clear   -> DEL, or a Lua compare-and-delete on the whole record

use super::{lease_key, LockStore};
use crate::{
    lease::Lease,
    time::{Clock, SystemClock},
    Error, Result,
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, RedisError, Script};
use std::sync::Arc;
use std::time::Duration;

const RENEW_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
    return {0, ''}
end
local ok, decoded = pcall(cjson.decode, current)
if not ok or decoded['owner'] ~= ARGV[1] then
    return {1, ok and tostring(decoded['owner']) or ''}
end
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return {2, ''}
";

const RELEASE_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
local ok, decoded = pcall(cjson.decode, current)
if ok and decoded['owner'] == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

// Records are compared byte for byte; every writer serializes through
// `Lease::to_json`, so a decoded and re-encoded lease matches the stored one.
const CLEAR_STALE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Lock store backed by a Redis server.
///
/// The key carries a TTL equal to the lease TTL, so Redis evicts abandoned
/// leases on its own.
pub struct RedisLockStore {
    conn: ConnectionManager,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    renew_script: Script,
    release_script: Script,
    clear_stale_script: Script,
}

impl std::fmt::Debug for RedisLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisLockStore {
    pub fn new(conn: ConnectionManager, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            clock,
            key_prefix: String::new(),
            renew_script: Script::new(RENEW_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            clear_stale_script: Script::new(CLEAR_STALE_SCRIPT),
        }
    }

    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`) using the wall clock.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(backend_error)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(backend_error)?;
        Ok(Self::new(conn, Arc::new(SystemClock)))
    }

    /// Prefix prepended to every key, e.g. `"myapp:"`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, lease_key(name))
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Connection-level failures become `BackendUnavailable`; the rest keep
/// their Redis detail.
fn backend_error(err: RedisError) -> Error {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        Error::BackendUnavailable(err.to_string())
    } else {
        Error::Redis(err)
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn get_lease(&self, name: &str) -> Result<Lease> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(name))
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;

        match raw {
            Some(raw) => Lease::from_json(&raw),
            None => Err(Error::NoLeaseFound),
        }
    }

    async fn obtain_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease> {
        let lease = Lease::new(instance, self.clock.now(), ttl);
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(name))
            .arg(lease.to_json()?)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;

        match reply {
            Some(_) => Ok(lease),
            // SET NX does not say who beat us
            None => Err(Error::LeaseHeldByOther { holder: None }),
        }
    }

    async fn renew_lease(&self, name: &str, instance: &str, ttl: Duration) -> Result<Lease> {
        let lease = Lease::new(instance, self.clock.now(), ttl);
        let mut conn = self.conn.clone();

        let (code, owner): (i64, String) = self
            .renew_script
            .key(self.key(name))
            .arg(instance)
            .arg(lease.to_json()?)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(backend_error)?;

        match code {
            2 => Ok(lease),
            1 => Err(Error::NotLeaseOwner { owner }),
            _ => Err(Error::NoLeaseFound),
        }
    }

    async fn release_lease(&self, name: &str, instance: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _deleted: i64 = self
            .release_script
            .key(self.key(name))
            .arg(instance)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn clear_lease(&self, name: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _deleted: i64 = redis::cmd("DEL")
            .arg(self.key(name))
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn clear_stale_lease(&self, name: &str, observed: &Lease) -> Result<()> {
        let mut conn = self.conn.clone();
        let _deleted: i64 = self
            .clear_stale_script
            .key(self.key(name))
            .arg(observed.to_json()?)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}
