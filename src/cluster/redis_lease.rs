//! Redis-backed lease coordinator
//!
//! Each purpose maps to one Redis key holding `"{token}:{ttl_ms}"` with a
//! matching `PX` expiry. Redis expiry does the clobbering; refresh and
//! release are compare-and-set scripts so only the current holder succeeds.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::coordinator::{Coordinator, CoordinatorError, LeaseKey};

const KEY_PREFIX: &str = "vigil:lease";

const REFRESH_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
    return 1
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub struct RedisCoordinator {
    conn: ConnectionManager,
    refresh: Script,
    release: Script,
}

impl RedisCoordinator {
    pub async fn connect(url: &str) -> Result<Self, CoordinatorError> {
        let client = redis::Client::open(url).map_err(to_unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(to_unavailable)?;
        Ok(Self {
            conn,
            refresh: Script::new(REFRESH_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }

    fn redis_key(purpose: &str) -> String {
        format!("{}:{}", KEY_PREFIX, purpose)
    }
}

fn to_unavailable(e: redis::RedisError) -> CoordinatorError {
    CoordinatorError::Unavailable(e.to_string())
}

fn encode_key(ttl_ms: i64) -> LeaseKey {
    LeaseKey(format!("{:016x}:{}", rand::random::<u64>(), ttl_ms))
}

fn ttl_of(key: &LeaseKey) -> Option<i64> {
    key.as_str().rsplit_once(':')?.1.parse().ok()
}

#[async_trait]
impl Coordinator for RedisCoordinator {
    async fn acquire_lease(
        &self,
        ttl_ms: i64,
        purpose: &str,
        note: &str,
    ) -> Result<Option<LeaseKey>, CoordinatorError> {
        let mut conn = self.conn.clone();
        let key = encode_key(ttl_ms);
        let acquired: Option<String> = redis::cmd("SET")
            .arg(Self::redis_key(purpose))
            .arg(key.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(to_unavailable)?;

        if acquired.is_some() {
            let note_key = format!("{}:note", Self::redis_key(purpose));
            conn.set_ex::<_, _, ()>(&note_key, note, (ttl_ms / 1000).max(1) as u64)
                .await
                .map_err(to_unavailable)?;
            Ok(Some(key))
        } else {
            Ok(None)
        }
    }

    async fn refresh_lease(
        &self,
        purpose: &str,
        key: &LeaseKey,
        note: &str,
    ) -> Result<Option<LeaseKey>, CoordinatorError> {
        let Some(ttl_ms) = ttl_of(key) else {
            return Ok(None);
        };
        let mut conn = self.conn.clone();
        let new_key = encode_key(ttl_ms);
        let refreshed: i32 = self
            .refresh
            .key(Self::redis_key(purpose))
            .arg(key.as_str())
            .arg(new_key.as_str())
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(to_unavailable)?;

        if refreshed == 1 {
            let note_key = format!("{}:note", Self::redis_key(purpose));
            conn.set_ex::<_, _, ()>(&note_key, note, (ttl_ms / 1000).max(1) as u64)
                .await
                .map_err(to_unavailable)?;
            Ok(Some(new_key))
        } else {
            Ok(None)
        }
    }

    async fn release_lease(&self, purpose: &str, key: &LeaseKey) -> Result<(), CoordinatorError> {
        let mut conn = self.conn.clone();
        let _: i32 = self
            .release
            .key(Self::redis_key(purpose))
            .arg(key.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(to_unavailable)?;
        Ok(())
    }
}
