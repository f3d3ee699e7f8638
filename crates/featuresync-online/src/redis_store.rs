//! Redis feature store
//!
//! Each key is a hash with two fields:
//!
//! - `event_time`: unix seconds of the current record
//! - `record`: the record's wire entries as JSON
//!
//! The conditional write runs as a Lua script, so the compare against the
//! current `event_time` and the replace are a single atomic step on the
//! server, no matter how many synchronizers write concurrently.
//!
//! Connections go through a `ConnectionManager` (one multiplexed TCP
//! connection that reconnects on failure).

use async_trait::async_trait;
use chrono::DateTime;
use featuresync_core::{
    build_record_key, CustomerId, Error, FeatureEntry, FeatureRecord, FeatureStore, PutOutcome,
    Result,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

const RECORD_FIELD: &str = "record";

/// Compare-and-set on `event_time`
///
/// Returns `{code, current_event_time}` where code is 0 = written,
/// 1 = unchanged (identical record), 2 = stale.
const PUT_IF_NEWER: &str = r#"
local current = redis.call('HGET', KEYS[1], 'event_time')
if current then
  local cur = tonumber(current)
  local inc = tonumber(ARGV[1])
  if inc < cur then
    return {2, cur}
  end
  if inc == cur then
    if redis.call('HGET', KEYS[1], 'record') == ARGV[2] then
      return {1, cur}
    end
    return {2, cur}
  end
end
redis.call('HSET', KEYS[1], 'event_time', ARGV[1], 'record', ARGV[2])
return {0, tonumber(ARGV[1])}
"#;

/// Redis feature store configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Feature store backed by Redis hashes
pub struct RedisFeatureStore {
    conn: ConnectionManager,
    put_script: Script,
}

impl RedisFeatureStore {
    /// Connect to Redis
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone()).map_err(|e| {
            Error::StorageError(anyhow::anyhow!("Redis connection error: {}", e))
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            Error::StorageError(anyhow::anyhow!("Redis connection manager error: {}", e))
        })?;

        tracing::info!(url = %config.url, "Connected to Redis feature store");

        Ok(Self {
            conn,
            put_script: Script::new(PUT_IF_NEWER),
        })
    }

    fn decode_payload(customer_id: &CustomerId, payload: &str) -> Result<FeatureRecord> {
        let entries: Vec<FeatureEntry> =
            serde_json::from_str(payload).map_err(|_| Error::CorruptRecord {
                customer_id: customer_id.to_string(),
                feature: RECORD_FIELD.to_string(),
                value: payload.to_string(),
            })?;
        FeatureRecord::from_wire(entries)
    }
}

fn outcome_from_reply(code: i64, current_secs: i64) -> Result<PutOutcome> {
    match code {
        0 => Ok(PutOutcome::Written),
        1 => Ok(PutOutcome::Unchanged),
        2 => {
            let current_event_time = DateTime::from_timestamp(current_secs, 0).ok_or_else(|| {
                Error::internal(format!("Redis returned invalid event time {}", current_secs))
            })?;
            Ok(PutOutcome::Stale { current_event_time })
        }
        other => Err(Error::internal(format!(
            "unexpected reply code {} from put script",
            other
        ))),
    }
}

#[async_trait]
impl FeatureStore for RedisFeatureStore {
    async fn put_record(&self, feature_group: &str, record: &FeatureRecord) -> Result<PutOutcome> {
        let key = build_record_key(feature_group, &record.customer_id);
        let payload = serde_json::to_string(&record.to_wire())?;
        let mut conn = self.conn.clone();

        let (code, current_secs): (i64, i64) = self
            .put_script
            .key(&key)
            .arg(record.event_time.timestamp())
            .arg(&payload)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Redis put script error: {}", e)))?;

        let outcome = outcome_from_reply(code, current_secs)?;
        tracing::debug!(key = %key, outcome = ?outcome, "Redis put complete");
        Ok(outcome)
    }

    async fn get_record(
        &self,
        feature_group: &str,
        customer_id: &CustomerId,
    ) -> Result<Option<FeatureRecord>> {
        let key = build_record_key(feature_group, customer_id);
        let mut conn = self.conn.clone();

        let payload: Option<String> = conn
            .hget(&key, RECORD_FIELD)
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Redis HGET error: {}", e)))?;

        payload
            .map(|p| Self::decode_payload(customer_id, &p))
            .transpose()
    }

    /// Health check using PING
    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Redis PING failed: {}", e)))?;

        if pong != "PONG" {
            return Err(Error::StorageError(anyhow::anyhow!(
                "Redis health check failed: expected PONG, got {}",
                pong
            )));
        }

        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}
