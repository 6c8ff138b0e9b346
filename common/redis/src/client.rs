use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

use crate::{Client, CustomRedisError, RedisOp, RedisReply};

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Create a new RedisClient with default settings
    ///
    /// Values are read and written as plain UTF-8 strings. No timeouts are
    /// configured (commands block until the server answers); use
    /// `with_config()` to set `response_timeout` and `connection_timeout`.
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_config(addr, None, None).await
    }

    /// Create a new RedisClient with timeout control
    ///
    /// # Arguments
    /// * `addr` - Redis connection string
    /// * `response_timeout` - Optional timeout for Redis command responses. `None` means no timeout.
    /// * `connection_timeout` - Optional timeout for establishing connections. `None` means no timeout.
    ///
    /// # Errors
    /// Returns `CustomRedisError::InvalidConfiguration` if `Some(Duration::ZERO)` is passed - use `None` for no timeout instead.
    ///
    /// # Examples
    /// ```no_run
    /// use common_redis::RedisClient;
    /// use std::time::Duration;
    ///
    /// # async fn example() {
    /// let client = RedisClient::with_config(
    ///     "redis://localhost:6379".to_string(),
    ///     Some(Duration::from_millis(100)),
    ///     Some(Duration::from_millis(5000)),
    /// ).await.unwrap();
    /// # }
    /// ```
    pub async fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        if let Some(timeout) = response_timeout {
            if timeout.is_zero() {
                return Err(CustomRedisError::InvalidConfiguration(
                    "Redis response timeout cannot be Duration::ZERO - use None for no timeout"
                        .to_string(),
                ));
            }
        }
        if let Some(timeout) = connection_timeout {
            if timeout.is_zero() {
                return Err(CustomRedisError::InvalidConfiguration(
                    "Redis connection timeout cannot be Duration::ZERO - use None for no timeout"
                        .to_string(),
                ));
            }
        }

        let mut config = redis::AsyncConnectionConfig::new();

        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }

        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient { connection })
    }

    fn reply_for(op: &RedisOp, value: &redis::Value) -> Result<RedisReply, CustomRedisError> {
        let reply = match op {
            RedisOp::Get(_) => RedisReply::Value(redis::from_redis_value(value)?),
            RedisOp::Set(_, _) => RedisReply::Ok,
            RedisOp::SAdd(_, _) | RedisOp::SRem(_, _) | RedisOp::Del(_) => {
                RedisReply::Count(redis::from_redis_value(value)?)
            }
            RedisOp::SMembers(_) => RedisReply::Members(redis::from_redis_value(value)?),
            RedisOp::SIsMember(_, _) => RedisReply::Flag(redis::from_redis_value(value)?),
        };
        Ok(reply)
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(k).await?;

        value.ok_or(CustomRedisError::NotFound)
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(k, v).await?;
        Ok(())
    }

    async fn sadd(&self, k: String, members: Vec<String>) -> Result<u64, CustomRedisError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        Ok(conn.sadd(k, members).await?)
    }

    async fn srem(&self, k: String, members: Vec<String>) -> Result<u64, CustomRedisError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        Ok(conn.srem(k, members).await?)
    }

    async fn smembers(&self, k: String) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        Ok(conn.smembers(k).await?)
    }

    async fn sismember(&self, k: String, member: String) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        Ok(conn.sismember(k, member).await?)
    }

    async fn del(&self, keys: Vec<String>) -> Result<u64, CustomRedisError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        Ok(conn.del(keys).await?)
    }

    async fn atomic(&self, ops: Vec<RedisOp>) -> Result<Vec<RedisReply>, CustomRedisError> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        let mut sent = Vec::with_capacity(ops.len());
        for op in &ops {
            if op.is_noop() {
                sent.push(false);
                continue;
            }
            sent.push(true);
            match op {
                RedisOp::Get(k) => pipe.cmd("GET").arg(k),
                RedisOp::Set(k, v) => pipe.cmd("SET").arg(k).arg(v),
                RedisOp::SAdd(k, members) => pipe.cmd("SADD").arg(k).arg(members),
                RedisOp::SRem(k, members) => pipe.cmd("SREM").arg(k).arg(members),
                RedisOp::SMembers(k) => pipe.cmd("SMEMBERS").arg(k),
                RedisOp::SIsMember(k, member) => pipe.cmd("SISMEMBER").arg(k).arg(member),
                RedisOp::Del(keys) => pipe.cmd("DEL").arg(keys),
            };
        }

        let sent_count = sent.iter().filter(|s| **s).count();
        debug!(ops = ops.len(), sent = sent_count, "executing atomic batch");

        let values: Vec<redis::Value> = if sent_count == 0 {
            Vec::new()
        } else {
            let mut conn = self.connection.clone();
            pipe.query_async(&mut conn).await?
        };

        if values.len() != sent_count {
            return Err(CustomRedisError::ParseError(format!(
                "atomic batch returned {} replies for {} commands",
                values.len(),
                sent_count
            )));
        }

        let mut values = values.iter();
        ops.iter()
            .zip(sent)
            .map(|(op, was_sent)| match (was_sent, values.next()) {
                (false, _) => Ok(RedisReply::Count(0)),
                (true, Some(value)) => Self::reply_for(op, value),
                (true, None) => Err(CustomRedisError::ParseError(
                    "atomic batch reply missing".to_string(),
                )),
            })
            .collect()
    }
}
