use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// Re-export ErrorKind and RetryMethod so consumers can construct CustomRedisError in tests
// and understand retry behavior
pub use redis::ErrorKind as RedisErrorKind;
pub use redis::RetryMethod;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl From<std::string::FromUtf8Error> for CustomRedisError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        CustomRedisError::ParseError(err.to_string())
    }
}

impl CustomRedisError {
    /// Create a Redis error from an ErrorKind (primarily for testing)
    pub fn from_redis_kind(kind: redis::ErrorKind, description: &'static str) -> Self {
        CustomRedisError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }

    /// Determine if this error is unrecoverable and should not be retried
    ///
    /// Returns `true` for configuration errors and permanent failures.
    /// Returns `false` for transient network/connection issues that may resolve on retry.
    pub fn is_unrecoverable_error(&self) -> bool {
        match self {
            CustomRedisError::Timeout => false,
            CustomRedisError::InvalidConfiguration(_) => true,
            CustomRedisError::ParseError(_) => true,
            CustomRedisError::NotFound => true,
            CustomRedisError::Redis(err) => {
                Self::is_config_error(err) || err.is_unrecoverable_error()
            }
        }
    }

    /// Check if a Redis error is a configuration error that should never be retried
    fn is_config_error(err: &redis::RedisError) -> bool {
        matches!(
            err.kind(),
            redis::ErrorKind::InvalidClientConfig | redis::ErrorKind::AuthenticationFailed
        )
    }

    /// Determine the appropriate retry strategy for this error.
    ///
    /// Delegates to redis crate's `retry_method()` for Redis errors.
    pub fn retry_method(&self) -> RetryMethod {
        match self {
            // Timeouts: wait before retrying to avoid hammering the service
            CustomRedisError::Timeout => RetryMethod::WaitAndRetry,
            CustomRedisError::InvalidConfiguration(_) => RetryMethod::NoRetry,
            CustomRedisError::ParseError(_) => RetryMethod::NoRetry,
            CustomRedisError::NotFound => RetryMethod::NoRetry,
            CustomRedisError::Redis(err) => {
                if Self::is_config_error(err) {
                    RetryMethod::NoRetry
                } else {
                    err.retry_method()
                }
            }
        }
    }
}

/// One command inside an atomic batch.
///
/// Set-valued ops (`SAdd`, `SRem`, `Del`) with an empty member/key list are
/// never sent to the server, their reply is `RedisReply::Count(0)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisOp {
    Get(String),
    Set(String, String),
    SAdd(String, Vec<String>),
    SRem(String, Vec<String>),
    SMembers(String),
    SIsMember(String, String),
    Del(Vec<String>),
}

impl RedisOp {
    pub fn name(&self) -> &'static str {
        match self {
            RedisOp::Get(_) => "get",
            RedisOp::Set(_, _) => "set",
            RedisOp::SAdd(_, _) => "sadd",
            RedisOp::SRem(_, _) => "srem",
            RedisOp::SMembers(_) => "smembers",
            RedisOp::SIsMember(_, _) => "sismember",
            RedisOp::Del(_) => "del",
        }
    }

    /// True when the op carries nothing to do and must be skipped.
    pub fn is_noop(&self) -> bool {
        match self {
            RedisOp::SAdd(_, members) | RedisOp::SRem(_, members) => members.is_empty(),
            RedisOp::Del(keys) => keys.is_empty(),
            _ => false,
        }
    }
}

/// Reply to a single `RedisOp`, in the same position as the op in its batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisReply {
    /// `GET`: `None` when the key does not exist
    Value(Option<String>),
    /// `SMEMBERS`, unordered
    Members(Vec<String>),
    /// `SISMEMBER`
    Flag(bool),
    /// `SADD`, `SREM`, `DEL`
    Count(u64),
    /// `SET`
    Ok,
}

impl RedisReply {
    pub fn into_value(self) -> Result<Option<String>, CustomRedisError> {
        match self {
            RedisReply::Value(v) => Ok(v),
            other => Err(unexpected_reply("value", &other)),
        }
    }

    pub fn into_members(self) -> Result<Vec<String>, CustomRedisError> {
        match self {
            RedisReply::Members(m) => Ok(m),
            other => Err(unexpected_reply("members", &other)),
        }
    }
}

fn unexpected_reply(expected: &str, got: &RedisReply) -> CustomRedisError {
    CustomRedisError::ParseError(format!("expected {expected} reply, got {got:?}"))
}

#[async_trait]
pub trait Client {
    async fn get(&self, k: String) -> Result<String, CustomRedisError>;
    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError>;

    async fn sadd(&self, k: String, members: Vec<String>) -> Result<u64, CustomRedisError>;
    async fn srem(&self, k: String, members: Vec<String>) -> Result<u64, CustomRedisError>;
    async fn smembers(&self, k: String) -> Result<Vec<String>, CustomRedisError>;
    async fn sismember(&self, k: String, member: String) -> Result<bool, CustomRedisError>;

    async fn del(&self, keys: Vec<String>) -> Result<u64, CustomRedisError>;

    /// Run all ops inside a single MULTI/EXEC transaction.
    ///
    /// Replies are returned in op order. Other clients observe either none or
    /// all of the writes.
    async fn atomic(&self, ops: Vec<RedisOp>) -> Result<Vec<RedisReply>, CustomRedisError>;
}

// Module declarations
mod client;
mod mock;

// Re-export public APIs
pub use client::RedisClient;
pub use mock::{MockRedisCall, MockRedisClient, MockRedisValue};
