use common_redis::CustomRedisError;
use thiserror::Error;

use crate::metrics_consts::STORAGE_ERRORS_COUNTER;

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("redis unavailable: {0}")]
    RedisUnavailable(CustomRedisError),
    #[error("failed to parse redis data: {0}")]
    RedisDataParsingError(String),
    #[error("Timed out while talking to redis")]
    TimeoutError,
    #[error("Actor has no derivable id")]
    ActorIdUnavailable,
}

impl FlagError {
    /// Returns a short error code for logs and metric labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            FlagError::RedisUnavailable(_) => "redis_unavailable",
            FlagError::RedisDataParsingError(_) => "redis_parsing_error",
            FlagError::TimeoutError => "timeout",
            FlagError::ActorIdUnavailable => "actor_id_unavailable",
        }
    }

    /// Store failures that may go away on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            FlagError::TimeoutError => true,
            FlagError::RedisUnavailable(e) => !e.is_unrecoverable_error(),
            FlagError::RedisDataParsingError(_) | FlagError::ActorIdUnavailable => false,
        }
    }
}

impl From<CustomRedisError> for FlagError {
    fn from(e: CustomRedisError) -> Self {
        let err = match e {
            CustomRedisError::Timeout => FlagError::TimeoutError,
            CustomRedisError::ParseError(msg) => FlagError::RedisDataParsingError(msg),
            other => FlagError::RedisUnavailable(other),
        };
        tracing::error!(error = %err, "redis operation failed");
        metrics::counter!(STORAGE_ERRORS_COUNTER, "error" => err.error_code()).increment(1);
        err
    }
}
