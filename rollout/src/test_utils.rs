use common_redis::MockRedisClient;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;

use crate::{config::RolloutOptions, flags::flag_service::Rollout};

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Engine over string actors backed by a fresh in-memory redis.
///
/// The returned mock shares state with the engine, use it to inspect keys or
/// the recorded calls.
pub fn setup_rollout() -> (MockRedisClient, Rollout<str>) {
    setup_rollout_with_options(RolloutOptions::default())
}

pub fn setup_rollout_with_options(options: RolloutOptions) -> (MockRedisClient, Rollout<str>) {
    let client = MockRedisClient::new();
    let rollout = Rollout::new(Arc::new(client.clone()), options);
    (client, rollout)
}
