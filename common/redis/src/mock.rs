use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Client, CustomRedisError, RedisOp, RedisReply};

#[derive(Debug, Clone, PartialEq, Eq)]
enum MockEntry {
    String(String),
    Set(BTreeSet<String>),
}

/// In-memory stand-in for Redis.
///
/// Keeps real string/set state so higher layers can be exercised end to end,
/// records every call, and can be told to fail specific operations. Clones
/// share the same state.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    data: Arc<Mutex<HashMap<String, MockEntry>>>,
    failures: Arc<Mutex<HashMap<String, CustomRedisError>>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

#[derive(Debug, Clone)]
pub enum MockRedisValue {
    None,
    String(String),
    VecString(Vec<String>),
    Batch(Vec<RedisOp>),
}

#[derive(Debug, Clone)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

// Poisoning only happens if a test panicked mid-call, the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn wrong_type() -> CustomRedisError {
    CustomRedisError::from_redis_kind(
        redis::ErrorKind::TypeError,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    )
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `op` ("get", "smembers", "atomic", ...) fail with `err`.
    pub fn fail_op(&mut self, op: &str, err: CustomRedisError) -> Self {
        lock(&self.failures).insert(op.to_owned(), err);
        self.clone()
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Write a raw string value, bypassing call recording.
    pub fn seed_string(&mut self, key: &str, value: &str) -> Self {
        lock(&self.data).insert(key.to_owned(), MockEntry::String(value.to_owned()));
        self.clone()
    }

    /// Write a raw set value, bypassing call recording.
    pub fn seed_set(&mut self, key: &str, members: &[&str]) -> Self {
        let set = members.iter().map(|m| m.to_string()).collect();
        lock(&self.data).insert(key.to_owned(), MockEntry::Set(set));
        self.clone()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        lock(&self.calls).clone()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    /// All keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.data).keys().cloned().collect();
        keys.sort();
        keys
    }

    fn record(&self, op: &str, key: String, value: MockRedisValue) {
        lock(&self.calls).push(MockRedisCall {
            op: op.to_string(),
            key,
            value,
        });
    }

    fn check_failure(&self, op: &str) -> Result<(), CustomRedisError> {
        match lock(&self.failures).get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn apply(
        data: &mut HashMap<String, MockEntry>,
        op: &RedisOp,
    ) -> Result<RedisReply, CustomRedisError> {
        if op.is_noop() {
            return Ok(RedisReply::Count(0));
        }
        let reply = match op {
            RedisOp::Get(k) => match data.get(k) {
                None => RedisReply::Value(None),
                Some(MockEntry::String(s)) => RedisReply::Value(Some(s.clone())),
                Some(MockEntry::Set(_)) => return Err(wrong_type()),
            },
            RedisOp::Set(k, v) => {
                data.insert(k.clone(), MockEntry::String(v.clone()));
                RedisReply::Ok
            }
            RedisOp::SAdd(k, members) => {
                let entry = data
                    .entry(k.clone())
                    .or_insert_with(|| MockEntry::Set(BTreeSet::new()));
                let MockEntry::Set(set) = entry else {
                    return Err(wrong_type());
                };
                let added = members.iter().filter(|m| set.insert((*m).clone())).count();
                RedisReply::Count(added as u64)
            }
            RedisOp::SRem(k, members) => {
                let (removed, now_empty) = match data.get_mut(k) {
                    None => (0, false),
                    Some(MockEntry::String(_)) => return Err(wrong_type()),
                    Some(MockEntry::Set(set)) => {
                        let removed = members.iter().filter(|m| set.remove(*m)).count();
                        (removed, set.is_empty())
                    }
                };
                // Redis drops a set once its last member is removed
                if now_empty {
                    data.remove(k);
                }
                RedisReply::Count(removed as u64)
            }
            RedisOp::SMembers(k) => match data.get(k) {
                None => RedisReply::Members(Vec::new()),
                Some(MockEntry::Set(set)) => RedisReply::Members(set.iter().cloned().collect()),
                Some(MockEntry::String(_)) => return Err(wrong_type()),
            },
            RedisOp::SIsMember(k, member) => match data.get(k) {
                None => RedisReply::Flag(false),
                Some(MockEntry::Set(set)) => RedisReply::Flag(set.contains(member)),
                Some(MockEntry::String(_)) => return Err(wrong_type()),
            },
            RedisOp::Del(keys) => {
                let removed = keys.iter().filter(|k| data.remove(*k).is_some()).count();
                RedisReply::Count(removed as u64)
            }
        };
        Ok(reply)
    }

    fn run(&self, op: RedisOp) -> Result<RedisReply, CustomRedisError> {
        self.check_failure(op.name())?;
        let mut data = lock(&self.data);
        Self::apply(&mut data, &op)
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        self.record("get", k.clone(), MockRedisValue::None);
        self.run(RedisOp::Get(k))?
            .into_value()?
            .ok_or(CustomRedisError::NotFound)
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        self.record("set", k.clone(), MockRedisValue::String(v.clone()));
        self.run(RedisOp::Set(k, v)).map(|_| ())
    }

    async fn sadd(&self, k: String, members: Vec<String>) -> Result<u64, CustomRedisError> {
        self.record("sadd", k.clone(), MockRedisValue::VecString(members.clone()));
        match self.run(RedisOp::SAdd(k, members))? {
            RedisReply::Count(n) => Ok(n),
            other => Err(CustomRedisError::ParseError(format!("{other:?}"))),
        }
    }

    async fn srem(&self, k: String, members: Vec<String>) -> Result<u64, CustomRedisError> {
        self.record("srem", k.clone(), MockRedisValue::VecString(members.clone()));
        match self.run(RedisOp::SRem(k, members))? {
            RedisReply::Count(n) => Ok(n),
            other => Err(CustomRedisError::ParseError(format!("{other:?}"))),
        }
    }

    async fn smembers(&self, k: String) -> Result<Vec<String>, CustomRedisError> {
        self.record("smembers", k.clone(), MockRedisValue::None);
        self.run(RedisOp::SMembers(k))?.into_members()
    }

    async fn sismember(&self, k: String, member: String) -> Result<bool, CustomRedisError> {
        self.record("sismember", k.clone(), MockRedisValue::String(member.clone()));
        match self.run(RedisOp::SIsMember(k, member))? {
            RedisReply::Flag(b) => Ok(b),
            other => Err(CustomRedisError::ParseError(format!("{other:?}"))),
        }
    }

    async fn del(&self, keys: Vec<String>) -> Result<u64, CustomRedisError> {
        self.record(
            "del",
            format!("keys={}", keys.len()),
            MockRedisValue::VecString(keys.clone()),
        );
        match self.run(RedisOp::Del(keys))? {
            RedisReply::Count(n) => Ok(n),
            other => Err(CustomRedisError::ParseError(format!("{other:?}"))),
        }
    }

    async fn atomic(&self, ops: Vec<RedisOp>) -> Result<Vec<RedisReply>, CustomRedisError> {
        self.record(
            "atomic",
            format!("ops={}", ops.len()),
            MockRedisValue::Batch(ops.clone()),
        );
        self.check_failure("atomic")?;

        // Apply to a scratch copy so a failing op leaves nothing behind.
        let mut data = lock(&self.data);
        let mut scratch = data.clone();
        let replies = ops
            .iter()
            .map(|op| Self::apply(&mut scratch, op))
            .collect::<Result<Vec<_>, _>>()?;
        *data = scratch;

        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let client = MockRedisClient::new();

        assert!(matches!(
            client.get("missing".to_string()).await,
            Err(CustomRedisError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_set_members_collapse_duplicates() {
        let client = MockRedisClient::new();
        let added = client
            .sadd(
                "s".to_string(),
                vec!["a".to_string(), "b".to_string(), "a".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(added, 2);
        assert_eq!(
            client.smembers("s".to_string()).await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(client
            .sismember("s".to_string(), "b".to_string())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_removing_last_member_drops_the_key() {
        let client = MockRedisClient::new();
        client
            .sadd("s".to_string(), vec!["a".to_string()])
            .await
            .unwrap();
        client
            .srem("s".to_string(), vec!["a".to_string()])
            .await
            .unwrap();

        assert!(client.keys().is_empty());
    }

    #[tokio::test]
    async fn test_atomic_batch_is_all_or_nothing() {
        let mut client = MockRedisClient::new();
        client.seed_string("str", "value");

        let result = client
            .atomic(vec![
                RedisOp::Set("a".to_string(), "1".to_string()),
                RedisOp::SAdd("str".to_string(), vec!["x".to_string()]),
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(client.keys(), vec!["str".to_string()]);
    }

    #[tokio::test]
    async fn test_atomic_replies_in_op_order() {
        let client = MockRedisClient::new();

        let replies = client
            .atomic(vec![
                RedisOp::Set("a".to_string(), "1".to_string()),
                RedisOp::SAdd("s".to_string(), vec![]),
                RedisOp::Get("a".to_string()),
                RedisOp::SMembers("s".to_string()),
            ])
            .await
            .unwrap();

        assert_eq!(
            replies,
            vec![
                RedisReply::Ok,
                RedisReply::Count(0),
                RedisReply::Value(Some("1".to_string())),
                RedisReply::Members(vec![]),
            ]
        );
    }

    #[tokio::test]
    async fn test_injected_failure_is_returned_and_recorded() {
        let client = MockRedisClient::new().fail_op("atomic", CustomRedisError::Timeout);

        let result = client
            .atomic(vec![RedisOp::Set("a".to_string(), "1".to_string())])
            .await;

        assert!(matches!(result, Err(CustomRedisError::Timeout)));
        assert!(client.keys().is_empty());
        assert_eq!(client.get_calls().len(), 1);
        assert_eq!(client.get_calls()[0].op, "atomic");
    }
}
