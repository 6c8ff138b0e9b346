use common_redis::{Client as RedisClient, CustomRedisError, RedisOp, RedisReply};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::instrument;

use crate::{
    errors::FlagError,
    flags::flag_models::{format_percentage, parse_data, FeatureFlag, RawFeature},
};

pub const FEATURES_KEY: &str = "__features__";
pub const KEY_PERCENTAGE: &str = "percentage";
pub const KEY_USERS: &str = "users";
pub const KEY_GROUPS: &str = "groups";
pub const KEY_DATA: &str = "data";
pub const SUBKEYS: [&str; 4] = [KEY_PERCENTAGE, KEY_USERS, KEY_GROUPS, KEY_DATA];

/// Redis layout for flags and the flag catalog.
///
/// Catalog: set at `{prefix}:__features__`. Per flag: `{prefix}:{name}:percentage`
/// (decimal string), `:users` and `:groups` (sets), `:data` (JSON object string).
///
/// Every write touching a flag's attributes also adds the flag to the catalog
/// in the same MULTI/EXEC batch, and `delete_feature` drops both together.
pub struct FeatureStorage {
    client: Arc<dyn RedisClient + Send + Sync>,
    prefix: String,
}

impl FeatureStorage {
    pub fn new(client: Arc<dyn RedisClient + Send + Sync>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    pub fn features_key(&self) -> String {
        format!("{}:{}", self.prefix, FEATURES_KEY)
    }

    pub fn key(&self, name: &str, attribute: &str) -> String {
        format!("{}:{}:{}", self.prefix, name, attribute)
    }

    fn subkeys(&self, name: &str) -> Vec<String> {
        SUBKEYS.iter().map(|s| self.key(name, s)).collect()
    }

    fn register(&self, name: &str) -> RedisOp {
        RedisOp::SAdd(self.features_key(), vec![name.to_string()])
    }

    async fn atomic(&self, ops: Vec<RedisOp>) -> Result<Vec<RedisReply>, FlagError> {
        Ok(self.client.atomic(ops).await?)
    }

    /// Flag names in the catalog, sorted.
    pub async fn all(&self) -> Result<Vec<String>, FlagError> {
        let mut names = self.client.smembers(self.features_key()).await?;
        names.sort();
        Ok(names)
    }

    fn read_ops(&self, name: &str) -> [RedisOp; 4] {
        [
            RedisOp::Get(self.key(name, KEY_PERCENTAGE)),
            RedisOp::SMembers(self.key(name, KEY_USERS)),
            RedisOp::SMembers(self.key(name, KEY_GROUPS)),
            RedisOp::Get(self.key(name, KEY_DATA)),
        ]
    }

    fn raw_from_replies(
        replies: &mut impl Iterator<Item = RedisReply>,
    ) -> Result<RawFeature, FlagError> {
        let mut next = || {
            replies.next().ok_or_else(|| {
                FlagError::RedisDataParsingError("short reply to flag read".to_string())
            })
        };
        Ok(RawFeature {
            percentage: next()?.into_value()?,
            users: next()?.into_members()?,
            groups: next()?.into_members()?,
            data: next()?.into_value()?,
        })
    }

    /// Reads all four attributes in one transaction. Absent flags come back
    /// as the default state and are not added to the catalog.
    #[instrument(skip_all, fields(flag = %name))]
    pub async fn fetch_feature(&self, name: &str) -> Result<FeatureFlag, FlagError> {
        let replies = self.atomic(self.read_ops(name).to_vec()).await?;
        let raw = Self::raw_from_replies(&mut replies.into_iter())?;
        Ok(FeatureFlag::from_raw(name, raw))
    }

    /// Reads several flags in one transaction, preserving input order.
    #[instrument(skip_all, fields(count = names.len()))]
    pub async fn fetch_multi_features(
        &self,
        names: &[String],
    ) -> Result<Vec<FeatureFlag>, FlagError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let ops = names.iter().flat_map(|name| self.read_ops(name)).collect();
        let mut replies = self.atomic(ops).await?.into_iter();
        names
            .iter()
            .map(|name| -> Result<FeatureFlag, FlagError> {
                Ok(FeatureFlag::from_raw(
                    name,
                    Self::raw_from_replies(&mut replies)?,
                ))
            })
            .collect()
    }

    pub async fn set_percentage(&self, name: &str, percentage: f64) -> Result<(), FlagError> {
        self.atomic(vec![
            RedisOp::Set(
                self.key(name, KEY_PERCENTAGE),
                format_percentage(percentage),
            ),
            self.register(name),
        ])
        .await?;
        Ok(())
    }

    pub async fn activate_group(&self, name: &str, group: &str) -> Result<(), FlagError> {
        self.atomic(vec![
            RedisOp::SAdd(self.key(name, KEY_GROUPS), vec![group.to_string()]),
            self.register(name),
        ])
        .await?;
        Ok(())
    }

    pub async fn deactivate_group(&self, name: &str, group: &str) -> Result<(), FlagError> {
        self.atomic(vec![
            RedisOp::SRem(self.key(name, KEY_GROUPS), vec![group.to_string()]),
            self.register(name),
        ])
        .await?;
        Ok(())
    }

    pub async fn activate_users(&self, name: &str, user_ids: Vec<String>) -> Result<(), FlagError> {
        self.atomic(vec![
            RedisOp::SAdd(self.key(name, KEY_USERS), user_ids),
            self.register(name),
        ])
        .await?;
        Ok(())
    }

    pub async fn deactivate_users(
        &self,
        name: &str,
        user_ids: Vec<String>,
    ) -> Result<(), FlagError> {
        self.atomic(vec![
            RedisOp::SRem(self.key(name, KEY_USERS), user_ids),
            self.register(name),
        ])
        .await?;
        Ok(())
    }

    pub async fn user_in_active_users(&self, name: &str, user_id: &str) -> Result<bool, FlagError> {
        Ok(self
            .client
            .sismember(self.key(name, KEY_USERS), user_id.to_string())
            .await?)
    }

    /// Drops every attribute key and the catalog entry.
    #[instrument(skip_all, fields(flag = %name))]
    pub async fn delete_feature(&self, name: &str) -> Result<(), FlagError> {
        self.atomic(vec![
            RedisOp::SRem(self.features_key(), vec![name.to_string()]),
            RedisOp::Del(self.subkeys(name)),
        ])
        .await?;
        Ok(())
    }

    /// Resets a flag to the default state (metadata included) but keeps it cataloged.
    #[instrument(skip_all, fields(flag = %name))]
    pub async fn deactivate_feature(&self, name: &str) -> Result<(), FlagError> {
        self.atomic(vec![RedisOp::Del(self.subkeys(name)), self.register(name)])
            .await?;
        Ok(())
    }

    pub async fn get_feature_data(&self, name: &str) -> Result<Map<String, Value>, FlagError> {
        let raw = match self.client.get(self.key(name, KEY_DATA)).await {
            Ok(raw) => Some(raw),
            Err(CustomRedisError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(parse_data(name, raw.as_deref()))
    }

    /// Shallow-merges `data` into the stored metadata. Returns false, without
    /// writing, when `data` is not a JSON object.
    ///
    /// The read and the write are separate round trips: concurrent merges on
    /// the same flag race and the last batch to commit wins.
    #[instrument(skip_all, fields(flag = %name))]
    pub async fn set_feature_data(&self, name: &str, data: Value) -> Result<bool, FlagError> {
        let Value::Object(incoming) = data else {
            tracing::debug!("ignoring non-object flag data");
            return Ok(false);
        };
        let mut merged = self.get_feature_data(name).await?;
        merged.extend(incoming);
        let serialized = Value::Object(merged).to_string();

        self.atomic(vec![
            RedisOp::Set(self.key(name, KEY_DATA), serialized),
            self.register(name),
        ])
        .await?;
        Ok(true)
    }

    pub async fn clear_feature_data(&self, name: &str) -> Result<(), FlagError> {
        self.atomic(vec![
            RedisOp::Set(self.key(name, KEY_DATA), "{}".to_string()),
            self.register(name),
        ])
        .await?;
        Ok(())
    }

    /// Deletes the catalog and the attribute keys of every cataloged flag.
    #[instrument(skip_all)]
    pub async fn clear(&self) -> Result<(), FlagError> {
        let names = self.all().await?;
        let mut keys = vec![self.features_key()];
        keys.extend(names.iter().flat_map(|name| self.subkeys(name)));
        tracing::info!(flags = names.len(), "clearing all flags");
        self.client.del(keys).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_redis::MockRedisClient;
    use serde_json::json;

    fn storage() -> (MockRedisClient, FeatureStorage) {
        let client = MockRedisClient::new();
        let storage = FeatureStorage::new(Arc::new(client.clone()), "feature");
        (client, storage)
    }

    #[test]
    fn test_key_layout() {
        let (_, storage) = storage();

        assert_eq!(storage.features_key(), "feature:__features__");
        assert_eq!(
            storage.key("checkout_v2", KEY_PERCENTAGE),
            "feature:checkout_v2:percentage"
        );
        assert_eq!(
            storage.subkeys("x"),
            vec![
                "feature:x:percentage",
                "feature:x:users",
                "feature:x:groups",
                "feature:x:data",
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_absent_flag_does_not_catalog_it() {
        let (client, storage) = storage();

        let flag = storage.fetch_feature("ghost").await.unwrap();

        assert_eq!(flag, FeatureFlag::new("ghost"));
        assert!(client.keys().is_empty());
        assert!(storage.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_write_is_one_batch_with_the_catalog() {
        let (client, storage) = storage();

        storage.set_percentage("f", 25.0).await.unwrap();
        storage
            .activate_users("f", vec!["u1".to_string()])
            .await
            .unwrap();
        storage.activate_group("f", "beta").await.unwrap();
        storage
            .set_feature_data("f", json!({"a": 1}))
            .await
            .unwrap();

        let batches: Vec<_> = client
            .get_calls()
            .into_iter()
            .filter(|c| c.op == "atomic")
            .collect();
        assert_eq!(batches.len(), 4);
        for call in batches {
            match call.value {
                common_redis::MockRedisValue::Batch(ops) => assert!(ops.contains(&RedisOp::SAdd(
                    "feature:__features__".to_string(),
                    vec!["f".to_string()]
                ))),
                other => panic!("unexpected call value {other:?}"),
            }
        }
        assert_eq!(storage.all().await.unwrap(), vec!["f"]);
    }

    #[tokio::test]
    async fn test_deactivate_keeps_catalog_entry_and_clears_attributes() {
        let (client, storage) = storage();
        storage.set_percentage("f", 25.0).await.unwrap();
        storage
            .set_feature_data("f", json!({"a": 1}))
            .await
            .unwrap();

        storage.deactivate_feature("f").await.unwrap();

        assert_eq!(client.keys(), vec!["feature:__features__"]);
        assert_eq!(storage.fetch_feature("f").await.unwrap(), FeatureFlag::new("f"));
    }

    #[tokio::test]
    async fn test_delete_removes_everything_and_is_idempotent() {
        let (client, storage) = storage();
        storage.set_percentage("f", 25.0).await.unwrap();
        storage.set_percentage("g", 5.0).await.unwrap();

        storage.delete_feature("f").await.unwrap();
        storage.delete_feature("f").await.unwrap();
        storage.delete_feature("never-existed").await.unwrap();

        assert_eq!(storage.all().await.unwrap(), vec!["g"]);
        assert_eq!(
            client.keys(),
            vec!["feature:__features__", "feature:g:percentage"]
        );
    }

    #[tokio::test]
    async fn test_set_feature_data_merges_and_ignores_non_objects() {
        let (client, storage) = storage();

        assert!(storage
            .set_feature_data("f", json!({"a": 1, "b": 1}))
            .await
            .unwrap());
        assert!(storage
            .set_feature_data("f", json!({"b": 2, "c": 3}))
            .await
            .unwrap());

        client.reset_calls();
        assert!(!storage.set_feature_data("f", json!([1, 2])).await.unwrap());
        assert!(!storage.set_feature_data("f", json!("x")).await.unwrap());
        assert!(client.get_calls().is_empty());

        assert_eq!(
            Value::Object(storage.get_feature_data("f").await.unwrap()),
            json!({"a": 1, "b": 2, "c": 3})
        );
    }

    #[tokio::test]
    async fn test_corrupt_data_reads_as_empty_and_is_replaced_on_merge() {
        let (mut client, storage) = storage();
        client.seed_string("feature:f:data", "{not json");
        client.seed_string("feature:f:percentage", "lots");

        let flag = storage.fetch_feature("f").await.unwrap();
        assert_eq!(flag.percentage, 0.0);
        assert!(flag.data.is_empty());

        storage
            .set_feature_data("f", json!({"fixed": true}))
            .await
            .unwrap();
        assert_eq!(
            Value::Object(storage.get_feature_data("f").await.unwrap()),
            json!({"fixed": true})
        );
    }

    #[tokio::test]
    async fn test_fetch_multi_preserves_order() {
        let (_, storage) = storage();
        storage.set_percentage("a", 10.0).await.unwrap();
        storage.set_percentage("c", 30.0).await.unwrap();

        let flags = storage
            .fetch_multi_features(&["c".to_string(), "b".to_string(), "a".to_string()])
            .await
            .unwrap();

        let summary: Vec<(&str, f64)> = flags
            .iter()
            .map(|f| (f.name.as_str(), f.percentage))
            .collect();
        assert_eq!(summary, vec![("c", 30.0), ("b", 0.0), ("a", 10.0)]);
    }

    #[tokio::test]
    async fn test_clear_removes_all_flag_keys() {
        let (client, storage) = storage();
        storage.set_percentage("a", 10.0).await.unwrap();
        storage
            .activate_users("b", vec!["u".to_string()])
            .await
            .unwrap();
        storage.clear_feature_data("c").await.unwrap();

        storage.clear().await.unwrap();

        assert!(client.keys().is_empty());
        assert!(storage.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failures_propagate() {
        let (mut client, storage) = storage();
        client.fail_op("atomic", CustomRedisError::Timeout);

        assert!(matches!(
            storage.fetch_feature("f").await,
            Err(FlagError::TimeoutError)
        ));
        assert!(matches!(
            storage.set_percentage("f", 1.0).await,
            Err(FlagError::TimeoutError)
        ));
    }
}
