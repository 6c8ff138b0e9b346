use common_redis::Client as RedisClient;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use crate::{
    actors::{ActorIdentifier, PrimitiveActor, PrimitiveId},
    config::RolloutOptions,
    errors::FlagError,
    flags::{
        flag_models::{FeatureFlag, FULL_ROLLOUT_PERCENTAGE},
        flag_storage::FeatureStorage,
    },
    groups::{GroupPredicate, GroupRegistry},
    metrics_consts::{FLAG_EVALUATIONS_COUNTER, FLAG_MUTATIONS_COUNTER},
};

/// Decision engine: answers "is flag X on for actor Y" and applies flag mutations.
///
/// Holds no lock around redis. Each mutation is one MULTI/EXEC batch, so
/// readers never see half of it, but two writers on the same flag can
/// interleave and the later batch wins.
pub struct Rollout<A: ?Sized> {
    storage: FeatureStorage,
    identifier: Arc<dyn ActorIdentifier<A>>,
    groups: GroupRegistry<A>,
    options: RolloutOptions,
}

impl<A: PrimitiveActor + ?Sized> Rollout<A> {
    /// Engine for actors that are their own id (strings, integers).
    pub fn new(client: Arc<dyn RedisClient + Send + Sync>, options: RolloutOptions) -> Self {
        Self::with_identifier(client, options, PrimitiveId)
    }
}

impl<A: ?Sized> Rollout<A> {
    /// Engine for structured actors, `identifier` derives the id used for
    /// bucketing and the user allow-list.
    pub fn with_identifier<I>(
        client: Arc<dyn RedisClient + Send + Sync>,
        options: RolloutOptions,
        identifier: I,
    ) -> Self
    where
        I: ActorIdentifier<A> + 'static,
    {
        Self {
            storage: FeatureStorage::new(client, options.key_prefix.clone()),
            identifier: Arc::new(identifier),
            groups: GroupRegistry::new(),
            options,
        }
    }

    pub fn options(&self) -> &RolloutOptions {
        &self.options
    }

    pub fn groups(&self) -> &GroupRegistry<A> {
        &self.groups
    }

    fn actor_id(&self, actor: &A) -> Result<String, FlagError> {
        self.identifier
            .actor_id(actor)
            .ok_or(FlagError::ActorIdUnavailable)
    }

    fn actor_ids(&self, actors: &[&A]) -> Result<Vec<String>, FlagError> {
        actors.iter().map(|actor| self.actor_id(actor)).collect()
    }

    fn record_mutation(op: &'static str, name: &str) {
        tracing::info!(flag = %name, op, "flag updated");
        metrics::counter!(FLAG_MUTATIONS_COUNTER, "op" => op).increment(1);
    }

    /// Turns the flag on for everyone.
    pub async fn activate(&self, name: &str) -> Result<(), FlagError> {
        self.storage
            .set_percentage(name, FULL_ROLLOUT_PERCENTAGE)
            .await?;
        Self::record_mutation("activate", name);
        Ok(())
    }

    /// Resets percentage, users, groups and data. The flag stays in the catalog.
    pub async fn deactivate(&self, name: &str) -> Result<(), FlagError> {
        self.storage.deactivate_feature(name).await?;
        Self::record_mutation("deactivate", name);
        Ok(())
    }

    /// Removes the flag and its catalog entry. Unknown flags are a no-op.
    pub async fn delete(&self, name: &str) -> Result<(), FlagError> {
        self.storage.delete_feature(name).await?;
        Self::record_mutation("delete", name);
        Ok(())
    }

    pub async fn set(&self, name: &str, desired_state: bool) -> Result<(), FlagError> {
        if desired_state {
            self.activate(name).await
        } else {
            self.deactivate(name).await
        }
    }

    /// Group names are not checked against the registry.
    pub async fn activate_group(&self, name: &str, group: &str) -> Result<(), FlagError> {
        self.storage.activate_group(name, group).await?;
        Self::record_mutation("activate_group", name);
        Ok(())
    }

    pub async fn deactivate_group(&self, name: &str, group: &str) -> Result<(), FlagError> {
        self.storage.deactivate_group(name, group).await?;
        Self::record_mutation("deactivate_group", name);
        Ok(())
    }

    pub async fn activate_user(&self, name: &str, actor: &A) -> Result<(), FlagError> {
        self.activate_users(name, &[actor]).await
    }

    pub async fn deactivate_user(&self, name: &str, actor: &A) -> Result<(), FlagError> {
        self.deactivate_users(name, &[actor]).await
    }

    /// All ids are derived before anything is written, one bad actor fails the whole call.
    pub async fn activate_users(&self, name: &str, actors: &[&A]) -> Result<(), FlagError> {
        let ids = self.actor_ids(actors)?;
        self.storage.activate_users(name, ids).await?;
        Self::record_mutation("activate_users", name);
        Ok(())
    }

    pub async fn deactivate_users(&self, name: &str, actors: &[&A]) -> Result<(), FlagError> {
        let ids = self.actor_ids(actors)?;
        self.storage.deactivate_users(name, ids).await?;
        Self::record_mutation("deactivate_users", name);
        Ok(())
    }

    /// Registers (or replaces) a group predicate for this engine.
    pub fn define_group<P>(&mut self, group: impl Into<String>, predicate: P)
    where
        P: GroupPredicate<A> + 'static,
    {
        self.groups.define(group, predicate);
    }

    pub async fn activate_percentage(&self, name: &str, percentage: f64) -> Result<(), FlagError> {
        self.storage.set_percentage(name, percentage).await?;
        Self::record_mutation("activate_percentage", name);
        Ok(())
    }

    pub async fn deactivate_percentage(&self, name: &str) -> Result<(), FlagError> {
        self.storage.set_percentage(name, 0.0).await?;
        Self::record_mutation("deactivate_percentage", name);
        Ok(())
    }

    fn evaluate(&self, flag: &FeatureFlag, actor: Option<&A>) -> Result<bool, FlagError> {
        let active = flag.is_active_for(
            actor,
            self.identifier.as_ref(),
            &self.groups,
            self.options.randomize_percentage,
        )?;
        metrics::counter!(
            FLAG_EVALUATIONS_COUNTER,
            "result" => if active { "active" } else { "inactive" }
        )
        .increment(1);
        Ok(active)
    }

    #[instrument(skip_all, fields(flag = %name))]
    pub async fn is_active(&self, name: &str, actor: Option<&A>) -> Result<bool, FlagError> {
        let flag = self.get(name).await?;
        self.evaluate(&flag, actor)
    }

    pub async fn is_inactive(&self, name: &str, actor: Option<&A>) -> Result<bool, FlagError> {
        Ok(!self.is_active(name, actor).await?)
    }

    /// Only the explicit allow-list, percentage and groups are not consulted.
    pub async fn user_in_active_users(
        &self,
        name: &str,
        actor: Option<&A>,
    ) -> Result<bool, FlagError> {
        let Some(actor) = actor else {
            return Ok(false);
        };
        let id = self.actor_id(actor)?;
        self.storage.user_in_active_users(name, &id).await
    }

    pub fn active_in_group(&self, group: &str, actor: &A) -> bool {
        self.groups.active_in_group(group, actor)
    }

    /// Current state of a flag, the default state if it was never written.
    pub async fn get(&self, name: &str) -> Result<FeatureFlag, FlagError> {
        self.storage.fetch_feature(name).await
    }

    pub async fn multi_get(&self, names: &[String]) -> Result<Vec<FeatureFlag>, FlagError> {
        self.storage.fetch_multi_features(names).await
    }

    /// Shallow-merges a JSON object into the flag's metadata. Anything that is
    /// not an object is ignored.
    pub async fn set_feature_data(&self, name: &str, data: Value) -> Result<(), FlagError> {
        if self.storage.set_feature_data(name, data).await? {
            Self::record_mutation("set_feature_data", name);
        }
        Ok(())
    }

    pub async fn clear_feature_data(&self, name: &str) -> Result<(), FlagError> {
        self.storage.clear_feature_data(name).await?;
        Self::record_mutation("clear_feature_data", name);
        Ok(())
    }

    /// Cataloged flag names, sorted.
    pub async fn features(&self) -> Result<Vec<String>, FlagError> {
        self.storage.all().await
    }

    /// Activation of every cataloged flag for `actor`, read in a single batch.
    #[instrument(skip_all)]
    pub async fn feature_states(
        &self,
        actor: Option<&A>,
    ) -> Result<BTreeMap<String, bool>, FlagError> {
        let names = self.features().await?;
        let flags = self.multi_get(&names).await?;
        flags
            .into_iter()
            .map(|flag| -> Result<(String, bool), FlagError> {
                let active = self.evaluate(&flag, actor)?;
                Ok((flag.name, active))
            })
            .collect()
    }

    pub async fn active_features(&self, actor: Option<&A>) -> Result<Vec<String>, FlagError> {
        Ok(self
            .feature_states(actor)
            .await?
            .into_iter()
            .filter_map(|(name, active)| active.then_some(name))
            .collect())
    }

    /// Deletes every cataloged flag and the catalog itself.
    pub async fn clear(&self) -> Result<(), FlagError> {
        self.storage.clear().await?;
        Self::record_mutation("clear", "*");
        Ok(())
    }
}
