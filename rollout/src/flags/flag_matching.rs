use std::borrow::Cow;

use crate::{
    actors::ActorIdentifier, errors::FlagError, flags::flag_models::FeatureFlag,
    groups::GroupRegistry,
};

/// Size of one percentage point of the CRC-32 range.
pub const RAND_BASE: f64 = u32::MAX as f64 / 100.0;

/// Key fed to the checksum. Salting appends the flag name so buckets differ per flag.
pub fn bucketing_key<'a>(actor_id: &'a str, flag_name: &str, salted: bool) -> Cow<'a, str> {
    if salted {
        Cow::Owned(format!("{actor_id}{flag_name}"))
    } else {
        Cow::Borrowed(actor_id)
    }
}

/// Deterministic percentage membership.
///
/// True iff the CRC-32 (IEEE) of the bucketing key is strictly below
/// `percentage * RAND_BASE`. Stable across processes and releases, changing
/// it reshuffles every rollout.
pub fn in_percentage(actor_id: &str, flag_name: &str, percentage: f64, salted: bool) -> bool {
    let checksum = crc32fast::hash(bucketing_key(actor_id, flag_name, salted).as_bytes());
    f64::from(checksum) < percentage * RAND_BASE
}

impl FeatureFlag {
    pub fn user_in_percentage(&self, actor_id: &str, salted: bool) -> bool {
        in_percentage(actor_id, &self.name, self.percentage, salted)
    }

    pub fn user_in_active_users(&self, actor_id: &str) -> bool {
        self.users.contains(actor_id)
    }

    pub fn user_in_active_group<A: ?Sized>(&self, actor: &A, groups: &GroupRegistry<A>) -> bool {
        self.groups
            .iter()
            .any(|group| groups.active_in_group(group, actor))
    }

    /// Evaluates this snapshot for `actor` without touching redis.
    ///
    /// A 100% flag is active before the actor is even looked at. Otherwise an
    /// actor is required and must have an id.
    pub fn is_active_for<A: ?Sized>(
        &self,
        actor: Option<&A>,
        identifier: &dyn ActorIdentifier<A>,
        groups: &GroupRegistry<A>,
        salted: bool,
    ) -> Result<bool, FlagError> {
        if self.is_fully_rolled_out() {
            return Ok(true);
        }
        let Some(actor) = actor else {
            return Ok(false);
        };
        let id = identifier
            .actor_id(actor)
            .ok_or(FlagError::ActorIdUnavailable)?;

        Ok(self.user_in_percentage(&id, salted)
            || self.user_in_active_users(&id)
            || self.user_in_active_group(actor, groups))
    }
}
