use std::sync::Arc;

use anyhow::Result;
use common_redis::MockRedisClient;

use rollout::config::RolloutOptions;
use rollout::errors::FlagError;
use rollout::flags::flag_service::Rollout;

struct Account {
    uuid: Option<String>,
    plan: &'static str,
}

impl Account {
    fn new(uuid: &str, plan: &'static str) -> Self {
        Self {
            uuid: Some(uuid.to_string()),
            plan,
        }
    }

    fn anonymous() -> Self {
        Self {
            uuid: None,
            plan: "free",
        }
    }
}

fn setup_accounts() -> (MockRedisClient, Rollout<Account>) {
    let client = MockRedisClient::new();
    let mut rollout: Rollout<Account> = Rollout::with_identifier(
        Arc::new(client.clone()),
        RolloutOptions::default(),
        |account: &Account| account.uuid.clone(),
    );
    rollout.define_group("paying", |account: &Account| account.plan != "free");
    (client, rollout)
}

#[tokio::test]
async fn it_buckets_on_the_derived_id() -> Result<()> {
    let (_, rollout) = setup_accounts();

    rollout.activate_percentage("checkout_v2", 10.0).await?;

    let early = Account::new("user-241", "free");
    let late = Account::new("user-42", "free");
    assert!(rollout.is_active("checkout_v2", Some(&early)).await?);
    assert!(!rollout.is_active("checkout_v2", Some(&late)).await?);
    Ok(())
}

#[tokio::test]
async fn it_evaluates_groups_on_the_whole_actor() -> Result<()> {
    let (_, rollout) = setup_accounts();

    rollout.activate_group("exports", "paying").await?;

    let paying = Account::new("other-1", "team");
    let free = Account::new("beta-7", "free");
    assert!(rollout.is_active("exports", Some(&paying)).await?);
    assert!(!rollout.is_active("exports", Some(&free)).await?);
    Ok(())
}

#[tokio::test]
async fn it_stores_allow_listed_accounts_by_id() -> Result<()> {
    let (client, rollout) = setup_accounts();
    let account = Account::new("acct-9", "free");

    rollout.activate_user("exports", &account).await?;

    assert_eq!(rollout.get("exports").await?.snapshot().users, vec!["acct-9"]);
    assert!(rollout.user_in_active_users("exports", Some(&account)).await?);
    assert!(client
        .keys()
        .contains(&"feature:exports:users".to_string()));
    Ok(())
}

#[tokio::test]
async fn it_activates_fully_rolled_out_flags_without_an_id() -> Result<()> {
    let (_, rollout) = setup_accounts();
    let anonymous = Account::anonymous();

    rollout.activate("everyone").await?;

    assert!(rollout.is_active("everyone", Some(&anonymous)).await?);
    Ok(())
}

#[tokio::test]
async fn it_rejects_actors_without_an_id_below_full_rollout() -> Result<()> {
    let (_, rollout) = setup_accounts();
    let anonymous = Account::anonymous();

    rollout.activate_percentage("checkout_v2", 50.0).await?;

    let result = rollout.is_active("checkout_v2", Some(&anonymous)).await;
    assert!(matches!(result, Err(FlagError::ActorIdUnavailable)));

    let result = rollout.activate_user("checkout_v2", &anonymous).await;
    assert!(matches!(result, Err(FlagError::ActorIdUnavailable)));
    Ok(())
}

#[tokio::test]
async fn it_writes_nothing_when_one_actor_in_a_batch_has_no_id() -> Result<()> {
    let (_, rollout) = setup_accounts();
    let known = Account::new("acct-1", "team");
    let anonymous = Account::anonymous();

    let result = rollout
        .activate_users("exports", &[&known, &anonymous])
        .await;

    assert!(matches!(result, Err(FlagError::ActorIdUnavailable)));
    assert!(rollout.features().await?.is_empty());
    Ok(())
}
