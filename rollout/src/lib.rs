pub mod actors;
pub mod config;
pub mod errors;
pub mod flags;
pub mod groups;
pub mod metrics_consts;

// Shared with the integration tests under tests/, so not gated on cfg(test).
pub mod test_utils;

pub use actors::{ActorIdentifier, PrimitiveActor, PrimitiveId};
pub use config::{Config, RolloutOptions};
pub use errors::FlagError;
pub use flags::flag_models::{FeatureFlag, FlagSnapshot};
pub use flags::flag_service::Rollout;
pub use groups::{GroupPredicate, GroupRegistry};
