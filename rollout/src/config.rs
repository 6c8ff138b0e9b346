use envconfig::Envconfig;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    // 0 disables the timeout
    #[envconfig(from = "REDIS_RESPONSE_TIMEOUT_MS", default = "100")]
    pub redis_response_timeout_ms: u64,

    #[envconfig(from = "REDIS_CONNECTION_TIMEOUT_MS", default = "5000")]
    pub redis_connection_timeout_ms: u64,

    // Changing this on a live store orphans every existing flag.
    #[envconfig(from = "ROLLOUT_KEY_PREFIX", default = "feature")]
    pub key_prefix: String,

    #[envconfig(from = "ROLLOUT_RANDOMIZE_PERCENTAGE", default = "false")]
    pub randomize_percentage: FlexBool,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            redis_url: "redis://localhost:6379/".to_string(),
            redis_response_timeout_ms: 100,
            redis_connection_timeout_ms: 5000,
            key_prefix: "feature".to_string(),
            randomize_percentage: FlexBool(false),
            debug: FlexBool(false),
        }
    }

    pub fn redis_response_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.redis_response_timeout_ms)
    }

    pub fn redis_connection_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.redis_connection_timeout_ms)
    }

    pub fn options(&self) -> RolloutOptions {
        RolloutOptions {
            key_prefix: self.key_prefix.clone(),
            randomize_percentage: *self.randomize_percentage,
        }
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Engine behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutOptions {
    /// Prefix of every key the engine reads or writes.
    pub key_prefix: String,
    /// Mix the flag name into the bucketing key so an actor lands in a
    /// different bucket for each flag.
    pub randomize_percentage: bool,
}

impl Default for RolloutOptions {
    fn default() -> Self {
        Self {
            key_prefix: "feature".to_string(),
            randomize_percentage: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.redis_url, "redis://localhost:6379/");
        assert_eq!(config.key_prefix, "feature");
        assert!(!*config.randomize_percentage);
        assert!(!*config.debug);
        assert_eq!(
            config.redis_response_timeout(),
            Some(Duration::from_millis(100))
        );
        assert_eq!(config.options(), RolloutOptions::default());
    }

    #[test]
    fn test_config_from_env_map() {
        let env = HashMap::from([
            ("ROLLOUT_KEY_PREFIX".to_string(), "flags".to_string()),
            ("ROLLOUT_RANDOMIZE_PERCENTAGE".to_string(), "yes".to_string()),
            ("REDIS_RESPONSE_TIMEOUT_MS".to_string(), "0".to_string()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.redis_response_timeout(), None);
        assert_eq!(
            config.options(),
            RolloutOptions {
                key_prefix: "flags".to_string(),
                randomize_percentage: true,
            }
        );
    }

    #[test]
    fn test_flex_bool_parsing() {
        for value in ["true", "1", "YES", " on "] {
            assert_eq!(FlexBool::from_str(value), Ok(FlexBool(true)));
        }
        for value in ["false", "0", "no", "off", ""] {
            assert_eq!(FlexBool::from_str(value), Ok(FlexBool(false)));
        }
        assert!(FlexBool::from_str("maybe").is_err());
    }
}
