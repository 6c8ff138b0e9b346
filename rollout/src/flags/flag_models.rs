use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

pub const FULL_ROLLOUT_PERCENTAGE: f64 = 100.0;

/// Attribute values of one flag exactly as read from redis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFeature {
    pub percentage: Option<String>,
    pub users: Vec<String>,
    pub groups: Vec<String>,
    pub data: Option<String>,
}

/// In-memory view of a flag's persisted state.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFlag {
    pub name: String,
    pub percentage: f64,
    pub users: HashSet<String>,
    pub groups: HashSet<String>,
    pub data: Map<String, Value>,
}

/// Serializable, deterministic summary of a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagSnapshot {
    pub name: String,
    pub percentage: f64,
    pub users: Vec<String>,
    pub groups: Vec<String>,
    pub data: Map<String, Value>,
}

impl FeatureFlag {
    /// A flag with no persisted state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            percentage: 0.0,
            users: HashSet::new(),
            groups: HashSet::new(),
            data: Map::new(),
        }
    }

    pub fn from_raw(name: impl Into<String>, raw: RawFeature) -> Self {
        let name = name.into();
        let percentage = parse_percentage(&name, raw.percentage.as_deref());
        let data = parse_data(&name, raw.data.as_deref());
        Self {
            name,
            percentage,
            users: raw.users.into_iter().collect(),
            groups: raw.groups.into_iter().collect(),
            data,
        }
    }

    pub fn is_fully_rolled_out(&self) -> bool {
        self.percentage == FULL_ROLLOUT_PERCENTAGE
    }

    pub fn snapshot(&self) -> FlagSnapshot {
        let mut users: Vec<String> = self.users.iter().cloned().collect();
        users.sort();
        let mut groups: Vec<String> = self.groups.iter().cloned().collect();
        groups.sort();
        FlagSnapshot {
            name: self.name.clone(),
            percentage: self.percentage,
            users,
            groups,
            data: self.data.clone(),
        }
    }
}

/// Missing or unparsable percentages read as 0 so a damaged flag stays off.
pub fn parse_percentage(flag: &str, raw: Option<&str>) -> f64 {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return 0.0;
    };
    match raw.parse::<f64>() {
        Ok(p) if p.is_finite() => p,
        _ => {
            tracing::warn!(flag = %flag, raw = %raw, "unparsable percentage, treating as 0");
            0.0
        }
    }
}

/// Missing, blank, unparsable or non-object metadata reads as an empty map.
pub fn parse_data(flag: &str, raw: Option<&str>) -> Map<String, Value> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Map::new();
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::warn!(flag = %flag, "flag data is not a JSON object, ignoring");
            Map::new()
        }
        Err(e) => {
            tracing::warn!(flag = %flag, error = %e, "unparsable flag data, ignoring");
            Map::new()
        }
    }
}

/// Formats a percentage the way it is written to redis ("100", "12.5").
pub fn format_percentage(percentage: f64) -> String {
    percentage.to_string()
}
