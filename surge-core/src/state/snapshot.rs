//! Snapshots of proxy state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StateError;

/// How snapshots deep-copy state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneStrategy {
    /// Deep `Value` clone. Infallible.
    #[default]
    Structural,
    /// Round trip through MessagePack. Anything that does not survive the
    /// encoding surfaces as [`StateError::Snapshot`].
    Serialized,
}

impl CloneStrategy {
    pub fn snapshot(&self, value: &Value) -> Result<Snapshot, StateError> {
        match self {
            CloneStrategy::Structural => Ok(Snapshot(value.clone())),
            CloneStrategy::Serialized => {
                let bytes =
                    rmp_serde::to_vec(value).map_err(|e| StateError::Snapshot(e.to_string()))?;
                let copy =
                    rmp_serde::from_slice(&bytes).map_err(|e| StateError::Snapshot(e.to_string()))?;
                Ok(Snapshot(copy))
            }
        }
    }
}

/// An immutable deep copy of proxy state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot(Value);

impl Snapshot {
    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "name": "ada",
            "count": -3,
            "ratio": 0.25,
            "tags": ["x", null, true],
            "nested": {"deep": {"n": 18446744073709551615u64}}
        })
    }

    #[test]
    fn both_strategies_produce_equal_copies() {
        let state = sample();
        for strategy in [CloneStrategy::Structural, CloneStrategy::Serialized] {
            let snapshot = strategy.snapshot(&state).unwrap();
            assert_eq!(snapshot.value(), &state, "{strategy:?}");
        }
    }

    #[test]
    fn snapshots_are_detached_from_the_source() {
        let mut state = sample();
        let snapshot = CloneStrategy::Serialized.snapshot(&state).unwrap();
        state["name"] = json!("grace");
        assert_eq!(snapshot.into_value()["name"], json!("ada"));
    }
}
