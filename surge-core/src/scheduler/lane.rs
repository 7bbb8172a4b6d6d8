//! Priority lanes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Priority lanes, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Direct responses to user input.
    Input,
    /// Rendering and visual updates.
    Animation,
    /// Handling of network results.
    Network,
    /// Anything that can wait.
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown priority '{0}'")]
pub struct UnknownPriority(pub String);

impl Priority {
    /// Every lane, in service order.
    pub const ALL: [Priority; 4] = [
        Priority::Input,
        Priority::Animation,
        Priority::Network,
        Priority::Idle,
    ];

    /// Lane used for unrecognized priority names.
    pub const DEFAULT: Priority = Priority::Idle;

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Input => "input",
            Priority::Animation => "animation",
            Priority::Network => "network",
            Priority::Idle => "idle",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Priority::Input => 0,
            Priority::Animation => 1,
            Priority::Network => 2,
            Priority::Idle => 3,
        }
    }

    /// Parse a lane name, falling back to [`Priority::DEFAULT`].
    pub fn parse_or_default(name: &str) -> Priority {
        name.parse().unwrap_or_else(|err: UnknownPriority| {
            warn!(error = %err, fallback = Priority::DEFAULT.as_str(), "using default lane");
            Priority::DEFAULT
        })
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl FromStr for Priority {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownPriority(s.to_string()))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_are_ordered_by_priority() {
        assert!(Priority::Input < Priority::Animation);
        assert!(Priority::Animation < Priority::Network);
        assert!(Priority::Network < Priority::Idle);
        let indices: Vec<_> = Priority::ALL.iter().map(|p| p.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("input".parse::<Priority>(), Ok(Priority::Input));
        assert_eq!("Animation".parse::<Priority>(), Ok(Priority::Animation));
        assert_eq!(
            "urgent".parse::<Priority>(),
            Err(UnknownPriority("urgent".into()))
        );
    }

    #[test]
    fn unknown_names_fall_back_to_default_lane() {
        assert_eq!(Priority::parse_or_default("urgent"), Priority::Idle);
        assert_eq!(Priority::parse_or_default("network"), Priority::Network);
    }
}
