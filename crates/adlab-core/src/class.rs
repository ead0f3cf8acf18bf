//! Traffic classes, directions and dataset keys

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Operator label attached to captured traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Class {
    /// Traffic that the network let through
    Allow,
    /// Traffic that the network blocked
    Block,
}

impl Class {
    /// Map the wire-level `allowBlock` flag onto a class
    pub fn from_allow_block(allow_block: bool) -> Self {
        if allow_block { Class::Allow } else { Class::Block }
    }

    /// The wire-level `allowBlock` flag for this class
    pub fn is_allow(self) -> bool {
        matches!(self, Class::Allow)
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Class::Allow => write!(f, "allow"),
            Class::Block => write!(f, "block"),
        }
    }
}

/// Direction of a payload relative to the capture point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    /// Map the wire-level `incoming` flag onto a direction
    pub fn from_incoming(incoming: bool) -> Self {
        if incoming {
            Direction::Incoming
        } else {
            Direction::Outgoing
        }
    }

    pub fn is_incoming(self) -> bool {
        matches!(self, Direction::Incoming)
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Incoming => write!(f, "incoming"),
            Direction::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// Identifies one logical dataset: a name plus a direction
///
/// Each key owns exactly one record log, so incoming and outgoing traffic
/// for the same dataset are learned independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetKey {
    /// Operator-chosen dataset name
    pub dataset: String,
    /// Direction of the traffic in this dataset
    pub direction: Direction,
}

impl DatasetKey {
    /// Create a new dataset key
    pub fn new(dataset: impl Into<String>, direction: Direction) -> Self {
        Self {
            dataset: dataset.into(),
            direction,
        }
    }

    /// Name of the record log backing this dataset
    ///
    /// For example `"http-incoming"`.
    pub fn store_name(&self) -> String {
        format!("{}-{}", self.dataset, self.direction)
    }
}

impl Display for DatasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.dataset, self.direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_flags() {
        assert_eq!(Class::from_allow_block(true), Class::Allow);
        assert_eq!(Class::from_allow_block(false), Class::Block);
        assert!(Class::Allow.is_allow());
        assert!(!Class::Block.is_allow());
    }

    #[test]
    fn test_store_name() {
        let key = DatasetKey::new("http", Direction::Incoming);
        assert_eq!(key.store_name(), "http-incoming");

        let key = DatasetKey::new("my-set", Direction::from_incoming(false));
        assert_eq!(key.store_name(), "my-set-outgoing");
        assert_eq!(key.to_string(), key.store_name());
    }
}
