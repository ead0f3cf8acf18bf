//! Boundary messages
//!
//! Capture clients submit [`TrainPacket`]s, rule consumers send
//! [`RuleRequest`]s and receive [`Rule`]s. All of them travel as a single
//! [`Message`] enum so one channel can carry every kind; the variant tag is
//! decoded once at the boundary and matched exhaustively afterwards.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::class::{Class, DatasetKey, Direction};
use crate::error::ProtocolError;

/// A labelled payload submitted for training
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainPacket {
    /// Dataset the payload belongs to
    pub dataset: String,
    /// `true` when the traffic was allowed, `false` when it was blocked
    pub allow_block: bool,
    /// `true` for incoming traffic, `false` for outgoing
    pub incoming: bool,
    /// Raw captured bytes
    pub payload: Vec<u8>,
}

impl TrainPacket {
    /// Create a new training packet
    pub fn new(key: &DatasetKey, class: Class, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            dataset: key.dataset.clone(),
            allow_block: class.is_allow(),
            incoming: key.direction.is_incoming(),
            payload: payload.into(),
        }
    }

    /// The dataset this packet trains
    pub fn key(&self) -> DatasetKey {
        DatasetKey::new(self.dataset.clone(), Direction::from_incoming(self.incoming))
    }

    /// The operator label of this packet
    pub fn class(&self) -> Class {
        Class::from_allow_block(self.allow_block)
    }
}

/// Request for the current best rule of a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRequest {
    pub dataset: String,
    pub incoming: bool,
}

impl RuleRequest {
    pub fn new(key: &DatasetKey) -> Self {
        Self {
            dataset: key.dataset.clone(),
            incoming: key.direction.is_incoming(),
        }
    }

    pub fn key(&self) -> DatasetKey {
        DatasetKey::new(self.dataset.clone(), Direction::from_incoming(self.incoming))
    }
}

/// A published discriminating rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Dataset the rule was learned from
    pub dataset: String,
    /// `true` if the sequence must appear (allow-correlated), `false` if it
    /// must not appear (block-correlated)
    pub require_forbid: bool,
    /// Direction the rule applies to
    pub incoming: bool,
    /// The discriminating byte sequence
    pub sequence: Vec<u8>,
}

impl Rule {
    pub fn key(&self) -> DatasetKey {
        DatasetKey::new(self.dataset.clone(), Direction::from_incoming(self.incoming))
    }
}

impl Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let polarity = if self.require_forbid {
            "require"
        } else {
            "forbid"
        };
        write!(
            f,
            "{} {} {} ({} bytes)",
            self.key(),
            polarity,
            hex::encode(&self.sequence),
            self.sequence.len()
        )
    }
}

/// Outcome of a request that carries no other payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Success,
    Error,
}

/// Every message that crosses the service boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    TrainPacket(TrainPacket),
    RuleRequest(RuleRequest),
    Rule(Rule),
    Status(ResultStatus),
}

impl Message {
    /// Stable type name of this message, used in logs and error reports
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::TrainPacket(_) => "TrainPacket",
            Message::RuleRequest(_) => "RuleRequest",
            Message::Rule(_) => "Rule",
            Message::Status(_) => "Status",
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        postcard::to_allocvec(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        postcard::from_bytes(data).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Unwrap a [`Rule`], failing on any other variant
    pub fn into_rule(self) -> Result<Rule, ProtocolError> {
        match self {
            Message::Rule(rule) => Ok(rule),
            other => Err(ProtocolError::UnexpectedMessage {
                expected: "Rule",
                actual: other.type_name(),
            }),
        }
    }
}

impl From<TrainPacket> for Message {
    fn from(packet: TrainPacket) -> Self {
        Message::TrainPacket(packet)
    }
}

impl From<RuleRequest> for Message {
    fn from(request: RuleRequest) -> Self {
        Message::RuleRequest(request)
    }
}

impl From<Rule> for Message {
    fn from(rule: Rule) -> Self {
        Message::Rule(rule)
    }
}
