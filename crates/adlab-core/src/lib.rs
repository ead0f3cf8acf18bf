//! # Adlab Core
//!
//! Core types and the message contract shared by the adlab storage,
//! service and command-line crates.
//!
//! ## Key Types
//!
//! - [`Class`]: The allow/block label an operator attaches to captured traffic
//! - [`Direction`]: Whether a payload was seen incoming or outgoing
//! - [`DatasetKey`]: A dataset name plus direction, identifying one store
//! - [`Message`]: Closed set of messages exchanged with capture clients and
//!   rule subscribers ([`TrainPacket`], [`RuleRequest`], [`Rule`], [`ResultStatus`])

pub mod class;
pub mod error;
pub mod message;

pub use class::*;
pub use error::*;
pub use message::*;
