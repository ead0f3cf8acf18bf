//! # Adlab Service
//!
//! Learns discriminating byte sequences from labelled traffic and
//! publishes them as rules.
//!
//! Each dataset direction gets its own handler task that stores incoming
//! payloads and updates the dataset's statistics. Handlers report better
//! candidates over a shared channel to the [`RuleService`], which resolves
//! them to [`Rule`](adlab_core::Rule)s and broadcasts them.
//!
//! ## Example
//!
//! ```ignore
//! use adlab_core::{Class, DatasetKey, Direction, Message, TrainPacket};
//! use adlab_service::{Service, ServiceConfig};
//!
//! let service = Service::start(ServiceConfig::with_data_dir("./store")).await?;
//! let key = DatasetKey::new("web", Direction::Incoming);
//!
//! service
//!     .handle(Message::TrainPacket(TrainPacket::new(&key, Class::Block, b"GET /admin".to_vec())))
//!     .await?;
//! service.sync(&key).await?;
//! println!("{:?}", service.rule(&key));
//! ```

pub mod config;
pub mod error;
pub mod rule;
pub mod service;
pub mod train;

pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use rule::RuleService;
pub use service::Service;
pub use train::{DatasetHandle, TrainService, Update};
