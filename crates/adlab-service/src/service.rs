//! The adlab service facade
//!
//! Owns the store registry, the training side and the rule publisher,
//! and answers the two requests a client can make.

use std::sync::Arc;

use adlab_core::{DatasetKey, Message, ProtocolError, ResultStatus, Rule};
use adlab_storage::{StorageError, StoreRegistry};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::rule::RuleService;
use crate::train::TrainService;

/// A running adlab service
pub struct Service {
    config: ServiceConfig,
    registry: Arc<StoreRegistry>,
    train: TrainService,
    rules: Arc<RuleService>,
    shutdown_tx: broadcast::Sender<()>,
    rule_task: Mutex<Option<JoinHandle<()>>>,
}

impl Service {
    /// Create the data directory and start the rule publisher
    ///
    /// Dataset handlers start lazily on their first packet.
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub async fn start(config: ServiceConfig) -> ServiceResult<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let registry = Arc::new(StoreRegistry::new(config.record_log_config()));
        let (updates_tx, updates_rx) = mpsc::channel(config.update_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let rules = Arc::new(RuleService::new(
            registry.clone(),
            config.rule_broadcast_capacity,
        ));
        let rule_task = tokio::spawn(rules.clone().run(updates_rx, shutdown_rx));

        let train = TrainService::new(config.clone(), registry.clone(), updates_tx);

        info!("Service started");
        Ok(Self {
            config,
            registry,
            train,
            rules,
            shutdown_tx,
            rule_task: Mutex::new(Some(rule_task)),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    pub fn train_service(&self) -> &TrainService {
        &self.train
    }

    pub fn rule_service(&self) -> &Arc<RuleService> {
        &self.rules
    }

    /// Answer one client message
    ///
    /// `TrainPacket` yields a `Status`, `RuleRequest` yields the current
    /// `Rule` or `Status(Error)` when none has been learned yet.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedMessage`] for `Rule` and `Status`,
    /// which only ever flow from the service.
    pub async fn handle(&self, message: Message) -> ServiceResult<Option<Message>> {
        match message {
            Message::TrainPacket(packet) => {
                let key = packet.key();
                match self.train.train(packet).await {
                    Ok(()) => Ok(Some(Message::Status(ResultStatus::Success))),
                    Err(ServiceError::Storage(StorageError::EmptyPayload)) => {
                        debug!(dataset = %key, "Rejected empty payload");
                        Ok(Some(Message::Status(ResultStatus::Error)))
                    }
                    Err(e) => {
                        warn!(dataset = %key, error = %e, "Failed to queue packet");
                        Ok(Some(Message::Status(ResultStatus::Error)))
                    }
                }
            }
            Message::RuleRequest(request) => {
                let reply = match self.rules.rule(&request.key()) {
                    Some(rule) => Message::Rule(rule),
                    None => Message::Status(ResultStatus::Error),
                };
                Ok(Some(reply))
            }
            other => Err(ProtocolError::UnexpectedMessage {
                expected: "TrainPacket or RuleRequest",
                actual: other.type_name(),
            }
            .into()),
        }
    }

    /// Decode a message, answer it and encode the reply
    pub async fn handle_bytes(&self, data: &[u8]) -> ServiceResult<Option<Vec<u8>>> {
        let message = Message::from_bytes(data)?;
        match self.handle(message).await? {
            Some(reply) => Ok(Some(reply.to_bytes()?)),
            None => Ok(None),
        }
    }

    /// Receive every rule published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Rule> {
        self.rules.subscribe()
    }

    /// The most recent rule for `key`
    pub fn rule(&self, key: &DatasetKey) -> Option<Rule> {
        self.rules.rule(key)
    }

    /// Wait until every packet queued for `key` is learned and any rule it
    /// produced is published
    pub async fn sync(&self, key: &DatasetKey) -> ServiceResult<()> {
        self.train.sync(key).await
    }

    /// Drain the handlers, stop the publisher and close every store
    pub async fn shutdown(&self) -> ServiceResult<()> {
        self.train.shutdown().await;

        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.rule_task.lock().await.take() {
            let _ = task.await;
        }

        self.registry.close_all().await?;
        info!("Service stopped");
        Ok(())
    }
}
