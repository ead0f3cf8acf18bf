//! Per-dataset training
//!
//! Every [`DatasetKey`] is owned by one handler task that serialises all
//! writes to that dataset's record log, frequency table, counters and
//! reconciler. Packets reach it through a bounded queue, so different
//! datasets train in parallel while each one sees its packets in order.
//!
//! ```text
//! TrainPacket → DatasetHandle ─mpsc→ handler task
//!                                      ├─ RecordLog.add / get_record
//!                                      ├─ ByteFrequencyTable.process_bytes
//!                                      ├─ Reconciler.receive_record
//!                                      ├─ OffsetSequenceCounter.process_record
//!                                      │     └─mpsc(10)→ forwarder ─→ updates
//!                                      └─ LengthCounter.process_bytes
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use adlab_core::{Class, DatasetKey, TrainPacket};
use adlab_storage::{
    ByteFrequencyTable, LengthCounter, OffsetSequenceCounter, Reconcile, Reconciler, RecordLog,
    RuleCandidate, StorageError, StoreRegistry,
};
use dashmap::DashMap;
use tokio::sync::{Mutex, OnceCell, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, instrument, trace, warn};

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};

/// An improved rule candidate for one dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub key: DatasetKey,
    pub candidate: RuleCandidate,
}

/// What flows from the training side to the rule publisher
#[derive(Debug)]
pub(crate) enum UpdateEvent {
    Update(Update),
    /// Acknowledged once every earlier event has been handled
    Flush(oneshot::Sender<()>),
}

/// Commands accepted by a dataset handler task
#[derive(Debug)]
pub(crate) enum HandlerCommand {
    Train(Class, Vec<u8>),
    /// Acknowledged once every earlier command has been handled
    Barrier(oneshot::Sender<()>),
}

/// Sending side of one dataset handler
#[derive(Debug, Clone)]
pub struct DatasetHandle {
    key: DatasetKey,
    commands: mpsc::Sender<HandlerCommand>,
    flushes: mpsc::Sender<oneshot::Sender<()>>,
}

impl DatasetHandle {
    pub fn key(&self) -> &DatasetKey {
        &self.key
    }

    /// Queue a payload, waiting for room if the handler is behind
    pub async fn train(&self, class: Class, payload: Vec<u8>) -> ServiceResult<()> {
        self.commands
            .send(HandlerCommand::Train(class, payload))
            .await
            .map_err(|_| ServiceError::HandlerClosed(self.key.clone()))
    }

    /// Wait until every queued payload is processed and its candidates forwarded
    pub async fn sync(&self) -> ServiceResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(HandlerCommand::Barrier(tx))
            .await
            .map_err(|_| ServiceError::HandlerClosed(self.key.clone()))?;
        rx.await
            .map_err(|_| ServiceError::HandlerClosed(self.key.clone()))?;

        let (tx, rx) = oneshot::channel();
        self.flushes
            .send(tx)
            .await
            .map_err(|_| ServiceError::HandlerClosed(self.key.clone()))?;
        rx.await
            .map_err(|_| ServiceError::HandlerClosed(self.key.clone()))
    }
}

/// Everything one dataset learns from, owned by its handler task
struct DatasetHandler {
    key: DatasetKey,
    log: Arc<RecordLog>,
    bytes: ByteFrequencyTable,
    offsets: OffsetSequenceCounter,
    lengths: LengthCounter,
    reconciler: Reconciler,
}

impl DatasetHandler {
    #[instrument(skip(key, registry, candidates), fields(dataset = %key))]
    async fn open(
        key: DatasetKey,
        registry: &StoreRegistry,
        candidates: mpsc::Sender<RuleCandidate>,
    ) -> Result<Self, StorageError> {
        let name = key.store_name();
        let base_dir = registry.base_dir();

        let log = registry.get_or_open(&name).await?;
        let bytes = ByteFrequencyTable::open(base_dir, &name).await?;
        let offsets = OffsetSequenceCounter::open(registry, &name, candidates).await?;
        let lengths = LengthCounter::open(base_dir, &name).await?;
        let reconciler = Reconciler::open(base_dir, &name).await?;

        let mut handler = Self {
            key,
            log,
            bytes,
            offsets,
            lengths,
            reconciler,
        };
        handler.catch_up().await?;
        Ok(handler)
    }

    /// Fold in records stored before the derived state last saw them
    async fn catch_up(&mut self) -> Result<(), StorageError> {
        let mut applied = 0;
        let mut cursor = self.log.cursor(self.bytes.last_processed_index());
        while let Some(record) = cursor.next().await {
            if self.bytes.process_bytes(&record).await? {
                applied += 1;
            }
        }

        let mut folded = 0;
        let mut cursor = self.log.cursor(self.reconciler.frontier());
        while let Some(record) = cursor.next().await {
            if let Reconcile::Folded(_) = self.reconciler.receive_record(&record).await? {
                folded += 1;
            }
        }

        if applied > 0 || folded > 0 {
            info!(dataset = %self.key, applied, folded, "Caught up derived state");
        }
        Ok(())
    }

    /// Store and learn from one labelled payload
    async fn train(&mut self, class: Class, payload: &[u8]) -> Result<i64, StorageError> {
        let index = self.log.add(payload).await?;
        let record = self.log.get_record(index).await?;

        if !self.bytes.process_bytes(&record).await? {
            warn!(index, "Byte table skipped record");
        }
        if self.reconciler.receive_record(&record).await? == Reconcile::Duplicate {
            debug!(index, "Length summary already folded");
        }
        self.offsets.process_record(class, &record).await?;
        self.lengths.process_bytes(class, &record.data).await?;

        trace!(index, %class, len = payload.len(), "Trained record");
        Ok(index)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<HandlerCommand>) {
        info!("Dataset handler started");

        while let Some(command) = commands.recv().await {
            match command {
                HandlerCommand::Train(class, payload) => {
                    if let Err(e) = self.train(class, &payload).await {
                        error!(error = %e, %class, "Failed to train record");
                    }
                }
                HandlerCommand::Barrier(ack) => {
                    let _ = ack.send(());
                }
            }
        }

        if let Err(e) = self.bytes.save().await {
            warn!(error = %e, "Failed to save byte table");
        }
        info!("Dataset handler stopped");
    }
}

/// Move a dataset's candidates onto the shared update channel
async fn forward_candidates(
    key: DatasetKey,
    mut candidates: mpsc::Receiver<RuleCandidate>,
    mut flushes: mpsc::Receiver<oneshot::Sender<()>>,
    updates: mpsc::Sender<UpdateEvent>,
) {
    let update = |candidate| {
        UpdateEvent::Update(Update {
            key: key.clone(),
            candidate,
        })
    };

    loop {
        tokio::select! {
            biased;
            candidate = candidates.recv() => {
                let Some(candidate) = candidate else { break };
                if updates.send(update(candidate)).await.is_err() {
                    break;
                }
            }
            Some(ack) = flushes.recv() => {
                while let Ok(candidate) = candidates.try_recv() {
                    if updates.send(update(candidate)).await.is_err() {
                        return;
                    }
                }
                let _ = updates.send(UpdateEvent::Flush(ack)).await;
            }
        }
    }
    debug!(dataset = %key, "Candidate forwarder stopped");
}

/// Routes training packets to lazily created per-dataset handlers
pub struct TrainService {
    config: ServiceConfig,
    registry: Arc<StoreRegistry>,
    /// The first caller for a dataset opens its handler; the rest wait on the cell
    handlers: DashMap<DatasetKey, Arc<OnceCell<DatasetHandle>>>,
    updates: mpsc::Sender<UpdateEvent>,
    /// Also guards `closed` against handlers starting during shutdown
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TrainService {
    pub(crate) fn new(
        config: ServiceConfig,
        registry: Arc<StoreRegistry>,
        updates: mpsc::Sender<UpdateEvent>,
    ) -> Self {
        Self {
            config,
            registry,
            handlers: DashMap::new(),
            updates,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// The handle for `key`, starting its handler on first use
    ///
    /// Opening and catching up one dataset never delays another.
    pub async fn handler(&self, key: &DatasetKey) -> ServiceResult<DatasetHandle> {
        if let Some(handle) = self.running(key) {
            return Ok(handle);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(ServiceError::ShutDown);
        }

        let cell = self.handlers.entry(key.clone()).or_default().clone();
        let handle = cell.get_or_try_init(|| self.start_handler(key)).await?;
        Ok(handle.clone())
    }

    fn running(&self, key: &DatasetKey) -> Option<DatasetHandle> {
        self.handlers
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    async fn start_handler(&self, key: &DatasetKey) -> ServiceResult<DatasetHandle> {
        let (candidate_tx, candidate_rx) = mpsc::channel(self.config.rule_update_capacity.max(1));
        let handler = DatasetHandler::open(key.clone(), &self.registry, candidate_tx).await?;

        let (command_tx, command_rx) = mpsc::channel(self.config.handler_channel_capacity.max(1));
        let (flush_tx, flush_rx) = mpsc::channel(1);

        let mut tasks = self.tasks.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(ServiceError::ShutDown);
        }

        let span = info_span!("dataset", store = %key.store_name());
        let handler_task = tokio::spawn(handler.run(command_rx).instrument(span.clone()));
        let forwarder_task = tokio::spawn(
            forward_candidates(key.clone(), candidate_rx, flush_rx, self.updates.clone())
                .instrument(span),
        );
        tasks.extend([handler_task, forwarder_task]);

        info!(dataset = %key, "Started dataset handler");
        Ok(DatasetHandle {
            key: key.clone(),
            commands: command_tx,
            flushes: flush_tx,
        })
    }

    /// Queue a packet on its dataset's handler
    ///
    /// # Errors
    ///
    /// Empty payloads are rejected with [`StorageError::EmptyPayload`]
    /// before anything is queued.
    pub async fn train(&self, packet: TrainPacket) -> ServiceResult<()> {
        if packet.payload.is_empty() {
            return Err(StorageError::EmptyPayload.into());
        }
        let handle = self.handler(&packet.key()).await?;
        handle.train(packet.class(), packet.payload).await
    }

    /// Wait until everything queued for `key` is processed; a no-op for unknown datasets
    pub async fn sync(&self, key: &DatasetKey) -> ServiceResult<()> {
        match self.running(key) {
            Some(handle) => handle.sync().await,
            None => Ok(()),
        }
    }

    /// Datasets with a running handler
    pub fn datasets(&self) -> Vec<DatasetKey> {
        self.handlers
            .iter()
            .filter(|cell| cell.initialized())
            .map(|cell| cell.key().clone())
            .collect()
    }

    /// Stop every handler once its queue drains
    ///
    /// Later packets are refused with [`ServiceError::ShutDown`].
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = {
            let mut tasks = self.tasks.lock().await;
            self.closed.store(true, Ordering::Release);
            self.handlers.clear();
            tasks.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }
        info!("Train service stopped");
    }
}
