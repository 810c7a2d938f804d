//! Event routing and per-transaction workers.
//!
//! Every global transaction is owned by exactly one worker task holding its
//! [`GlobalTransaction`] machine and fed through an mpsc mailbox. Routing an
//! event appends it to the log first and only then enqueues it, so an
//! acknowledged event is always durable. Workers are spawned on demand,
//! rebuild their machine by replay, and exit once the transaction is
//! terminal and a grace window for late re-delivery has passed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::GlobalTxId;
use tokio::sync::{Mutex, mpsc};
use txlog::{EventType, TxEvent, TxLogStore, store::TxLogStoreExt};

use crate::dispatcher::CommandDispatcher;
use crate::error::{CoordinatorError, Result};
use crate::state::GlobalTxState;
use crate::transaction::{Action, GlobalTransaction};

/// Service name stamped on coordinator-synthesized events.
pub const COORDINATOR_SERVICE: &str = "coordinator";

/// How long a worker lingers after its transaction turns terminal, so that
/// re-delivered events are absorbed instead of rejected.
const TERMINAL_GRACE: Duration = Duration::from_secs(30);

/// Routes transaction events to per-transaction workers.
///
/// Cloning is cheap; clones share the worker table, log, and dispatcher.
#[derive(Clone)]
pub struct TransactionRouter {
    log: Arc<dyn TxLogStore>,
    dispatcher: Arc<dyn CommandDispatcher>,
    workers: Arc<Mutex<HashMap<GlobalTxId, mpsc::UnboundedSender<TxEvent>>>>,
    default_retry_budget: i32,
    terminal_grace: Duration,
}

impl TransactionRouter {
    /// Creates a router over the given log and dispatcher.
    pub fn new(
        log: Arc<dyn TxLogStore>,
        dispatcher: Arc<dyn CommandDispatcher>,
        default_retry_budget: i32,
    ) -> Self {
        Self {
            log,
            dispatcher,
            workers: Arc::new(Mutex::new(HashMap::new())),
            default_retry_budget,
            terminal_grace: TERMINAL_GRACE,
        }
    }

    /// Overrides how long workers linger after their transaction finishes.
    pub fn with_terminal_grace(mut self, grace: Duration) -> Self {
        self.terminal_grace = grace;
        self
    }

    /// Durably records an event and hands it to its transaction's worker.
    ///
    /// Returns after the append succeeds; the state transition and any
    /// resulting commands happen asynchronously on the worker. Non-start
    /// events for transactions the log has never seen are rejected, as are
    /// events for transactions already recorded as terminal with no live
    /// worker.
    #[tracing::instrument(skip(self, event), fields(global_tx_id = %event.global_tx_id, event_type = %event.event_type))]
    pub async fn route(&self, event: TxEvent) -> Result<()> {
        let global_tx_id = event.global_tx_id;
        let has_worker = self.workers.lock().await.contains_key(&global_tx_id);

        if !has_worker {
            if event.event_type.is_start() {
                metrics::counter!("transactions_started_total").increment(1);
            } else if !self.log.global_tx_exists(global_tx_id).await? {
                return Err(CoordinatorError::UnknownGlobalTx(global_tx_id));
            } else if self.log.is_terminal(global_tx_id).await? {
                let machine = self.load(global_tx_id).await?;
                return Err(CoordinatorError::TerminalState {
                    global_tx_id,
                    state: machine.state(),
                });
            }
        }

        self.log.append(event.clone()).await?;
        metrics::counter!("events_routed_total").increment(1);
        self.enqueue(event).await
    }

    /// Rebuilds the machine for a global transaction by replaying its log.
    pub async fn load(&self, global_tx_id: GlobalTxId) -> Result<GlobalTransaction> {
        let events = self.log.events_for(global_tx_id).await?;
        if events.is_empty() {
            return Err(CoordinatorError::UnknownGlobalTx(global_tx_id));
        }
        Ok(GlobalTransaction::from_events(
            &events,
            self.default_retry_budget,
        ))
    }

    /// Respawns workers for every non-terminal transaction in the log.
    ///
    /// Each worker replays its transaction and re-dispatches the commands
    /// that were in flight when the previous coordinator stopped. Safe to
    /// call on a live router; transactions that already have a worker are
    /// left alone. Returns the number of transactions recovered.
    pub async fn recover(&self) -> Result<usize> {
        let ids = self.log.find_non_terminal(Utc::now()).await?;
        let mut recovered = 0;
        for global_tx_id in ids {
            let mut workers = self.workers.lock().await;
            if !workers.contains_key(&global_tx_id) {
                let sender = self.spawn_worker(global_tx_id);
                workers.insert(global_tx_id, sender);
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(count = recovered, "recovered in-flight transactions");
        }
        Ok(recovered)
    }

    /// Re-dispatches every command of a transaction that still awaits its
    /// acknowledgment, as derived from the log. Returns how many went out.
    ///
    /// Safe to call while the transaction's worker is live: participant
    /// compensation and coordination methods are idempotent, so a command
    /// whose ack is merely slow is re-executed harmlessly.
    pub async fn redispatch_outstanding(&self, global_tx_id: GlobalTxId) -> Result<usize> {
        let machine = self.load(global_tx_id).await?;
        let actions = machine.outstanding_actions();
        let count = actions.len();
        for action in actions {
            match action {
                Action::Compensate(command) => {
                    self.dispatcher.dispatch_compensation(command).await?;
                }
                Action::Coordinate(command) => {
                    self.dispatcher.dispatch_coordination(command).await?;
                }
                Action::AppendMarker { .. } => {}
            }
        }
        Ok(count)
    }

    /// Returns the number of transactions with a live worker.
    pub async fn active_workers(&self) -> usize {
        self.workers.lock().await.len()
    }

    async fn enqueue(&self, event: TxEvent) -> Result<()> {
        let global_tx_id = event.global_tx_id;
        let mut event = event;
        // Two passes: the worker found in the table may have just exited.
        for _ in 0..2 {
            let sender = {
                let mut workers = self.workers.lock().await;
                workers
                    .entry(global_tx_id)
                    .or_insert_with(|| self.spawn_worker(global_tx_id))
                    .clone()
            };
            match sender.send(event) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    self.workers.lock().await.remove(&global_tx_id);
                    event = returned;
                }
            }
        }
        // The worker exited between spawn and send; it only does that once
        // the transaction is terminal, so the event would be dropped anyway.
        tracing::debug!(global_tx_id = %global_tx_id, "worker gone; event dropped as late");
        Ok(())
    }

    fn spawn_worker(&self, global_tx_id: GlobalTxId) -> mpsc::UnboundedSender<TxEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            global_tx_id,
            log: Arc::clone(&self.log),
            dispatcher: Arc::clone(&self.dispatcher),
            workers: Arc::clone(&self.workers),
            default_retry_budget: self.default_retry_budget,
            terminal_grace: self.terminal_grace,
        };
        tokio::spawn(worker.run(receiver));
        sender
    }
}

struct Worker {
    global_tx_id: GlobalTxId,
    log: Arc<dyn TxLogStore>,
    dispatcher: Arc<dyn CommandDispatcher>,
    workers: Arc<Mutex<HashMap<GlobalTxId, mpsc::UnboundedSender<TxEvent>>>>,
    default_retry_budget: i32,
    terminal_grace: Duration,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<TxEvent>) {
        let (mut machine, has_marker) = match self.replay().await {
            Ok(replayed) => replayed,
            Err(err) => {
                tracing::error!(
                    global_tx_id = %self.global_tx_id,
                    error = %err,
                    "worker could not replay transaction; exiting"
                );
                self.workers.lock().await.remove(&self.global_tx_id);
                return;
            }
        };

        // Replay rebuilds state but deliberately discards the actions the
        // replayed events once triggered. Commands that never got their ack
        // go out again here; participant compensation methods are
        // idempotent, so a command that was in fact delivered before a
        // crash is harmless. The same pass covers the window where an event
        // was appended before this worker existed.
        for action in machine.outstanding_actions() {
            self.execute(action).await;
        }
        if machine.is_finished() && !has_marker {
            let event_type = match machine.state() {
                GlobalTxState::Suspended => EventType::SagaSuspended,
                _ => EventType::SagaEnded,
            };
            let reason = machine.suspend_reason().unwrap_or_default().to_string();
            self.execute(Action::AppendMarker { event_type, reason }).await;
        }

        while !machine.is_finished() {
            let Some(event) = receiver.recv().await else {
                break;
            };
            let actions = machine.apply(&event);
            for action in actions {
                self.execute(action).await;
            }
        }

        // Linger before eviction: events re-delivered shortly after the
        // transaction finished land here and are absorbed as duplicates.
        if machine.is_finished() && !self.terminal_grace.is_zero() {
            while let Ok(Some(event)) =
                tokio::time::timeout(self.terminal_grace, receiver.recv()).await
            {
                let _ = machine.apply(&event);
            }
        }

        self.workers.lock().await.remove(&self.global_tx_id);
        if machine.is_finished() {
            metrics::counter!("transactions_finished_total", "state" => machine.state().as_str())
                .increment(1);
            tracing::info!(
                global_tx_id = %self.global_tx_id,
                state = %machine.state(),
                "transaction finished"
            );
        }
    }

    async fn replay(&self) -> Result<(GlobalTransaction, bool)> {
        let events = self.log.events_for(self.global_tx_id).await?;
        let has_marker = events.iter().any(|e| e.event_type.is_terminal_marker());
        let machine = GlobalTransaction::from_events(&events, self.default_retry_budget);
        Ok((machine, has_marker))
    }

    async fn execute(&self, action: Action) {
        let result = match action {
            Action::Compensate(command) => self.dispatcher.dispatch_compensation(command).await,
            Action::Coordinate(command) => self.dispatcher.dispatch_coordination(command).await,
            Action::AppendMarker { event_type, reason } => {
                let marker = TxEvent::builder()
                    .event_type(event_type)
                    .global_tx_id(self.global_tx_id)
                    .service_name(COORDINATOR_SERVICE)
                    .instance_id(COORDINATOR_SERVICE)
                    .payload(reason.into_bytes())
                    .build();
                self.log.append(marker).await.map_err(CoordinatorError::from)
            }
        };
        if let Err(err) = result {
            // A lost command is recovered later by replay and redispatch;
            // the worker keeps serving its mailbox.
            tracing::error!(
                global_tx_id = %self.global_tx_id,
                error = %err,
                "coordinator action failed"
            );
        }
    }
}
