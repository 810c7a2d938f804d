//! Command dispatch to participants.
//!
//! The router's workers hand compensation and coordination commands to a
//! [`CommandDispatcher`]. The production implementation delivers them over
//! registered participant channels and records an audit event per send; a
//! recording implementation backs the unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use txlog::{EventType, TxEvent, TxLogStore};

use crate::error::{CoordinatorError, Result};
use crate::registry::{CallbackRegistry, ParticipantCommand};
use crate::transaction::{CompensateCommand, CoordinateCommand};

/// Delivers coordinator commands to participants.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Sends a compensation command. Retries (attempt > 1) are delayed by
    /// the dispatcher's fixed retry interval.
    async fn dispatch_compensation(&self, command: CompensateCommand) -> Result<()>;

    /// Sends a TCC confirm or cancel command.
    async fn dispatch_coordination(&self, command: CoordinateCommand) -> Result<()>;
}

/// Dispatcher that delivers commands over registered participant channels.
///
/// Every successful handoff is recorded in the transaction log as a
/// `CompensationSent` or `CoordinationSent` audit event, so the log tells
/// the full story of what the coordinator asked for and when.
#[derive(Clone)]
pub struct ChannelDispatcher {
    registry: CallbackRegistry,
    log: Arc<dyn TxLogStore>,
    retry_delay: Duration,
}

impl ChannelDispatcher {
    /// Creates a dispatcher over the given registry and log.
    pub fn new(registry: CallbackRegistry, log: Arc<dyn TxLogStore>, retry_delay: Duration) -> Self {
        Self {
            registry,
            log,
            retry_delay,
        }
    }

    async fn deliver(
        &self,
        service_name: &str,
        instance_id: &str,
        audit: TxEvent,
        command: ParticipantCommand,
    ) -> Result<()> {
        match self.registry.send(service_name, instance_id, command.clone()).await {
            Ok(()) => {}
            Err(
                err @ (CoordinatorError::NoCallbackAvailable { .. }
                | CoordinatorError::ChannelClosed { .. }),
            ) => {
                // No instance reachable right now. The command is held and
                // re-sent on the retry interval until some instance of the
                // service reconnects; compensation methods are idempotent,
                // so redelivery after a replay-driven duplicate is safe.
                tracing::warn!(
                    service = service_name,
                    error = %err,
                    "participant unreachable; command held for redelivery"
                );
                metrics::counter!("commands_held_total").increment(1);
                self.hold_for_redelivery(
                    service_name.to_string(),
                    instance_id.to_string(),
                    audit,
                    command,
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        }
        self.log.append(audit).await?;
        metrics::counter!("commands_dispatched_total").increment(1);
        Ok(())
    }

    fn hold_for_redelivery(
        &self,
        service_name: String,
        instance_id: String,
        audit: TxEvent,
        command: ParticipantCommand,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.retry_delay).await;
                match this
                    .registry
                    .send(&service_name, &instance_id, command.clone())
                    .await
                {
                    Ok(()) => {
                        if let Err(err) = this.log.append(audit).await {
                            tracing::error!(
                                service = %service_name,
                                error = %err,
                                "audit append failed after redelivery"
                            );
                        }
                        metrics::counter!("commands_dispatched_total").increment(1);
                        return;
                    }
                    Err(err) => {
                        tracing::debug!(
                            service = %service_name,
                            error = %err,
                            "participant still unreachable"
                        );
                    }
                }
            }
        });
    }
}

#[async_trait]
impl CommandDispatcher for ChannelDispatcher {
    #[tracing::instrument(skip(self), fields(global_tx_id = %command.global_tx_id, local_tx_id = %command.local_tx_id, attempt = command.attempt))]
    async fn dispatch_compensation(&self, command: CompensateCommand) -> Result<()> {
        let audit = TxEvent::builder()
            .event_type(EventType::CompensationSent)
            .global_tx_id(command.global_tx_id)
            .local_tx_id(command.local_tx_id)
            .service_name(&command.service_name)
            .instance_id(&command.instance_id)
            .build();
        let participant_command = ParticipantCommand::from(&command);

        if command.attempt > 1 {
            // Fixed-interval retry; sleep off the caller's path so one slow
            // retry cannot stall the transaction's mailbox.
            let this = self.clone();
            let delay = self.retry_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = this
                    .deliver(
                        &command.service_name,
                        &command.instance_id,
                        audit,
                        participant_command,
                    )
                    .await
                {
                    tracing::warn!(
                        global_tx_id = %command.global_tx_id,
                        local_tx_id = %command.local_tx_id,
                        attempt = command.attempt,
                        error = %err,
                        "compensation retry could not be delivered"
                    );
                }
            });
            return Ok(());
        }

        self.deliver(
            &command.service_name,
            &command.instance_id,
            audit,
            participant_command,
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(global_tx_id = %command.global_tx_id, local_tx_id = %command.local_tx_id, kind = command.kind.as_str()))]
    async fn dispatch_coordination(&self, command: CoordinateCommand) -> Result<()> {
        let audit = TxEvent::builder()
            .event_type(EventType::CoordinationSent)
            .global_tx_id(command.global_tx_id)
            .local_tx_id(command.local_tx_id)
            .service_name(&command.service_name)
            .instance_id(&command.instance_id)
            .build();
        let participant_command = ParticipantCommand::from(&command);

        self.deliver(
            &command.service_name,
            &command.instance_id,
            audit,
            participant_command,
        )
        .await
    }
}

/// Dispatcher that records commands instead of delivering them. Test-only
/// in spirit, but usable anywhere a no-op dispatcher is handy.
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    compensations: Arc<Mutex<Vec<CompensateCommand>>>,
    coordinations: Arc<Mutex<Vec<CoordinateCommand>>>,
}

impl RecordingDispatcher {
    /// Creates an empty recording dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compensation commands recorded so far.
    pub async fn compensations(&self) -> Vec<CompensateCommand> {
        self.compensations.lock().await.clone()
    }

    /// Returns the coordination commands recorded so far.
    pub async fn coordinations(&self) -> Vec<CoordinateCommand> {
        self.coordinations.lock().await.clone()
    }
}

#[async_trait]
impl CommandDispatcher for RecordingDispatcher {
    async fn dispatch_compensation(&self, command: CompensateCommand) -> Result<()> {
        self.compensations.lock().await.push(command);
        Ok(())
    }

    async fn dispatch_coordination(&self, command: CoordinateCommand) -> Result<()> {
        self.coordinations.lock().await.push(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{GlobalTxId, LocalTxId};
    use tokio::sync::mpsc;
    use txlog::InMemoryTxLogStore;

    fn compensate_command(attempt: i32) -> CompensateCommand {
        CompensateCommand {
            global_tx_id: GlobalTxId::new(),
            local_tx_id: LocalTxId::new(),
            service_name: "payment".to_string(),
            instance_id: "payment-1".to_string(),
            method: "refund".to_string(),
            payload: b"order=42".to_vec(),
            attempt,
        }
    }

    #[tokio::test]
    async fn first_attempt_is_delivered_immediately_with_an_audit_event() {
        let registry = CallbackRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("payment", "payment-1", tx).await;
        let log = Arc::new(InMemoryTxLogStore::new());
        let dispatcher =
            ChannelDispatcher::new(registry, log.clone(), Duration::from_secs(3));

        let command = compensate_command(1);
        let global_tx_id = command.global_tx_id;
        dispatcher.dispatch_compensation(command).await.unwrap();

        let received = rx.try_recv().unwrap();
        assert_eq!(received.as_str(), "Compensate");

        let events = log.events_for(global_tx_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::CompensationSent);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_delayed_by_the_fixed_interval() {
        let registry = CallbackRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("payment", "payment-1", tx).await;
        let log = Arc::new(InMemoryTxLogStore::new());
        let dispatcher =
            ChannelDispatcher::new(registry, log, Duration::from_secs(3));

        dispatcher
            .dispatch_compensation(compensate_command(2))
            .await
            .unwrap();

        // Nothing lands before the interval elapses.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn held_command_is_redelivered_once_the_service_reconnects() {
        let registry = CallbackRegistry::new();
        let log = Arc::new(InMemoryTxLogStore::new());
        let dispatcher =
            ChannelDispatcher::new(registry.clone(), log.clone(), Duration::from_secs(3));

        // No instance of "payment" is connected yet.
        let command = compensate_command(1);
        let global_tx_id = command.global_tx_id;
        dispatcher.dispatch_compensation(command).await.unwrap();
        assert!(log.events_for(global_tx_id).await.unwrap().is_empty());

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("payment", "payment-1", tx).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_ok());
        assert_eq!(log.events_for(global_tx_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn coordination_commands_carry_their_kind() {
        let registry = CallbackRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("stock", "stock-1", tx).await;
        let log = Arc::new(InMemoryTxLogStore::new());
        let dispatcher =
            ChannelDispatcher::new(registry, log.clone(), Duration::from_secs(3));

        let command = CoordinateCommand {
            global_tx_id: GlobalTxId::new(),
            local_tx_id: LocalTxId::new(),
            service_name: "stock".to_string(),
            instance_id: "stock-1".to_string(),
            kind: crate::transaction::CoordinateKind::Cancel,
            method: "release".to_string(),
            payload: Vec::new(),
        };
        let global_tx_id = command.global_tx_id;
        dispatcher.dispatch_coordination(command).await.unwrap();

        assert_eq!(rx.try_recv().unwrap().as_str(), "Cancel");
        let events = log.events_for(global_tx_id).await.unwrap();
        assert_eq!(events[0].event_type, EventType::CoordinationSent);
    }

    #[tokio::test]
    async fn recording_dispatcher_collects_commands() {
        let dispatcher = RecordingDispatcher::new();
        dispatcher
            .dispatch_compensation(compensate_command(1))
            .await
            .unwrap();
        assert_eq!(dispatcher.compensations().await.len(), 1);
        assert!(dispatcher.coordinations().await.is_empty());
    }
}
