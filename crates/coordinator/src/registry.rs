//! Participant connection registry.
//!
//! Participants register a command channel per (service, instance) when they
//! connect. The coordinator sends compensate/confirm/cancel commands through
//! these channels, preferring the instance that performed the original work
//! and falling back to any live instance of the same service when it is gone.

use std::collections::HashMap;
use std::sync::Arc;

use common::{GlobalTxId, LocalTxId};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};

use crate::error::{CoordinatorError, Result};
use crate::transaction::{CompensateCommand, CoordinateCommand, CoordinateKind};

/// A command delivered to a participant over its registered channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ParticipantCommand {
    /// Undo a committed sub-transaction by invoking `method` with `payload`.
    Compensate {
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        method: String,
        payload: Vec<u8>,
    },

    /// Make the participant's tentative work permanent.
    Confirm {
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        method: String,
        payload: Vec<u8>,
    },

    /// Release the participant's tentative work.
    Cancel {
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        method: String,
        payload: Vec<u8>,
    },
}

impl ParticipantCommand {
    /// Returns the global transaction this command belongs to.
    pub fn global_tx_id(&self) -> GlobalTxId {
        match self {
            ParticipantCommand::Compensate { global_tx_id, .. }
            | ParticipantCommand::Confirm { global_tx_id, .. }
            | ParticipantCommand::Cancel { global_tx_id, .. } => *global_tx_id,
        }
    }

    /// Returns the sub-transaction this command targets.
    pub fn local_tx_id(&self) -> LocalTxId {
        match self {
            ParticipantCommand::Compensate { local_tx_id, .. }
            | ParticipantCommand::Confirm { local_tx_id, .. }
            | ParticipantCommand::Cancel { local_tx_id, .. } => *local_tx_id,
        }
    }

    /// Returns the command name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantCommand::Compensate { .. } => "Compensate",
            ParticipantCommand::Confirm { .. } => "Confirm",
            ParticipantCommand::Cancel { .. } => "Cancel",
        }
    }
}

impl From<&CompensateCommand> for ParticipantCommand {
    fn from(cmd: &CompensateCommand) -> Self {
        ParticipantCommand::Compensate {
            global_tx_id: cmd.global_tx_id,
            local_tx_id: cmd.local_tx_id,
            method: cmd.method.clone(),
            payload: cmd.payload.clone(),
        }
    }
}

impl From<&CoordinateCommand> for ParticipantCommand {
    fn from(cmd: &CoordinateCommand) -> Self {
        match cmd.kind {
            CoordinateKind::Confirm => ParticipantCommand::Confirm {
                global_tx_id: cmd.global_tx_id,
                local_tx_id: cmd.local_tx_id,
                method: cmd.method.clone(),
                payload: cmd.payload.clone(),
            },
            CoordinateKind::Cancel => ParticipantCommand::Cancel {
                global_tx_id: cmd.global_tx_id,
                local_tx_id: cmd.local_tx_id,
                method: cmd.method.clone(),
                payload: cmd.payload.clone(),
            },
        }
    }
}

/// Sending half of a participant's command channel.
pub type CommandSender = mpsc::UnboundedSender<ParticipantCommand>;

#[derive(Debug)]
struct ParticipantChannel {
    instance_id: String,
    sender: CommandSender,
}

type ServiceChannels = Arc<RwLock<Vec<ParticipantChannel>>>;

/// Registry of connected participant instances, keyed by service name.
///
/// Each service has its own lock, so sends and registrations for unrelated
/// services never contend. Cloning is cheap; clones share the same
/// underlying map.
#[derive(Debug, Clone, Default)]
pub struct CallbackRegistry {
    services: Arc<RwLock<HashMap<String, ServiceChannels>>>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    async fn service_channels(&self, service_name: &str) -> Option<ServiceChannels> {
        self.services.read().await.get(service_name).cloned()
    }

    /// Registers a command channel for a (service, instance) pair,
    /// replacing any previous channel for the same instance.
    pub async fn register(
        &self,
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        sender: CommandSender,
    ) {
        let service_name = service_name.into();
        let instance_id = instance_id.into();
        let service_channels = {
            let mut services = self.services.write().await;
            Arc::clone(services.entry(service_name.clone()).or_default())
        };
        let mut instances = service_channels.write().await;
        instances.retain(|ch| ch.instance_id != instance_id);
        instances.push(ParticipantChannel {
            instance_id: instance_id.clone(),
            sender,
        });
        metrics::gauge!("registered_participant_instances").increment(1.0);
        tracing::info!(service = %service_name, instance = %instance_id, "participant registered");
    }

    /// Removes the channel for a (service, instance) pair, typically when
    /// the participant disconnects.
    pub async fn deregister(&self, service_name: &str, instance_id: &str) {
        let Some(service_channels) = self.service_channels(service_name).await else {
            return;
        };
        let mut instances = service_channels.write().await;
        let before = instances.len();
        instances.retain(|ch| ch.instance_id != instance_id);
        if instances.len() < before {
            metrics::gauge!("registered_participant_instances").decrement(1.0);
            tracing::info!(
                service = %service_name,
                instance = %instance_id,
                "participant deregistered"
            );
        }
    }

    /// Sends a command to the preferred instance of a service, falling back
    /// to any other live instance of the same service.
    ///
    /// Closed channels found along the way are pruned. Fails with
    /// [`CoordinatorError::NoCallbackAvailable`] when no instance of the
    /// service is registered, or [`CoordinatorError::ChannelClosed`] when
    /// every registered channel turned out to be dead.
    pub async fn send(
        &self,
        service_name: &str,
        preferred_instance: &str,
        command: ParticipantCommand,
    ) -> Result<()> {
        let service_channels = self.service_channels(service_name).await.ok_or_else(|| {
            CoordinatorError::NoCallbackAvailable {
                service: service_name.to_string(),
            }
        })?;
        let mut instances = service_channels.write().await;

        // Preferred instance first, then everything else in registration order.
        let mut order: Vec<usize> = (0..instances.len()).collect();
        order.sort_by_key(|&i| instances[i].instance_id != preferred_instance);

        let mut command = command;
        let mut dead: Vec<String> = Vec::new();
        let mut sent = false;
        for i in order {
            let channel = &instances[i];
            match channel.sender.send(command) {
                Ok(()) => {
                    if channel.instance_id != preferred_instance {
                        metrics::counter!("commands_rerouted_total").increment(1);
                        tracing::info!(
                            service = %service_name,
                            preferred = %preferred_instance,
                            routed_to = %channel.instance_id,
                            "preferred instance unavailable; rerouted command"
                        );
                    }
                    sent = true;
                    break;
                }
                Err(mpsc::error::SendError(returned)) => {
                    dead.push(channel.instance_id.clone());
                    command = returned;
                }
            }
        }

        if !dead.is_empty() {
            instances.retain(|ch| !dead.contains(&ch.instance_id));
            metrics::gauge!("registered_participant_instances").decrement(dead.len() as f64);
        }

        if sent {
            Ok(())
        } else if dead.is_empty() {
            Err(CoordinatorError::NoCallbackAvailable {
                service: service_name.to_string(),
            })
        } else {
            Err(CoordinatorError::ChannelClosed {
                service: service_name.to_string(),
            })
        }
    }

    /// Returns the instance ids currently registered for a service.
    pub async fn instances_of(&self, service_name: &str) -> Vec<String> {
        match self.service_channels(service_name).await {
            Some(service_channels) => service_channels
                .read()
                .await
                .iter()
                .map(|ch| ch.instance_id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Returns the service names with at least one registered instance.
    pub async fn services(&self) -> Vec<String> {
        let services = self.services.read().await;
        let mut names = Vec::new();
        for (name, service_channels) in services.iter() {
            if !service_channels.read().await.is_empty() {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compensate(global_tx_id: GlobalTxId) -> ParticipantCommand {
        ParticipantCommand::Compensate {
            global_tx_id,
            local_tx_id: LocalTxId::new(),
            method: "refund".to_string(),
            payload: Vec::new(),
        }
    }

    #[tokio::test]
    async fn delivers_to_the_preferred_instance() {
        let registry = CallbackRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.register("payment", "payment-a", tx_a).await;
        registry.register("payment", "payment-b", tx_b).await;

        let command = compensate(GlobalTxId::new());
        registry
            .send("payment", "payment-b", command.clone())
            .await
            .unwrap();

        assert_eq!(rx_b.try_recv().unwrap(), command);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn falls_back_to_another_instance_of_the_same_service() {
        let registry = CallbackRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        registry.register("payment", "payment-a", tx_a).await;
        registry.register("payment", "payment-b", tx_b).await;

        // The instance that did the original work goes away.
        drop(rx_b);

        let command = compensate(GlobalTxId::new());
        registry
            .send("payment", "payment-b", command.clone())
            .await
            .unwrap();
        assert_eq!(rx_a.try_recv().unwrap(), command);

        // The dead channel was pruned.
        assert_eq!(registry.instances_of("payment").await, vec!["payment-a"]);
    }

    #[tokio::test]
    async fn errors_when_no_instance_is_available() {
        let registry = CallbackRegistry::new();
        let err = registry
            .send("payment", "payment-a", compensate(GlobalTxId::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::NoCallbackAvailable { service } if service == "payment"
        ));

        // A service whose only channel is closed reports the closure.
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("stock", "stock-1", tx).await;
        drop(rx);
        let err = registry
            .send("stock", "stock-1", compensate(GlobalTxId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::ChannelClosed { .. }));
        assert!(registry.services().await.is_empty());
    }

    #[tokio::test]
    async fn reregistering_an_instance_replaces_its_channel() {
        let registry = CallbackRegistry::new();
        let (tx_old, mut rx_old) = mpsc::unbounded_channel();
        let (tx_new, mut rx_new) = mpsc::unbounded_channel();
        registry.register("payment", "payment-a", tx_old).await;
        registry.register("payment", "payment-a", tx_new).await;

        let command = compensate(GlobalTxId::new());
        registry
            .send("payment", "payment-a", command.clone())
            .await
            .unwrap();
        assert_eq!(rx_new.try_recv().unwrap(), command);
        assert!(rx_old.try_recv().is_err());
        assert_eq!(registry.instances_of("payment").await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_registrations_across_services_do_not_interfere() {
        let registry = CallbackRegistry::new();
        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let service = format!("service-{i}");
                let (tx, mut rx) = mpsc::unbounded_channel();
                registry.register(service.clone(), "instance-1", tx).await;
                registry
                    .send(&service, "instance-1", compensate(GlobalTxId::new()))
                    .await
                    .unwrap();
                assert!(rx.try_recv().is_ok());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.services().await.len(), 8);
    }

    #[tokio::test]
    async fn deregister_removes_only_the_named_instance() {
        let registry = CallbackRegistry::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        registry.register("payment", "payment-a", tx_a).await;
        registry.register("payment", "payment-b", tx_b).await;

        registry.deregister("payment", "payment-a").await;
        assert_eq!(registry.instances_of("payment").await, vec!["payment-b"]);

        registry.deregister("payment", "payment-b").await;
        assert!(registry.services().await.is_empty());
    }
}
