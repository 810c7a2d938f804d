//! Transaction coordination for distributed sagas and TCC transactions.
//!
//! This crate holds the coordinator core: per-transaction state machines
//! fed by the event log, a router that gives every global transaction a
//! single worker task, a registry of connected participant channels, a
//! dispatcher that delivers compensate/confirm/cancel commands, and a
//! timeout scanner that aborts overdue transactions.
//!
//! A saga that fails is compensated in reverse order of its committed
//! steps; a TCC transaction is confirmed or cancelled across all of its
//! participants once the initiator reports the outcome.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod router;
pub mod state;
pub mod timeout;
pub mod transaction;

pub use config::CoordinatorConfig;
pub use dispatcher::{ChannelDispatcher, CommandDispatcher, RecordingDispatcher};
pub use error::{CoordinatorError, Result};
pub use registry::{CallbackRegistry, CommandSender, ParticipantCommand};
pub use router::TransactionRouter;
pub use state::{GlobalTxState, TxState};
pub use timeout::{AlwaysLeader, LeadershipOracle, TimeoutScanner, ToggleLeader};
pub use transaction::{
    Action, CompensateCommand, CoordinateCommand, CoordinateKind, GlobalTransaction,
    SubTransaction, TxKind,
};
