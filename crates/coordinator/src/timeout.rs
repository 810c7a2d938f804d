//! Timeout and unacked-command scanning.
//!
//! Transactions that declare a timeout at start get a deadline; a periodic
//! scanner finds open transactions past their deadline and injects a
//! `SagaTimedOut` event, which the state machine treats as an abort. The
//! same loop re-sends commands whose acknowledgment is overdue, covering
//! participants that took a command and then died before acking. Scans only
//! run on the instance currently holding leadership, so a multi-instance
//! deployment times a transaction out exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use txlog::{EventType, TxEvent, TxLogStore};

use crate::error::Result;
use crate::router::{COORDINATOR_SERVICE, TransactionRouter};

/// How long a dispatched command may sit unacknowledged before the scanner
/// re-sends it.
const RESEND_AFTER: Duration = Duration::from_secs(30);

/// Decides whether this coordinator instance currently owns the scan.
pub trait LeadershipOracle: Send + Sync {
    /// Returns true if this instance should run timeout scans right now.
    fn is_leader(&self) -> bool;
}

/// Oracle for single-instance deployments: always the leader.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysLeader;

impl LeadershipOracle for AlwaysLeader {
    fn is_leader(&self) -> bool {
        true
    }
}

/// Oracle whose answer can be flipped at runtime, driven by an external
/// election mechanism (or by tests).
#[derive(Debug, Default)]
pub struct ToggleLeader {
    leading: AtomicBool,
}

impl ToggleLeader {
    /// Creates an oracle with the given initial answer.
    pub fn new(leading: bool) -> Self {
        Self {
            leading: AtomicBool::new(leading),
        }
    }

    /// Updates the answer.
    pub fn set_leader(&self, leading: bool) {
        self.leading.store(leading, Ordering::SeqCst);
    }
}

impl LeadershipOracle for ToggleLeader {
    fn is_leader(&self) -> bool {
        self.leading.load(Ordering::SeqCst)
    }
}

/// Periodically times out overdue transactions and re-sends unacked
/// commands.
pub struct TimeoutScanner {
    log: Arc<dyn TxLogStore>,
    router: TransactionRouter,
    oracle: Arc<dyn LeadershipOracle>,
    interval: Duration,
    resend_after: Duration,
}

impl TimeoutScanner {
    /// Creates a scanner over the given log and router.
    pub fn new(
        log: Arc<dyn TxLogStore>,
        router: TransactionRouter,
        oracle: Arc<dyn LeadershipOracle>,
        interval: Duration,
    ) -> Self {
        Self {
            log,
            router,
            oracle,
            interval,
            resend_after: RESEND_AFTER,
        }
    }

    /// Overrides how long an unacked command sits before it is re-sent.
    pub fn with_resend_after(mut self, resend_after: Duration) -> Self {
        self.resend_after = resend_after;
        self
    }

    /// Runs one timeout scan, returning how many transactions were timed
    /// out.
    ///
    /// A no-op when this instance is not the leader. Transactions already
    /// aborting or compensating are skipped, so an expired transaction is
    /// timed out exactly once no matter how long its compensation takes.
    pub async fn scan_once(&self) -> Result<usize> {
        if !self.oracle.is_leader() {
            return Ok(0);
        }

        let expired = self.log.find_expired(Utc::now()).await?;
        let mut timed_out = 0;
        for global_tx_id in expired {
            let events = self.log.events_for(global_tx_id).await?;
            let already_aborting = events.iter().any(|e| {
                matches!(e.event_type, EventType::SagaTimedOut | EventType::TxAborted)
            });
            if already_aborting {
                continue;
            }
            let event = TxEvent::builder()
                .event_type(EventType::SagaTimedOut)
                .global_tx_id(global_tx_id)
                .service_name(COORDINATOR_SERVICE)
                .instance_id(COORDINATOR_SERVICE)
                .build();
            match self.router.route(event).await {
                Ok(()) => timed_out += 1,
                // The transaction may have finished between the query and
                // the route; nothing to do.
                Err(err) => {
                    tracing::debug!(
                        global_tx_id = %global_tx_id,
                        error = %err,
                        "expired transaction not timed out"
                    );
                }
            }
        }
        Ok(timed_out)
    }

    /// Runs one unacked-command sweep, re-sending the in-flight commands of
    /// every open transaction whose log has been quiet for longer than the
    /// resend threshold. Returns how many transactions had commands
    /// re-sent.
    ///
    /// A no-op when this instance is not the leader. The dispatcher appends
    /// an audit event per re-send, which refreshes the transaction's last
    /// activity and spaces consecutive re-sends a full threshold apart.
    pub async fn resend_unacked_once(&self) -> Result<usize> {
        if !self.oracle.is_leader() {
            return Ok(0);
        }

        let cutoff = Utc::now() - chrono::Duration::seconds(self.resend_after.as_secs() as i64);
        let open = self.log.find_non_terminal(Utc::now()).await?;
        let mut resent = 0;
        for global_tx_id in open {
            let events = self.log.events_for(global_tx_id).await?;
            let quiet = events.last().is_some_and(|e| e.timestamp <= cutoff);
            if !quiet {
                continue;
            }
            let commands = self.router.redispatch_outstanding(global_tx_id).await?;
            if commands > 0 {
                metrics::counter!("commands_resent_total").increment(commands as u64);
                tracing::warn!(
                    global_tx_id = %global_tx_id,
                    commands,
                    "re-sent commands with overdue acknowledgments"
                );
                resent += 1;
            }
        }
        Ok(resent)
    }

    /// Spawns the periodic scan loop. Abort the handle to stop it.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.scan_once().await {
                    Ok(0) => {}
                    Ok(count) => {
                        tracing::info!(count, "timed out overdue transactions");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "timeout scan failed");
                    }
                }
                if let Err(err) = self.resend_unacked_once().await {
                    tracing::error!(error = %err, "unacked-command sweep failed");
                }
            }
        })
    }
}
