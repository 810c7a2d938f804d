//! Per-global-transaction state machine.
//!
//! A [`GlobalTransaction`] consumes [`TxEvent`]s and emits [`Action`]s:
//! compensation/coordination commands for the dispatcher and terminal
//! markers for the log. The transition function is pure (no I/O), which is
//! what makes the machine rebuildable from the log by replay and directly
//! testable without any runtime.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{GlobalTxId, LocalTxId};
use serde::{Deserialize, Serialize};
use txlog::{EventId, EventType, TxEvent, TxStatus};

use crate::state::{GlobalTxState, TxState};

/// Default compensation retry budget when the participant did not request one.
pub const DEFAULT_RETRY_BUDGET: i32 = 5;

/// Which TCC coordination command to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateKind {
    Confirm,
    Cancel,
}

impl CoordinateKind {
    /// Returns the command name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinateKind::Confirm => "Confirm",
            CoordinateKind::Cancel => "Cancel",
        }
    }
}

/// A compensation command for one committed sub-transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensateCommand {
    pub global_tx_id: GlobalTxId,
    pub local_tx_id: LocalTxId,
    pub service_name: String,
    pub instance_id: String,
    pub method: String,
    pub payload: Vec<u8>,
    /// 1-based attempt number; attempts after the first are delayed.
    pub attempt: i32,
}

/// A TCC confirm/cancel command for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateCommand {
    pub global_tx_id: GlobalTxId,
    pub local_tx_id: LocalTxId,
    pub service_name: String,
    pub instance_id: String,
    pub kind: CoordinateKind,
    pub method: String,
    pub payload: Vec<u8>,
}

/// A decision produced by applying an event to the state machine.
///
/// The machine never performs I/O itself; the routing worker executes
/// these actions (dispatch via the dispatcher, marker append via the log).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a compensation command to the owning participant.
    Compensate(CompensateCommand),

    /// Send a TCC confirm/cancel command to a participant.
    Coordinate(CoordinateCommand),

    /// Append a terminal marker event (`SagaEnded` or `SagaSuspended`)
    /// so that terminality is decidable from the log alone.
    AppendMarker {
        event_type: EventType,
        reason: String,
    },
}

/// One participant's unit of work within a global transaction.
///
/// Owned exclusively by its parent [`GlobalTransaction`]; ordered by
/// arrival so that reverse traversal yields the compensation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTransaction {
    pub local_tx_id: LocalTxId,
    pub parent_tx_id: Option<LocalTxId>,
    pub service_name: String,
    pub instance_id: String,
    pub state: TxState,
    pub begin_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub compensation_method: Option<String>,
    pub confirm_method: Option<String>,
    pub cancel_method: Option<String>,
    /// Compensation arguments captured from the start event.
    pub payload: Vec<u8>,
    /// Participant-requested retry budget; <= 0 means coordinator default.
    pub retries: i32,
    /// Compensation attempts made so far.
    pub attempts: i32,
}

impl SubTransaction {
    fn from_event(event: &TxEvent, local_tx_id: LocalTxId) -> Self {
        Self {
            local_tx_id,
            parent_tx_id: event.parent_tx_id,
            service_name: event.service_name.clone(),
            instance_id: event.instance_id.clone(),
            state: TxState::Active,
            begin_time: event.timestamp,
            end_time: None,
            compensation_method: event.compensation_method.clone(),
            confirm_method: event.confirm_method.clone(),
            cancel_method: event.cancel_method.clone(),
            payload: event.payload.clone(),
            retries: event.retries,
            attempts: 0,
        }
    }

    /// Effective retry budget for this sub-transaction.
    fn retry_budget(&self, default_budget: i32) -> i32 {
        if self.retries > 0 {
            self.retries
        } else {
            default_budget
        }
    }

    /// Moves to `next` only if it is strictly later in the total order.
    /// Returns true if the state changed.
    fn advance(&mut self, next: TxState) -> bool {
        if next.rank() > self.state.rank() {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Whether a global transaction follows the saga or the TCC protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    Saga,
    Tcc,
}

impl TxKind {
    /// Returns the protocol name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Saga => "Saga",
            TxKind::Tcc => "Tcc",
        }
    }
}

/// The authoritative state for one global transaction.
#[derive(Debug, Clone)]
pub struct GlobalTransaction {
    global_tx_id: Option<GlobalTxId>,
    kind: Option<TxKind>,
    state: GlobalTxState,
    begin_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    expiration_time: Option<DateTime<Utc>>,
    tcc_status: Option<TxStatus>,
    suspend_reason: Option<String>,
    subs: Vec<SubTransaction>,
    /// Compensation/coordination commands in flight, awaiting acks.
    pending_acks: usize,
    default_retry_budget: i32,
    /// Event ids already applied; an exact redelivery is a no-op.
    seen: HashSet<EventId>,
}

impl Default for GlobalTransaction {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BUDGET)
    }
}

impl GlobalTransaction {
    /// Creates an empty machine with the given default retry budget.
    pub fn new(default_retry_budget: i32) -> Self {
        Self {
            global_tx_id: None,
            kind: None,
            state: GlobalTxState::Started,
            begin_time: None,
            end_time: None,
            expiration_time: None,
            tcc_status: None,
            suspend_reason: None,
            subs: Vec::new(),
            pending_acks: 0,
            default_retry_budget,
            seen: HashSet::new(),
        }
    }

    /// Rebuilds a machine by replaying logged events, discarding actions.
    ///
    /// Used on crash recovery and by the read-only query surface. After a
    /// replay, [`GlobalTransaction::outstanding_actions`] yields the
    /// commands that still await acknowledgment.
    pub fn from_events<'a>(
        events: impl IntoIterator<Item = &'a TxEvent>,
        default_retry_budget: i32,
    ) -> Self {
        let mut machine = Self::new(default_retry_budget);
        for event in events {
            let _ = machine.apply(event);
        }
        machine
    }

    /// Applies one event, returning the actions it triggers.
    ///
    /// Duplicate events (same id, or a lifecycle event for a sub-transaction
    /// already at an equal-or-later state) are absorbed as no-ops.
    pub fn apply(&mut self, event: &TxEvent) -> Vec<Action> {
        if !self.seen.insert(event.event_id) {
            tracing::debug!(event_id = %event.event_id, "duplicate event ignored");
            return Vec::new();
        }

        match event.event_type {
            EventType::SagaStarted => self.on_saga_started(event),
            EventType::TxStarted => self.on_tx_started(event),
            EventType::TxEnded => self.on_tx_ended(event),
            EventType::TxAborted => self.on_tx_aborted(event),
            EventType::SagaTimedOut => self.on_saga_timed_out(event),
            EventType::SagaEnded => self.on_saga_ended(event),
            EventType::TxCompensated => self.on_tx_compensated(event),
            EventType::SagaSuspended => self.on_saga_suspended(event),
            EventType::TccStarted => self.on_tcc_started(event),
            EventType::ParticipationStarted => self.on_participation_started(event),
            EventType::ParticipationEnded => self.on_participation_ended(event),
            EventType::TccEnded => self.on_tcc_ended(event),
            EventType::Coordinated => self.on_coordinated(event),
            // Dispatcher audit records carry no state.
            EventType::CompensationSent | EventType::CoordinationSent => Vec::new(),
        }
    }

    fn init(&mut self, event: &TxEvent, kind: TxKind) {
        if self.global_tx_id.is_none() {
            self.global_tx_id = Some(event.global_tx_id);
            self.kind = Some(kind);
            self.begin_time = Some(event.timestamp);
        }
    }

    fn on_saga_started(&mut self, event: &TxEvent) -> Vec<Action> {
        self.init(event, TxKind::Saga);
        if self.state == GlobalTxState::Started && self.expiration_time.is_none() {
            self.expiration_time = event.deadline();
        }
        Vec::new()
    }

    fn on_tx_started(&mut self, event: &TxEvent) -> Vec<Action> {
        let Some(local_tx_id) = event.local_tx_id else {
            return self.drop_invalid(event, "TxStarted without local_tx_id");
        };
        if !self.state.accepts_participant_events() {
            return self.drop_late(event);
        }
        self.init(event, TxKind::Saga);
        if self.find_sub(local_tx_id).is_none() {
            self.subs.push(SubTransaction::from_event(event, local_tx_id));
        }
        Vec::new()
    }

    fn on_tx_ended(&mut self, event: &TxEvent) -> Vec<Action> {
        let Some(local_tx_id) = event.local_tx_id else {
            return self.drop_invalid(event, "TxEnded without local_tx_id");
        };
        if self.state.is_terminal() {
            return self.drop_late(event);
        }
        let compensating = self.state == GlobalTxState::Compensating;
        let global_tx_id = event.global_tx_id;
        let Some(sub) = self.find_sub_mut(local_tx_id) else {
            return self.drop_late(event);
        };
        if !sub.advance(TxState::Committed) {
            return Vec::new();
        }
        sub.end_time = Some(event.timestamp);

        // A commit that lands after the abort was processed must still be
        // undone, or the participant's work would survive a failed saga.
        if compensating {
            if let Some(cmd) = Self::compensate_sub(global_tx_id, sub) {
                self.pending_acks += 1;
                return vec![Action::Compensate(cmd)];
            }
        }
        Vec::new()
    }

    fn on_tx_aborted(&mut self, event: &TxEvent) -> Vec<Action> {
        if !self.state.accepts_participant_events() {
            return self.drop_late(event);
        }
        self.init(event, TxKind::Saga);
        if let Some(local_tx_id) = event.local_tx_id {
            match self.find_sub_mut(local_tx_id) {
                Some(sub) => {
                    sub.advance(TxState::Failed);
                    sub.end_time = Some(event.timestamp);
                }
                // Record aborts for sub-transactions we never saw start.
                None => {
                    let mut sub = SubTransaction::from_event(event, local_tx_id);
                    sub.state = TxState::Failed;
                    sub.end_time = Some(event.timestamp);
                    self.subs.push(sub);
                }
            }
        }
        self.begin_compensation(event.global_tx_id, event.timestamp)
    }

    fn on_saga_timed_out(&mut self, event: &TxEvent) -> Vec<Action> {
        if !self.state.accepts_participant_events() {
            return self.drop_late(event);
        }
        metrics::counter!("transactions_timed_out_total").increment(1);
        tracing::warn!(global_tx_id = %event.global_tx_id, "transaction timed out");
        match self.kind {
            // TCC participants hold reservations; a timeout releases them
            // through the cancel flow, never through saga compensation.
            Some(TxKind::Tcc) => {
                self.tcc_status = Some(TxStatus::Failed);
                self.coordinate(event.global_tx_id, CoordinateKind::Cancel, event.timestamp)
            }
            _ => self.begin_compensation(event.global_tx_id, event.timestamp),
        }
    }

    fn on_saga_ended(&mut self, event: &TxEvent) -> Vec<Action> {
        // Also applied on replay of coordinator-appended markers, where the
        // state is already Compensated/Committed; only Started commits.
        if self.state == GlobalTxState::Started {
            self.state = GlobalTxState::Committed;
            self.end_time = Some(event.timestamp);
        }
        Vec::new()
    }

    fn on_tx_compensated(&mut self, event: &TxEvent) -> Vec<Action> {
        let Some(local_tx_id) = event.local_tx_id else {
            return self.drop_invalid(event, "TxCompensated without local_tx_id");
        };
        if matches!(
            self.state,
            GlobalTxState::Committed | GlobalTxState::Compensated
        ) {
            return self.drop_late(event);
        }
        let default_budget = self.default_retry_budget;
        let global_tx_id = event.global_tx_id;
        let Some(sub) = self.find_sub_mut(local_tx_id) else {
            return self.drop_late(event);
        };
        // Only the first terminal ack counts; later ones are no-ops.
        match event.status.unwrap_or(TxStatus::Succeed) {
            TxStatus::Succeed => {
                if !sub.advance(TxState::CompensatedSucceed) {
                    return Vec::new();
                }
                sub.end_time = Some(event.timestamp);
                self.pending_acks = self.pending_acks.saturating_sub(1);
                metrics::counter!("compensations_succeeded_total").increment(1);
                self.try_finish_compensation(event.timestamp)
            }
            TxStatus::Failed => {
                if sub.state != TxState::CompensationSent {
                    return Vec::new();
                }
                sub.state = TxState::CompensatedFailed;
                let budget = sub.retry_budget(default_budget);
                let exhausted = sub.attempts >= budget;
                let retry = if exhausted {
                    None
                } else {
                    sub.state = TxState::CompensationSent;
                    Self::compensate_sub_unchecked(global_tx_id, sub)
                };
                self.pending_acks = self.pending_acks.saturating_sub(1);
                metrics::counter!("compensations_failed_total").increment(1);

                if let Some(cmd) = retry {
                    self.pending_acks += 1;
                    return vec![Action::Compensate(cmd)];
                }
                if exhausted {
                    return self.suspend(format!(
                        "compensation of {local_tx_id} failed after {budget} attempts"
                    ));
                }
                Vec::new()
            }
        }
    }

    fn on_saga_suspended(&mut self, event: &TxEvent) -> Vec<Action> {
        // Marker replay; the live transition happened via suspend().
        if !matches!(
            self.state,
            GlobalTxState::Committed | GlobalTxState::Compensated
        ) {
            self.state = GlobalTxState::Suspended;
            self.end_time = Some(event.timestamp);
            if self.suspend_reason.is_none() && !event.payload.is_empty() {
                self.suspend_reason = Some(String::from_utf8_lossy(&event.payload).into_owned());
            }
        }
        Vec::new()
    }

    fn on_tcc_started(&mut self, event: &TxEvent) -> Vec<Action> {
        self.init(event, TxKind::Tcc);
        if self.state == GlobalTxState::Started && self.expiration_time.is_none() {
            self.expiration_time = event.deadline();
        }
        Vec::new()
    }

    fn on_participation_started(&mut self, event: &TxEvent) -> Vec<Action> {
        let Some(local_tx_id) = event.local_tx_id else {
            return self.drop_invalid(event, "ParticipationStarted without local_tx_id");
        };
        if !self.state.accepts_participant_events() {
            return self.drop_late(event);
        }
        self.init(event, TxKind::Tcc);
        if self.find_sub(local_tx_id).is_none() {
            self.subs.push(SubTransaction::from_event(event, local_tx_id));
        }
        Vec::new()
    }

    fn on_participation_ended(&mut self, event: &TxEvent) -> Vec<Action> {
        let Some(local_tx_id) = event.local_tx_id else {
            return self.drop_invalid(event, "ParticipationEnded without local_tx_id");
        };
        if !self.state.accepts_participant_events() {
            return self.drop_late(event);
        }
        let status = event.status.unwrap_or(TxStatus::Succeed);
        let timestamp = event.timestamp;
        let Some(sub) = self.find_sub_mut(local_tx_id) else {
            return self.drop_late(event);
        };
        let next = match status {
            TxStatus::Succeed => TxState::Committed,
            TxStatus::Failed => TxState::Failed,
        };
        if sub.advance(next) {
            sub.end_time = Some(timestamp);
        }
        Vec::new()
    }

    fn on_tcc_ended(&mut self, event: &TxEvent) -> Vec<Action> {
        if self.state != GlobalTxState::Started {
            return self.drop_late(event);
        }
        self.init(event, TxKind::Tcc);
        let status = event.status.unwrap_or(TxStatus::Succeed);
        self.tcc_status = Some(status);
        let kind = match status {
            TxStatus::Succeed => CoordinateKind::Confirm,
            TxStatus::Failed => CoordinateKind::Cancel,
        };
        self.coordinate(event.global_tx_id, kind, event.timestamp)
    }

    /// Issues a confirm or cancel command to every eligible participant and
    /// moves to `Coordinating` (or straight to terminal when none is
    /// eligible).
    fn coordinate(
        &mut self,
        global_tx_id: GlobalTxId,
        kind: CoordinateKind,
        timestamp: DateTime<Utc>,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        for sub in &mut self.subs {
            let eligible = match kind {
                // Only participants whose Try succeeded are confirmed.
                CoordinateKind::Confirm => sub.state == TxState::Committed,
                // Cancel also reaches participants still mid-Try.
                CoordinateKind::Cancel => {
                    matches!(sub.state, TxState::Active | TxState::Committed)
                }
            };
            if !eligible {
                continue;
            }
            let method = match kind {
                CoordinateKind::Confirm => sub.confirm_method.clone(),
                CoordinateKind::Cancel => sub.cancel_method.clone(),
            };
            let Some(method) = method else {
                tracing::warn!(
                    local_tx_id = %sub.local_tx_id,
                    kind = kind.as_str(),
                    "participant registered no method for coordination"
                );
                continue;
            };
            sub.state = TxState::CompensationSent;
            sub.attempts += 1;
            self.pending_acks += 1;
            actions.push(Action::Coordinate(CoordinateCommand {
                global_tx_id,
                local_tx_id: sub.local_tx_id,
                service_name: sub.service_name.clone(),
                instance_id: sub.instance_id.clone(),
                kind,
                method,
                payload: sub.payload.clone(),
            }));
        }

        if actions.is_empty() {
            return self.finish_tcc(timestamp);
        }
        self.state = GlobalTxState::Coordinating;
        actions
    }

    fn on_coordinated(&mut self, event: &TxEvent) -> Vec<Action> {
        let Some(local_tx_id) = event.local_tx_id else {
            return self.drop_invalid(event, "Coordinated without local_tx_id");
        };
        if self.state != GlobalTxState::Coordinating {
            return self.drop_late(event);
        }
        let timestamp = event.timestamp;
        let Some(sub) = self.find_sub_mut(local_tx_id) else {
            return self.drop_late(event);
        };
        if !sub.advance(TxState::CompensatedSucceed) {
            return Vec::new();
        }
        sub.end_time = Some(timestamp);
        self.pending_acks = self.pending_acks.saturating_sub(1);
        if self.pending_acks == 0 {
            return self.finish_tcc(timestamp);
        }
        Vec::new()
    }

    /// Suspends the transaction permanently and emits the log marker.
    fn suspend(&mut self, reason: String) -> Vec<Action> {
        self.state = GlobalTxState::Suspended;
        self.end_time = Some(Utc::now());
        self.suspend_reason = Some(reason.clone());
        metrics::counter!("transactions_suspended_total").increment(1);
        tracing::error!(
            global_tx_id = ?self.global_tx_id,
            reason = %reason,
            "transaction suspended; operator attention required"
        );
        vec![Action::AppendMarker {
            event_type: EventType::SagaSuspended,
            reason,
        }]
    }

    /// Starts compensating every committed sub-transaction, in reverse
    /// insertion order (later commits are undone first).
    fn begin_compensation(
        &mut self,
        global_tx_id: GlobalTxId,
        timestamp: DateTime<Utc>,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        for sub in self.subs.iter_mut().rev() {
            if sub.state != TxState::Committed {
                continue;
            }
            if let Some(cmd) = Self::compensate_sub(global_tx_id, sub) {
                self.pending_acks += 1;
                actions.push(Action::Compensate(cmd));
            }
        }

        if actions.is_empty() {
            // Nothing committed, so nothing to undo.
            self.state = GlobalTxState::Compensated;
            self.end_time = Some(timestamp);
            return vec![Action::AppendMarker {
                event_type: EventType::SagaEnded,
                reason: String::new(),
            }];
        }
        self.state = GlobalTxState::Compensating;
        actions
    }

    /// Builds a compensate command for a committed sub-transaction and
    /// marks it in flight. Returns None if the participant never supplied
    /// a compensation method.
    fn compensate_sub(
        global_tx_id: GlobalTxId,
        sub: &mut SubTransaction,
    ) -> Option<CompensateCommand> {
        if sub.state != TxState::Committed {
            return None;
        }
        sub.state = TxState::CompensationSent;
        Self::compensate_sub_unchecked(global_tx_id, sub)
    }

    fn compensate_sub_unchecked(
        global_tx_id: GlobalTxId,
        sub: &mut SubTransaction,
    ) -> Option<CompensateCommand> {
        let Some(method) = sub.compensation_method.clone() else {
            tracing::warn!(
                local_tx_id = %sub.local_tx_id,
                "sub-transaction has no compensation method; skipping"
            );
            sub.state = TxState::CompensatedSucceed;
            return None;
        };
        sub.attempts += 1;
        Some(CompensateCommand {
            global_tx_id,
            local_tx_id: sub.local_tx_id,
            service_name: sub.service_name.clone(),
            instance_id: sub.instance_id.clone(),
            method,
            payload: sub.payload.clone(),
            attempt: sub.attempts,
        })
    }

    /// Moves to Compensated once no compensation remains outstanding.
    fn try_finish_compensation(&mut self, timestamp: DateTime<Utc>) -> Vec<Action> {
        let outstanding = self
            .subs
            .iter()
            .any(|sub| sub.state.compensation_outstanding());
        if self.pending_acks == 0 && !outstanding && self.state == GlobalTxState::Compensating {
            self.state = GlobalTxState::Compensated;
            self.end_time = Some(timestamp);
            return vec![Action::AppendMarker {
                event_type: EventType::SagaEnded,
                reason: String::new(),
            }];
        }
        Vec::new()
    }

    fn finish_tcc(&mut self, timestamp: DateTime<Utc>) -> Vec<Action> {
        self.state = match self.tcc_status {
            Some(TxStatus::Failed) => GlobalTxState::Compensated,
            _ => GlobalTxState::Committed,
        };
        self.end_time = Some(timestamp);
        vec![Action::AppendMarker {
            event_type: EventType::SagaEnded,
            reason: String::new(),
        }]
    }

    fn drop_late(&self, event: &TxEvent) -> Vec<Action> {
        metrics::counter!("events_dropped_total").increment(1);
        tracing::info!(
            global_tx_id = %event.global_tx_id,
            event_type = %event.event_type,
            state = %self.state,
            "event arrived after the transaction stopped accepting it; dropped"
        );
        Vec::new()
    }

    fn drop_invalid(&self, event: &TxEvent, reason: &str) -> Vec<Action> {
        metrics::counter!("events_dropped_total").increment(1);
        tracing::warn!(
            global_tx_id = %event.global_tx_id,
            event_type = %event.event_type,
            reason,
            "invalid event dropped"
        );
        Vec::new()
    }

    fn find_sub(&self, local_tx_id: LocalTxId) -> Option<&SubTransaction> {
        self.subs.iter().find(|sub| sub.local_tx_id == local_tx_id)
    }

    fn find_sub_mut(&mut self, local_tx_id: LocalTxId) -> Option<&mut SubTransaction> {
        self.subs
            .iter_mut()
            .find(|sub| sub.local_tx_id == local_tx_id)
    }

    /// Commands still awaiting acknowledgment, re-derivable after replay.
    ///
    /// Compensation methods are idempotent at the participant by contract,
    /// so re-dispatching after a crash is safe.
    pub fn outstanding_actions(&self) -> Vec<Action> {
        let Some(global_tx_id) = self.global_tx_id else {
            return Vec::new();
        };
        let mut actions = Vec::new();
        // Reverse insertion order, matching the order the commands were
        // first dispatched in.
        for sub in self.subs.iter().rev() {
            if sub.state != TxState::CompensationSent {
                continue;
            }
            match self.kind {
                Some(TxKind::Tcc) => {
                    let kind = match self.tcc_status {
                        Some(TxStatus::Failed) => CoordinateKind::Cancel,
                        _ => CoordinateKind::Confirm,
                    };
                    let method = match kind {
                        CoordinateKind::Confirm => sub.confirm_method.clone(),
                        CoordinateKind::Cancel => sub.cancel_method.clone(),
                    };
                    if let Some(method) = method {
                        actions.push(Action::Coordinate(CoordinateCommand {
                            global_tx_id,
                            local_tx_id: sub.local_tx_id,
                            service_name: sub.service_name.clone(),
                            instance_id: sub.instance_id.clone(),
                            kind,
                            method,
                            payload: sub.payload.clone(),
                        }));
                    }
                }
                _ => {
                    if let Some(method) = sub.compensation_method.clone() {
                        actions.push(Action::Compensate(CompensateCommand {
                            global_tx_id,
                            local_tx_id: sub.local_tx_id,
                            service_name: sub.service_name.clone(),
                            instance_id: sub.instance_id.clone(),
                            method,
                            payload: sub.payload.clone(),
                            attempt: sub.attempts,
                        }));
                    }
                }
            }
        }
        actions
    }
}

// Query methods
impl GlobalTransaction {
    /// Returns the global transaction ID, if any event has been applied.
    pub fn global_tx_id(&self) -> Option<GlobalTxId> {
        self.global_tx_id
    }

    /// Returns the protocol kind (saga or TCC).
    pub fn kind(&self) -> Option<TxKind> {
        self.kind
    }

    /// Returns the aggregate state.
    pub fn state(&self) -> GlobalTxState {
        self.state
    }

    /// Returns true if the transaction needs no further coordinator work.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns when the first event arrived.
    pub fn begin_time(&self) -> Option<DateTime<Utc>> {
        self.begin_time
    }

    /// Returns when the transaction reached a terminal state.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Returns the declared deadline, if the start event carried a timeout.
    pub fn expiration_time(&self) -> Option<DateTime<Utc>> {
        self.expiration_time
    }

    /// Returns the sub-transactions in arrival order.
    pub fn sub_transactions(&self) -> &[SubTransaction] {
        &self.subs
    }

    /// Returns the number of commands in flight awaiting acks.
    pub fn pending_acks(&self) -> usize {
        self.pending_acks
    }

    /// Returns the reason the transaction was suspended, if it was.
    pub fn suspend_reason(&self) -> Option<&str> {
        self.suspend_reason.as_deref()
    }
}
