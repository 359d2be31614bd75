//! Live state of one call and the handle the rest of the process sees
//!
//! A [`CallSession`] is moved into its own task and is the only writer of
//! its transcript and lead. Everything else observes the call through its
//! [`CallHandle`]: watch channels for the lead and state, and a signal
//! channel for DTMF and hang-up notices.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{CallId, CallState, Role, StopReason, Transcript, TurnController, TurnOutcome};
use crate::lead::LeadRecord;
use crate::script;

/// Out-of-band notice delivered to a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallSignal {
    /// Caller pressed a key
    Dtmf(String),
    /// The channel is gone
    HungUp,
}

/// Final record of a finished call
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub call_id: CallId,
    pub lead: LeadRecord,
    pub transcript: Transcript,
    pub turns: u32,
    pub stop_reason: StopReason,
    pub duration: Duration,
    pub dtmf: Vec<String>,
}

/// Mutable state of one in-progress call
pub struct CallSession {
    id: CallId,
    caller: String,
    transcript: Transcript,
    lead: LeadRecord,
    turn_count: u32,
    no_input_count: u32,
    state: CallState,
    lead_tx: watch::Sender<LeadRecord>,
    state_tx: watch::Sender<CallState>,
    signals: mpsc::UnboundedReceiver<CallSignal>,
    shutdown: watch::Receiver<bool>,
    hung_up: bool,
    dtmf: Vec<String>,
    started: Instant,
}

impl CallSession {
    /// Create a session and the handle that observes it
    #[must_use]
    pub fn new(
        id: CallId,
        caller: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, CallHandle) {
        let caller = caller.into();
        let started_at = Utc::now();
        let lead = LeadRecord::new(caller.clone(), started_at);
        let (lead_tx, lead_rx) = watch::channel(lead.clone());
        let (state_tx, state_rx) = watch::channel(CallState::Created);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (hangup_tx, _) = watch::channel(false);
        let started = Instant::now();

        let handle = CallHandle {
            call_id: id.clone(),
            caller: caller.clone(),
            started_at,
            started,
            lead: lead_rx,
            state: state_rx,
            signals: signal_tx,
            hangup: hangup_tx,
            task: Mutex::new(None),
        };

        let session = Self {
            id,
            caller,
            transcript: Transcript::new(),
            lead,
            turn_count: 0,
            no_input_count: 0,
            state: CallState::Created,
            lead_tx,
            state_tx,
            signals: signal_rx,
            shutdown,
            hung_up: false,
            dtmf: Vec::new(),
            started,
        };

        (session, handle)
    }

    #[must_use]
    pub const fn id(&self) -> &CallId {
        &self.id
    }

    #[must_use]
    pub fn caller(&self) -> &str {
        &self.caller
    }

    #[must_use]
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[must_use]
    pub const fn lead(&self) -> &LeadRecord {
        &self.lead
    }

    /// Completed exchanges so far
    #[must_use]
    pub const fn turn_count(&self) -> u32 {
        self.turn_count
    }

    /// Listens that produced no usable speech
    #[must_use]
    pub const fn no_input_count(&self) -> u32 {
        self.no_input_count
    }

    #[must_use]
    pub const fn state(&self) -> CallState {
        self.state
    }

    /// DTMF digits received so far
    #[must_use]
    pub fn dtmf(&self) -> &[String] {
        &self.dtmf
    }

    /// Drive the call from answer to hang-up
    ///
    /// Never fails: every fault is turned into a stop reason, and a caller
    /// who is still on the line always hears a closing script.
    pub async fn run(mut self, turns: &TurnController) -> CallSummary {
        tracing::info!(call_id = %self.id, caller = %self.caller, "call session started");
        let telephony = turns.telephony();

        if let Err(e) = telephony.answer(&self.id).await {
            tracing::error!(call_id = %self.id, error = %e, "failed to answer call");
            if let Err(e) = telephony.teardown(&self.id).await {
                tracing::warn!(call_id = %self.id, error = %e, "teardown failed");
            }
            self.enter(CallState::Ended);
            return self.finish(StopReason::Failed);
        }

        self.enter(CallState::Greeting);
        turns.speak(&self.id, script::GREETING).await;
        self.enter(CallState::Conversing);

        let reason = loop {
            match turns.run_turn(&mut self).await {
                Ok(TurnOutcome::Continue) => {}
                Ok(TurnOutcome::Stop(reason)) => break reason,
                Err(e) => {
                    tracing::error!(call_id = %self.id, error = %e, "turn failed, closing call");
                    break StopReason::Failed;
                }
            }
        };

        self.drain_signals();
        if self.hung_up {
            tracing::info!(call_id = %self.id, "caller hung up");
            self.enter(CallState::Ended);
            return self.finish(StopReason::HungUp);
        }

        self.enter(CallState::Closing);
        let qualified = !reason.is_forced() && self.lead.is_qualified();
        turns.speak(&self.id, script::closing_for(qualified)).await;

        if let Err(e) = telephony.teardown(&self.id).await {
            tracing::warn!(call_id = %self.id, error = %e, "teardown failed");
        }
        self.enter(CallState::Ended);
        self.finish(reason)
    }

    /// Pending hang-up or shutdown, after applying any queued signals
    pub(crate) fn interruption(&mut self) -> Option<StopReason> {
        self.drain_signals();
        if self.hung_up {
            Some(StopReason::HungUp)
        } else if *self.shutdown.borrow() {
            Some(StopReason::Shutdown)
        } else {
            None
        }
    }

    pub(crate) fn record(&mut self, role: Role, text: &str) {
        self.transcript.push(role, text);
    }

    pub(crate) fn update_lead(&mut self, utterance: &str) {
        self.lead = self.lead.extract(utterance);
        self.lead_tx.send_replace(self.lead.clone());
    }

    pub(crate) fn note_no_input(&mut self) -> u32 {
        self.no_input_count += 1;
        self.no_input_count
    }

    pub(crate) fn complete_turn(&mut self) -> u32 {
        self.turn_count += 1;
        self.turn_count
    }

    fn drain_signals(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            match signal {
                CallSignal::Dtmf(digit) => {
                    tracing::info!(call_id = %self.id, digit = %digit, "DTMF received");
                    self.dtmf.push(digit);
                }
                CallSignal::HungUp => self.hung_up = true,
            }
        }
    }

    fn enter(&mut self, next: CallState) {
        match self.state.transition(next) {
            Ok(state) => {
                tracing::debug!(call_id = %self.id, from = %self.state, to = %state, "call state");
                self.state = state;
                self.state_tx.send_replace(state);
            }
            Err(e) => tracing::error!(call_id = %self.id, error = %e, "refusing state change"),
        }
    }

    fn finish(self, stop_reason: StopReason) -> CallSummary {
        let duration = self.started.elapsed();
        tracing::info!(
            call_id = %self.id,
            reason = %stop_reason,
            turns = self.turn_count,
            qualified = self.lead.is_qualified(),
            "call session ended"
        );

        CallSummary {
            call_id: self.id,
            lead: self.lead,
            transcript: self.transcript,
            turns: self.turn_count,
            stop_reason,
            duration,
            dtmf: self.dtmf,
        }
    }
}

/// Point-in-time view of an active call
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub caller: String,
    pub started_at: DateTime<Utc>,
    pub state: CallState,
    pub lead: LeadRecord,
}

/// Shared, read-mostly view of a call held by the registry
pub struct CallHandle {
    call_id: CallId,
    caller: String,
    started_at: DateTime<Utc>,
    started: Instant,
    lead: watch::Receiver<LeadRecord>,
    state: watch::Receiver<CallState>,
    signals: mpsc::UnboundedSender<CallSignal>,
    hangup: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<CallSummary>>>,
}

impl CallHandle {
    #[must_use]
    pub const fn call_id(&self) -> &CallId {
        &self.call_id
    }

    #[must_use]
    pub fn caller(&self) -> &str {
        &self.caller
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time since the session was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Latest lead published by the session
    #[must_use]
    pub fn lead(&self) -> LeadRecord {
        self.lead.borrow().clone()
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            call_id: self.call_id.clone(),
            caller: self.caller.clone(),
            started_at: self.started_at,
            state: self.state(),
            lead: self.lead(),
        }
    }

    /// Forward a DTMF digit; false if the session is gone
    pub fn send_dtmf(&self, digit: impl Into<String>) -> bool {
        self.signals.send(CallSignal::Dtmf(digit.into())).is_ok()
    }

    /// Tell the session its channel is gone
    pub fn hang_up(&self) {
        self.hangup.send_replace(true);
        // Session may already be finished
        let _ = self.signals.send(CallSignal::HungUp);
    }

    #[must_use]
    pub fn is_hung_up(&self) -> bool {
        *self.hangup.borrow()
    }

    /// Resolves once [`CallHandle::hang_up`] has been called
    pub async fn hung_up(&self) {
        let mut rx = self.hangup.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|hung_up| *hung_up).await;
    }

    /// Attach the task running this call's session
    pub fn attach(&self, task: JoinHandle<CallSummary>) {
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Take the session task, if still attached
    pub fn take_task(&self) -> Option<JoinHandle<CallSummary>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("call_id", &self.call_id)
            .field("caller", &self.caller)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
