//! Routes telephony events to call sessions
//!
//! Each accepted call gets two tasks: the session itself, and a finalizer
//! that waits for it to end, removes it from the registry, and persists
//! its lead. The finalizer also enforces the grace period after a hang-up
//! or shutdown, aborting sessions that do not wind down in time.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::{CallHandle, CallId, CallRegistry, CallSummary, TurnController};
use crate::leads::{LeadSink, append_with_retry};
use crate::retry::RetryPolicy;
use crate::script;
use crate::telephony::{EventKind, TelephonyEvent};
use crate::{Error, Result};

/// Default time a session gets to close after hang-up or shutdown
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

struct Shared {
    registry: Arc<CallRegistry>,
    turns: Arc<TurnController>,
    leads: Arc<dyn LeadSink>,
    persist_retry: RetryPolicy,
    grace: Duration,
}

/// Consumes inbound telephony events
pub struct EventDispatcher {
    shared: Arc<Shared>,
    finalizers: Mutex<JoinSet<()>>,
}

impl EventDispatcher {
    /// `grace` bounds how long a call may take to close after hang-up or
    /// shutdown. `persist_retry` governs lead appends.
    #[must_use]
    pub fn new(
        registry: Arc<CallRegistry>,
        turns: Arc<TurnController>,
        leads: Arc<dyn LeadSink>,
        grace: Duration,
        persist_retry: RetryPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                turns,
                leads,
                persist_retry,
                grace,
            }),
            finalizers: Mutex::new(JoinSet::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CallRegistry> {
        &self.shared.registry
    }

    /// Route one event
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateCall` or `Error::ShuttingDown` when a
    /// call-started event cannot be accepted. The event is dropped either way.
    pub fn dispatch(&self, event: TelephonyEvent) -> Result<()> {
        let TelephonyEvent {
            call_id,
            caller,
            kind,
        } = event;

        match kind {
            EventKind::CallStarted => {
                let (handle, session) = self.shared.registry.create(call_id, caller)?;
                tracing::info!(
                    call_id = %handle.call_id(),
                    caller = %handle.caller(),
                    active = self.shared.registry.len(),
                    "call started"
                );

                let turns = Arc::clone(&self.shared.turns);
                let task = tokio::spawn(async move { session.run(&turns).await });
                handle.attach(task);

                let shared = Arc::clone(&self.shared);
                let mut finalizers = self.finalizers_lock();
                reap(&mut finalizers);
                finalizers.spawn(async move { finalize(shared, handle).await });
            }
            EventKind::CallEnded => match self.shared.registry.get(&call_id) {
                Ok(handle) => {
                    tracing::info!(call_id = %call_id, "call ended by network");
                    handle.hang_up();
                }
                Err(_) => tracing::debug!(call_id = %call_id, "call end for finished call"),
            },
            EventKind::Signal(digit) => match self.shared.registry.get(&call_id) {
                Ok(handle) if handle.send_dtmf(digit.clone()) => {}
                _ => tracing::info!(call_id = %call_id, digit = %digit, "signal for unknown call, dropping"),
            },
            EventKind::Other(kind) => {
                tracing::debug!(call_id = %call_id, kind = %kind, "ignoring telephony event");
            }
        }

        Ok(())
    }

    /// Dispatch events until the sender side closes
    ///
    /// Borrows the receiver so the daemon can keep draining the same
    /// channel while calls wind down during shutdown.
    pub async fn run(&self, events: &mut mpsc::Receiver<TelephonyEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.dispatch(event) {
                match e {
                    Error::ShuttingDown => tracing::info!("rejecting call during shutdown"),
                    e => tracing::warn!(error = %e, "dropping telephony event"),
                }
            }
        }
        tracing::debug!("telephony event channel closed");
    }

    /// Wait until every accepted call has been finalized
    pub async fn wait_idle(&self) {
        loop {
            let mut finalizers = std::mem::take(&mut *self.finalizers_lock());
            if finalizers.is_empty() {
                return;
            }
            while let Some(result) = finalizers.join_next().await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "call finalizer failed");
                }
            }
        }
    }

    /// Stop accepting calls, close every active call, and persist leads
    ///
    /// Sessions get the grace period to speak their closing script and hang
    /// up. Any still running after that are aborted and torn down.
    pub async fn shutdown(&self) {
        let active = self.shared.registry.len();
        tracing::info!(active, grace_secs = self.shared.grace.as_secs(), "shutting down calls");
        self.shared.registry.signal_shutdown();
        self.wait_idle().await;
        tracing::info!("all calls finalized");
    }

    fn finalizers_lock(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.finalizers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drop finalizers that already finished so the set only tracks live calls
fn reap(finalizers: &mut JoinSet<()>) {
    while let Some(result) = finalizers.try_join_next() {
        if let Err(e) = result {
            tracing::error!(error = %e, "call finalizer failed");
        }
    }
}

/// Wait for a call to end, then remove it and persist its lead
async fn finalize(shared: Arc<Shared>, handle: Arc<CallHandle>) {
    let call_id = handle.call_id().clone();
    let Some(mut task) = handle.take_task() else {
        tracing::error!(call_id = %call_id, "call has no session task");
        return;
    };

    let mut shutdown = shared.registry.subscribe_shutdown();
    let stopping = async {
        let _ = shutdown.wait_for(|stopping| *stopping).await;
    };
    let deadline = async {
        tokio::select! {
            () = handle.hung_up() => {}
            () = stopping => {}
        }
        tokio::time::sleep(shared.grace).await;
    };

    let summary = tokio::select! {
        joined = &mut task => match joined {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::error!(call_id = %call_id, error = %e, "call task failed");
                None
            }
        },
        () = deadline => {
            tracing::warn!(call_id = %call_id, "call did not close within grace period, aborting");
            task.abort();
            // Resolves once the session future, and any temp audio it owns, is dropped
            (&mut task).await.ok()
        }
    };

    if summary.is_none() && !handle.is_hung_up() {
        force_close(&shared, &call_id).await;
    }

    if let Err(e) = shared.registry.remove(&call_id) {
        tracing::warn!(call_id = %call_id, error = %e, "call already removed");
    }

    let lead = summary.as_ref().map_or_else(|| handle.lead(), |s: &CallSummary| s.lead.clone());
    append_with_retry(shared.leads.as_ref(), &lead, &shared.persist_retry).await;

    tracing::info!(
        call_id = %call_id,
        caller = %handle.caller(),
        duration_secs = handle.elapsed().as_secs(),
        turns = summary.as_ref().map_or(0, |s| s.turns),
        reason = summary.as_ref().map_or("aborted", |s| s.stop_reason.as_str()),
        qualified = lead.is_qualified(),
        "call finalized"
    );
}

/// Speak the fail-safe closing and hang up for a session that was aborted
async fn force_close(shared: &Shared, call_id: &CallId) {
    let closing = script::closing_for(false);
    if tokio::time::timeout(shared.grace, shared.turns.speak(call_id, closing))
        .await
        .is_err()
    {
        tracing::warn!(call_id = %call_id, "closing message timed out");
    }
    if let Err(e) = shared.turns.telephony().teardown(call_id).await {
        tracing::warn!(call_id = %call_id, error = %e, "forced teardown failed");
    }
}
