//! One proof task at a time, observable through a `watch` snapshot.
//!
//! ```text
//! form ──quote──▶ quoting ──▶ form
//! form ──generate──▶ proving ──submit──▶ submitting ──▶ success
//!                      │                     │
//!                      └──────▶ error ◀──────┘ ──dismiss──▶ form
//! ```
//!
//! Every task gets a fresh generation. Messages travel through one channel to a pump that
//! applies them only while their generation is still the current one, so anything a cancelled
//! or superseded task manages to send is dropped.
//!
//! A submission cannot be cancelled: once the transaction is handed to the network its outcome
//! is always recorded.

use super::worker::{self, Tagged, WorkerHandle, WorkerMessage};
use super::{ProofRequest, QuoteRequest, SerializedTransaction, SwapQuote, SwapQuoter};
use crate::broadcast::{BroadcastReceipt, Broadcaster};
use crate::engine::EngineBootstrap;
use crate::errors::{ErrorReport, Result, VeilError};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Identifies one proof task; equal to its generation.
pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofPhase {
    Form,
    Quoting,
    Proving,
    Submitting,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofSnapshot {
    pub phase: ProofPhase,
    /// Generation of the current task; bumped on every start and cancel.
    pub generation: u64,
    /// Last request the user submitted. Survives errors so the form can be refilled.
    pub request: Option<ProofRequest>,
    pub quote: Option<SwapQuote>,
    pub progress: Option<u8>,
    pub result: Option<SerializedTransaction>,
    pub receipt: Option<BroadcastReceipt>,
    pub error: Option<ErrorReport>,
}

impl ProofSnapshot {
    const fn initial() -> Self {
        Self {
            phase: ProofPhase::Form,
            generation: 0,
            request: None,
            quote: None,
            progress: None,
            result: None,
            receipt: None,
            error: None,
        }
    }

    /// Back to `form`, keeping what the user entered.
    fn reset_to_form(&mut self) {
        self.phase = ProofPhase::Form;
        self.progress = None;
        self.result = None;
        self.receipt = None;
        self.error = None;
    }

    fn fail(&mut self, e: &VeilError) {
        self.phase = ProofPhase::Error;
        self.progress = None;
        self.error = Some(e.report());
    }
}

/// Settles a `quoting` or `submitting` phase if the future driving it is dropped midway.
struct PhaseGuard<'a> {
    state: &'a watch::Sender<ProofSnapshot>,
    phase: ProofPhase,
    on_drop: Option<fn(&mut ProofSnapshot)>,
}

impl<'a> PhaseGuard<'a> {
    fn new(
        state: &'a watch::Sender<ProofSnapshot>,
        phase: ProofPhase,
        on_drop: fn(&mut ProofSnapshot),
    ) -> Self {
        Self {
            state,
            phase,
            on_drop: Some(on_drop),
        }
    }

    fn disarm(mut self) {
        self.on_drop = None;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        let Some(settle) = self.on_drop.take() else {
            return;
        };
        let phase = self.phase;
        let changed = self.state.send_if_modified(|s| {
            if s.phase != phase {
                return false;
            }
            settle(s);
            true
        });
        if changed {
            tracing::warn!(phase = ?phase, "proof flow interrupted");
        }
    }
}

fn quote_interrupted(s: &mut ProofSnapshot) {
    s.phase = ProofPhase::Form;
}

fn submit_interrupted(s: &mut ProofSnapshot) {
    s.fail(&VeilError::Broadcast(
        "submission interrupted; the transaction may already be on chain".into(),
    ));
}

/// Apply one worker message. Returns whether the snapshot changed.
fn apply(s: &mut ProofSnapshot, t: Tagged) -> bool {
    if t.generation != s.generation || s.phase != ProofPhase::Proving || s.result.is_some() {
        tracing::debug!(
            generation = t.generation,
            current = s.generation,
            "discarding stale proof message"
        );
        return false;
    }
    match t.message {
        WorkerMessage::Progress { progress } => {
            if s.progress.is_some_and(|p| p >= progress) {
                return false;
            }
            s.progress = Some(progress.min(100));
            true
        }
        WorkerMessage::Result {
            serialized_transaction,
        } => {
            s.progress = Some(100);
            s.result = Some(serialized_transaction);
            tracing::info!(generation = t.generation, "proof ready");
            true
        }
        WorkerMessage::Error { message } => {
            tracing::warn!(generation = t.generation, error = %message, "proof failed");
            s.fail(&VeilError::Proof(message));
            true
        }
    }
}

pub struct ProofOrchestrator {
    engine: Arc<EngineBootstrap>,
    state: Arc<watch::Sender<ProofSnapshot>>,
    tx: mpsc::UnboundedSender<Tagged>,
    active: Mutex<Option<WorkerHandle>>,
    pump: JoinHandle<()>,
}

impl std::fmt::Debug for ProofOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.borrow();
        f.debug_struct("ProofOrchestrator")
            .field("phase", &s.phase)
            .field("generation", &s.generation)
            .finish_non_exhaustive()
    }
}

impl Drop for ProofOrchestrator {
    fn drop(&mut self) {
        self.pump.abort();
        if let Ok(mut active) = self.active.try_lock() {
            if let Some(h) = active.take() {
                h.abort();
            }
        }
    }
}

impl ProofOrchestrator {
    /// Must be called from within a tokio runtime; spawns the message pump.
    pub fn new(engine: Arc<EngineBootstrap>) -> Self {
        let (state, _rx) = watch::channel(ProofSnapshot::initial());
        let state = Arc::new(state);
        let (tx, mut rx) = mpsc::unbounded_channel::<Tagged>();

        let pump_state = Arc::clone(&state);
        let pump = tokio::spawn(async move {
            while let Some(t) = rx.recv().await {
                pump_state.send_if_modified(|s| apply(s, t));
            }
        });

        Self {
            engine,
            state,
            tx,
            active: Mutex::new(None),
            pump,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProofSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ProofSnapshot {
        self.state.borrow().clone()
    }

    /// Start proving `req`, terminating any task still running. Returns at once.
    pub async fn generate_proof(&self, req: ProofRequest) -> Result<TaskId> {
        req.validate()?;
        let engine = self.engine.ready_engine()?;

        let mut active = self.active.lock().await;
        if matches!(
            self.state.borrow().phase,
            ProofPhase::Quoting | ProofPhase::Submitting
        ) {
            return Err(VeilError::Busy);
        }
        if let Some(prev) = active.take() {
            prev.abort();
        }

        let kind = req.kind();
        let mut generation = 0;
        self.state.send_modify(|s| {
            s.generation = s.generation.saturating_add(1);
            generation = s.generation;
            s.reset_to_form();
            s.phase = ProofPhase::Proving;
            s.progress = Some(0);
            s.request = Some(req.clone());
        });

        tracing::info!(generation, kind = %kind, chain = %req.chain(), "proof task started");
        *active = Some(worker::spawn(engine, req, generation, self.tx.clone()));
        Ok(generation)
    }

    /// Terminate the running task, if any. Late messages from it are ignored.
    ///
    /// Does nothing while submitting; the broadcast outcome is recorded either way.
    pub async fn cancel(&self) {
        let mut active = self.active.lock().await;
        let mut generation = None;
        self.state.send_if_modified(|s| {
            if s.phase == ProofPhase::Submitting {
                return false;
            }
            s.generation = s.generation.saturating_add(1);
            generation = Some(s.generation);
            if s.phase == ProofPhase::Proving {
                s.reset_to_form();
            }
            true
        });
        let Some(generation) = generation else {
            tracing::info!("submission in flight; cancel ignored");
            return;
        };
        if let Some(h) = active.take() {
            h.abort();
        }
        tracing::info!(generation, "proof task cancelled");
    }

    /// Wait for task `id` to finish. A superseded or cancelled task resolves to `Cancelled`.
    pub async fn wait(&self, id: TaskId) -> Result<SerializedTransaction> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|s| {
                s.generation != id || s.result.is_some() || s.phase != ProofPhase::Proving
            })
            .await
            .map_err(|_e| VeilError::Cancelled)?;
        if settled.generation != id {
            return Err(VeilError::Cancelled);
        }
        if let Some(r) = &settled.result {
            return Ok(r.clone());
        }
        match &settled.error {
            Some(report) => Err(VeilError::Proof(report.message.clone())),
            None => Err(VeilError::Cancelled),
        }
    }

    /// Fetch a swap route, `form → quoting → form`.
    pub async fn quote_swap(
        &self,
        quoter: &dyn SwapQuoter,
        req: &QuoteRequest,
    ) -> Result<SwapQuote> {
        let ok = self.state.send_if_modified(|s| {
            if matches!(
                s.phase,
                ProofPhase::Form | ProofPhase::Success | ProofPhase::Error
            ) {
                s.reset_to_form();
                s.phase = ProofPhase::Quoting;
                true
            } else {
                false
            }
        });
        if !ok {
            return Err(VeilError::Busy);
        }

        let guard = PhaseGuard::new(&self.state, ProofPhase::Quoting, quote_interrupted);
        let res = quoter.quote(req).await;
        guard.disarm();
        self.state.send_modify(|s| match &res {
            Ok(q) => {
                s.phase = ProofPhase::Form;
                s.quote = Some(q.clone());
            }
            Err(e) => s.fail(e),
        });
        res
    }

    /// Broadcast the proved transaction, `proving → submitting → success`.
    pub async fn submit(&self, broadcaster: &Broadcaster) -> Result<BroadcastReceipt> {
        let mut picked = None;
        self.state.send_if_modified(|s| {
            if s.phase != ProofPhase::Proving {
                return false;
            }
            let (Some(req), Some(tx)) = (&s.request, &s.result) else {
                return false;
            };
            picked = Some((s.generation, req.kind(), req.chain(), tx.clone()));
            s.phase = ProofPhase::Submitting;
            true
        });
        let Some((generation, kind, chain, tx)) = picked else {
            return Err(VeilError::NotFound("no proved transaction to submit".into()));
        };

        let guard = PhaseGuard::new(&self.state, ProofPhase::Submitting, submit_interrupted);
        let res = broadcaster.broadcast(kind, chain, &tx).await;
        guard.disarm();
        self.state.send_if_modified(|s| {
            if s.generation != generation || s.phase != ProofPhase::Submitting {
                return false;
            }
            match &res {
                Ok(r) => {
                    s.phase = ProofPhase::Success;
                    s.receipt = Some(r.clone());
                }
                Err(e) => s.fail(e),
            }
            true
        });
        match &res {
            Ok(r) => tracing::info!(generation, kind = %kind, path = ?r.path, "submitted"),
            Err(e) => tracing::warn!(generation, kind = %kind, error = %e, "submission failed"),
        }
        res
    }

    /// Leave `error` or `success` for `form`, keeping the last request. Ignored while
    /// submitting.
    pub async fn dismiss(&self) {
        if self.state.borrow().phase == ProofPhase::Proving {
            self.cancel().await;
        }
        self.state.send_if_modified(|s| {
            if s.phase == ProofPhase::Submitting {
                return false;
            }
            s.reset_to_form();
            true
        });
    }
}
