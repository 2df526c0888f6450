use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::remote::{RemoteError, RemoteStore};
use super::writer::{RemoteWriter, RetryPolicy, WriteOutcome};
use crate::ledger::LedgerObserver;
use crate::models::{FieldMap, UPDATED_AT_FIELD, is_local_only};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Quiet period after the last change before a write is issued.
    pub debounce: Duration,
    /// Minimum gap between the end of one write and the start of the next.
    pub min_spacing: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            min_spacing: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Scheduled,
    InFlight,
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    Scheduled {
        user_id: String,
        delay: Duration,
        fields: FieldMap,
    },
    Written {
        user_id: String,
        fields: FieldMap,
        attempts: u32,
    },
    Abandoned {
        user_id: String,
        fields: FieldMap,
        attempts: u32,
        error: RemoteError,
    },
}

struct Session {
    user_id: Option<String>,
    /// Bumped on every session change; completions from older sessions are ignored.
    generation: u64,
    /// Identifies the live timer so a superseded one can't fire.
    timer_seq: u64,
    /// Last values the remote acknowledged.
    snapshot: FieldMap,
    pending: FieldMap,
    in_flight: Option<FieldMap>,
    phase: SyncPhase,
    timer: Option<JoinHandle<()>>,
    last_write: Option<Instant>,
    dirty_during_flight: bool,
    /// Completed writes this session, and how the latest one ended.
    writes: u64,
    last_outcome: Option<WriteOutcome>,
}

impl Session {
    fn new() -> Self {
        Self {
            user_id: None,
            generation: 0,
            timer_seq: 0,
            snapshot: FieldMap::new(),
            pending: FieldMap::new(),
            in_flight: None,
            phase: SyncPhase::Idle,
            timer: None,
            last_write: None,
            dirty_during_flight: false,
            writes: 0,
            last_outcome: None,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_seq += 1;
    }

    fn spacing_wait(&self, min_spacing: Duration) -> Duration {
        self.last_write
            .map_or(Duration::ZERO, |at| min_spacing.saturating_sub(at.elapsed()))
    }

    fn baseline(&self, key: &str) -> Option<&serde_json::Value> {
        self.in_flight
            .as_ref()
            .and_then(|f| f.get(key))
            .or_else(|| self.snapshot.get(key))
    }
}

struct Inner {
    session: Mutex<Session>,
    writer: RemoteWriter,
    store: Arc<dyn RemoteStore>,
    config: SyncConfig,
    events: broadcast::Sender<SyncEvent>,
    phase_tx: watch::Sender<SyncPhase>,
    runtime: Handle,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, session: &mut Session, phase: SyncPhase) {
        session.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn arm_timer(self: &Arc<Self>, session: &mut Session) {
        session.cancel_timer();

        let delay = self
            .config
            .debounce
            .max(session.spacing_wait(self.config.min_spacing));

        let generation = session.generation;
        let seq = session.timer_seq;
        let inner = Arc::clone(self);
        session.timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(generation, seq).await;
        }));
        self.set_phase(session, SyncPhase::Scheduled);

        if let Some(user_id) = session.user_id.clone() {
            debug!(user_id, delay_ms = delay.as_millis() as u64, "sync write scheduled");
            self.emit(SyncEvent::Scheduled {
                user_id,
                delay,
                fields: session.pending.clone(),
            });
        }
    }

    /// Move pending into flight. `None` when there is nothing to send.
    fn take_pending(&self, session: &mut Session) -> Option<(u64, String, FieldMap)> {
        session.timer = None;
        let user_id = session.user_id.clone()?;
        if session.pending.is_empty() {
            self.set_phase(session, SyncPhase::Idle);
            return None;
        }
        let payload = std::mem::take(&mut session.pending);
        session.in_flight = Some(payload.clone());
        session.dirty_during_flight = false;
        self.set_phase(session, SyncPhase::InFlight);
        Some((session.generation, user_id, payload))
    }

    async fn fire(self: Arc<Self>, generation: u64, seq: u64) {
        let taken = {
            let mut session = self.lock();
            if session.generation != generation
                || session.timer_seq != seq
                || session.phase != SyncPhase::Scheduled
            {
                return;
            }
            self.take_pending(&mut session)
        };
        let Some((generation, user_id, payload)) = taken else {
            return;
        };
        let outcome = self.writer.write(&user_id, &payload).await;
        self.complete(generation, user_id, payload, &outcome);
    }

    fn complete(
        self: &Arc<Self>,
        generation: u64,
        user_id: String,
        payload: FieldMap,
        outcome: &WriteOutcome,
    ) {
        let mut guard = self.lock();
        if guard.generation == generation {
            let session = &mut *guard;
            session.in_flight = None;
            session.last_write = Some(Instant::now());
            session.writes += 1;
            session.last_outcome = Some(outcome.clone());
            match outcome {
                WriteOutcome::Written { .. } => {
                    for (k, v) in &payload {
                        session.snapshot.insert(k.clone(), v.clone());
                    }
                }
                WriteOutcome::Abandoned { .. } => {
                    // Newer local values win over the abandoned ones.
                    for (k, v) in &payload {
                        if !session.pending.contains_key(k) {
                            session.pending.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
            let snapshot = &session.snapshot;
            session.pending.retain(|k, v| snapshot.get(k) != Some(&*v));

            let rearm = !session.pending.is_empty()
                && (outcome.is_written() || session.dirty_during_flight);
            session.dirty_during_flight = false;
            self.set_phase(session, SyncPhase::Idle);
            if rearm {
                self.arm_timer(session);
            }
        } else {
            debug!(user_id, "write completed for an ended session");
        }
        drop(guard);

        self.emit(match outcome {
            WriteOutcome::Written { attempts } => SyncEvent::Written {
                user_id,
                fields: payload,
                attempts: *attempts,
            },
            WriteOutcome::Abandoned { attempts, error } => SyncEvent::Abandoned {
                user_id,
                fields: payload,
                attempts: *attempts,
                error: error.clone(),
            },
        });
    }
}

/// Folds bursts of profile changes into single debounced, spaced-out writes.
///
/// Only fields whose value differs from what the remote last acknowledged
/// (or what is currently being written) are sent. At most one write is in
/// flight at a time; changes that arrive meanwhile wait for the next one.
#[derive(Clone)]
pub struct SyncCoalescer {
    inner: Arc<Inner>,
}

impl SyncCoalescer {
    /// Must be called from within a Tokio runtime; timers are spawned onto it.
    pub fn new(store: Arc<dyn RemoteStore>, config: SyncConfig, policy: RetryPolicy) -> Result<Self> {
        let runtime = Handle::try_current().context("Sync coalescer needs a Tokio runtime")?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (phase_tx, _) = watch::channel(SyncPhase::Idle);
        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(Session::new()),
                writer: RemoteWriter::new(Arc::clone(&store), policy),
                store,
                config,
                events,
                phase_tx,
                runtime,
            }),
        })
    }

    /// Start syncing for `user_id`, seeding the snapshot from the remote document.
    ///
    /// A missing document or a failed read leaves the snapshot empty, so
    /// the first change writes every field it carries.
    pub async fn begin_session(&self, user_id: &str) {
        self.end_session();

        let snapshot: FieldMap = match self.inner.store.get(user_id).await {
            Ok(Some(doc)) => doc
                .into_iter()
                .filter(|(k, _)| !is_local_only(k) && k != UPDATED_AT_FIELD)
                .collect(),
            Ok(None) => FieldMap::new(),
            Err(error) => {
                warn!(user_id, %error, "could not read remote document; starting from empty snapshot");
                FieldMap::new()
            }
        };

        let mut session = self.inner.lock();
        session.generation += 1;
        session.user_id = Some(user_id.to_string());
        session.snapshot = snapshot;
        debug!(user_id, fields = session.snapshot.len(), "sync session started");
    }

    /// Drop everything queued for the current user. A write already in
    /// flight finishes but no longer touches session state.
    pub fn end_session(&self) {
        let mut session = self.inner.lock();
        session.cancel_timer();
        session.generation += 1;
        session.user_id = None;
        session.snapshot.clear();
        session.pending.clear();
        session.in_flight = None;
        session.last_write = None;
        session.dirty_during_flight = false;
        session.last_outcome = None;
        self.inner.set_phase(&mut session, SyncPhase::Idle);
    }

    /// Record the latest values of the sync fields and schedule a write if
    /// any of them changed.
    pub fn notify(&self, fields: &FieldMap) {
        let mut guard = self.inner.lock();
        if guard.user_id.is_none() {
            return;
        }
        let session = &mut *guard;

        let mut changed = false;
        for (key, value) in fields {
            if is_local_only(key) || key == UPDATED_AT_FIELD {
                continue;
            }
            if session.baseline(key) == Some(value) {
                changed |= session.pending.remove(key).is_some();
            } else if session.pending.get(key) != Some(value) {
                session.pending.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        if !changed {
            return;
        }

        match session.phase {
            SyncPhase::InFlight => session.dirty_during_flight = true,
            _ if session.pending.is_empty() => {
                session.cancel_timer();
                self.inner.set_phase(session, SyncPhase::Idle);
            }
            _ => self.inner.arm_timer(session),
        }
    }

    /// Write whatever is pending, skipping the debounce but not the
    /// minimum spacing between writes.
    ///
    /// Waits for an in-flight write first. If a scheduled write picks up
    /// the pending changes while this waits, its outcome is returned.
    /// Returns `None` when nothing was pending.
    pub async fn flush(&self) -> Option<WriteOutcome> {
        let mut phase_rx = self.inner.phase_tx.subscribe();
        let started_at = self.inner.lock().writes;
        let (generation, user_id, payload) = loop {
            let _ = phase_rx.wait_for(|p| *p != SyncPhase::InFlight).await;
            let wait = {
                let mut session = self.inner.lock();
                if session.phase == SyncPhase::InFlight {
                    continue;
                }
                let wait = session.spacing_wait(self.inner.config.min_spacing);
                if wait.is_zero() {
                    session.cancel_timer();
                    match self.inner.take_pending(&mut session) {
                        Some(taken) => break taken,
                        None if session.writes != started_at => {
                            return session.last_outcome.clone();
                        }
                        None => return None,
                    }
                }
                wait
            };
            debug!(wait_ms = wait.as_millis() as u64, "flush waiting for write spacing");
            tokio::time::sleep(wait).await;
        };
        let outcome = self.inner.writer.write(&user_id, &payload).await;
        self.inner.complete(generation, user_id, payload, &outcome);
        Some(outcome)
    }

    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.inner.lock().phase
    }

    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.inner.lock().user_id.clone()
    }

    #[must_use]
    pub fn pending_fields(&self) -> FieldMap {
        self.inner.lock().pending.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> FieldMap {
        self.inner.lock().snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }
}

impl LedgerObserver for SyncCoalescer {
    fn profile_changed(&self, fields: &FieldMap) {
        self.notify(fields);
    }
}
