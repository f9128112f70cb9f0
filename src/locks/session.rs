//! The queue lock engine.
//!
//! Each attempt registers an ephemeral sequential candidate under the base
//! path, ranks itself among the live siblings, and either holds the lock
//! (rank 0) or watches the sibling immediately before it. Only the direct
//! successor of a removed candidate wakes up, so releases never stampede the
//! whole queue.
//!
//! Watch callbacks, the session listener, [`Interrupter`]s and `unlock()`
//! push a [`LockEvent`] onto the lock's channel; the thread blocked in
//! `lock`/`try_lock` consumes them and performs the transitions under the
//! session mutex. The one exception is a session expiry while the lock is
//! held: nobody is reading the channel then, so the listener moves the
//! session out of `HELD` itself.

use super::bootstrap::ensure_path;
use super::guard::LockGuard;
use super::types::{LockEvent, LockSnapshot, LockState};
use crate::config::LockConfig;
use crate::coordination::{
    AclEntry, CoordinationError, Coordinator, ListenerId, WatchedEvent, path,
};
use crate::error::{LockError, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default name prefix for candidate nodes.
pub const DEFAULT_NODE_PREFIX: &str = "lock-";

/// Mutable per-handle state. Per-attempt fields are reset on cleanup.
#[derive(Debug, Default)]
pub(crate) struct LockSession {
    state: LockState,
    candidate_id: Option<String>,
    watched_sibling_id: Option<String>,
    aborted: bool,
    /// The session expired while this handle held the lock.
    expired: bool,
    /// Generation of the current attempt; events tagged with an older one are stale.
    attempt: u64,
}

impl LockSession {
    fn reset(&mut self) {
        self.state = LockState::Idle;
        self.candidate_id = None;
        self.watched_sibling_id = None;
        self.aborted = false;
        self.expired = false;
    }

    /// The service already reaped the candidate; only the acknowledgement is left.
    fn lose_hold(&mut self) {
        self.state = LockState::Aborted;
        self.candidate_id = None;
        self.watched_sibling_id = None;
        self.expired = true;
    }
}

fn lock_session(session: &Mutex<LockSession>) -> MutexGuard<'_, LockSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of one rank computation.
enum Rank {
    Holder,
    Waiting,
    /// The predecessor vanished before its watch could be armed.
    Recheck,
}

#[derive(PartialEq, Eq)]
enum Reaction {
    Recompute,
    Ignore,
}

/// Order candidate names by their sequence suffix.
///
/// Children without a numeric suffix are not candidates and are dropped.
pub(crate) fn order_candidates(children: Vec<String>) -> Vec<String> {
    let mut ranked: Vec<(u64, String)> = children
        .into_iter()
        .filter_map(|name| path::sequence_of(&name).map(|seq| (seq, name)))
        .collect();
    ranked.sort();
    ranked.into_iter().map(|(_, name)| name).collect()
}

/// A distributed mutual-exclusion lock bound to one base path.
///
/// The handle is reusable: after `unlock()` (or a failed attempt) it returns
/// to `IDLE` and may be locked again. It is `Sync`, so another thread can call
/// `unlock()` to abort an attempt that is still waiting.
///
/// The lock is not re-entrant; a second `lock()` on the same handle fails with
/// `AlreadyHeld`.
pub struct QueueLock {
    client: Arc<dyn Coordinator>,
    base_path: String,
    acl: Vec<AclEntry>,
    node_prefix: String,
    session: Arc<Mutex<LockSession>>,
    events_tx: Sender<LockEvent>,
    events_rx: Mutex<Receiver<LockEvent>>,
    listener: ListenerId,
}

impl std::fmt::Debug for QueueLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueLock")
            .field("base_path", &self.base_path)
            .field("node_prefix", &self.node_prefix)
            .field("session", &*lock_session(&self.session))
            .finish()
    }
}

impl QueueLock {
    /// Create a lock handle for `base_path`, creating nodes with `acl`.
    ///
    /// Nothing is sent to the coordination service except the registration
    /// of a session listener.
    ///
    /// # Errors
    ///
    /// * `LockError::InvalidArgument` - `base_path` is malformed or the root, or `acl` is empty
    pub fn new(client: Arc<dyn Coordinator>, base_path: &str, acl: Vec<AclEntry>) -> Result<Self> {
        path::validate(base_path).map_err(|e| LockError::InvalidArgument(e.to_string()))?;
        if base_path == path::ROOT {
            return Err(LockError::InvalidArgument(
                "lock base path must not be the namespace root".to_string(),
            ));
        }
        if acl.is_empty() {
            return Err(LockError::InvalidArgument(
                "lock ACL must not be empty".to_string(),
            ));
        }

        let (events_tx, events_rx) = mpsc::channel();
        let session = Arc::new(Mutex::new(LockSession::default()));
        let listener = {
            let session = Arc::clone(&session);
            let events = events_tx.clone();
            let base_path = base_path.to_string();
            client.add_session_listener(Arc::new(move |event: WatchedEvent| {
                on_session_event(&session, &events, &base_path, event);
            }))
        };

        Ok(Self {
            client,
            base_path: base_path.to_string(),
            acl,
            node_prefix: DEFAULT_NODE_PREFIX.to_string(),
            session,
            events_tx,
            events_rx: Mutex::new(events_rx),
            listener,
        })
    }

    /// Create a lock handle from a validated configuration.
    pub fn from_config(client: Arc<dyn Coordinator>, config: &LockConfig) -> Result<Self> {
        Self::new(client, &config.base_path, config.acl.clone())?
            .with_node_prefix(&config.node_prefix)
    }

    /// Use a different name prefix for candidate nodes.
    pub fn with_node_prefix(mut self, prefix: &str) -> Result<Self> {
        if prefix.is_empty() || prefix.contains(path::SEPARATOR) {
            return Err(LockError::InvalidArgument(format!(
                "node prefix must be non-empty and must not contain '{}': '{}'",
                path::SEPARATOR,
                prefix
            )));
        }
        self.node_prefix = prefix.to_string();
        Ok(self)
    }

    /// Shared namespace path all competitors register under.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// ACL applied to every node this handle creates.
    pub fn acl(&self) -> &[AclEntry] {
        &self.acl
    }

    pub fn state(&self) -> LockState {
        self.session().state
    }

    pub fn is_held(&self) -> bool {
        self.state() == LockState::Held
    }

    /// Name of this handle's candidate node, if one is registered.
    pub fn candidate_id(&self) -> Option<String> {
        self.session().candidate_id.clone()
    }

    /// Name of the predecessor currently being watched.
    pub fn watched_sibling_id(&self) -> Option<String> {
        self.session().watched_sibling_id.clone()
    }

    pub fn snapshot(&self) -> LockSnapshot {
        let session = self.session();
        LockSnapshot {
            base_path: self.base_path.clone(),
            state: session.state,
            candidate_id: session.candidate_id.clone(),
            watched_sibling_id: session.watched_sibling_id.clone(),
            attempt: session.attempt,
        }
    }

    /// Handle that cancels whichever attempt is blocked on this lock.
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            session: Arc::clone(&self.session),
            events: self.events_tx.clone(),
        }
    }

    /// Block until the lock is held.
    ///
    /// # Errors
    ///
    /// * `LockError::AlreadyHeld` - an attempt is already in progress or the lock is held
    /// * `LockError::Interrupted` - an [`Interrupter`] cancelled the attempt
    /// * `LockError::Aborted` - `unlock()` was called before the lock was granted
    /// * `LockError::SessionExpired` - the coordination session expired
    /// * `LockError::CoordinationServiceFailure` - a remote call failed
    /// * `LockError::ProtocolViolation` - the sibling list contradicts our registration
    ///
    /// Every failure deletes the candidate node (best-effort) before returning.
    pub fn lock(&self) -> Result<()> {
        self.acquire(None).map(|_| ())
    }

    /// Like [`lock`](Self::lock), but gives up after `timeout`.
    ///
    /// Returns `Ok(false)` on timeout. A timed-out attempt is cancelled and its
    /// candidate node deleted before returning, so a later grant can never
    /// leave an orphaned lock behind.
    pub fn try_lock(&self, timeout: Duration) -> Result<bool> {
        self.acquire(Instant::now().checked_add(timeout))
    }

    /// [`lock`](Self::lock) returning a guard that unlocks on drop.
    pub fn lock_guard(&self) -> Result<LockGuard<'_>> {
        self.lock()?;
        Ok(LockGuard::new(self))
    }

    /// [`try_lock`](Self::try_lock) returning a guard that unlocks on drop.
    pub fn try_lock_guard(&self, timeout: Duration) -> Result<Option<LockGuard<'_>>> {
        Ok(self.try_lock(timeout)?.then(|| LockGuard::new(self)))
    }

    /// Release the lock, or abort an attempt that is still waiting.
    ///
    /// Releasing deletes the candidate node, which is what wakes the next
    /// session in line. The handle is back to `IDLE` when this returns, even
    /// if the deletion failed; an already-missing node is only logged.
    ///
    /// Called while another thread is blocked in `lock`/`try_lock`, this marks
    /// the attempt aborted and returns immediately; the blocked call cleans up
    /// and fails with `LockError::Aborted`.
    ///
    /// If the session expired while the lock was held, the handle is already
    /// `ABORTED` and no longer reports `HELD`; `unlock()` acknowledges the
    /// loss, resets to `IDLE` and fails with `SessionExpired`.
    ///
    /// # Errors
    ///
    /// * `LockError::NotLocked` - the handle is idle
    /// * `LockError::SessionExpired` - the session expired, so the hold was already lost
    /// * `LockError::CoordinationServiceFailure` - the node could not be deleted
    pub fn unlock(&self) -> Result<()> {
        let mut session = self.session();
        match session.state {
            LockState::Idle => Err(LockError::NotLocked),
            LockState::Aborted if session.expired => {
                session.reset();
                Err(LockError::SessionExpired)
            }
            LockState::Held => {
                session.state = LockState::Releasing;
                let candidate = session.candidate_id.clone().unwrap_or_default();
                let result = self.cleanup(&mut session);
                info!(base_path = %self.base_path, candidate = %candidate, "lock released");
                result
            }
            LockState::Registering | LockState::Waiting => {
                session.aborted = true;
                session.state = LockState::Aborted;
                let _ = self.events_tx.send(LockEvent::Abort {
                    attempt: session.attempt,
                });
                debug!(base_path = %self.base_path, attempt = session.attempt, "abort requested");
                Ok(())
            }
            LockState::Releasing | LockState::Aborted => Ok(()),
        }
    }

    fn session(&self) -> MutexGuard<'_, LockSession> {
        lock_session(&self.session)
    }

    fn acquire(&self, deadline: Option<Instant>) -> Result<bool> {
        let attempt = self.begin_attempt()?;
        let events = self
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let outcome = self.run_attempt(attempt, &events, deadline);
        match &outcome {
            Ok(true) => info!(
                base_path = %self.base_path,
                candidate = %self.candidate_id().unwrap_or_default(),
                "lock acquired"
            ),
            Ok(false) => {
                debug!(base_path = %self.base_path, attempt, "lock attempt timed out");
                self.abandon(attempt);
            }
            Err(e) => {
                debug!(base_path = %self.base_path, attempt, error = %e, "lock attempt failed");
                self.abandon(attempt);
            }
        }
        outcome
    }

    fn begin_attempt(&self) -> Result<u64> {
        let mut session = self.session();
        if session.expired {
            debug!(base_path = %self.base_path, "discarding hold lost to session expiry");
            session.reset();
        }
        if session.state != LockState::Idle {
            return Err(LockError::AlreadyHeld(session.state));
        }
        session.attempt += 1;
        session.aborted = false;
        session.state = LockState::Registering;
        Ok(session.attempt)
    }

    fn run_attempt(
        &self,
        attempt: u64,
        events: &Receiver<LockEvent>,
        deadline: Option<Instant>,
    ) -> Result<bool> {
        ensure_path(self.client.as_ref(), &self.base_path, &self.acl)?;
        self.register()?;

        loop {
            match self.evaluate_rank()? {
                Rank::Holder => return self.confirm_grant(attempt, events),
                Rank::Recheck => continue,
                Rank::Waiting => {}
            }

            loop {
                let Some(event) = next_event(events, deadline)? else {
                    return Ok(false);
                };
                if self.on_event(event, attempt)? == Reaction::Recompute {
                    break;
                }
            }
        }
    }

    fn register(&self) -> Result<()> {
        let mut session = self.session();
        if session.aborted {
            return Err(LockError::Aborted);
        }
        let name = self.client.create_sequential_ephemeral(
            &self.base_path,
            &self.node_prefix,
            &self.acl,
        )?;
        debug!(base_path = %self.base_path, candidate = %name, "registered candidate");
        session.candidate_id = Some(name);
        Ok(())
    }

    fn evaluate_rank(&self) -> Result<Rank> {
        let mut session = self.session();
        if session.aborted {
            return Err(LockError::Aborted);
        }
        let own = session.candidate_id.clone().ok_or_else(|| {
            LockError::ProtocolViolation("rank computed without a registered candidate".to_string())
        })?;

        let children = self.client.list_children(&self.base_path)?;
        if children.is_empty() {
            return Err(LockError::ProtocolViolation(format!(
                "no candidates under {} right after registering {}",
                self.base_path, own
            )));
        }
        let ordered = order_candidates(children);
        let rank = ordered.iter().position(|name| *name == own).ok_or_else(|| {
            LockError::ProtocolViolation(format!(
                "candidate {} missing from the candidates under {}",
                own, self.base_path
            ))
        })?;
        debug!(candidate = %own, rank, queued = ordered.len(), "computed rank");

        if rank == 0 {
            session.state = LockState::Held;
            session.watched_sibling_id = None;
            return Ok(Rank::Holder);
        }

        let predecessor = ordered[rank - 1].clone();
        let predecessor_path = path::join(&self.base_path, &predecessor);
        let tx = self.events_tx.clone();
        let armed = self.client.watch_deletion(
            &predecessor_path,
            Box::new(move |event: WatchedEvent| {
                let _ = tx.send(LockEvent::Notification(event));
            }),
        )?;
        if !armed {
            debug!(candidate = %own, predecessor = %predecessor, "predecessor already gone");
            session.watched_sibling_id = None;
            return Ok(Rank::Recheck);
        }

        debug!(candidate = %own, predecessor = %predecessor, "watching predecessor");
        session.watched_sibling_id = Some(predecessor);
        session.state = LockState::Waiting;
        Ok(Rank::Waiting)
    }

    fn on_event(&self, event: LockEvent, attempt: u64) -> Result<Reaction> {
        match event {
            LockEvent::Notification(WatchedEvent::NodeDeleted { path: deleted }) => {
                let mut session = self.session();
                let is_watched = session
                    .watched_sibling_id
                    .as_deref()
                    .is_some_and(|id| path::join(&self.base_path, id) == deleted);
                if is_watched {
                    debug!(path = %deleted, "predecessor removed");
                    session.watched_sibling_id = None;
                    Ok(Reaction::Recompute)
                } else {
                    debug!(path = %deleted, "discarding stale notification");
                    Ok(Reaction::Ignore)
                }
            }
            LockEvent::Notification(WatchedEvent::SessionReconnected) => {
                info!(base_path = %self.base_path, "coordination session reconnected");
                Ok(Reaction::Ignore)
            }
            LockEvent::Notification(WatchedEvent::SessionExpired) => Err(LockError::SessionExpired),
            LockEvent::SessionExpired { attempt: target } if target == attempt => {
                Err(LockError::SessionExpired)
            }
            LockEvent::Interrupted { attempt: target } if target == attempt => {
                Err(LockError::Interrupted)
            }
            LockEvent::Abort { attempt: target } if target == attempt => Err(LockError::Aborted),
            LockEvent::SessionExpired { .. }
            | LockEvent::Interrupted { .. }
            | LockEvent::Abort { .. } => {
                debug!(attempt, "discarding signal for an earlier attempt");
                Ok(Reaction::Ignore)
            }
        }
    }

    /// Rank 0 reached: a cancellation already queued for this attempt still wins.
    fn confirm_grant(&self, attempt: u64, events: &Receiver<LockEvent>) -> Result<bool> {
        while let Ok(event) = events.try_recv() {
            match event {
                LockEvent::Interrupted { attempt: target } if target == attempt => {
                    return Err(LockError::Interrupted);
                }
                LockEvent::Abort { attempt: target } if target == attempt => {
                    return Err(LockError::Aborted);
                }
                LockEvent::SessionExpired { attempt: target } if target == attempt => {
                    return Err(LockError::SessionExpired);
                }
                LockEvent::Notification(WatchedEvent::SessionExpired) => {
                    return Err(LockError::SessionExpired);
                }
                other => debug!(event = ?other, "discarding event queued before grant"),
            }
        }

        let session = self.session();
        if session.expired {
            return Err(LockError::SessionExpired);
        }
        if session.attempt != attempt || session.aborted || session.state != LockState::Held {
            return Err(LockError::Aborted);
        }
        Ok(true)
    }

    /// Tear down a failed or timed-out attempt, unless a newer one has started.
    fn abandon(&self, attempt: u64) {
        let mut session = self.session();
        if session.attempt != attempt || session.state == LockState::Idle {
            return;
        }
        session.state = LockState::Aborted;
        if let Err(e) = self.cleanup(&mut session) {
            warn!(base_path = %self.base_path, error = %e, "cleanup after failed attempt did not complete");
        }
    }

    /// Delete the candidate node if one was registered, then reset to `IDLE`.
    fn cleanup(&self, session: &mut LockSession) -> Result<()> {
        let result = match session.candidate_id.as_deref() {
            Some(candidate) => self.delete_candidate(&path::join(&self.base_path, candidate)),
            None => Ok(()),
        };
        session.reset();
        result
    }

    fn delete_candidate(&self, node_path: &str) -> Result<()> {
        match self.client.exists(node_path) {
            Ok(true) => match self.client.delete(node_path) {
                Ok(()) => {
                    debug!(path = %node_path, "deleted candidate");
                    Ok(())
                }
                Err(CoordinationError::NoNode(_)) => {
                    warn!(path = %node_path, "candidate vanished before it could be deleted");
                    Ok(())
                }
                Err(e) => {
                    warn!(path = %node_path, error = %e, "failed to delete candidate");
                    Err(e.into())
                }
            },
            Ok(false) => {
                warn!(path = %node_path, "candidate already gone at cleanup");
                Ok(())
            }
            Err(e) => {
                warn!(path = %node_path, error = %e, "failed to check candidate");
                Err(e.into())
            }
        }
    }
}

impl Drop for QueueLock {
    fn drop(&mut self) {
        {
            let mut session = lock_session(&self.session);
            if session.candidate_id.is_some()
                && let Err(e) = self.cleanup(&mut session)
            {
                warn!(base_path = %self.base_path, error = %e, "failed to delete candidate on drop");
            }
        }
        self.client.remove_session_listener(self.listener);
    }
}

/// Session listener body; runs on whichever thread the service notifies from.
///
/// An expiry while `HELD` is applied to the session directly, since no thread
/// may be reading the channel. Everything else goes through the channel.
fn on_session_event(
    session: &Mutex<LockSession>,
    events: &Sender<LockEvent>,
    base_path: &str,
    event: WatchedEvent,
) {
    let mut session = lock_session(session);
    match (event, session.state) {
        (WatchedEvent::SessionExpired, LockState::Idle) => {
            debug!(base_path, "session expired while idle");
        }
        (WatchedEvent::SessionExpired, LockState::Held) => {
            warn!(
                base_path,
                candidate = session.candidate_id.as_deref().unwrap_or("-"),
                "session expired while holding the lock"
            );
            session.lose_hold();
        }
        (WatchedEvent::SessionExpired, _) => {
            let _ = events.send(LockEvent::SessionExpired {
                attempt: session.attempt,
            });
        }
        (other, _) => {
            let _ = events.send(LockEvent::Notification(other));
        }
    }
}

fn next_event(events: &Receiver<LockEvent>, deadline: Option<Instant>) -> Result<Option<LockEvent>> {
    let closed = || LockError::ProtocolViolation("lock event channel closed".to_string());
    match deadline {
        None => events.recv().map(Some).map_err(|_| closed()),
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(event) => Ok(Some(event)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(closed()),
            }
        }
    }
}

/// Cancels the attempt currently blocked on a [`QueueLock`].
///
/// The attempt fails with `LockError::Interrupted` after deleting its
/// candidate. Interrupting an idle lock, or one whose `lock()` has already
/// returned, has no effect on later attempts.
#[derive(Clone)]
pub struct Interrupter {
    session: Arc<Mutex<LockSession>>,
    events: Sender<LockEvent>,
}

impl Interrupter {
    /// Returns `true` if an attempt was still registering or waiting and has
    /// been signalled. A lock that is idle or already held is left alone.
    pub fn interrupt(&self) -> bool {
        let session = lock_session(&self.session);
        if !matches!(session.state, LockState::Registering | LockState::Waiting) {
            return false;
        }
        self.events
            .send(LockEvent::Interrupted {
                attempt: session.attempt,
            })
            .is_ok()
    }
}
