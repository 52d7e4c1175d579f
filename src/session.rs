//! Session store for transports that stream run events to clients.
//!
//! Each session owns one event queue. A transport creates a session, starts a
//! run with [`spawn_run`], hands the receiver to the client, and evicts the
//! session when the client is done.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::RunEvent;
use crate::orchestrator::{Orchestrator, RunState};

/// Identifier of a session.
pub type SessionId = Uuid;

/// Registry of per-session event queues.
pub trait SessionStore: Send + Sync {
    /// Creates a new session with an empty queue.
    fn create(&self) -> SessionId;

    /// Appends `event` to the session's queue.
    fn publish(&self, id: &SessionId, event: RunEvent) -> Result<()>;

    /// Takes the receiving end of the queue. Only the first call succeeds.
    fn take_receiver(&self, id: &SessionId) -> Result<mpsc::UnboundedReceiver<RunEvent>>;

    /// Closes the queue; receivers see end-of-stream once it drains.
    fn finish(&self, id: &SessionId) -> Result<()>;

    /// Removes the session. Returns false if it did not exist.
    fn evict(&self, id: &SessionId) -> bool;

    /// Returns true if the session exists.
    fn contains(&self, id: &SessionId) -> bool;
}

struct Session {
    sender: Option<mpsc::UnboundedSender<RunEvent>>,
    receiver: Option<mpsc::UnboundedReceiver<RunEvent>>,
}

/// Process-local [`SessionStore`].
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self) -> SessionId {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().insert(
            id,
            Session {
                sender: Some(sender),
                receiver: Some(receiver),
            },
        );
        tracing::debug!(session = %id, "session created");
        id
    }

    fn publish(&self, id: &SessionId, event: RunEvent) -> Result<()> {
        let sessions = self.lock();
        let session = sessions
            .get(id)
            .ok_or_else(|| Error::Session(format!("unknown session {}", id)))?;
        let sender = session
            .sender
            .as_ref()
            .ok_or_else(|| Error::Session(format!("session {} is finished", id)))?;

        // Events stay queued even if nobody has taken the receiver yet.
        sender
            .send(event)
            .map_err(|_| Error::Session(format!("session {} receiver was dropped", id)))
    }

    fn take_receiver(&self, id: &SessionId) -> Result<mpsc::UnboundedReceiver<RunEvent>> {
        self.lock()
            .get_mut(id)
            .ok_or_else(|| Error::Session(format!("unknown session {}", id)))?
            .receiver
            .take()
            .ok_or_else(|| Error::Session(format!("receiver for session {} already taken", id)))
    }

    fn finish(&self, id: &SessionId) -> Result<()> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::Session(format!("unknown session {}", id)))?;
        session.sender = None;
        Ok(())
    }

    fn evict(&self, id: &SessionId) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            tracing::debug!(session = %id, "session evicted");
        }
        removed
    }

    fn contains(&self, id: &SessionId) -> bool {
        self.lock().contains_key(id)
    }
}

/// Starts a run for `request` in a new session.
///
/// Every event is published to the session. The session is finished after
/// the terminal event. If publishing fails (for example the session was
/// evicted), the run is abandoned at that step boundary.
pub fn spawn_run(
    store: Arc<dyn SessionStore>,
    orchestrator: Arc<Orchestrator>,
    request: impl Into<String>,
) -> (SessionId, JoinHandle<RunState>) {
    let id = store.create();
    let request = request.into();

    let handle = tokio::spawn(async move {
        tracing::info!(session = %id, "run started");
        let mut state = RunState::new(request);

        while !state.is_done() {
            let (next, events) = orchestrator.advance(state).await;
            state = next;
            for event in events {
                if let Err(e) = store.publish(&id, event) {
                    tracing::warn!(session = %id, error = %e, "abandoning run");
                    return state;
                }
            }
        }

        if let Err(e) = store.finish(&id) {
            tracing::debug!(session = %id, error = %e, "session gone before finish");
        }
        tracing::info!(session = %id, outcome = ?state.outcome(), "run finished");
        state
    });

    (id, handle)
}
