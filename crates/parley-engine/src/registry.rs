//! Session registry — the session table and its expiry index as one
//! consistency unit.
//!
//! The table (`id → Session`) and the expiry index (`(deadline, id)` ordered
//! set) are only ever mutated together, under one mutex, through the
//! invariant-preserving operations below. Neither half is reachable on its
//! own, so no caller can observe a session present in one and missing from
//! the other. Critical sections are short and never span a socket send.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use parley_core::clock::now_micros;

use crate::outbound::ReturnPath;

/// Protocol phase of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, awaiting HELLO.
    Start,
    /// Steady state, awaiting DATA or GOODBYE.
    Receive,
    /// Terminal. Anything arriving here is a log-only no-op.
    Done,
}

/// One active client conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: u32,
    pub state: SessionState,
    /// Reap once `now_micros()` passes this. Recomputed on every refresh.
    pub deadline: u64,
    /// Highest sequence number accepted in order; 0 before any DATA.
    pub last_seq: u32,
    /// Where replies go. Replaced on every refresh.
    pub path: ReturnPath,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<u32, Session>,
    expiry: BTreeSet<(u64, u32)>,
}

/// The registry — shared across packet workers and the sweeper.
#[derive(Debug)]
pub struct SessionRegistry {
    timeout: Duration,
    inner: Mutex<Inner>,
}

pub type SharedRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn shared(timeout: Duration) -> SharedRegistry {
        Arc::new(Self::new(timeout))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A worker that panicked mid-operation cannot leave a half-applied
        // update behind (each operation mutates both halves before
        // unlocking), so recovering from poisoning is sound.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_deadline(&self) -> u64 {
        now_micros() + self.timeout.as_micros() as u64
    }

    /// Return the session for `id`, creating it in `Start` with a fresh
    /// deadline when absent. The boolean reports whether it was created.
    /// Concurrent calls for the same unseen id create exactly one session.
    pub fn find_or_create(&self, id: u32, path: ReturnPath) -> (Session, bool) {
        let mut inner = self.lock();

        if let Some(session) = inner.sessions.get(&id) {
            return (session.clone(), false);
        }

        let session = Session {
            id,
            state: SessionState::Start,
            deadline: self.next_deadline(),
            last_seq: 0,
            path,
        };
        inner.expiry.insert((session.deadline, id));
        inner.sessions.insert(id, session.clone());
        tracing::info!(session_id = id, "session created");

        (session, true)
    }

    pub fn get(&self, id: u32) -> Option<Session> {
        self.lock().sessions.get(&id).cloned()
    }

    /// Move the session to `next_state` with a fresh deadline, new last
    /// sequence number, and new return path. The expiry entry moves in the
    /// same critical section. Returns false when a terminate raced ahead
    /// and the session is gone.
    pub fn refresh(
        &self,
        id: u32,
        next_state: SessionState,
        last_seq: u32,
        path: ReturnPath,
    ) -> bool {
        let new_deadline = self.next_deadline();
        let mut inner = self.lock();

        let Some(session) = inner.sessions.get_mut(&id) else {
            return false;
        };

        let old_deadline = session.deadline;
        session.state = next_state;
        session.deadline = new_deadline;
        session.last_seq = last_seq;
        session.path = path;

        inner.expiry.remove(&(old_deadline, id));
        inner.expiry.insert((new_deadline, id));
        true
    }

    /// Delete the session and its expiry entry. `None` if already gone.
    pub fn remove(&self, id: u32) -> Option<Session> {
        let mut inner = self.lock();
        let session = inner.sessions.remove(&id)?;
        inner.expiry.remove(&(session.deadline, id));
        Some(session)
    }

    /// Peek the earliest `(deadline, id)` pair without removing it.
    pub fn next_to_expire(&self) -> Option<(u64, u32)> {
        self.lock().expiry.iter().next().copied()
    }

    /// Remove and return every session whose deadline is at or before `now`,
    /// in ascending-deadline order.
    pub fn pop_expired(&self, now: u64) -> Vec<Session> {
        let mut inner = self.lock();
        let mut expired = Vec::new();

        while let Some(entry) = inner.expiry.first().copied() {
            let (deadline, id) = entry;
            if deadline > now {
                break;
            }
            inner.expiry.remove(&entry);
            if let Some(session) = inner.sessions.remove(&id) {
                expired.push(session);
            }
        }

        expired
    }

    /// Remove and return every session regardless of deadline, in
    /// ascending-deadline order. Shutdown drain path.
    pub fn drain_all(&self) -> Vec<Session> {
        let mut inner = self.lock();
        let mut drained = Vec::new();

        while let Some((_, id)) = inner.expiry.pop_first() {
            if let Some(session) = inner.sessions.remove(&id) {
                drained.push(session);
            }
        }

        drained
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    /// Table/index consistency: every session's `(deadline, id)` appears in
    /// the expiry index exactly once, and nothing else does. Test support.
    pub fn is_consistent(&self) -> bool {
        let inner = self.lock();
        inner.sessions.len() == inner.expiry.len()
            && inner
                .sessions
                .values()
                .all(|s| inner.expiry.contains(&(s.deadline, s.id)))
    }
}
