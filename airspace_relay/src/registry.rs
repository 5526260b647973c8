// The live session table.
//
// Shared by the control accept loop (create), RPC handlers on arbitrary
// threads (get/update), and the liveness maintainer (iterate/remove). A
// single `RwLock` guards the map; no socket I/O ever happens while it is
// held, so callers that need to push to a client first clone the session's
// `Arc<ControlChannel>` and write after the lock is released.
//
// Ids come from a registry-owned counter starting at 1. They are unique for
// the life of the process and never reused; 0 is never issued.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use airspace_protocol::{PermissionTier, SessionId};

use crate::channel::ControlChannel;

#[derive(Clone)]
pub struct Session {
    pub id: SessionId,
    pub auth_id: Option<String>,
    pub tier: PermissionTier,
    pub peer: Option<SocketAddr>,
    /// `None` for the embedded session, which has no control socket.
    pub channel: Option<Arc<ControlChannel>>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
    next_id: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new unauthenticated session.
    pub fn create(
        &self,
        peer: Option<SocketAddr>,
        channel: Option<Arc<ControlChannel>>,
    ) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.write().insert(
            id,
            Session {
                id,
                auth_id: None,
                tier: PermissionTier::Unauthenticated,
                peer,
                channel,
            },
        );
        id
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.read().get(&id).cloned()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.read().contains_key(&id)
    }

    /// Run `mutator` on the session under the write lock.
    pub fn update<T>(&self, id: SessionId, mutator: impl FnOnce(&mut Session) -> T) -> Option<T> {
        self.write().get_mut(&id).map(mutator)
    }

    pub fn remove(&self, id: SessionId) -> Option<Session> {
        self.write().remove(&id)
    }

    pub fn for_each(&self, mut f: impl FnMut(&Session)) {
        for session in self.read().values() {
            f(session);
        }
    }

    /// Sessions that own a control socket, cloned out of the lock.
    pub fn channels(&self) -> Vec<(SessionId, Arc<ControlChannel>)> {
        self.read()
            .values()
            .filter_map(|s| s.channel.clone().map(|c| (s.id, c)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
