// Session registry: allocates ids, spawns session actors, resolves handles.
//
// The registry lock only guards the id -> handle table. Session state lives
// in the actors, so sessions never contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{SessionActor, SessionHandle, SessionSettings};
use crate::catalog::Catalog;
use crate::error::DraftError;

/// Session ids are six-digit codes that are easy to read out loud.
const ID_RANGE: std::ops::RangeInclusive<u32> = 100_000..=999_999;

struct Inner {
    sessions: HashMap<String, SessionHandle>,
    rng: StdRng,
}

pub struct SessionRegistry {
    inner: Mutex<Inner>,
    catalog: Arc<Catalog>,
    settings: SessionSettings,
}

/// Draw random ids until one is not `taken`, giving up after `attempts`.
pub fn allocate_id<R: Rng + ?Sized>(
    rng: &mut R,
    attempts: usize,
    taken: impl Fn(&str) -> bool,
) -> Result<String, DraftError> {
    for _ in 0..attempts {
        let candidate = rng.random_range(ID_RANGE).to_string();
        if !taken(&candidate) {
            return Ok(candidate);
        }
        debug!("Session id {candidate} already in use, drawing again");
    }
    Err(DraftError::SessionIdsExhausted { attempts })
}

impl SessionRegistry {
    pub fn new(catalog: Arc<Catalog>, settings: SessionSettings) -> Self {
        Self::with_rng(catalog, settings, StdRng::from_os_rng())
    }

    pub fn with_rng(catalog: Arc<Catalog>, settings: SessionSettings, rng: StdRng) -> Self {
        SessionRegistry {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                rng,
            }),
            catalog,
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a session hosted by `host` and spawn its actor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(&self, host: &str) -> Result<SessionHandle, DraftError> {
        let mut inner = self.lock();
        let Inner { sessions, rng } = &mut *inner;

        let id = allocate_id(rng, self.settings.id_attempts, |candidate| {
            sessions.get(candidate).is_some_and(|h| !h.is_closed())
        })?;

        let (tx, rx) = mpsc::channel(self.settings.command_buffer);
        let handle = SessionHandle::new(id.clone(), tx);
        let actor = SessionActor::new(
            id.clone(),
            host.to_string(),
            Arc::clone(&self.catalog),
            self.settings.clone(),
            StdRng::from_rng(rng),
        );
        tokio::spawn(actor.run(rx));
        sessions.insert(id.clone(), handle.clone());

        info!("Session {id} created by {host}");
        Ok(handle)
    }

    /// Resolve a live session. Expired sessions are dropped on sight.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        let mut inner = self.lock();
        let expired = match inner.sessions.get(id) {
            Some(handle) if !handle.is_closed() => return Some(handle.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!("Session {id} has expired");
            inner.sessions.remove(id);
        }
        None
    }

    /// Forget every session whose actor has stopped. Returns how many went.
    pub fn sweep(&self) -> usize {
        let mut inner = self.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|_, handle| !handle.is_closed());
        let removed = before - inner.sessions.len();
        if removed > 0 {
            info!("Swept {removed} expired sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
