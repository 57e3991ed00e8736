//! Open session bookkeeping

use std::sync::Arc;

use hark::Reply;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::{Message, Resolved, Session, SessionError, Outbound};
use crate::guard::Rejection;
use crate::permission::AccessPolicy;

struct Slot {
    id: String,
    session: Arc<Mutex<Session>>,
}

/// Outcome of offering one message to every open session
#[derive(Debug, Default)]
pub struct SessionResolution {
    /// Session id and handler result, when a session claimed the message
    pub claimed: Option<(String, Result<Reply, Rejection>)>,
    /// Closing replies of sessions canceled by this message
    pub notices: Vec<Reply>,
}

impl SessionResolution {
    pub fn is_claimed(&self) -> bool {
        self.claimed.is_some()
    }
}

/// Registry of open sessions, in open order.
///
/// Each session sits behind its own lock. A session that is still busy with
/// an earlier event is skipped rather than waited on.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    slots: Arc<RwLock<Vec<Slot>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, session: Session) -> Result<(), SessionError> {
        let mut slots = self.slots.write().await;
        let id = session.id().to_string();
        if slots.iter().any(|s| s.id == id) {
            return Err(SessionError::DuplicateId(id));
        }
        tracing::info!(session = %id, "Session opened");
        slots.push(Slot {
            id,
            session: Arc::new(Mutex::new(session)),
        });
        Ok(())
    }

    /// Close a session from outside its handlers and return its closing reply.
    pub async fn close(&self, id: &str, reason: Option<String>) -> Result<Reply, SessionError> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let reply = {
            let mut session = session
                .try_lock()
                .map_err(|_| SessionError::Busy(id.to_string()))?;
            session.close(reason).await
        };
        self.remove(id).await;
        Ok(reply)
    }

    /// Offer a message to each open session until one claims it.
    pub async fn resolve(&self, message: &Message, policy: &AccessPolicy) -> SessionResolution {
        let mut resolution = SessionResolution::default();
        let mut closed = Vec::new();

        for (id, session) in self.snapshot().await {
            let Ok(mut session) = session.try_lock() else {
                tracing::debug!(session = %id, "Session busy, skipping");
                continue;
            };
            let resolved = session.resolve(message, policy).await;
            if session.is_closed() {
                closed.push(id.clone());
            }
            drop(session);

            match resolved {
                Resolved::Skipped | Resolved::Missed(None) => {}
                Resolved::Missed(Some(notice)) => {
                    if !notice.is_silent() {
                        resolution.notices.push(notice);
                    }
                }
                Resolved::Claimed(result) => {
                    resolution.claimed = Some((id, result));
                    break;
                }
            }
        }

        for id in closed {
            self.remove(&id).await;
        }
        resolution
    }

    /// Tick every open session; returns replies owed to channels.
    pub async fn tick(&self) -> Vec<Outbound> {
        let now = Instant::now();
        let mut outbound = Vec::new();
        let mut closed = Vec::new();

        for (id, session) in self.snapshot().await {
            let Ok(mut session) = session.try_lock() else {
                continue;
            };
            if let Some(out) = session.tick(now).await {
                outbound.push(out);
            }
            if session.is_closed() {
                closed.push(id);
            }
        }

        for id in closed {
            self.remove(&id).await;
        }
        outbound
    }

    /// Run `f` against an open session, waiting for its lock.
    pub async fn with_session<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let session = self.get(id).await?;
        let mut session = session.lock().await;
        Some(f(&mut session))
    }

    pub async fn ids(&self) -> Vec<String> {
        self.slots.read().await.iter().map(|s| s.id.clone()).collect()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.slots.read().await.iter().any(|s| s.id == id)
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    async fn get(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.slots
            .read()
            .await
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.session.clone())
    }

    async fn snapshot(&self) -> Vec<(String, Arc<Mutex<Session>>)> {
        self.slots
            .read()
            .await
            .iter()
            .map(|s| (s.id.clone(), s.session.clone()))
            .collect()
    }

    async fn remove(&self, id: &str) {
        self.slots.write().await.retain(|s| s.id != id);
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}
