//! Session store, keyed by user, atomic per key.
//!
//! `AppState` holds an `Arc<dyn SessionStore>`; the in-memory `DashMap`
//! backend can be swapped for a shared cache or database without touching the
//! state machine.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::conversation::session::Session;
use crate::transport::UserId;

/// Closure applied to the current session under the key's lock. Returning
/// `None` removes the session.
pub type SessionUpdate<'a> = Box<dyn FnOnce(Option<Session>) -> Option<Session> + Send + 'a>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, user_id: UserId) -> Result<Option<Session>>;

    async fn put(&self, session: Session) -> Result<()>;

    /// Reads, transforms, and writes one session without interleaving with
    /// other writers of the same key. Returns the stored result.
    async fn update<'a>(&'a self, user_id: UserId, apply: SessionUpdate<'a>)
        -> Result<Option<Session>>;

    /// Drops sessions idle since before `cutoff`. Sessions mid-rewrite are kept.
    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn len(&self) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<UserId, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, user_id: UserId) -> Result<Option<Session>> {
        Ok(self.sessions.get(&user_id).map(|s| s.value().clone()))
    }

    async fn put(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.user_id, session);
        Ok(())
    }

    async fn update<'a>(
        &'a self,
        user_id: UserId,
        apply: SessionUpdate<'a>,
    ) -> Result<Option<Session>> {
        // The entry guard holds the shard lock until this match ends.
        let stored = match self.sessions.entry(user_id) {
            Entry::Occupied(mut occupied) => match apply(Some(occupied.get().clone())) {
                Some(next) => {
                    occupied.insert(next.clone());
                    Some(next)
                }
                None => {
                    occupied.remove();
                    None
                }
            },
            Entry::Vacant(vacant) => match apply(None) {
                Some(next) => {
                    vacant.insert(next.clone());
                    Some(next)
                }
                None => None,
            },
        };
        Ok(stored)
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.is_optimizing() || session.updated_at >= cutoff);
        Ok(before.saturating_sub(self.sessions.len()))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.sessions.len())
    }
}
