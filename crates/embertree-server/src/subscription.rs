//! Subscription registry and change fan-out

use bytes::Bytes;
use dashmap::DashMap;
use embertree_core::TreePath;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::session::{Session, SessionId};

/// Sessions interested in each element path
///
/// Sessions that have gone away are only removed when a notification for
/// one of their paths finds them missing from the live session set.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_path: DashMap<TreePath, HashSet<SessionId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the session was already subscribed
    pub fn subscribe(&self, path: &TreePath, session: &SessionId) -> bool {
        self.by_path
            .entry(path.clone())
            .or_default()
            .insert(session.clone())
    }

    /// Returns false if the session was not subscribed
    pub fn unsubscribe(&self, path: &TreePath, session: &SessionId) -> bool {
        let removed = match self.by_path.get_mut(path) {
            Some(mut entry) => entry.remove(session),
            None => false,
        };
        self.by_path.remove_if(path, |_, set| set.is_empty());
        removed
    }

    pub fn is_subscribed(&self, path: &TreePath, session: &SessionId) -> bool {
        self.by_path
            .get(path)
            .map(|set| set.contains(session))
            .unwrap_or(false)
    }

    /// Snapshot of the subscribers of `path`
    pub fn subscribers(&self, path: &TreePath) -> Vec<SessionId> {
        self.by_path
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Queue `data` to every live subscriber of `path` except `origin`,
    /// dropping subscribers that are no longer live. Returns the number of
    /// sessions the push was queued to.
    pub fn notify(
        &self,
        path: &TreePath,
        data: &Bytes,
        origin: Option<&SessionId>,
        sessions: &DashMap<SessionId, Arc<Session>>,
    ) -> usize {
        let mut delivered = 0;
        let mut stale = Vec::new();

        for id in self.subscribers(path) {
            if origin == Some(&id) {
                continue;
            }
            match sessions.get(&id) {
                Some(session) => {
                    if session.queue(data.clone()) {
                        delivered += 1;
                    }
                }
                None => stale.push(id),
            }
        }

        if !stale.is_empty() {
            debug!("Pruning {} stale subscribers of {}", stale.len(), path);
            if let Some(mut set) = self.by_path.get_mut(path) {
                for id in &stale {
                    set.remove(id);
                }
            }
            self.by_path.remove_if(path, |_, set| set.is_empty());
        }

        delivered
    }

    /// Total (path, session) memberships
    pub fn len(&self) -> usize {
        self.by_path.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Number of paths with at least one subscriber
    pub fn path_count(&self) -> usize {
        self.by_path.len()
    }
}
