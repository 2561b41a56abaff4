use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::domain::{Application, ArtifactHandle, Nickname, RequesterId};

/// Consumed artifacts remembered so a late duplicate click can be answered as a no-op.
const SETTLED_CAPACITY: usize = 1024;

/// What a published decision request points back to. `application_id` pins the request to the
/// row it was rendered from; a later application under the same nickname is a different row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub application_id: i64,
    pub nickname: Nickname,
    pub requester_id: RequesterId,
}

impl Correlation {
    pub fn matches(&self, application: &Application) -> bool {
        self.application_id == application.id && self.requester_id == application.requester_id
    }
}

#[derive(Debug, Default)]
struct Settled {
    order: VecDeque<ArtifactHandle>,
    entries: HashMap<ArtifactHandle, Correlation>,
}

/// Side table from decision artifacts to applications, plus one async lock per nickname so
/// work on the same application runs one call at a time.
#[derive(Debug, Default)]
pub struct DecisionLedger {
    artifacts: Mutex<HashMap<ArtifactHandle, Correlation>>,
    settled: Mutex<Settled>,
    locks: Mutex<HashMap<Nickname, Arc<AsyncMutex<()>>>>,
}

impl DecisionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, artifact: ArtifactHandle, correlation: Correlation) {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(artifact, correlation);
    }

    pub fn resolve(&self, artifact: &ArtifactHandle) -> Option<Correlation> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(artifact)
            .cloned()
    }

    /// Discards an artifact; only the first caller gets the correlation back. The artifact is
    /// remembered as settled for a bounded while afterwards.
    pub fn take(&self, artifact: &ArtifactHandle) -> Option<Correlation> {
        let correlation = self
            .artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(artifact)?;

        let mut settled = self.settled.lock().unwrap_or_else(PoisonError::into_inner);
        if settled
            .entries
            .insert(artifact.clone(), correlation.clone())
            .is_none()
        {
            settled.order.push_back(artifact.clone());
        }
        while settled.order.len() > SETTLED_CAPACITY {
            if let Some(oldest) = settled.order.pop_front() {
                settled.entries.remove(&oldest);
            }
        }
        Some(correlation)
    }

    /// Correlation of an artifact that was already consumed by an earlier decision.
    pub fn settled(&self, artifact: &ArtifactHandle) -> Option<Correlation> {
        self.settled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(artifact)
            .cloned()
    }

    /// Discards every artifact published for `nickname`.
    pub fn forget(&self, nickname: &Nickname) -> Vec<ArtifactHandle> {
        let mut artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
        let handles: Vec<ArtifactHandle> = artifacts
            .iter()
            .filter(|(_, correlation)| &correlation.nickname == nickname)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in &handles {
            artifacts.remove(handle);
        }
        handles
    }

    pub fn outstanding(&self) -> usize {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits for exclusive access to `nickname`. Unrelated nicknames never wait on each other.
    pub async fn serialize(&self, nickname: &Nickname) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(nickname.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
