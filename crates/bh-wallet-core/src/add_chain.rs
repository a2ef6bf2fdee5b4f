//! Correlates "add this L1" prompts with their outcome.
//!
//! Each prompt gets its own id and one-shot reply channel, so a late or
//! duplicate answer can only ever settle the request it was issued for.

use bh_api_types::NetworkListEntry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct AddChainRequest {
    pub id: Uuid,
    pub entry: NetworkListEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddChainRejected {
    #[error("add chain request was cancelled")]
    Cancelled,
    #[error("add chain request was abandoned before it was answered")]
    Abandoned,
}

type Outcome = Result<NetworkListEntry, AddChainRejected>;
type Waiters = Mutex<HashMap<Uuid, oneshot::Sender<Outcome>>>;

fn lock(waiters: &Waiters) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<Outcome>>> {
    waiters.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waiting half of an open request. Dropping it, or the `wait` future,
/// withdraws the request.
pub struct PendingAddChain {
    id: Uuid,
    rx: oneshot::Receiver<Outcome>,
    waiters: Weak<Waiters>,
}

impl PendingAddChain {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn wait(mut self) -> Outcome {
        (&mut self.rx).await.unwrap_or(Err(AddChainRejected::Abandoned))
    }
}

impl Drop for PendingAddChain {
    fn drop(&mut self) {
        let Some(waiters) = self.waiters.upgrade() else {
            return;
        };
        if lock(&waiters).remove(&self.id).is_some() {
            debug!(id = %self.id, "withdrew unanswered add chain request");
        }
    }
}

#[derive(Default)]
pub struct AddChainRequests {
    pending: Arc<Waiters>,
}

impl AddChainRequests {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<Outcome>>> {
        lock(&self.pending)
    }

    pub fn open(&self, entry: NetworkListEntry) -> (AddChainRequest, PendingAddChain) {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        debug!(%id, chain = entry.evm_chain_id, "opened add chain request");
        let pending = PendingAddChain {
            id,
            rx,
            waiters: Arc::downgrade(&self.pending),
        };
        (AddChainRequest { id, entry }, pending)
    }

    /// Settles `id` with the confirmed entry. `false` when the id is unknown
    /// or was already settled.
    pub fn resolve(&self, id: Uuid, entry: NetworkListEntry) -> bool {
        self.settle(id, Ok(entry))
    }

    pub fn reject(&self, id: Uuid) -> bool {
        self.settle(id, Err(AddChainRejected::Cancelled))
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn settle(&self, id: Uuid, outcome: Outcome) -> bool {
        let Some(tx) = self.lock().remove(&id) else {
            debug!(%id, "ignoring answer for unknown add chain request");
            return false;
        };
        // the waiter may have gone away; the request is settled either way
        let _ = tx.send(outcome);
        true
    }
}
