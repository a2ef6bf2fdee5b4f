use anyhow::{Context, Result};
use async_trait::async_trait;
use bh_api_types::{ChainKey, NetworkListEntry};
use rocksdb::{DB, Options};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[async_trait]
pub trait NetworkListRepository: Send + Sync {
    async fn save_networks(&self, networks: &[NetworkListEntry]) -> Result<()>;
    /// `None` when nothing was ever saved, so callers can seed defaults.
    async fn load_networks(&self) -> Result<Option<Vec<NetworkListEntry>>>;
    async fn clear_networks(&self) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaucetClaimRecord {
    pub user_id: String,
    pub chain: String,
    pub destination: String,
    pub tx_hash: Option<String>,
    pub claimed_at_epoch_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Reserved,
    CoolingDown { retry_after_ms: u128 },
}

#[async_trait]
pub trait FaucetClaimStore: Send + Sync {
    async fn last_claim(&self, user_id: &str, chain: &ChainKey) -> Result<Option<FaucetClaimRecord>>;

    /// Atomically checks the cooldown for `(user, chain)` and, when it has
    /// elapsed, stores `record` as the newest claim.
    async fn try_reserve_claim(&self, record: &FaucetClaimRecord, cooldown_ms: u128) -> Result<ClaimOutcome>;

    /// Overwrites the stored claim, typically to attach the tx hash.
    async fn record_claim(&self, record: &FaucetClaimRecord) -> Result<()>;

    /// Drops a reservation whose transfer never happened.
    async fn release_claim(&self, user_id: &str, chain: &ChainKey) -> Result<()>;
}

fn cooldown_outcome(existing: Option<&FaucetClaimRecord>, now: u128, cooldown_ms: u128) -> ClaimOutcome {
    match existing {
        Some(previous) if now < previous.claimed_at_epoch_ms.saturating_add(cooldown_ms) => {
            ClaimOutcome::CoolingDown {
                retry_after_ms: previous.claimed_at_epoch_ms + cooldown_ms - now,
            }
        }
        _ => ClaimOutcome::Reserved,
    }
}

fn claim_key(user_id: &str, chain: &str) -> String {
    format!("faucet-claim:{chain}:{user_id}")
}

#[derive(Default)]
pub struct InMemoryStore {
    networks: RwLock<Option<Vec<NetworkListEntry>>>,
    claims: RwLock<HashMap<String, FaucetClaimRecord>>,
}

#[async_trait]
impl NetworkListRepository for InMemoryStore {
    async fn save_networks(&self, networks: &[NetworkListEntry]) -> Result<()> {
        *self.networks.write().await = Some(networks.to_vec());
        Ok(())
    }

    async fn load_networks(&self) -> Result<Option<Vec<NetworkListEntry>>> {
        Ok(self.networks.read().await.clone())
    }

    async fn clear_networks(&self) -> Result<()> {
        *self.networks.write().await = None;
        Ok(())
    }
}

#[async_trait]
impl FaucetClaimStore for InMemoryStore {
    async fn last_claim(&self, user_id: &str, chain: &ChainKey) -> Result<Option<FaucetClaimRecord>> {
        let guard = self.claims.read().await;
        Ok(guard.get(&claim_key(user_id, &chain.0)).cloned())
    }

    async fn try_reserve_claim(&self, record: &FaucetClaimRecord, cooldown_ms: u128) -> Result<ClaimOutcome> {
        let mut guard = self.claims.write().await;
        let key = claim_key(&record.user_id, &record.chain);
        let outcome = cooldown_outcome(guard.get(&key), record.claimed_at_epoch_ms, cooldown_ms);
        if outcome == ClaimOutcome::Reserved {
            guard.insert(key, record.clone());
        }
        Ok(outcome)
    }

    async fn record_claim(&self, record: &FaucetClaimRecord) -> Result<()> {
        let mut guard = self.claims.write().await;
        guard.insert(claim_key(&record.user_id, &record.chain), record.clone());
        Ok(())
    }

    async fn release_claim(&self, user_id: &str, chain: &ChainKey) -> Result<()> {
        let mut guard = self.claims.write().await;
        guard.remove(&claim_key(user_id, &chain.0));
        Ok(())
    }
}

pub struct RocksDbStore {
    db: Arc<DB>,
    // RocksDB has no compare-and-set; claim reservations serialize here
    claim_lock: Mutex<()>,
}

impl RocksDbStore {
    const NETWORKS_KEY: &'static str = "networks:list";

    pub fn open_default(path: &str) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path).with_context(|| format!("failed to open RocksDB at {path}"))?;
        Ok(Self {
            db: Arc::new(db),
            claim_lock: Mutex::new(()),
        })
    }

    fn load_claim(&self, key: &str) -> Result<Option<FaucetClaimRecord>> {
        match self.db.get(key.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn put_claim(&self, record: &FaucetClaimRecord) -> Result<()> {
        let key = claim_key(&record.user_id, &record.chain);
        self.db.put(key.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }
}

#[async_trait]
impl NetworkListRepository for RocksDbStore {
    async fn save_networks(&self, networks: &[NetworkListEntry]) -> Result<()> {
        let value = serde_json::to_vec(networks)?;
        self.db.put(Self::NETWORKS_KEY.as_bytes(), value)?;
        Ok(())
    }

    async fn load_networks(&self) -> Result<Option<Vec<NetworkListEntry>>> {
        match self.db.get(Self::NETWORKS_KEY.as_bytes())? {
            Some(raw) => Ok(Some(
                serde_json::from_slice(&raw).context("stored network list is corrupt")?,
            )),
            None => Ok(None),
        }
    }

    async fn clear_networks(&self) -> Result<()> {
        self.db.delete(Self::NETWORKS_KEY.as_bytes())?;
        Ok(())
    }
}

#[async_trait]
impl FaucetClaimStore for RocksDbStore {
    async fn last_claim(&self, user_id: &str, chain: &ChainKey) -> Result<Option<FaucetClaimRecord>> {
        self.load_claim(&claim_key(user_id, &chain.0))
    }

    async fn try_reserve_claim(&self, record: &FaucetClaimRecord, cooldown_ms: u128) -> Result<ClaimOutcome> {
        let _guard = self
            .claim_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("claim lock poisoned"))?;
        let existing = self.load_claim(&claim_key(&record.user_id, &record.chain))?;
        let outcome = cooldown_outcome(existing.as_ref(), record.claimed_at_epoch_ms, cooldown_ms);
        if outcome == ClaimOutcome::Reserved {
            self.put_claim(record)?;
        }
        Ok(outcome)
    }

    async fn record_claim(&self, record: &FaucetClaimRecord) -> Result<()> {
        self.put_claim(record)
    }

    async fn release_claim(&self, user_id: &str, chain: &ChainKey) -> Result<()> {
        self.db.delete(claim_key(user_id, &chain.0).as_bytes())?;
        Ok(())
    }
}
