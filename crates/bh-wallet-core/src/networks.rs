use anyhow::{Context, Result};
use bh_api_types::{NetworkListEntry, is_canonical_c_chain};
use bh_storage::NetworkListRepository;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::add_chain::PendingAddChain;

/// User-visible list of networks: the two Avalanche C-Chains plus any L1s
/// the user added. Every mutation is written through to the repository.
pub struct NetworkListStore {
    repo: Arc<dyn NetworkListRepository>,
    entries: RwLock<Vec<NetworkListEntry>>,
}

impl NetworkListStore {
    pub fn seed() -> Vec<NetworkListEntry> {
        vec![NetworkListEntry::fuji_c_chain(), NetworkListEntry::mainnet_c_chain()]
    }

    /// Loads the persisted list, seeding and saving the defaults on first use.
    pub async fn load(repo: Arc<dyn NetworkListRepository>) -> Result<Self> {
        let entries = match repo.load_networks().await.context("failed to load network list")? {
            Some(entries) => entries,
            None => {
                let seeded = Self::seed();
                repo.save_networks(&seeded).await?;
                info!(count = seeded.len(), "seeded network list");
                seeded
            }
        };
        Ok(Self {
            repo,
            entries: RwLock::new(entries),
        })
    }

    pub async fn list(&self) -> Vec<NetworkListEntry> {
        self.entries.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<NetworkListEntry> {
        self.entries.read().await.iter().find(|entry| entry.id == id).cloned()
    }

    pub async fn find_by_evm_chain_id(&self, evm_chain_id: u64) -> Option<NetworkListEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.evm_chain_id == evm_chain_id)
            .cloned()
    }

    /// Networks a Builder Hub faucet can drip on.
    pub async fn faucet_networks(&self) -> Vec<NetworkListEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.has_builder_hub_faucet)
            .cloned()
            .collect()
    }

    /// Adds an L1, replacing any entry with the same id.
    pub async fn add_l1(&self, entry: NetworkListEntry) -> Result<()> {
        validate(&entry)?;
        let mut entries = self.entries.write().await;
        let mut updated = entries.clone();
        match updated.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => *existing = entry,
            None => updated.push(entry),
        }
        self.repo.save_networks(&updated).await?;
        *entries = updated;
        Ok(())
    }

    /// Removes an L1 by id. The primary network C-Chains cannot be removed;
    /// returns whether anything changed.
    pub async fn remove_l1(&self, id: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let mut updated = entries.clone();
        updated.retain(|entry| entry.id != id || is_canonical_c_chain(entry.evm_chain_id));
        if updated.len() == entries.len() {
            return Ok(false);
        }
        self.repo.save_networks(&updated).await?;
        *entries = updated;
        Ok(true)
    }

    /// Waits for the user's answer to an add-chain prompt and adds the
    /// confirmed entry. `None` when the prompt was cancelled.
    pub async fn complete_add(&self, pending: PendingAddChain) -> Result<Option<NetworkListEntry>> {
        let id = pending.id();
        match pending.wait().await {
            Ok(entry) => {
                self.add_l1(entry.clone()).await?;
                info!(%id, chain = entry.evm_chain_id, "added L1 to network list");
                Ok(Some(entry))
            }
            Err(reason) => {
                debug!(%id, "add chain prompt closed: {reason}");
                Ok(None)
            }
        }
    }

    pub async fn reset(&self) -> Result<()> {
        let mut entries = self.entries.write().await;
        let seeded = Self::seed();
        self.repo.save_networks(&seeded).await?;
        *entries = seeded;
        Ok(())
    }
}

fn validate(entry: &NetworkListEntry) -> Result<()> {
    if entry.id.trim().is_empty() {
        anyhow::bail!("network id is required");
    }
    if entry.name.trim().is_empty() {
        anyhow::bail!("network name is required");
    }
    if entry.rpc_url.trim().is_empty() {
        anyhow::bail!("rpc url is required for {}", entry.id);
    }
    if entry.evm_chain_id == 0 {
        anyhow::bail!("evm chain id is required for {}", entry.id);
    }
    Ok(())
}
