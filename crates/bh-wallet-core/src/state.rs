//! Process-wide wallet state.
//!
//! All mutation goes through [`WalletStore::dispatch`]; readers take
//! snapshots or subscribe to the `watch` channel and never hold their own
//! copy of the live state.

use bh_api_types::{ChainKey, NetworkListEntry};
use bh_chain_client::BalanceSource;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletState {
    pub address: Option<String>,
    pub chain_id: Option<u64>,
    pub chain_name: Option<String>,
    /// Unknown until first derived. Survives disconnects: it is the user's
    /// network preference, not part of the connection.
    pub is_testnet: Option<bool>,
    pub p_chain_address: Option<String>,
    pub core_eth_address: Option<String>,
    pub balances: HashMap<ChainKey, f64>,
    pub bootstrapped: bool,
    pub status: ConnectionStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalletAction {
    SetAddress(Option<String>),
    SetChainId(Option<u64>),
    SetChainName(Option<String>),
    SetTestnet(bool),
    SetPChainAddress(Option<String>),
    SetCoreEthAddress(Option<String>),
    SetStatus(ConnectionStatus),
    SetBootstrapped(bool),
    /// Addresses derived for `account`; dropped if the account changed
    /// while they were being computed.
    DerivedAddresses {
        account: String,
        p_chain: Option<String>,
        core_eth: Option<String>,
    },
    /// Result of one balance query. Applied only when `version` is newer
    /// than the last applied version for `chain` and `account` is still the
    /// connected address.
    ApplyBalance {
        chain: ChainKey,
        account: String,
        version: u64,
        amount: f64,
    },
    /// Wallet locked or disconnected: drop every connection-derived field.
    ClearConnection,
}

#[derive(Default)]
struct Inner {
    state: WalletState,
    balance_versions: HashMap<ChainKey, u64>,
}

impl Inner {
    fn reduce(&mut self, action: WalletAction) -> bool {
        let state = &mut self.state;
        match action {
            WalletAction::SetAddress(address) => {
                if state.address != address {
                    // balances and derived addresses belong to the old account
                    state.balances.clear();
                    state.p_chain_address = None;
                    state.core_eth_address = None;
                }
                state.address = address;
            }
            WalletAction::SetChainId(chain_id) => state.chain_id = chain_id,
            WalletAction::SetChainName(name) => state.chain_name = name,
            WalletAction::SetTestnet(flag) => state.is_testnet = Some(flag),
            WalletAction::SetPChainAddress(address) => state.p_chain_address = address,
            WalletAction::SetCoreEthAddress(address) => state.core_eth_address = address,
            WalletAction::SetStatus(status) => state.status = status,
            WalletAction::SetBootstrapped(flag) => state.bootstrapped = flag,
            WalletAction::DerivedAddresses {
                account,
                p_chain,
                core_eth,
            } => {
                if state.address.as_deref() != Some(account.as_str()) {
                    debug!(%account, "discarding addresses derived for a previous account");
                    return false;
                }
                state.p_chain_address = p_chain;
                state.core_eth_address = core_eth;
            }
            WalletAction::ApplyBalance {
                chain,
                account,
                version,
                amount,
            } => {
                if state.address.as_deref() != Some(account.as_str()) {
                    debug!(%chain, %account, "discarding balance for a previous account");
                    return false;
                }
                let last = self.balance_versions.get(&chain).copied().unwrap_or(0);
                if version <= last {
                    debug!(%chain, version, last, "discarding out-of-order balance");
                    return false;
                }
                self.balance_versions.insert(chain.clone(), version);
                state.balances.insert(chain, amount);
            }
            WalletAction::ClearConnection => {
                state.address = None;
                state.chain_id = None;
                state.chain_name = None;
                state.p_chain_address = None;
                state.core_eth_address = None;
                state.balances.clear();
                state.status = ConnectionStatus::Disconnected;
            }
        }
        true
    }
}

pub struct WalletStore {
    inner: Mutex<Inner>,
    snapshots: watch::Sender<WalletState>,
    next_version: AtomicU64,
}

impl Default for WalletStore {
    fn default() -> Self {
        let (snapshots, _) = watch::channel(WalletState::default());
        Self {
            inner: Mutex::new(Inner::default()),
            snapshots,
            next_version: AtomicU64::new(1),
        }
    }
}

impl WalletStore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies one action and publishes the new snapshot. Returns `false`
    /// when the action was discarded as stale.
    pub fn dispatch(&self, action: WalletAction) -> bool {
        let mut inner = self.lock();
        let applied = inner.reduce(action);
        if applied {
            self.snapshots.send_replace(inner.state.clone());
        }
        applied
    }

    pub fn snapshot(&self) -> WalletState {
        self.lock().state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletState> {
        self.snapshots.subscribe()
    }

    pub fn set_address(&self, address: Option<String>) {
        self.dispatch(WalletAction::SetAddress(address));
    }

    pub fn set_chain_id(&self, chain_id: Option<u64>) {
        self.dispatch(WalletAction::SetChainId(chain_id));
    }

    pub fn set_chain_name(&self, name: Option<String>) {
        self.dispatch(WalletAction::SetChainName(name));
    }

    pub fn set_testnet(&self, is_testnet: bool) {
        self.dispatch(WalletAction::SetTestnet(is_testnet));
    }

    pub fn set_p_chain_address(&self, address: Option<String>) {
        self.dispatch(WalletAction::SetPChainAddress(address));
    }

    pub fn set_core_eth_address(&self, address: Option<String>) {
        self.dispatch(WalletAction::SetCoreEthAddress(address));
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.dispatch(WalletAction::SetStatus(status));
    }

    pub fn set_bootstrapped(&self, bootstrapped: bool) {
        self.dispatch(WalletAction::SetBootstrapped(bootstrapped));
    }

    pub fn clear_connection(&self) {
        self.dispatch(WalletAction::ClearConnection);
    }

    /// Avalanche network name handed to SDK calls (`fuji` / `mainnet`).
    pub fn avalanche_network_name(&self) -> Option<&'static str> {
        match self.lock().state.is_testnet {
            Some(true) => Some("fuji"),
            Some(false) => Some("mainnet"),
            None => None,
        }
    }

    /// Reserves the next refresh version. Versions are monotonic across the
    /// whole store, so a later request always outranks an earlier one.
    pub fn begin_balance_refresh(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    /// Queries every network concurrently and applies each result by chain
    /// key as it lands. A failing network is logged and skipped. Returns the
    /// number of balances applied.
    pub async fn update_all_balances(&self, source: &dyn BalanceSource, networks: &[NetworkListEntry]) -> usize {
        let Some(account) = self.snapshot().address else {
            debug!("no connected address; skipping balance refresh");
            return 0;
        };
        let account = account.as_str();

        let refreshes = networks.iter().map(|network| {
            let version = self.begin_balance_refresh();
            async move {
                match source.native_balance(network, account).await {
                    Ok(amount) => self.dispatch(WalletAction::ApplyBalance {
                        chain: network.chain_key(),
                        account: account.to_owned(),
                        version,
                        amount,
                    }),
                    Err(err) => {
                        warn!(network = %network.name, "balance refresh failed: {err:#}");
                        false
                    }
                }
            }
        });

        join_all(refreshes).await.into_iter().filter(|applied| *applied).count()
    }
}
