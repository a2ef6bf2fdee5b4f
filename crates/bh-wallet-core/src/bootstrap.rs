//! Keeps the [`WalletStore`] in step with what the wallet reports.

use bh_chain_client::BalanceSource;
use bh_wallet_rpc::{RpcError, WalletEvent, WalletProvider, methods};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::networks::NetworkListStore;
use crate::state::{ConnectionStatus, WalletAction, WalletStore};

pub struct WalletEventBootstrap {
    provider: Arc<dyn WalletProvider>,
    store: Arc<WalletStore>,
    balances: Arc<dyn BalanceSource>,
    networks: Arc<NetworkListStore>,
}

impl WalletEventBootstrap {
    /// Starts listening to wallet events and restores any session the user
    /// already authorized. Returns `None` when no wallet is present.
    pub async fn mount(
        provider: Option<Arc<dyn WalletProvider>>,
        store: Arc<WalletStore>,
        balances: Arc<dyn BalanceSource>,
        networks: Arc<NetworkListStore>,
    ) -> Option<MountedBootstrap> {
        let Some(provider) = provider else {
            debug!("no wallet provider; skipping event bootstrap");
            return None;
        };
        let bootstrap = Arc::new(Self {
            provider,
            store,
            balances,
            networks,
        });

        // subscribe before the silent query so no event slips between them
        let events = bootstrap.provider.subscribe();
        bootstrap.restore_session().await;
        bootstrap.store.set_bootstrapped(true);

        let task = tokio::spawn(bootstrap.clone().run(events));
        info!("wallet event bootstrap mounted");
        Some(MountedBootstrap {
            bootstrap,
            task: Some(task),
        })
    }

    /// Prompts the wallet for account access.
    pub async fn connect(&self) -> Result<String, RpcError> {
        if self.store.snapshot().status == ConnectionStatus::Disconnected {
            self.store.set_status(ConnectionStatus::Connecting);
        }
        let accounts = match methods::request_accounts(self.provider.as_ref()).await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!("wallet connection failed: {err}");
                self.store.clear_connection();
                return Err(err);
            }
        };
        let first = accounts.first().cloned();
        self.on_accounts_changed(accounts).await;
        first.ok_or_else(|| RpcError::invalid_response("eth_requestAccounts", "wallet returned no accounts"))
    }

    pub async fn refresh_balances(&self) -> usize {
        let networks = self.networks.list().await;
        self.store.update_all_balances(self.balances.as_ref(), &networks).await
    }

    pub async fn handle_event(&self, event: WalletEvent) {
        match event {
            WalletEvent::AccountsChanged(accounts) => self.on_accounts_changed(accounts).await,
            WalletEvent::ChainChanged(chain_id) => self.on_chain_changed(chain_id).await,
        }
    }

    async fn run(self: Arc<Self>, mut events: broadcast::Receiver<WalletEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed wallet events; re-reading accounts");
                    self.restore_session().await;
                }
                Err(RecvError::Closed) => {
                    info!("wallet event stream closed");
                    break;
                }
            }
        }
    }

    async fn restore_session(&self) {
        match methods::get_accounts(self.provider.as_ref()).await {
            Ok(accounts) => self.on_accounts_changed(accounts).await,
            Err(err) => warn!("silent account query failed: {err}"),
        }
    }

    async fn on_accounts_changed(&self, accounts: Vec<String>) {
        let Some(account) = accounts.first().cloned() else {
            info!("wallet locked or disconnected");
            self.store.clear_connection();
            return;
        };
        if accounts.len() > 1 {
            debug!(ignored = accounts.len() - 1, "wallet exposed several accounts; using the first");
        }

        self.store.set_address(Some(account.clone()));
        if self.store.snapshot().status != ConnectionStatus::Connected {
            self.store.set_status(ConnectionStatus::Connecting);
        }

        let chain_id = match methods::get_chain_id(self.provider.as_ref()).await {
            Ok(chain_id) => chain_id,
            Err(err) => {
                warn!(%account, "could not read wallet chain: {err}");
                self.store.clear_connection();
                return;
            }
        };
        self.store.set_chain_id(Some(chain_id));
        self.sync_chain_details(chain_id).await;
        self.derive_addresses(&account).await;
        self.store.set_status(ConnectionStatus::Connected);

        let refreshed = self.refresh_balances().await;
        info!(%account, chain_id, refreshed, "wallet connected");
    }

    async fn on_chain_changed(&self, chain_id: u64) {
        self.store.set_chain_id(Some(chain_id));
        let flipped = self.sync_chain_details(chain_id).await;
        if flipped {
            if let Some(account) = self.store.snapshot().address {
                self.derive_addresses(&account).await;
            }
        }
        debug!(chain_id, "wallet switched chain");
    }

    /// Best-effort testnet flag and display name for `chain_id`. Returns
    /// whether the testnet flag changed.
    async fn sync_chain_details(&self, chain_id: u64) -> bool {
        let known = self.networks.find_by_evm_chain_id(chain_id).await;
        let (is_testnet, wallet_name) = match methods::get_ethereum_chain(self.provider.as_ref()).await {
            Ok(info) => (Some(info.is_testnet), info.chain_name),
            Err(err) => {
                warn!(chain_id, "could not read chain details: {err}");
                (known.as_ref().and_then(|entry| entry.is_testnet), None)
            }
        };

        let name = known.map(|entry| entry.name).or(wallet_name);
        self.store.set_chain_name(name);

        let Some(is_testnet) = is_testnet else {
            return false;
        };
        let previous = self.store.snapshot().is_testnet;
        self.store.set_testnet(is_testnet);
        previous.is_some_and(|previous| previous != is_testnet)
    }

    async fn derive_addresses(&self, account: &str) {
        let Some(network) = self.store.avalanche_network_name() else {
            debug!(%account, "network unknown; P-Chain address not derived");
            return;
        };
        let p_chain = methods::get_p_chain_address(self.provider.as_ref(), network)
            .await
            .inspect_err(|err| warn!(%account, "P-Chain address derivation failed: {err}"))
            .ok();
        let core_eth = methods::get_core_eth_address(self.provider.as_ref(), network)
            .await
            .inspect_err(|err| warn!(%account, "Core C-Chain address derivation failed: {err}"))
            .ok();
        self.store.dispatch(WalletAction::DerivedAddresses {
            account: account.to_owned(),
            p_chain,
            core_eth,
        });
    }
}

/// Handle to a mounted bootstrap. Unmounting (or dropping) stops the event
/// loop and releases its subscription.
pub struct MountedBootstrap {
    bootstrap: Arc<WalletEventBootstrap>,
    task: Option<JoinHandle<()>>,
}

impl MountedBootstrap {
    pub fn bootstrap(&self) -> &Arc<WalletEventBootstrap> {
        &self.bootstrap
    }

    pub async fn unmount(mut self) {
        if let Some(task) = self.task.take() {
            if let Some(err) = stop(task).await {
                warn!("wallet event loop ended abnormally: {err}");
            }
        }
        info!("wallet event bootstrap unmounted");
    }
}

/// Aborts the event loop and waits for it. Yields the join error unless it
/// is the cancellation caused by the abort itself.
async fn stop(task: JoinHandle<()>) -> Option<JoinError> {
    task.abort();
    task.await.err().filter(|err| !err.is_cancelled())
}

impl Drop for MountedBootstrap {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
