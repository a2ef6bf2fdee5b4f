use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::error::RpcError;
use crate::methods::{self, AccountPubKey, ChainDefinition, EthereumChainInfo, UnsignedPChainTx};
use crate::provider::WalletProvider;

/// EVM transaction as handed to `eth_sendTransaction`. `to: None` deploys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRequest {
    pub to: Option<String>,
    pub value: u128,
    pub data: Vec<u8>,
    pub gas: Option<u64>,
}

/// Single facade over the wallet: every RPC wrapper as a method, bound to
/// one connected account.
#[derive(Clone)]
pub struct WalletClient {
    provider: Arc<dyn WalletProvider>,
    account: String,
}

impl WalletClient {
    /// Returns `None` when no wallet is injected (no extension, or not
    /// running in a browser host at all).
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, account: &str) -> Option<Self> {
        let provider = provider?;
        Some(Self {
            provider,
            account: account.to_owned(),
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn provider(&self) -> &Arc<dyn WalletProvider> {
        &self.provider
    }

    pub async fn request_accounts(&self) -> Result<Vec<String>, RpcError> {
        methods::request_accounts(self.provider.as_ref()).await
    }

    pub async fn get_accounts(&self) -> Result<Vec<String>, RpcError> {
        methods::get_accounts(self.provider.as_ref()).await
    }

    pub async fn get_chain_id(&self) -> Result<u64, RpcError> {
        methods::get_chain_id(self.provider.as_ref()).await
    }

    pub async fn get_ethereum_chain(&self) -> Result<EthereumChainInfo, RpcError> {
        methods::get_ethereum_chain(self.provider.as_ref()).await
    }

    pub async fn is_testnet(&self) -> Result<bool, RpcError> {
        methods::is_testnet(self.provider.as_ref()).await
    }

    pub async fn add_chain(&self, chain: &ChainDefinition) -> Result<(), RpcError> {
        methods::add_chain(self.provider.as_ref(), chain).await
    }

    pub async fn switch_chain(&self, chain_id: u64) -> Result<(), RpcError> {
        methods::switch_chain(self.provider.as_ref(), chain_id).await
    }

    pub async fn get_account_pub_key(&self) -> Result<AccountPubKey, RpcError> {
        methods::get_account_pub_key(self.provider.as_ref()).await
    }

    pub async fn get_p_chain_address(&self, network_name: &str) -> Result<String, RpcError> {
        methods::get_p_chain_address(self.provider.as_ref(), network_name).await
    }

    pub async fn get_core_eth_address(&self, network_name: &str) -> Result<String, RpcError> {
        methods::get_core_eth_address(self.provider.as_ref(), network_name).await
    }

    pub async fn get_native_balance(&self) -> Result<u128, RpcError> {
        methods::get_native_balance(self.provider.as_ref(), &self.account).await
    }

    pub async fn create_subnet(&self, tx: &UnsignedPChainTx) -> Result<String, RpcError> {
        methods::create_subnet(self.provider.as_ref(), tx).await
    }

    pub async fn create_chain(&self, tx: &UnsignedPChainTx) -> Result<String, RpcError> {
        methods::create_chain(self.provider.as_ref(), tx).await
    }

    pub async fn convert_to_l1(&self, tx: &UnsignedPChainTx) -> Result<String, RpcError> {
        methods::convert_to_l1(self.provider.as_ref(), tx).await
    }

    pub async fn register_l1_validator(&self, tx: &UnsignedPChainTx) -> Result<String, RpcError> {
        methods::register_l1_validator(self.provider.as_ref(), tx).await
    }

    pub async fn set_l1_validator_weight(&self, tx: &UnsignedPChainTx) -> Result<String, RpcError> {
        methods::set_l1_validator_weight(self.provider.as_ref(), tx).await
    }

    pub async fn increase_l1_validator_balance(&self, tx: &UnsignedPChainTx) -> Result<String, RpcError> {
        methods::increase_l1_validator_balance(self.provider.as_ref(), tx).await
    }

    pub async fn extract_warp_message(&self, tx_hash: &str) -> Result<Vec<u8>, RpcError> {
        methods::extract_warp_message(self.provider.as_ref(), tx_hash).await
    }

    /// Makes sure the wallet is on `chain`, registering it first when the
    /// wallet is elsewhere. `wallet_addEthereumChain` also switches.
    pub async fn ensure_chain(&self, chain: &ChainDefinition) -> Result<(), RpcError> {
        let current = self.get_chain_id().await?;
        if current == chain.chain_id {
            return Ok(());
        }
        info!(from = current, to = chain.chain_id, "registering chain with wallet before submission");
        self.add_chain(chain).await
    }

    pub async fn send_transaction(
        &self,
        chain: &ChainDefinition,
        tx: TransactionRequest,
    ) -> Result<String, RpcError> {
        self.ensure_chain(chain).await?;
        self.submit(tx).await
    }

    /// `calldata` is the ABI-encoded call (selector + arguments).
    pub async fn write_contract(
        &self,
        chain: &ChainDefinition,
        contract: &str,
        calldata: Vec<u8>,
        value: u128,
    ) -> Result<String, RpcError> {
        if !bh_crypto::is_evm_address(contract) {
            return Err(RpcError::InvalidArgument(format!("invalid contract address {contract}")));
        }
        self.ensure_chain(chain).await?;
        self.submit(TransactionRequest {
            to: Some(contract.to_owned()),
            value,
            data: calldata,
            gas: None,
        })
        .await
    }

    pub async fn deploy_contract(
        &self,
        chain: &ChainDefinition,
        bytecode: &[u8],
        constructor_args: &[u8],
    ) -> Result<String, RpcError> {
        if bytecode.is_empty() {
            return Err(RpcError::InvalidArgument("bytecode is empty".to_owned()));
        }
        self.ensure_chain(chain).await?;
        let mut data = bytecode.to_vec();
        data.extend_from_slice(constructor_args);
        self.submit(TransactionRequest {
            to: None,
            value: 0,
            data,
            gas: None,
        })
        .await
    }

    async fn submit(&self, tx: TransactionRequest) -> Result<String, RpcError> {
        let mut body = json!({
            "from": self.account,
            "value": format!("0x{:x}", tx.value),
        });
        if let Some(to) = &tx.to {
            body["to"] = Value::String(to.clone());
        }
        if !tx.data.is_empty() {
            body["data"] = Value::String(format!("0x{}", hex::encode(&tx.data)));
        }
        if let Some(gas) = tx.gas {
            body["gas"] = Value::String(format!("0x{gas:x}"));
        }

        let value = self.provider.request("eth_sendTransaction", json!([body])).await?;
        value
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| RpcError::invalid_response("eth_sendTransaction", "expected a tx hash"))
    }
}
