//! P-Chain access for the faucet: `platform.*` JSON-RPC plus AVAX transfers
//! signed with the faucet key.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bh_api_types::{ChainKey, WalletAddress};
use bh_chain_client::{BalanceResult, ChainAdapter, P_CHAIN_DECIMALS, TransferRequest, TransferResult};
use bh_crypto::{FaucetSigner, MAINNET_HRP, TESTNET_HRP, decode_p_chain_address};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

pub mod codec;

pub use codec::{FUJI_NETWORK_ID, MAINNET_NETWORK_ID};
use codec::{BaseTx, TransferInput, TransferOutput, Utxo, UtxoId};

pub const DEFAULT_TX_FEE_NAVAX: u64 = 1_000_000;
const UTXO_PAGE_LIMIT: u32 = 1024;

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct UtxoPage {
    utxos: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AssetIdResponse {
    #[serde(rename = "assetID")]
    asset_id: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Value,
}

#[derive(Debug, Deserialize)]
struct IssueTxResponse {
    #[serde(rename = "txID")]
    tx_id: String,
}

/// JSON-RPC client for a node's `/ext/bc/P` endpoint.
pub struct PlatformRpcClient {
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl PlatformRpcClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, endpoint = %self.endpoint, "platform rpc call");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .with_context(|| format!("{method} transport"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("{method} HTTP {status}: {text}");
        }

        let envelope: RpcEnvelope = response
            .json()
            .await
            .with_context(|| format!("{method} parse"))?;
        if let Some(err) = envelope.error {
            bail!("{method} rpc error {}: {}", err.code, err.message);
        }
        let result = envelope
            .result
            .ok_or_else(|| anyhow!("{method} returned neither result nor error"))?;
        serde_json::from_value(result).with_context(|| format!("{method} result shape"))
    }

    pub async fn staking_asset_id(&self) -> Result<[u8; 32]> {
        let response: AssetIdResponse = self.call("platform.getStakingAssetID", json!({})).await?;
        codec::decode_cb58_id(&response.asset_id)
    }

    /// Spendable-looking UTXOs of `address`. Outputs other than plain
    /// transfer outputs are dropped.
    pub async fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        let page: UtxoPage = self
            .call(
                "platform.getUTXOs",
                json!({
                    "addresses": [address],
                    "limit": UTXO_PAGE_LIMIT,
                    "encoding": "hex",
                }),
            )
            .await?;

        let mut utxos = Vec::with_capacity(page.utxos.len());
        for encoded in &page.utxos {
            let payload = codec::decode_hex_with_checksum(encoded).context("platform.getUTXOs utxo")?;
            if let Some(utxo) = Utxo::parse(&payload)? {
                utxos.push(utxo);
            }
        }
        Ok(utxos)
    }

    pub async fn get_balance(&self, address: &str) -> Result<u64> {
        let response: BalanceResponse = self
            .call("platform.getBalance", json!({ "addresses": [address] }))
            .await?;
        // avalanchego quotes 64-bit integers
        match &response.balance {
            Value::String(raw) => raw.parse().with_context(|| format!("invalid balance {raw}")),
            Value::Number(number) => number.as_u64().ok_or_else(|| anyhow!("invalid balance {number}")),
            other => Err(anyhow!("invalid balance {other}")),
        }
    }

    pub async fn issue_tx(&self, signed: &[u8]) -> Result<String> {
        let response: IssueTxResponse = self
            .call(
                "platform.issueTx",
                json!({
                    "tx": codec::encode_hex_with_checksum(signed),
                    "encoding": "hex",
                }),
            )
            .await?;
        Ok(response.tx_id)
    }
}

/// Picks spendable UTXOs, largest first, until `target` is covered.
fn select_inputs(
    utxos: &[Utxo],
    owner: &[u8; 20],
    asset_id: &[u8; 32],
    now_secs: u64,
    target: u64,
    spent: &HashSet<UtxoId>,
) -> Result<(Vec<TransferInput>, u64)> {
    let mut candidates: Vec<(&Utxo, u32)> = utxos
        .iter()
        .filter(|utxo| &utxo.asset_id == asset_id && !spent.contains(&utxo.id()))
        .filter_map(|utxo| utxo.signer_index(owner, now_secs).map(|index| (utxo, index)))
        .collect();
    candidates.sort_by(|a, b| b.0.amount.cmp(&a.0.amount));

    let mut inputs = Vec::new();
    let mut total: u64 = 0;
    for (utxo, signer_index) in candidates {
        if total >= target {
            break;
        }
        total = total
            .checked_add(utxo.amount)
            .ok_or_else(|| anyhow!("faucet balance overflows"))?;
        inputs.push(TransferInput {
            utxo: utxo.id(),
            asset_id: utxo.asset_id,
            amount: utxo.amount,
            signer_index,
        });
    }

    if total < target {
        bail!("faucet P-Chain balance too low: have {total} nAVAX, need {target} nAVAX");
    }
    Ok((inputs, total))
}

/// Faucet-funded AVAX transfers on the P-Chain.
pub struct PChainFaucetAdapter {
    key: ChainKey,
    network_id: u32,
    hrp: &'static str,
    client: PlatformRpcClient,
    signer: Arc<FaucetSigner>,
    owner: [u8; 20],
    source_address: String,
    fee: u64,
    asset_id: OnceCell<[u8; 32]>,
    // inputs of transfers issued but maybe not yet accepted; also serializes drips
    spent: Mutex<HashSet<UtxoId>>,
}

impl PChainFaucetAdapter {
    pub fn new(network_id: u32, rpc_url: &str, signer: Arc<FaucetSigner>) -> Result<Self> {
        let hrp = match network_id {
            MAINNET_NETWORK_ID => MAINNET_HRP,
            FUJI_NETWORK_ID => TESTNET_HRP,
            other => bail!("unsupported avalanche network id {other}"),
        };
        Ok(Self {
            key: ChainKey::p_chain(),
            network_id,
            hrp,
            client: PlatformRpcClient::new(rpc_url),
            owner: signer.short_id()?,
            source_address: signer.p_chain_address(hrp)?,
            signer,
            fee: DEFAULT_TX_FEE_NAVAX,
            asset_id: OnceCell::new(),
            spent: Mutex::new(HashSet::new()),
        })
    }

    /// Flat fee burned by each transfer, in nAVAX.
    pub fn with_fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    async fn asset_id(&self) -> Result<[u8; 32]> {
        self.asset_id
            .get_or_try_init(|| self.client.staking_asset_id())
            .await
            .copied()
            .context("AVAX asset id lookup")
    }
}

#[async_trait]
impl ChainAdapter for PChainFaucetAdapter {
    fn chain_key(&self) -> &ChainKey {
        &self.key
    }

    fn source_address(&self) -> &str {
        &self.source_address
    }

    fn decimals(&self) -> u32 {
        P_CHAIN_DECIMALS
    }

    async fn get_balance(&self, wallet_address: &WalletAddress) -> Result<BalanceResult> {
        let amount = self.client.get_balance(&wallet_address.0).await?;
        Ok(BalanceResult {
            wallet_address: wallet_address.clone(),
            chain: self.key.clone(),
            amount: u128::from(amount),
        })
    }

    async fn send_native(&self, req: TransferRequest) -> Result<TransferResult> {
        let recipient = decode_p_chain_address(&req.to.0, self.hrp)?;
        let amount = u64::try_from(req.amount).context("P-Chain amount exceeds 64 bits")?;
        let target = amount
            .checked_add(self.fee)
            .ok_or_else(|| anyhow!("P-Chain amount overflows with fee"))?;
        let asset_id = self.asset_id().await?;

        let mut spent = self.spent.lock().await;
        let utxos = self
            .client
            .get_utxos(&self.source_address)
            .await
            .context("faucet UTXO lookup")?;
        // anything no longer listed has been accepted
        spent.retain(|id| utxos.iter().any(|utxo| &utxo.id() == id));

        let now_secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let (inputs, total) = select_inputs(&utxos, &self.owner, &asset_id, now_secs, target, &spent)?;

        let mut outputs = vec![TransferOutput {
            asset_id,
            amount,
            owner: recipient,
        }];
        let change = total - target;
        if change > 0 {
            outputs.push(TransferOutput {
                asset_id,
                amount: change,
                owner: self.owner,
            });
        }

        let tx = BaseTx {
            network_id: self.network_id,
            inputs,
            outputs,
        };
        let signed = tx.sign(|unsigned| self.signer.sign_avalanche(unsigned))?;
        let tx_id = self.client.issue_tx(&signed).await?;

        spent.extend(tx.inputs.iter().map(|input| input.utxo));
        info!(to = %req.to.0, amount, %tx_id, "P-Chain faucet transfer issued");
        Ok(TransferResult { tx_hash: tx_id })
    }
}
