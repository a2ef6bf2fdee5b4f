use alloy_consensus::TxLegacy;
use alloy_primitives::{Address, Bytes, TxKind, U256};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bh_api_types::{ChainKey, NetworkListEntry, WalletAddress};
use bh_chain_client::{
    BalanceResult, BalanceSource, ChainAdapter, TransferRequest, TransferResult, wei_to_coin,
};
use bh_crypto::{FaucetSigner, parse_evm_address, strip_0x};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// JSON-RPC 2.0 client for an EVM node (C-Chain or an L1's subnet-evm).
pub struct EvmRpcClient {
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

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

impl EvmRpcClient {
    pub fn new(endpoint: &str) -> Self {
        Self::with_client(endpoint, reqwest::Client::new())
    }

    pub fn with_client(endpoint: &str, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            http,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, endpoint = %self.endpoint, "evm rpc call");

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

    pub async fn chain_id(&self) -> Result<u64> {
        let raw: String = self.call("eth_chainId", json!([])).await?;
        parse_u64_quantity(&raw).context("eth_chainId")
    }

    pub async fn get_balance(&self, address: &str) -> Result<u128> {
        let raw: String = self.call("eth_getBalance", json!([address, "latest"])).await?;
        parse_quantity(&raw)
    }

    pub async fn get_transaction_count(&self, address: &str) -> Result<u64> {
        let raw: String = self
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        parse_u64_quantity(&raw).context("eth_getTransactionCount")
    }

    pub async fn gas_price(&self) -> Result<u128> {
        let raw: String = self.call("eth_gasPrice", json!([])).await?;
        parse_quantity(&raw)
    }

    pub async fn send_raw_transaction(&self, raw_tx: &[u8]) -> Result<String> {
        let encoded = format!("0x{}", hex::encode(raw_tx));
        self.call("eth_sendRawTransaction", json!([encoded])).await
    }
}

/// Parses a JSON-RPC hex quantity such as `0x1bc16d674ec80000`.
pub fn parse_quantity(raw: &str) -> Result<u128> {
    let digits = strip_0x(raw.trim());
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).with_context(|| format!("invalid hex quantity: {raw}"))
}

fn parse_u64_quantity(raw: &str) -> Result<u64> {
    let value = parse_quantity(raw)?;
    u64::try_from(value).with_context(|| format!("quantity {raw} does not fit in 64 bits"))
}

/// Faucet-funded transfers on one EVM chain.
pub struct EvmFaucetAdapter {
    key: ChainKey,
    chain_id: u64,
    client: EvmRpcClient,
    signer: Arc<FaucetSigner>,
    source_address: String,
    // nonce read and broadcast must not interleave between two drips
    send_lock: Mutex<()>,
}

impl EvmFaucetAdapter {
    pub fn new(chain_id: u64, rpc_url: &str, signer: Arc<FaucetSigner>) -> Self {
        let source_address = signer.evm_address();
        Self {
            key: ChainKey::evm(chain_id),
            chain_id,
            client: EvmRpcClient::new(rpc_url),
            signer,
            source_address,
            send_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ChainAdapter for EvmFaucetAdapter {
    fn chain_key(&self) -> &ChainKey {
        &self.key
    }

    fn source_address(&self) -> &str {
        &self.source_address
    }

    async fn get_balance(&self, wallet_address: &WalletAddress) -> Result<BalanceResult> {
        let amount = self.client.get_balance(&wallet_address.0).await?;
        Ok(BalanceResult {
            wallet_address: wallet_address.clone(),
            chain: self.key.clone(),
            amount,
        })
    }

    async fn send_native(&self, req: TransferRequest) -> Result<TransferResult> {
        let to = Address::from(parse_evm_address(&req.to.0)?);

        let _guard = self.send_lock.lock().await;
        let nonce = self
            .client
            .get_transaction_count(&self.source_address)
            .await
            .context("faucet nonce lookup")?;
        let gas_price = self.client.gas_price().await.context("faucet gas price")?;

        let raw = self.signer.sign_legacy(TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit: TRANSFER_GAS_LIMIT,
            to: TxKind::Call(to),
            value: U256::from(req.amount),
            input: Bytes::new(),
        })?;

        let tx_hash = self.client.send_raw_transaction(&raw).await?;
        info!(chain = %self.key, to = %req.to.0, %tx_hash, "faucet transfer broadcast");

        Ok(TransferResult { tx_hash })
    }
}

/// Reads native balances straight from each network's public RPC.
#[derive(Default, Clone)]
pub struct EvmBalanceSource {
    http: reqwest::Client,
}

#[async_trait]
impl BalanceSource for EvmBalanceSource {
    async fn native_balance(&self, network: &NetworkListEntry, address: &str) -> Result<f64> {
        let client = EvmRpcClient::with_client(&network.rpc_url, self.http.clone());
        let wei = client
            .get_balance(address)
            .await
            .with_context(|| format!("balance on {}", network.name))?;
        Ok(wei_to_coin(wei))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use bh_chain_client::WEI_PER_COIN;
    use std::sync::Mutex as StdMutex;

    type Calls = Arc<StdMutex<Vec<String>>>;

    async fn spawn_node(calls: Calls) -> String {
        let app = Router::new().route(
            "/",
            post(move |Json(body): Json<Value>| {
                let calls = calls.clone();
                async move {
                    let method = body["method"].as_str().unwrap_or_default().to_owned();
                    calls.lock().expect("calls lock").push(method.clone());
                    let result = match method.as_str() {
                        "eth_chainId" => json!("0xa869"),
                        "eth_getBalance" => json!("0x1bc16d674ec80000"),
                        "eth_getTransactionCount" => json!("0x5"),
                        "eth_gasPrice" => json!("0x5d21dba00"),
                        "eth_sendRawTransaction" => json!("0xfeed"),
                        _ => {
                            return Json(json!({
                                "jsonrpc": "2.0",
                                "id": body["id"],
                                "error": {"code": -32601, "message": "method not found"}
                            }));
                        }
                    };
                    Json(json!({"jsonrpc": "2.0", "id": body["id"], "result": result}))
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock node");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[test]
    fn quantities_parse_as_hex() {
        assert_eq!(parse_quantity("0x0").expect("zero"), 0);
        assert_eq!(parse_quantity("0x").expect("empty"), 0);
        assert_eq!(parse_quantity("0xa869").expect("fuji"), 43113);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn oversized_quantities_are_rejected_not_truncated() {
        assert_eq!(parse_u64_quantity("0xffffffffffffffff").expect("max"), u64::MAX);
        let err = parse_u64_quantity("0x10000000000000000").expect_err("65 bits");
        assert!(err.to_string().contains("does not fit"));
    }

    #[tokio::test]
    async fn reads_chain_id_and_balance() -> anyhow::Result<()> {
        let calls = Calls::default();
        let endpoint = spawn_node(calls.clone()).await;
        let client = EvmRpcClient::new(&endpoint);

        assert_eq!(client.chain_id().await?, 43113);
        assert_eq!(client.get_balance("0x00").await?, 2 * WEI_PER_COIN);
        Ok(())
    }

    #[tokio::test]
    async fn rpc_errors_surface_to_caller() {
        let endpoint = spawn_node(Calls::default()).await;
        let client = EvmRpcClient::new(&endpoint);
        let err = client
            .call::<String>("debug_traceTransaction", json!([]))
            .await
            .expect_err("unknown method");
        assert!(err.to_string().contains("method not found"));
    }

    #[tokio::test]
    async fn faucet_transfer_fetches_nonce_and_gas_then_broadcasts() -> anyhow::Result<()> {
        let calls = Calls::default();
        let endpoint = spawn_node(calls.clone()).await;
        let signer = Arc::new(FaucetSigner::from_hex(&"46".repeat(32))?);
        let adapter = EvmFaucetAdapter::new(43113, &endpoint, signer);

        assert_eq!(adapter.source_address(), "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f");

        let result = adapter
            .send_native(TransferRequest {
                to: WalletAddress("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".to_owned()),
                amount: WEI_PER_COIN,
            })
            .await?;
        assert_eq!(result.tx_hash, "0xfeed");

        let calls = calls.lock().expect("calls lock").clone();
        assert_eq!(
            calls,
            vec!["eth_getTransactionCount", "eth_gasPrice", "eth_sendRawTransaction"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn faucet_transfer_rejects_malformed_destination() {
        let endpoint = spawn_node(Calls::default()).await;
        let signer = Arc::new(FaucetSigner::from_hex(&"46".repeat(32)).expect("signer"));
        let adapter = EvmFaucetAdapter::new(43113, &endpoint, signer);

        let result = adapter
            .send_native(TransferRequest {
                to: WalletAddress("P-fuji1abc".to_owned()),
                amount: 1,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn balance_source_converts_to_whole_coins() -> anyhow::Result<()> {
        let endpoint = spawn_node(Calls::default()).await;
        let mut network = NetworkListEntry::fuji_c_chain();
        network.rpc_url = endpoint;

        let balance = EvmBalanceSource::default()
            .native_balance(&network, "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf")
            .await?;
        assert_eq!(balance, 2.0);
        Ok(())
    }
}
