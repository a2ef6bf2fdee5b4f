//! One function per wallet RPC method.
//!
//! Every wrapper issues exactly one `request` with a fixed method name and
//! parameter shape, then parses the reply. Wallet rejections propagate as-is;
//! nothing here retries.

use bh_crypto::{core_eth_address, hrp_for_network, p_chain_address, strip_0x};
use alloy_sol_types::{SolEvent, sol};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::RpcError;
use crate::provider::{WalletProvider, parse_chain_id};

/// Address of the Warp messenger precompile on every subnet-evm chain.
pub const WARP_PRECOMPILE_ADDRESS: &str = "0x0200000000000000000000000000000000000005";
sol! {
    /// Emitted by the Warp precompile for every outgoing message.
    event SendWarpMessage(address indexed sourceAddress, bytes32 indexed unsignedMessageID, bytes message);
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumChainInfo {
    #[serde(deserialize_with = "chain_id_from_any")]
    pub chain_id: u64,
    #[serde(default)]
    pub chain_name: Option<String>,
    #[serde(default)]
    pub is_testnet: bool,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
}

fn chain_id_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_chain_id("wallet_getEthereumChain", &value).map_err(serde::de::Error::custom)
}

/// Public keys Core exposes for the active account: `xp` backs the P/X
/// chains, `evm` the C-Chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountPubKey {
    pub xp: String,
    pub evm: String,
}

/// Parameters for `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainDefinition {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub coin_symbol: String,
    pub explorer_url: Option<String>,
}

impl From<&bh_api_types::NetworkListEntry> for ChainDefinition {
    fn from(entry: &bh_api_types::NetworkListEntry) -> Self {
        Self {
            chain_id: entry.evm_chain_id,
            name: entry.name.clone(),
            rpc_url: entry.rpc_url.clone(),
            coin_symbol: entry.coin_name.clone(),
            explorer_url: entry.explorer_url.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddChainParams<'a> {
    chain_id: String,
    chain_name: &'a str,
    native_currency: NativeCurrency<'a>,
    rpc_urls: [&'a str; 1],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    block_explorer_urls: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct NativeCurrency<'a> {
    name: &'a str,
    symbol: &'a str,
    decimals: u8,
}

/// P-Chain transaction kinds the toolbox submits through the wallet, tagged
/// with their platformvm codec type ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PChainTxKind {
    CreateChain,
    CreateSubnet,
    ConvertSubnetToL1,
    RegisterL1Validator,
    SetL1ValidatorWeight,
    IncreaseL1ValidatorBalance,
}

impl PChainTxKind {
    pub fn type_id(&self) -> u32 {
        match self {
            Self::CreateChain => 15,
            Self::CreateSubnet => 16,
            Self::ConvertSubnetToL1 => 35,
            Self::RegisterL1Validator => 36,
            Self::SetL1ValidatorWeight => 37,
            Self::IncreaseL1ValidatorBalance => 38,
        }
    }
}

/// Unsigned P-Chain transaction built by the SDK layer; the wallet signs and
/// issues it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedPChainTx {
    pub transaction_hex: String,
    pub utxo_ids: Vec<String>,
}

impl UnsignedPChainTx {
    pub fn new(transaction_hex: impl Into<String>) -> Self {
        Self {
            transaction_hex: transaction_hex.into(),
            utxo_ids: Vec::new(),
        }
    }

    /// Reads the codec version (2 bytes) and type id (4 bytes) header.
    fn type_id(&self) -> Result<u32, RpcError> {
        let raw = hex::decode(strip_0x(&self.transaction_hex))
            .map_err(|_| RpcError::InvalidArgument("transaction hex is not valid hex".to_owned()))?;
        if raw.len() < 6 {
            return Err(RpcError::InvalidArgument("transaction is too short".to_owned()));
        }
        Ok(u32::from_be_bytes([raw[2], raw[3], raw[4], raw[5]]))
    }
}

pub async fn request_accounts(provider: &dyn WalletProvider) -> Result<Vec<String>, RpcError> {
    let value = provider.request("eth_requestAccounts", json!([])).await?;
    string_list("eth_requestAccounts", value)
}

/// Silent account query: never prompts, returns the already-authorized accounts.
pub async fn get_accounts(provider: &dyn WalletProvider) -> Result<Vec<String>, RpcError> {
    let value = provider.request("eth_accounts", json!([])).await?;
    string_list("eth_accounts", value)
}

pub async fn get_chain_id(provider: &dyn WalletProvider) -> Result<u64, RpcError> {
    let value = provider.request("eth_chainId", json!([])).await?;
    parse_chain_id("eth_chainId", &value)
}

pub async fn get_ethereum_chain(provider: &dyn WalletProvider) -> Result<EthereumChainInfo, RpcError> {
    let value = provider.request("wallet_getEthereumChain", json!([])).await?;
    serde_json::from_value(value)
        .map_err(|err| RpcError::invalid_response("wallet_getEthereumChain", err.to_string()))
}

pub async fn is_testnet(provider: &dyn WalletProvider) -> Result<bool, RpcError> {
    Ok(get_ethereum_chain(provider).await?.is_testnet)
}

pub async fn add_chain(provider: &dyn WalletProvider, chain: &ChainDefinition) -> Result<(), RpcError> {
    let params = AddChainParams {
        chain_id: format!("0x{:x}", chain.chain_id),
        chain_name: &chain.name,
        native_currency: NativeCurrency {
            name: &chain.coin_symbol,
            symbol: &chain.coin_symbol,
            decimals: 18,
        },
        rpc_urls: [&chain.rpc_url],
        block_explorer_urls: chain.explorer_url.as_deref().into_iter().collect(),
    };
    let params = serde_json::to_value([params])
        .map_err(|err| RpcError::InvalidArgument(err.to_string()))?;
    provider.request("wallet_addEthereumChain", params).await?;
    Ok(())
}

pub async fn switch_chain(provider: &dyn WalletProvider, chain_id: u64) -> Result<(), RpcError> {
    provider
        .request("wallet_switchEthereumChain", json!([{ "chainId": format!("0x{chain_id:x}") }]))
        .await?;
    Ok(())
}

pub async fn get_account_pub_key(provider: &dyn WalletProvider) -> Result<AccountPubKey, RpcError> {
    let value = provider.request("avalanche_getAccountPubKey", json!([])).await?;
    serde_json::from_value(value)
        .map_err(|err| RpcError::invalid_response("avalanche_getAccountPubKey", err.to_string()))
}

/// `network_name` is the store's resolved Avalanche network (`fuji` / `mainnet`).
pub async fn get_p_chain_address(provider: &dyn WalletProvider, network_name: &str) -> Result<String, RpcError> {
    let keys = get_account_pub_key(provider).await?;
    let hrp = hrp_for_network(network_name).map_err(|err| RpcError::Address(err.to_string()))?;
    p_chain_address(&keys.xp, hrp).map_err(|err| RpcError::Address(err.to_string()))
}

pub async fn get_core_eth_address(provider: &dyn WalletProvider, network_name: &str) -> Result<String, RpcError> {
    let keys = get_account_pub_key(provider).await?;
    let hrp = hrp_for_network(network_name).map_err(|err| RpcError::Address(err.to_string()))?;
    core_eth_address(&keys.evm, hrp).map_err(|err| RpcError::Address(err.to_string()))
}

pub async fn get_native_balance(provider: &dyn WalletProvider, address: &str) -> Result<u128, RpcError> {
    let value = provider
        .request("eth_getBalance", json!([address, "latest"]))
        .await?;
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::invalid_response("eth_getBalance", "expected a hex string"))?;
    u128::from_str_radix(strip_0x(raw), 16)
        .map_err(|_| RpcError::invalid_response("eth_getBalance", format!("invalid quantity {raw}")))
}

/// Hands an unsigned P-Chain transaction to the wallet for signing and
/// issuance; returns the P-Chain tx id.
pub async fn send_p_chain_transaction(
    provider: &dyn WalletProvider,
    kind: PChainTxKind,
    tx: &UnsignedPChainTx,
) -> Result<String, RpcError> {
    let found = tx.type_id()?;
    if found != kind.type_id() {
        return Err(RpcError::InvalidArgument(format!(
            "expected {kind:?} (type {}), transaction has type {found}",
            kind.type_id()
        )));
    }

    let mut params = json!({
        "transactionHex": tx.transaction_hex,
        "chainAlias": "P",
    });
    if !tx.utxo_ids.is_empty() {
        params["utxos"] = json!(tx.utxo_ids);
    }

    debug!(?kind, "submitting P-Chain transaction through wallet");
    let value = provider.request("avalanche_sendTransaction", params).await?;
    tx_id_from("avalanche_sendTransaction", value)
}

pub async fn create_subnet(provider: &dyn WalletProvider, tx: &UnsignedPChainTx) -> Result<String, RpcError> {
    send_p_chain_transaction(provider, PChainTxKind::CreateSubnet, tx).await
}

pub async fn create_chain(provider: &dyn WalletProvider, tx: &UnsignedPChainTx) -> Result<String, RpcError> {
    send_p_chain_transaction(provider, PChainTxKind::CreateChain, tx).await
}

pub async fn convert_to_l1(provider: &dyn WalletProvider, tx: &UnsignedPChainTx) -> Result<String, RpcError> {
    send_p_chain_transaction(provider, PChainTxKind::ConvertSubnetToL1, tx).await
}

pub async fn register_l1_validator(provider: &dyn WalletProvider, tx: &UnsignedPChainTx) -> Result<String, RpcError> {
    send_p_chain_transaction(provider, PChainTxKind::RegisterL1Validator, tx).await
}

pub async fn set_l1_validator_weight(provider: &dyn WalletProvider, tx: &UnsignedPChainTx) -> Result<String, RpcError> {
    send_p_chain_transaction(provider, PChainTxKind::SetL1ValidatorWeight, tx).await
}

pub async fn increase_l1_validator_balance(
    provider: &dyn WalletProvider,
    tx: &UnsignedPChainTx,
) -> Result<String, RpcError> {
    send_p_chain_transaction(provider, PChainTxKind::IncreaseL1ValidatorBalance, tx).await
}

/// Pulls the unsigned Warp message emitted by the precompile in the given
/// C-Chain/L1 transaction.
pub async fn extract_warp_message(provider: &dyn WalletProvider, tx_hash: &str) -> Result<Vec<u8>, RpcError> {
    const METHOD: &str = "eth_getTransactionReceipt";
    let receipt = provider.request(METHOD, json!([tx_hash])).await?;
    if receipt.is_null() {
        return Err(RpcError::invalid_response(METHOD, format!("no receipt for {tx_hash}")));
    }

    let topic = format!("{:#x}", SendWarpMessage::SIGNATURE_HASH);
    let logs = receipt["logs"]
        .as_array()
        .ok_or_else(|| RpcError::invalid_response(METHOD, "receipt has no logs"))?;

    let log = logs
        .iter()
        .find(|log| {
            log["address"]
                .as_str()
                .is_some_and(|address| address.eq_ignore_ascii_case(WARP_PRECOMPILE_ADDRESS))
                && log["topics"][0]
                    .as_str()
                    .is_some_and(|first| first.eq_ignore_ascii_case(&topic))
        })
        .ok_or_else(|| RpcError::invalid_response(METHOD, "no SendWarpMessage log in receipt"))?;

    let data = log["data"]
        .as_str()
        .ok_or_else(|| RpcError::invalid_response(METHOD, "warp log has no data"))?;
    let data = hex::decode(strip_0x(data))
        .map_err(|_| RpcError::invalid_response(METHOD, "warp log data is not hex"))?;
    let (message,) = SendWarpMessage::abi_decode_data(&data)
        .map_err(|err| RpcError::invalid_response(METHOD, format!("warp log data is malformed: {err}")))?;
    Ok(message.to_vec())
}

fn string_list(method: &str, value: Value) -> Result<Vec<String>, RpcError> {
    serde_json::from_value(value).map_err(|err| RpcError::invalid_response(method, err.to_string()))
}

/// Wallets answer issuance with either a bare id or `{ txHash }` / `{ txID }`.
fn tx_id_from(method: &str, value: Value) -> Result<String, RpcError> {
    if let Some(id) = value.as_str() {
        return Ok(id.to_owned());
    }
    ["txHash", "txID", "txId"]
        .iter()
        .find_map(|key| value[*key].as_str().map(ToOwned::to_owned))
        .ok_or_else(|| RpcError::invalid_response(method, format!("no transaction id in {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;
    use alloy_primitives::{Address, B256, Bytes};

    const G_COMPRESSED: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn tx_of_type(type_id: u32) -> UnsignedPChainTx {
        let mut raw = vec![0_u8, 0];
        raw.extend_from_slice(&type_id.to_be_bytes());
        raw.extend_from_slice(&[0xaa; 8]);
        UnsignedPChainTx::new(format!("0x{}", hex::encode(raw)))
    }

    #[tokio::test]
    async fn accounts_and_chain_id_parse() -> anyhow::Result<()> {
        let provider = ScriptedProvider::default();
        provider
            .respond("eth_accounts", json!(["0xabc"]))
            .respond("eth_chainId", json!("0xa869"));

        assert_eq!(get_accounts(&provider).await?, vec!["0xabc".to_owned()]);
        assert_eq!(get_chain_id(&provider).await?, 43113);
        Ok(())
    }

    #[tokio::test]
    async fn ethereum_chain_reports_testnet_flag() -> anyhow::Result<()> {
        let provider = ScriptedProvider::default();
        provider.respond(
            "wallet_getEthereumChain",
            json!({"chainId": "0xa869", "chainName": "Avalanche Fuji", "isTestnet": true, "rpcUrls": []}),
        );

        let info = get_ethereum_chain(&provider).await?;
        assert_eq!(info.chain_id, 43113);
        assert_eq!(info.chain_name.as_deref(), Some("Avalanche Fuji"));
        assert!(is_testnet(&provider).await?);
        Ok(())
    }

    #[tokio::test]
    async fn p_chain_address_uses_network_hrp() -> anyhow::Result<()> {
        let provider = ScriptedProvider::default();
        provider.respond("avalanche_getAccountPubKey", json!({"xp": G_COMPRESSED, "evm": G_COMPRESSED}));

        let fuji = get_p_chain_address(&provider, "fuji").await?;
        let mainnet = get_p_chain_address(&provider, "mainnet").await?;
        assert!(fuji.starts_with("P-fuji1"));
        assert!(mainnet.starts_with("P-avax1"));

        let core = get_core_eth_address(&provider, "fuji").await?;
        assert_eq!(core[2..], fuji[2..]);
        assert_eq!(provider.call_count("avalanche_getAccountPubKey"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn wallet_rejections_propagate_unchanged() {
        let provider = ScriptedProvider::default();
        provider.fail("eth_requestAccounts", crate::error::USER_REJECTED, "User rejected the request.");

        let err = request_accounts(&provider).await.expect_err("rejected");
        assert!(err.is_user_rejection());
        assert_eq!(provider.call_count("eth_requestAccounts"), 1);
    }

    #[tokio::test]
    async fn add_chain_sends_eip3085_shape() -> anyhow::Result<()> {
        let provider = ScriptedProvider::default();
        provider.respond("wallet_addEthereumChain", Value::Null);

        let chain = ChainDefinition {
            chain_id: 779672,
            name: "Dispatch".to_owned(),
            rpc_url: "https://rpc.dispatch".to_owned(),
            coin_symbol: "DIS".to_owned(),
            explorer_url: None,
        };
        add_chain(&provider, &chain).await?;

        let (method, params) = provider.calls().remove(0);
        assert_eq!(method, "wallet_addEthereumChain");
        assert_eq!(params[0]["chainId"], "0xbe598");
        assert_eq!(params[0]["nativeCurrency"]["decimals"], 18);
        assert_eq!(params[0]["rpcUrls"][0], "https://rpc.dispatch");
        assert!(params[0].get("blockExplorerUrls").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn p_chain_submissions_check_the_tx_type() -> anyhow::Result<()> {
        let provider = ScriptedProvider::default();
        provider.respond("avalanche_sendTransaction", json!({"txHash": "2pChainTx"}));

        let id = create_subnet(&provider, &tx_of_type(16)).await?;
        assert_eq!(id, "2pChainTx");

        let (_, params) = provider.calls().remove(0);
        assert_eq!(params["chainAlias"], "P");
        assert!(params.get("utxos").is_none());

        let err = register_l1_validator(&provider, &tx_of_type(16))
            .await
            .expect_err("wrong type");
        assert!(matches!(err, RpcError::InvalidArgument(_)));
        assert_eq!(provider.call_count("avalanche_sendTransaction"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn every_p_chain_wrapper_matches_its_type() -> anyhow::Result<()> {
        let provider = ScriptedProvider::default();
        provider.respond("avalanche_sendTransaction", json!("txid"));

        create_chain(&provider, &tx_of_type(15)).await?;
        convert_to_l1(&provider, &tx_of_type(35)).await?;
        register_l1_validator(&provider, &tx_of_type(36)).await?;
        set_l1_validator_weight(&provider, &tx_of_type(37)).await?;
        increase_l1_validator_balance(&provider, &tx_of_type(38)).await?;
        assert_eq!(provider.call_count("avalanche_sendTransaction"), 5);
        Ok(())
    }

    #[tokio::test]
    async fn warp_message_is_decoded_from_precompile_log() -> anyhow::Result<()> {
        let message = b"unsigned warp message".to_vec();
        let data = SendWarpMessage {
            sourceAddress: Address::repeat_byte(0x42),
            unsignedMessageID: B256::repeat_byte(0x01),
            message: Bytes::from(message.clone()),
        }
        .encode_data();

        let topic = format!("{:#x}", SendWarpMessage::SIGNATURE_HASH);
        let provider = ScriptedProvider::default();
        provider.respond(
            "eth_getTransactionReceipt",
            json!({
                "logs": [
                    {"address": "0x1111111111111111111111111111111111111111", "topics": [topic], "data": "0x"},
                    {
                        "address": "0x0200000000000000000000000000000000000005",
                        "topics": [topic, "0x00", "0x01"],
                        "data": format!("0x{}", hex::encode(&data)),
                    }
                ]
            }),
        );

        assert_eq!(extract_warp_message(&provider, "0xabc").await?, message);
        Ok(())
    }

    #[tokio::test]
    async fn warp_extraction_fails_without_log() {
        let provider = ScriptedProvider::default();
        provider.respond("eth_getTransactionReceipt", json!({"logs": []}));
        assert!(extract_warp_message(&provider, "0xabc").await.is_err());

        provider.respond("eth_getTransactionReceipt", Value::Null);
        assert!(extract_warp_message(&provider, "0xabc").await.is_err());
    }

    #[tokio::test]
    async fn truncated_warp_payload_is_an_invalid_response() {
        let mut data = vec![0_u8; 31];
        data.push(0x20);
        data.extend_from_slice(&[0_u8; 31]);
        data.push(10);
        data.extend_from_slice(&[1, 2, 3]);

        let provider = ScriptedProvider::default();
        provider.respond(
            "eth_getTransactionReceipt",
            json!({"logs": [{
                "address": WARP_PRECOMPILE_ADDRESS,
                "topics": [format!("{:#x}", SendWarpMessage::SIGNATURE_HASH)],
                "data": format!("0x{}", hex::encode(&data)),
            }]}),
        );
        let err = extract_warp_message(&provider, "0xabc").await.expect_err("truncated");
        assert!(err.to_string().contains("malformed"), "{err}");
    }
}
