use serde::{Deserialize, Serialize};
use std::fmt;

pub const FUJI_C_CHAIN_ID: u64 = 43113;
pub const MAINNET_C_CHAIN_ID: u64 = 43114;

/// The primary network's C-Chain can never be removed from a network list.
pub fn is_canonical_c_chain(evm_chain_id: u64) -> bool {
    evm_chain_id == FUJI_C_CHAIN_ID || evm_chain_id == MAINNET_C_CHAIN_ID
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WalletAddress(pub String);

/// Registry key for a chain: the decimal EVM chain id, or `p-chain`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainKey(pub String);

impl ChainKey {
    pub const P_CHAIN: &'static str = "p-chain";

    pub fn evm(chain_id: u64) -> Self {
        Self(chain_id.to_string())
    }

    pub fn p_chain() -> Self {
        Self(Self::P_CHAIN.to_owned())
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkListEntry {
    pub id: String,
    pub name: String,
    pub evm_chain_id: u64,
    pub coin_name: String,
    pub rpc_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub has_builder_hub_faucet: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drip_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_testnet: Option<bool>,
}

impl NetworkListEntry {
    pub fn chain_key(&self) -> ChainKey {
        ChainKey::evm(self.evm_chain_id)
    }

    pub fn is_canonical(&self) -> bool {
        is_canonical_c_chain(self.evm_chain_id)
    }

    pub fn fuji_c_chain() -> Self {
        Self {
            id: "avalanche-fuji".to_owned(),
            name: "Avalanche Fuji".to_owned(),
            evm_chain_id: FUJI_C_CHAIN_ID,
            coin_name: "AVAX".to_owned(),
            rpc_url: "https://api.avax-test.network/ext/bc/C/rpc".to_owned(),
            explorer_url: Some("https://subnets-test.avax.network/c-chain".to_owned()),
            logo_url: None,
            has_builder_hub_faucet: true,
            drip_amount: Some(2.0),
            is_testnet: Some(true),
        }
    }

    pub fn mainnet_c_chain() -> Self {
        Self {
            id: "avalanche-mainnet".to_owned(),
            name: "Avalanche Mainnet".to_owned(),
            evm_chain_id: MAINNET_C_CHAIN_ID,
            coin_name: "AVAX".to_owned(),
            rpc_url: "https://api.avax.network/ext/bc/C/rpc".to_owned(),
            explorer_url: Some("https://subnets.avax.network/c-chain".to_owned()),
            logo_url: None,
            has_builder_hub_faucet: false,
            drip_amount: None,
            is_testnet: Some(false),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FaucetResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FaucetResponse {
    pub fn sent(tx_hash: String, message: String) -> Self {
        Self {
            success: true,
            tx_hash: Some(tx_hash),
            message: Some(message),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_hash: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TimeRange {
    #[serde(rename = "7d")]
    SevenDays,
    #[default]
    #[serde(rename = "30d")]
    ThirtyDays,
    #[serde(rename = "90d")]
    NinetyDays,
    #[serde(rename = "all")]
    All,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
            Self::NinetyDays => "90d",
            Self::All => "all",
        }
    }

    /// Window length in days; `None` means the full chain history.
    pub fn days(&self) -> Option<u64> {
        match self {
            Self::SevenDays => Some(7),
            Self::ThirtyDays => Some(30),
            Self::NinetyDays => Some(90),
            Self::All => None,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricPoint {
    pub timestamp: u64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeries {
    pub metric: String,
    pub total: f64,
    pub points: Vec<MetricPoint>,
}

impl MetricSeries {
    pub fn from_points(metric: &str, points: Vec<MetricPoint>) -> Self {
        let total = points.iter().map(|point| point.value).sum();
        Self {
            metric: metric.to_owned(),
            total,
            points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatsResponse {
    pub chain_id: String,
    pub time_range: TimeRange,
    pub metrics: Vec<MetricSeries>,
}

impl ChainStatsResponse {
    pub fn total(&self, metric: &str) -> f64 {
        self.metrics
            .iter()
            .find(|series| series.metric == metric)
            .map(|series| series.total)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub chain_id: String,
    pub tx_count: f64,
    pub active_addresses: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverviewStatsResponse {
    pub time_range: TimeRange,
    pub chains: Vec<ChainSummary>,
    pub total_tx_count: f64,
    pub total_active_addresses: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    #[serde(default)]
    pub course_id: String,
    #[serde(default)]
    pub user_name: String,
}
