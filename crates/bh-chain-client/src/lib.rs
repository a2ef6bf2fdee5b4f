use anyhow::Result;
use async_trait::async_trait;
use bh_api_types::{ChainKey, NetworkListEntry, WalletAddress};
use std::collections::HashMap;
use std::sync::Arc;

pub const EVM_DECIMALS: u32 = 18;
pub const P_CHAIN_DECIMALS: u32 = 9;
pub const WEI_PER_COIN: u128 = 1_000_000_000_000_000_000;
pub const NANO_AVAX_PER_AVAX: u128 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct BalanceResult {
    pub wallet_address: WalletAddress,
    pub chain: ChainKey,
    /// Smallest denomination (wei on EVM chains, nAVAX on the P-Chain).
    pub amount: u128,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub to: WalletAddress,
    pub amount: u128,
}

#[derive(Debug, Clone)]
pub struct TransferResult {
    pub tx_hash: String,
}

/// Server-side access to one chain: balance reads and transfers funded by a
/// key the service holds.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_key(&self) -> &ChainKey;
    /// Address that funds transfers; requests targeting it are refused.
    fn source_address(&self) -> &str;
    /// Decimals of the native asset as this chain counts it.
    fn decimals(&self) -> u32 {
        EVM_DECIMALS
    }
    async fn get_balance(&self, wallet_address: &WalletAddress) -> Result<BalanceResult>;
    async fn send_native(&self, req: TransferRequest) -> Result<TransferResult>;
}

#[derive(Default)]
pub struct ChainRegistry {
    adapters: HashMap<ChainKey, Arc<dyn ChainAdapter>>,
}

impl ChainRegistry {
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(adapter.chain_key().clone(), adapter);
    }

    pub fn adapter(&self, chain: &ChainKey) -> Option<Arc<dyn ChainAdapter>> {
        self.adapters.get(chain).cloned()
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainKey> {
        self.adapters.keys()
    }
}

/// Native balance lookup for a network list entry, in whole coins.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn native_balance(&self, network: &NetworkListEntry, address: &str) -> Result<f64>;
}

/// Converts an amount in the smallest denomination to whole coins for display.
pub fn format_units(amount: u128, decimals: u32) -> f64 {
    let unit = 10_u128.pow(decimals);
    (amount / unit) as f64 + (amount % unit) as f64 / unit as f64
}

pub fn wei_to_coin(amount: u128) -> f64 {
    format_units(amount, EVM_DECIMALS)
}

/// Parses a decimal coin amount ("2", "0.5") into the smallest denomination
/// without going through floating point.
pub fn parse_units(amount: &str, decimals: u32) -> Result<u128> {
    let amount = amount.trim();
    let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));
    if whole.is_empty() && fraction.is_empty() {
        anyhow::bail!("empty amount");
    }
    let width = decimals as usize;
    if fraction.len() > width {
        anyhow::bail!("amount has more than {decimals} decimals: {amount}");
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse()? };
    let fraction_units: u128 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<width$}").parse()?
    };
    whole
        .checked_mul(10_u128.pow(decimals))
        .and_then(|value| value.checked_add(fraction_units))
        .ok_or_else(|| anyhow::anyhow!("amount overflows: {amount}"))
}

pub fn coin_to_wei(amount: &str) -> Result<u128> {
    parse_units(amount, EVM_DECIMALS)
}

/// AVAX on the P-Chain is counted in nAVAX.
pub fn coin_to_nano_avax(amount: &str) -> Result<u128> {
    parse_units(amount, P_CHAIN_DECIMALS)
}
