//! Testnet faucets: Fuji C-Chain, Builder Hub L1s and the Fuji P-Chain.
//!
//! Every route answers with `{success, txHash?, message?}`, including on
//! failure. A claim slot is reserved before the transfer is broadcast and
//! released if the transfer fails.

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
};
use bh_api_types::{ChainKey, FUJI_C_CHAIN_ID, FaucetResponse, WalletAddress};
use bh_auth_adapter::SessionPrincipal;
use bh_chain_client::{ChainAdapter, TransferRequest, coin_to_nano_avax, coin_to_wei, format_units};
use bh_crypto::{TESTNET_HRP, decode_p_chain_address, is_evm_address};
use bh_storage::{ClaimOutcome, FaucetClaimRecord};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::{AppState, epoch_ms};

pub(crate) type FaucetResult = Result<Json<FaucetResponse>, (StatusCode, Json<FaucetResponse>)>;

#[derive(Debug, Clone)]
pub(crate) struct FaucetSettings {
    pub(crate) cchain_drip_wei: u128,
    /// nAVAX, since the P-Chain counts AVAX with 9 decimals.
    pub(crate) pchain_drip_navax: u128,
    pub(crate) cooldown_ms: u128,
}

impl FaucetSettings {
    pub(crate) fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        Ok(Self {
            cchain_drip_wei: coin_to_wei(&config.drip_avax)?,
            pchain_drip_navax: coin_to_nano_avax(&config.pchain_drip_avax)?,
            cooldown_ms: u128::from(config.cooldown_secs) * 1000,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FaucetQuery {
    address: Option<String>,
    chain_id: Option<String>,
}

fn reject(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<FaucetResponse>) {
    (status, Json(FaucetResponse::failed(message)))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<SessionPrincipal, (StatusCode, Json<FaucetResponse>)> {
    state.authenticate(headers).map_err(|err| {
        warn!("faucet request without a valid session: {err}");
        reject(StatusCode::UNAUTHORIZED, "Authentication required")
    })
}

fn required_address(query: &FaucetQuery) -> Result<String, (StatusCode, Json<FaucetResponse>)> {
    query
        .address
        .as_deref()
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "Address is required"))
}

fn require_evm_address(query: &FaucetQuery) -> Result<String, (StatusCode, Json<FaucetResponse>)> {
    let address = required_address(query)?;
    if !is_evm_address(&address) {
        return Err(reject(StatusCode::BAD_REQUEST, "Invalid Ethereum address format"));
    }
    Ok(address)
}

fn refuse_self_transfer(
    adapter: Option<&Arc<dyn ChainAdapter>>,
    destination: &str,
) -> Result<(), (StatusCode, Json<FaucetResponse>)> {
    match adapter {
        Some(adapter) if adapter.source_address().eq_ignore_ascii_case(destination) => Err(reject(
            StatusCode::BAD_REQUEST,
            "Cannot send tokens to the faucet address",
        )),
        _ => Ok(()),
    }
}

fn cooldown_message(retry_after_ms: u128) -> String {
    let hours = retry_after_ms.div_ceil(60 * 60 * 1000);
    format!("Rate limit exceeded. You can request tokens again in {hours} hour(s).")
}

pub(crate) async fn cchain_faucet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<FaucetQuery>,
) -> FaucetResult {
    let principal = authenticate(&state, &headers)?;
    let destination = require_evm_address(&query)?;

    let adapter = state.chains.adapter(&ChainKey::evm(FUJI_C_CHAIN_ID));
    refuse_self_transfer(adapter.as_ref(), &destination)?;
    let adapter = adapter.ok_or_else(|| reject(StatusCode::INTERNAL_SERVER_ERROR, "C-Chain faucet is not configured"))?;

    dispense(&state, &principal, adapter, destination, state.faucet.cchain_drip_wei, "AVAX").await
}

pub(crate) async fn evm_chain_faucet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<FaucetQuery>,
) -> FaucetResult {
    let principal = authenticate(&state, &headers)?;
    let destination = require_evm_address(&query)?;

    let chain_id = query.chain_id.as_deref().and_then(|raw| raw.trim().parse::<u64>().ok());
    let adapter = chain_id.and_then(|chain_id| state.chains.adapter(&ChainKey::evm(chain_id)));
    refuse_self_transfer(adapter.as_ref(), &destination)?;

    let Some(chain_id) = chain_id else {
        return Err(reject(StatusCode::BAD_REQUEST, "A numeric chainId is required"));
    };
    let network = state
        .networks
        .find_by_evm_chain_id(chain_id)
        .await
        .filter(|network| network.has_builder_hub_faucet);
    let (Some(network), Some(adapter)) = (network, adapter) else {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            format!("Chain {chain_id} is not supported by the Builder Hub faucet"),
        ));
    };

    let amount = match network.drip_amount {
        Some(drip) => coin_to_wei(&drip.to_string())
            .map_err(|err| reject(StatusCode::INTERNAL_SERVER_ERROR, format!("Invalid drip amount: {err}")))?,
        None => state.faucet.cchain_drip_wei,
    };
    dispense(&state, &principal, adapter, destination, amount, &network.coin_name).await
}

pub(crate) async fn pchain_faucet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<FaucetQuery>,
) -> FaucetResult {
    let principal = authenticate(&state, &headers)?;
    let destination = required_address(&query)?;
    if decode_p_chain_address(&destination, TESTNET_HRP).is_err() {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "Invalid P-Chain address format; expected P-fuji1...",
        ));
    }

    let adapter = state.chains.adapter(&ChainKey::p_chain());
    refuse_self_transfer(adapter.as_ref(), &destination)?;
    let adapter = adapter.ok_or_else(|| reject(StatusCode::INTERNAL_SERVER_ERROR, "P-Chain faucet is not configured"))?;

    dispense(&state, &principal, adapter, destination, state.faucet.pchain_drip_navax, "AVAX").await
}

async fn dispense(
    state: &AppState,
    principal: &SessionPrincipal,
    adapter: Arc<dyn ChainAdapter>,
    destination: String,
    amount: u128,
    symbol: &str,
) -> FaucetResult {
    let chain = adapter.chain_key().clone();
    let decimals = adapter.decimals();
    let claimed_at_epoch_ms = epoch_ms().map_err(|err| reject(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    let reservation = FaucetClaimRecord {
        user_id: principal.user_id.clone(),
        chain: chain.0.clone(),
        destination: destination.clone(),
        tx_hash: None,
        claimed_at_epoch_ms,
    };

    let outcome = state
        .claims
        .try_reserve_claim(&reservation, state.faucet.cooldown_ms)
        .await
        .map_err(|err| reject(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to check rate limit: {err}")))?;
    if let ClaimOutcome::CoolingDown { retry_after_ms } = outcome {
        info!(user = %principal.user_id, %chain, retry_after_ms, "faucet claim refused by cooldown");
        return Err(reject(StatusCode::TOO_MANY_REQUESTS, cooldown_message(retry_after_ms)));
    }

    let transfer = TransferRequest {
        to: WalletAddress(destination.clone()),
        amount,
    };
    match adapter.send_native(transfer).await {
        Ok(result) => {
            let confirmed = FaucetClaimRecord {
                tx_hash: Some(result.tx_hash.clone()),
                ..reservation
            };
            if let Err(err) = state.claims.record_claim(&confirmed).await {
                warn!(%chain, tx_hash = %result.tx_hash, "failed to record faucet claim: {err:#}");
            }
            info!(user = %principal.user_id, %chain, %destination, tx_hash = %result.tx_hash, "faucet transfer sent");
            Ok(Json(FaucetResponse::sent(
                result.tx_hash,
                format!("Sent {} {symbol} to {destination}", format_units(amount, decimals)),
            )))
        }
        Err(err) => {
            warn!(user = %principal.user_id, %chain, "faucet transfer failed: {err:#}");
            if let Err(release_err) = state.claims.release_claim(&principal.user_id, &chain).await {
                warn!(%chain, "failed to release faucet claim: {release_err:#}");
            }
            Err(reject(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to send tokens: {err}")))
        }
    }
}
