mod certificate;
mod config;
mod faucet;
mod stats;

#[cfg(test)]
mod router_tests;

use anyhow::Context;
use axum::{
    Json, Router,
    http::{HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
};
use bh_api_types::{FUJI_C_CHAIN_ID, NetworkListEntry};
use bh_auth_adapter::{SessionPrincipal, bearer_token, verify_session_token};
use bh_chain_client::{ChainAdapter, ChainRegistry};
use bh_chain_evm::EvmFaucetAdapter;
use bh_chain_pchain::{FUJI_NETWORK_ID, PChainFaucetAdapter};
use bh_crypto::FaucetSigner;
use bh_storage::{FaucetClaimStore, InMemoryStore, NetworkListRepository, RocksDbStore};
use bh_wallet_core::NetworkListStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::certificate::CertificateTemplates;
use crate::config::ServiceConfig;
use crate::faucet::FaucetSettings;
use crate::stats::{HttpMetricsSource, StatsService};

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) struct AppState {
    pub(crate) jwt_secret: String,
    pub(crate) jwt_issuer: Option<String>,
    pub(crate) faucet: FaucetSettings,
    pub(crate) chains: ChainRegistry,
    pub(crate) networks: Arc<NetworkListStore>,
    pub(crate) claims: Arc<dyn FaucetClaimStore>,
    pub(crate) stats: StatsService,
    pub(crate) certificates: CertificateTemplates,
}

impl AppState {
    async fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        let (repo, claims) = open_storage(config)?;
        let networks = Arc::new(NetworkListStore::load(repo).await?);
        for entry in &config.l1_networks {
            networks
                .add_l1(entry.clone())
                .await
                .with_context(|| format!("invalid L1 network {}", entry.id))?;
        }

        let mut chains = ChainRegistry::default();
        match config.faucet_private_key.as_deref() {
            Some(key) => {
                let signer = Arc::new(FaucetSigner::from_hex(key)?);
                info!(address = %signer.evm_address(), "faucet signer loaded");
                register_evm_faucets(&mut chains, &signer, &config.cchain_rpc_url, &networks.faucet_networks().await);
                register_pchain_faucet(&mut chains, &signer, config)?;
            }
            None => warn!("FAUCET_PRIVATE_KEY not set; faucet endpoints will refuse transfers"),
        }

        let certificates = match &config.certificate_template_dir {
            Some(dir) => CertificateTemplates::load(dir).await?,
            None => {
                warn!("CERTIFICATE_TEMPLATE_DIR not set; certificate generation disabled");
                CertificateTemplates::default()
            }
        };

        Ok(Self {
            jwt_secret: config.jwt_secret.clone(),
            jwt_issuer: config.jwt_issuer.clone(),
            faucet: FaucetSettings::from_config(config)?,
            chains,
            networks,
            claims,
            stats: StatsService::new(
                Arc::new(HttpMetricsSource::new(&config.metrics_api_url)),
                config.stats_chain_ids.clone(),
            ),
            certificates,
        })
    }

    pub(crate) fn authenticate(&self, headers: &HeaderMap) -> Result<SessionPrincipal, String> {
        let header = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| "missing Authorization header".to_owned())?;
        let token = bearer_token(header).map_err(|err| err.to_string())?;
        verify_session_token(token, &self.jwt_secret, self.jwt_issuer.as_deref()).map_err(|err| err.to_string())
    }
}

type Storage = (Arc<dyn NetworkListRepository>, Arc<dyn FaucetClaimStore>);

fn open_storage(config: &ServiceConfig) -> anyhow::Result<Storage> {
    match config.db_path.as_deref() {
        Some(path) => {
            let store = Arc::new(RocksDbStore::open_default(path)?);
            info!(path, "using RocksDB storage");
            let repo: Arc<dyn NetworkListRepository> = store.clone();
            let claims: Arc<dyn FaucetClaimStore> = store;
            Ok((repo, claims))
        }
        None => {
            warn!("FAUCET_DB_PATH not set; faucet claims are kept in memory");
            let store = Arc::new(InMemoryStore::default());
            let repo: Arc<dyn NetworkListRepository> = store.clone();
            let claims: Arc<dyn FaucetClaimStore> = store;
            Ok((repo, claims))
        }
    }
}

fn register_evm_faucets(
    chains: &mut ChainRegistry,
    signer: &Arc<FaucetSigner>,
    cchain_rpc_url: &str,
    faucet_networks: &[NetworkListEntry],
) {
    chains.register(Arc::new(EvmFaucetAdapter::new(FUJI_C_CHAIN_ID, cchain_rpc_url, signer.clone())));
    for network in faucet_networks.iter().filter(|network| !network.is_canonical()) {
        info!(chain = network.evm_chain_id, name = %network.name, "registering L1 faucet");
        let adapter: Arc<dyn ChainAdapter> =
            Arc::new(EvmFaucetAdapter::new(network.evm_chain_id, &network.rpc_url, signer.clone()));
        chains.register(adapter);
    }
}

fn register_pchain_faucet(chains: &mut ChainRegistry, signer: &Arc<FaucetSigner>, config: &ServiceConfig) -> anyhow::Result<()> {
    let adapter = PChainFaucetAdapter::new(FUJI_NETWORK_ID, &config.pchain_rpc_url, signer.clone())?
        .with_fee(config.pchain_fee_navax);
    info!(address = %adapter.source_address(), "registering P-Chain faucet");
    chains.register(Arc::new(adapter));
    Ok(())
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/api/cchain-faucet", get(faucet::cchain_faucet))
        .route("/api/evm-chain-faucet", get(faucet::evm_chain_faucet))
        .route("/api/pchain-faucet", get(faucet::pchain_faucet))
        .route("/api/chain-stats/{chain_id}", get(stats::chain_stats))
        .route("/api/overview-stats", get(stats::overview_stats))
        .route("/api/generate-certificate", post(certificate::generate_certificate))
        .with_state(state)
}

fn cors_layer(config: &ServiceConfig) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match config.cors_allow_origin.as_deref() {
        Some(origin) => {
            let origin: HeaderValue = origin.parse().context("CORS_ALLOW_ORIGIN is not a valid origin")?;
            info!(?origin, "CORS restricted");
            Ok(layer.allow_origin(origin))
        }
        None => {
            warn!("CORS_ALLOW_ORIGIN not set; allowing any origin");
            Ok(layer.allow_origin(Any))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServiceConfig::from_env()?;
    let state = Arc::new(AppState::from_config(&config).await?);
    let app = router(state).layer(cors_layer(&config)?);

    match &config.tls {
        Some(tls) => {
            let _ = rustls::crypto::ring::default_provider().install_default();
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .context("failed to load TLS certificate")?;

            let handle = axum_server::Handle::new();
            let shutdown = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown.graceful_shutdown(None);
            });

            info!("hub-service listening on https://{}", config.bind_addr);
            axum_server::bind_rustls(config.bind_addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
            info!("hub-service listening on http://{}", config.bind_addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "hub-service",
        status: "ok",
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: "hub-service",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(crate) fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
}

pub(crate) fn internal_error(err: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

pub(crate) fn epoch_ms() -> anyhow::Result<u128> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis())
}
