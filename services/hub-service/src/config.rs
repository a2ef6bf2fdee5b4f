use anyhow::{Context, Result, anyhow};
use bh_api_types::NetworkListEntry;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_CCHAIN_RPC_URL: &str = "https://api.avax-test.network/ext/bc/C/rpc";
const DEFAULT_PCHAIN_RPC_URL: &str = "https://api.avax-test.network/ext/bc/P";
const DEFAULT_PCHAIN_FEE_NAVAX: u64 = 1_000_000;
const DEFAULT_METRICS_API_URL: &str = "https://metrics.avax.network";

#[derive(Debug, Clone)]
pub(crate) struct TlsPaths {
    pub(crate) cert: PathBuf,
    pub(crate) key: PathBuf,
}

#[derive(Debug, Clone)]
pub(crate) struct ServiceConfig {
    pub(crate) bind_addr: SocketAddr,
    pub(crate) jwt_secret: String,
    pub(crate) jwt_issuer: Option<String>,
    pub(crate) faucet_private_key: Option<String>,
    pub(crate) cchain_rpc_url: String,
    pub(crate) drip_avax: String,
    pub(crate) pchain_rpc_url: String,
    pub(crate) pchain_drip_avax: String,
    pub(crate) pchain_fee_navax: u64,
    pub(crate) cooldown_secs: u64,
    pub(crate) l1_networks: Vec<NetworkListEntry>,
    pub(crate) db_path: Option<String>,
    pub(crate) metrics_api_url: String,
    pub(crate) stats_chain_ids: Vec<String>,
    pub(crate) certificate_template_dir: Option<PathBuf>,
    pub(crate) tls: Option<TlsPaths>,
    pub(crate) cors_allow_origin: Option<String>,
}

impl ServiceConfig {
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).map(|value| value.trim().to_owned()).filter(|value| !value.is_empty());

        let bind_addr = var("HUB_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned())
            .parse()
            .context("HUB_BIND_ADDR is not a socket address")?;

        let jwt_secret = var("SESSION_JWT_SECRET").ok_or_else(|| anyhow!("SESSION_JWT_SECRET is required"))?;

        let cooldown_secs = match var("FAUCET_COOLDOWN_SECS") {
            Some(raw) => raw.parse().context("FAUCET_COOLDOWN_SECS is not a number")?,
            None => 24 * 60 * 60,
        };

        let pchain_fee_navax = match var("FAUCET_PCHAIN_FEE_NAVAX") {
            Some(raw) => raw.parse().context("FAUCET_PCHAIN_FEE_NAVAX is not a number")?,
            None => DEFAULT_PCHAIN_FEE_NAVAX,
        };

        let l1_networks = match var("FAUCET_L1_NETWORKS") {
            Some(raw) => serde_json::from_str(&raw).context("FAUCET_L1_NETWORKS is not a JSON network list")?,
            None => Vec::new(),
        };

        let stats_chain_ids = var("STATS_CHAIN_IDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_else(|| vec!["43114".to_owned()]);

        let tls = match (var("TLS_CERT_PATH"), var("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => return Err(anyhow!("TLS_CERT_PATH and TLS_KEY_PATH must be set together")),
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            jwt_issuer: var("SESSION_JWT_ISSUER"),
            faucet_private_key: var("FAUCET_PRIVATE_KEY"),
            cchain_rpc_url: var("FAUCET_CCHAIN_RPC_URL").unwrap_or_else(|| DEFAULT_CCHAIN_RPC_URL.to_owned()),
            drip_avax: var("FAUCET_DRIP_AVAX").unwrap_or_else(|| "2".to_owned()),
            pchain_rpc_url: var("FAUCET_PCHAIN_RPC_URL").unwrap_or_else(|| DEFAULT_PCHAIN_RPC_URL.to_owned()),
            pchain_drip_avax: var("FAUCET_PCHAIN_DRIP_AVAX").unwrap_or_else(|| "0.5".to_owned()),
            pchain_fee_navax,
            cooldown_secs,
            l1_networks,
            db_path: var("FAUCET_DB_PATH"),
            metrics_api_url: var("METRICS_API_URL").unwrap_or_else(|| DEFAULT_METRICS_API_URL.to_owned()),
            stats_chain_ids,
            certificate_template_dir: var("CERTIFICATE_TEMPLATE_DIR").map(PathBuf::from),
            tls,
            cors_allow_origin: var("CORS_ALLOW_ORIGIN"),
        })
    }
}
