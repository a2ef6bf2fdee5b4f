use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    response::Response,
};
use bh_api_types::{ChainKey, MetricPoint, NetworkListEntry, TimeRange, WalletAddress};
use bh_chain_client::{BalanceResult, ChainAdapter, ChainRegistry, TransferRequest, TransferResult};
use bh_storage::InMemoryStore;
use bh_wallet_core::NetworkListStore;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

use crate::certificate::{CertificateTemplates, CourseTemplate, shown_text, template_pdf};
use crate::config::ServiceConfig;
use crate::faucet::FaucetSettings;
use crate::stats::{CHAIN_METRICS, MetricsSource, StatsService};
use crate::{AppState, router};

const SECRET: &str = "router-test-secret";
const FAUCET_ADDRESS: &str = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";
const USER_ADDRESS: &str = "0x2b5ad5c4795c026514f8317c7a215e218dccd6cf";
const OTHER_USER_ADDRESS: &str = "0x6813eb9362372eef6200f3b1dbc3f819671cba69";
const GENERATOR_PUBKEY: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
const L1_CHAIN_ID: u64 = 779672;

struct FakeFaucet {
    key: ChainKey,
    source: String,
    decimals: u32,
    sent: AtomicUsize,
    amounts: Mutex<Vec<u128>>,
    failing: AtomicBool,
}

impl FakeFaucet {
    fn new(key: ChainKey, source: &str) -> Arc<Self> {
        Self::with_decimals(key, source, 18)
    }

    fn with_decimals(key: ChainKey, source: &str, decimals: u32) -> Arc<Self> {
        Arc::new(Self {
            key,
            source: source.to_owned(),
            decimals,
            sent: AtomicUsize::new(0),
            amounts: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ChainAdapter for FakeFaucet {
    fn chain_key(&self) -> &ChainKey {
        &self.key
    }

    fn source_address(&self) -> &str {
        &self.source
    }

    fn decimals(&self) -> u32 {
        self.decimals
    }

    async fn get_balance(&self, wallet_address: &WalletAddress) -> Result<BalanceResult> {
        Ok(BalanceResult {
            wallet_address: wallet_address.clone(),
            chain: self.key.clone(),
            amount: 0,
        })
    }

    async fn send_native(&self, req: TransferRequest) -> Result<TransferResult> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("node unreachable");
        }
        self.amounts.lock().expect("amounts").push(req.amount);
        let n = self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(TransferResult {
            tx_hash: format!("0x{n:064x}"),
        })
    }
}

#[derive(Default)]
struct FakeMetrics {
    calls: AtomicUsize,
    failing: AtomicBool,
    failing_chains: Vec<String>,
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn metric(&self, chain_id: &str, _metric: &str, _range: TimeRange) -> Result<Vec<MetricPoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) || self.failing_chains.iter().any(|id| id == chain_id) {
            anyhow::bail!("metrics API returned 503");
        }
        Ok(vec![
            MetricPoint {
                timestamp: 1_700_000_000,
                value: 10.0,
            },
            MetricPoint {
                timestamp: 1_700_086_400,
                value: 5.0,
            },
        ])
    }
}

struct Harness {
    state: Arc<AppState>,
    cchain: Arc<FakeFaucet>,
    l1: Arc<FakeFaucet>,
    metrics: Arc<FakeMetrics>,
    _templates: tempfile::TempDir,
}

async fn harness_with(metrics: FakeMetrics, pchain: Option<Arc<FakeFaucet>>) -> Result<Harness> {
    let cchain = FakeFaucet::new(ChainKey::evm(43113), FAUCET_ADDRESS);
    let l1 = FakeFaucet::new(ChainKey::evm(L1_CHAIN_ID), FAUCET_ADDRESS);
    let mut chains = ChainRegistry::default();
    chains.register(cchain.clone());
    chains.register(l1.clone());
    if let Some(pchain) = pchain {
        chains.register(pchain);
    }

    let store = Arc::new(InMemoryStore::default());
    let networks = Arc::new(NetworkListStore::load(store.clone()).await?);
    networks
        .add_l1(NetworkListEntry {
            id: "dispatch".to_owned(),
            name: "Dispatch".to_owned(),
            evm_chain_id: L1_CHAIN_ID,
            coin_name: "DIS".to_owned(),
            rpc_url: "https://rpc.dispatch.example".to_owned(),
            explorer_url: None,
            logo_url: None,
            has_builder_hub_faucet: true,
            drip_amount: Some(1.5),
            is_testnet: Some(true),
        })
        .await?;

    let templates = tempfile::tempdir()?;
    tokio::fs::write(templates.path().join("fundamentals.pdf"), template_pdf(&["{{userName}}"])).await?;
    let courses = HashMap::from([(
        "avalanche-fundamentals".to_owned(),
        CourseTemplate {
            template: "fundamentals.pdf".to_owned(),
            course_name: "Avalanche Fundamentals".to_owned(),
        },
    )]);

    let metrics = Arc::new(metrics);
    let state = Arc::new(AppState {
        jwt_secret: SECRET.to_owned(),
        jwt_issuer: None,
        faucet: FaucetSettings {
            cchain_drip_wei: 2_000_000_000_000_000_000,
            pchain_drip_navax: 500_000_000,
            cooldown_ms: 24 * 60 * 60 * 1000,
        },
        chains,
        networks,
        claims: store,
        stats: StatsService::new(metrics.clone(), vec!["43114".to_owned(), "779672".to_owned()]),
        certificates: CertificateTemplates::new(PathBuf::from(templates.path()), courses),
    });

    Ok(Harness {
        state,
        cchain,
        l1,
        metrics,
        _templates: templates,
    })
}

async fn harness() -> Result<Harness> {
    harness_with(FakeMetrics::default(), None).await
}

fn session_token(user_id: &str) -> String {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs()
        + 3600;
    encode(
        &Header::default(),
        &json!({"sub": user_id, "exp": exp}),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("encode session token")
}

impl Harness {
    async fn get(&self, uri: &str, user: Option<&str>) -> Result<Response> {
        let mut request = Request::builder().uri(uri);
        if let Some(user) = user {
            request = request.header("authorization", format!("Bearer {}", session_token(user)));
        }
        Ok(router(self.state.clone()).oneshot(request.body(Body::empty())?).await?)
    }

    async fn post_json(&self, uri: &str, body: Value) -> Result<Response> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?;
        Ok(router(self.state.clone()).oneshot(request).await?)
    }
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn health_reports_ok() -> Result<()> {
    let harness = harness().await?;
    let response = harness.get("/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn faucet_requires_a_session() -> Result<()> {
    let harness = harness().await?;
    let response = harness.get(&format!("/api/cchain-faucet?address={USER_ADDRESS}"), None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await?["success"], false);
    Ok(())
}

#[tokio::test]
async fn faucet_validates_the_address() -> Result<()> {
    let harness = harness().await?;
    let missing = harness.get("/api/cchain-faucet", Some("user-1")).await?;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let malformed = harness.get("/api/cchain-faucet?address=0x1234", Some("user-1")).await?;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    assert_eq!(harness.cchain.sent.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn faucet_refuses_its_own_address() -> Result<()> {
    let harness = harness().await?;
    let upper = FAUCET_ADDRESS.to_uppercase().replacen("0X", "0x", 1);
    let response = harness
        .get(&format!("/api/cchain-faucet?address={upper}"), Some("user-1"))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(harness.cchain.sent.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn second_claim_within_a_day_is_rate_limited() -> Result<()> {
    let harness = harness().await?;
    let uri = format!("/api/cchain-faucet?address={USER_ADDRESS}");

    let first = harness.get(&uri, Some("user-1")).await?;
    assert_eq!(first.status(), StatusCode::OK);
    let body = json_body(first).await?;
    assert_eq!(body["success"], true);
    assert!(body["txHash"].as_str().is_some_and(|hash| hash.starts_with("0x")));

    let second = harness.get(&uri, Some("user-1")).await?;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(second).await?["success"], false);

    let elsewhere = harness
        .get(&format!("/api/cchain-faucet?address={OTHER_USER_ADDRESS}"), Some("user-1"))
        .await?;
    assert_eq!(elsewhere.status(), StatusCode::TOO_MANY_REQUESTS);

    let other_user = harness.get(&uri, Some("user-2")).await?;
    assert_eq!(other_user.status(), StatusCode::OK);
    assert_eq!(harness.cchain.sent.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn failed_transfer_does_not_consume_the_claim() -> Result<()> {
    let harness = harness().await?;
    let uri = format!("/api/cchain-faucet?address={USER_ADDRESS}");

    harness.cchain.failing.store(true, Ordering::SeqCst);
    let failed = harness.get(&uri, Some("user-1")).await?;
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);

    harness.cchain.failing.store(false, Ordering::SeqCst);
    let retried = harness.get(&uri, Some("user-1")).await?;
    assert_eq!(retried.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn l1_faucet_limits_per_chain() -> Result<()> {
    let harness = harness().await?;
    let cchain = harness
        .get(&format!("/api/cchain-faucet?address={USER_ADDRESS}"), Some("user-1"))
        .await?;
    assert_eq!(cchain.status(), StatusCode::OK);

    let l1_uri = format!("/api/evm-chain-faucet?address={USER_ADDRESS}&chainId={L1_CHAIN_ID}");
    let l1 = harness.get(&l1_uri, Some("user-1")).await?;
    assert_eq!(l1.status(), StatusCode::OK);
    assert!(json_body(l1).await?["message"].as_str().is_some_and(|msg| msg.contains("1.5 DIS")));

    let again = harness.get(&l1_uri, Some("user-1")).await?;
    assert_eq!(again.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(harness.l1.sent.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn l1_faucet_rejects_unsupported_chains() -> Result<()> {
    let harness = harness().await?;
    let unknown = harness
        .get(&format!("/api/evm-chain-faucet?address={USER_ADDRESS}&chainId=12345"), Some("user-1"))
        .await?;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let missing = harness
        .get(&format!("/api/evm-chain-faucet?address={USER_ADDRESS}"), Some("user-1"))
        .await?;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn pchain_faucet_validates_bech32_addresses() -> Result<()> {
    let address = bh_crypto::p_chain_address(GENERATOR_PUBKEY, bh_crypto::TESTNET_HRP)?;

    let unconfigured = harness().await?;
    let evm = unconfigured
        .get(&format!("/api/pchain-faucet?address={USER_ADDRESS}"), Some("user-1"))
        .await?;
    assert_eq!(evm.status(), StatusCode::BAD_REQUEST);
    let no_adapter = unconfigured
        .get(&format!("/api/pchain-faucet?address={address}"), Some("user-1"))
        .await?;
    assert_eq!(no_adapter.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let pchain = FakeFaucet::with_decimals(ChainKey::p_chain(), "P-fuji1faucet", 9);
    let configured = harness_with(FakeMetrics::default(), Some(pchain.clone())).await?;
    let sent = configured
        .get(&format!("/api/pchain-faucet?address={address}"), Some("user-1"))
        .await?;
    assert_eq!(sent.status(), StatusCode::OK);
    assert!(json_body(sent).await?["message"].as_str().is_some_and(|msg| msg.contains("Sent 0.5 AVAX")));
    assert_eq!(pchain.sent.load(Ordering::SeqCst), 1);
    // 0.5 AVAX in nAVAX
    assert_eq!(*pchain.amounts.lock().expect("amounts"), vec![500_000_000]);
    Ok(())
}

#[tokio::test]
async fn faucet_key_registers_every_faucet_chain() -> Result<()> {
    let config = ServiceConfig::from_lookup(|name| match name {
        "SESSION_JWT_SECRET" => Some(SECRET.to_owned()),
        "FAUCET_PRIVATE_KEY" => Some("46".repeat(32)),
        "FAUCET_PCHAIN_DRIP_AVAX" => Some("0.25".to_owned()),
        _ => None,
    })?;
    let state = AppState::from_config(&config).await?;

    let pchain = state
        .chains
        .adapter(&ChainKey::p_chain())
        .expect("P-Chain faucet registered");
    assert!(pchain.source_address().starts_with("P-fuji1"));
    assert_eq!(pchain.decimals(), 9);
    assert!(state.chains.adapter(&ChainKey::evm(43113)).is_some());
    assert_eq!(state.faucet.pchain_drip_navax, 250_000_000);
    assert_eq!(state.faucet.cchain_drip_wei, 2_000_000_000_000_000_000);
    Ok(())
}

#[tokio::test]
async fn warm_cache_serves_without_upstream_calls() -> Result<()> {
    let harness = harness().await?;

    let first = harness.get("/api/chain-stats/43114?timeRange=30d", None).await?;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-data-source"], "fresh");
    let calls = harness.metrics.calls.load(Ordering::SeqCst);
    assert_eq!(calls, CHAIN_METRICS.len());

    let second = harness.get("/api/chain-stats/43114?timeRange=30d", None).await?;
    assert_eq!(second.headers()["x-data-source"], "cache");
    assert_eq!(second.headers()["x-time-range"], "30d");
    assert!(second.headers().contains_key("x-cache-timestamp"));
    assert!(second.headers().contains_key("x-cache-age"));
    assert_eq!(harness.metrics.calls.load(Ordering::SeqCst), calls);

    let body = json_body(second).await?;
    assert_eq!(body["chainId"], "43114");
    assert_eq!(body["metrics"][0]["total"], 15.0);

    let cleared = harness
        .get("/api/chain-stats/43114?timeRange=30d&clearCache=true", None)
        .await?;
    assert_eq!(cleared.headers()["x-data-source"], "fresh");
    assert_eq!(harness.metrics.calls.load(Ordering::SeqCst), calls * 2);
    Ok(())
}

#[tokio::test]
async fn time_ranges_are_cached_separately() -> Result<()> {
    let harness = harness().await?;
    harness.get("/api/chain-stats/43114?timeRange=30d", None).await?;
    let week = harness.get("/api/chain-stats/43114?timeRange=7d", None).await?;
    assert_eq!(week.headers()["x-data-source"], "fresh");
    assert_eq!(week.headers()["x-time-range"], "7d");
    Ok(())
}

#[tokio::test]
async fn upstream_failure_without_cache_is_a_server_error() -> Result<()> {
    let harness = harness().await?;
    harness.metrics.failing.store(true, Ordering::SeqCst);
    let response = harness.get("/api/chain-stats/43114", None).await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let bad_id = harness.get("/api/chain-stats/c-chain", None).await?;
    assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn overview_excludes_failing_chains() -> Result<()> {
    let metrics = FakeMetrics {
        failing_chains: vec!["779672".to_owned()],
        ..Default::default()
    };
    let harness = harness_with(metrics, None).await?;

    let response = harness.get("/api/overview-stats?timeRange=90d", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-time-range"], "90d");
    let body = json_body(response).await?;
    assert_eq!(body["chains"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["chains"][0]["chainId"], "43114");
    assert_eq!(body["totalTxCount"], 15.0);
    Ok(())
}

#[tokio::test]
async fn unknown_course_is_a_server_error() -> Result<()> {
    let harness = harness().await?;
    let response = harness
        .post_json(
            "/api/generate-certificate",
            json!({"courseId": "intro-to-vms", "userName": "Ada"}),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await?["error"],
        "No certificate template found for course: intro-to-vms"
    );
    Ok(())
}

#[tokio::test]
async fn certificate_requires_a_name_and_returns_a_pdf() -> Result<()> {
    let harness = harness().await?;
    let unnamed = harness
        .post_json(
            "/api/generate-certificate",
            json!({"courseId": "avalanche-fundamentals", "userName": "  "}),
        )
        .await?;
    assert_eq!(unnamed.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .post_json(
            "/api/generate-certificate",
            json!({"courseId": "avalanche-fundamentals", "userName": "Ada"}),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/pdf");
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    assert!(bytes.starts_with(b"%PDF-"));
    assert_eq!(shown_text(&bytes), vec!["Ada"]);
    Ok(())
}
