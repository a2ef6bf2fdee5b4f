//! Chain and overview statistics, proxied from the metrics API through an
//! in-memory TTL cache.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue},
};
use bh_api_types::{ChainStatsResponse, ChainSummary, MetricPoint, MetricSeries, OverviewStatsResponse, TimeRange};
use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{ApiError, AppState, bad_request, epoch_ms, internal_error};

pub(crate) const CHAIN_METRICS: [&str; 6] = [
    "txCount",
    "activeAddresses",
    "activeSenders",
    "gasUsed",
    "feesPaid",
    "contracts",
];
const TX_COUNT: &str = "txCount";
const ACTIVE_ADDRESSES: &str = "activeAddresses";

const SHORT_TTL: Duration = Duration::from_secs(5 * 60);
const LONG_TTL: Duration = Duration::from_secs(60 * 60);
const MAX_PAGES: usize = 20;

/// Upstream time series provider.
#[async_trait]
pub(crate) trait MetricsSource: Send + Sync {
    async fn metric(&self, chain_id: &str, metric: &str, range: TimeRange) -> Result<Vec<MetricPoint>>;
}

/// Avalanche metrics API (`/v2/chains/{chainId}/metrics/{metric}`).
pub(crate) struct HttpMetricsSource {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricsPage {
    #[serde(default)]
    results: Vec<MetricPoint>,
    next_page_token: Option<String>,
}

impl HttpMetricsSource {
    pub(crate) fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn metric(&self, chain_id: &str, metric: &str, range: TimeRange) -> Result<Vec<MetricPoint>> {
        let url = format!("{}/v2/chains/{chain_id}/metrics/{metric}", self.base_url);
        let now_secs = (epoch_ms()? / 1000) as u64;
        let mut query = vec![
            ("timeInterval", "day".to_owned()),
            ("endTimestamp", now_secs.to_string()),
            ("pageSize", "365".to_owned()),
        ];
        if let Some(days) = range.days() {
            query.push(("startTimestamp", now_secs.saturating_sub(days * 86_400).to_string()));
        }

        let mut points = Vec::new();
        let mut page_token: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut request = self.http.get(&url).query(&query);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let response = request.send().await.with_context(|| format!("metrics request for {metric} failed"))?;
            let status = response.status();
            if !status.is_success() {
                return Err(anyhow!("metrics API returned {status} for {chain_id}/{metric}"));
            }
            let page: MetricsPage = response.json().await.context("metrics API returned malformed JSON")?;
            points.extend(page.results);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(chain_id, metric, points = points.len(), "fetched metric");
        Ok(points)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataSource {
    Cache,
    Fresh,
    StaleFallback,
}

impl DataSource {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Fresh => "fresh",
            Self::StaleFallback => "stale-fallback",
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    stored_at_ms: u128,
}

/// Entries outlive their TTL so an upstream outage can fall back to them.
pub(crate) struct StatsCache<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
}

impl<T> Default for StatsCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

pub(crate) fn ttl_for(range: TimeRange) -> Duration {
    match range {
        TimeRange::SevenDays => SHORT_TTL,
        _ => LONG_TTL,
    }
}

impl<T: Clone> StatsCache<T> {
    async fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.read().await.get(key).cloned()
    }

    async fn insert(&self, key: String, data: T, stored_at_ms: u128) {
        self.entries.write().await.insert(key, CacheEntry { data, stored_at_ms });
    }

    async fn evict(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Serves `key` from cache while fresh, otherwise refetches; an expired
    /// entry is the fallback when the fetch fails.
    async fn resolve<F, Fut>(&self, key: String, range: TimeRange, clear: bool, fetch: F) -> Result<Served<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if clear && self.evict(&key).await {
            info!(%key, "stats cache entry cleared");
        }

        let now = epoch_ms()?;
        let cached = self.get(&key).await;
        if let Some(entry) = &cached {
            if now.saturating_sub(entry.stored_at_ms) < ttl_for(range).as_millis() {
                debug!(%key, "stats cache hit");
                return Ok(Served::new(entry.data.clone(), DataSource::Cache, entry.stored_at_ms, now, range));
            }
        }

        match fetch().await {
            Ok(data) => {
                self.insert(key, data.clone(), now).await;
                Ok(Served::new(data, DataSource::Fresh, now, now, range))
            }
            Err(err) => match cached {
                Some(entry) => {
                    warn!(%key, "stats refresh failed, serving expired entry: {err:#}");
                    Ok(Served::new(entry.data, DataSource::StaleFallback, entry.stored_at_ms, now, range))
                }
                None => Err(err),
            },
        }
    }
}

pub(crate) struct Served<T> {
    data: T,
    headers: HeaderMap,
}

impl<T> Served<T> {
    fn new(data: T, source: DataSource, stored_at_ms: u128, now_ms: u128, range: TimeRange) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("x-data-source", HeaderValue::from_static(source.as_str()));
        headers.insert("x-cache-timestamp", HeaderValue::from(stored_at_ms as u64));
        headers.insert("x-cache-age", HeaderValue::from((now_ms.saturating_sub(stored_at_ms) / 1000) as u64));
        headers.insert("x-time-range", HeaderValue::from_static(range.as_str()));
        Self { data, headers }
    }

    fn into_response(self) -> (HeaderMap, Json<T>) {
        (self.headers, Json(self.data))
    }
}

pub(crate) struct StatsService {
    source: Arc<dyn MetricsSource>,
    chain_ids: Vec<String>,
    chains: StatsCache<ChainStatsResponse>,
    overview: StatsCache<OverviewStatsResponse>,
}

impl StatsService {
    pub(crate) fn new(source: Arc<dyn MetricsSource>, chain_ids: Vec<String>) -> Self {
        Self {
            source,
            chain_ids,
            chains: StatsCache::default(),
            overview: StatsCache::default(),
        }
    }

    async fn fetch_chain(&self, chain_id: &str, range: TimeRange) -> Result<ChainStatsResponse> {
        let results = join_all(CHAIN_METRICS.iter().map(|metric| self.source.metric(chain_id, metric, range))).await;

        let mut metrics = Vec::new();
        for (metric, result) in CHAIN_METRICS.iter().zip(results) {
            match result {
                Ok(points) => metrics.push(MetricSeries::from_points(metric, points)),
                Err(err) => warn!(chain_id, metric, "metric fetch failed: {err:#}"),
            }
        }
        if metrics.is_empty() {
            return Err(anyhow!("no metrics available for chain {chain_id}"));
        }

        Ok(ChainStatsResponse {
            chain_id: chain_id.to_owned(),
            time_range: range,
            metrics,
        })
    }

    async fn fetch_summary(&self, chain_id: &str, range: TimeRange) -> Result<ChainSummary> {
        let (tx_count, active_addresses) = futures::try_join!(
            self.source.metric(chain_id, TX_COUNT, range),
            self.source.metric(chain_id, ACTIVE_ADDRESSES, range),
        )?;
        Ok(ChainSummary {
            chain_id: chain_id.to_owned(),
            tx_count: MetricSeries::from_points(TX_COUNT, tx_count).total,
            active_addresses: MetricSeries::from_points(ACTIVE_ADDRESSES, active_addresses).total,
        })
    }

    async fn fetch_overview(&self, range: TimeRange) -> Result<OverviewStatsResponse> {
        let results = join_all(self.chain_ids.iter().map(|chain_id| self.fetch_summary(chain_id, range))).await;

        let mut chains = Vec::new();
        for (chain_id, result) in self.chain_ids.iter().zip(results) {
            match result {
                Ok(summary) => chains.push(summary),
                Err(err) => warn!(%chain_id, "overview fetch failed, excluding chain: {err:#}"),
            }
        }
        if chains.is_empty() && !self.chain_ids.is_empty() {
            return Err(anyhow!("no chain statistics available"));
        }

        Ok(OverviewStatsResponse {
            time_range: range,
            total_tx_count: chains.iter().map(|chain| chain.tx_count).sum(),
            total_active_addresses: chains.iter().map(|chain| chain.active_addresses).sum(),
            chains,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatsQuery {
    #[serde(default)]
    time_range: TimeRange,
    #[serde(default)]
    clear_cache: bool,
}

pub(crate) async fn chain_stats(
    State(state): State<Arc<AppState>>,
    Path(chain_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<(HeaderMap, Json<ChainStatsResponse>), ApiError> {
    if chain_id.is_empty() || !chain_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad_request("chainId must be numeric"));
    }

    let stats = &state.stats;
    let key = format!("{chain_id}-{}", query.time_range);
    let served = stats
        .chains
        .resolve(key, query.time_range, query.clear_cache, || {
            stats.fetch_chain(&chain_id, query.time_range)
        })
        .await
        .map_err(|err| internal_error(format!("Failed to fetch chain stats: {err}")))?;
    Ok(served.into_response())
}

pub(crate) async fn overview_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<(HeaderMap, Json<OverviewStatsResponse>), ApiError> {
    let stats = &state.stats;
    let key = format!("overview-{}", query.time_range);
    let served = stats
        .overview
        .resolve(key, query.time_range, query.clear_cache, || stats.fetch_overview(query.time_range))
        .await
        .map_err(|err| internal_error(format!("Failed to fetch overview stats: {err}")))?;
    Ok(served.into_response())
}
