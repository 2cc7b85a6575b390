use crate::cache::ResourceCache;
use crate::circuit_breaker::RemoteCircuitBreaker;
use crate::classifier::{classify, RawFailure};
use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::export::{BulkExportPipeline, ExportOptions, ExportSink, ProgressCallback};
use crate::models::{Campaign, ExportItem, ExportResult, ExportStatus};
use crate::rate_limit::{QuotaInfo, RateLimitTracker};
use crate::reporter::ErrorReporter;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::validation::validate_item;
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

const API_KEY_HEADER: &str = "X-Api-Key";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const CAMPAIGNS_CACHE_KEY: &str = "campaigns";

/// The list endpoint answers either a bare array or a wrapped one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CampaignListResponse {
    List(Vec<Campaign>),
    Wrapped { campaigns: Vec<Campaign> },
}

impl CampaignListResponse {
    fn into_campaigns(self) -> Vec<Campaign> {
        match self {
            CampaignListResponse::List(campaigns) => campaigns,
            CampaignListResponse::Wrapped { campaigns } => campaigns,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DuplicateCheckResponse {
    #[serde(default)]
    existing: Vec<String>,
}

/// Body of a lead submission answer. A 2xx with `success: false` is a
/// rejection, not a success.
#[derive(Debug, Default, Deserialize)]
struct SubmissionResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Idempotency key for one lead in one campaign: hex SHA-256 of both.
pub fn idempotency_key(campaign_id: &str, item: &ExportItem) -> String {
    let mut hasher = Sha256::new();
    hasher.update(campaign_id.as_bytes());
    hasher.update(b":");
    hasher.update(item.identity().as_bytes());
    hex::encode(hasher.finalize())
}

/// Single-attempt HTTP calls against the campaign service.
///
/// Every attempt is counted by the rate-limit tracker and fed to the
/// circuit breaker. Retrying is the caller's job.
struct LiveTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    rate_limiter: Arc<RateLimitTracker>,
    breaker: RemoteCircuitBreaker,
}

impl LiveTransport {
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, RawFailure> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| RawFailure::Local(format!("Invalid campaign API base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RawFailure::Local("Campaign API base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RawFailure> {
        self.breaker.check()?;
        self.rate_limiter.record_call();

        let outcome = match request.header(API_KEY_HEADER, &self.api_key).send().await {
            Ok(response) if response.status().is_success() => Ok(response),
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(RawFailure::Response { status, body })
            }
            Err(e) => Err(RawFailure::from(e)),
        };

        self.breaker.record(&outcome);
        outcome
    }

    async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, RawFailure> {
        let url = self.endpoint(&["campaigns"])?;
        tracing::info!("Fetching campaigns from {}", url);

        let response = self.send(self.http.get(url)).await?;
        let campaigns = response
            .json::<CampaignListResponse>()
            .await?
            .into_campaigns();

        tracing::info!("✓ Fetched {} campaigns", campaigns.len());
        Ok(campaigns)
    }

    async fn find_existing(
        &self,
        campaign_id: &str,
        emails: &[String],
    ) -> Result<Vec<String>, RawFailure> {
        let url = self.endpoint(&["campaigns", campaign_id, "duplicates"])?;
        tracing::debug!("Checking {} emails for duplicates in {}", emails.len(), campaign_id);

        let response = self
            .send(self.http.post(url).json(&json!({ "emails": emails })))
            .await?;
        let parsed: DuplicateCheckResponse = response.json().await?;
        Ok(parsed.existing)
    }

    async fn submit_lead(&self, campaign_id: &str, item: &ExportItem) -> Result<(), RawFailure> {
        let url = self.endpoint(&["campaigns", campaign_id, "leads"])?;

        let response = self
            .send(
                self.http
                    .post(url)
                    .header(IDEMPOTENCY_HEADER, idempotency_key(campaign_id, item))
                    .json(item),
            )
            .await?;

        let body = response.text().await?;
        let parsed = if body.trim().is_empty() {
            SubmissionResponse::default()
        } else {
            // Non-JSON 2xx bodies are treated as plain acknowledgements
            serde_json::from_str(&body).unwrap_or_default()
        };

        if parsed.success == Some(false) {
            return Err(RawFailure::Rejected {
                message: parsed
                    .error
                    .unwrap_or_else(|| "Lead rejected by campaign service".to_string()),
                code: parsed.code,
            });
        }

        tracing::debug!("✓ Lead {} added to campaign {}", item.identity(), campaign_id);
        Ok(())
    }
}

struct LiveSink {
    transport: Arc<LiveTransport>,
    campaign_id: String,
}

impl ExportSink for LiveSink {
    fn existing_identities<'a>(
        &'a self,
        identities: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<String>, RawFailure>> {
        self.transport
            .find_existing(&self.campaign_id, identities)
            .boxed()
    }

    fn submit<'a>(&'a self, item: &'a ExportItem) -> BoxFuture<'a, Result<(), RawFailure>> {
        self.transport.submit_lead(&self.campaign_id, item).boxed()
    }
}

/// Accepts everything without any I/O.
struct DemoSink;

impl ExportSink for DemoSink {
    fn existing_identities<'a>(
        &'a self,
        _identities: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<String>, RawFailure>> {
        async { Ok(Vec::new()) }.boxed()
    }

    fn submit<'a>(&'a self, item: &'a ExportItem) -> BoxFuture<'a, Result<(), RawFailure>> {
        tracing::debug!("[demo] Simulated submission of {}", item.identity());
        async { Ok(()) }.boxed()
    }
}

enum Mode {
    Live(Arc<LiveTransport>),
    Demo,
}

fn demo_campaigns() -> Vec<Campaign> {
    [
        ("demo-campaign-1", "Welcome sequence", "running", 128),
        ("demo-campaign-2", "Product launch follow-up", "paused", 57),
        ("demo-campaign-3", "Re-engagement", "draft", 0),
    ]
    .into_iter()
    .map(|(id, name, status, prospects)| Campaign {
        id: id.to_string(),
        name: name.to_string(),
        status: Some(status.to_string()),
        created_date: Some("2024-01-15T09:00:00Z".to_string()),
        prospect_count: Some(prospects),
    })
    .collect()
}

fn check_campaign_id(campaign_id: &str) -> Result<(), AppError> {
    if campaign_id.trim().is_empty() {
        return Err(AppError::validation("Campaign id is required").with_code("MISSING_CAMPAIGN"));
    }
    Ok(())
}

/// Client for the remote campaign service.
///
/// The mode is fixed at construction: with a usable API key every call goes
/// to the network; without one every call is answered locally.
pub struct CampaignClient {
    mode: Mode,
    cache: ResourceCache<Vec<Campaign>>,
    rate_limiter: Arc<RateLimitTracker>,
    executor: RetryExecutor,
    pipeline: BulkExportPipeline,
    reporter: ErrorReporter,
    cache_ttl: Duration,
    retry: RetryConfig,
    export_concurrency: usize,
    phone_region: String,
}

impl CampaignClient {
    /// Creates a new `CampaignClient`.
    ///
    /// # Arguments
    ///
    /// * `config` - Application configuration; decides live or demo mode.
    /// * `reporter` - Error-reporting context shared with the caller.
    pub fn new(config: &Config, reporter: ErrorReporter) -> Result<Self, AppError> {
        let rate_limiter = Arc::new(RateLimitTracker::new(
            config.rate_limit_window(),
            config.rate_limit_max_requests,
        ));

        let mode = match (&config.campaign_api_key, &config.campaign_api_base_url) {
            (Some(api_key), Some(base_url)) if config.has_live_credentials() => {
                let http = reqwest::Client::builder()
                    .timeout(config.request_timeout())
                    .build()
                    .map_err(|e| {
                        classify(RawFailure::Local(format!(
                            "Failed to create campaign HTTP client: {}",
                            e
                        )))
                    })?;

                tracing::info!("✓ Campaign client initialized (live): {}", base_url);
                Mode::Live(Arc::new(LiveTransport {
                    http,
                    base_url: base_url.clone(),
                    api_key: api_key.clone(),
                    rate_limiter: Arc::clone(&rate_limiter),
                    breaker: RemoteCircuitBreaker::for_campaign_service(),
                }))
            }
            _ => {
                tracing::info!("Campaign client initialized in demo mode");
                Mode::Demo
            }
        };

        let executor = RetryExecutor::new(reporter.clone());

        Ok(Self {
            mode,
            cache: ResourceCache::new(64),
            rate_limiter,
            pipeline: BulkExportPipeline::new(executor.clone()),
            executor,
            reporter,
            cache_ttl: config.cache_ttl(),
            retry: config.retry_config(),
            export_concurrency: config.export_concurrency,
            phone_region: config.default_phone_region.clone(),
        })
    }

    pub fn is_demo(&self) -> bool {
        matches!(self.mode, Mode::Demo)
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    /// Lists campaigns, served from cache while fresh.
    ///
    /// # Arguments
    ///
    /// * `force_refresh` - Ignore a fresh cache entry and refetch.
    pub async fn list_campaigns(&self, force_refresh: bool) -> Result<Vec<Campaign>, AppError> {
        let transport = match &self.mode {
            Mode::Demo => return Ok(demo_campaigns()),
            Mode::Live(transport) => Arc::clone(transport),
        };

        let executor = self.executor.clone();
        let retry = self.retry.clone();
        self.cache
            .get_or_fetch(
                CAMPAIGNS_CACHE_KEY,
                move || async move {
                    executor
                        .execute("list campaigns", &retry, || transport.fetch_campaigns())
                        .await
                },
                self.cache_ttl,
                force_refresh,
            )
            .await
    }

    /// Drops the cached campaign list.
    pub async fn invalidate_campaigns(&self) {
        self.cache.invalidate(CAMPAIGNS_CACHE_KEY).await;
    }

    /// Returns the subset of `emails` already present in the campaign.
    pub async fn check_duplicates(
        &self,
        emails: &[String],
        campaign_id: &str,
    ) -> Result<Vec<String>, AppError> {
        check_campaign_id(campaign_id)?;
        match &self.mode {
            Mode::Demo => Ok(Vec::new()),
            Mode::Live(transport) => {
                if emails.is_empty() {
                    return Ok(Vec::new());
                }
                self.executor
                    .execute("duplicate check", &self.retry, || {
                        transport.find_existing(campaign_id, emails)
                    })
                    .await
                    .context("campaign_id", campaign_id)
            }
        }
    }

    /// Exports `items` into the campaign.
    ///
    /// Never returns an error: per-item failures are listed in the result,
    /// and a run that cannot start comes back with status `Failed`.
    pub async fn submit_batch(
        &self,
        items: Vec<ExportItem>,
        campaign_id: &str,
        on_progress: Option<ProgressCallback>,
    ) -> ExportResult {
        if let Err(err) = check_campaign_id(campaign_id) {
            self.reporter.report(&err);
            let mut result = ExportResult::new(items.len());
            result.status = ExportStatus::Failed;
            result.pipeline_error = Some(err);
            return result;
        }

        let region = self.phone_region.clone();
        let mut options = ExportOptions::default()
            .with_validator(Arc::new(move |item: &ExportItem| validate_item(item, &region)))
            .with_concurrency(self.export_concurrency)
            .with_retry(self.retry.clone())
            .with_lookup_retry(self.retry.clone());
        if let Some(progress) = on_progress {
            options = options.with_progress(progress);
        }

        match &self.mode {
            Mode::Demo => {
                tracing::info!("[demo] Simulating export of {} items", items.len());
                self.pipeline
                    .submit_batch(items, Arc::new(DemoSink), options)
                    .await
            }
            Mode::Live(transport) => {
                let sink = Arc::new(LiveSink {
                    transport: Arc::clone(transport),
                    campaign_id: campaign_id.to_string(),
                });
                self.pipeline.submit_batch(items, sink, options).await
            }
        }
    }

    /// Local quota snapshot; never touches the network.
    pub fn quota(&self) -> QuotaInfo {
        self.rate_limiter.quota()
    }
}
