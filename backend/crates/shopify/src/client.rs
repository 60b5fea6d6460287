use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::budget::{BackoffPolicy, RateBudget};
use crate::error::ShopifyClientError;
use crate::models::GraphqlResponse;
use shopsync_config::parse_var_or;

#[derive(Debug, Clone)]
pub struct ShopifyClientConfig {
    /// Scheme and host of the shop, e.g. `https://demo.myshopify.com`.
    pub base_url: String,
    pub access_token: String,
    pub api_version: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// First retry waits `2 * retry_base_ms`, doubling up to 30s.
    pub retry_base_ms: u64,
    pub low_water_mark: f64,
    pub min_delay_ms: u64,
    pub unknown_budget_delay_ms: u64,
    pub bulk_poll_interval_secs: u64,
}

impl ShopifyClientConfig {
    /// Load Shopify config from environment.
    ///
    /// Returns `Ok(None)` if the shop domain or access token is missing.
    /// Returns `Err` if a tuning variable is set to something unparsable.
    pub fn from_env() -> Result<Option<Self>, String> {
        let shop_domain = match std::env::var("SHOPIFY_SHOP_DOMAIN").ok() {
            Some(v) if !v.trim().is_empty() => v,
            _ => return Ok(None),
        };
        let access_token = match std::env::var("SHOPIFY_ACCESS_TOKEN").ok() {
            Some(v) if !v.trim().is_empty() => v,
            _ => return Ok(None),
        };

        let base_url = if shop_domain.starts_with("http://") || shop_domain.starts_with("https://")
        {
            shop_domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", shop_domain.trim_end_matches('/'))
        };

        let num = |key: &str, default: u64| parse_var_or(key, default).map_err(|e| e.to_string());

        Ok(Some(Self {
            base_url,
            access_token,
            api_version: std::env::var("SHOPIFY_API_VERSION")
                .unwrap_or_else(|_| "2024-10".to_string()),
            max_retries: parse_var_or("SHOPIFY_MAX_RETRIES", 3u32).map_err(|e| e.to_string())?,
            timeout_secs: num("SHOPIFY_TIMEOUT_SECS", 30)?,
            retry_base_ms: num("SHOPIFY_RETRY_BASE_MS", 1000)?,
            low_water_mark: parse_var_or("SHOPIFY_LOW_WATER_MARK", 100.0f64)
                .map_err(|e| e.to_string())?,
            min_delay_ms: num("SHOPIFY_MIN_DELAY_MS", 500)?,
            unknown_budget_delay_ms: num("SHOPIFY_UNKNOWN_BUDGET_DELAY_MS", 1000)?,
            bulk_poll_interval_secs: num("SHOPIFY_BULK_POLL_INTERVAL_SECS", 5)?,
        }))
    }

    pub fn endpoint(&self) -> String {
        format!("{}/admin/api/{}/graphql.json", self.base_url, self.api_version)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            low_water_mark: self.low_water_mark,
            min_delay: Duration::from_millis(self.min_delay_ms),
            unknown_budget_delay: Duration::from_millis(self.unknown_budget_delay_ms),
        }
    }
}

/// Admin API client. Constructed once and shared (cheap to clone); calls
/// are serialized through the rate budget so pacing holds across callers.
#[derive(Clone)]
pub struct ShopifyClient {
    client: Client,
    config: ShopifyClientConfig,
    policy: BackoffPolicy,
    budget: Arc<Mutex<RateBudget>>,
}

impl ShopifyClient {
    pub fn new(config: ShopifyClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let policy = config.backoff_policy();
        Ok(Self {
            client,
            config,
            policy,
            budget: Arc::new(Mutex::new(RateBudget::default())),
        })
    }

    pub fn config(&self) -> &ShopifyClientConfig {
        &self.config
    }

    /// Snapshot of the current rate budget.
    pub async fn budget(&self) -> RateBudget {
        self.budget.lock().await.clone()
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Run a query or mutation, pacing and retrying as needed.
    ///
    /// Transient failures (timeouts, connect errors, 429, 5xx, THROTTLED) are
    /// retried with exponential backoff. Returns the response as soon as it
    /// has data; GraphQL errors without data are a validation failure.
    pub async fn execute(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<GraphqlResponse, ShopifyClientError> {
        let mut budget = self.budget.lock().await;
        let body = serde_json::json!({ "query": query, "variables": variables });
        let url = self.config.endpoint();
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_ms = std::cmp::min(
                    self.config.retry_base_ms.saturating_mul(1u64 << attempt.min(16)),
                    30_000,
                );
                tracing::warn!(attempt, backoff_ms, error = %last_error, "retrying shopify call");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            budget.wait_turn().await;

            let response = match self
                .client
                .post(&url)
                .header("X-Shopify-Access-Token", &self.config.access_token)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(ShopifyClientError::RequestError(e));
                }
            };

            let status = response.status();

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                let body = response.text().await.unwrap_or_default();
                return Err(ShopifyClientError::Authentication { status, body });
            }

            // Honor Retry-After header for 429
            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<f64>().ok())
                {
                    let wait = retry_after.clamp(0.0, 60.0);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ShopifyClientError::HttpError { status, body });
            }

            let parsed: GraphqlResponse = match response.json().await {
                Ok(parsed) => parsed,
                Err(e) if e.is_timeout() => {
                    last_error = e.to_string();
                    continue;
                }
                Err(e) => return Err(ShopifyClientError::Decode(e.to_string())),
            };

            let delay = budget
                .observe(parsed.throttle_status(), &self.policy)
                .map_err(ShopifyClientError::RateLimitExceeded)?;
            if !delay.is_zero() {
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    available = ?budget.currently_available,
                    restore_rate = ?budget.restore_rate,
                    "shopify budget low, delaying next call"
                );
            }

            if parsed.is_throttled() {
                last_error = "THROTTLED".to_string();
                continue;
            }

            if parsed.data.is_none() && !parsed.errors.is_empty() {
                return Err(ShopifyClientError::Validation(parsed.error_messages()));
            }

            return Ok(parsed);
        }

        Err(ShopifyClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}
