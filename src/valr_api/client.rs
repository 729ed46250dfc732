//! REST fallback client - bootstrap and degraded-mode polling

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::{Error, Result, now_ms};
use crate::signer::RequestSigner;
use crate::valr_api::model::{
    BalanceEntry, BookSnapshot, CancelOrderRequest, OpenOrderItem, PairInfo,
    PlaceLimitOrderRequest, PlaceOrderResponse, ServerTime,
};

pub const REST_URL: &str = "https://api.valr.com";

const PAIRS_PATH: &str = "/v1/public/pairs";
const SERVER_TIME_PATH: &str = "/v1/public/time";
const PLACE_ORDER_PATH: &str = "/v1/orders/limit";
const CANCEL_ORDER_PATH: &str = "/v1/orders/order";
const OPEN_ORDERS_PATH: &str = "/v1/orders/open";
const BALANCES_PATH: &str = "/v1/account/balances";

const API_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 4;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// REST client for the VALR API. Every call is idempotent from the venue's
/// point of view and retried with bounded backoff on transient failures;
/// credential rejection is fatal and never retried.
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    signer: Arc<RequestSigner>,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, signer: Arc<RequestSigner>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(API_CALL_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url: base_url.into(),
            signer,
        }
    }

    // -----------------------------------------------------------------------
    // Public endpoints
    // -----------------------------------------------------------------------

    pub async fn server_time(&self) -> Result<ServerTime> {
        self.request(Method::GET, SERVER_TIME_PATH, None, false).await
    }

    pub async fn fetch_instruments(&self) -> Result<Vec<PairInfo>> {
        self.request(Method::GET, PAIRS_PATH, None, false).await
    }

    pub async fn fetch_order_book_snapshot(&self, venue_pair: &str) -> Result<BookSnapshot> {
        let path = format!("/v1/public/{}/orderbook", venue_pair);
        self.request(Method::GET, &path, None, false).await
    }

    // -----------------------------------------------------------------------
    // Private endpoints
    // -----------------------------------------------------------------------

    pub async fn fetch_open_orders(&self) -> Result<Vec<OpenOrderItem>> {
        self.request(Method::GET, OPEN_ORDERS_PATH, None, true).await
    }

    pub async fn fetch_balances(&self) -> Result<Vec<BalanceEntry>> {
        self.request(Method::GET, BALANCES_PATH, None, true).await
    }

    pub async fn place_limit_order(
        &self,
        req: &PlaceLimitOrderRequest,
    ) -> Result<PlaceOrderResponse> {
        let body = serde_json::to_string(req)?;
        self.request(Method::POST, PLACE_ORDER_PATH, Some(body), true).await
    }

    pub async fn cancel_order(&self, req: &CancelOrderRequest) -> Result<()> {
        let body = serde_json::to_string(req)?;
        // The venue answers 200/202 with an empty or informational body; the
        // acceptance is an acknowledgment only, tracked by the order tracker.
        let resp = self
            .send_with_retry(Method::DELETE, CANCEL_ORDER_PATH, Some(body), true)
            .await?;
        let _ = resp.text().await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Request plumbing
    // -----------------------------------------------------------------------

    fn auth_headers(&self, method: &Method, path: &str, body: &str) -> HeaderMap {
        let signed = self.signer.sign(now_ms(), method.as_str(), path, body);

        let mut headers = HeaderMap::new();
        headers.insert("X-VALR-API-KEY", HeaderValue::from_str(&signed.api_key).unwrap());
        headers.insert("X-VALR-SIGNATURE", HeaderValue::from_str(&signed.signature).unwrap());
        headers.insert(
            "X-VALR-TIMESTAMP",
            HeaderValue::from_str(&signed.timestamp.to_string()).unwrap(),
        );
        headers
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
        auth: bool,
    ) -> Result<T> {
        let resp = self.send_with_retry(method, path, body, auth).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn send_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
        auth: bool,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let mut builder = self.client.request(method.clone(), &url);
            if auth {
                let body_str = body.as_deref().unwrap_or("");
                builder = builder.headers(self.auth_headers(&method, path, body_str));
            }
            if let Some(ref b) = body {
                builder = builder
                    .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                    .body(b.clone());
            }

            let outcome = match builder.send().await {
                Ok(resp) => self.classify(resp).await,
                Err(e) => Err(Error::Transport(e.to_string())),
            };

            match outcome {
                Ok(resp) => return Ok(resp),
                Err(e @ (Error::RateLimit { .. } | Error::Transport(_))) if attempt < MAX_RETRIES => {
                    let delay = match &e {
                        Error::RateLimit {
                            retry_after_ms: Some(hint),
                        } => *hint,
                        _ => RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1),
                    };
                    warn!(
                        "{} {} failed ({}), retry {}/{} in {}ms",
                        method, path, e, attempt, MAX_RETRIES, delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Map an HTTP response onto the error taxonomy.
    async fn classify(&self, resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("{}: {}", status, text)));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Err(Error::RateLimit { retry_after_ms });
        }

        if status.is_server_error() {
            return Err(Error::Transport(format!("server error {}", status)));
        }

        let text = resp.text().await.unwrap_or_default();
        debug!("API error {}: {}", status, text);
        Err(Error::Exchange(format!("status {}: {}", status, text)))
    }
}
