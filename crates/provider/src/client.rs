use async_trait::async_trait;
use billing_mirror_types::{ExternalSnapshot, SubscriptionStatus};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{ProviderCredential, ProviderError};

/// Read access to subscriptions held by the billing provider
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn fetch_subscription(
        &self,
        credential: &ProviderCredential,
        external_id: &str,
    ) -> Result<ExternalSnapshot, ProviderError>;
}

/// REST client for a Stripe-compatible subscriptions API
pub struct HttpBillingProvider {
    base_url: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpBillingProvider {
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self, ProviderError> {
        let base_url = Url::parse(base_url.as_ref()).map_err(|e| {
            ProviderError::Unavailable(format!("invalid base URL {}: {}", base_url.as_ref(), e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ProviderError::Unavailable(format!(
                "base URL {base_url} cannot carry a path"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        Ok(Self {
            base_url,
            client,
            timeout,
        })
    }

    /// Create client for the public Stripe API
    pub fn stripe(timeout: Duration) -> Result<Self, ProviderError> {
        Self::new("https://api.stripe.com", timeout)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// `{base}/v1/subscriptions/{external_id}`, the identifier encoded as one path segment
    pub fn subscription_url(&self, external_id: &str) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ProviderError::Unavailable(format!("base URL {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(["v1", "subscriptions", external_id]);
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
    id: String,
    status: String,
    current_period_start: i64,
    current_period_end: i64,
    trial_start: Option<i64>,
    trial_end: Option<i64>,
    #[serde(default)]
    cancel_at_period_end: bool,
    canceled_at: Option<i64>,
}

#[async_trait]
impl BillingProvider for HttpBillingProvider {
    async fn fetch_subscription(
        &self,
        credential: &ProviderCredential,
        external_id: &str,
    ) -> Result<ExternalSnapshot, ProviderError> {
        let url = self.subscription_url(external_id)?;

        debug!(url = %url, "fetching subscription from billing provider");

        let response = self
            .client
            .get(url)
            .bearer_auth(credential.secret())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        millis: self.timeout.as_millis() as u64,
                    }
                } else {
                    ProviderError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(external_id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, external_subscription_id = external_id, "billing provider error response");
            return Err(ProviderError::Unavailable(format!("HTTP {}: {}", status, body)));
        }

        let subscription: SubscriptionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse response: {}", e)))?;

        subscription.into_snapshot()
    }
}

impl SubscriptionResponse {
    fn into_snapshot(self) -> Result<ExternalSnapshot, ProviderError> {
        let status = map_status(&self.status)?;
        let mut snapshot = ExternalSnapshot::new(
            self.id,
            status,
            unix_to_date(self.current_period_start)?,
            unix_to_date(self.current_period_end)?,
        );

        if let (Some(start), Some(end)) = (self.trial_start, self.trial_end) {
            snapshot = snapshot.with_trial(unix_to_date(start)?, unix_to_date(end)?);
        }

        let cancelled_at = self.canceled_at.map(unix_to_timestamp).transpose()?;
        Ok(snapshot.with_cancellation(self.cancel_at_period_end, cancelled_at))
    }
}

/// Map a provider status string onto the local lifecycle
pub fn map_status(status: &str) -> Result<SubscriptionStatus, ProviderError> {
    match status {
        "active" => Ok(SubscriptionStatus::Active),
        "trialing" => Ok(SubscriptionStatus::Trial),
        "past_due" => Ok(SubscriptionStatus::PastDue),
        "canceled" => Ok(SubscriptionStatus::Cancelled),
        "unpaid" | "paused" => Ok(SubscriptionStatus::Suspended),
        "incomplete_expired" => Ok(SubscriptionStatus::Expired),
        other => Err(ProviderError::InvalidResponse(format!(
            "unknown subscription status: {other}"
        ))),
    }
}

fn unix_to_timestamp(secs: i64) -> Result<DateTime<Utc>, ProviderError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ProviderError::InvalidResponse(format!("timestamp out of range: {secs}")))
}

/// Calendar date (UTC) of a unix timestamp in seconds
pub fn unix_to_date(secs: i64) -> Result<NaiveDate, ProviderError> {
    unix_to_timestamp(secs).map(|at| at.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    // 2024-06-01T00:00:00Z and 2024-07-01T00:00:00Z
    const JUNE_1: i64 = 1_717_200_000;
    const JULY_1: i64 = 1_719_792_000;

    async fn subscription_handler(
        Path(id): Path<String>,
        headers: HeaderMap,
    ) -> Result<Json<Value>, StatusCode> {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer sk_test");
        if !authorized {
            return Err(StatusCode::UNAUTHORIZED);
        }
        match id.as_str() {
            "sub_active" => Ok(Json(json!({
                "id": "sub_active",
                "status": "active",
                "current_period_start": JUNE_1,
                "current_period_end": JULY_1,
                "cancel_at_period_end": false,
                "canceled_at": null
            }))),
            "sub_canceled" => Ok(Json(json!({
                "id": "sub_canceled",
                "status": "canceled",
                "current_period_start": JUNE_1,
                "current_period_end": JULY_1,
                "trial_start": JUNE_1,
                "trial_end": JUNE_1,
                "cancel_at_period_end": true,
                "canceled_at": JUNE_1
            }))),
            "sub_weird" => Ok(Json(json!({
                "id": "sub_weird",
                "status": "mystery",
                "current_period_start": JUNE_1,
                "current_period_end": JULY_1
            }))),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn serve() -> String {
        let router = Router::new().route("/v1/subscriptions/:id", get(subscription_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("trialing").unwrap(), SubscriptionStatus::Trial);
        assert_eq!(map_status("unpaid").unwrap(), SubscriptionStatus::Suspended);
        assert_eq!(map_status("incomplete_expired").unwrap(), SubscriptionStatus::Expired);
        assert!(map_status("ACTIVE").is_err());
    }

    #[test]
    fn test_unix_seconds_to_utc_date() {
        assert_eq!(unix_to_date(JUNE_1).unwrap(), date(6, 1));
        assert_eq!(unix_to_date(JULY_1 - 1).unwrap(), date(6, 30));
    }

    #[test]
    fn test_subscription_url_encodes_identifier() {
        let provider =
            HttpBillingProvider::new("https://billing.example.com/stripe/", Duration::from_secs(5))
                .unwrap();

        assert_eq!(
            provider.subscription_url("sub_1").unwrap().as_str(),
            "https://billing.example.com/stripe/v1/subscriptions/sub_1"
        );
        assert_eq!(
            provider.subscription_url("sub/../x y?z").unwrap().as_str(),
            "https://billing.example.com/stripe/v1/subscriptions/sub%2F..%2Fx%20y%3Fz"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(HttpBillingProvider::new("not a url", Duration::from_secs(5)).is_err());
        assert!(HttpBillingProvider::new("mailto:billing@example.com", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_fetch_active_subscription() {
        let provider = HttpBillingProvider::new(serve().await, Duration::from_secs(5)).unwrap();
        let snapshot = provider
            .fetch_subscription(&ProviderCredential::new("sk_test"), "sub_active")
            .await
            .unwrap();

        assert_eq!(snapshot.status, SubscriptionStatus::Active);
        assert_eq!(snapshot.current_period_start, date(6, 1));
        assert_eq!(snapshot.current_period_end, date(7, 1));
        assert!(snapshot.cancelled_at.is_none());
    }

    #[tokio::test]
    async fn test_fetch_cancelled_subscription() {
        let provider = HttpBillingProvider::new(serve().await, Duration::from_secs(5)).unwrap();
        let snapshot = provider
            .fetch_subscription(&ProviderCredential::new("sk_test"), "sub_canceled")
            .await
            .unwrap();

        assert!(snapshot.cancel_at_period_end);
        assert_eq!(snapshot.trial_end, Some(date(6, 1)));
        assert!(snapshot.confirms_termination());
    }

    #[tokio::test]
    async fn test_error_responses() {
        let provider = HttpBillingProvider::new(serve().await, Duration::from_secs(5)).unwrap();
        let good = ProviderCredential::new("sk_test");

        let missing = provider.fetch_subscription(&good, "sub_gone").await;
        assert!(matches!(missing, Err(ProviderError::NotFound(_))));

        let unknown = provider.fetch_subscription(&good, "sub_weird").await;
        assert!(matches!(unknown, Err(ProviderError::InvalidResponse(_))));

        let denied = provider
            .fetch_subscription(&ProviderCredential::new("sk_wrong"), "sub_active")
            .await;
        assert!(matches!(denied, Err(ProviderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        let provider =
            HttpBillingProvider::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let result = provider
            .fetch_subscription(&ProviderCredential::new("sk_test"), "sub_active")
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::Unavailable(_)) | Err(ProviderError::Timeout { .. })
        ));
    }
}
