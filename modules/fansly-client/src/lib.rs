pub mod error;
pub mod ratelimit;
pub mod types;

pub use error::{FanslyError, Result};
pub use ratelimit::{AdaptiveRateLimiter, GlobalRateLimiter, PersistedEndpoint, RateLimitStore};
pub use types::{
    AggregationData, FanslyAccount, FanslyTag, MediaOfferSuggestion, SuggestionsData, TagDetails,
    TimelineStats,
};

use std::sync::Arc;
use std::time::Duration;

use reqwest::header;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

use ratelimit::sleep_or_cancel;
use types::{Envelope, TagResponseData};

const BASE_URL: &str = "https://apiv3.fansly.com/api/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const RATE_LIMITED_BACKOFF: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "ftoolbox-ingest/0.1 (contact: ops@ftoolbox.dev)";

fn retryable(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Typed client for the content-discovery API. Every request passes through
/// the adaptive rate limiter on the way out and feeds its response back in.
pub struct FanslyClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<AdaptiveRateLimiter>,
    auth_token: Option<String>,
}

impl FanslyClient {
    pub fn new(limiter: Arc<AdaptiveRateLimiter>, auth_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
            limiter,
            auth_token,
        }
    }

    pub fn limiter(&self) -> &Arc<AdaptiveRateLimiter> {
        &self.limiter
    }

    /// Fetch a single tag by label. `TagNotFound` when the upstream reports
    /// `success=false` or omits the suggestion block; never retried.
    pub async fn get_tag(&self, cancel: &CancellationToken, tag_name: &str) -> Result<TagDetails> {
        let body = self
            .do_get(
                cancel,
                "/contentdiscovery/media/tag",
                &[("tag", tag_name.to_string())],
            )
            .await?;
        parse_tag_response(&body)
    }

    /// Fetch media suggestions for a set of tag ids with pagination cursors.
    pub async fn get_suggestions(
        &self,
        cancel: &CancellationToken,
        tag_ids: &[String],
        before: &str,
        after: &str,
        limit: u32,
        offset: u32,
    ) -> Result<SuggestionsData> {
        let body = self
            .do_get(
                cancel,
                "/contentdiscovery/media/suggestionsnew",
                &[
                    ("before", before.to_string()),
                    ("after", after.to_string()),
                    ("tagIds", tag_ids.join(",")),
                    ("limit", limit.to_string()),
                    ("offset", offset.to_string()),
                ],
            )
            .await?;
        parse_suggestions_response(&body)
    }

    /// Fetch multiple accounts by id in one request.
    pub async fn get_accounts(
        &self,
        cancel: &CancellationToken,
        account_ids: &[String],
    ) -> Result<Vec<FanslyAccount>> {
        if account_ids.is_empty() {
            return Ok(Vec::new());
        }

        let body = self
            .do_get(cancel, "/account", &[("ids", account_ids.join(","))])
            .await?;
        parse_accounts_response(&body)
    }

    /// Fetch a single account by username.
    pub async fn get_account_by_username(
        &self,
        cancel: &CancellationToken,
        username: &str,
    ) -> Result<FanslyAccount> {
        let body = self
            .do_get(cancel, "/account", &[("usernames", username.to_string())])
            .await?;
        let accounts = parse_accounts_response(&body)?;
        accounts.into_iter().next().ok_or(FanslyError::AccountNotFound)
    }

    /// One rate-limited GET with retries. Transient failures (network errors,
    /// 429/500/502/503/504) are retried up to three times with exponential
    /// backoff from one second; a 429 pushes the next pause to thirty seconds.
    async fn do_get(
        &self,
        cancel: &CancellationToken,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<String> {
        let endpoint = format!("GET {path}");

        let mut pairs: Vec<(&str, String)> = params.to_vec();
        pairs.push(("ngsw-bypass", "true".to_string()));
        let url = Url::parse_with_params(&format!("{}{}", self.base_url, path), &pairs)
            .map_err(|e| FanslyError::Parse(e.to_string()))?;

        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = FanslyError::Network("no response received".to_string());

        for attempt in 0..=MAX_RETRIES {
            self.limiter.wait_if_needed(cancel, &endpoint).await?;

            let mut request = self
                .http
                .get(url.clone())
                .timeout(REQUEST_TIMEOUT)
                .header(header::USER_AGENT, USER_AGENT);
            if let Some(token) = &self.auth_token {
                request = request.header(header::AUTHORIZATION, token);
            }

            let response = tokio::select! {
                response = request.send() => response,
                _ = cancel.cancelled() => return Err(FanslyError::Cancelled),
            };

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, attempt = attempt + 1, error = %e, "Request failed");
                    last_err = FanslyError::Network(e.to_string());
                    if attempt < MAX_RETRIES {
                        sleep_or_cancel(backoff, cancel).await?;
                        backoff *= 2;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status().as_u16();
            self.limiter
                .handle_response(&endpoint, status, response.headers())
                .await;

            if retryable(status) && attempt < MAX_RETRIES {
                let message = response.text().await.unwrap_or_default();
                warn!(url = %url, status, attempt = attempt + 1, "Retryable HTTP error");
                last_err = FanslyError::Api { status, message };

                if status == 429 {
                    backoff = backoff.max(RATE_LIMITED_BACKOFF);
                }
                sleep_or_cancel(backoff, cancel).await?;
                backoff *= 2;
                continue;
            }

            let body = response
                .text()
                .await
                .map_err(|e| FanslyError::Network(e.to_string()))?;

            if !(200..300).contains(&status) {
                return Err(FanslyError::Api {
                    status,
                    message: body,
                });
            }
            return Ok(body);
        }

        Err(last_err)
    }
}

fn parse_tag_response(body: &str) -> Result<TagDetails> {
    let envelope: Envelope<TagResponseData> =
        serde_json::from_str(body).map_err(|e| FanslyError::Parse(e.to_string()))?;

    if !envelope.success {
        return Err(FanslyError::TagNotFound);
    }
    match envelope.response {
        Some(TagResponseData {
            media_offer_suggestion_tag: Some(tag),
            aggregation_data,
        }) => Ok(TagDetails {
            tag,
            aggregation_data,
        }),
        _ => Err(FanslyError::TagNotFound),
    }
}

fn parse_suggestions_response(body: &str) -> Result<SuggestionsData> {
    let envelope: Envelope<SuggestionsData> =
        serde_json::from_str(body).map_err(|e| FanslyError::Parse(e.to_string()))?;
    Ok(envelope.response.unwrap_or_default())
}

fn parse_accounts_response(body: &str) -> Result<Vec<FanslyAccount>> {
    let envelope: Envelope<Vec<FanslyAccount>> =
        serde_json::from_str(body).map_err(|e| FanslyError::Parse(e.to_string()))?;

    if !envelope.success {
        return Err(FanslyError::Api {
            status: 200,
            message: "upstream reported success=false".to_string(),
        });
    }
    Ok(envelope.response.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_response_with_success_false_is_not_found() {
        let err = parse_tag_response(r#"{"success":false,"response":null}"#).unwrap_err();
        assert!(matches!(err, FanslyError::TagNotFound));
    }

    #[test]
    fn tag_response_missing_suggestion_block_is_not_found() {
        let err = parse_tag_response(r#"{"success":true,"response":{"aggregationData":{}}}"#)
            .unwrap_err();
        assert!(matches!(err, FanslyError::TagNotFound));
    }

    #[test]
    fn tag_response_decodes_counts_and_timestamp() {
        let details = parse_tag_response(
            r#"{
                "success": true,
                "response": {
                    "mediaOfferSuggestionTag": {
                        "id": "T1",
                        "tag": "blonde",
                        "viewCount": 1200,
                        "postCount": 60,
                        "createdAt": 1700000000000
                    },
                    "aggregationData": {"posts": []}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(details.tag.id, "T1");
        assert_eq!(details.tag.view_count, 1200);
        assert_eq!(details.tag.post_count, 60);
        assert_eq!(details.tag.created_at_utc().timestamp(), 1_700_000_000);
        assert!(details.aggregation_data.is_some());
    }

    #[test]
    fn suggestions_response_without_payload_is_empty() {
        let data = parse_suggestions_response(r#"{"success":true}"#).unwrap();
        assert!(data.media_offer_suggestions.is_empty());
        assert!(data.aggregation_data.is_none());
    }

    #[test]
    fn suggestions_response_flattens_accounts_block() {
        let data = parse_suggestions_response(
            r#"{
                "success": true,
                "response": {
                    "mediaOfferSuggestions": [
                        {"id": "s1", "postTags": [{"id": "t1", "tag": "A"}, {"id": "t2", "tag": "B"}]}
                    ],
                    "aggregationData": {
                        "accounts": [{"id": "c1", "username": "alice", "followCount": 5}],
                        "tips": [{"ignored": true}]
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(data.media_offer_suggestions[0].post_tags.len(), 2);
        let aggregation = data.aggregation_data.unwrap();
        assert_eq!(aggregation.accounts.len(), 1);
        assert_eq!(aggregation.accounts[0].username, "alice");
    }

    #[test]
    fn accounts_response_success_false_is_an_api_error() {
        let err = parse_accounts_response(r#"{"success":false,"response":[]}"#).unwrap_err();
        assert!(matches!(err, FanslyError::Api { .. }));
    }

    #[test]
    fn transient_statuses_are_classified() {
        for status in [429u16, 500, 502, 503, 504] {
            assert!(FanslyError::Api {
                status,
                message: String::new()
            }
            .is_transient());
        }
        assert!(!FanslyError::TagNotFound.is_transient());
        assert!(!FanslyError::Cancelled.is_transient());
    }
}
