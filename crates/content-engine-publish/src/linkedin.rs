//! LinkedIn publisher using the UGC Posts API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use content_engine_queue::{Credentials, Platform, PublishError, Publisher};

/// Default API host.
pub const DEFAULT_API_BASE: &str = "https://api.linkedin.com";

/// Longest share commentary LinkedIn accepts, in characters.
pub const MAX_CONTENT_CHARS: usize = 3000;

/// Response header carrying the id of the created post.
const RESTLI_ID_HEADER: &str = "x-restli-id";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UgcPost<'a> {
    author: String,
    lifecycle_state: &'static str,
    specific_content: SpecificContent<'a>,
    visibility: Visibility,
}

#[derive(Debug, Serialize)]
struct SpecificContent<'a> {
    #[serde(rename = "com.linkedin.ugc.ShareContent")]
    share_content: ShareContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShareContent<'a> {
    share_commentary: ShareCommentary<'a>,
    share_media_category: &'static str,
}

#[derive(Debug, Serialize)]
struct ShareCommentary<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Visibility {
    #[serde(rename = "com.linkedin.ugc.MemberNetworkVisibility")]
    member_network: &'static str,
}

impl<'a> UgcPost<'a> {
    /// A public text-only share authored by `user_sub`.
    fn text_share(content: &'a str, user_sub: &str) -> Self {
        Self {
            author: format!("urn:li:person:{}", user_sub),
            lifecycle_state: "PUBLISHED",
            specific_content: SpecificContent {
                share_content: ShareContent {
                    share_commentary: ShareCommentary { text: content },
                    share_media_category: "NONE",
                },
            },
            visibility: Visibility {
                member_network: "PUBLIC",
            },
        }
    }
}

/// Publishes text shares to a LinkedIn member's feed.
pub struct LinkedInPublisher {
    http: Client,
    api_base: String,
}

impl LinkedInPublisher {
    /// Create a publisher talking to `api_base` (normally [`DEFAULT_API_BASE`]).
    pub fn new(api_base: impl Into<String>) -> Result<Self, PublishError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PublishError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Publisher for LinkedInPublisher {
    fn platform(&self) -> Platform {
        Platform::LinkedIn
    }

    async fn publish(
        &self,
        content: &str,
        credentials: &Credentials,
    ) -> Result<String, PublishError> {
        let length = content.chars().count();
        if length > MAX_CONTENT_CHARS {
            return Err(PublishError::ContentTooLong {
                length,
                limit: MAX_CONTENT_CHARS,
            });
        }

        let user_sub = credentials
            .user_sub
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(PublishError::MissingCredentials(Platform::LinkedIn))?;

        let url = format!("{}/v2/ugcPosts", self.api_base);
        debug!(%url, length, "posting share to LinkedIn");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&credentials.access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&UgcPost::text_share(content, user_sub))
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                PublishError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;
            return Err(PublishError::Api {
                platform: Platform::LinkedIn,
                status: status.as_u16(),
                message: text,
            });
        }

        let external_id = response
            .headers()
            .get(RESTLI_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        info!(%external_id, "published LinkedIn share");
        Ok(external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Credentials {
        Credentials {
            platform: Platform::LinkedIn,
            access_token: "test-access-token".to_string(),
            refresh_token: None,
            expires_at: None,
            user_sub: Some("abc123".to_string()),
            user_email: None,
        }
    }

    #[test]
    fn test_payload_shape() {
        let payload = serde_json::to_value(UgcPost::text_share("Hello", "abc123")).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "author": "urn:li:person:abc123",
                "lifecycleState": "PUBLISHED",
                "specificContent": {
                    "com.linkedin.ugc.ShareContent": {
                        "shareCommentary": {"text": "Hello"},
                        "shareMediaCategory": "NONE"
                    }
                },
                "visibility": {
                    "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
                }
            })
        );
    }

    #[tokio::test]
    async fn test_publish_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/ugcPosts"))
            .and(header("Authorization", "Bearer test-access-token"))
            .and(header("X-Restli-Protocol-Version", "2.0.0"))
            .and(body_json(serde_json::to_value(UgcPost::text_share("Hello", "abc123")).unwrap()))
            .respond_with(
                ResponseTemplate::new(201).insert_header("X-RestLi-Id", "urn:li:share:7000"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let publisher = LinkedInPublisher::new(mock_server.uri()).unwrap();
        let id = publisher.publish("Hello", &credentials()).await.unwrap();
        assert_eq!(id, "urn:li:share:7000");
    }

    #[tokio::test]
    async fn test_publish_without_id_header() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/ugcPosts"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&mock_server)
            .await;

        let publisher = LinkedInPublisher::new(format!("{}/", mock_server.uri())).unwrap();
        let id = publisher.publish("Hello", &credentials()).await.unwrap();
        assert_eq!(id, "unknown");
    }

    #[tokio::test]
    async fn test_publish_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/ugcPosts"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .mount(&mock_server)
            .await;

        let publisher = LinkedInPublisher::new(mock_server.uri()).unwrap();
        let err = publisher.publish("Hello", &credentials()).await.unwrap_err();

        match &err {
            PublishError::Api {
                status, message, ..
            } => {
                assert_eq!(*status, 401);
                assert_eq!(message, "token expired");
            }
            other => panic!("expected API error, got {:?}", other),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_content_too_long_never_hits_the_network() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&mock_server)
            .await;

        let publisher = LinkedInPublisher::new(mock_server.uri()).unwrap();
        let content = "x".repeat(MAX_CONTENT_CHARS + 1);
        let err = publisher.publish(&content, &credentials()).await.unwrap_err();

        assert!(matches!(
            err,
            PublishError::ContentTooLong {
                length: 3001,
                limit: 3000
            }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_member_id() {
        let publisher = LinkedInPublisher::new("http://127.0.0.1:9").unwrap();
        let mut creds = credentials();
        creds.user_sub = None;

        let err = publisher.publish("Hello", &creds).await.unwrap_err();
        assert!(matches!(
            err,
            PublishError::MissingCredentials(Platform::LinkedIn)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Port 9 (discard) is closed on test hosts
        let publisher = LinkedInPublisher::new("http://127.0.0.1:9").unwrap();
        let err = publisher.publish("Hello", &credentials()).await.unwrap_err();
        assert!(matches!(err, PublishError::Network(_)));
    }
}
