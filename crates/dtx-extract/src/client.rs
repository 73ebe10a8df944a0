//! HTTP client for an OpenAI-compatible chat-completions endpoint
//!
//! Sends the processed image as a base64 data URL together with the
//! category's JSON Schema as a strict `response_format`, and returns the
//! message content, which must be a bare JSON document. Status mapping:
//! - 429 → [`ServiceError::RateLimited`] (honours `Retry-After` seconds)
//! - 5xx → [`ServiceError::Unavailable`] (same `Retry-After` handling)
//! - other non-success → [`ServiceError::Rejected`]

use crate::error::ServiceError;
use crate::schema::strict_schema;
use crate::service::{AnalysisRequest, AnalysisService};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dtx_core::ExtractionConfig;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a design system analyst. You extract design tokens from \
    interface screenshots and answer only with JSON matching the provided schema.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Chat-completions analysis client
#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    http: Client,
    config: ExtractionConfig,
    api_key: Option<String>,
}

impl HttpAnalysisClient {
    /// Create client; the API key is read from `config.api_key_env`
    ///
    /// # Errors
    /// Returns [`ServiceError::Misconfigured`] if the HTTP client cannot be built.
    pub fn new(config: ExtractionConfig) -> Result<Self, ServiceError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    /// Create client with an explicit key
    ///
    /// # Errors
    /// Returns [`ServiceError::Misconfigured`] if the HTTP client cannot be built.
    pub fn with_api_key(config: ExtractionConfig, api_key: Option<String>) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .user_agent(concat!("dtx/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()
            .map_err(|e| ServiceError::Misconfigured(e.to_string()))?;
        Ok(Self { http, config, api_key })
    }

    fn request_body(&self, request: &AnalysisRequest) -> Value {
        let data_url = format!(
            "data:{};base64,{}",
            request.image.format.mime(),
            STANDARD.encode(request.image.bytes())
        );
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": request.instructions },
                        { "type": "image_url", "image_url": { "url": data_url, "detail": "high" } }
                    ]
                }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": format!("{}_tokens", request.category),
                    "schema": strict_schema(&request.schema),
                    "strict": true
                }
            }
        })
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn map_transport(err: &reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout
    } else {
        ServiceError::Transport(err.to_string())
    }
}

fn parse_content(body: &str) -> Result<Value, ServiceError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| ServiceError::InvalidResponse("no choices in response".into()))?;
    if let Some(refusal) = message.refusal {
        return Err(ServiceError::InvalidResponse(format!("model refused: {refusal}")));
    }
    let content = message
        .content
        .ok_or_else(|| ServiceError::InvalidResponse("empty message content".into()))?;
    serde_json::from_str(&content)
        .map_err(|e| ServiceError::InvalidResponse(format!("content is not JSON: {e}")))
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn analyze(&self, request: AnalysisRequest) -> Result<Value, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::Misconfigured(format!("{} is not set", self.config.api_key_env)))?;

        tracing::debug!(
            category = %request.category,
            image_id = %request.image.id,
            model = %self.config.model,
            "calling analysis service"
        );
        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| map_transport(&e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::RateLimited {
                retry_after: retry_after(response.headers()),
            });
        }
        if status.is_server_error() {
            return Err(ServiceError::Unavailable {
                status: status.as_u16(),
                retry_after: retry_after(response.headers()),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let body = response.text().await.map_err(|e| map_transport(&e))?;
        parse_content(&body)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        if self.api_key.is_none() {
            return Err(ServiceError::Misconfigured(format!(
                "{} is not set",
                self.config.api_key_env
            )));
        }
        url::Url::parse(&self.config.endpoint)
            .map_err(|e| ServiceError::Misconfigured(format!("endpoint: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dtx_core::{Fingerprint, ImageFormat, ImageId, ProcessedImage, TokenCategory};
    use std::sync::Arc;
    use warp::http::Response;
    use warp::Filter;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            image: ProcessedImage {
                id: ImageId::new(),
                source_url: "https://example.com/a.png".into(),
                fingerprint: Fingerprint::of_source("https://example.com/a.png"),
                width: 1,
                height: 1,
                format: ImageFormat::Png,
                byte_size: 4,
                created_at: Utc::now(),
                data: Arc::from(b"\x89PNG".to_vec()),
            },
            category: TokenCategory::Color,
            schema: json!({"type": "object", "properties": {"colors": {"type": "array"}}}),
            instructions: "find colors".into(),
        }
    }

    fn client(addr: std::net::SocketAddr) -> HttpAnalysisClient {
        let config = ExtractionConfig::default().with_endpoint(format!("http://{addr}/v1/chat/completions"));
        HttpAnalysisClient::with_api_key(config, Some("test-key".into())).unwrap()
    }

    macro_rules! serve {
        ($route:expr) => {{
            let (addr, server) = warp::serve($route).bind_ephemeral(([127, 0, 0, 1], 0));
            tokio::spawn(server);
            addr
        }};
    }

    #[tokio::test]
    async fn sends_image_and_schema_and_parses_content() {
        let route = warp::path!("v1" / "chat" / "completions")
            .and(warp::header::<String>("authorization"))
            .and(warp::body::json())
            .map(|auth: String, body: Value| {
                assert_eq!(auth, "Bearer test-key");
                let url = body["messages"][1]["content"][1]["image_url"]["url"].as_str().unwrap();
                assert!(url.starts_with("data:image/png;base64,"));
                let format = &body["response_format"]["json_schema"];
                assert_eq!(format["name"], "color_tokens");
                assert_eq!(format["strict"], true);
                assert_eq!(format["schema"]["additionalProperties"], false);
                warp::reply::json(&json!({
                    "choices": [{"message": {"content": "{\"colors\": []}"}}]
                }))
            });
        let addr = serve!(route);

        let value = client(addr).analyze(request()).await.unwrap();
        assert_eq!(value, json!({"colors": []}));
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let route = warp::any().map(|| {
            Response::builder()
                .status(429)
                .header("retry-after", "7")
                .body(String::new())
                .unwrap()
        });
        let addr = serve!(route);

        let err = client(addr).analyze(request()).await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[tokio::test]
    async fn status_codes_map_to_kinds() {
        let route = warp::any().map(|| Response::builder().status(502).body(String::new()).unwrap());
        let addr = serve!(route);
        assert!(matches!(
            client(addr).analyze(request()).await,
            Err(ServiceError::Unavailable { status: 502, .. })
        ));

        let route = warp::any().map(|| Response::builder().status(400).body("bad image".to_string()).unwrap());
        let addr = serve!(route);
        assert!(matches!(
            client(addr).analyze(request()).await,
            Err(ServiceError::Rejected { status: 400, .. })
        ));
    }

    #[test]
    fn content_must_be_bare_json() {
        let bare = r#"{"choices":[{"message":{"content":"{\"colors\": []}"}}]}"#;
        assert_eq!(parse_content(bare).unwrap(), json!({"colors": []}));

        let fenced = r#"{"choices":[{"message":{"content":"```json\n{\"colors\": []}\n```"}}]}"#;
        assert!(matches!(parse_content(fenced), Err(ServiceError::InvalidResponse(_))));

        let prose = r#"{"choices":[{"message":{"content":"The main color is red."}}]}"#;
        assert!(matches!(parse_content(prose), Err(ServiceError::InvalidResponse(_))));

        let refused = r#"{"choices":[{"message":{"content":null,"refusal":"no"}}]}"#;
        assert!(matches!(parse_content(refused), Err(ServiceError::InvalidResponse(_))));

        assert!(parse_content(r#"{"choices":[]}"#).is_err());
    }

    #[tokio::test]
    async fn missing_key_fails_health_check() {
        let client = HttpAnalysisClient::with_api_key(ExtractionConfig::default(), None).unwrap();
        assert!(matches!(client.health_check().await, Err(ServiceError::Misconfigured(_))));
        assert!(matches!(client.analyze(request()).await, Err(ServiceError::Misconfigured(_))));
    }
}
