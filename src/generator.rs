use crate::config::CommentServiceConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Black-box text service that writes a comment for a post.
#[async_trait]
pub trait CommentGenerator: Send + Sync {
    async fn generate(&self, caption: &str, style: &str) -> Result<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    post_caption: &'a str,
    style_guide: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    comment_text: Option<String>,
}

pub struct HttpCommentGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpCommentGenerator {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build comment service client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl CommentGenerator for HttpCommentGenerator {
    async fn generate(&self, caption: &str, style: &str) -> Result<String> {
        let mut req = self.client.post(&self.endpoint).json(&GenerateRequest {
            post_caption: caption,
            style_guide: style,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.context("failed to reach comment service")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("comment service returned {}: {}", status, body);
        }
        let parsed: GenerateResponse = resp
            .json()
            .await
            .context("comment service returned malformed JSON")?;
        let text = parsed.comment_text.unwrap_or_default().trim().to_string();
        if text.is_empty() {
            anyhow::bail!("comment service returned empty text");
        }
        Ok(text)
    }
}

/// Canned replies used when no service endpoint is configured.
pub struct OfflineGenerator;

const PROFESSIONAL: &[&str] = &[
    "Thanks for sharing this, some useful points here.",
    "Well put. This matches what I have seen in practice.",
    "Appreciate the write-up, worth the read.",
];
const CASUAL: &[&str] = &[
    "Love this!",
    "Great post, thanks!",
    "This is spot on.",
];

#[async_trait]
impl CommentGenerator for OfflineGenerator {
    async fn generate(&self, caption: &str, style: &str) -> Result<String> {
        let pool = if style.eq_ignore_ascii_case("casual") { CASUAL } else { PROFESSIONAL };
        let pick = caption.bytes().map(usize::from).sum::<usize>() % pool.len();
        Ok(pool[pick].to_string())
    }
}

pub fn from_config(cfg: &CommentServiceConfig, api_key: Option<String>) -> Result<Arc<dyn CommentGenerator>> {
    if cfg.endpoint.trim().is_empty() {
        tracing::info!("no comment service endpoint configured, using offline generator");
        return Ok(Arc::new(OfflineGenerator));
    }
    let timeout = Duration::from_millis(cfg.timeout_ms);
    Ok(Arc::new(HttpCommentGenerator::new(&cfg.endpoint, api_key, timeout)?))
}

/// Generate a comment, substituting `fallback` on any failure. The bool is
/// true when the fallback was used.
pub async fn generate_or_fallback(
    generator: &dyn CommentGenerator,
    caption: &str,
    style: &str,
    fallback: &str,
) -> (String, bool) {
    match generator.generate(caption, style).await {
        Ok(text) => (text, false),
        Err(e) => {
            tracing::warn!(error = %e, "comment generation failed, using fallback");
            (fallback.to_string(), true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_with(response: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(response)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_posts_caption_and_style() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(header("authorization", "Bearer k-123"))
            .and(body_json(serde_json::json!({
                "postCaption": "We shipped v2",
                "styleGuide": "professional"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "commentText": " Congrats on v2! " })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let gen = HttpCommentGenerator::new(
            &format!("{}/generate", server.uri()),
            Some("k-123".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let text = gen.generate("We shipped v2", "professional").await.unwrap();
        assert_eq!(text, "Congrats on v2!");
    }

    #[tokio::test]
    async fn test_failure_and_empty_text_fall_back() {
        for response in [
            ResponseTemplate::new(500).set_body_string("boom"),
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "commentText": "  " })),
            ResponseTemplate::new(200).set_body_json(serde_json::json!({})),
            ResponseTemplate::new(200).set_body_string("not json"),
        ] {
            let server = server_with(response).await;
            let gen = HttpCommentGenerator::new(
                &format!("{}/generate", server.uri()),
                None,
                Duration::from_secs(5),
            )
            .unwrap();
            let (text, used_fallback) = generate_or_fallback(&gen, "caption", "casual", "Nice post!").await;
            assert_eq!(text, "Nice post!");
            assert!(used_fallback);
        }
    }

    #[tokio::test]
    async fn test_offline_generator_is_deterministic() {
        let a = OfflineGenerator.generate("same caption", "professional").await.unwrap();
        let b = OfflineGenerator.generate("same caption", "professional").await.unwrap();
        assert_eq!(a, b);
        assert!(PROFESSIONAL.contains(&a.as_str()));
        let c = OfflineGenerator.generate("x", "Casual").await.unwrap();
        assert!(CASUAL.contains(&c.as_str()));
    }

    #[test]
    fn test_empty_endpoint_selects_offline() {
        let cfg = CommentServiceConfig::default();
        assert!(from_config(&cfg, None).is_ok());
    }
}
