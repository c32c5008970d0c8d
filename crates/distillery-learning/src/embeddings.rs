//! Embedding providers.
//!
//! [`HttpEmbeddingProvider`] talks to a TEI-compatible `/embed` endpoint:
//! `POST {"inputs": [..]}` answered by one vector per input, in order.

use std::time::Duration;

use async_trait::async_trait;
use distillery_core::AppConfig;
use serde::Serialize;

use crate::error::EmbeddingError;
use crate::retry::retry_with_backoff;

const DEFAULT_BATCH_SIZE: usize = 100;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub batch_size: usize,
}

impl EmbeddingConfig {
    /// `None` when no provider URL is configured.
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Option<Self> {
        let url = config.embedding_url.clone()?;
        Some(Self {
            url,
            api_key: config.embedding_api_key.clone(),
            timeout_secs: config.embedding_timeout_secs,
            max_retries: config.embedding_max_retries,
            backoff_base_ms: config.embedding_backoff_base_ms,
            batch_size: config.embedding_batch_size,
        })
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
}

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    max_retries: u32,
    backoff_base_ms: u64,
    batch_size: usize,
}

impl HttpEmbeddingProvider {
    /// # Errors
    ///
    /// Returns [`EmbeddingError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/embed", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            backoff_base_ms: config.backoff_base_ms,
            batch_size: if config.batch_size == 0 {
                DEFAULT_BATCH_SIZE
            } else {
                config.batch_size.min(DEFAULT_BATCH_SIZE)
            },
        })
    }

    async fn embed_batch(&self, chunk: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self.client.post(&self.url).json(&EmbedRequest { inputs: chunk });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let embeddings: Vec<Vec<f32>> = response.json().await?;
        if embeddings.len() != chunk.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: chunk.len(),
                got: embeddings.len(),
            });
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let vectors = retry_with_backoff(self.max_retries, self.backoff_base_ms, || {
                self.embed_batch(chunk)
            })
            .await?;
            all.extend(vectors);
        }
        tracing::debug!(texts = texts.len(), "embedded texts");
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider(url: &str, max_retries: u32) -> HttpEmbeddingProvider {
        HttpEmbeddingProvider::new(&EmbeddingConfig {
            url: url.to_string(),
            api_key: Some("secret".to_string()),
            timeout_secs: 5,
            max_retries,
            backoff_base_ms: 0,
            batch_size: 100,
        })
        .expect("client builds")
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {i}")).collect()
    }

    #[tokio::test]
    async fn embeds_in_batches_of_at_most_one_hundred() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(|req: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                let n = body["inputs"].as_array().unwrap().len();
                ResponseTemplate::new(200).set_body_json(vec![vec![0.5_f32, 0.5]; n])
            })
            .expect(2)
            .mount(&server)
            .await;

        let vectors = provider(&server.uri(), 0).embed(&texts(150)).await.unwrap();
        assert_eq!(vectors.len(), 150);
    }

    #[tokio::test]
    async fn retries_server_errors_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(3)
            .mount(&server)
            .await;

        let err = provider(&server.uri(), 2).embed(&texts(1)).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn wrong_vector_count_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![vec![1.0_f32]]))
            .mount(&server)
            .await;

        let err = provider(&server.uri(), 2).embed(&texts(2)).await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::CountMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn endpoint_and_batch_size_are_normalized() {
        let p = HttpEmbeddingProvider::new(&EmbeddingConfig {
            url: "http://tei:8080/".to_string(),
            api_key: None,
            timeout_secs: 1,
            max_retries: 0,
            backoff_base_ms: 0,
            batch_size: 500,
        })
        .expect("client builds");
        assert_eq!(p.url, "http://tei:8080/embed");
        assert_eq!(p.batch_size, 100);
    }
}
