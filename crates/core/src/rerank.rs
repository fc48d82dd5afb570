use crate::error::RetrievalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Scores each passage against the query with a cross-encoder. Implementors
/// must return exactly one score per passage, in passage order. Scores are
/// comparable only within a single call.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RetrievalError>;
}

#[derive(Debug, Clone, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    passages: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

/// Cross-encoder scoring over a remote HTTP endpoint.
pub struct HttpReranker {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpReranker {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, RetrievalError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(&RerankRequest { query, passages });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RetrievalError::BackendResponse {
                backend: "reranker".to_string(),
                details: format!(
                    "rerank request to {} returned {}",
                    self.endpoint,
                    response.status()
                ),
            });
        }

        let payload: RerankResponse = response.json().await?;
        if payload.scores.len() != passages.len() {
            return Err(RetrievalError::BackendResponse {
                backend: "reranker".to_string(),
                details: format!(
                    "expected {} scores, got {}",
                    passages.len(),
                    payload.scores.len()
                ),
            });
        }

        Ok(payload.scores)
    }
}
