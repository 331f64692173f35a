//! Embedding generation for semantic search. Vectors are produced by the
//! OpenAI embeddings API and stored in PostgreSQL via pgvector. Called by
//! the background workers and, synchronously, by the search read path to
//! embed the query.

use std::time::Duration;

use pgvector::Vector;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::provider::{api_error, truncate_chars, ProviderError};

const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
/// Input is truncated to this many characters (~2000 tokens).
const MAX_INPUT_TEXT_CHARS: usize = 8000;

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for the embedding model. One instance is shared by the workers and
/// the search handler.
#[derive(Clone)]
pub struct Service {
    client: Client,
    api_key: String,
    model: String,
}

impl Service {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generates an embedding vector for `text`, truncated to the model's
    /// practical input size. Single attempt, bounded by the provider timeout.
    pub async fn embed(&self, text: &str) -> Result<Vector, ProviderError> {
        let text = truncate_chars(text, MAX_INPUT_TEXT_CHARS);

        let response = self
            .client
            .post(EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsRequest {
                model: &self.model,
                input: vec![&text],
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), body));
        }

        let parsed: EmbeddingsResponse = response.json().await?;
        let data = parsed.data.into_iter().next().ok_or(ProviderError::EmptyResponse)?;

        Ok(Vector::from(data.embedding))
    }
}

/// Combines question context and answer text for derivation. The same text
/// feeds both the enrichment prompt and the embedding input.
pub fn build_derivation_text(field_label: Option<&str>, value_text: &str) -> String {
    match field_label {
        Some(label) if !label.is_empty() => {
            format!("Question: {label}\nResponse: {value_text}")
        }
        _ => value_text.to_string(),
    }
}
