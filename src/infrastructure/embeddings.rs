//! Text embeddings from the inference server's `/api/embed` endpoint.

use crate::config::Settings;
use crate::error::StoreError;
use crate::infrastructure::traits::Embedder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct OllamaEmbedder {
    http: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize, Debug)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(url: &str, model: &str, timeout: Duration) -> Result<OllamaEmbedder, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(OllamaEmbedder {
            http,
            url: url.to_owned(),
            model: model.to_owned(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<OllamaEmbedder, StoreError> {
        Self::new(
            &settings.embedding_url,
            &settings.embedding_model,
            settings.inference_timeout,
        )
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let response = self
            .http
            .post(&self.url)
            .json(&EmbedRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "embedding service responded with status {}",
                response.status()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("parsing embedding response: {e}")))?;

        body.embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StoreError::Backend("embedding response was empty".to_owned()))
    }
}
