//! Client for a local Ollama-compatible generation endpoint.
//!
//! The server answers with newline-delimited JSON objects, each optionally holding
//! a text fragment and a completion flag. Lines that are not valid JSON are skipped
//! so one bad line does not lose the whole answer.

use crate::config::Settings;
use crate::error::InferenceError;
use crate::infrastructure::traits::{ChunkStream, GenerationParams, InferenceClient};
use async_stream::try_stream;
use async_trait::async_trait;
use di::{Ref, inject, injectable};
use futures_util::TryStreamExt;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

pub struct OllamaClient {
    http: reqwest::Client,
    url: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize, Debug)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize, Debug)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Deserialize, Debug, Default)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[injectable(InferenceClient)]
impl OllamaClient {
    #[inject]
    pub fn create(settings: Ref<Settings>) -> OllamaClient {
        OllamaClient::new(
            &settings.inference_url,
            &settings.model,
            settings.inference_timeout,
        )
    }
}

impl OllamaClient {
    pub fn new(url: &str, model: &str, timeout: Duration) -> OllamaClient {
        OllamaClient {
            http: reqwest::Client::new(),
            url: url.to_owned(),
            model: model.to_owned(),
            timeout,
        }
    }
}

/// Parses one line of the response body. `Ok(None)` means the line is skipped.
fn parse_line(line: &[u8]) -> Result<Option<GenerateChunk>, InferenceError> {
    let Ok(line) = std::str::from_utf8(line) else {
        debug!("skipping non UTF-8 line from inference stream");
        return Ok(None);
    };
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<GenerateChunk>(line) {
        Ok(GenerateChunk {
            error: Some(error), ..
        }) => Err(InferenceError::Transport(error)),
        Ok(chunk) => Ok(Some(chunk)),
        Err(e) => {
            debug!("skipping malformed inference line ({e}): {line}");
            Ok(None)
        }
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<ChunkStream, InferenceError> {
        trace!("sending prompt to {}: {prompt}", self.url);

        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: true,
                options: GenerateOptions {
                    num_predict: params.max_tokens,
                    temperature: params.temperature,
                },
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes_stream().map_err(|e| {
            let kind = if e.is_timeout() {
                io::ErrorKind::TimedOut
            } else {
                io::ErrorKind::Other
            };
            io::Error::new(kind, e)
        });
        let mut lines = StreamReader::new(body).split(b'\n');

        let chunks: ChunkStream = Box::pin(try_stream! {
            while let Some(line) = lines.next_segment().await.map_err(InferenceError::from)? {
                let Some(chunk) = parse_line(&line)? else {
                    continue;
                };
                if let Some(text) = chunk.response.filter(|t| !t.is_empty()) {
                    yield text;
                }
                if chunk.done {
                    break;
                }
            }
        });

        Ok(chunks)
    }
}
