//! Model gateway abstraction over the local Ollama runtime.
//!
//! Defines the [`ModelGateway`] trait consumed by the scorer and composer,
//! and the production [`OllamaGateway`] implementation:
//! - `list_models` — `GET /api/tags`
//! - `generate` — `POST /api/generate` with `stream: false`
//! - `generate_stream` — `POST /api/generate` with `stream: true`, decoding
//!   the NDJSON body into a finite token stream
//!
//! No retry policy: a failed call surfaces immediately to the caller, which
//! maps connection errors to a `model_unavailable` response. Streaming calls
//! carry no overall timeout — they end when the model emits its terminal
//! chunk or the stream is dropped (which closes the underlying connection).

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::config::OllamaConfig;

/// A finite, non-restartable sequence of generated tokens. Dropping the
/// stream stops consumption and closes the HTTP response body.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Abstraction over the language-model runtime's list/health/generate
/// operations. Tests substitute a scripted implementation.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Names of the models available on the runtime.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Reachability probe: true when the runtime answers a listing call.
    async fn health(&self) -> bool {
        self.list_models().await.is_ok()
    }

    /// Single blocking completion for `prompt` on `model`.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String>;

    /// Token-by-token completion for `prompt` on `model`.
    async fn generate_stream(&self, model: &str, prompt: &str) -> Result<TokenStream>;
}

/// Gateway backed by a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaGateway {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl OllamaGateway {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        // Only a connect timeout on the client itself: streamed generations
        // may legitimately run longer than any fixed request timeout, so the
        // blocking path applies its timeout per request instead.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn connection_error(&self, e: reqwest::Error) -> anyhow::Error {
        anyhow!(
            "Ollama connection error (is Ollama running at {}?): {}",
            self.url,
            e
        )
    }
}

#[async_trait]
impl ModelGateway for OllamaGateway {
    async fn list_models(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body);
        }

        let json: serde_json::Value = resp.json().await?;
        parse_tags_response(&json)
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });

        let resp = self
            .client
            .post(format!("{}/api/generate", self.url))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body);
        }

        let json: serde_json::Value = resp.json().await?;
        parse_generate_response(&json)
    }

    async fn generate_stream(&self, model: &str, prompt: &str) -> Result<TokenStream> {
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": true,
        });

        let resp = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body);
        }

        Ok(decode_ndjson_tokens(resp.bytes_stream().boxed()))
    }
}

/// Parses `GET /api/tags`: `{"models": [{"name": "..."}, ...]}`.
fn parse_tags_response(json: &serde_json::Value) -> Result<Vec<String>> {
    let models = json
        .get("models")
        .and_then(|m| m.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing models array"))?;
    Ok(models
        .iter()
        .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
        .map(String::from)
        .collect())
}

/// Parses a non-streaming `POST /api/generate` reply: `{"response": "..."}`.
fn parse_generate_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(String::from)
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))
}

/// One decoded NDJSON stream line: an optional token plus the done flag.
fn parse_stream_line(line: &str) -> Result<(Option<String>, bool)> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| anyhow!("Invalid stream line from Ollama: {}", e))?;
    let token = value
        .get("response")
        .and_then(|r| r.as_str())
        .filter(|t| !t.is_empty())
        .map(String::from);
    let done = value
        .get("done")
        .and_then(|d| d.as_bool())
        .unwrap_or(false);
    Ok((token, done))
}

struct NdjsonState {
    body: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buf: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

/// Turns an NDJSON byte stream into a token stream. Buffers partial lines
/// across network chunks; ends after the line carrying `"done": true` (or
/// when the body ends without one).
fn decode_ndjson_tokens(body: BoxStream<'static, reqwest::Result<bytes::Bytes>>) -> TokenStream {
    let state = NdjsonState {
        body,
        buf: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(token) = st.pending.pop_front() {
                return Some((Ok(token), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    st.buf.extend_from_slice(&chunk);
                    while let Some(pos) = st.buf.iter().position(|&b| b == b'\n') {
                        let raw: Vec<u8> = st.buf.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match parse_stream_line(line) {
                            Ok((token, done)) => {
                                if let Some(t) = token {
                                    st.pending.push_back(t);
                                }
                                if done {
                                    st.done = true;
                                }
                            }
                            Err(e) => {
                                st.done = true;
                                return Some((Err(e), st));
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(anyhow!("Ollama stream error: {}", e)), st));
                }
                None => {
                    st.done = true;
                }
            }
        }
    }))
}
