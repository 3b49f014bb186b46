use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use codegenius_core::error::Result;
use codegenius_core::{ChunkStream, EndpointCall, EndpointReply, GeniusError, ModelConfig, ModelEndpoint};

/// Model endpoint backed by an Ollama-style local model server.
pub struct OllamaEndpoint {
    client: Client,
    model_id: String,
    base_url: String,
    context_window: usize,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    top_p: f32,
    num_predict: usize,
    num_ctx: usize,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    eval_count: Option<usize>,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
}

impl OllamaEndpoint {
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let model_id = config.model_id()?;
        info!(model = %model_id, url = %config.base_url, "configuring model endpoint");
        Ok(Self {
            client: Client::new(),
            model_id,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            context_window: config.context_window,
            timeout: config.timeout(),
        })
    }

    fn chat_request(&self, call: &EndpointCall, stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.model_id.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: call.prompt.clone(),
            }],
            stream,
            options: ChatOptions {
                temperature: call.temperature,
                top_p: call.top_p,
                num_predict: call.max_tokens,
                num_ctx: self.context_window,
            },
        }
    }

    async fn send_chat(&self, call: &EndpointCall, stream: bool) -> Result<reqwest::Response> {
        let request = self.chat_request(call, stream);
        let response = timeout(
            self.timeout,
            self.client
                .post(format!("{}/api/chat", self.base_url))
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| {
            GeniusError::EndpointUnavailable(format!("request timed out after {:?}", self.timeout))
        })?
        .map_err(|e| GeniusError::EndpointUnavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(classify_failure(status.as_u16(), &body, call, self.context_window));
        }
        Ok(response)
    }

    /// Probe the server's model list for the configured model.
    pub async fn check_availability(&self) -> Result<bool> {
        debug!(url = %self.base_url, "checking model availability");
        let response = timeout(
            Duration::from_secs(5),
            self.client.get(format!("{}/api/tags", self.base_url)).send(),
        )
        .await
        .map_err(|_| GeniusError::EndpointUnavailable("availability check timed out".into()))?
        .map_err(|e| GeniusError::EndpointUnavailable(format!("availability check failed: {}", e)))?;

        if !response.status().is_success() {
            return Ok(false);
        }
        let models: serde_json::Value = response.json().await.map_err(|e| {
            GeniusError::Serialization(format!("failed to parse model list: {}", e))
        })?;

        let base_name = self.model_id.split(':').next().unwrap_or(&self.model_id);
        let found = models["models"]
            .as_array()
            .map(|models| {
                models.iter().any(|model| {
                    model["name"]
                        .as_str()
                        .map(|name| name.starts_with(base_name))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);
        Ok(found)
    }
}

#[async_trait]
impl ModelEndpoint for OllamaEndpoint {
    async fn invoke(&self, call: EndpointCall) -> Result<EndpointReply> {
        let response = self.send_chat(&call, false).await?;
        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| GeniusError::Serialization(format!("failed to parse reply: {}", e)))?;
        debug!(
            prompt_tokens = ?data.prompt_eval_count,
            completion_tokens = ?data.eval_count,
            "endpoint reply received"
        );
        Ok(EndpointReply {
            text: data.message.content,
            prompt_tokens: data.prompt_eval_count,
            completion_tokens: data.eval_count,
        })
    }

    async fn invoke_stream(&self, call: EndpointCall) -> Result<ChunkStream> {
        let response = self.send_chat(&call, true).await?;
        let mut body = response.bytes_stream();
        let (tx, rx) = mpsc::channel::<Result<String>>(32);

        tokio::spawn(async move {
            let mut buffer = String::new();
            while let Some(piece) = body.next().await {
                let piece = match piece {
                    Ok(piece) => piece,
                    Err(e) => {
                        let _ = tx
                            .send(Err(GeniusError::EndpointUnavailable(format!(
                                "stream interrupted: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&piece));
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    match parse_stream_line(line.trim()) {
                        None => {}
                        Some(Ok((chunk, done))) => {
                            if !chunk.is_empty() && tx.send(Ok(chunk)).await.is_err() {
                                // consumer dropped the stream
                                return;
                            }
                            if done {
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    async fn is_available(&self) -> bool {
        self.check_availability().await.unwrap_or(false)
    }
}

/// Map an HTTP failure onto the transient/fatal error taxonomy.
fn classify_failure(
    status: u16,
    body: &str,
    call: &EndpointCall,
    context_window: usize,
) -> GeniusError {
    let lowered = body.to_lowercase();
    if lowered.contains("context length") || lowered.contains("too long") {
        return GeniusError::ContextLengthExceeded {
            prompt_tokens: codegenius_core::estimate_tokens(&call.prompt),
            max_tokens: call.max_tokens,
            context_window,
        };
    }
    if status == 429 || lowered.contains("out of memory") || lowered.contains("oom") {
        return GeniusError::ResourceExhausted(format!("HTTP {}: {}", status, body));
    }
    if (500..=599).contains(&status) {
        return GeniusError::EndpointUnavailable(format!("HTTP {}: {}", status, body));
    }
    // remaining 4xx: the request itself is malformed, retrying cannot help
    GeniusError::Io(format!("endpoint rejected request (HTTP {}): {}", status, body))
}

/// Parse one NDJSON line of a streaming reply. Returns the text delta and
/// whether the stream is done; `None` for blank lines.
fn parse_stream_line(line: &str) -> Option<Result<(String, bool)>> {
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamLine>(line) {
        Ok(parsed) => {
            let chunk = parsed.message.map(|m| m.content).unwrap_or_default();
            Some(Ok((chunk, parsed.done)))
        }
        Err(e) => Some(Err(GeniusError::Serialization(format!(
            "bad stream line: {}",
            e
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> EndpointCall {
        EndpointCall {
            prompt: "write a function".into(),
            max_tokens: 128,
            temperature: 0.7,
            top_p: 0.95,
        }
    }

    #[test]
    fn classifies_resource_exhaustion() {
        let err = classify_failure(429, "rate limited", &call(), 8192);
        assert!(matches!(err, GeniusError::ResourceExhausted(_)));
        let err = classify_failure(500, "CUDA out of memory", &call(), 8192);
        assert!(matches!(err, GeniusError::ResourceExhausted(_)));
    }

    #[test]
    fn classifies_server_errors_as_unavailable() {
        let err = classify_failure(503, "loading model", &call(), 8192);
        assert!(matches!(err, GeniusError::EndpointUnavailable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn classifies_context_overflow_as_fatal() {
        let err = classify_failure(400, "prompt exceeds context length", &call(), 8192);
        assert!(matches!(err, GeniusError::ContextLengthExceeded { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn classifies_bad_requests_as_fatal() {
        let err = classify_failure(400, "unknown field", &call(), 8192);
        assert!(!err.is_transient());
    }

    #[test]
    fn parses_stream_lines() {
        assert!(parse_stream_line("").is_none());

        let (chunk, done) = parse_stream_line(
            r#"{"message":{"role":"assistant","content":"fn main"},"done":false}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(chunk, "fn main");
        assert!(!done);

        let (chunk, done) = parse_stream_line(r#"{"done":true}"#).unwrap().unwrap();
        assert_eq!(chunk, "");
        assert!(done);

        assert!(parse_stream_line("not json").unwrap().is_err());
    }
}
