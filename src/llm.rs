//! Chat model backends.
//!
//! Implementations of [`docent_core::llm::ChatModel`] for OpenAI-compatible
//! chat completion APIs and Ollama. Both reuse the retry policy from
//! [`crate::embedding::send_with_retry`].
//!
//! Streaming replies arrive as lines: server-sent `data: {json}` events for
//! OpenAI (ending with `data: [DONE]`) and one JSON object per line for
//! Ollama (ending with `"done": true`).

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::debug;

use docent_core::llm::{ChatMessage, ChatModel, TokenSink};

use crate::config::LlmConfig;
use crate::embedding::{api_key, post_with_retry, send_with_retry, RetryPolicy};

/// Chat model used when `llm.provider = "disabled"`.
pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("LLM provider is disabled; set [llm].provider in the config")
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Chat model for OpenAI-compatible `POST {url}/v1/chat/completions`.
pub struct OpenAIChat {
    model: String,
    temperature: f32,
    url: String,
    api_key: String,
    policy: RetryPolicy,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key(&config.api_key_env)?,
            policy: RetryPolicy::new(config.max_retries, config.timeout_secs),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        let json = post_with_retry(
            "OpenAI",
            &format!("{}/v1/chat/completions", self.url),
            Some(&self.api_key),
            &body,
            self.policy,
        )
        .await?;
        parse_openai_completion(json)
    }

    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        on_token: TokenSink<'_>,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": true,
        });
        let response = send_with_retry(
            "OpenAI",
            &format!("{}/v1/chat/completions", self.url),
            Some(&self.api_key),
            &body,
            self.policy,
        )
        .await?;
        read_stream("OpenAI", response, parse_openai_stream_line, on_token).await
    }
}

fn parse_openai_completion(json: serde_json::Value) -> Result<String> {
    let response: CompletionResponse = serde_json::from_value(json)
        .map_err(|e| anyhow!("Invalid OpenAI chat response: {}", e))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow!("No choices returned from OpenAI API"))
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

/// Chat model for Ollama's `POST {url}/api/chat`.
pub struct OllamaChat {
    model: String,
    temperature: f32,
    url: String,
    policy: RetryPolicy,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Self {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            url: url.trim_end_matches('/').to_string(),
            policy: RetryPolicy::new(config.max_retries, config.timeout_secs),
        }
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let json = post_with_retry(
            "Ollama",
            &format!("{}/api/chat", self.url),
            None,
            &body,
            self.policy,
        )
        .await?;
        parse_ollama_completion(json)
    }

    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        on_token: TokenSink<'_>,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "options": { "temperature": self.temperature },
        });
        let response = send_with_retry(
            "Ollama",
            &format!("{}/api/chat", self.url),
            None,
            &body,
            self.policy,
        )
        .await?;
        read_stream("Ollama", response, parse_ollama_stream_line, on_token).await
    }
}

fn parse_ollama_completion(json: serde_json::Value) -> Result<String> {
    let response: OllamaChatResponse = serde_json::from_value(json)
        .map_err(|e| anyhow!("Invalid Ollama chat response: {}", e))?;
    response
        .message
        .content
        .ok_or_else(|| anyhow!("Ollama returned a message without content"))
}

/// One parsed line of a streamed reply.
#[derive(Debug, PartialEq)]
enum StreamEvent {
    Token(String),
    Done,
    Skip,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

fn parse_openai_stream_line(line: &str) -> Result<StreamEvent> {
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, `event:` fields and `:` keep-alive comments.
        return Ok(StreamEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamEvent::Done);
    }
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| anyhow!("Invalid OpenAI stream event: {}", e))?;
    if let Some(error) = value.get("error") {
        bail!("OpenAI stream error: {}", error);
    }
    let chunk: StreamChunk = serde_json::from_value(value)
        .map_err(|e| anyhow!("Invalid OpenAI stream event: {}", e))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|t| !t.is_empty())
        .map(StreamEvent::Token)
        .unwrap_or(StreamEvent::Skip))
}

#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

fn parse_ollama_stream_line(line: &str) -> Result<StreamEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(StreamEvent::Skip);
    }
    let chunk: OllamaStreamChunk = serde_json::from_str(line)
        .map_err(|e| anyhow!("Invalid Ollama stream line: {}", e))?;
    if let Some(error) = chunk.error {
        bail!("Ollama stream error: {}", error);
    }
    match chunk.message.and_then(|m| m.content).filter(|t| !t.is_empty()) {
        Some(token) => Ok(StreamEvent::Token(token)),
        None if chunk.done => Ok(StreamEvent::Done),
        None => Ok(StreamEvent::Skip),
    }
}

/// Splits a byte stream into lines. Bytes are held until their line is
/// complete so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        lines
    }

    /// Whatever followed the last newline.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest).trim_end().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// Feed a streamed response through `parse`, forwarding tokens to
/// `on_token`, and return the concatenated reply.
async fn read_stream(
    service: &str,
    response: reqwest::Response,
    parse: fn(&str) -> Result<StreamEvent>,
    on_token: TokenSink<'_>,
) -> Result<String> {
    let mut stream = Box::pin(response.bytes_stream());
    let mut lines = LineBuffer::default();
    let mut reply = String::new();
    let mut done = false;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| anyhow!("{} stream interrupted: {}", service, e))?;
        for line in lines.push(&chunk) {
            match parse(&line)? {
                StreamEvent::Token(token) => {
                    on_token(&token);
                    reply.push_str(&token);
                }
                StreamEvent::Done => done = true,
                StreamEvent::Skip => {}
            }
        }
        if done {
            break;
        }
    }
    if !done {
        if let Some(line) = lines.finish() {
            if let StreamEvent::Token(token) = parse(&line)? {
                on_token(&token);
                reply.push_str(&token);
            }
        }
    }

    debug!(service, bytes = reply.len(), "stream finished");
    if reply.trim().is_empty() {
        bail!("{} returned an empty reply", service);
    }
    Ok(reply)
}

/// Create the [`ChatModel`] named by `config.provider`.
pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config))),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_completion() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Revenue was 4.2M [1]."}}]
        });
        assert_eq!(
            parse_openai_completion(json).unwrap(),
            "Revenue was 4.2M [1]."
        );
        assert!(parse_openai_completion(serde_json::json!({"choices": []})).is_err());
    }

    #[test]
    fn test_parse_ollama_completion() {
        let json = serde_json::json!({
            "model": "llama3",
            "message": {"role": "assistant", "content": "Hello"},
            "done": true
        });
        assert_eq!(parse_ollama_completion(json).unwrap(), "Hello");
        assert!(parse_ollama_completion(serde_json::json!({"done": true})).is_err());
    }

    #[test]
    fn test_messages_serialize_as_role_content() {
        let json = serde_json::to_value([ChatMessage::system("be brief")]).unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[0]["content"], "be brief");
    }

    #[test]
    fn test_openai_stream_lines() {
        let token = parse_openai_stream_line(
            r#"data: {"choices":[{"index":0,"delta":{"content":"Revenue"}}]}"#,
        )
        .unwrap();
        assert_eq!(token, StreamEvent::Token("Revenue".into()));

        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_openai_stream_line(role_only).unwrap(), StreamEvent::Skip);
        assert_eq!(parse_openai_stream_line("").unwrap(), StreamEvent::Skip);
        assert_eq!(parse_openai_stream_line(": ping").unwrap(), StreamEvent::Skip);
        assert_eq!(parse_openai_stream_line("data: [DONE]").unwrap(), StreamEvent::Done);

        let err = parse_openai_stream_line(r#"data: {"error":{"message":"overloaded"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("overloaded"));
        assert!(parse_openai_stream_line("data: {not json").is_err());
    }

    #[test]
    fn test_ollama_stream_lines() {
        let token = parse_ollama_stream_line(
            r#"{"model":"llama3","message":{"role":"assistant","content":"Hel"},"done":false}"#,
        )
        .unwrap();
        assert_eq!(token, StreamEvent::Token("Hel".into()));

        let last = r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(parse_ollama_stream_line(last).unwrap(), StreamEvent::Done);
        assert_eq!(parse_ollama_stream_line("  ").unwrap(), StreamEvent::Skip);

        let err = parse_ollama_stream_line(r#"{"error":"model not found"}"#).unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn test_line_buffer_joins_split_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        assert_eq!(buffer.push(b":1}\r\n\ndata: [DO"), vec!["data: {\"a\":1}", ""]);

        // "é" split across two reads.
        let bytes = "caf\u{e9}\n".as_bytes();
        assert!(buffer.push(&bytes[..4]).is_empty());
        assert_eq!(buffer.push(&bytes[4..]), vec!["data: [DOcaf\u{e9}"]);

        buffer.push(b"tail");
        assert_eq!(buffer.finish().as_deref(), Some("tail"));
        assert_eq!(buffer.finish(), None);
    }

    #[tokio::test]
    async fn test_default_streaming_forwards_whole_reply() {
        struct Fixed;

        #[async_trait]
        impl ChatModel for Fixed {
            fn model_name(&self) -> &str {
                "fixed"
            }

            async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
                Ok("All at once.".to_string())
            }
        }

        let mut seen = Vec::new();
        let mut sink = |token: &str| seen.push(token.to_string());
        let reply = Fixed
            .complete_streaming(&[ChatMessage::user("hi")], &mut sink)
            .await
            .unwrap();
        assert_eq!(reply, "All at once.");
        assert_eq!(seen, vec!["All at once."]);
    }

    #[tokio::test]
    async fn test_disabled_chat_errors() {
        let chat = create_chat_model(&LlmConfig::default()).unwrap();
        let err = chat.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = LlmConfig {
            provider: "ollama".into(),
            model: "llama3".into(),
            ..LlmConfig::default()
        };
        let chat = create_chat_model(&config).unwrap();
        assert_eq!(chat.model_name(), "llama3");
    }
}
