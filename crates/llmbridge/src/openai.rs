//! Client for OpenAI-compatible `/chat/completions` endpoints (Ollama,
//! vLLM, llama.cpp server, hosted APIs).

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{LlmClient, LlmError, LlmRequest, TextStream};

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    default_temperature: f32,
    default_max_tokens: u32,
}

impl OpenAiCompatClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self, LlmError> {
        Self::from_config(&meshconf::LlmConfig {
            base_url: base_url.to_string(),
            model: model.to_string(),
            ..Default::default()
        })
    }

    pub fn from_config(config: &meshconf::LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            default_temperature: config.temperature,
            default_max_tokens: config.max_output_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Request body for `/chat/completions`.
    pub fn build_body(&self, request: &LlmRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.conversation(),
            "temperature": request.temperature.unwrap_or(self.default_temperature),
            "max_tokens": request.max_output_tokens.unwrap_or(self.default_max_tokens),
            "stream": stream,
        });

        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        // Not part of the OpenAI schema; Ollama and vLLM accept it
        if let Some(top_k) = request.top_k {
            body["top_k"] = json!(top_k);
        }
        if request.wants_json() {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let mut req = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(tp) = current_traceparent() {
            req = req.header("traceparent", tp);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    #[tracing::instrument(
        name = "llm.generate",
        skip(self, request),
        fields(llm.model = %self.model, llm.json = request.wants_json())
    )]
    async fn generate(&self, request: LlmRequest) -> Result<String, LlmError> {
        let body = self.build_body(&request, false);
        let response = self.post(&body).await?;
        let parsed: CompletionResponse = serde_json::from_slice(&response.bytes().await?)?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Response("completion has no message content".to_string()))?;

        debug!(chars = text.len(), "llm completion received");
        Ok(text)
    }

    #[tracing::instrument(
        name = "llm.generate_stream",
        skip(self, request),
        fields(llm.model = %self.model)
    )]
    async fn generate_stream(&self, request: LlmRequest) -> Result<TextStream, LlmError> {
        let body = self.build_body(&request, true);
        let response = self.post(&body).await?;

        let state = SseState {
            inner: response.bytes_stream().boxed(),
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(chunk) = st.pending.pop_front() {
                    return Some((Ok(chunk), st));
                }
                if st.done {
                    return None;
                }
                match st.inner.next().await {
                    Some(Ok(bytes)) => {
                        st.buffer.push_str(&String::from_utf8_lossy(&bytes));
                        st.drain_lines();
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((Err(LlmError::Http(e)), st));
                    }
                    None => {
                        st.buffer.push('\n');
                        st.drain_lines();
                        st.done = true;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

struct SseState {
    inner: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    buffer: String,
    pending: VecDeque<String>,
    done: bool,
}

impl SseState {
    fn drain_lines(&mut self) {
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim().to_string();
            self.buffer.drain(..=newline_pos);

            match parse_sse_line(&line) {
                SseLine::Delta(text) => self.pending.push_back(text),
                SseLine::Done => {
                    self.done = true;
                    self.buffer.clear();
                    return;
                }
                SseLine::Skip => {}
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<Value>(data) {
        Ok(value) => match value["choices"][0]["delta"]["content"].as_str() {
            Some(text) if !text.is_empty() => SseLine::Delta(text.to_string()),
            _ => SseLine::Skip,
        },
        Err(e) => {
            warn!(error = %e, "skipping malformed stream event");
            SseLine::Skip
        }
    }
}

/// Extract traceparent from current span for distributed tracing.
fn current_traceparent() -> Option<String> {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let span = tracing::Span::current();
    let context = span.context();
    let ctx_span = context.span();
    let span_context = ctx_span.span_context();

    if span_context.is_valid() {
        let flags = if span_context.is_sampled() { "01" } else { "00" };
        Some(format!(
            "00-{}-{}-{}",
            span_context.trace_id(),
            span_context.span_id(),
            flags
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;
    use pretty_assertions::assert_eq;

    fn client() -> OpenAiCompatClient {
        OpenAiCompatClient::new("http://localhost:11434/v1/", "test-model").unwrap()
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        assert_eq!(client().endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn test_body_defaults() {
        let body = client().build_body(&LlmRequest::prompt("hi"), false);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["stream"], false);
        assert!(body.get("response_format").is_none());
        assert!(body.get("top_k").is_none());
    }

    #[test]
    fn test_body_overrides() {
        let mut req = LlmRequest::prompt("hi")
            .with_system("sys")
            .with_temperature(0.0)
            .json();
        req.top_p = Some(0.9);
        req.top_k = Some(40);
        req.history = vec![ChatMessage::assistant("earlier")];

        let body = client().build_body(&req, true);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["top_k"], 40);
        assert_eq!(body["response_format"], json!({"type": "json_object"}));
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "earlier");
        assert_eq!(body["messages"][2]["content"], "hi");
    }

    #[test]
    fn test_parse_sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            SseLine::Delta("Hel".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
    }
}
