//! Deterministic in-memory [`LlmClient`] for tests.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{LlmClient, LlmError, LlmRequest};

/// Replays queued replies in order and records every request.
///
/// An exhausted queue answers with an error, which exercises callers'
/// failure paths.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let llm = Self::new();
        for reply in replies {
            llm.push_text(reply);
        }
        llm
    }

    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        lock(&self.replies).push_back(Ok(text.into()));
        self
    }

    pub fn push_error(&self, message: impl Into<String>) -> &Self {
        lock(&self.replies).push_back(Err(message.into()));
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, request: LlmRequest) -> Result<String, LlmError> {
        lock(&self.requests).push(request);
        match lock(&self.replies).pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(LlmError::Response(message)),
            None => Err(LlmError::Response("scripted replies exhausted".to_string())),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_replays_in_order() {
        let llm = ScriptedLlm::with_replies(["one", "two"]);
        assert_eq!(llm.generate(LlmRequest::prompt("a")).await.unwrap(), "one");
        assert_eq!(llm.generate(LlmRequest::prompt("b")).await.unwrap(), "two");
        assert!(llm.generate(LlmRequest::prompt("c")).await.is_err());

        let prompts: Vec<String> = llm
            .requests()
            .iter()
            .filter_map(|r| r.last_user_text().map(String::from))
            .collect();
        assert_eq!(prompts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let llm = ScriptedLlm::new();
        llm.push_error("backend down").push_text("later");
        let err = llm.generate(LlmRequest::prompt("x")).await.unwrap_err();
        assert!(err.to_string().contains("backend down"));
        assert_eq!(llm.remaining(), 1);
    }

    #[tokio::test]
    async fn test_default_stream_is_single_chunk() {
        let llm = ScriptedLlm::with_replies(["whole reply"]);
        let chunks: Vec<String> = llm
            .generate_stream(LlmRequest::prompt("x"))
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["whole reply"]);
    }
}
