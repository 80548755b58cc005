use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{LlmError, LlmRequest};

/// Incremental text chunks from a streaming generation.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// A prompt-to-text function backed by some model.
///
/// Callers own all parsing of the returned text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: LlmRequest) -> Result<String, LlmError>;

    /// Stream the reply. The default yields the whole `generate` result as
    /// one chunk.
    async fn generate_stream(&self, request: LlmRequest) -> Result<TextStream, LlmError> {
        let text = self.generate(request).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }

    /// Model identifier, for logs.
    fn model(&self) -> &str;
}
