use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unusable llm response: {0}")]
    Response(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
