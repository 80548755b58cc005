pub mod client;
pub mod error;
pub mod extract;
pub mod openai;
pub mod scripted;
pub mod types;

pub use client::{LlmClient, TextStream};
pub use error::LlmError;
pub use extract::{extract_json_object, parse_json_object, ExtractError};
pub use openai::OpenAiCompatClient;
pub use scripted::ScriptedLlm;
pub use types::*;
