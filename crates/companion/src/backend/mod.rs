//! Generative model backend.
//!
//! `GenerativeBackend` is the seam between the orchestration layer and the
//! provider: one-shot generation (optionally schema-constrained) and streamed
//! generation yielding text deltas. `gemini` is the production implementation;
//! tests substitute a scripted fake.

mod gemini;
mod sse;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::error::ProviderError;

pub use gemini::GeminiClient;

/// Ordered text fragments of a streamed response. Ends when the provider
/// signals completion; an `Err` item is terminal.
pub type DeltaStream = BoxStream<'static, Result<String, ProviderError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_api_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    /// Base64 payload without any `data:` prefix.
    InlineData { mime_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text(text.into())],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub system_instruction: Option<String>,
    pub contents: Vec<Turn>,
    /// When set, the response must be JSON conforming to this schema.
    pub response_schema: Option<Value>,
}

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// One-shot generation. `Ok(None)` means the provider answered without text.
    async fn generate(&self, request: &GenerateRequest) -> Result<Option<String>, ProviderError>;

    /// Streamed generation. Errors before the first byte are returned directly;
    /// errors mid-stream arrive as the last item of the stream.
    async fn stream(&self, request: &GenerateRequest) -> Result<DeltaStream, ProviderError>;
}
