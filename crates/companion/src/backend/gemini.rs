use std::collections::VecDeque;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::sse::SseDecoder;
use super::{DeltaStream, GenerateRequest, GenerativeBackend, Part, Turn};
use crate::config::{ApiConfig, SafetyFilter};
use crate::error::ProviderError;

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

// --- Gemini API request structs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

// --- Gemini API response structs ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiResponse {
    /// Concatenated text of all candidate parts, or the reason the answer was blocked.
    fn into_text(self) -> Result<String, ProviderError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ProviderError::Blocked(reason));
        }
        let mut text = String::new();
        let mut finish_reason = None;
        for candidate in self.candidates {
            if let Some(content) = candidate.content {
                text.extend(content.parts.into_iter().filter_map(|p| p.text));
            }
            finish_reason = finish_reason.or(candidate.finish_reason);
        }
        match finish_reason.as_deref() {
            Some(reason @ ("SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST")) if text.is_empty() => {
                Err(ProviderError::Blocked(reason.to_string()))
            }
            _ => Ok(text),
        }
    }
}

fn wire_part(part: &Part) -> WirePart {
    match part {
        Part::Text(text) => WirePart::Text { text: text.clone() },
        Part::InlineData { mime_type, data } => WirePart::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.clone(),
                data: data.clone(),
            },
        },
    }
}

fn wire_content(turn: &Turn) -> Content {
    Content {
        role: turn.role.as_api_str(),
        parts: turn.parts.iter().map(wire_part).collect(),
    }
}

fn build_request(request: &GenerateRequest, safety_filter: SafetyFilter) -> GeminiRequest {
    let system_instruction = request
        .system_instruction
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(|text| SystemInstruction {
            parts: vec![WirePart::Text { text: text.clone() }],
        });

    GeminiRequest {
        system_instruction,
        contents: request.contents.iter().map(wire_content).collect(),
        generation_config: request.response_schema.as_ref().map(|schema| GenerationConfig {
            response_mime_type: "application/json",
            response_schema: schema.clone(),
        }),
        safety_settings: HARM_CATEGORIES
            .iter()
            .map(|&category| SafetySetting {
                category,
                threshold: safety_filter.as_api_str(),
            })
            .collect(),
    }
}

/// Decode one SSE `data:` payload into the text it carries.
fn parse_stream_event(payload: &str) -> Result<String, ProviderError> {
    let response: GeminiResponse =
        serde_json::from_str(payload).map_err(|e| ProviderError::Decode(e.to_string()))?;
    response.into_text()
}

/// Turn an SSE response body into text deltas.
///
/// Events split across chunks are reassembled, and a final event without its
/// blank line is still delivered. The first error ends the stream; events
/// buffered behind it are dropped. Empty deltas are skipped.
fn sse_deltas<S, B>(body: S) -> DeltaStream
where
    S: Stream<Item = Result<B, ProviderError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = (
        body.boxed(),
        SseDecoder::default(),
        VecDeque::<Result<String, ProviderError>>::new(),
        false,
    );
    stream::unfold(state, |(mut body, mut decoder, mut ready, mut done)| async move {
        loop {
            if let Some(item) = ready.pop_front() {
                return Some((item, (body, decoder, ready, done)));
            }
            if done {
                return None;
            }
            match body.next().await {
                Some(Ok(chunk)) => {
                    ready.extend(decoder.push(chunk.as_ref()).iter().map(|e| parse_stream_event(e)));
                }
                Some(Err(e)) => {
                    done = true;
                    ready.push_back(Err(e));
                }
                None => {
                    done = true;
                    ready.extend(decoder.finish().map(|e| parse_stream_event(&e)));
                }
            }
            if let Some(pos) = ready.iter().position(Result::is_err) {
                ready.truncate(pos + 1);
                done = true;
            }
            ready.retain(|item| !matches!(item, Ok(text) if text.is_empty()));
        }
    })
    .boxed()
}

/// Gemini REST client. Built once; the API key is checked at each call so a
/// missing key surfaces at first use instead of at startup.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    key: String,
    model: String,
    timeout: Option<Duration>,
    safety_filter: SafetyFilter,
}

impl GeminiClient {
    pub fn new(config: &ApiConfig) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(client, config)
    }

    /// Use a prepared client; only the request settings are taken from `config`.
    pub fn with_client(client: reqwest::Client, config: &ApiConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key: config.key.clone(),
            model: config.model.clone(),
            timeout: config.timeout(),
            safety_filter: config.safety_filter,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{method}", self.base_url, self.model)
    }

    async fn post(
        &self,
        url: &str,
        request: &GenerateRequest,
        bounded: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        if self.key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let mut builder = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.key)
            .json(&build_request(request, self.safety_filter));
        if let Some(timeout) = self.timeout.filter(|_| bounded) {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(ProviderError::from_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), %body, "Gemini request rejected");
            return Err(ProviderError::from_status(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<Option<String>, ProviderError> {
        let url = self.endpoint("generateContent");
        let response = self.post(&url, request, true).await?;
        let body: GeminiResponse = response.json().await.map_err(ProviderError::from_transport)?;
        let text = body.into_text()?;
        Ok(if text.is_empty() { None } else { Some(text) })
    }

    async fn stream(&self, request: &GenerateRequest) -> Result<DeltaStream, ProviderError> {
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, request, false).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ProviderError::from_transport));
        Ok(sse_deltas(body))
    }
}
