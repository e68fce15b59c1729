//! Plant identification and gardening chat, minus the pixels.
//!
//! A photo (file or URL) goes to a multimodal model that answers with
//! structured care guidance (`PlantData`); a long-lived chat session answers
//! follow-up questions as a stream. `Companion` owns both and exposes the view
//! state a presentation layer renders.

mod acquire;
mod app;
mod backend;
mod chat;
mod config;
mod error;
mod extract;
pub mod locale;
mod logging;
mod schema;
mod state;

use std::path::Path;

pub use acquire::{AcquiredImage, DataUrl, FetchedResource, HttpFetcher, ImageAcquirer, ImageFetcher, ImageSource};
pub use app::{Companion, Dispatch};
pub use backend::{DeltaStream, GeminiClient, GenerateRequest, GenerativeBackend, Part, Role, Turn};
pub use chat::{ChatSession, TurnPhase, TurnStream};
pub use config::{ApiConfig, Config, FetchConfig, LoggingConfig, SafetyFilter, API_KEY_ENV_VARS};
pub use error::{AcquisitionError, ChatTurnError, ConfigError, ExtractionError, ProviderError};
pub use extract::PlantAnalyzer;
pub use logging::{init_tracing, log_file_path};
pub use schema::{CareProfile, PlantData, PLANT_DATA_SCHEMA};
pub use state::{
    AnalysisPhase, ChatMessage, ChatView, MainState, MainView, MessageRole, TurnTicket, ViewState,
};

/// Process startup: load config.toml, set up tracing first so everything after
/// it is captured, then build the application context (and its chat session).
pub fn start(config_path: &Path) -> Result<Companion, ConfigError> {
    let config = Config::load(config_path)?;
    init_tracing(&config.logging);
    tracing::info!(config = %config_path.display(), "Configuration loaded");
    Ok(Companion::from_config(&config))
}
