//! View state for the main identification flow and the chat panel.
//!
//! Everything here is synchronous and side-effect free: async operations in
//! `app` call these reducers when they start and when they resolve. The two
//! axes are independent; nothing on `ChatView` touches `MainView` or back.

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::locale;
use crate::schema::PlantData;

/// Coarse main-flow state, derived from `MainView`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MainState {
    NoImage,
    Analyzing,
    HasResult,
    HasError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", content = "detail", rename_all = "camelCase")]
pub enum AnalysisPhase {
    Idle,
    Analyzing,
    Identified(PlantData),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MainView {
    /// Preview of the image being analyzed: the URL right after submission,
    /// then the data URL once the bytes are in.
    pub image: Option<String>,
    pub phase: AnalysisPhase,
    pub url_input: String,
    pub url_input_visible: bool,
}

impl Default for MainView {
    fn default() -> Self {
        Self {
            image: None,
            phase: AnalysisPhase::Idle,
            url_input: String::new(),
            url_input_visible: false,
        }
    }
}

impl MainView {
    pub fn state(&self) -> MainState {
        match self.phase {
            AnalysisPhase::Idle => MainState::NoImage,
            AnalysisPhase::Analyzing => MainState::Analyzing,
            AnalysisPhase::Identified(_) => MainState::HasResult,
            AnalysisPhase::Failed(_) => MainState::HasError,
        }
    }

    pub fn is_analyzing(&self) -> bool {
        self.phase == AnalysisPhase::Analyzing
    }

    pub fn result(&self) -> Option<&PlantData> {
        match &self.phase {
            AnalysisPhase::Identified(plant) => Some(plant),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.phase {
            AnalysisPhase::Failed(message) => Some(message),
            _ => None,
        }
    }

    /// Enter `Analyzing`, dropping any previous result or error. Returns false
    /// (and changes nothing) while an analysis is already running.
    pub fn begin_analysis(&mut self, preview: Option<String>) -> bool {
        if self.is_analyzing() {
            return false;
        }
        self.image = preview;
        self.phase = AnalysisPhase::Analyzing;
        true
    }

    pub fn set_preview(&mut self, preview: String) {
        if self.is_analyzing() {
            self.image = Some(preview);
        }
    }

    pub fn finish_analysis(&mut self, plant: PlantData) {
        if self.is_analyzing() {
            self.phase = AnalysisPhase::Identified(plant);
        }
    }

    pub fn fail_analysis(&mut self, message: impl Into<String>) {
        if self.is_analyzing() {
            self.phase = AnalysisPhase::Failed(message.into());
        }
    }

    /// Drop an analysis whose operation went away before it resolved. The
    /// pending URL text survives; the preview does not.
    pub fn abandon_analysis(&mut self) {
        if self.is_analyzing() {
            self.image = None;
            self.phase = AnalysisPhase::Idle;
        }
    }

    /// Back to the initial screen. Ignored while analyzing.
    pub fn reset(&mut self) -> bool {
        if self.is_analyzing() {
            return false;
        }
        *self = Self::default();
        true
    }

    pub fn show_url_input(&mut self) {
        self.url_input_visible = true;
    }

    pub fn hide_url_input(&mut self) {
        self.url_input_visible = false;
        self.url_input.clear();
    }

    pub fn set_url_input(&mut self, text: impl Into<String>) {
        self.url_input = text.into();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub text: String,
    pub timestamp: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ChatMessage {
    fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            timestamp: Local::now(),
            is_error: None,
        }
    }

    fn welcome() -> Self {
        Self {
            id: "welcome".into(),
            ..Self::new(MessageRole::Model, locale::CHAT_WELCOME)
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}

/// Identifies one chat turn. Reducer calls carrying a stale ticket are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTicket {
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub open: bool,
    /// Only meaningful while `open`.
    pub minimized: bool,
    pub messages: Vec<ChatMessage>,
    pub input: String,
    /// Incremented on each send.
    #[serde(skip)]
    generation: u64,
    #[serde(skip)]
    in_flight: bool,
    /// Id of the model message receiving deltas for the current turn.
    #[serde(skip)]
    placeholder: Option<String>,
}

impl Default for ChatView {
    fn default() -> Self {
        Self {
            open: false,
            minimized: false,
            messages: vec![ChatMessage::welcome()],
            input: String::new(),
            generation: 0,
            in_flight: false,
            placeholder: None,
        }
    }
}

impl ChatView {
    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
        self.minimized = false;
    }

    pub fn toggle_minimized(&mut self) {
        if self.open {
            self.minimized = !self.minimized;
        }
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Whether the input is disabled because a turn is outstanding.
    pub fn is_turn_in_flight(&self) -> bool {
        self.in_flight
    }

    fn is_current(&self, ticket: &TurnTicket) -> bool {
        self.in_flight && ticket.generation == self.generation
    }

    /// Append the user's message and mark a turn in flight. `None` when the text
    /// is blank or another turn is still outstanding.
    pub fn begin_turn(&mut self, text: &str) -> Option<TurnTicket> {
        if self.in_flight || text.trim().is_empty() {
            return None;
        }
        self.messages.push(ChatMessage::new(MessageRole::User, text));
        self.input.clear();
        self.in_flight = true;
        self.generation += 1;
        self.placeholder = None;
        Some(TurnTicket {
            generation: self.generation,
        })
    }

    /// Insert the empty model message that deltas will fill. Idempotent.
    pub fn open_reply(&mut self, ticket: &TurnTicket) {
        if !self.is_current(ticket) || self.placeholder.is_some() {
            return;
        }
        let message = ChatMessage::new(MessageRole::Model, "");
        self.placeholder = Some(message.id.clone());
        self.messages.push(message);
    }

    fn placeholder_mut(&mut self) -> Option<&mut ChatMessage> {
        let id = self.placeholder.as_deref()?;
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    /// Append one streamed fragment to the turn's model message.
    pub fn apply_delta(&mut self, ticket: &TurnTicket, delta: &str) {
        if !self.is_current(ticket) {
            return;
        }
        self.open_reply(ticket);
        if let Some(message) = self.placeholder_mut() {
            message.text.push_str(delta);
        }
    }

    pub fn complete_turn(&mut self, ticket: &TurnTicket) {
        if self.is_current(ticket) {
            self.in_flight = false;
            self.placeholder = None;
        }
    }

    /// Release the input after a turn whose operation went away mid-flight.
    /// Streamed text stays; an empty reply message is removed.
    pub fn abandon_turn(&mut self, ticket: &TurnTicket) {
        if !self.is_current(ticket) {
            return;
        }
        if let Some(id) = self.placeholder.take() {
            self.messages.retain(|m| m.id != id || !m.text.is_empty());
        }
        self.in_flight = false;
    }

    /// End the turn with an error-flagged message. An empty placeholder becomes
    /// the error message; partial text is kept and the error follows it.
    pub fn fail_turn(&mut self, ticket: &TurnTicket, message: &str) {
        if !self.is_current(ticket) {
            return;
        }
        let reused = match self.placeholder_mut() {
            Some(placeholder) if placeholder.text.is_empty() => {
                placeholder.text = message.to_string();
                placeholder.is_error = Some(true);
                true
            }
            _ => false,
        };
        if !reused {
            let mut error = ChatMessage::new(MessageRole::Model, message);
            error.is_error = Some(true);
            self.messages.push(error);
        }
        self.in_flight = false;
        self.placeholder = None;
    }
}

/// Everything a presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub main: MainView,
    pub chat: ChatView,
}
