//! Application context: the single owner of the chat session, the clients and
//! the view state. A presentation layer drives it and renders `snapshot()`.
//!
//! The state lock is only held for a reducer call, never across an `.await`,
//! so operations may run concurrently from several tasks; overlapping actions
//! are turned away by the view-state gates, not by the lock.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::acquire::{HttpFetcher, ImageAcquirer, ImageFetcher, ImageSource};
use crate::backend::{GeminiClient, GenerativeBackend};
use crate::chat::ChatSession;
use crate::config::Config;
use crate::error::ChatTurnError;
use crate::extract::PlantAnalyzer;
use crate::locale;
use crate::schema::PlantData;
use crate::state::{TurnTicket, ViewState};

/// Whether a user action was taken up or turned away by a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Accepted,
    Ignored,
}

/// Applies `on_drop` to the view state unless disarmed first. An operation
/// future dropped at an `.await` (timeout, `select!`, task abort) must not
/// leave its gate closed.
struct AbandonOnDrop<'a, F: FnOnce(&mut ViewState)> {
    state: &'a Mutex<ViewState>,
    on_drop: Option<F>,
}

impl<'a, F: FnOnce(&mut ViewState)> AbandonOnDrop<'a, F> {
    fn new(state: &'a Mutex<ViewState>, on_drop: F) -> Self {
        Self {
            state,
            on_drop: Some(on_drop),
        }
    }

    fn disarm(mut self) {
        self.on_drop = None;
    }
}

impl<F: FnOnce(&mut ViewState)> Drop for AbandonOnDrop<'_, F> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            debug!("Operation dropped before it resolved; abandoning");
            on_drop(&mut *self.state.lock());
        }
    }
}

pub struct Companion {
    acquirer: ImageAcquirer,
    analyzer: PlantAnalyzer,
    chat: ChatSession,
    state: Mutex<ViewState>,
}

impl Companion {
    /// Creates the chat session up front, whether or not the panel is ever opened.
    pub fn new(backend: Arc<dyn GenerativeBackend>, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            acquirer: ImageAcquirer::new(fetcher),
            analyzer: PlantAnalyzer::new(backend.clone()),
            chat: ChatSession::new(backend, locale::ASSISTANT_PERSONA),
            state: Mutex::new(ViewState::default()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        if config.api.key.is_empty() {
            warn!("No API key configured; identification and chat will fail until one is set");
        }
        info!(model = %config.api.model, "Starting plant companion");
        Self::new(
            Arc::new(GeminiClient::new(&config.api)),
            Arc::new(HttpFetcher::new(&config.fetch)),
        )
    }

    pub fn snapshot(&self) -> ViewState {
        self.state.lock().clone()
    }

    // --- Main flow ---

    /// Acquire an image and identify the plant in it. Ignored while another
    /// analysis is running. Failures end in `HasError`, never in a returned error.
    /// Dropping the future before it resolves abandons the analysis.
    pub async fn submit_image(&self, source: ImageSource) -> Dispatch {
        let started = self.state.lock().main.begin_analysis(source.initial_preview());
        if !started {
            debug!(?source, "Analysis already running, submission ignored");
            return Dispatch::Ignored;
        }

        let pending = AbandonOnDrop::new(&self.state, |view: &mut ViewState| {
            view.main.abandon_analysis()
        });
        let outcome = self.identify(&source).await;
        pending.disarm();

        let mut state = self.state.lock();
        match outcome {
            Ok(plant) => state.main.finish_analysis(plant),
            Err(message) => state.main.fail_analysis(message),
        }
        Dispatch::Accepted
    }

    /// Acquire, show the preview, then analyze. Errors come back as user messages.
    async fn identify(&self, source: &ImageSource) -> Result<PlantData, &'static str> {
        let image = self.acquirer.acquire(source).await.map_err(|e| {
            warn!(error = %e, "Image acquisition failed");
            e.user_message()
        })?;
        self.state.lock().main.set_preview(image.preview());

        self.analyzer.analyze(image.payload()).await.map_err(|e| {
            warn!(error = %e, "Plant identification failed");
            e.user_message()
        })
    }

    pub async fn submit_file(&self, path: impl Into<PathBuf>) -> Dispatch {
        self.submit_image(ImageSource::File(path.into())).await
    }

    /// Submit the pending URL text. Blank text is ignored.
    pub async fn submit_url(&self) -> Dispatch {
        let url = self.state.lock().main.url_input.trim().to_string();
        if url.is_empty() {
            return Dispatch::Ignored;
        }
        self.submit_image(ImageSource::Url(url)).await
    }

    pub fn reset(&self) -> Dispatch {
        if self.state.lock().main.reset() {
            Dispatch::Accepted
        } else {
            Dispatch::Ignored
        }
    }

    pub fn show_url_input(&self) {
        self.state.lock().main.show_url_input();
    }

    pub fn hide_url_input(&self) {
        self.state.lock().main.hide_url_input();
    }

    pub fn set_url_input(&self, text: impl Into<String>) {
        self.state.lock().main.set_url_input(text);
    }

    // --- Chat panel ---

    pub fn open_chat(&self) {
        self.state.lock().chat.open();
    }

    pub fn close_chat(&self) {
        self.state.lock().chat.close();
    }

    pub fn toggle_chat_minimized(&self) {
        self.state.lock().chat.toggle_minimized();
    }

    pub fn set_chat_input(&self, text: impl Into<String>) {
        self.state.lock().chat.set_input(text);
    }

    /// Send the pending chat text.
    pub async fn send_chat_input(&self) -> Dispatch {
        let text = self.state.lock().chat.input.clone();
        self.send_chat(&text).await
    }

    /// Run one chat turn to its end. Ignored for blank text or while a turn is
    /// in flight. Failures end as an error-flagged message in the transcript.
    /// Dropping the future mid-turn abandons the turn and re-enables input.
    pub async fn send_chat(&self, text: &str) -> Dispatch {
        let Some(ticket) = self.state.lock().chat.begin_turn(text) else {
            debug!("Chat send ignored");
            return Dispatch::Ignored;
        };

        let pending = AbandonOnDrop::new(&self.state, {
            let ticket = ticket.clone();
            move |view: &mut ViewState| view.chat.abandon_turn(&ticket)
        });
        let result = self.stream_turn(&ticket, text).await;
        pending.disarm();

        let mut state = self.state.lock();
        match result {
            Ok(()) => state.chat.complete_turn(&ticket),
            Err(e) => {
                warn!(error = %e, "Chat turn failed");
                state.chat.fail_turn(&ticket, e.user_message());
            }
        }
        Dispatch::Accepted
    }

    /// Fold the turn's deltas into its placeholder message, in arrival order.
    async fn stream_turn(&self, ticket: &TurnTicket, text: &str) -> Result<(), ChatTurnError> {
        let mut deltas = self.chat.send_turn(text).await?;
        self.state.lock().chat.open_reply(ticket);
        while let Some(delta) = deltas.next().await {
            let delta = delta?;
            self.state.lock().chat.apply_delta(ticket, &delta);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::acquire::fake::TableFetcher;
    use crate::acquire::PNG_1X1;
    use crate::backend::fake::{ScriptedBackend, StreamScript};
    use crate::error::ProviderError;
    use crate::schema::sample_plant;
    use crate::state::{MainState, MainView, MessageRole};

    const LEAF_URL: &str = "https://plants.example/leaf.png";
    const HOTLINK_URL: &str = "https://hotlink.example/leaf.png";

    fn companion() -> (Arc<ScriptedBackend>, Arc<Companion>) {
        let backend = Arc::new(ScriptedBackend::default());
        let fetcher = TableFetcher::default();
        fetcher.insert(LEAF_URL, 200, Some("image/png"), PNG_1X1);
        fetcher.insert(HOTLINK_URL, 403, Some("text/html"), b"denied");
        let app = Companion::new(backend.clone(), Arc::new(fetcher));
        (backend, Arc::new(app))
    }

    fn plant_reply() -> Result<Option<String>, ProviderError> {
        Ok(Some(serde_json::to_string(&sample_plant()).unwrap()))
    }

    /// Yield to spawned tasks until `ready` holds.
    async fn wait_until(app: &Companion, ready: impl Fn(&ViewState) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !ready(&app.snapshot()) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("state never reached");
    }

    #[tokio::test]
    async fn url_submission_reaches_result() {
        let (backend, app) = companion();
        backend.push_reply(plant_reply());

        app.show_url_input();
        app.set_url_input(format!("  {LEAF_URL} "));
        assert_eq!(app.submit_url().await, Dispatch::Accepted);

        let state = app.snapshot();
        assert_eq!(state.main.state(), MainState::HasResult);
        assert_eq!(state.main.result(), Some(&sample_plant()));
        assert!(state.main.image.unwrap().starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn file_submission_sends_stripped_payload() {
        let (backend, app) = companion();
        backend.push_reply(plant_reply());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PNG_1X1).unwrap();

        app.submit_file(file.path()).await;

        let request = &backend.requests()[0];
        let crate::backend::Part::InlineData { data, .. } = &request.contents[0].parts[0] else {
            panic!("image part first");
        };
        assert!(!data.starts_with("data:"));
        let preview = app.snapshot().main.image.unwrap();
        assert_eq!(preview.split_once(',').unwrap().1, data);
    }

    #[tokio::test]
    async fn cross_origin_url_lands_in_error_with_remediation() {
        let (backend, app) = companion();
        app.set_url_input(HOTLINK_URL);
        app.submit_url().await;

        let state = app.snapshot();
        assert_eq!(state.main.state(), MainState::HasError);
        assert_eq!(state.main.error(), Some(locale::URL_CROSS_ORIGIN));
        assert!(backend.requests().is_empty(), "nothing sent to the model");
    }

    #[tokio::test]
    async fn unknown_url_gets_generic_fetch_message() {
        let (_backend, app) = companion();
        app.set_url_input("https://gone.example/leaf.png");
        app.submit_url().await;
        assert_eq!(app.snapshot().main.error(), Some(locale::URL_FETCH_FAILED));
    }

    #[tokio::test]
    async fn malformed_response_collapses_to_generic_message() {
        let (backend, app) = companion();
        backend.push_reply(Ok(Some("{\"name\":\"פיקוס\"}".into())));
        app.set_url_input(LEAF_URL);
        app.submit_url().await;

        let state = app.snapshot();
        assert_eq!(state.main.error(), Some(locale::IDENTIFY_FAILED));
        assert_eq!(state.main.result(), None);
    }

    #[tokio::test]
    async fn blank_url_is_ignored() {
        let (_backend, app) = companion();
        app.set_url_input("   ");
        assert_eq!(app.submit_url().await, Dispatch::Ignored);
        assert_eq!(app.snapshot().main.state(), MainState::NoImage);
    }

    #[tokio::test]
    async fn reset_after_result_and_error_restores_initial_view() {
        let (backend, app) = companion();
        backend.push_reply(plant_reply());
        app.set_url_input(LEAF_URL);
        app.submit_url().await;
        assert_eq!(app.reset(), Dispatch::Accepted);
        assert_eq!(app.snapshot().main, MainView::default());

        app.show_url_input();
        app.set_url_input(HOTLINK_URL);
        app.submit_url().await;
        assert_eq!(app.snapshot().main.state(), MainState::HasError);
        assert_eq!(app.reset(), Dispatch::Accepted);
        assert_eq!(app.snapshot().main, MainView::default());
    }

    #[tokio::test]
    async fn analysis_gates_further_submissions() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_reply(plant_reply());
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let gated = GatedBackend {
            inner: backend.clone(),
            gate: Mutex::new(Some(gate)),
        };
        let fetcher = TableFetcher::default();
        fetcher.insert(LEAF_URL, 200, Some("image/png"), PNG_1X1);
        let app = Arc::new(Companion::new(Arc::new(gated), Arc::new(fetcher)));

        app.set_url_input(LEAF_URL);
        let first = tokio::spawn({
            let app = app.clone();
            async move { app.submit_url().await }
        });
        wait_until(&app, |s| s.main.is_analyzing()).await;

        assert_eq!(app.submit_url().await, Dispatch::Ignored);
        assert_eq!(app.reset(), Dispatch::Ignored);
        assert_eq!(app.snapshot().main.state(), MainState::Analyzing);

        release.send(()).unwrap();
        assert_eq!(first.await.unwrap(), Dispatch::Accepted);
        assert_eq!(app.snapshot().main.state(), MainState::HasResult);
        assert_eq!(backend.requests().len(), 1);
    }

    /// Holds `generate` until the test releases it.
    struct GatedBackend {
        inner: Arc<ScriptedBackend>,
        gate: Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
    }

    #[async_trait::async_trait]
    impl GenerativeBackend for GatedBackend {
        async fn generate(
            &self,
            request: &crate::backend::GenerateRequest,
        ) -> Result<Option<String>, ProviderError> {
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.inner.generate(request).await
        }

        async fn stream(
            &self,
            request: &crate::backend::GenerateRequest,
        ) -> Result<crate::backend::DeltaStream, ProviderError> {
            self.inner.stream(request).await
        }
    }

    #[tokio::test]
    async fn cancelled_analysis_can_be_reset_and_resubmitted() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_reply(plant_reply());
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let gated = GatedBackend {
            inner: backend.clone(),
            gate: Mutex::new(Some(gate)),
        };
        let fetcher = TableFetcher::default();
        fetcher.insert(LEAF_URL, 200, Some("image/png"), PNG_1X1);
        let app = Companion::new(Arc::new(gated), Arc::new(fetcher));

        app.set_url_input(LEAF_URL);
        let cancelled = tokio::time::timeout(Duration::from_millis(50), app.submit_url()).await;
        assert!(cancelled.is_err(), "analysis should still be waiting on the model");

        let state = app.snapshot();
        assert_eq!(state.main.state(), MainState::NoImage);
        assert_eq!(state.main.image, None);
        assert_eq!(state.main.url_input, LEAF_URL);
        assert_eq!(app.reset(), Dispatch::Accepted);

        app.set_url_input(LEAF_URL);
        assert_eq!(app.submit_url().await, Dispatch::Accepted);
        assert_eq!(app.snapshot().main.state(), MainState::HasResult);
        drop(release);
    }

    #[tokio::test]
    async fn streamed_reply_is_one_message() {
        let (backend, app) = companion();
        backend.push_deltas(&["שלום", " עולם"]);

        app.open_chat();
        app.set_chat_input("מה מצב הפיקוס?");
        assert_eq!(app.send_chat_input().await, Dispatch::Accepted);

        let chat = app.snapshot().chat;
        assert_eq!(chat.input, "");
        assert_eq!(chat.messages.len(), 3);
        assert_eq!(chat.messages[1].role, MessageRole::User);
        assert_eq!(chat.messages[1].text, "מה מצב הפיקוס?");
        assert_eq!(chat.messages[2].role, MessageRole::Model);
        assert_eq!(chat.messages[2].text, "שלום עולם");
        assert!(!chat.is_turn_in_flight());
    }

    #[tokio::test]
    async fn send_while_streaming_is_ignored() {
        let (backend, app) = companion();
        let tx = backend.push_channel();

        let first = tokio::spawn({
            let app = app.clone();
            async move { app.send_chat("first").await }
        });
        tx.send(Ok("שלום".into())).unwrap();
        wait_until(&app, |s| s.chat.messages.last().is_some_and(|m| m.text == "שלום")).await;

        let state = app.snapshot();
        assert!(state.chat.is_turn_in_flight());
        assert_eq!(app.send_chat("second").await, Dispatch::Ignored);

        tx.send(Ok(" עולם".into())).unwrap();
        drop(tx);
        assert_eq!(first.await.unwrap(), Dispatch::Accepted);

        let chat = app.snapshot().chat;
        let texts: Vec<&str> = chat.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec![locale::CHAT_WELCOME, "first", "שלום עולם"]);
        assert_eq!(backend.requests().len(), 1);

        backend.push_deltas(&["ok"]);
        assert_eq!(app.send_chat("second").await, Dispatch::Accepted);
    }

    #[tokio::test]
    async fn cancelled_turn_leaves_chat_usable() {
        let (backend, app) = companion();
        let tx = backend.push_channel();
        tx.send(Ok("שלום".into())).unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(50), app.send_chat("first")).await;
        assert!(cancelled.is_err(), "stream never finishes on its own");

        let chat = app.snapshot().chat;
        assert!(!chat.is_turn_in_flight());
        assert_eq!(app.chat.phase(), crate::chat::TurnPhase::Idle);
        assert_eq!(chat.messages.last().unwrap().text, "שלום");

        backend.push_deltas(&["ok"]);
        assert_eq!(app.send_chat("second").await, Dispatch::Accepted);

        let chat = app.snapshot().chat;
        let texts: Vec<&str> = chat.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec![locale::CHAT_WELCOME, "first", "שלום", "second", "ok"]);
    }

    #[tokio::test]
    async fn chat_failure_is_flagged_and_session_survives() {
        let (backend, app) = companion();
        backend.push_stream(StreamScript::Fail(ProviderError::MissingApiKey));
        backend.push_deltas(&["עכשיו זה עובד"]);

        app.send_chat("hello").await;
        let chat = app.snapshot().chat;
        let last = chat.messages.last().unwrap();
        assert_eq!(last.text, locale::CHAT_FAILED);
        assert!(last.is_error());

        app.send_chat("hello again").await;
        let chat = app.snapshot().chat;
        assert_eq!(chat.messages.last().unwrap().text, "עכשיו זה עובד");
        assert!(!chat.messages.last().unwrap().is_error());
    }

    #[tokio::test]
    async fn chat_and_main_flow_are_independent() {
        let (backend, app) = companion();
        backend.push_reply(plant_reply());
        app.open_chat();
        app.toggle_chat_minimized();

        app.set_url_input(LEAF_URL);
        app.submit_url().await;
        app.reset();

        let state = app.snapshot();
        assert!(state.chat.open);
        assert!(state.chat.minimized);

        app.close_chat();
        assert_eq!(app.snapshot().main, MainView::default());
    }
}
