//! Long-lived chat session with a fixed persona.
//!
//! A session allows one outstanding turn at a time. The turn walks
//! `Idle -> Sending -> Streaming -> Idle`; completed turns are appended to the
//! history sent with later turns, failed or abandoned turns are not.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{DeltaStream, GenerateRequest, GenerativeBackend, Turn};
use crate::error::ChatTurnError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Sending,
    Streaming,
}

struct SessionInner {
    phase: TurnPhase,
    history: Vec<Turn>,
}

pub struct ChatSession {
    backend: Arc<dyn GenerativeBackend>,
    persona: String,
    inner: Arc<Mutex<SessionInner>>,
}

impl ChatSession {
    /// The persona is fixed for the session's lifetime.
    pub fn new(backend: Arc<dyn GenerativeBackend>, persona: impl Into<String>) -> Self {
        Self {
            backend,
            persona: persona.into(),
            inner: Arc::new(Mutex::new(SessionInner {
                phase: TurnPhase::Idle,
                history: Vec::new(),
            })),
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.inner.lock().phase
    }

    /// Number of completed turns carried as context.
    pub fn completed_turns(&self) -> usize {
        self.inner.lock().history.len() / 2
    }

    /// Start a turn. Rejected with `TurnInFlight` while another turn is outstanding.
    pub async fn send_turn(&self, text: &str) -> Result<TurnStream, ChatTurnError> {
        let (guard, contents) = {
            let mut inner = self.inner.lock();
            if inner.phase != TurnPhase::Idle {
                return Err(ChatTurnError::TurnInFlight);
            }
            inner.phase = TurnPhase::Sending;
            let mut contents = inner.history.clone();
            contents.push(Turn::user_text(text));
            (TurnGuard { inner: self.inner.clone() }, contents)
        };

        let request = GenerateRequest {
            system_instruction: Some(self.persona.clone()),
            contents,
            response_schema: None,
        };
        debug!(turns = request.contents.len(), "Sending chat turn");

        // On error the guard drops here and the session is idle again.
        let deltas = self.backend.stream(&request).await?;
        self.inner.lock().phase = TurnPhase::Streaming;

        Ok(TurnStream {
            deltas,
            user_text: text.to_string(),
            reply: String::new(),
            guard: Some(guard),
        })
    }
}

/// Returns the session to `Idle` when dropped, whatever state the turn ended in.
struct TurnGuard {
    inner: Arc<Mutex<SessionInner>>,
}

impl TurnGuard {
    fn commit(self, user_text: String, reply: String) {
        let mut inner = self.inner.lock();
        inner.history.push(Turn::user_text(user_text));
        inner.history.push(Turn::model_text(reply));
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.inner.lock().phase = TurnPhase::Idle;
    }
}

/// Text deltas of one turn, in arrival order.
///
/// Ends after the provider signals completion, or right after the first error.
/// Dropping it early abandons the turn without recording it.
pub struct TurnStream {
    deltas: DeltaStream,
    user_text: String,
    reply: String,
    guard: Option<TurnGuard>,
}

impl Stream for TurnStream {
    type Item = Result<String, ChatTurnError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.guard.is_none() {
            return Poll::Ready(None);
        }

        match this.deltas.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(delta))) => {
                this.reply.push_str(&delta);
                Poll::Ready(Some(Ok(delta)))
            }
            Poll::Ready(Some(Err(e))) => {
                warn!(error = %e, "Chat stream failed");
                this.guard = None;
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                if let Some(guard) = this.guard.take() {
                    let reply = std::mem::take(&mut this.reply);
                    if reply.is_empty() {
                        warn!("Chat turn completed without text; not recorded");
                    } else {
                        info!(
                            target: "transcript",
                            user = %this.user_text,
                            model = %reply,
                            "Chat exchange"
                        );
                        guard.commit(std::mem::take(&mut this.user_text), reply);
                    }
                }
                Poll::Ready(None)
            }
        }
    }
}
