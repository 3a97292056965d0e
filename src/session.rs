//! One conversation: message list, conversation state and the in-flight turn.
//!
//! ## Turn lifecycle
//! 1. [`ChatSession::send`] cancels any turn still running, appends the user
//!    message plus one empty assistant message, and spawns the turn task.
//! 2. The task opens the transport, folds events through a
//!    [`Reassembler`], and sends [`TurnEvent`]s to the returned
//!    [`TurnHandle`].
//! 3. The caller feeds each event back through [`ChatSession::apply`], which
//!    edits the open assistant message in place and commits the outcome.
//!
//! Events carry their turn id; events from a superseded or cancelled turn are
//! dropped by `apply`, so at most one assistant message is ever open.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::normalize::pretty_raw;
use crate::providers::{Sampling, TurnRequest};
use crate::reassembly::{PairOrder, Reassembler, TurnResult, Update};
use crate::state::ConversationState;
use crate::transport::Transport;
use crate::{Message, Role};

/// Something that happened during turn `turn`.
#[derive(Debug)]
pub struct TurnEvent {
    pub turn: u64,
    pub update: TurnUpdate,
}

#[derive(Debug)]
pub enum TurnUpdate {
    /// Current rendering of the reply.
    Text(String),
    Progress(Value),
    Finished(Result<TurnResult, ChatError>),
}

/// Receiving end of one turn's events.
#[derive(Debug)]
pub struct TurnHandle {
    id: u64,
    rx: mpsc::UnboundedReceiver<TurnEvent>,
}

impl TurnHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the turn task is gone.
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<TurnEvent> {
        UnboundedReceiverStream::new(self.rx)
    }
}

#[derive(Debug)]
struct OpenTurn {
    id: u64,
    task: JoinHandle<()>,
}

pub struct ChatSession {
    transport: Transport,
    sampling: Sampling,
    pair_order: PairOrder,
    greeting: String,
    state: ConversationState,
    messages: Vec<Message>,
    session_hash: String,
    open_turn: Option<OpenTurn>,
    turn_counter: u64,
}

impl ChatSession {
    /// New conversation holding only the greeting.
    pub fn new(transport: Transport, config: &ClientConfig) -> Self {
        ChatSession {
            transport,
            sampling: config.sampling.clone(),
            pair_order: config.pair_order,
            greeting: config.greeting.clone(),
            state: ConversationState::new(),
            messages: vec![Message::assistant(config.greeting.clone())],
            session_hash: new_session_hash(),
            open_turn: None,
            turn_counter: 0,
        }
    }

    /// Continue from a restored message list. Conversation state always
    /// starts empty.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        if !messages.is_empty() {
            self.messages = messages;
        }
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn is_busy(&self) -> bool {
        self.open_turn.is_some()
    }

    /// Start a turn. Must be called from within a Tokio runtime.
    pub fn send(&mut self, user_text: &str) -> Result<TurnHandle, ChatError> {
        if user_text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }
        self.cancel();

        let request = TurnRequest {
            user_text: user_text.to_string(),
            state: self.state.as_wire(),
            history: self.history(),
            sampling: self.sampling.clone(),
            session_hash: self.session_hash.clone(),
        };
        self.messages.push(Message::user(user_text));
        self.messages.push(Message::assistant(String::new()));

        self.turn_counter += 1;
        let id = self.turn_counter;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(turn_task(
            id,
            self.transport.clone(),
            request,
            self.pair_order,
            tx,
        ));
        debug!(turn = id, transport = %self.transport.kind(), "turn started");
        self.open_turn = Some(OpenTurn { id, task });
        Ok(TurnHandle { id, rx })
    }

    /// Apply a turn event to the message list.
    ///
    /// Returns the outcome once the turn finishes: the reply text, or the
    /// error that ended the turn. On failure the open assistant message shows
    /// the pretty-printed payload for [`ChatError::Shape`] and the error's
    /// [`ChatError::user_notice`] otherwise.
    pub fn apply(&mut self, event: TurnEvent) -> Option<Result<String, ChatError>> {
        match &self.open_turn {
            Some(open) if open.id == event.turn => {}
            _ => {
                debug!(turn = event.turn, "dropping event from a stale turn");
                return None;
            }
        }

        match event.update {
            TurnUpdate::Text(text) => {
                if let Some(reply) = self.open_reply() {
                    reply.content = text;
                }
                None
            }
            TurnUpdate::Progress(_) => None,
            TurnUpdate::Finished(outcome) => {
                self.open_turn = None;
                let outcome = match outcome {
                    Ok(result) => {
                        if let Some(next) = result.updated_state {
                            self.state.replace(next);
                        }
                        let text = result.text.unwrap_or_default();
                        self.set_reply(text.clone());
                        Ok(text)
                    }
                    Err(ChatError::Shape { raw }) => {
                        self.set_reply(pretty_raw(&raw));
                        Err(ChatError::Shape { raw })
                    }
                    Err(e) => {
                        self.set_reply(e.user_notice().to_string());
                        Err(e)
                    }
                };
                info!(turn = event.turn, ok = outcome.is_ok(), "turn finished");
                Some(outcome)
            }
        }
    }

    /// Send and drive a turn to completion, calling `on_text` with each
    /// rendering of the reply.
    pub async fn run_turn(
        &mut self,
        user_text: &str,
        mut on_text: impl FnMut(&str),
    ) -> Result<String, ChatError> {
        let mut events = self.send(user_text)?.into_stream();
        while let Some(event) = events.next().await {
            if let TurnUpdate::Text(text) = &event.update {
                on_text(text);
            }
            if let Some(outcome) = self.apply(event) {
                return outcome;
            }
        }
        Err(ChatError::Cancelled)
    }

    /// Abort the in-flight turn, if any, and drop its partial reply.
    ///
    /// Returns whether a turn was cancelled.
    pub fn cancel(&mut self) -> bool {
        let Some(open) = self.open_turn.take() else {
            return false;
        };
        open.task.abort();
        if matches!(self.messages.last(), Some(m) if m.role == Role::Assistant) {
            self.messages.pop();
        }
        info!(turn = open.id, "turn cancelled");
        true
    }

    /// Start over: only the greeting remains and the state is empty.
    pub fn reset(&mut self) {
        self.cancel();
        self.messages = vec![Message::assistant(self.greeting.clone())];
        self.state.reset();
        self.session_hash = new_session_hash();
        debug!("conversation reset");
    }

    fn open_reply(&mut self) -> Option<&mut Message> {
        self.messages
            .last_mut()
            .filter(|m| m.role == Role::Assistant)
    }

    fn set_reply(&mut self, content: String) {
        if let Some(reply) = self.open_reply() {
            reply.content = content;
        }
    }

    /// Completed `(user, assistant)` exchanges, oldest first.
    fn history(&self) -> Vec<(String, String)> {
        self.messages
            .windows(2)
            .filter(|w| w[0].role == Role::User && w[1].role == Role::Assistant)
            .map(|w| (w[0].content.clone(), w[1].content.clone()))
            .collect()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(open) = self.open_turn.take() {
            open.task.abort();
        }
    }
}

fn new_session_hash() -> String {
    Uuid::new_v4().simple().to_string()
}

async fn turn_task(
    turn: u64,
    transport: Transport,
    request: TurnRequest,
    order: PairOrder,
    tx: mpsc::UnboundedSender<TurnEvent>,
) {
    let outcome = drive(turn, &transport, &request, order, &tx).await;
    let _ = tx.send(TurnEvent {
        turn,
        update: TurnUpdate::Finished(outcome),
    });
}

async fn drive(
    turn: u64,
    transport: &Transport,
    request: &TurnRequest,
    order: PairOrder,
    tx: &mpsc::UnboundedSender<TurnEvent>,
) -> Result<TurnResult, ChatError> {
    let mut events = transport.open(request).await?;
    let mut reassembler = Reassembler::new(order);
    while let Some(event) = events.next().await {
        let update = match reassembler.push(event)? {
            Some(Update::Text(text)) => TurnUpdate::Text(text),
            Some(Update::Progress(status)) => TurnUpdate::Progress(status),
            None => continue,
        };
        if tx.send(TurnEvent { turn, update }).is_err() {
            return Err(ChatError::Cancelled);
        }
    }
    reassembler.finish().checked()
}
