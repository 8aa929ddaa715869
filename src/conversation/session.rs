//! Stateful multi-turn conversations.
//!
//! A [`Conversation`] owns its turn counter and continuation token. Each turn
//! spawns one agent process; the first successful turn makes the
//! conversation id the continuation token, so later turns resume the same
//! agent-side session instead of starting fresh.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use uuid::Uuid;

use super::{ConversationState, TurnStateMachine, TurnStats};
use crate::cli::{OutputStream, ProtocolUnit, StreamRecord};
use crate::client::{Dispatcher, Response};
use crate::config::{ClientConfig, OutputFormat};
use crate::error::{Error, Result};

/// A conversation with the agent.
///
/// Not meant for concurrent use: every turn takes `&mut self`, and a
/// streaming turn keeps the conversation borrowed until it is dropped.
#[derive(Debug)]
pub struct Conversation {
    id: String,
    dispatcher: Dispatcher,
    turns: TurnStateMachine,
    continuation: Option<String>,
}

impl Conversation {
    pub(crate) fn new(dispatcher: Dispatcher, id: Option<String>) -> Self {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let turns = TurnStateMachine::new(dispatcher.config().max_turns);
        tracing::debug!(
            conversation_id = %id,
            max_turns = ?turns.max_turns(),
            "Conversation started"
        );
        Self {
            id,
            dispatcher,
            turns,
            continuation: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Turns dispatched so far, failed ones included.
    #[must_use]
    pub fn turn_count(&self) -> u32 {
        self.turns.turn_count()
    }

    #[must_use]
    pub fn max_turns(&self) -> Option<u32> {
        self.turns.max_turns()
    }

    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.turns.state()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ConversationState::Closed
    }

    #[must_use]
    pub fn stats(&self) -> TurnStats {
        self.turns.stats()
    }

    /// The token passed to the agent to resume this conversation, once set.
    #[must_use]
    pub fn continuation_token(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        self.config().output_format
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        self.dispatcher.config()
    }

    /// Send a prompt and wait for the complete response.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the conversation is closed or the
    /// prompt is invalid, and any error the turn itself produces.
    pub async fn send(&mut self, prompt: &str) -> Result<Response> {
        let format = self.output_format();
        let turn = self.dispatch(prompt)?;
        Response::collect(format, turn).await
    }

    /// Send a prompt and decode the response as it arrives.
    ///
    /// The turn completes when the returned stream is exhausted or dropped.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send) for errors raised before spawning.
    pub fn stream(&mut self, prompt: &str) -> Result<TurnStream<'_>> {
        self.dispatch(prompt)
    }

    /// Send a prompt and stream the agent's records.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` unless the output format is `stream-json`,
    /// plus everything [`stream`](Self::stream) returns.
    pub fn stream_json(&mut self, prompt: &str) -> Result<RecordStream<'_>> {
        if self.output_format() != OutputFormat::StreamJson {
            return Err(Error::validation(
                "Output format must be stream-json for stream_json",
            ));
        }
        Ok(RecordStream {
            turn: self.dispatch(prompt)?,
        })
    }

    fn dispatch(&mut self, prompt: &str) -> Result<TurnStream<'_>> {
        self.ensure_open()?;

        let builder = self.dispatcher.command(prompt).conversation_id(&self.id);
        let builder = match &self.continuation {
            Some(token) => builder.resume(token),
            None => builder.session_id(&self.id),
        };
        let invocation = self.dispatcher.invocation(&builder)?;

        let turn = self.turns.begin().map_err(|state| self.closed_error(state))?;
        tracing::debug!(
            conversation_id = %self.id,
            turn,
            resume = self.continuation.is_some(),
            "Dispatching conversation turn"
        );

        match self.dispatcher.spawn(&invocation) {
            Ok(output) => Ok(TurnStream {
                conversation: self,
                output,
                exhausted: false,
                failed: false,
            }),
            Err(e) => {
                self.finish_turn(false);
                Err(e)
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.turns.state() {
            ConversationState::Idle if !self.turns.exhausted() => Ok(()),
            state => Err(self.closed_error(state)),
        }
    }

    fn closed_error(&self, state: ConversationState) -> Error {
        match (state, self.turns.max_turns()) {
            (ConversationState::Running, _) => Error::validation("A turn is already in progress"),
            (_, Some(max)) => Error::validation(format!(
                "Conversation has reached the maximum number of turns: {max}"
            )),
            (_, None) => Error::validation("Conversation is closed"),
        }
    }

    fn finish_turn(&mut self, success: bool) {
        if success && self.continuation.is_none() {
            self.continuation = Some(self.id.clone());
        }
        self.turns.complete(success);
        tracing::debug!(
            conversation_id = %self.id,
            success,
            state = ?self.turns.state(),
            "Conversation turn finished"
        );
    }
}

/// The output of one conversation turn.
///
/// Yields [`ProtocolUnit`]s in the order the agent produced them. The turn
/// counts as successful only if the stream is read to the end without an
/// error; dropping it early terminates the agent.
#[derive(Debug)]
pub struct TurnStream<'a> {
    conversation: &'a mut Conversation,
    output: OutputStream,
    exhausted: bool,
    failed: bool,
}

impl TurnStream<'_> {
    /// The conversation this turn belongs to.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        self.conversation.id()
    }

    /// The 1-based number of this turn.
    #[must_use]
    pub fn turn(&self) -> u32 {
        self.conversation.turn_count()
    }
}

impl Stream for TurnStream<'_> {
    type Item = Result<ProtocolUnit>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.exhausted {
            return Poll::Ready(None);
        }
        let item = ready!(this.output.poll_next_unpin(cx));
        match &item {
            None => this.exhausted = true,
            Some(Err(_)) => this.failed = true,
            Some(Ok(_)) => {}
        }
        Poll::Ready(item)
    }
}

impl Drop for TurnStream<'_> {
    fn drop(&mut self) {
        self.conversation
            .finish_turn(self.exhausted && !self.failed);
    }
}

/// Records of one `stream-json` conversation turn.
#[derive(Debug)]
pub struct RecordStream<'a> {
    turn: TurnStream<'a>,
}

impl Stream for RecordStream<'_> {
    type Item = Result<StreamRecord>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(self.turn.poll_next_unpin(cx)) {
                Some(Ok(ProtocolUnit::Record(record))) => return Poll::Ready(Some(Ok(record))),
                Some(Ok(ProtocolUnit::Text(_))) => {}
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => return Poll::Ready(None),
            }
        }
    }
}
