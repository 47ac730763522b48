//! Streaming sentence segmenter.
//!
//! Turns a stream of partial text fragments into boundary-terminated sentences
//! that can be synthesized one at a time. Only one context is buffered at a
//! time: text for a new context abandons whatever the previous context left in
//! the buffer.
//!
//! Sentences are delivered through a bounded [`mpsc`] queue. The buffer lock is
//! released before any sentence is handed to the queue, so a slow consumer
//! never blocks inspection or [`SentenceSegmenter::close`].

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Default sentence queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Error types for the segmenter
#[derive(Debug, Error)]
pub enum SegmenterError {
    /// Operation attempted after `close`
    #[error("Segmenter is closed")]
    Closed,

    /// The sentence queue is full; the undelivered sentences are handed back
    #[error("Sentence queue is full ({} sentence(s) not delivered)", pending.len())]
    Backpressure { pending: Vec<Sentence> },

    /// The delimiter set could not be compiled
    #[error("Invalid delimiter set: {0}")]
    InvalidDelimiters(#[from] regex::Error),
}

/// Result type for segmenter operations.
pub type SegmenterResult<T> = Result<T, SegmenterError>;

/// A piece of text produced upstream for one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    pub context_id: String,
    pub text: String,
    /// Last fragment of the context: whatever remains is emitted as a sentence.
    pub is_complete: bool,
}

impl TextFragment {
    pub fn new(context_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            text: text.into(),
            is_complete: false,
        }
    }

    pub fn complete(mut self) -> Self {
        self.is_complete = true;
        self
    }
}

/// A sentence emitted by the segmenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub context_id: String,
    pub text: String,
}

/// What a producer does when the sentence queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for the consumer to make room
    #[default]
    Block,
    /// Return [`SegmenterError::Backpressure`] with the undelivered sentences
    Fail,
}

/// Segmenter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmenterConfig {
    /// Boundary literals, in priority order.
    pub delimiters: Vec<String>,
    pub queue_capacity: usize,
    pub backpressure: BackpressurePolicy,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            delimiters: vec![".".to_string(), "!".to_string(), "?".to_string()],
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure: BackpressurePolicy::Block,
        }
    }
}

/// Observable buffering phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterPhase {
    Idle,
    Accumulating,
}

struct SegmenterState {
    buffer: String,
    current_context: String,
    /// `None` once closed.
    output: Option<mpsc::Sender<Sentence>>,
}

/// Splits streamed text into sentences.
pub struct SentenceSegmenter {
    delimiters: Vec<String>,
    boundary: Option<Regex>,
    policy: BackpressurePolicy,
    state: Mutex<SegmenterState>,
    // Serializes delivery so sentences leave in call order without holding `state`.
    emit_order: tokio::sync::Mutex<()>,
}

impl SentenceSegmenter {
    /// Builds a segmenter and the receiving end of its sentence queue.
    pub fn new(config: &SegmenterConfig) -> SegmenterResult<(Self, mpsc::Receiver<Sentence>)> {
        let delimiters: Vec<String> = config
            .delimiters
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();

        let boundary = if delimiters.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = delimiters.iter().map(|d| regex::escape(d)).collect();
            Some(Regex::new(&format!(r"({})\s*", alternatives.join("|")))?)
        };

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

        let segmenter = Self {
            delimiters,
            boundary,
            policy: config.backpressure,
            state: Mutex::new(SegmenterState {
                buffer: String::new(),
                current_context: String::new(),
                output: Some(tx),
            }),
            emit_order: tokio::sync::Mutex::new(()),
        };

        Ok((segmenter, rx))
    }

    /// Appends a fragment and emits every sentence it completes.
    ///
    /// Returns the number of sentences delivered.
    pub async fn tokenize(&self, fragment: TextFragment) -> SegmenterResult<usize> {
        let _order = self.emit_order.lock().await;

        let (sentences, output) = {
            let mut state = self.state.lock();
            let output = state.output.clone().ok_or(SegmenterError::Closed)?;

            if !state.current_context.is_empty() && state.current_context != fragment.context_id {
                if !state.buffer.is_empty() {
                    debug!(
                        previous_context = %state.current_context,
                        next_context = %fragment.context_id,
                        discarded_bytes = state.buffer.len(),
                        "Context switched, discarding buffered text"
                    );
                }
                state.buffer.clear();
            }
            state.current_context.clone_from(&fragment.context_id);
            state.buffer.push_str(&fragment.text);

            let mut sentences = self.split_sentences(&mut state.buffer, &fragment.context_id);

            if fragment.is_complete {
                let rest = state.buffer.trim();
                if !rest.is_empty() {
                    sentences.push(Sentence {
                        context_id: fragment.context_id.clone(),
                        text: rest.to_string(),
                    });
                }
                state.buffer.clear();
            }

            (sentences, output)
        };

        self.deliver(&output, sentences).await
    }

    /// Emits the buffered remainder as one sentence tagged with `context_id`.
    ///
    /// A flush with nothing buffered is a no-op.
    pub async fn flush(&self, context_id: &str) -> SegmenterResult<usize> {
        let _order = self.emit_order.lock().await;

        let (sentence, output) = {
            let mut state = self.state.lock();
            let output = state.output.clone().ok_or(SegmenterError::Closed)?;
            let text = state.buffer.trim().to_string();
            state.buffer.clear();
            if text.is_empty() {
                return Ok(0);
            }
            (
                Sentence {
                    context_id: context_id.to_string(),
                    text,
                },
                output,
            )
        };

        self.deliver(&output, vec![sentence]).await
    }

    /// Discards buffered text and forgets the current context without ending
    /// the sentence sequence. Returns the number of bytes discarded.
    pub fn reset(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.buffer.len();
        state.buffer.clear();
        state.current_context.clear();
        discarded
    }

    /// Clears all state and ends the sentence sequence. Safe to call repeatedly.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.output.take().is_some() {
            debug!(
                discarded_bytes = state.buffer.len(),
                "Sentence segmenter closed"
            );
        }
        state.buffer.clear();
        state.current_context.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().output.is_none()
    }

    /// Context that currently owns the buffer (empty before the first fragment).
    pub fn current_context(&self) -> String {
        self.state.lock().current_context.clone()
    }

    /// Bytes of text waiting for a boundary.
    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn phase(&self) -> SegmenterPhase {
        if self.state.lock().buffer.is_empty() {
            SegmenterPhase::Idle
        } else {
            SegmenterPhase::Accumulating
        }
    }

    /// Removes every complete sentence from the front of `buffer`.
    fn split_sentences(&self, buffer: &mut String, context_id: &str) -> Vec<Sentence> {
        let Some(boundary) = &self.boundary else {
            return Vec::new();
        };

        let mut sentences = Vec::new();
        let mut consumed = 0;
        while let Some(found) = boundary.find_at(buffer, consumed) {
            let text = buffer[consumed..found.end()].trim();
            if !text.is_empty() {
                sentences.push(Sentence {
                    context_id: context_id.to_string(),
                    text: text.to_string(),
                });
            }
            consumed = found.end();
        }
        buffer.drain(..consumed);
        sentences
    }

    async fn deliver(
        &self,
        output: &mpsc::Sender<Sentence>,
        sentences: Vec<Sentence>,
    ) -> SegmenterResult<usize> {
        let count = sentences.len();
        match self.policy {
            BackpressurePolicy::Block => {
                for sentence in sentences {
                    output
                        .send(sentence)
                        .await
                        .map_err(|_| SegmenterError::Closed)?;
                }
            }
            BackpressurePolicy::Fail => {
                let mut remaining = sentences.into_iter();
                while let Some(sentence) = remaining.next() {
                    match output.try_send(sentence) {
                        Ok(()) => {}
                        Err(TrySendError::Full(sentence)) => {
                            let mut pending = vec![sentence];
                            pending.extend(remaining);
                            return Err(SegmenterError::Backpressure { pending });
                        }
                        Err(TrySendError::Closed(_)) => return Err(SegmenterError::Closed),
                    }
                }
            }
        }
        Ok(count)
    }
}

impl fmt::Debug for SentenceSegmenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SentenceSegmenter")
            .field("delimiters", &self.delimiters)
            .field("policy", &self.policy)
            .field("current_context", &state.current_context)
            .field("buffered_len", &state.buffer.len())
            .field("closed", &state.output.is_none())
            .finish()
    }
}
