//! Decoding the agent's stdout into protocol units.
//!
//! The decoding strategy is picked once from the [`OutputFormat`]:
//!
//! - `text`: fragments are passed through as they arrive.
//! - `json`: the whole output is buffered and parsed as one document at EOF.
//! - `stream-json`: newline-delimited records. The trailing partial line of
//!   each read is carried over, so a record split across reads is only
//!   parsed once it is complete.
//!
//! [`OutputStream`] ties a [`Decoder`] to a [`RunningProcess`] and exposes
//! the result as a lazy `Stream`. Dropping it terminates the process.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::process::READ_BUFFER_SIZE;
use super::{ClaudeEvent, RunningProcess};
use crate::config::{MalformedLinePolicy, OutputFormat};
use crate::error::{Error, ExecutionError, Result};

/// A structured record emitted by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamRecord(serde_json::Value);

impl StreamRecord {
    /// Wrap a JSON value.
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// The `type` discriminant, if present.
    #[must_use]
    pub fn record_type(&self) -> Option<&str> {
        self.get("type").and_then(serde_json::Value::as_str)
    }

    /// The `subtype` field, if present.
    #[must_use]
    pub fn subtype(&self) -> Option<&str> {
        self.get("subtype").and_then(serde_json::Value::as_str)
    }

    /// The agent session id, if the record carries one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.get("session_id").and_then(serde_json::Value::as_str)
    }

    /// Look up a top-level field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Interpret the record as a typed [`ClaudeEvent`].
    ///
    /// # Errors
    ///
    /// Returns an error if a known record type is missing required fields.
    pub fn event(&self) -> serde_json::Result<ClaudeEvent> {
        serde_json::from_value(self.0.clone())
    }
}

impl fmt::Display for StreamRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of decoded agent output.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolUnit {
    /// A text fragment (text mode).
    Text(String),
    /// A structured record (JSON modes).
    Record(StreamRecord),
}

impl ProtocolUnit {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Record(_) => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&StreamRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn into_record(self) -> Option<StreamRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Text(_) => None,
        }
    }
}

/// Failure to decode agent output.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DecodeError {
    /// What went wrong.
    pub message: String,
    /// The offending raw line, for line-oriented modes.
    pub line: Option<String>,
}

impl DecodeError {
    /// Attach the captured output and turn this into an execution error.
    #[must_use]
    pub fn into_execution(self, stdout: &[u8], stderr: &[u8]) -> ExecutionError {
        let mut err = ExecutionError::new(self.message).with_output(
            String::from_utf8_lossy(stdout),
            String::from_utf8_lossy(stderr),
        );
        err.offending_line = self.line;
        err
    }
}

/// Incremental text decoding; multi-byte UTF-8 sequences split across reads
/// are completed before being emitted.
#[derive(Debug, Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
}

impl TextDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
        (!out.is_empty()).then_some(out)
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Buffers the whole output and parses it as a single JSON document.
#[derive(Debug, Default)]
pub struct JsonDecoder {
    buffer: Vec<u8>,
}

impl JsonDecoder {
    fn finish(&mut self) -> std::result::Result<StreamRecord, DecodeError> {
        let buffer = std::mem::take(&mut self.buffer);
        serde_json::from_slice(buffer.trim_ascii())
            .map(StreamRecord::new)
            .map_err(|e| DecodeError {
                message: format!("Error parsing JSON response: {e}"),
                line: None,
            })
    }
}

/// Newline-delimited JSON decoding with carry-over of the trailing partial line.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    policy: MalformedLinePolicy,
    line_number: usize,
}

impl LineDecoder {
    #[must_use]
    pub fn new(policy: MalformedLinePolicy) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            policy,
            line_number: 0,
        }
    }

    /// Bytes of the incomplete line currently carried over.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn feed(&mut self, chunk: &[u8]) -> std::result::Result<Vec<StreamRecord>, DecodeError> {
        self.buffer.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.scanned = 0;
            if let Some(record) = self.decode_line(&line[..pos])? {
                records.push(record);
            }
        }
        self.scanned = self.buffer.len();
        Ok(records)
    }

    fn finish(&mut self) -> std::result::Result<Option<StreamRecord>, DecodeError> {
        // The stream has ended, so an unterminated last line is complete.
        let line = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        self.decode_line(&line)
    }

    fn decode_line(
        &mut self,
        raw: &[u8],
    ) -> std::result::Result<Option<StreamRecord>, DecodeError> {
        self.line_number += 1;
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.trim_ascii().is_empty() {
            return Ok(None);
        }

        match parse_record(raw) {
            Ok(record) => Ok(Some(record)),
            Err(reason) => {
                let line = String::from_utf8_lossy(raw).into_owned();
                match self.policy {
                    MalformedLinePolicy::Error => Err(DecodeError {
                        message: format!(
                            "Malformed stream-json record on line {}: {reason}",
                            self.line_number
                        ),
                        line: Some(line),
                    }),
                    MalformedLinePolicy::Skip => {
                        tracing::warn!(
                            line_number = self.line_number,
                            %reason,
                            %line,
                            "Skipping malformed stream-json line"
                        );
                        Ok(None)
                    }
                }
            }
        }
    }
}

fn parse_record(raw: &[u8]) -> std::result::Result<StreamRecord, String> {
    let value: serde_json::Value = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    if !value.is_object() {
        return Err("record is not a JSON object".to_string());
    }
    if !value.get("type").is_some_and(serde_json::Value::is_string) {
        return Err("record has no string `type` field".to_string());
    }
    Ok(StreamRecord::new(value))
}

/// Decoder for one process's output, selected by output format.
#[derive(Debug)]
pub enum Decoder {
    Text(TextDecoder),
    Json(JsonDecoder),
    StreamJson(LineDecoder),
}

impl Decoder {
    #[must_use]
    pub fn new(format: OutputFormat, policy: MalformedLinePolicy) -> Self {
        match format {
            OutputFormat::Text => Self::Text(TextDecoder::default()),
            OutputFormat::Json => Self::Json(JsonDecoder::default()),
            OutputFormat::StreamJson => Self::StreamJson(LineDecoder::new(policy)),
        }
    }

    /// Feed the next chunk of output, returning the units it completes.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` for a malformed stream-json line when the
    /// policy is [`MalformedLinePolicy::Error`].
    pub fn feed(&mut self, chunk: &[u8]) -> std::result::Result<Vec<ProtocolUnit>, DecodeError> {
        match self {
            Self::Text(decoder) => Ok(decoder
                .feed(chunk)
                .map(ProtocolUnit::Text)
                .into_iter()
                .collect()),
            Self::Json(decoder) => {
                decoder.buffer.extend_from_slice(chunk);
                Ok(Vec::new())
            }
            Self::StreamJson(decoder) => Ok(decoder
                .feed(chunk)?
                .into_iter()
                .map(ProtocolUnit::Record)
                .collect()),
        }
    }

    /// Signal end of output, returning any remaining units.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if buffered JSON does not parse or the final
    /// stream-json line is malformed.
    pub fn finish(&mut self) -> std::result::Result<Vec<ProtocolUnit>, DecodeError> {
        match self {
            Self::Text(decoder) => Ok(decoder
                .finish()
                .map(ProtocolUnit::Text)
                .into_iter()
                .collect()),
            Self::Json(decoder) => Ok(vec![ProtocolUnit::Record(decoder.finish()?)]),
            Self::StreamJson(decoder) => Ok(decoder
                .finish()?
                .map(ProtocolUnit::Record)
                .into_iter()
                .collect()),
        }
    }

    /// Decode a complete output in one go.
    ///
    /// # Errors
    ///
    /// Same as [`feed`](Self::feed) and [`finish`](Self::finish).
    pub fn decode_all(
        format: OutputFormat,
        policy: MalformedLinePolicy,
        bytes: &[u8],
    ) -> std::result::Result<Vec<ProtocolUnit>, DecodeError> {
        let mut decoder = Self::new(format, policy);
        let mut units = decoder.feed(bytes)?;
        units.extend(decoder.finish()?);
        Ok(units)
    }
}

/// Drives a [`Decoder`] over a [`RunningProcess`].
struct DecodeState {
    running: Option<RunningProcess>,
    decoder: Decoder,
    pending: VecDeque<Result<ProtocolUnit>>,
    stdout: Vec<u8>,
    chunk: Box<[u8]>,
    done: bool,
}

impl DecodeState {
    async fn next_item(&mut self) -> Option<Result<ProtocolUnit>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }
            self.step().await;
        }
    }

    async fn step(&mut self) {
        let Some(running) = self.running.as_mut() else {
            self.done = true;
            return;
        };

        match running.read_chunk(&mut self.chunk[..]).await {
            Ok(0) => self.finish().await,
            Ok(n) => {
                let chunk = &self.chunk[..n];
                self.stdout.extend_from_slice(chunk);
                match self.decoder.feed(chunk) {
                    Ok(units) => self.pending.extend(units.into_iter().map(Ok)),
                    Err(e) => self.fail_decode(e),
                }
            }
            Err(e) => {
                let stderr = running.stderr_snapshot();
                let err = ExecutionError::new(format!("Failed to read agent output: {e}"))
                    .with_output(
                        String::from_utf8_lossy(&self.stdout),
                        String::from_utf8_lossy(&stderr),
                    );
                self.fail(Error::Execution(err));
            }
        }
    }

    async fn finish(&mut self) {
        self.done = true;
        let Some(running) = self.running.take() else {
            return;
        };
        let timeout = running.timeout();
        let stdout = std::mem::take(&mut self.stdout);

        let outcome = match running.finish(stdout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.pending.push_back(Err(Error::Execution(ExecutionError::new(format!(
                    "Failed to wait for agent process: {e}"
                )))));
                return;
            }
        };

        match outcome.into_result(timeout) {
            Ok(outcome) => match self.decoder.finish() {
                Ok(units) => self.pending.extend(units.into_iter().map(Ok)),
                Err(e) => self.pending.push_back(Err(Error::Execution(
                    e.into_execution(&outcome.stdout, &outcome.stderr),
                ))),
            },
            Err(e) => self.pending.push_back(Err(e)),
        }
    }

    fn fail_decode(&mut self, err: DecodeError) {
        let stderr = self
            .running
            .as_ref()
            .map(RunningProcess::stderr_snapshot)
            .unwrap_or_default();
        let err = err.into_execution(&self.stdout, &stderr);
        self.fail(Error::Execution(err));
    }

    fn fail(&mut self, err: Error) {
        // Dropping the handle terminates the process.
        self.running = None;
        self.done = true;
        self.pending.push_back(Err(err));
    }
}

/// Lazy, finite sequence of [`ProtocolUnit`]s from one agent process.
///
/// The stream ends after the process exits; a failed or timed out process
/// ends it with an error. Dropping the stream early terminates the process.
pub struct OutputStream {
    inner: Pin<Box<dyn Stream<Item = Result<ProtocolUnit>> + Send>>,
    format: OutputFormat,
}

impl OutputStream {
    /// Decode `running`'s stdout according to `format`.
    #[must_use]
    pub fn new(running: RunningProcess, format: OutputFormat, policy: MalformedLinePolicy) -> Self {
        let state = DecodeState {
            running: Some(running),
            decoder: Decoder::new(format, policy),
            pending: VecDeque::new(),
            stdout: Vec::new(),
            chunk: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            done: false,
        };
        let inner = futures_util::stream::unfold(state, |mut state| async move {
            let item = state.next_item().await?;
            Some((item, state))
        });
        Self {
            inner: Box::pin(inner),
            format,
        }
    }

    /// The output format being decoded.
    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Drain the stream, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error the stream yields.
    pub async fn try_collect(mut self) -> Result<Vec<ProtocolUnit>> {
        let mut units = Vec::new();
        while let Some(unit) = self.inner.next().await {
            units.push(unit?);
        }
        Ok(units)
    }
}

impl Stream for OutputStream {
    type Item = Result<ProtocolUnit>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
