//! Server-Sent Events (SSE) processing for the idea stream.
//!
//! This module turns the raw byte stream of an HTTP response into a stream of [`Frame`]s.
//! Lines may end in `\n`, `\r\n`, or `\r`, and may be split across chunks at any byte.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::{Error, Result};

/// Event type assumed when the server does not send an `event:` field.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// A dispatched server-sent event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamEvent {
    /// The event type; `message` unless the server named another.
    pub event: String,
    /// Data lines of the event, joined by `\n`.
    pub data: String,
    /// The last event ID seen on this stream, if any.
    pub id: Option<String>,
}

impl StreamEvent {
    /// Creates a `message` event carrying `data`.
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: DEFAULT_EVENT_TYPE.to_string(),
            data: data.into(),
            id: None,
        }
    }

    /// Returns true if this is a `message` event.
    pub fn is_message(&self) -> bool {
        self.event == DEFAULT_EVENT_TYPE
    }
}

/// One item decoded from an event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A complete event.
    Event(StreamEvent),
    /// The server asked for a new reconnection interval.
    Retry(Duration),
}

/// Longest line the decoder will hold while waiting for its terminator.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Incremental decoder for the `text/event-stream` format.
///
/// Lines longer than [`MAX_LINE_BYTES`] are reported as [`Error::Streaming`] and skipped up to
/// their terminator, along with the event they belonged to.
#[derive(Debug, Default)]
pub struct Decoder {
    bytes: Vec<u8>,
    /// Start of the first unconsumed line in `bytes`.
    start: usize,
    /// Bytes before this offset hold no terminator for the pending line.
    scanned: usize,
    /// Skipping the rest of an oversized line.
    discarding: bool,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
    ready: VecDeque<Result<Frame>>,
    eof: bool,
}

impl Decoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk of bytes from the response body.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        self.drain_lines();
    }

    /// Marks the end of the body.
    ///
    /// A trailing line without a terminator and an event without its blank line are dropped.
    pub fn finish(&mut self) {
        self.eof = true;
        self.drain_lines();
        self.bytes.clear();
        self.start = 0;
        self.scanned = 0;
        self.discarding = false;
        self.event = None;
        self.data.clear();
    }

    /// Returns true once [`Decoder::finish`] has been called.
    pub fn is_finished(&self) -> bool {
        self.eof
    }

    /// Pops the next decoded frame, if one is complete.
    pub fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.ready.pop_front()
    }

    fn drain_lines(&mut self) {
        while let Some(line) = self.next_line() {
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            match String::from_utf8(line) {
                Ok(line) => {
                    if let Some(frame) = self.process_line(&line) {
                        self.ready.push_back(Ok(frame));
                    }
                }
                Err(e) => self.ready.push_back(Err(Error::encoding(
                    format!("Invalid UTF-8 in stream: {e}"),
                    Some(Box::new(e)),
                ))),
            }
        }
        if self.start > 0 {
            self.bytes.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let Some(offset) = self.bytes[self.scanned..]
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')
        else {
            self.scanned = self.bytes.len();
            if self.bytes.len() - self.start > MAX_LINE_BYTES {
                self.overflow();
                self.start = self.bytes.len();
            }
            return None;
        };
        let pos = self.scanned + offset;
        let terminator = if self.bytes[pos] == b'\r' {
            match self.bytes.get(pos + 1) {
                Some(b'\n') => 2,
                Some(_) => 1,
                // A lone `\r` at the end of a chunk may be the first half of `\r\n`.
                None if self.eof => 1,
                None => {
                    self.scanned = pos;
                    return None;
                }
            }
        } else {
            1
        };
        if !self.discarding && pos - self.start > MAX_LINE_BYTES {
            self.overflow();
        }
        let line = self.bytes[self.start..pos].to_vec();
        self.start = pos + terminator;
        self.scanned = self.start;
        Some(line)
    }

    fn overflow(&mut self) {
        if self.discarding {
            return;
        }
        self.discarding = true;
        self.event = None;
        self.data.clear();
        self.ready.push_back(Err(Error::streaming(
            format!("event stream line exceeds {MAX_LINE_BYTES} bytes"),
            None,
        )));
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.last_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(millis) = value.parse::<u64>() {
                    return Some(Frame::Retry(Duration::from_millis(millis)));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(Frame::Event(StreamEvent {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            data,
            id: self.last_id.clone(),
        }))
    }
}

/// Process a stream of bytes into a stream of server-sent event frames.
///
/// An error from the underlying byte stream is yielded once and ends the stream.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<Frame>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Unpin + Send + 'static,
{
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    stream::unfold(
        (stream, Decoder::new()),
        move |(mut stream, mut decoder)| async move {
            loop {
                if let Some(frame) = decoder.next_frame() {
                    return Some((frame, (stream, decoder)));
                }
                if decoder.is_finished() {
                    return None;
                }
                match stream.next().await {
                    Some(Ok(bytes)) => decoder.feed(&bytes),
                    Some(Err(e)) => {
                        decoder.finish();
                        return Some((Err(e), (stream, decoder)));
                    }
                    None => decoder.finish(),
                }
            }
        },
    )
}
