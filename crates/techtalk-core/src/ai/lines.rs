//! Line framing shared by the streaming providers.
//!
//! Server-sent events and newline-delimited JSON both arrive as arbitrary byte
//! chunks; this module reassembles whole lines and hands each one to a
//! provider-specific parser.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{stream, Stream, StreamExt};

use super::FragmentStream;
use crate::error::StreamError;

/// What a provider parser made of one line
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LineOutcome {
    Skip,
    Fragment(String),
    Done,
}

struct Decoder<S, F> {
    body: Pin<Box<S>>,
    parse: F,
    buf: Vec<u8>,
    pending: VecDeque<String>,
    failure: Option<StreamError>,
    saw_done: bool,
    body_done: bool,
    finished: bool,
}

impl<S, F> Decoder<S, F>
where
    F: FnMut(&str) -> Result<LineOutcome, StreamError>,
{
    /// Parse every complete line in the buffer. Stops at the end-of-stream marker.
    fn drain_lines(&mut self) -> Result<(), StreamError> {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.parse_line(&line)?;
            if self.saw_done {
                self.buf.clear();
                break;
            }
        }
        Ok(())
    }

    fn parse_line(&mut self, raw: &[u8]) -> Result<(), StreamError> {
        // '\n' never occurs inside a multi-byte sequence, so a whole line is
        // valid UTF-8 even when the chunk boundary split a character
        let line = std::str::from_utf8(raw)
            .map_err(|e| StreamError::Malformed(format!("invalid UTF-8 in stream: {}", e)))?;
        let line = line.trim_end_matches(['\r', '\n']);

        match (self.parse)(line)? {
            LineOutcome::Skip => {}
            LineOutcome::Fragment(text) => {
                if !text.is_empty() {
                    self.pending.push_back(text);
                }
            }
            LineOutcome::Done => self.saw_done = true,
        }
        Ok(())
    }
}

/// Turn a chunked response body into a stream of text fragments.
///
/// The stream ends cleanly only after `parse` reports [`LineOutcome::Done`];
/// a body that closes before that yields a final `Malformed` error.
pub(crate) fn decode_lines<S, B, E, F>(body: S, parse: F) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<StreamError> + Send + 'static,
    F: FnMut(&str) -> Result<LineOutcome, StreamError> + Send + 'static,
{
    let decoder = Decoder {
        body: Box::pin(body),
        parse,
        buf: Vec::new(),
        pending: VecDeque::new(),
        failure: None,
        saw_done: false,
        body_done: false,
        finished: false,
    };

    stream::unfold(decoder, |mut d| async move {
        loop {
            // Fragments parsed before a failure still go out first
            if let Some(fragment) = d.pending.pop_front() {
                return Some((Ok(fragment), d));
            }
            if let Some(e) = d.failure.take() {
                d.finished = true;
                return Some((Err(e), d));
            }
            if d.finished || d.saw_done {
                return None;
            }
            if d.body_done {
                d.finished = true;
                let e = StreamError::Malformed(
                    "stream closed before the end-of-stream marker".to_string(),
                );
                return Some((Err(e), d));
            }

            match d.body.next().await {
                Some(Ok(chunk)) => {
                    d.buf.extend_from_slice(chunk.as_ref());
                    if let Err(e) = d.drain_lines() {
                        d.failure = Some(e);
                    }
                }
                Some(Err(e)) => d.failure = Some(e.into()),
                None => {
                    d.body_done = true;
                    if !d.buf.is_empty() {
                        let rest = std::mem::take(&mut d.buf);
                        if let Err(e) = d.parse_line(&rest) {
                            d.failure = Some(e);
                        }
                    }
                }
            }
        }
    })
    .boxed()
}
