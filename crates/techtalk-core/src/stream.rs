//! Stream consumer: drives one completion to exactly one terminal outcome.

use std::time::Duration;

use futures_util::StreamExt;

use crate::ai::FragmentStream;
use crate::error::StreamError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(String),
    Complete,
    Error(StreamError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Fragment(_))
    }
}

/// Wraps a [`FragmentStream`] so that callers see fragments in arrival order,
/// then exactly one `Complete` or `Error`, then nothing.
pub struct TurnStream {
    inner: FragmentStream,
    idle_timeout: Option<Duration>,
    fragments: usize,
    finished: bool,
}

impl TurnStream {
    pub fn new(inner: FragmentStream) -> Self {
        Self {
            inner,
            idle_timeout: None,
            fragments: 0,
            finished: false,
        }
    }

    /// Fail the turn if the provider goes quiet for longer than `limit`
    pub fn with_idle_timeout(mut self, limit: Option<Duration>) -> Self {
        self.idle_timeout = limit;
        self
    }

    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        let next = match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.inner.next()).await {
                Ok(next) => next,
                Err(_) => Some(Err(StreamError::Timeout(limit))),
            },
            None => self.inner.next().await,
        };

        let event = match next {
            Some(Ok(text)) => {
                self.fragments += 1;
                StreamEvent::Fragment(text)
            }
            Some(Err(e)) => StreamEvent::Error(e),
            None => StreamEvent::Complete,
        };

        if event.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    async fn drain(mut turn: TurnStream) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = turn.next_event().await {
            events.push(event);
        }
        events
    }

    fn scripted(items: Vec<Result<&str, StreamError>>) -> FragmentStream {
        let items: Vec<_> = items.into_iter().map(|r| r.map(str::to_string)).collect();
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_fragments_then_complete() {
        let events = drain(TurnStream::new(scripted(vec![Ok("He"), Ok("llo"), Ok("!")]))).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Fragment("He".to_string()),
                StreamEvent::Fragment("llo".to_string()),
                StreamEvent::Fragment("!".to_string()),
                StreamEvent::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_stream_completes() {
        let events = drain(TurnStream::new(scripted(vec![]))).await;
        assert_eq!(events, vec![StreamEvent::Complete]);
    }

    #[tokio::test]
    async fn test_nothing_after_error() {
        let err = StreamError::Transport("reset".to_string());
        let mut turn = TurnStream::new(scripted(vec![Ok("a"), Err(err.clone()), Ok("b")]));

        assert_eq!(turn.next_event().await, Some(StreamEvent::Fragment("a".to_string())));
        assert_eq!(turn.next_event().await, Some(StreamEvent::Error(err)));
        assert!(turn.is_finished());
        assert_eq!(turn.next_event().await, None);
        assert_eq!(turn.fragments(), 1);
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let limit = Duration::from_millis(20);
        let inner = stream::iter(vec![Ok("first".to_string())])
            .chain(stream::pending())
            .boxed();
        let events = drain(TurnStream::new(inner).with_idle_timeout(Some(limit))).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Fragment("first".to_string()),
                StreamEvent::Error(StreamError::Timeout(limit)),
            ]
        );
    }
}
