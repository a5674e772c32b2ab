use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use super::errors::{CoordinationError, Result};

/// Change to one path of the coordination service.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Put {
        path: String,
        value: serde_json::Value,
        version: i64,
    },
    Delete {
        path: String,
    },
}

impl WatchEvent {
    pub fn path(&self) -> &str {
        match self {
            WatchEvent::Put { path, .. } | WatchEvent::Delete { path } => path,
        }
    }

    /// True for `prefix` itself and for every path below it.
    pub fn is_under(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_end_matches('/');
        match self.path().strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.is_empty(),
            None => false,
        }
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchEvent::Put { path, version, .. } => write!(f, "put {} (version {})", path, version),
            WatchEvent::Delete { path } => write!(f, "delete {}", path),
        }
    }
}

/// Events below one prefix, in the order the service applied them.
///
/// A consumer that falls behind gets a single `WatchLagged` error and should
/// re-read what it follows; the stream carries on afterwards.
pub struct WatchStream {
    events: BoxStream<'static, Result<WatchEvent>>,
}

impl WatchStream {
    pub fn new(events: impl Stream<Item = Result<WatchEvent>> + Send + 'static) -> Self {
        Self {
            events: events.boxed(),
        }
    }

    /// Filters a service-wide event feed down to `prefix`.
    pub fn subscribe(feed: broadcast::Receiver<WatchEvent>, prefix: &str) -> Self {
        let prefix = prefix.to_string();
        Self::new(BroadcastStream::new(feed).filter_map(move |received| {
            future::ready(match received {
                Ok(event) if event.is_under(&prefix) => Some(Ok(event)),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    Some(Err(CoordinationError::WatchLagged {
                        prefix: prefix.clone(),
                        missed,
                    }))
                }
            })
        }))
    }
}

impl Stream for WatchStream {
    type Item = Result<WatchEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}
