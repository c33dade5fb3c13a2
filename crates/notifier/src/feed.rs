//! Message feed abstraction — a live stream of inserted messages plus
//! channel status notices.

use async_trait::async_trait;

use webglow_common::types::Message;

use crate::error::NotifierError;

/// Channel status reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Closed,
    ChannelError,
    /// Anything else the transport reports; logged and ignored.
    Other(String),
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelStatus::Subscribed => write!(f, "SUBSCRIBED"),
            ChannelStatus::Closed => write!(f, "CLOSED"),
            ChannelStatus::ChannelError => write!(f, "CHANNEL_ERROR"),
            ChannelStatus::Other(status) => write!(f, "{}", status),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Insert(Message),
    Status {
        status: ChannelStatus,
        error: Option<String>,
    },
}

impl FeedEvent {
    pub fn status(status: ChannelStatus) -> Self {
        FeedEvent::Status {
            status,
            error: None,
        }
    }

    pub fn error(status: ChannelStatus, error: impl Into<String>) -> Self {
        FeedEvent::Status {
            status,
            error: Some(error.into()),
        }
    }
}

/// Source of insert events. Each `subscribe` call performs one handshake.
#[async_trait]
pub trait MessageFeed: Send + Sync {
    async fn subscribe(&self) -> Result<Box<dyn FeedStream>, NotifierError>;
}

/// An open subscription.
#[async_trait]
pub trait FeedStream: Send {
    /// Next event, or `None` once the underlying transport has ended.
    async fn next_event(&mut self) -> Option<FeedEvent>;

    /// Leave the channel and release the transport.
    async fn unsubscribe(self: Box<Self>);
}
