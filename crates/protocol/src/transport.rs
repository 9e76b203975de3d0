//! Messaging transport boundary.
//!
//! The bot front end implements [`MessagingTransport`] on top of its chat
//! API client. The pipeline only ever talks to this trait.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use crate::types::{ChatId, MessageId};

/// Errors returned by the messaging transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The chat API throttled the call.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// An edit carried the same content as the message already has.
    #[error("message not modified")]
    Unmodified,

    #[error("transport error: {0}")]
    Other(String),
}

/// Boxed future returned by transport calls.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Abstract chat transport.
pub trait MessagingTransport: Send + Sync {
    /// Sends a text message and returns its handle.
    fn send_text<'a>(&'a self, chat: ChatId, text: &'a str) -> TransportFuture<'a, MessageId>;

    /// Replaces the text of a previously sent message.
    fn edit_text<'a>(
        &'a self,
        chat: ChatId,
        message: MessageId,
        text: &'a str,
    ) -> TransportFuture<'a, ()>;

    fn delete_message(&self, chat: ChatId, message: MessageId) -> TransportFuture<'_, ()>;

    /// Sends a file as a generic document attachment.
    fn send_document<'a>(
        &'a self,
        chat: ChatId,
        path: &'a Path,
        caption: &'a str,
    ) -> TransportFuture<'a, ()>;

    /// Sends a file as an inline-playable video.
    fn send_video<'a>(
        &'a self,
        chat: ChatId,
        path: &'a Path,
        caption: &'a str,
    ) -> TransportFuture<'a, ()>;
}
