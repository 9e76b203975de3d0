//! Per-chat conversation state and active-request registry.
//!
//! Replaces ambient global maps: the front end owns one [`SessionStore`] and
//! passes it explicitly. Awaiting-input entries expire after a TTL; active
//! requests are tracked by token with their cancellation handle and removed
//! when the request finishes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use courier_protocol::{ChatId, SourceKind, TransferRequest};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default lifetime of an "awaiting input" entry.
pub const DEFAULT_AWAITING_TTL: Duration = Duration::from_secs(5 * 60);

struct Awaiting {
    kind: SourceKind,
    since: Instant,
}

struct Active {
    chat: ChatId,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    awaiting: HashMap<ChatId, Awaiting>,
    active: HashMap<String, Active>,
}

/// What a `/cancel` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelOutcome {
    pub discarded_awaiting: bool,
    pub cancelled_requests: usize,
}

impl CancelOutcome {
    pub fn is_noop(&self) -> bool {
        !self.discarded_awaiting && self.cancelled_requests == 0
    }
}

/// Session store shared by all chats.
pub struct SessionStore {
    inner: Mutex<Inner>,
    awaiting_ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_AWAITING_TTL)
    }
}

impl SessionStore {
    pub fn new(awaiting_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            awaiting_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `chat` as waiting for a locator of the given kind.
    pub fn begin_awaiting(&self, chat: ChatId, kind: SourceKind) {
        self.lock().awaiting.insert(
            chat,
            Awaiting {
                kind,
                since: Instant::now(),
            },
        );
    }

    /// Consumes the awaiting state of `chat`, if present and not expired.
    pub fn take_awaiting(&self, chat: ChatId) -> Option<SourceKind> {
        let entry = self.lock().awaiting.remove(&chat)?;
        if entry.since.elapsed() > self.awaiting_ttl {
            debug!(chat, "awaiting-input state expired");
            return None;
        }
        Some(entry.kind)
    }

    /// Discards the awaiting state of `chat`. Returns `true` if there was one.
    pub fn cancel_awaiting(&self, chat: ChatId) -> bool {
        self.lock().awaiting.remove(&chat).is_some()
    }

    /// Registers a request as running and returns its cancellation token.
    pub fn register_active(&self, request: &TransferRequest) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.lock().active.insert(
            request.token().to_string(),
            Active {
                chat: request.chat_id(),
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Removes a finished request.
    pub fn finish(&self, token: &str) {
        self.lock().active.remove(token);
    }

    /// Handles `/cancel` for `chat`: drops awaiting state and cancels every
    /// running request of that chat.
    pub fn cancel_chat(&self, chat: ChatId) -> CancelOutcome {
        let mut inner = self.lock();
        let discarded_awaiting = inner.awaiting.remove(&chat).is_some();
        let mut cancelled_requests = 0;
        for active in inner.active.values().filter(|a| a.chat == chat) {
            active.cancel.cancel();
            cancelled_requests += 1;
        }
        CancelOutcome {
            discarded_awaiting,
            cancelled_requests,
        }
    }

    /// Number of running requests.
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Drops expired awaiting entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.awaiting_ttl;
        let mut inner = self.lock();
        let before = inner.awaiting.len();
        inner.awaiting.retain(|_, a| a.since.elapsed() <= ttl);
        before - inner.awaiting.len()
    }
}
