//! Throttled, deduplicating progress-message updater.
//!
//! A notifier edits one status message in one chat. It keeps an adaptive
//! update interval that shrinks toward the configured minimum after clean
//! edits and grows toward the maximum whenever the transport rate-limits
//! us. Identical (normalized) text is never sent twice in a row.
//!
//! One notifier belongs to one request; it is never shared across requests.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use courier_protocol::{ChatId, MessageId, MessagingTransport, Phase, TransportError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::format::progress_bar;
use crate::progress::ProgressState;

/// Interval multipliers as (numerator, denominator): x0.8 on success, x1.5 on rate limit.
const SHRINK: (u128, u128) = (4, 5);
const GROW: (u128, u128) = (3, 2);

/// Notifier tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Edit attempts allowed while the transport keeps rate-limiting.
    #[serde(default = "default_rate_limit_attempts")]
    pub rate_limit_attempts: u32,
    /// Delay used when a rate-limit response carries no retry hint.
    #[serde(default = "default_retry_after_ms")]
    pub default_retry_after_ms: u64,
    #[serde(default = "default_transient_retry_ms")]
    pub transient_retry_ms: u64,
}

fn default_min_interval_ms() -> u64 {
    4_000
}

fn default_max_interval_ms() -> u64 {
    10_000
}

fn default_rate_limit_attempts() -> u32 {
    3
}

fn default_retry_after_ms() -> u64 {
    4_000
}

fn default_transient_retry_ms() -> u64 {
    1_000
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            rate_limit_attempts: default_rate_limit_attempts(),
            default_retry_after_ms: default_retry_after_ms(),
            transient_retry_ms: default_transient_retry_ms(),
        }
    }
}

impl NotifierConfig {
    fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms.max(self.min_interval_ms))
    }
}

struct NotifierState {
    progress: ProgressState,
    last_accepted_at: Option<Instant>,
    last_text: Option<String>,
}

/// Edits a single status message while respecting the chat edit-rate limit.
///
/// All methods swallow transport failures; progress reporting never aborts
/// the caller.
pub struct RateLimitedNotifier {
    transport: Arc<dyn MessagingTransport>,
    chat: ChatId,
    message: MessageId,
    config: NotifierConfig,
    state: Mutex<NotifierState>,
}

impl RateLimitedNotifier {
    pub fn new(
        transport: Arc<dyn MessagingTransport>,
        chat: ChatId,
        message: MessageId,
        config: NotifierConfig,
    ) -> Self {
        let interval = config.min_interval();
        Self {
            transport,
            chat,
            message,
            config,
            state: Mutex::new(NotifierState {
                progress: ProgressState::new(Phase::Download, interval),
                last_accepted_at: None,
                last_text: None,
            }),
        }
    }

    /// The status message this notifier edits.
    pub fn message_id(&self) -> MessageId {
        self.message
    }

    /// Current adaptive interval.
    pub async fn current_interval(&self) -> Duration {
        self.state.lock().await.progress.current_interval
    }

    /// Reports phase progress. Skipped when called before the current
    /// interval elapsed or when the normalized text is unchanged.
    pub async fn report(&self, phase: Phase, percent: f64, details: &str) {
        let text = render_progress(phase, percent, details);
        let mut state = self.state.lock().await;

        if state.progress.phase != phase {
            let interval = state.progress.current_interval;
            state.progress = ProgressState::new(phase, interval);
        }

        let now = Instant::now();
        if state
            .last_accepted_at
            .is_some_and(|at| now.saturating_duration_since(at) < state.progress.current_interval)
        {
            return;
        }

        if self.edit(&mut state, &text).await {
            state.progress.record(Instant::now(), Some(percent), None);
        }
    }

    /// Replaces the status text immediately, ignoring the interval but not
    /// deduplication. Used for phase transitions and final summaries.
    pub async fn announce(&self, text: &str) {
        let mut state = self.state.lock().await;
        self.edit(&mut state, text).await;
    }

    /// Sends one edit with retry handling. Returns `true` if the text was accepted.
    async fn edit(&self, state: &mut NotifierState, text: &str) -> bool {
        let normalized = normalize_progress_text(text);
        if state.last_text.as_deref() == Some(normalized.as_str()) {
            return false;
        }

        let mut rate_limited = 0u32;
        let mut transient_retried = false;

        loop {
            match self.transport.edit_text(self.chat, self.message, text).await {
                Ok(()) => {
                    if rate_limited == 0 && !transient_retried {
                        self.shrink(state);
                    }
                    accept(state, normalized);
                    return true;
                }
                Err(TransportError::Unmodified) => {
                    accept(state, normalized);
                    return true;
                }
                Err(TransportError::RateLimited { retry_after }) => {
                    rate_limited += 1;
                    self.grow(state);
                    if rate_limited >= self.config.rate_limit_attempts {
                        warn!(
                            chat = self.chat,
                            attempts = rate_limited,
                            "giving up on progress edit after repeated rate limiting"
                        );
                        return false;
                    }
                    let delay = retry_after
                        .unwrap_or(Duration::from_millis(self.config.default_retry_after_ms));
                    debug!(chat = self.chat, ?delay, "progress edit rate limited, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(TransportError::Other(msg)) => {
                    if transient_retried {
                        warn!(chat = self.chat, error = %msg, "progress edit failed");
                        return false;
                    }
                    transient_retried = true;
                    debug!(chat = self.chat, error = %msg, "progress edit failed, retrying once");
                    tokio::time::sleep(Duration::from_millis(self.config.transient_retry_ms)).await;
                }
            }
        }
    }

    fn shrink(&self, state: &mut NotifierState) {
        let next = scale(state.progress.current_interval, SHRINK);
        state.progress.current_interval = next.max(self.config.min_interval());
    }

    fn grow(&self, state: &mut NotifierState) {
        let next = scale(state.progress.current_interval, GROW);
        state.progress.current_interval = next.min(self.config.max_interval());
    }
}

fn scale(interval: Duration, (num, den): (u128, u128)) -> Duration {
    let ms = interval.as_millis() * num / den;
    Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
}

fn accept(state: &mut NotifierState, normalized: String) {
    state.last_accepted_at = Some(Instant::now());
    state.last_text = Some(normalized);
}

/// Renders the standard progress message body.
pub fn render_progress(phase: Phase, percent: f64, details: &str) -> String {
    let mut text = format!("{}: {percent:.1}%\n{}", phase.label(), progress_bar(percent));
    if !details.is_empty() {
        text.push_str("\n\n");
        text.push_str(details);
    }
    text
}

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("percent regex is valid"));
static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d)\d+").expect("decimal regex is valid"));

/// Normalizes progress text for change detection: percentages rounded to
/// integers, other decimals truncated to one place, whitespace collapsed.
pub fn normalize_progress_text(text: &str) -> String {
    let rounded = PERCENT.replace_all(text, |caps: &regex::Captures<'_>| {
        let value: f64 = caps[1].parse().unwrap_or(0.0);
        format!("{}%", value.round() as u64)
    });
    let truncated = DECIMAL.replace_all(&rounded, "$1.$2");
    truncated.split_whitespace().collect::<Vec<_>>().join(" ")
}
