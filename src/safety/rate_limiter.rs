//! Rate Limiter
//!
//! Sliding 60 second window over requests and tokens, shared by every task
//! of a run. Waiters are admitted one at a time through a separate
//! admission lock; the window itself is only locked briefly, so usage
//! corrections never wait behind a sleeping caller.

use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

pub const WINDOW: Duration = Duration::from_secs(60);
/// Extra wait after the oldest entry leaves the window.
pub const WINDOW_BUFFER: Duration = Duration::from_millis(100);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);
const MAX_JITTER_MS: u64 = 1000;

/// Proof that a slot was granted; used to correct the token estimate later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTicket {
    pub id: u64,
    pub granted_at: Instant,
}

#[derive(Debug)]
struct Entry {
    id: u64,
    at: Instant,
    tokens: u64,
}

#[derive(Debug, Default)]
struct Window {
    entries: VecDeque<Entry>,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.entries.front() {
            if now.saturating_duration_since(front.at) >= WINDOW {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn tokens(&self) -> u64 {
        self.entries.iter().map(|e| e.tokens).sum()
    }

    fn oldest_exit(&self) -> Option<Instant> {
        self.entries.front().map(|e| e.at + WINDOW + WINDOW_BUFFER)
    }
}

pub struct RateLimiter {
    rpm: u64,
    tpm: u64,
    backoff_base: Duration,
    window: Mutex<Window>,
    admission: Mutex<()>,
    origin: Instant,
    /// Milliseconds after `origin` until which calls are held back; 0 = none.
    throttle_until_ms: AtomicU64,
    next_id: AtomicU64,
}

impl RateLimiter {
    pub fn new(rpm: u64, tpm: u64, backoff_base: Duration) -> Self {
        Self {
            rpm: rpm.max(1),
            tpm: tpm.max(1),
            backoff_base,
            window: Mutex::new(Window::default()),
            admission: Mutex::new(()),
            origin: Instant::now(),
            throttle_until_ms: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.rpm,
            config.tpm,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    /// Waits until a call estimated at `estimated_tokens` fits in both the
    /// request and token windows, then records it.
    pub async fn wait_for_slot(&self, estimated_tokens: u64) -> SlotTicket {
        let _admission = self.admission.lock().await;

        loop {
            if let Some(until) = self.throttled_until() {
                if until > Instant::now() {
                    debug!("Rate limiter: honouring backoff for {:?}", until - Instant::now());
                    sleep_until(until).await;
                    continue;
                }
            }

            let wake = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                window.prune(now);

                let wake = if window.entries.len() as u64 >= self.rpm {
                    debug!("Rate limiter: request window full ({} rpm)", self.rpm);
                    window.oldest_exit()
                } else if window.tokens() + estimated_tokens > self.tpm {
                    // an empty window always admits the call, even one larger than tpm
                    debug!("Rate limiter: token window full ({} tpm)", self.tpm);
                    window.oldest_exit()
                } else {
                    None
                };

                if wake.is_none() {
                    let ticket = SlotTicket {
                        id: self.next_id.fetch_add(1, Ordering::SeqCst),
                        granted_at: now,
                    };
                    window.entries.push_back(Entry {
                        id: ticket.id,
                        at: ticket.granted_at,
                        tokens: estimated_tokens,
                    });
                    return ticket;
                }
                wake
            };

            if let Some(exit) = wake {
                sleep_until(exit).await;
            }
        }
    }

    /// Replaces the pre-call estimate with the real usage. Entries that
    /// already left the window are ignored.
    pub async fn record_usage(&self, ticket: &SlotTicket, actual_tokens: u64) {
        let mut window = self.window.lock().await;
        if let Some(entry) = window.entries.iter_mut().find(|e| e.id == ticket.id) {
            entry.tokens = actual_tokens;
        }
    }

    /// Backoff for the given retry attempt: `base * 2^attempt` plus up to
    /// one second of jitter, capped at [`MAX_BACKOFF`]. Every subsequent
    /// `wait_for_slot` is held back until the delay has passed.
    pub fn handle_rate_limit_error(&self, attempt: u32) -> Duration {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..MAX_JITTER_MS));
        let exponential = self
            .backoff_base
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(MAX_BACKOFF);
        let delay = (exponential + jitter).min(MAX_BACKOFF);

        let until = Instant::now() + delay;
        let until_ms = until.saturating_duration_since(self.origin).as_millis() as u64;
        self.throttle_until_ms.fetch_max(until_ms.max(1), Ordering::SeqCst);

        warn!("Rate limited, backing off for {:?} (attempt {})", delay, attempt + 1);
        delay
    }

    pub fn reset_throttle(&self) {
        self.throttle_until_ms.store(0, Ordering::SeqCst);
    }

    pub fn throttled_until(&self) -> Option<Instant> {
        match self.throttle_until_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(self.origin + Duration::from_millis(ms)),
        }
    }

    /// `(requests, tokens)` currently inside the window.
    pub async fn usage(&self) -> (u64, u64) {
        let mut window = self.window.lock().await;
        window.prune(Instant::now());
        (window.entries.len() as u64, window.tokens())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_request_window_blocks_extra_call() {
        let limiter = RateLimiter::new(3, 1_000_000, Duration::from_millis(1000));

        let first = limiter.wait_for_slot(10).await;
        limiter.wait_for_slot(10).await;
        limiter.wait_for_slot(10).await;
        let fourth = limiter.wait_for_slot(10).await;

        let gap = fourth.granted_at - first.granted_at;
        assert!(gap >= WINDOW, "fourth call admitted after only {:?}", gap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_window_blocks_large_call() {
        let limiter = RateLimiter::new(100, 1000, Duration::from_millis(1000));

        let first = limiter.wait_for_slot(800).await;
        let second = limiter.wait_for_slot(300).await;
        assert!(second.granted_at - first.granted_at >= WINDOW);

        // Oversized call against an empty window goes straight through.
        let start = Instant::now();
        let lone = RateLimiter::new(100, 1000, Duration::from_millis(1000));
        let ticket = lone.wait_for_slot(5000).await;
        assert_eq!(ticket.granted_at, start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_usage_overwrites_estimate() {
        let limiter = RateLimiter::new(100, 1000, Duration::from_millis(1000));
        let ticket = limiter.wait_for_slot(900).await;
        limiter.record_usage(&ticket, 100).await;
        assert_eq!(limiter.usage().await, (1, 100));

        // Now fits without waiting.
        let before = Instant::now();
        let next = limiter.wait_for_slot(800).await;
        assert_eq!(next.granted_at, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_growth_and_cap() {
        let limiter = RateLimiter::new(100, 1000, Duration::from_millis(1000));

        let d0 = limiter.handle_rate_limit_error(0);
        assert!(d0 >= Duration::from_millis(1000) && d0 < Duration::from_millis(2000));

        let d2 = limiter.handle_rate_limit_error(2);
        assert!(d2 >= Duration::from_millis(4000) && d2 < Duration::from_millis(5000));

        let d10 = limiter.handle_rate_limit_error(10);
        assert_eq!(d10, MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_holds_next_slot() {
        let limiter = RateLimiter::new(100, 100_000, Duration::from_millis(1000));
        let start = Instant::now();
        let delay = limiter.handle_rate_limit_error(1);

        let ticket = limiter.wait_for_slot(10).await;
        // throttle is stored at millisecond resolution
        assert!(ticket.granted_at - start + Duration::from_millis(1) >= delay);

        limiter.handle_rate_limit_error(3);
        limiter.reset_throttle();
        assert!(limiter.throttled_until().is_none());
        let before = Instant::now();
        assert_eq!(limiter.wait_for_slot(10).await.granted_at, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_correction_not_blocked_by_waiter() {
        let limiter = std::sync::Arc::new(RateLimiter::new(1, 1_000_000, Duration::from_millis(1000)));
        let first = limiter.wait_for_slot(10).await;

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.wait_for_slot(10).await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!waiter.is_finished());

        let before = Instant::now();
        limiter.record_usage(&first, 5).await;
        assert_eq!(Instant::now(), before);
        assert_eq!(limiter.usage().await, (1, 5));

        let second = waiter.await.unwrap();
        assert!(second.granted_at - first.granted_at >= WINDOW);
    }
}
