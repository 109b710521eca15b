//! Protocol-health counters.
//!
//! Lock-free atomic counters shared between the protocol handler and
//! the session engine. These are the only observability hooks the
//! engine exposes; anything heavier belongs to the surrounding
//! application.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters covering protocol and connection health.
#[derive(Debug, Default)]
pub struct ProtocolMetrics {
    /// Frames successfully decoded.
    pub frames_decoded: AtomicU64,
    /// Frames that failed to decode (malformed JSON, unknown type).
    pub decode_failures: AtomicU64,
    /// Second finalizations for an already-final transcript item.
    pub duplicate_finals_dropped: AtomicU64,
    /// Finals dropped because an identical final arrived moments
    /// earlier under a different item id.
    pub cross_item_duplicates_dropped: AtomicU64,
    /// Responses started (`response.created` observed).
    pub responses_started: AtomicU64,
    /// Responses completed (`response.done` observed).
    pub responses_completed: AtomicU64,
    /// Outbound messages queued while the channel was not open.
    pub messages_queued_preopen: AtomicU64,
    /// Reconnect attempts scheduled.
    pub reconnect_attempts: AtomicU64,
    /// Reconnects that re-established a ready session.
    pub reconnect_successes: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub frames_decoded: u64,
    pub decode_failures: u64,
    pub duplicate_finals_dropped: u64,
    pub cross_item_duplicates_dropped: u64,
    pub responses_started: u64,
    pub responses_completed: u64,
    pub messages_queued_preopen: u64,
    pub reconnect_attempts: u64,
    pub reconnect_successes: u64,
}

impl ProtocolMetrics {
    /// Increments a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a consistent-enough snapshot for reporting.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            duplicate_finals_dropped: self.duplicate_finals_dropped.load(Ordering::Relaxed),
            cross_item_duplicates_dropped: self
                .cross_item_duplicates_dropped
                .load(Ordering::Relaxed),
            responses_started: self.responses_started.load(Ordering::Relaxed),
            responses_completed: self.responses_completed.load(Ordering::Relaxed),
            messages_queued_preopen: self.messages_queued_preopen.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            reconnect_successes: self.reconnect_successes.load(Ordering::Relaxed),
        }
    }
}
