//! Single-flight cache for the WSAA access ticket.
//!
//! A refresh runs on its own task. Every caller arriving while it is in flight
//! subscribes to the same result, so at most one login is outstanding. A caller
//! that gives up (is cancelled) does not cancel the login; its result still
//! lands in the cache.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::PipelineError;
use crate::ticket::SecurityTicket;

type Outcome = Result<SecurityTicket, PipelineError>;

enum Slot {
    Empty,
    Ready(SecurityTicket),
    Refreshing(watch::Receiver<Option<Outcome>>),
}

/// Observable state of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Empty,
    Valid,
    Expired,
    Refreshing,
}

/// Holds the current ticket and coordinates refreshes. Cheap to clone; clones
/// share state.
#[derive(Clone)]
pub struct TicketCache {
    inner: Arc<Inner>,
}

struct Inner {
    slot: Mutex<Slot>,
    clock: Arc<dyn Clock>,
    safety_margin: Duration,
    refreshes: AtomicU64,
}

impl TicketCache {
    /// Tickets are treated as expired `safety_margin` before their stated
    /// expiry.
    pub fn new(clock: Arc<dyn Clock>, safety_margin: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Empty),
                clock,
                safety_margin,
                refreshes: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the cached ticket if fresh, otherwise joins or starts a refresh.
    ///
    /// `refresh` is only invoked when this caller starts the refresh. Its
    /// future runs to completion even if every caller is cancelled. On failure
    /// all waiters receive the same error and the cache returns to
    /// [`CacheStatus::Empty`].
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let mut rx = {
            let mut slot = self.inner.slot.lock().await;
            match &*slot {
                Slot::Ready(ticket) if ticket.is_fresh(self.inner.clock.now(), self.inner.safety_margin) => {
                    return Ok(ticket.clone());
                }
                Slot::Refreshing(rx) => {
                    debug!("joining in-flight ticket refresh");
                    rx.clone()
                }
                _ => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Slot::Refreshing(rx.clone());
                    self.spawn_refresh(refresh(), tx);
                    rx
                }
            }
        };

        let published = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| Option::clone(&outcome));

        match published {
            Some(outcome) => outcome,
            None => {
                // The refresh task died without publishing; unblock the next caller.
                let mut slot = self.inner.slot.lock().await;
                let stale = matches!(&*slot, Slot::Refreshing(current) if current.same_channel(&rx));
                if stale {
                    *slot = Slot::Empty;
                }
                Err(PipelineError::Aborted(
                    "ticket refresh task ended without a result".into(),
                ))
            }
        }
    }

    fn spawn_refresh<Fut>(&self, refresh: Fut, tx: watch::Sender<Option<Outcome>>)
    where
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = refresh.await;
            {
                let mut slot = inner.slot.lock().await;
                *slot = match &outcome {
                    Ok(ticket) => Slot::Ready(ticket.clone()),
                    Err(_) => Slot::Empty,
                };
            }
            inner.refreshes.fetch_add(1, Ordering::Relaxed);

            match &outcome {
                Ok(ticket) => {
                    info!(token = %ticket.token, expires_at = %ticket.expires_at, "ticket refreshed")
                }
                Err(e) => warn!(code = e.code(), error = %e, "ticket refresh failed"),
            }
            let _ = tx.send(Some(outcome));
        });
    }

    pub async fn status(&self) -> CacheStatus {
        let slot = self.inner.slot.lock().await;
        match &*slot {
            Slot::Empty => CacheStatus::Empty,
            Slot::Refreshing(_) => CacheStatus::Refreshing,
            Slot::Ready(ticket) => {
                if ticket.is_fresh(self.inner.clock.now(), self.inner.safety_margin) {
                    CacheStatus::Valid
                } else {
                    CacheStatus::Expired
                }
            }
        }
    }

    /// The cached ticket, if still fresh.
    pub async fn current(&self) -> Option<SecurityTicket> {
        let slot = self.inner.slot.lock().await;
        match &*slot {
            Slot::Ready(ticket) if ticket.is_fresh(self.inner.clock.now(), self.inner.safety_margin) => {
                Some(ticket.clone())
            }
            _ => None,
        }
    }

    /// Drops a cached ticket. An in-flight refresh is left alone.
    pub async fn invalidate(&self) {
        let mut slot = self.inner.slot.lock().await;
        if matches!(&*slot, Slot::Ready(_)) {
            *slot = Slot::Empty;
        }
    }

    /// Completed refresh cycles, successful or not.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refreshes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    use time::OffsetDateTime;

    use super::*;
    use crate::clock::FixedClock;
    use crate::error::ProtocolError;

    fn start() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_792_150_000).unwrap()
    }

    fn cache(clock: &Arc<FixedClock>) -> TicketCache {
        TicketCache::new(clock.clone(), Duration::seconds(60))
    }

    async fn slow_ticket(token: &'static str, expires_at: OffsetDateTime) -> Outcome {
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        Ok(SecurityTicket::new(token, "sign", expires_at))
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let clock = Arc::new(FixedClock::new(start()));
        let cache = cache(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let expires_at = start() + Duration::hours(12);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        slow_ticket("token-1", expires_at)
                    })
                    .await
            }));
        }

        for handle in handles {
            let ticket = handle.await.unwrap().unwrap();
            assert_eq!(ticket.token.expose(), "token-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.refresh_count(), 1);
        assert_eq!(cache.status().await, CacheStatus::Valid);
    }

    #[tokio::test]
    async fn ticket_inside_safety_margin_is_refreshed() {
        let clock = Arc::new(FixedClock::new(start()));
        let cache = cache(&clock);

        let first = cache
            .get_or_refresh(|| slow_ticket("first", start() + Duration::seconds(120)))
            .await
            .unwrap();
        assert_eq!(first.token.expose(), "first");

        clock.advance(Duration::seconds(30));
        let cached = cache
            .get_or_refresh(|| async {
                Err(PipelineError::Aborted("ticket is still fresh".into()))
            })
            .await
            .unwrap();
        assert_eq!(cached, first);

        clock.advance(Duration::seconds(31));
        assert_eq!(cache.status().await, CacheStatus::Expired);
        assert_eq!(cache.current().await, None);

        let second = cache
            .get_or_refresh(|| slow_ticket("second", start() + Duration::hours(12)))
            .await
            .unwrap();
        assert_eq!(second.token.expose(), "second");
        assert_eq!(cache.refresh_count(), 2);
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_resets() {
        let clock = Arc::new(FixedClock::new(start()));
        let cache = cache(&clock);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async {
                            tokio::time::sleep(StdDuration::from_millis(50)).await;
                            Err(PipelineError::Protocol(ProtocolError::InvalidResponse {
                                service: "wsaa",
                                message: "missing <sign>".into(),
                            }))
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.code(), "PROTOCOL_INVALID_RESPONSE");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.status().await, CacheStatus::Empty);

        let ticket = cache
            .get_or_refresh(|| slow_ticket("retry", start() + Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(ticket.token.expose(), "retry");
    }

    #[tokio::test]
    async fn cancelled_caller_does_not_cancel_the_login() {
        let clock = Arc::new(FixedClock::new(start()));
        let cache = cache(&clock);

        let attempt = tokio::time::timeout(
            StdDuration::from_millis(5),
            cache.get_or_refresh(|| slow_ticket("late", start() + Duration::hours(1))),
        )
        .await;
        assert!(attempt.is_err());
        assert_eq!(cache.status().await, CacheStatus::Refreshing);

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(cache.status().await, CacheStatus::Valid);
        assert_eq!(cache.current().await.unwrap().token.expose(), "late");
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_login() {
        let clock = Arc::new(FixedClock::new(start()));
        let cache = cache(&clock);

        cache
            .get_or_refresh(|| slow_ticket("one", start() + Duration::hours(1)))
            .await
            .unwrap();
        cache.invalidate().await;
        assert_eq!(cache.status().await, CacheStatus::Empty);

        let ticket = cache
            .get_or_refresh(|| slow_ticket("two", start() + Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(ticket.token.expose(), "two");
    }
}
