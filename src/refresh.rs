//! Periodic dashboard refresh.
//!
//! Every refresh is tagged with a sequence number. Responses can arrive out of
//! order, so one older than the last applied response is dropped.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

/// Keeps the value of the newest request seen so far.
#[derive(Debug)]
pub struct Latest<T> {
    next_seq: u64,
    applied: Option<u64>,
    value: Option<T>,
}

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            applied: None,
            value: None,
        }
    }
}

impl<T> Latest<T> {
    pub fn issue(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Stores `value` unless a newer request has already been applied.
    pub fn offer(&mut self, seq: u64, value: T) -> bool {
        if self.applied.is_some_and(|applied| applied >= seq) {
            return false;
        }
        self.applied = Some(seq);
        self.value = Some(value);
        true
    }

    /// Marks `seq` as resolved without a value, so older responses stay stale.
    pub fn skip(&mut self, seq: u64) {
        if self.applied.map_or(true, |applied| applied < seq) {
            self.applied = Some(seq);
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

/// Calls `fetch` every `every` until `shutdown` flips to true (or its sender goes
/// away), handing each fresh value to `on_update`. Outstanding fetches are
/// cancelled on the way out. Returns the number of applied updates.
pub async fn run<T, F, Fut, U>(
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut fetch: F,
    mut on_update: U,
) -> usize
where
    T: Send + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    U: FnMut(u64, &T),
{
    let mut latest: Latest<T> = Latest::default();
    let mut in_flight: JoinSet<(u64, anyhow::Result<T>)> = JoinSet::new();
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut applied = 0usize;

    if *shutdown.borrow() {
        return applied;
    }

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                let Ok((seq, result)) = joined else {
                    continue;
                };
                match result {
                    Ok(value) => {
                        if latest.offer(seq, value) {
                            if let Some(value) = latest.get() {
                                on_update(seq, value);
                            }
                            applied += 1;
                        } else {
                            debug!(seq, "discarded stale refresh");
                        }
                    }
                    Err(error) => {
                        latest.skip(seq);
                        warn!(seq, error = %error, "refresh failed; keeping previous data");
                    }
                }
            }
            _ = ticker.tick() => {
                let seq = latest.issue();
                debug!(seq, "refreshing");
                let request = fetch();
                in_flight.spawn(async move { (seq, request.await) });
            }
        }
    }

    in_flight.abort_all();
    debug!(applied, "refresh loop stopped");
    applied
}
