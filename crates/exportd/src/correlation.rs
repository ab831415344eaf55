/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! In-memory correlation of request ids with their eventual completions.
//!
//! The gateway parks each HTTP request in [`CorrelationStore::await_completion`]
//! while a background consumer feeds completions in through
//! [`CorrelationStore::publish`]. The store guarantees:
//!
//! - **Claim-on-read**: an entry is removed under the same lock that reads
//!   it, so a completion reaches at most one waiter.
//! - **Bounded waits**: a waiter returns [`Claim::TimedOut`] no earlier than
//!   its deadline and no later than one poll interval after it.
//! - **Prompt wake-up**: `publish` notifies the waiters of that id directly;
//!   the poll interval is only a fallback.
//! - **Bounded size**: completions nobody claims (their caller already timed
//!   out) are dropped by [`CorrelationStore::sweep_expired`] once older than
//!   the configured TTL.
//!
//! The store is process-local and not durable. Build one at startup and hand
//! it out as `Arc<CorrelationStore>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::messages::CompletionRecord;

/// Tuning for [`CorrelationStore`].
#[derive(Debug, Clone)]
pub struct CorrelationStoreConfig {
    /// Fallback interval at which a waiter rechecks the store without having
    /// been notified.
    pub poll_interval: Duration,
    /// How long an unclaimed completion is kept before it is swept.
    pub entry_ttl: Duration,
    /// How often the background sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for CorrelationStoreConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            entry_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Result of waiting for a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The completion arrived and was removed from the store for this caller.
    Completed(CompletionRecord),
    /// The wait budget ran out first. Any later completion stays orphaned
    /// until swept.
    TimedOut,
}

impl Claim {
    pub fn into_completion(self) -> Option<CompletionRecord> {
        match self {
            Claim::Completed(record) => Some(record),
            Claim::TimedOut => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Claim::TimedOut)
    }
}

struct Entry {
    record: CompletionRecord,
    stored_at: Instant,
}

struct Waiters {
    notify: Arc<Notify>,
    count: usize,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    waiters: HashMap<String, Waiters>,
}

/// Registry of completions keyed by request id.
pub struct CorrelationStore {
    state: Mutex<State>,
    config: CorrelationStoreConfig,
}

impl CorrelationStore {
    pub fn new(config: CorrelationStoreConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            config,
        }
    }

    pub fn config(&self) -> &CorrelationStoreConfig {
        &self.config
    }

    /// Stores `record` under its id, replacing any unclaimed entry, and wakes
    /// a waiter for that id if there is one.
    pub fn publish(&self, record: CompletionRecord) {
        let id = record.id.clone();

        let (notify, replaced, entries) = {
            let mut state = self.state.lock();
            let replaced = state
                .entries
                .insert(
                    id.clone(),
                    Entry {
                        record,
                        stored_at: Instant::now(),
                    },
                )
                .is_some();
            let notify = state.waiters.get(&id).map(|w| Arc::clone(&w.notify));
            (notify, replaced, state.entries.len())
        };

        metrics::counter!("exportd_correlation_published_total").increment(1);
        metrics::gauge!("exportd_correlation_entries").set(entries as f64);
        debug!(
            request_id = %id,
            replaced,
            waiting = notify.is_some(),
            "Completion stored"
        );

        if let Some(notify) = notify {
            notify.notify_one();
        }
    }

    /// Removes and returns the completion for `id` if it has arrived.
    pub fn try_claim(&self, id: &str) -> Option<CompletionRecord> {
        let mut state = self.state.lock();
        let entry = state.entries.remove(id)?;
        metrics::gauge!("exportd_correlation_entries").set(state.entries.len() as f64);
        Some(entry.record)
    }

    /// Waits up to `timeout` for the completion of `id` and claims it.
    ///
    /// Only the calling task is suspended, and the store's lock is never held
    /// while it sleeps. Dropping the returned future deregisters the waiter.
    pub async fn await_completion(&self, id: &str, timeout: Duration) -> Claim {
        let deadline = Instant::now() + timeout;
        let waiter = self.register_waiter(id);

        loop {
            if let Some(record) = self.try_claim(id) {
                metrics::counter!("exportd_correlation_claimed_total").increment(1);
                debug!(request_id = %id, "Completion claimed");
                return Claim::Completed(record);
            }

            let now = Instant::now();
            if now >= deadline {
                metrics::counter!("exportd_correlation_timeouts_total").increment(1);
                info!(
                    request_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for completion"
                );
                return Claim::TimedOut;
            }

            let recheck_at = deadline.min(now + self.config.poll_interval);
            tokio::select! {
                _ = waiter.notify.notified() => {}
                _ = tokio::time::sleep_until(recheck_at) => {}
            }
        }
    }

    /// Drops unclaimed completions older than the configured TTL.
    ///
    /// Returns how many entries were removed.
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.config.entry_ttl;
        let (swept, remaining) = {
            let mut state = self.state.lock();
            let before = state.entries.len();
            state
                .entries
                .retain(|_, entry| entry.stored_at.elapsed() < ttl);
            (before - state.entries.len(), state.entries.len())
        };

        if swept > 0 {
            metrics::counter!("exportd_correlation_swept_total").increment(swept as u64);
            metrics::gauge!("exportd_correlation_entries").set(remaining as f64);
        }
        swept
    }

    /// Spawns a task that calls [`sweep_expired`](Self::sweep_expired) every
    /// `sweep_interval` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Correlation sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let swept = store.sweep_expired();
                        if swept > 0 {
                            info!(swept, "Swept orphaned completions");
                        }
                    }
                }
            }
        })
    }

    /// Number of completions waiting to be claimed.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ids that currently have at least one waiter.
    pub fn pending_waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn register_waiter<'a>(&'a self, id: &'a str) -> WaiterGuard<'a> {
        let mut state = self.state.lock();
        let waiters = state
            .waiters
            .entry(id.to_string())
            .or_insert_with(|| Waiters {
                notify: Arc::new(Notify::new()),
                count: 0,
            });
        waiters.count += 1;

        WaiterGuard {
            store: self,
            id,
            notify: Arc::clone(&waiters.notify),
        }
    }
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new(CorrelationStoreConfig::default())
    }
}

/// Keeps a waiter registered for as long as `await_completion` is running.
struct WaiterGuard<'a> {
    store: &'a CorrelationStore,
    id: &'a str,
    notify: Arc<Notify>,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.store.state.lock();
        if let Some(waiters) = state.waiters.get_mut(self.id) {
            waiters.count -= 1;
            if waiters.count == 0 {
                state.waiters.remove(self.id);
            }
        }
    }
}
