//! Per-host memo of the first verdict, shared by every probe worker.
//!
//! The first candidate seen for a host is probed; every later candidate on that
//! host waits for that verdict and is skipped when it was dead.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace};

/// The first verdict recorded for a host. Written once, never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCacheEntry {
    pub host: String,
    /// Whether the first probe found the host reachable
    pub reachable: bool,
    pub recorded_at: DateTime<Utc>,
}

/// What the gate says about a candidate on a given host
#[derive(Debug)]
pub enum HostAdmission<'a> {
    /// First candidate for the host. Its verdict must be recorded on the ticket.
    First(HostTicket<'a>),
    /// An earlier probe reached the host
    Open,
    /// An earlier probe found the host dead
    Closed,
}

/// Obligation to report the first verdict for a host.
///
/// Dropping the ticket without recording counts as an unreachable host, so
/// waiters are never left hanging.
#[derive(Debug)]
pub struct HostTicket<'a> {
    cache: &'a HostMemoCache,
    host: String,
    recorded: bool,
}

impl HostTicket<'_> {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn record(mut self, reachable: bool) {
        self.recorded = true;
        self.cache.record(&self.host, reachable);
    }
}

impl Drop for HostTicket<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            debug!(host = %self.host, "Host ticket dropped before a verdict, recording as unreachable");
            self.cache.record(&self.host, false);
        }
    }
}

/// Concurrency-safe map from host to its first verdict
#[derive(Debug, Default)]
pub struct HostMemoCache {
    slots: Mutex<HashMap<String, watch::Sender<Option<HostCacheEntry>>>>,
}

impl HostMemoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether a candidate on `host` should be probed.
    ///
    /// Exactly one caller per host receives [`HostAdmission::First`]; callers
    /// arriving before that verdict is recorded wait for it.
    pub async fn should_probe(&self, host: &str) -> HostAdmission<'_> {
        let key = host.to_ascii_lowercase();
        let mut receiver = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(sender) => sender.subscribe(),
                None => {
                    let (sender, _) = watch::channel(None);
                    slots.insert(key.clone(), sender);
                    trace!(host = %key, "First candidate for host");
                    return HostAdmission::First(HostTicket {
                        cache: self,
                        host: key,
                        recorded: false,
                    });
                }
            }
        };

        // The sender lives in the map for as long as `self`, so this only
        // returns once a verdict is written.
        let reachable = match receiver.wait_for(Option::is_some).await {
            Ok(entry) => entry.as_ref().is_some_and(|e| e.reachable),
            Err(_) => false,
        };

        if reachable {
            HostAdmission::Open
        } else {
            HostAdmission::Closed
        }
    }

    /// Records the first verdict for `host`. Later writes are ignored.
    ///
    /// Returns whether this call wrote the entry.
    pub fn record(&self, host: &str, reachable: bool) -> bool {
        let key = host.to_ascii_lowercase();
        let mut slots = self.slots.lock();
        let sender = slots
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0);

        let written = sender.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(HostCacheEntry {
                host: key.clone(),
                reachable,
                recorded_at: Utc::now(),
            });
            true
        });
        if written {
            debug!(host = %key, reachable, "Recorded host verdict");
        }
        written
    }

    pub fn get(&self, host: &str) -> Option<HostCacheEntry> {
        let slots = self.slots.lock();
        slots
            .get(&host.to_ascii_lowercase())
            .and_then(|sender| sender.borrow().clone())
    }

    /// Hosts with a recorded verdict
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|sender| sender.borrow().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
