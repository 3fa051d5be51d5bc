//! Fingerprint cache: replayable output of completed translations.

pub mod fingerprint;

use std::sync::Arc;

use bytes::Bytes;
use mini_moka::sync::Cache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::OwnedMutexGuard;

use crate::config::CacheConfig;
use crate::error::RelayError;

pub use fingerprint::{compute_fingerprint, Fingerprint, FingerprintInput};

/// Encoded frames captured from one translation, in emission order.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    frames: Arc<[Bytes]>,
}

impl CacheEntry {
    #[must_use]
    pub fn new(frames: Vec<Bytes>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    #[must_use]
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn check_readable(&self) -> Result<(), String> {
        if self.frames.is_empty() {
            return Err("entry holds no frames".to_string());
        }
        for (index, frame) in self.frames.iter().enumerate() {
            if frame.len() < 3 || frame.last() != Some(&b'\n') || frame.get(1) != Some(&b':') {
                return Err(format!("frame {index} is not a complete event line"));
            }
        }
        Ok(())
    }
}

type FlightTable = Arc<Mutex<FxHashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>>;

/// Process-wide cache shared by every request.
pub struct FingerprintCache {
    entries: Cache<Fingerprint, CacheEntry>,
    in_flight: FlightTable,
    enabled: bool,
}

impl FingerprintCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_entries.max(1));
        if let Some(ttl) = config.ttl() {
            builder = builder.time_to_live(ttl);
        }
        Self {
            entries: builder.build(),
            in_flight: Arc::new(Mutex::new(FxHashMap::default())),
            enabled: config.enabled,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up a stored sequence.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::CacheFault`] when the stored entry is unreadable.
    /// The entry is dropped so the next request goes to the provider.
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, RelayError> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(entry) = self.entries.get(fingerprint) else {
            return Ok(None);
        };
        if let Err(reason) = entry.check_readable() {
            self.entries.invalidate(fingerprint);
            return Err(RelayError::CacheFault(format!(
                "entry {fingerprint}: {reason}"
            )));
        }
        Ok(Some(entry))
    }

    /// Store a sequence. Empty sequences are ignored; a second put for the
    /// same fingerprint replaces the first.
    pub fn put(&self, fingerprint: Fingerprint, frames: Vec<Bytes>) {
        if !self.enabled || frames.is_empty() {
            return;
        }
        self.entries.insert(fingerprint, CacheEntry::new(frames));
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.invalidate(fingerprint);
    }

    /// Approximate: eviction bookkeeping runs lazily.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Wait until no other request is producing output for `fingerprint`.
    ///
    /// Holders of the returned guard for the same fingerprint are serialized.
    pub async fn acquire_flight(&self, fingerprint: Fingerprint) -> FlightGuard {
        let lock = {
            let mut table = self.in_flight.lock();
            Arc::clone(table.entry(fingerprint).or_default())
        };
        let ticket = FlightTicket {
            fingerprint,
            lock,
            table: Arc::clone(&self.in_flight),
        };
        let guard = Arc::clone(&ticket.lock).lock_owned().await;
        FlightGuard {
            _guard: guard,
            _ticket: ticket,
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Exclusive right to fill the cache for one fingerprint.
///
/// Field order matters: the mutex is released before the ticket tidies the table.
pub struct FlightGuard {
    _guard: OwnedMutexGuard<()>,
    _ticket: FlightTicket,
}

struct FlightTicket {
    fingerprint: Fingerprint,
    lock: Arc<tokio::sync::Mutex<()>>,
    table: FlightTable,
}

impl Drop for FlightTicket {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        let is_ours = table
            .get(&self.fingerprint)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock));
        // table + this ticket; anyone else still waiting holds a clone too
        if is_ours && Arc::strong_count(&self.lock) <= 2 {
            table.remove(&self.fingerprint);
        }
    }
}
