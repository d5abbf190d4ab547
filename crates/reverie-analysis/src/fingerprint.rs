//! Content fingerprinting and single-flight analysis coordination.
//!
//! The fingerprint is a SHA-256 over NFC-normalized, whitespace-collapsed
//! content plus the analysis-version identifier — stable across processes
//! and runs. The coordinator guarantees at most one analysis in flight per
//! fingerprint: the first caller runs, concurrent callers park on a watch
//! channel and receive the same outcome. TTL-based result reuse lives in the
//! cache layer; this type only owns the in-flight window.

use std::future::Future;

use dashmap::DashMap;
use reverie_core::signal::SignalRecord;
use reverie_core::types::{AnalysisVersion, Fingerprint};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, instrument};
use unicode_normalization::UnicodeNormalization;

use crate::error::AnalysisError;

/// Canonicalize content before hashing: NFC normalization, whitespace
/// collapsed to single spaces, leading/trailing whitespace trimmed.
pub fn canonicalize(content: &str) -> String {
    let normalized: String = content.nfc().collect();
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compute the fingerprint of `(content, version)`.
pub fn fingerprint(content: &str, version: &AnalysisVersion) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(content).as_bytes());
    // Unit separator keeps (content, version) unambiguous.
    hasher.update([0x1f]);
    hasher.update(version.as_str().as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone)]
enum FlightState {
    Running,
    Done(Result<SignalRecord, AnalysisError>),
}

/// Process-wide single-flight map keyed by fingerprint.
#[derive(Default)]
pub struct FingerprintCoordinator {
    inflight: DashMap<Fingerprint, watch::Receiver<FlightState>>,
}

impl FingerprintCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fingerprints currently in flight.
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Run `work` for `fp`, or wait on the run already in flight.
    ///
    /// The first caller for an absent fingerprint executes `work`; concurrent
    /// callers for the same fingerprint receive a clone of the same outcome —
    /// success or failure alike; the coordinator never converts a failure
    /// into silent success. On completion the flight is released, so the
    /// next caller after a failure may retry (no negative caching).
    #[instrument(skip(self, work), fields(fp = %fp))]
    pub async fn run<F, Fut>(&self, fp: Fingerprint, work: F) -> Result<SignalRecord, AnalysisError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SignalRecord, AnalysisError>>,
    {
        // Short critical section: either install our flight or grab a
        // receiver for the one already running.
        let tx = {
            match self.inflight.entry(fp.clone()) {
                dashmap::mapref::entry::Entry::Occupied(occupied) => {
                    let rx = occupied.get().clone();
                    drop(occupied);
                    debug!("joining in-flight analysis");
                    return Self::wait(rx).await;
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    let (tx, rx) = watch::channel(FlightState::Running);
                    vacant.insert(rx);
                    tx
                }
            }
        };

        // The guard releases the flight even if `work` panics or the task is
        // dropped mid-run, so later callers never park on a dead flight.
        let guard = FlightGuard {
            map: &self.inflight,
            fp,
        };
        let result = work().await;
        // Release before notifying so a retry after failure can start
        // immediately.
        drop(guard);
        let _ = tx.send(FlightState::Done(result.clone()));
        result
    }

    async fn wait(mut rx: watch::Receiver<FlightState>) -> Result<SignalRecord, AnalysisError> {
        loop {
            {
                let state = rx.borrow();
                if let FlightState::Done(result) = &*state {
                    return result.clone();
                }
            }
            if rx.changed().await.is_err() {
                // Runner dropped without publishing (cancelled/panicked);
                // let this waiter surface a retryable cancellation.
                return Err(AnalysisError::Cancelled);
            }
        }
    }
}

/// Removes the in-flight entry on drop, unwinding included.
struct FlightGuard<'a> {
    map: &'a DashMap<Fingerprint, watch::Receiver<FlightState>>,
    fp: Fingerprint,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.fp);
    }
}
