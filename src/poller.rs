//! Dispatches metrics fetches and numbers them in request order.
//!
//! Fetches run as tokio tasks and may overlap. Each result carries the
//! sequence number of the request that produced it, so the receiving side can
//! discard a slow response that arrives after a newer one.

use crate::api::{AllResponse, ApiClient, HashResponse};
use crate::clock::Clock;
use crate::error::ApiError;
use crate::sampler::Snapshot;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Result of one fetch.
#[derive(Debug)]
pub struct PollOutcome {
    pub sequence: u64,
    /// When the response was received
    pub captured_at: DateTime<Utc>,
    pub result: Result<AllResponse, ApiError>,
}

impl PollOutcome {
    /// Sampler input for a successful fetch.
    #[cfg(test)]
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.result
            .as_ref()
            .ok()
            .map(|resp| resp.snapshot(self.captured_at))
    }
}

pub struct Poller {
    client: ApiClient,
    clock: Arc<dyn Clock>,
    next_sequence: u64,
    in_flight: Arc<AtomicUsize>,
    tx: mpsc::UnboundedSender<PollOutcome>,
}

impl Poller {
    /// Create a poller and the channel its background fetches report on.
    pub fn new(client: ApiClient, clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<PollOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = Self {
            client,
            clock,
            next_sequence: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
            tx,
        };
        (poller, rx)
    }

    fn allocate_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Number of fetches started but not yet reported.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Start a fetch in the background. Must be called within a tokio runtime.
    pub fn dispatch(&mut self) -> u64 {
        let sequence = self.allocate_sequence();
        let client = self.client.clone();
        let clock = Arc::clone(&self.clock);
        let in_flight = Arc::clone(&self.in_flight);
        let tx = self.tx.clone();

        in_flight.fetch_add(1, Ordering::Relaxed);
        debug!(sequence, endpoint = client.endpoint(), "dispatching poll");

        tokio::spawn(async move {
            let result = client.fetch_all().await;
            let captured_at = clock.now();
            in_flight.fetch_sub(1, Ordering::Relaxed);
            if let Err(ref e) = result {
                warn!(sequence, error = %e, "poll failed");
            }
            if tx
                .send(PollOutcome {
                    sequence,
                    captured_at,
                    result,
                })
                .is_err()
            {
                debug!(sequence, "poll result dropped, receiver closed");
            }
        });

        sequence
    }

    /// Fetch the random digest in the background. Digest requests are not
    /// sequenced; the receiver yields the single result.
    pub fn dispatch_hash(&self) -> oneshot::Receiver<Result<HashResponse, ApiError>> {
        let client = self.client.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let (tx, rx) = oneshot::channel();

        in_flight.fetch_add(1, Ordering::Relaxed);
        debug!("dispatching hash request");

        tokio::spawn(async move {
            let result = client.fetch_hash().await;
            in_flight.fetch_sub(1, Ordering::Relaxed);
            if let Err(ref e) = result {
                warn!(error = %e, "hash request failed");
            }
            if tx.send(result).is_err() {
                debug!("hash result dropped, receiver closed");
            }
        });

        rx
    }

    /// Fetch in the foreground and return the outcome directly.
    pub async fn poll_now(&mut self) -> PollOutcome {
        let sequence = self.allocate_sequence();
        let result = self.client.fetch_all().await;
        if let Err(ref e) = result {
            warn!(sequence, error = %e, "poll failed");
        }
        PollOutcome {
            sequence,
            captured_at: self.clock.now(),
            result,
        }
    }
}
