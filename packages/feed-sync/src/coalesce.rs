//! Trailing-edge coalescing for feed refreshes.
//!
//! At most one fetch runs at a time. A refresh requested while one is in
//! flight does not start a second fetch; it marks the gate *pending*, and
//! settling the current [`Lease`] hands out exactly one more lease for the
//! trailing fetch, no matter how many requests piled up. The trailing lease
//! is owned, so it can move to a background task instead of keeping the
//! first caller busy.
//!
//! ```text
//!  request ─► idle? ──yes──► Lease (caller fetches)
//!               │                   │ settle()
//!               no                  ├─ pending ─► next Lease (trailing fetch)
//!               ▼                   └─ idle
//!       Follower (waits until a fetch that started after it settles)
//! ```
//!
//! Requests are numbered. A fetch *covers* every request numbered at or
//! below the counter value read when the fetch started, so a follower is
//! satisfied only by a fetch that began after it asked.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use crate::error::{FeedError, StoreError, StoreOp};

#[derive(Debug, Default)]
struct GateState {
    in_flight: bool,
    pending: bool,
    requested: u64,
}

/// Outcome of the most recent fetch.
#[derive(Debug, Clone, Default)]
pub(crate) struct Settlement {
    /// Highest request number this fetch covered.
    through: u64,
    failure: Option<FeedError>,
}

/// Snapshot of the gate, for refresh indicators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStatus {
    pub in_flight: bool,
    pub pending: bool,
    /// Callers parked until a trailing fetch settles.
    pub waiting: usize,
}

pub(crate) struct RefreshGate {
    state: Mutex<GateState>,
    settled: watch::Sender<Settlement>,
}

pub(crate) enum Ticket {
    /// No fetch was running; the holder must fetch and settle.
    Lease(Lease),
    /// A fetch is running; wait for the trailing one.
    Follower(Follower),
}

impl RefreshGate {
    pub(crate) fn new() -> Self {
        let (settled, _) = watch::channel(Settlement::default());
        Self {
            state: Mutex::new(GateState::default()),
            settled,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> RefreshStatus {
        let state = self.lock();
        RefreshStatus {
            in_flight: state.in_flight,
            pending: state.pending,
            waiting: self.settled.receiver_count(),
        }
    }

    pub(crate) fn request(self: &Arc<Self>) -> Ticket {
        let mut state = self.lock();
        state.requested += 1;

        if state.in_flight {
            state.pending = true;
            debug!(ticket = state.requested, "refresh in flight, coalescing");
            Ticket::Follower(Follower {
                ticket: state.requested,
                settled: self.settled.subscribe(),
            })
        } else {
            state.in_flight = true;
            Ticket::Lease(Lease {
                gate: Arc::clone(self),
                covers: state.requested,
                armed: true,
            })
        }
    }

    /// Publish a fetch outcome. Returns the request number the trailing
    /// fetch will cover, if one is owed.
    fn finish(&self, covers: u64, failure: Option<FeedError>) -> Option<u64> {
        self.settled.send_replace(Settlement {
            through: covers,
            failure,
        });

        let mut state = self.lock();
        if state.pending {
            state.pending = false;
            Some(state.requested)
        } else {
            state.in_flight = false;
            None
        }
    }

    /// The lease holder went away mid-fetch. Release everyone waiting.
    fn abandon(&self) {
        let mut state = self.lock();
        state.in_flight = false;
        state.pending = false;
        self.settled.send_replace(Settlement {
            through: state.requested,
            failure: Some(FeedError::Store {
                operation: StoreOp::ListPosts,
                source: StoreError::Transport("refresh abandoned before completion".into()),
            }),
        });
    }
}

/// The right to run one fetch. Must be settled; dropping it unsettled
/// fails every waiting follower instead of leaving them hanging.
pub(crate) struct Lease {
    gate: Arc<RefreshGate>,
    covers: u64,
    armed: bool,
}

impl Lease {
    pub(crate) fn covers(&self) -> u64 {
        self.covers
    }

    /// Record the fetch outcome. Returns the lease for the trailing fetch
    /// if more refreshes were requested meanwhile.
    pub(crate) fn settle(mut self, failure: Option<FeedError>) -> Option<Lease> {
        self.armed = false;
        let covers = self.gate.finish(self.covers, failure)?;
        Some(Lease {
            gate: Arc::clone(&self.gate),
            covers,
            armed: true,
        })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.armed {
            self.gate.abandon();
        }
    }
}

pub(crate) struct Follower {
    ticket: u64,
    settled: watch::Receiver<Settlement>,
}

impl Follower {
    /// Wait for the first fetch covering this request. Yields its failure, if any.
    pub(crate) async fn wait(mut self) -> Option<FeedError> {
        let ticket = self.ticket;
        match self.settled.wait_for(|s| s.through >= ticket).await {
            Ok(settlement) => settlement.failure.clone(),
            Err(_) => Some(FeedError::SessionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_gate() -> Arc<RefreshGate> {
        Arc::new(RefreshGate::new())
    }

    fn lease(ticket: Ticket) -> Lease {
        match ticket {
            Ticket::Lease(lease) => lease,
            Ticket::Follower(_) => panic!("expected a lease"),
        }
    }

    fn follower(ticket: Ticket) -> Follower {
        match ticket {
            Ticket::Follower(follower) => follower,
            Ticket::Lease(_) => panic!("expected a follower"),
        }
    }

    #[test]
    fn test_first_request_gets_lease() {
        let gate = new_gate();
        let first = lease(gate.request());
        assert_eq!(first.covers(), 1);
        assert!(gate.status().in_flight);
        assert!(!gate.status().pending);

        assert!(first.settle(None).is_none());
        assert_eq!(gate.status(), RefreshStatus::default());
    }

    #[test]
    fn test_many_requests_while_in_flight_owe_one_trailing_fetch() {
        let gate = new_gate();
        let first = lease(gate.request());

        let followers: Vec<Follower> = (0..10).map(|_| follower(gate.request())).collect();
        assert_eq!(followers.len(), 10);
        assert!(gate.status().pending);
        assert_eq!(gate.status().waiting, 10);

        let trailing = first.settle(None).expect("trailing fetch owed");
        assert_eq!(trailing.covers(), 11);
        assert!(!gate.status().pending);

        assert!(trailing.settle(None).is_none());
        assert!(!gate.status().in_flight);
    }

    #[tokio::test]
    async fn test_follower_waits_for_trailing_fetch_not_current_one() {
        let gate = new_gate();
        let first = lease(gate.request());
        let waiter = follower(gate.request());

        let failure = Some(FeedError::Store {
            operation: StoreOp::ListPosts,
            source: StoreError::Transport("boom".into()),
        });
        // The in-flight fetch started before the follower asked.
        let trailing = first.settle(failure).expect("trailing fetch owed");
        assert!(trailing.settle(None).is_none());

        assert_eq!(waiter.wait().await, None);
    }

    #[tokio::test]
    async fn test_follower_sees_trailing_failure() {
        let gate = new_gate();
        let first = lease(gate.request());
        let waiter = follower(gate.request());

        let trailing = first.settle(None).expect("trailing fetch owed");
        let failure = FeedError::Store {
            operation: StoreOp::ListPosts,
            source: StoreError::Transport("down".into()),
        };
        assert!(trailing.settle(Some(failure.clone())).is_none());

        assert_eq!(waiter.wait().await, Some(failure));
    }

    #[tokio::test]
    async fn test_trailing_lease_outlives_the_settled_one() {
        let gate = new_gate();
        let first = lease(gate.request());
        let waiter = follower(gate.request());

        let trailing = first.settle(None).expect("trailing fetch owed");
        let handle = tokio::spawn(async move { trailing.settle(None) });

        assert_eq!(waiter.wait().await, None);
        assert!(handle.await.unwrap().is_none());
        assert_eq!(gate.status(), RefreshStatus::default());
    }

    #[tokio::test]
    async fn test_dropped_lease_releases_followers() {
        let gate = new_gate();
        let first = lease(gate.request());
        let waiter = follower(gate.request());

        drop(first);

        assert!(waiter.wait().await.is_some());
        assert_eq!(gate.status(), RefreshStatus::default());
        // The gate is usable again.
        assert!(matches!(gate.request(), Ticket::Lease(_)));
    }
}
