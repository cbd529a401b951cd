//! Single source of truth for in-flight request state
//!
//! The [`Coordinator`] owns the correlation table. Every mutation — admitting
//! a request, matching a reply, reaping a deadline, recording a publish
//! outcome — goes through its methods and performs its lookup-and-remove step
//! inside one critical section. Whoever removes an entry is the only party
//! holding its waiter, so each waiter resolves exactly once no matter how
//! closely a reply and a timeout race each other.

use crate::envelope::{
    CorrelationId, Destination, RequestEnvelope, ResponseEnvelope, ResponseStatus,
};
use crate::requestor::RequestError;
use crate::stats::BridgeStats;
use crate::BoxedError;
use log::{debug, trace};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

/// Completion handle for an admitted round-trip request
///
/// Resolves with the correlated reply, a [`RequestError::Timeout`] once the
/// deadline passes, or a [`RequestError::Transport`] when the publish failed.
/// Dropping it abandons interest in the outcome; the table slot is reclaimed
/// when the deadline passes.
pub type ReplyWaiter = oneshot::Receiver<Result<ResponseEnvelope, RequestError>>;

/// Completion handle for a confirmed fire-and-forget send
pub type PublishWaiter = oneshot::Receiver<Result<(), RequestError>>;

/// In-flight request owned exclusively by the coordinator
///
/// Removed from the table at the instant it is resolved, never reused.
struct PendingRequest {
    deadline: Instant,
    waiter: oneshot::Sender<Result<ResponseEnvelope, RequestError>>,
}

struct Tables {
    pending: Mutex<HashMap<CorrelationId, PendingRequest>>,
    confirmations: Mutex<HashMap<CorrelationId, oneshot::Sender<Result<(), RequestError>>>>,
    reply_destination: String,
    stats: Arc<BridgeStats>,
}

/// Serialization point for all correlation state
///
/// Cheap to clone; all clones share the same tables.
#[derive(Clone)]
pub struct Coordinator {
    tables: Arc<Tables>,
}

impl Coordinator {
    /// Creates a new instance which stamps the given reply destination onto
    /// every round-trip envelope
    pub fn new(reply_destination: String, stats: Arc<BridgeStats>) -> Self {
        Self {
            tables: Arc::new(Tables {
                pending: Mutex::new(HashMap::new()),
                confirmations: Mutex::new(HashMap::new()),
                reply_destination,
                stats,
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingRequest>> {
        self.tables
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn confirmations(
        &self,
    ) -> MutexGuard<'_, HashMap<CorrelationId, oneshot::Sender<Result<(), RequestError>>>> {
        self.tables
            .confirmations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits a round-trip request
    ///
    /// Stamps a fresh correlation id, registers the pending entry and arms a
    /// reaper that fires [`resolve_timeout`](Self::resolve_timeout) once the
    /// deadline passes. The returned envelope is ready for submission to the
    /// publish pipeline.
    pub fn admit_round_trip(
        &self,
        destination: Destination,
        payload: Vec<u8>,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> (RequestEnvelope, ReplyWaiter) {
        let correlation_id = Uuid::new_v4();
        let deadline = Instant::now() + timeout;
        let (waiter, handle) = oneshot::channel();

        let envelope = RequestEnvelope::new(
            correlation_id,
            destination,
            payload,
            headers,
            timeout,
            Some(self.tables.reply_destination.clone()),
        );

        self.pending()
            .insert(correlation_id, PendingRequest { deadline, waiter });

        let coordinator = self.clone();
        tokio::spawn(async move {
            sleep_until(deadline).await;
            coordinator.resolve_timeout(correlation_id);
        });

        (envelope, handle)
    }

    /// Admits a fire-and-forget send whose caller wants a publish confirmation
    ///
    /// No entry is created in the reply table; the confirmation slot lives in
    /// a separate table and is resolved by the publish acknowledgement alone.
    /// The timeout bounds how long the caller may wait for that
    /// acknowledgement.
    pub fn admit_confirmed(
        &self,
        destination: Destination,
        payload: Vec<u8>,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> (RequestEnvelope, PublishWaiter) {
        let correlation_id = Uuid::new_v4();
        let deadline = Instant::now() + timeout;
        let (slot, handle) = oneshot::channel();

        let envelope =
            RequestEnvelope::new(correlation_id, destination, payload, headers, timeout, None);

        self.confirmations().insert(correlation_id, slot);

        let coordinator = self.clone();
        tokio::spawn(async move {
            sleep_until(deadline).await;
            coordinator.reap_confirmation(correlation_id);
        });

        (envelope, handle)
    }

    /// Admits a fire-and-forget send without any confirmation
    ///
    /// Only stamps the envelope; no state of any kind is allocated.
    pub fn admit_detached(
        &self,
        destination: Destination,
        payload: Vec<u8>,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> RequestEnvelope {
        RequestEnvelope::new(Uuid::new_v4(), destination, payload, headers, timeout, None)
    }

    /// Routes an inbound reply to the matching waiter
    ///
    /// Replies carrying an unknown correlation id — already resolved, expired
    /// or never ours to begin with — are dropped and counted. Late deliveries
    /// are legal broker behaviour, not an error.
    pub fn resolve_reply(&self, envelope: ResponseEnvelope) {
        let correlation_id = envelope.correlation_id();
        let removed = self.pending().remove(&correlation_id);

        match removed {
            Some(entry) => {
                let outcome = match envelope.status().clone() {
                    ResponseStatus::Ok => Ok(envelope),
                    ResponseStatus::Error(fault) => Err(RequestError::Remote(fault)),
                };

                // A closed waiter means the caller cancelled, nothing left to do
                let _ = entry.waiter.send(outcome);
            }
            None => {
                self.tables.stats.record_unknown_correlation();
                debug!(
                    "dropping reply with unknown correlation id {}",
                    correlation_id
                );
            }
        }
    }

    /// Fails the pending request with a timeout, if it is still in flight
    ///
    /// No-op when a reply won the race; the entry is then already gone.
    pub fn resolve_timeout(&self, correlation_id: CorrelationId) {
        if let Some(entry) = self.pending().remove(&correlation_id) {
            trace!(
                "reaping request {} (deadline {:?})",
                correlation_id,
                entry.deadline
            );
            let _ = entry.waiter.send(Err(RequestError::Timeout));
        }
    }

    /// Records a successful publish acknowledgement
    ///
    /// Fulfills the confirmation slot if one was registered at admission.
    /// Round-trip requests are unaffected; their resolution waits for a reply
    /// or the deadline.
    pub fn notify_publish_complete(&self, correlation_id: CorrelationId) {
        if let Some(slot) = self.confirmations().remove(&correlation_id) {
            let _ = slot.send(Ok(()));
        }
    }

    /// Fails whichever waiter was registered for a request that could not be
    /// handed to the broker
    ///
    /// Exactly the one affected caller observes the transport error; nothing
    /// else in the pipeline is touched.
    pub fn resolve_publish_failure(&self, correlation_id: CorrelationId, error: BoxedError) {
        if let Some(entry) = self.pending().remove(&correlation_id) {
            let _ = entry.waiter.send(Err(RequestError::Transport(error)));
            return;
        }

        if let Some(slot) = self.confirmations().remove(&correlation_id) {
            let _ = slot.send(Err(RequestError::Transport(error)));
        }
    }

    /// Number of requests currently awaiting a reply
    pub fn in_flight(&self) -> usize {
        self.pending().len()
    }

    fn reap_confirmation(&self, correlation_id: CorrelationId) {
        if let Some(slot) = self.confirmations().remove(&correlation_id) {
            let _ = slot.send(Err(RequestError::Timeout));
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::envelope::RemoteFault;
    use pretty_assertions::assert_eq;

    fn coordinator() -> Coordinator {
        Coordinator::new("replies".into(), Arc::new(BridgeStats::default()))
    }

    fn destination() -> Destination {
        "kafka:orders:pricing-svc".parse().unwrap()
    }

    #[tokio::test]
    async fn resolve_waiters_with_matching_replies() {
        let coordinator = coordinator();
        let (envelope, waiter) = coordinator.admit_round_trip(
            destination(),
            b"{}".to_vec(),
            BTreeMap::new(),
            Duration::from_secs(5),
        );

        let reply =
            ResponseEnvelope::ok(envelope.correlation_id(), b"42".to_vec(), BTreeMap::new());
        coordinator.resolve_reply(reply.clone());

        let resolved = waiter.await.unwrap().unwrap();
        assert_eq!(reply, resolved);
        assert_eq!(0, coordinator.in_flight());
    }

    #[tokio::test]
    async fn fulfill_fault_replies_as_failures() {
        let coordinator = coordinator();
        let (envelope, waiter) = coordinator.admit_round_trip(
            destination(),
            b"{}".to_vec(),
            BTreeMap::new(),
            Duration::from_secs(5),
        );

        coordinator.resolve_reply(ResponseEnvelope::fault(
            envelope.correlation_id(),
            RemoteFault::from_message("no price available"),
        ));

        match waiter.await.unwrap() {
            Err(RequestError::Remote(fault)) => {
                assert_eq!("no price available", fault.to_string())
            }
            other => panic!("expected a remote fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn resolve_waiters_with_timeouts() {
        let coordinator = coordinator();
        let started = std::time::Instant::now();

        let (_envelope, waiter) = coordinator.admit_round_trip(
            destination(),
            b"{}".to_vec(),
            BTreeMap::new(),
            Duration::from_millis(50),
        );

        match waiter.await.unwrap() {
            Err(RequestError::Timeout) => {}
            other => panic!("expected a timeout, got {:?}", other),
        }

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(0, coordinator.in_flight());
    }

    #[tokio::test]
    async fn drop_stray_replies_without_failing_anybody() {
        let stats = Arc::new(BridgeStats::default());
        let coordinator = Coordinator::new("replies".into(), Arc::clone(&stats));

        coordinator.resolve_reply(ResponseEnvelope::ok(
            Uuid::new_v4(),
            b"late".to_vec(),
            BTreeMap::new(),
        ));

        assert_eq!(1, stats.unknown_correlations());
        assert_eq!(0, coordinator.in_flight());
    }

    #[tokio::test]
    async fn resolve_exactly_once_when_reply_and_timeout_race() {
        let coordinator = coordinator();

        for _ in 0..100 {
            let (envelope, waiter) = coordinator.admit_round_trip(
                destination(),
                b"{}".to_vec(),
                BTreeMap::new(),
                Duration::from_secs(30),
            );
            let correlation_id = envelope.correlation_id();

            let replier = {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator.resolve_reply(ResponseEnvelope::ok(
                        correlation_id,
                        Vec::new(),
                        BTreeMap::new(),
                    ));
                })
            };
            let reaper = {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator.resolve_timeout(correlation_id);
                })
            };

            // The oneshot slot can only be written once, so receiving any
            // value at all proves a single resolution took place.
            let resolution = waiter.await.unwrap();
            assert!(matches!(resolution, Ok(_) | Err(RequestError::Timeout)));

            replier.await.unwrap();
            reaper.await.unwrap();
            assert_eq!(0, coordinator.in_flight());
        }
    }

    #[tokio::test]
    async fn absorb_replies_for_cancelled_requests() {
        let coordinator = coordinator();
        let (envelope, waiter) = coordinator.admit_round_trip(
            destination(),
            b"{}".to_vec(),
            BTreeMap::new(),
            Duration::from_secs(5),
        );

        // The caller loses interest before the reply arrives
        drop(waiter);

        coordinator.resolve_reply(ResponseEnvelope::ok(
            envelope.correlation_id(),
            b"42".to_vec(),
            BTreeMap::new(),
        ));

        assert_eq!(0, coordinator.in_flight());
    }

    #[tokio::test]
    async fn reclaim_abandoned_slots_at_the_deadline() {
        let coordinator = coordinator();
        let (_envelope, waiter) = coordinator.admit_round_trip(
            destination(),
            b"{}".to_vec(),
            BTreeMap::new(),
            Duration::from_millis(50),
        );

        drop(waiter);
        assert_eq!(1, coordinator.in_flight());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(0, coordinator.in_flight());
    }

    #[tokio::test]
    async fn confirm_publishes_independently_of_the_reply_table() {
        let coordinator = coordinator();
        let (envelope, confirmation) = coordinator.admit_confirmed(
            destination(),
            b"{}".to_vec(),
            BTreeMap::new(),
            Duration::from_secs(5),
        );

        assert_eq!(0, coordinator.in_flight());
        coordinator.notify_publish_complete(envelope.correlation_id());

        assert!(confirmation.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn time_out_unacknowledged_confirmations() {
        let coordinator = coordinator();
        let (_envelope, confirmation) = coordinator.admit_confirmed(
            destination(),
            b"{}".to_vec(),
            BTreeMap::new(),
            Duration::from_millis(50),
        );

        match confirmation.await.unwrap() {
            Err(RequestError::Timeout) => {}
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn surface_publish_failures_to_the_affected_caller_only() {
        let coordinator = coordinator();
        let (failing, failing_waiter) = coordinator.admit_round_trip(
            destination(),
            b"{}".to_vec(),
            BTreeMap::new(),
            Duration::from_secs(5),
        );
        let (healthy, healthy_waiter) = coordinator.admit_round_trip(
            destination(),
            b"{}".to_vec(),
            BTreeMap::new(),
            Duration::from_secs(5),
        );

        coordinator
            .resolve_publish_failure(failing.correlation_id(), "broker unreachable".into());
        coordinator.resolve_reply(ResponseEnvelope::ok(
            healthy.correlation_id(),
            Vec::new(),
            BTreeMap::new(),
        ));

        assert!(matches!(
            failing_waiter.await.unwrap(),
            Err(RequestError::Transport(_))
        ));
        assert!(healthy_waiter.await.unwrap().is_ok());
    }
}
