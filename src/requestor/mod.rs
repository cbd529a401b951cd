//! Public call surface exposed to application code
//!
//! A [`Requestor`] is a cheap, cloneable handle that any number of tasks may
//! use concurrently. It owns nothing but references into the shared pipeline;
//! the actual work happens in the [`TransportBridge`] returned alongside it,
//! which the application is expected to drive (usually via `tokio::spawn`).

use crate::bridge::{BridgeConfig, TransportBridge};
use crate::coordinator::Coordinator;
use crate::envelope::{Destination, DestinationParseError, RemoteFault};
use crate::multiplexer::{self, IngressMultiplexer};
use crate::stats::BridgeStats;
use crate::transport::{Publisher, Subscriber};
use crate::BoxedError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type for the caller-facing operations
#[derive(Error, Debug)]
pub enum RequestError {
    /// The destination string did not parse; nothing was queued
    #[error("destination is malformed")]
    InvalidDestination(#[from] DestinationParseError),
    /// No matching reply (or publish acknowledgement) arrived within the deadline
    #[error("no reply arrived within the deadline")]
    Timeout,
    /// The request could not be handed to the broker; it was never published
    /// and is not retried automatically
    #[error("handing the request to the broker failed")]
    Transport(#[source] BoxedError),
    /// The answering service processed the request but reported a failure
    #[error("the answering service reported a failure")]
    Remote(#[source] RemoteFault),
    /// A reply arrived and matched, but its payload did not deserialize into
    /// the type the caller asked for
    #[error("the reply payload could not be deserialized into the requested type")]
    ResponseUndecodable(#[source] BoxedError),
}

#[derive(Error, Debug)]
#[error("the bridge terminated before resolving the request")]
struct BridgeTerminated;

/// Handle for issuing requests and sends over the shared pipeline
#[derive(Clone)]
pub struct Requestor {
    coordinator: Coordinator,
    multiplexer: IngressMultiplexer,
    stats: Arc<BridgeStats>,
}

impl Requestor {
    /// Creates the call surface together with the bridge driving it
    ///
    /// The requestor is inert until the returned bridge is run.
    pub fn new<P, S>(
        config: BridgeConfig,
        publisher: P,
        subscriber: S,
    ) -> (Self, TransportBridge<P, S>)
    where
        P: Publisher + Send + Sync,
        S: Subscriber + Send + Sync,
    {
        let stats = Arc::new(BridgeStats::default());
        let coordinator = Coordinator::new(config.reply_destination.clone(), Arc::clone(&stats));
        let (ingress, egress) = multiplexer::channel(config.admission_capacity);

        let bridge = TransportBridge::new(
            &config,
            coordinator.clone(),
            Arc::clone(&stats),
            publisher,
            subscriber,
            egress,
        );

        let requestor = Self {
            coordinator,
            multiplexer: ingress,
            stats,
        };

        (requestor, bridge)
    }

    /// Process-wide observability counters
    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Publishes a payload and awaits the correlated reply
    ///
    /// Resolves with the deserialized reply payload, a
    /// [`RequestError::Timeout`] once the deadline passes, or the error that
    /// kept the request out of the broker. Dropping the returned future
    /// abandons interest in the reply; the correlation slot is reclaimed when
    /// the deadline passes.
    pub async fn request<In, Out>(
        &self,
        destination: &str,
        payload: &In,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Out, RequestError>
    where
        In: Serialize + Sync + ?Sized,
        Out: DeserializeOwned,
    {
        let destination: Destination = destination.parse()?;
        let payload =
            serde_json::to_vec(payload).map_err(|e| RequestError::Transport(Box::new(e)))?;

        let (envelope, waiter) =
            self.coordinator
                .admit_round_trip(destination, payload, headers, timeout);
        self.multiplexer.submit(envelope).await?;

        let reply = waiter
            .await
            .map_err(|_| RequestError::Transport(Box::new(BridgeTerminated)))??;

        serde_json::from_slice(reply.payload())
            .map_err(|e| RequestError::ResponseUndecodable(Box::new(e)))
    }

    /// Publishes a payload without expecting a reply
    ///
    /// With `confirm_publish` the call resolves once the broker acknowledges
    /// the publish, bounded by `timeout`; without it, the call resolves as
    /// soon as the envelope is admitted into the pipeline.
    pub async fn send<In>(
        &self,
        destination: &str,
        payload: &In,
        confirm_publish: bool,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<(), RequestError>
    where
        In: Serialize + Sync + ?Sized,
    {
        let destination: Destination = destination.parse()?;
        let payload =
            serde_json::to_vec(payload).map_err(|e| RequestError::Transport(Box::new(e)))?;

        if confirm_publish {
            let (envelope, confirmation) =
                self.coordinator
                    .admit_confirmed(destination, payload, headers, timeout);
            self.multiplexer.submit(envelope).await?;

            confirmation
                .await
                .map_err(|_| RequestError::Transport(Box::new(BridgeTerminated)))?
        } else {
            let envelope = self
                .coordinator
                .admit_detached(destination, payload, headers, timeout);
            self.multiplexer.submit(envelope).await
        }
    }
}
