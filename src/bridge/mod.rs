//! Glue between the coordinator-driven envelope stream and the broker
//!
//! The bridge runs two independently scheduled halves. The publish side
//! drains the ingress multiplexer with a bounded degree of parallelism,
//! encodes each envelope and hands it to the broker's publish primitive. The
//! subscribe side consumes the reply topic for the lifetime of the process
//! and demultiplexes every decodable message back into the coordinator. The
//! halves share no mutable state; the coordinator is their only meeting
//! point, so a slow replier never stalls new requests.

use crate::codec;
use crate::coordinator::Coordinator;
use crate::envelope::RequestEnvelope;
use crate::multiplexer::Egress;
use crate::stats::BridgeStats;
use crate::transport::{Publisher, Subscriber};
use crate::EmptyResult;
use futures::StreamExt;
use log::warn;
use std::sync::Arc;

/// Tunables of the bridge pipeline
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bound on envelopes that may sit admitted-but-unpublished at any
    /// instant; a zero value is treated as one
    pub admission_capacity: usize,
    /// Number of concurrently outstanding publish operations
    pub publish_concurrency: usize,
    /// Topic carrying replies back to this process
    pub reply_destination: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            admission_capacity: 64,
            publish_concurrency: 16,
            reply_destination: "replies".into(),
        }
    }
}

/// Bidirectional pipeline stage between the multiplexer and the broker
pub struct TransportBridge<P, S> {
    coordinator: Coordinator,
    stats: Arc<BridgeStats>,
    publisher: P,
    subscriber: S,
    egress: Egress,
    reply_destination: String,
    publish_concurrency: usize,
}

impl<P, S> TransportBridge<P, S>
where
    P: Publisher + Send + Sync,
    S: Subscriber + Send + Sync,
{
    pub(crate) fn new(
        config: &BridgeConfig,
        coordinator: Coordinator,
        stats: Arc<BridgeStats>,
        publisher: P,
        subscriber: S,
        egress: Egress,
    ) -> Self {
        Self {
            coordinator,
            stats,
            publisher,
            subscriber,
            egress,
            reply_destination: config.reply_destination.clone(),
            publish_concurrency: config.publish_concurrency,
        }
    }

    /// Drives both halves of the pipeline
    ///
    /// Resolves once every ingress handle has been dropped and the remaining
    /// admitted envelopes are published. An `Err` is only returned when the
    /// reply subscription cannot be established or terminally fails —
    /// individual bad messages never end the loop.
    pub async fn run(self) -> EmptyResult {
        let Self {
            coordinator,
            stats,
            publisher,
            subscriber,
            egress,
            reply_destination,
            publish_concurrency,
        } = self;

        let publish = {
            let coordinator = &coordinator;
            let publisher = &publisher;

            egress
                .into_stream()
                .for_each_concurrent(Some(publish_concurrency), move |envelope| async move {
                    Self::dispatch(publisher, coordinator, envelope).await
                })
        };

        let demux = Self::demultiplex(&subscriber, &reply_destination, &coordinator, &stats);

        tokio::select! {
            _ = publish => Ok(()),
            result = demux => result,
        }
    }

    /// Publishes one admitted envelope and reports the outcome to the coordinator
    async fn dispatch(publisher: &P, coordinator: &Coordinator, envelope: RequestEnvelope) {
        let correlation_id = envelope.correlation_id();

        let payload = match codec::encode_request(&envelope) {
            Ok(payload) => payload,
            Err(error) => {
                coordinator.resolve_publish_failure(correlation_id, error);
                return;
            }
        };

        let topic = envelope.destination().topic();
        let key = envelope.destination().service_id();

        match publisher.publish(topic, key, &payload).await {
            Ok(()) => {
                // Round-trip requests resolve via reply or deadline, publish
                // success changes nothing observable for them
                if !envelope.expect_reply() {
                    coordinator.notify_publish_complete(correlation_id);
                }
            }
            Err(error) => coordinator.resolve_publish_failure(correlation_id, error),
        }
    }

    /// Consumes the reply topic and feeds every decodable message to the coordinator
    async fn demultiplex(
        subscriber: &S,
        reply_destination: &str,
        coordinator: &Coordinator,
        stats: &BridgeStats,
    ) -> EmptyResult {
        let mut replies = subscriber.subscribe(reply_destination).await?;

        while let Some(message) = replies.next().await {
            match message {
                Ok(payload) => match codec::decode_response(&payload) {
                    Ok(envelope) => coordinator.resolve_reply(envelope),
                    Err(error) => {
                        stats.record_decode_failure();
                        warn!("dropping undecodable reply: {}", error);
                    }
                },
                Err(error) => {
                    stats.record_reception_failure();
                    warn!("reply reception failed: {}", error);
                }
            }
        }

        Ok(())
    }
}
