//! Boundary to the underlying one-way broker
//!
//! The bridge only ever talks to the broker through these two traits. They
//! deliberately know nothing about envelopes or correlation: topics and bytes
//! in, topics and bytes out. Concrete implementations (Kafka, Redis streams,
//! ...) live outside this crate; the in-memory one under [`mock`] exists for
//! tests.

use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::BoxStream;

#[cfg(test)]
pub mod mock;

/// Raw publish primitive of the underlying broker
#[async_trait]
pub trait Publisher {
    /// Publishes a payload to a topic, resolving once the broker acknowledges it
    ///
    /// The key may be used by partitioned brokers to keep related messages
    /// together. An `Err` means the broker never accepted the message; the
    /// bridge does not republish on its own.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> EmptyResult;
}

/// Raw subscribe primitive of the underlying broker
#[async_trait]
pub trait Subscriber {
    /// Opens a continuous stream of raw messages from the given topic
    ///
    /// The stream is expected to live for the remainder of the process;
    /// individual erroneous items must not end it.
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<BoxStream<'static, Result<Vec<u8>, BoxedError>>, BoxedError>;
}
