//! In-memory broker for tests
//!
//! Topics are unbounded queues, created on first use. Messages published
//! before anybody subscribes are retained, which keeps tests free of
//! subscription races. Each topic supports a single subscriber.

use super::{Publisher, Subscriber};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error returned for publishes to a topic marked as failing
#[derive(Error, Debug)]
#[error("the broker rejected the publish to `{0}`")]
pub struct PublishRejected(String);

struct Topic {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl Topic {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

#[derive(Default)]
struct Inner {
    topics: HashMap<String, Topic>,
    failing: HashSet<String>,
}

/// In-memory [`Publisher`] + [`Subscriber`] pair backed by per-topic queues
#[derive(Clone, Default)]
pub struct MockBroker {
    inner: Arc<Mutex<Inner>>,
}

impl MockBroker {
    /// Creates an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every future publish to the given topic
    pub fn fail_publishes(&self, topic: &str) {
        self.inner.lock().unwrap().failing.insert(topic.to_owned());
    }

    /// Drops a raw message straight into a topic, bypassing the publish path
    ///
    /// Used to simulate foreign or malformed traffic arriving from the broker.
    pub fn inject(&self, topic: &str, payload: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .topics
            .entry(topic.to_owned())
            .or_insert_with(Topic::new)
            .tx
            .send(payload)
            .expect("mock topic queue closed");
    }
}

#[async_trait]
impl Publisher for MockBroker {
    async fn publish(&self, topic: &str, _key: &str, payload: &[u8]) -> EmptyResult {
        let mut inner = self.inner.lock().unwrap();

        if inner.failing.contains(topic) {
            return Err(Box::new(PublishRejected(topic.to_owned())));
        }

        inner
            .topics
            .entry(topic.to_owned())
            .or_insert_with(Topic::new)
            .tx
            .send(payload.to_vec())
            .expect("mock topic queue closed");

        Ok(())
    }
}

#[async_trait]
impl Subscriber for MockBroker {
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<BoxStream<'static, Result<Vec<u8>, BoxedError>>, BoxedError> {
        let rx = self
            .inner
            .lock()
            .unwrap()
            .topics
            .entry(topic.to_owned())
            .or_insert_with(Topic::new)
            .rx
            .take()
            .expect("mock topic already has a subscriber");

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (Ok(payload), rx))
        });

        Ok(stream.boxed())
    }
}
