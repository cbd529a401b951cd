//! Fan-in of concurrent callers into one bounded egress sequence
//!
//! Arbitrarily many callers submit stamped envelopes; the publish pipeline
//! drains them as a single stream. The channel in between is bounded, so a
//! saturated pipeline suspends submitters cooperatively instead of buffering
//! without limit. Admitted items are never dropped. Submissions from one
//! handle stay in order; no ordering is promised across handles.

use crate::envelope::RequestEnvelope;
use crate::requestor::RequestError;
use futures::stream::{self, Stream};
use thiserror::Error;
use tokio::sync::mpsc;

/// Raised when the transport bridge driving the egress side has terminated
#[derive(Error, Debug)]
#[error("the publish pipeline is no longer running")]
pub struct PipelineClosed;

/// Caller-facing handle admitting envelopes into the pipeline
#[derive(Clone)]
pub struct IngressMultiplexer {
    tx: mpsc::Sender<RequestEnvelope>,
}

/// Consuming half handed to the transport bridge
pub struct Egress {
    rx: mpsc::Receiver<RequestEnvelope>,
}

/// Creates a connected multiplexer/egress pair
///
/// The capacity bounds how many envelopes may sit admitted-but-unpublished at
/// any instant, trading caller-side suspension against memory use. A capacity
/// of zero is treated as one, the smallest bound under which submissions can
/// make progress.
pub fn channel(capacity: usize) -> (IngressMultiplexer, Egress) {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    (IngressMultiplexer { tx }, Egress { rx })
}

impl IngressMultiplexer {
    /// Hands an envelope to the publish pipeline
    ///
    /// Suspends while the pipeline is at capacity. Once this returns `Ok`,
    /// the envelope is admitted and will be published unless the bridge
    /// terminates first.
    pub async fn submit(&self, envelope: RequestEnvelope) -> Result<(), RequestError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| RequestError::Transport(Box::new(PipelineClosed)))
    }
}

impl Egress {
    /// Turns the receiving half into the single ordered stream the bridge drains
    pub(crate) fn into_stream(self) -> impl Stream<Item = RequestEnvelope> {
        stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|envelope| (envelope, rx))
        })
    }
}
