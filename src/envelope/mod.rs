//! Immutable value types flowing through the bridge
//!
//! Everything in this module is pure data plus validation. Envelopes are
//! constructed once, at well-defined points of the pipeline, and travel by
//! value from there on. No structure in here touches the broker or the
//! correlation table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Header stamped onto every outgoing envelope, carrying the logical service
/// identifier of the destination so respondents can filter shared topics.
pub const SERVICE_HEADER: &str = "service-id";

/// Opaque token linking an outgoing request to its eventual inbound reply
///
/// Randomly drawn from a 122-bit space, making a collision with an
/// outstanding request practically impossible.
pub type CorrelationId = Uuid;

/// Error describing why a destination string was rejected
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DestinationParseError {
    /// The string did not consist of exactly three `:`-separated segments
    #[error("expected `medium:topic:service-id`, found {0} segment(s)")]
    SegmentCount(usize),
    /// One of the three segments was empty
    #[error("the `{0}` segment is empty")]
    EmptySegment(&'static str),
}

/// Location a request is published to and the logical service expected to answer it
///
/// Parsed from the textual form `medium:topic:service-id` (e.g.
/// `kafka:orders:pricing-svc`) exactly once, at the call boundary. Malformed
/// input is rejected before anything is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    medium: String,
    topic: String,
    service_id: String,
}

impl Destination {
    /// Broker family the request travels over (informational, the transport
    /// implementation decides what to do with it)
    pub fn medium(&self) -> &str {
        &self.medium
    }

    /// Topic the request is published to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Logical service expected to answer
    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

impl FromStr for Destination {
    type Err = DestinationParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = input.split(':').collect();

        if segments.len() != 3 {
            return Err(DestinationParseError::SegmentCount(segments.len()));
        }

        let labels = ["medium", "topic", "service-id"];
        for (segment, label) in segments.iter().zip(labels.iter().copied()) {
            if segment.is_empty() {
                return Err(DestinationParseError::EmptySegment(label));
            }
        }

        Ok(Self {
            medium: segments[0].to_owned(),
            topic: segments[1].to_owned(),
            service_id: segments[2].to_owned(),
        })
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.medium, self.topic, self.service_id)
    }
}

/// Outgoing message, stamped at admission time
///
/// Instances are created exclusively by the
/// [`Coordinator`](crate::coordinator::Coordinator) so that correlation ids
/// can never be forged or reused by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    correlation_id: CorrelationId,
    destination: Destination,
    payload: Vec<u8>,
    headers: BTreeMap<String, String>,
    timeout: Duration,
    expect_reply: bool,
    reply_destination: Option<String>,
}

impl RequestEnvelope {
    pub(crate) fn new(
        correlation_id: CorrelationId,
        destination: Destination,
        payload: Vec<u8>,
        mut headers: BTreeMap<String, String>,
        timeout: Duration,
        reply_destination: Option<String>,
    ) -> Self {
        headers.insert(SERVICE_HEADER.to_owned(), destination.service_id().to_owned());

        Self {
            correlation_id,
            destination,
            payload,
            headers,
            timeout,
            expect_reply: reply_destination.is_some(),
            reply_destination,
        }
    }

    /// Correlation id assigned at admission
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Where this envelope is published to
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Opaque request payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Headers in deterministic order, including the stamped [`SERVICE_HEADER`]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Time the caller is willing to wait for a resolution
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a correlated reply is expected
    pub fn expect_reply(&self) -> bool {
        self.expect_reply
    }

    /// Reply location respondents should publish their answer to
    pub fn reply_destination(&self) -> Option<&str> {
        self.reply_destination.as_deref()
    }
}

/// Outcome reported by the answering service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// The payload carries a regular reply
    Ok,
    /// The answering service failed and reports why
    Error(RemoteFault),
}

/// Incoming reply, created when an inbound wire message is decoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    correlation_id: CorrelationId,
    payload: Vec<u8>,
    headers: BTreeMap<String, String>,
    status: ResponseStatus,
}

impl ResponseEnvelope {
    /// Creates a successful reply to the given correlation id
    pub fn ok(
        correlation_id: CorrelationId,
        payload: Vec<u8>,
        headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            correlation_id,
            payload,
            headers,
            status: ResponseStatus::Ok,
        }
    }

    /// Creates a failure reply to the given correlation id
    pub fn fault(correlation_id: CorrelationId, fault: RemoteFault) -> Self {
        Self {
            correlation_id,
            payload: Vec::new(),
            headers: BTreeMap::new(),
            status: ResponseStatus::Error(fault),
        }
    }

    /// Correlation id copied over from the request this answers
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Opaque reply payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Reply headers
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Whether the answering service succeeded
    pub fn status(&self) -> &ResponseStatus {
        &self.status
    }
}

/// Serializable failure reported by a remote service
///
/// Receiving services cannot know the concrete error types on the other side
/// of the wire, so the cause chain is flattened into messages at the sender
/// and reassembled into one readable trace here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    causes: Vec<String>,
}

impl RemoteFault {
    /// Flattens the full source chain of an error into a wire-safe form
    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source: Option<&(dyn Error + 'static)> = Some(error);

        while let Some(current) = source {
            causes.push(current.to_string());
            source = current.source();
        }

        Self { causes }
    }

    /// Creates an instance from a plain message
    pub fn from_message<M: Into<String>>(message: M) -> Self {
        Self {
            causes: vec![message.into()],
        }
    }
}

impl Display for RemoteFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.causes.split_first() {
            Some((first, rest)) => {
                write!(f, "{}", first)?;
                for cause in rest {
                    write!(f, ": {}", cause)?;
                }
                Ok(())
            }
            None => write!(f, "unknown remote failure"),
        }
    }
}

impl Error for RemoteFault {}
