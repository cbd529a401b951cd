//! Request/response bridging for one-way, topic-based message brokers
//!
//! Topic brokers only know how to move opaque payloads from publishers to
//! subscribers. They provide neither reply routing nor any notion of "this
//! inbound message answers that outbound one". This crate supplies exactly
//! that missing layer: callers hand a payload to a logical
//! [`Destination`](envelope::Destination) and either await a correlated reply
//! within a deadline or fire-and-forget with an optional publish
//! confirmation.
//!
//! The moving parts, composed leaf-up:
//!
//! 1. The [`envelope`] module holds the immutable value types flowing through
//!    the pipeline.
//! 2. The [`coordinator`] owns the table of in-flight requests, stamps
//!    correlation ids and guarantees that every waiter resolves exactly once.
//! 3. The [`multiplexer`] fans concurrent callers into one bounded,
//!    backpressure-respecting egress sequence.
//! 4. The [`bridge`] glues that sequence to the broker primitives declared in
//!    [`transport`] and feeds inbound replies back into the coordinator.
//!
//! The [`requestor`] module exposes the public call surface on top of all of
//! the above.

#![deny(missing_docs)]

pub mod bridge;
pub mod codec;
pub mod coordinator;
pub mod envelope;
pub mod multiplexer;
pub mod requestor;
pub mod stats;
pub mod transport;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;
