//! Broadcast orchestration: dispatch to every node, collect, aggregate.
//!
//! - `dispatcher`: publishes one request per node and awaits the batch
//! - `collector`: records replies from node response channels
//! - `correlation`: in-flight aggregations keyed by correlation id
//! - `envelope`: request/response bodies on the wire

pub mod collector;
pub mod correlation;
pub mod dispatcher;
pub mod envelope;

pub use collector::{subscribe_collectors, CollectError, NodeResponseHandler, ResponseCollector};
pub use correlation::{
    AggregationError, AggregationHandle, AggregationSpec, CorrelationRegistry, NodeReply,
    RecordOutcome,
};
pub use dispatcher::{DispatchError, RequestDispatcher};
pub use envelope::{EnvelopeError, NodeRequest, NodeResponse};
