//! Ingestion pipeline stages.
//!
//! Submissions enter through the [`PayloadRouter`], which authenticates them
//! with the [`AuthGate`] and enqueues them through the [`QueueAdapter`],
//! externalizing large payloads to the object store first. On the other side
//! of the queue the [`TransformDispatcher`] evaluates each account's
//! expression and hands the result to the [`DeliveryForwarder`].
//!
//! [`Pipeline`] wires every stage over one set of [`Collaborators`].

pub mod auth;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod metrics;
mod pipeline;
pub mod provisioning;
pub mod queue;
pub mod router;
mod timeout;
pub mod worker;

pub use auth::AuthGate;
pub use delivery::DeliveryForwarder;
pub use dispatcher::{
    BatchReport, DispatchSettings, Disposition, DropReason, MessageOutcome, TransformDispatcher,
};
pub use error::{DeliveryError, FailedStage, ProvisionError, RouteError};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{Collaborators, Pipeline, PipelineConfig};
pub use provisioning::{ConfigRequest, Provisioner};
pub use queue::{Delivery, PollBatch, PollSettings, QueueAdapter};
pub use router::{EnqueueOutcome, PayloadRouter, RouteMode, SubmitRequest};
pub use worker::QueueWorker;
