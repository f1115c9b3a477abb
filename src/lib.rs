//! Speech synthesis job scheduling with provider failover and a
//! content-addressed result cache.
//!
//! A [`worker::Worker`] dequeues jobs from the [`queue::JobQueue`], asks the
//! [`orchestrator::ProviderOrchestrator`] for audio (cache first, then the
//! primary with bounded retries, then the secondary), uploads the artifact and
//! reports the outcome back to the queue's retry policy.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod limits;
pub mod orchestrator;
pub mod payload;
pub mod provider;
pub mod queue;
pub mod service;
pub mod sinks;
pub mod telemetry;
pub mod ui;
pub mod worker;

pub use error::AppError;
pub use service::SpeechService;
