//! Question relay worker
//!
//! This crate provides the consume-side core:
//! - RetryPolicy: bounded redelivery decisions for failed completions
//! - Intake: normalization of the accepted message shapes
//! - GeminiCompleter: the completion service client behind the `Completer` seam
//! - DeliveryRouter: direct delivery into a conversation with queue fallback
//! - MessageProcessor: the per-message state machine and its settle decision
//! - Worker: the supervised consume loop

pub mod completion;
pub mod delivery;
pub mod error;
pub mod intake;
pub mod metrics;
pub mod processor;
pub mod retry;
pub mod supervisor;

pub use completion::{build_prompt, Completer, CompletionError, GeminiCompleter};
pub use delivery::{DeliveryError, DeliveryOutcome, DeliveryRouter, DirectDeliveryClient};
pub use error::WorkerError;
pub use intake::parse_question;
pub use processor::{MessageProcessor, ProcessingOutcome};
pub use retry::{RetryDecision, RetryPolicy};
pub use supervisor::{supervise, Worker};

pub type Result<T> = std::result::Result<T, WorkerError>;
