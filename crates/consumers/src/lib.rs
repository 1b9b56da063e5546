//! The consuming side of the message flow.
//!
//! - [`Consumer`] for business handlers that process one message
//! - [`DeliveryRunner`] for dedup, retry with backoff and dead-lettering
//! - [`DeadLetterManager`] for replaying parked messages
//! - [`ConsumerWorker`] for draining a queue into a runner
//! - [`CartSummaryProjection`], a read model fed from cart events

pub mod cart_summary;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod retry;
pub mod runner;
pub mod worker;

pub use cart_summary::{CART_SUMMARY_QUEUE, CartSummary, CartSummaryProjection, SummaryLine};
pub use consumer::Consumer;
pub use dead_letter::{DeadLetterManager, RetryReceipt};
pub use error::{ConsumerError, RetryDeadLetterError};
pub use retry::RetryPolicy;
pub use runner::{DeliveryOutcome, DeliveryRunner};
pub use worker::ConsumerWorker;
