//! Event notifier primitives
//!
//! Every stream node owns exactly one waitable event. The producer side (or
//! the registry, when the producer goes away) signals it; the consumer holding
//! the stream's descriptor waits on it.
//!
//! The registry only depends on the [`EventObject`] trait. [`DataEvent`] is the
//! default implementation, built on `tokio::sync::Notify`.

pub mod error;
pub mod notifier;

pub use error::NotifierError;
pub use notifier::{DataEvent, EventHandle, EventObject, WaitOutcome};
