//! Stream registry for producer/consumer streams
//!
//! The registry tracks every stream node, lets the producer and the consumer
//! find their stream, and frees a node only once both sides have let go.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<StreamRegistry>
//!                  ┌──────────────────────────┐
//!                  │ nodes (newest first):    │
//!                  │   StreamNode {           │
//!                  │     buffer: Option<..>,  │
//!                  │     descriptor: Option,  │
//!                  │     event: EventHandle,  │
//!                  │   }                      │
//!                  └────────────┬─────────────┘
//!                               │
//!            ┌──────────────────┴──────────────────┐
//!            │                                     │
//!            ▼                                     ▼
//!       [Producer]                            [Consumer]
//!   create_stream(buffer)               open_stream(name) ─► StreamDescriptor
//!   release_buffer(id)                  descriptor.wait(timeout)
//!                                       release_descriptor(desc)
//! ```
//!
//! # Removal
//!
//! | Producer | Consumer | State           | `try_remove_and_free`       |
//! |----------|----------|-----------------|-----------------------------|
//! | attached | any      | `Live`          | nothing                     |
//! | gone     | attached | `PendingDetach` | signal the event, keep node |
//! | gone     | gone     | `Orphan`        | unlink, destroy the event   |
//!
//! A consumer woken in `PendingDetach` sees that its stream is no longer
//! alive and releases its descriptor, which frees the node.

pub mod buffer;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod global;
pub mod node;
pub mod store;

pub use buffer::{StreamBuffer, MAX_STREAM_NAME_LEN};
pub use config::{RegistryConfig, MIN_REAP_INTERVAL};
pub use descriptor::{DescriptorId, OpenFlags, StreamDescriptor};
pub use device::DeviceContext;
pub use error::RegistryError;
pub use node::{NodeId, NodeState, NodeStats, RemovalAction, StreamNode};
pub use store::{RegistryStats, RemovalOutcome, ShutdownReport, StreamRegistry};
