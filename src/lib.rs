//! Registry of named producer/consumer streams
//!
//! A stream has a producer-owned [`StreamBuffer`] and at most one
//! consumer-owned [`StreamDescriptor`]. The [`StreamRegistry`] links both
//! halves to a [`StreamNode`], answers lookups from either side, and tears a
//! node down only after both halves are released. If the producer leaves
//! first, a consumer blocked on the node's event is woken so it can notice.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use stream_registry::{DataEvent, OpenFlags, StreamBuffer, StreamRegistry, WaitOutcome};
//!
//! # async fn demo() -> stream_registry::Result<()> {
//! let registry = Arc::new(StreamRegistry::new());
//!
//! let buffer = Arc::new(StreamBuffer::new("hwperf")?);
//! let node = registry.create_stream(buffer, DataEvent::create()).await?;
//! let desc = registry.open_stream("hwperf", OpenFlags::NONE).await?;
//!
//! registry.release_buffer(node).await?;
//! if desc.wait(Duration::from_secs(1)).await == WaitOutcome::Signaled
//!     && !registry.is_stream_alive(&desc).await
//! {
//!     registry.release_descriptor(desc).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod event;
pub mod registry;

pub use event::{DataEvent, EventHandle, EventObject, NotifierError, WaitOutcome};
pub use registry::{
    DescriptorId, DeviceContext, NodeId, NodeState, OpenFlags, RegistryConfig, RegistryError,
    RemovalOutcome, StreamBuffer, StreamDescriptor, StreamNode, StreamRegistry,
};

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
