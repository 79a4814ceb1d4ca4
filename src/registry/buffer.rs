//! Producer-side stream buffer handle
//!
//! Payload transfer is not handled here. The registry only needs the buffer's
//! name for lookups and a back-reference to the node that claimed it.

use std::sync::atomic::{AtomicU64, Ordering};

use super::error::RegistryError;
use super::node::NodeId;
use crate::Result;

/// Maximum stream name length in bytes
pub const MAX_STREAM_NAME_LEN: usize = 20;

/// Producer-owned stream buffer
#[derive(Debug)]
pub struct StreamBuffer {
    /// Stream name, compared by exact equality
    name: String,

    /// Raw id of the node that claimed this buffer (0 = unclaimed)
    node: AtomicU64,
}

impl StreamBuffer {
    /// Create a new stream buffer with the given name
    ///
    /// The name must be non-empty and at most [`MAX_STREAM_NAME_LEN`] bytes.
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(RegistryError::invalid("stream name is empty"));
        }
        if name.len() > MAX_STREAM_NAME_LEN {
            return Err(RegistryError::invalid(format!(
                "stream name exceeds {} bytes",
                MAX_STREAM_NAME_LEN
            )));
        }

        let mut owned = String::new();
        owned
            .try_reserve_exact(name.len())
            .map_err(|_| RegistryError::AllocationFailure("stream buffer name"))?;
        owned.push_str(name);

        Ok(Self {
            name: owned,
            node: AtomicU64::new(0),
        })
    }

    /// Stream name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node this buffer belongs to, if claimed
    pub fn node(&self) -> Option<NodeId> {
        NodeId::from_raw(self.node.load(Ordering::Acquire))
    }

    /// Record the owning node. Fails if another node already claimed it.
    pub(super) fn claim(&self, node: NodeId) -> Result<()> {
        self.node
            .compare_exchange(0, node.as_u64(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| RegistryError::invalid(format!("buffer '{}' already claimed", self.name)))
    }

    /// Drop the claim held by `node`, so the buffer can back another node
    pub(super) fn release(&self, node: NodeId) {
        let _ = self
            .node
            .compare_exchange(node.as_u64(), 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer() {
        let buffer = StreamBuffer::new("gpu0").unwrap();
        assert_eq!(buffer.name(), "gpu0");
        assert!(buffer.node().is_none());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            StreamBuffer::new(""),
            Err(RegistryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_long_name_rejected() {
        let name = "x".repeat(MAX_STREAM_NAME_LEN + 1);
        assert!(matches!(
            StreamBuffer::new(&name),
            Err(RegistryError::InvalidArgument(_))
        ));

        let name = "x".repeat(MAX_STREAM_NAME_LEN);
        assert!(StreamBuffer::new(&name).is_ok());
    }

    #[test]
    fn test_claim_once() {
        let buffer = StreamBuffer::new("hwperf").unwrap();
        let first = NodeId::next().unwrap();
        let second = NodeId::next().unwrap();

        buffer.claim(first).unwrap();
        assert_eq!(buffer.node(), Some(first));

        assert!(buffer.claim(second).is_err());
        assert_eq!(buffer.node(), Some(first));
    }

    #[test]
    fn test_release_only_by_owner() {
        let buffer = StreamBuffer::new("hwperf").unwrap();
        let owner = NodeId::next().unwrap();
        let other = NodeId::next().unwrap();
        buffer.claim(owner).unwrap();

        buffer.release(other);
        assert_eq!(buffer.node(), Some(owner));

        buffer.release(owner);
        assert!(buffer.node().is_none());
        buffer.claim(other).unwrap();
        assert_eq!(buffer.node(), Some(other));
    }
}
