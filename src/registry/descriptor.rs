//! Consumer-side stream descriptor

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use crate::event::{EventHandle, WaitOutcome};
use crate::Result;

use super::node::{allocate_id, NodeId};

static NEXT_DESCRIPTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(u64);

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "desc#{}", self.0)
    }
}

/// Flags a descriptor was opened with
///
/// The registry stores these but never interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    /// Blocking, read-write access
    pub const NONE: Self = Self(0);
    /// Reads return immediately when no data is available
    pub const NO_BLOCK: Self = Self(1 << 0);
    /// Consumer never commits reads back to the stream
    pub const READ_ONLY: Self = Self(1 << 1);

    /// Build from raw bits
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether all bits of `other` are set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Consumer handle to a stream node
#[derive(Debug)]
pub struct StreamDescriptor {
    id: DescriptorId,

    /// Node this descriptor was created against
    node: NodeId,

    flags: OpenFlags,

    /// Same event object the node owns
    event: EventHandle,
}

impl StreamDescriptor {
    /// Create a descriptor bound to `node`
    ///
    /// The descriptor is not attached to anything until the registry links it.
    pub fn new(node: NodeId, flags: OpenFlags, event: EventHandle) -> Result<Self> {
        let id = allocate_id(&NEXT_DESCRIPTOR_ID, "descriptor id").map(DescriptorId)?;

        Ok(Self {
            id,
            node,
            flags,
            event,
        })
    }

    /// Descriptor identity
    pub fn id(&self) -> DescriptorId {
        self.id
    }

    /// Node this descriptor refers to
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Open flags
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Event handle shared with the node
    pub fn event(&self) -> &EventHandle {
        &self.event
    }

    /// Whether `event` is the same object this descriptor waits on
    pub fn shares_event(&self, event: &EventHandle) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.event), Arc::as_ptr(event))
    }

    /// Wait for a stream-state change, giving up after `timeout`
    ///
    /// A wake-up does not say what changed. After [`WaitOutcome::Signaled`]
    /// the consumer should check whether its stream is still alive.
    pub async fn wait(&self, timeout: Duration) -> WaitOutcome {
        tokio::time::timeout(timeout, self.event.wait())
            .await
            .unwrap_or(WaitOutcome::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DataEvent, EventObject};

    #[test]
    fn test_new_descriptor() {
        let node = NodeId::next().unwrap();
        let event = DataEvent::create();
        let desc = StreamDescriptor::new(node, OpenFlags::NO_BLOCK, Arc::clone(&event)).unwrap();

        assert_eq!(desc.node(), node);
        assert!(desc.flags().contains(OpenFlags::NO_BLOCK));
        assert!(!desc.flags().contains(OpenFlags::READ_ONLY));
        assert!(desc.shares_event(&event));
        assert!(!desc.shares_event(&DataEvent::create()));
    }

    #[test]
    fn test_descriptor_ids_are_unique() {
        let node = NodeId::next().unwrap();
        let event = DataEvent::create();
        let a = StreamDescriptor::new(node, OpenFlags::NONE, Arc::clone(&event)).unwrap();
        let b = StreamDescriptor::new(node, OpenFlags::NONE, event).unwrap();

        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_flags_combine() {
        let mut flags = OpenFlags::NO_BLOCK | OpenFlags::READ_ONLY;
        assert!(flags.contains(OpenFlags::NO_BLOCK));
        assert!(flags.contains(OpenFlags::READ_ONLY));
        assert_eq!(flags.bits(), 0b11);

        flags |= OpenFlags::from_bits(1 << 4);
        assert_eq!(flags.bits(), 0b1_0011);
        assert!(OpenFlags::NONE.contains(OpenFlags::NONE));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let node = NodeId::next().unwrap();
        let desc = StreamDescriptor::new(node, OpenFlags::NONE, DataEvent::create()).unwrap();

        let outcome = desc.wait(Duration::from_millis(20)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_wait_sees_signal() {
        let node = NodeId::next().unwrap();
        let event = DataEvent::create();
        let desc = StreamDescriptor::new(node, OpenFlags::NONE, Arc::clone(&event)).unwrap();

        event.signal().unwrap();
        let outcome = desc.wait(Duration::from_secs(1)).await;
        assert_eq!(outcome, WaitOutcome::Signaled);
    }
}
