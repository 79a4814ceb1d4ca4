//! Stream node and state types
//!
//! A node ties one producer buffer, at most one consumer descriptor and one
//! event object together for a single stream. Buffers and descriptors refer
//! back to their node by [`NodeId`], never by address.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::event::EventHandle;
use crate::Result;

use super::buffer::StreamBuffer;
use super::descriptor::{DescriptorId, StreamDescriptor};
use super::error::RegistryError;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Draw the next value from a process-wide id counter
///
/// Ids are never reused. Exhausting the counter is reported as an allocation
/// failure.
pub(super) fn allocate_id(counter: &AtomicU64, what: &'static str) -> Result<u64> {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
        .map_err(|_| RegistryError::AllocationFailure(what))
}

/// Stable identifier of a stream node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Reserve a fresh node id
    ///
    /// Useful when a descriptor must be created before its node.
    pub fn next() -> Result<Self> {
        allocate_id(&NEXT_NODE_ID, "node id").map(Self)
    }

    /// Raw id value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Id from a raw value; 0 is never allocated and means "none"
    pub(super) fn from_raw(raw: u64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Lifecycle state of a node, derived from its links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Producer buffer still attached
    Live,
    /// Buffer gone, consumer descriptor still outstanding
    PendingDetach,
    /// Both halves released; eligible for removal
    Orphan,
}

/// What the removal protocol does with a node in a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalAction {
    /// Leave the node untouched
    Retain,
    /// Wake the consumer, keep the node registered
    Signal,
    /// Unlink the node and destroy its event
    Free,
}

impl NodeState {
    /// Transition taken by `try_remove_and_free` for this state
    pub fn removal_action(self) -> RemovalAction {
        match self {
            NodeState::Live => RemovalAction::Retain,
            NodeState::PendingDetach => RemovalAction::Signal,
            NodeState::Orphan => RemovalAction::Free,
        }
    }
}

/// Registry record for a single stream
#[derive(Debug)]
pub struct StreamNode {
    id: NodeId,

    /// Event object owned by this node, destroyed when the node is freed
    event: EventHandle,

    /// Producer link; cleared on producer detach
    buffer: Option<Arc<StreamBuffer>>,

    /// Consumer link; at most one descriptor at a time
    descriptor: Option<DescriptorId>,

    /// When the node entered `PendingDetach`
    pending_since: Option<Instant>,

    created_at: Instant,
}

impl StreamNode {
    /// Create a new, unregistered stream node
    ///
    /// If a descriptor is given the node takes over the id it was created
    /// against, and the descriptor must share the node's event. If a buffer is
    /// given, its back-reference is claimed for this node; a buffer already
    /// claimed by another node is rejected.
    pub fn new(
        event: EventHandle,
        buffer: Option<Arc<StreamBuffer>>,
        descriptor: Option<&StreamDescriptor>,
    ) -> Result<Self> {
        let id = match descriptor {
            Some(desc) => {
                if !desc.shares_event(&event) {
                    return Err(RegistryError::invalid(
                        "descriptor event differs from node event",
                    ));
                }
                desc.node()
            }
            None => NodeId::next()?,
        };

        if let Some(ref buffer) = buffer {
            buffer.claim(id)?;
        }

        let mut node = Self {
            id,
            event,
            buffer,
            descriptor: descriptor.map(StreamDescriptor::id),
            pending_since: None,
            created_at: Instant::now(),
        };
        node.refresh_pending();
        Ok(node)
    }

    /// Node id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Event object shared with the consumer
    pub fn event(&self) -> &EventHandle {
        &self.event
    }

    /// Whether `event` is the object this node owns
    pub fn shares_event(&self, event: &EventHandle) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.event), Arc::as_ptr(event))
    }

    /// Attached buffer, if the producer is still present
    pub fn buffer(&self) -> Option<&Arc<StreamBuffer>> {
        self.buffer.as_ref()
    }

    /// Name of the attached buffer
    pub fn name(&self) -> Option<&str> {
        self.buffer.as_deref().map(StreamBuffer::name)
    }

    /// Attached descriptor id
    pub fn descriptor(&self) -> Option<DescriptorId> {
        self.descriptor
    }

    /// Current lifecycle state
    pub fn state(&self) -> NodeState {
        match (&self.buffer, &self.descriptor) {
            (Some(_), _) => NodeState::Live,
            (None, Some(_)) => NodeState::PendingDetach,
            (None, None) => NodeState::Orphan,
        }
    }

    /// When the node entered `PendingDetach`, if it is in that state
    pub fn pending_since(&self) -> Option<Instant> {
        self.pending_since
    }

    pub(super) fn set_descriptor(&mut self, descriptor: DescriptorId) {
        self.descriptor = Some(descriptor);
        self.refresh_pending();
    }

    pub(super) fn clear_descriptor(&mut self) -> Option<DescriptorId> {
        let prev = self.descriptor.take();
        self.refresh_pending();
        prev
    }

    pub(super) fn take_buffer(&mut self) -> Option<Arc<StreamBuffer>> {
        let prev = self.buffer.take();
        self.refresh_pending();
        prev
    }

    /// Give the buffer's back-reference up, for a node that never got linked
    pub(super) fn release_claim(&self) {
        if let Some(ref buffer) = self.buffer {
            buffer.release(self.id);
        }
    }

    pub(super) fn stats(&self) -> NodeStats {
        NodeStats {
            id: self.id,
            name: self.name().map(str::to_owned),
            state: self.state(),
            has_descriptor: self.descriptor.is_some(),
            age: self.created_at.elapsed(),
        }
    }

    fn refresh_pending(&mut self) {
        if self.state() == NodeState::PendingDetach {
            self.pending_since.get_or_insert_with(Instant::now);
        } else {
            self.pending_since = None;
        }
    }
}

/// Snapshot of a node for introspection
#[derive(Debug, Clone)]
pub struct NodeStats {
    /// Node id
    pub id: NodeId,
    /// Buffer name, if the producer is still attached
    pub name: Option<String>,
    /// Lifecycle state
    pub state: NodeState,
    /// Whether a consumer descriptor is attached
    pub has_descriptor: bool,
    /// Time since the node was created
    pub age: std::time::Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DataEvent;
    use crate::registry::descriptor::OpenFlags;

    #[test]
    fn test_node_with_buffer_is_live() {
        let buffer = Arc::new(StreamBuffer::new("gpu0").unwrap());
        let node = StreamNode::new(DataEvent::create(), Some(Arc::clone(&buffer)), None).unwrap();

        assert_eq!(node.state(), NodeState::Live);
        assert_eq!(node.name(), Some("gpu0"));
        assert_eq!(buffer.node(), Some(node.id()));
        assert!(node.pending_since().is_none());
    }

    #[test]
    fn test_node_without_links_is_orphan() {
        let node = StreamNode::new(DataEvent::create(), None, None).unwrap();
        assert_eq!(node.state(), NodeState::Orphan);
        assert!(node.name().is_none());
    }

    #[test]
    fn test_state_transitions() {
        let buffer = Arc::new(StreamBuffer::new("gpu0").unwrap());
        let event = DataEvent::create();
        let mut node = StreamNode::new(Arc::clone(&event), Some(buffer), None).unwrap();
        let desc = StreamDescriptor::new(node.id(), OpenFlags::NONE, event).unwrap();

        node.set_descriptor(desc.id());
        assert_eq!(node.state(), NodeState::Live);

        assert!(node.take_buffer().is_some());
        assert_eq!(node.state(), NodeState::PendingDetach);
        assert!(node.pending_since().is_some());

        assert_eq!(node.clear_descriptor(), Some(desc.id()));
        assert_eq!(node.state(), NodeState::Orphan);
        assert!(node.pending_since().is_none());
    }

    #[test]
    fn test_removal_actions() {
        assert_eq!(NodeState::Live.removal_action(), RemovalAction::Retain);
        assert_eq!(
            NodeState::PendingDetach.removal_action(),
            RemovalAction::Signal
        );
        assert_eq!(NodeState::Orphan.removal_action(), RemovalAction::Free);
    }

    #[test]
    fn test_buffer_claimed_by_one_node() {
        let buffer = Arc::new(StreamBuffer::new("gpu0").unwrap());
        StreamNode::new(DataEvent::create(), Some(Arc::clone(&buffer)), None).unwrap();

        let second = StreamNode::new(DataEvent::create(), Some(buffer), None);
        assert!(matches!(second, Err(RegistryError::InvalidArgument(_))));
    }

    #[test]
    fn test_node_from_descriptor_takes_its_id() {
        let id = NodeId::next().unwrap();
        let event = DataEvent::create();
        let desc = StreamDescriptor::new(id, OpenFlags::NO_BLOCK, Arc::clone(&event)).unwrap();

        let node = StreamNode::new(event, None, Some(&desc)).unwrap();
        assert_eq!(node.id(), id);
        assert_eq!(node.descriptor(), Some(desc.id()));
        assert_eq!(node.state(), NodeState::PendingDetach);
    }

    #[test]
    fn test_descriptor_with_foreign_event_rejected() {
        let id = NodeId::next().unwrap();
        let desc = StreamDescriptor::new(id, OpenFlags::NONE, DataEvent::create()).unwrap();

        let result = StreamNode::new(DataEvent::create(), None, Some(&desc));
        assert!(matches!(result, Err(RegistryError::InvalidArgument(_))));
    }

    #[test]
    fn test_node_ids_are_unique() {
        let a = NodeId::next().unwrap();
        let b = NodeId::next().unwrap();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_id_exhaustion_is_allocation_failure() {
        let counter = AtomicU64::new(u64::MAX);
        assert_eq!(
            allocate_id(&counter, "node id"),
            Err(RegistryError::AllocationFailure("node id"))
        );
    }
}
