//! Stream registry implementation
//!
//! The central registry that links stream nodes, resolves lookups from both
//! sides and runs the two-sided removal protocol.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock, Weak};

use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::event::{EventHandle, NotifierError};
use crate::Result;

use super::buffer::StreamBuffer;
use super::config::{RegistryConfig, MIN_REAP_INTERVAL};
use super::descriptor::{OpenFlags, StreamDescriptor};
use super::device::DeviceContext;
use super::error::RegistryError;
use super::node::{NodeId, NodeState, NodeStats, RemovalAction, StreamNode};

/// Result of one pass of the removal protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// Producer still attached; nothing happened
    Retained,
    /// Consumer still attached; its event was signaled
    Signaled,
    /// Node unlinked and its event destroyed
    Freed,
}

/// Registry-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered nodes
    pub stream_count: usize,
    /// Nodes with a producer buffer
    pub live: usize,
    /// Nodes waiting for their consumer to detach
    pub pending_detach: usize,
    /// Nodes with neither half attached
    pub orphan: usize,
}

/// What `shutdown` found while draining the registry
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Nodes drained and freed
    pub freed: usize,
    /// Nodes whose consumer was woken during teardown
    pub woken: usize,
    /// Nodes that still had a producer attached
    pub leaked: Vec<NodeStats>,
}

/// Event work decided under the write lock
enum Deferred {
    Nothing,
    Signal(NodeId, EventHandle),
    Destroy(StreamNode),
}

#[derive(Default)]
struct RegistryInner {
    /// Registered nodes, most recently added first
    nodes: VecDeque<StreamNode>,

    closed: bool,
}

impl RegistryInner {
    fn position(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|node| node.id() == id)
    }

    fn find(&self, id: NodeId) -> Option<&StreamNode> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    fn find_mut(&mut self, id: NodeId) -> Option<&mut StreamNode> {
        self.nodes.iter_mut().find(|node| node.id() == id)
    }

    fn find_by_name(&self, name: &str) -> Option<&StreamNode> {
        self.nodes.iter().find(|node| node.name() == Some(name))
    }

    /// Check that `node` may be linked and reserve its slot
    fn admit(&mut self, node: &StreamNode) -> Result<()> {
        if self.closed {
            return Err(RegistryError::ShutDown);
        }
        if self.position(node.id()).is_some() {
            return Err(RegistryError::invalid(format!(
                "{} is already registered",
                node.id()
            )));
        }
        self.nodes
            .try_reserve(1)
            .map_err(|_| RegistryError::AllocationFailure("registry slot"))
    }

    /// Push an admitted node to the front
    fn link(&mut self, node: StreamNode) -> NodeId {
        let id = node.id();
        self.nodes.push_front(node);
        id
    }

    /// Whether a registered node owns `node`'s event object
    fn event_in_use(&self, node: &StreamNode) -> bool {
        self.nodes.iter().any(|n| n.shares_event(node.event()))
    }

    /// Decide the removal transition for the node at `pos`
    ///
    /// Any unlink happens here, under the caller's lock.
    fn remove_at(&mut self, pos: usize) -> Result<Deferred> {
        let Some(node) = self.nodes.get(pos) else {
            return Err(Self::empty_slot(pos));
        };

        let deferred = match node.state().removal_action() {
            RemovalAction::Retain => Deferred::Nothing,
            RemovalAction::Signal => Deferred::Signal(node.id(), Arc::clone(node.event())),
            RemovalAction::Free => {
                let node = self.nodes.remove(pos).ok_or_else(|| Self::empty_slot(pos))?;
                Deferred::Destroy(node)
            }
        };
        Ok(deferred)
    }

    fn empty_slot(pos: usize) -> RegistryError {
        tracing::error!(slot = pos, "Removal reached an empty registry slot");
        RegistryError::invalid(format!("no stream node at slot {}", pos))
    }
}

/// Central registry for all stream nodes
///
/// Thread-safe via `RwLock`. Lookups take the read side; linking, attach and
/// detach, and the removal protocol take the write side. A consumer is
/// signaled while the lock is still held for reading, so its node cannot be
/// freed mid-signal. Events are destroyed only after the node is unlinked and
/// the lock released.
pub struct StreamRegistry {
    inner: RwLock<RegistryInner>,

    /// Device the streams belong to, set once during bring-up
    device: OnceLock<Weak<DeviceContext>>,

    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            device: OnceLock::new(),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Record the device context. May only be done once.
    pub fn set_device(&self, device: &Arc<DeviceContext>) -> Result<()> {
        self.device
            .set(Arc::downgrade(device))
            .map_err(|_| RegistryError::invalid("device context already set"))?;

        tracing::info!(device = device.id, name = %device.name, "Device context set");
        Ok(())
    }

    /// Get the device context
    ///
    /// Fails with `NoDevice` if none was set or it has since been dropped.
    pub fn device(&self) -> Result<Arc<DeviceContext>> {
        self.device.get().and_then(Weak::upgrade).ok_or_else(|| {
            tracing::error!("No device context; streams cannot be used before a device is found");
            RegistryError::NoDevice
        })
    }

    /// Link a constructed node into the registry
    ///
    /// The node is placed at the front, so it shadows older nodes with the
    /// same name. Names are not checked, but a node whose id is already
    /// registered is rejected with `InvalidArgument`.
    ///
    /// A rejected node is not handed back: its buffer claim is released and
    /// its event destroyed, unless a registered node shares that event.
    pub async fn add(&self, node: StreamNode) -> Result<NodeId> {
        let mut inner = self.inner.write().await;
        if let Err(e) = inner.admit(&node) {
            let shared = inner.event_in_use(&node);
            drop(inner);
            Self::discard(node, shared, &e);
            return Err(e);
        }

        let id = inner.link(node);
        tracing::info!(node = %id, streams = inner.nodes.len(), "Stream node added");
        Ok(id)
    }

    /// Find the most recently added node whose buffer is named `name`
    pub async fn find_by_name(&self, name: &str) -> Result<NodeId> {
        if name.is_empty() {
            return Err(RegistryError::invalid("stream name is empty"));
        }

        let inner = self.inner.read().await;
        let found = inner.find_by_name(name).map(StreamNode::id);

        tracing::debug!(stream = name, found = ?found, "Lookup by name");
        found.ok_or(RegistryError::NotFound)
    }

    /// Find the node `descriptor` is attached to
    pub async fn find_by_descriptor(&self, descriptor: &StreamDescriptor) -> Result<NodeId> {
        let inner = self.inner.read().await;
        let found = inner
            .nodes
            .iter()
            .find(|node| node.descriptor() == Some(descriptor.id()))
            .map(StreamNode::id);

        tracing::debug!(descriptor = %descriptor.id(), found = ?found, "Lookup by descriptor");
        found.ok_or(RegistryError::NotFound)
    }

    /// Run the removal protocol on a registered node
    ///
    /// - producer still attached: nothing happens
    /// - only the consumer left: its event is signaled so a blocked waiter
    ///   can discover the stream is gone; the node stays registered
    /// - neither left: the node is unlinked and its event destroyed
    ///
    /// Event failures are logged, never returned. Passing an id that is not
    /// registered is a caller error.
    pub async fn try_remove_and_free(&self, id: NodeId) -> Result<RemovalOutcome> {
        let mut inner = self.inner.write().await;
        let pos = Self::locate(&inner, id)?;
        let deferred = inner.remove_at(pos)?;

        Ok(Self::finish(inner, deferred))
    }

    /// Attach a consumer descriptor to a node
    pub async fn attach_descriptor(&self, id: NodeId, descriptor: &StreamDescriptor) -> Result<()> {
        if descriptor.node() != id {
            return Err(RegistryError::invalid(format!(
                "{} was created for {}, not {}",
                descriptor.id(),
                descriptor.node(),
                id
            )));
        }

        let mut inner = self.writable().await?;
        let node = inner.find_mut(id).ok_or(RegistryError::NotFound)?;

        if !descriptor.shares_event(node.event()) {
            return Err(RegistryError::invalid("descriptor event differs from node event"));
        }
        if node.descriptor().is_some() {
            return Err(RegistryError::AlreadyOpen(id));
        }

        node.set_descriptor(descriptor.id());
        tracing::info!(node = %id, descriptor = %descriptor.id(), "Descriptor attached");
        Ok(())
    }

    /// Clear a node's producer link and hand the buffer back
    ///
    /// Does not run the removal protocol; see [`release_buffer`](Self::release_buffer).
    pub async fn detach_buffer(&self, id: NodeId) -> Result<Option<Arc<StreamBuffer>>> {
        let mut inner = self.inner.write().await;
        let node = inner.find_mut(id).ok_or(RegistryError::NotFound)?;
        let buffer = node.take_buffer();

        tracing::debug!(node = %id, state = ?node.state(), "Buffer detached");
        Ok(buffer)
    }

    /// Clear a node's consumer link
    ///
    /// Does not run the removal protocol; see
    /// [`release_descriptor`](Self::release_descriptor).
    pub async fn detach_descriptor(&self, descriptor: &StreamDescriptor) -> Result<()> {
        let mut inner = self.inner.write().await;
        let node = Self::attached_node(&mut inner, descriptor)?;
        node.clear_descriptor();

        tracing::debug!(node = %node.id(), state = ?node.state(), "Descriptor detached");
        Ok(())
    }

    /// Producer side: construct a node for `buffer` and register it
    ///
    /// Fails with `AlreadyExists` if a registered node already carries a
    /// buffer with the same name. Once the node is built, a rejection is
    /// handled as in [`add`](Self::add).
    pub async fn create_stream(&self, buffer: Arc<StreamBuffer>, event: EventHandle) -> Result<NodeId> {
        let mut inner = self.inner.write().await;

        let name = buffer.name().to_owned();
        let node = StreamNode::new(event, Some(buffer), None)?;
        let admitted = if inner.find_by_name(&name).is_some() {
            Err(RegistryError::AlreadyExists(name.clone()))
        } else {
            inner.admit(&node)
        };
        if let Err(e) = admitted {
            let shared = inner.event_in_use(&node);
            drop(inner);
            Self::discard(node, shared, &e);
            return Err(e);
        }
        let id = inner.link(node);

        tracing::info!(node = %id, stream = %name, "Stream created");
        Ok(id)
    }

    /// Consumer side: open the stream named `name`
    ///
    /// Creates a descriptor and attaches it in one step. A stream accepts one
    /// consumer at a time.
    pub async fn open_stream(&self, name: &str, flags: OpenFlags) -> Result<StreamDescriptor> {
        if name.is_empty() {
            return Err(RegistryError::invalid("stream name is empty"));
        }

        let mut inner = self.writable().await?;
        let id = inner
            .find_by_name(name)
            .map(StreamNode::id)
            .ok_or(RegistryError::NotFound)?;
        let node = inner.find_mut(id).ok_or(RegistryError::NotFound)?;

        if node.descriptor().is_some() {
            return Err(RegistryError::AlreadyOpen(id));
        }

        let descriptor = StreamDescriptor::new(id, flags, Arc::clone(node.event()))?;
        node.set_descriptor(descriptor.id());

        tracing::info!(
            node = %id,
            stream = name,
            descriptor = %descriptor.id(),
            flags = flags.bits(),
            "Stream opened"
        );
        Ok(descriptor)
    }

    /// Producer side: detach the buffer and run the removal protocol
    pub async fn release_buffer(&self, id: NodeId) -> Result<RemovalOutcome> {
        let mut inner = self.inner.write().await;
        let pos = Self::locate(&inner, id)?;
        inner.nodes[pos].take_buffer();

        tracing::info!(node = %id, "Producer released stream");
        let deferred = inner.remove_at(pos)?;
        Ok(Self::finish(inner, deferred))
    }

    /// Consumer side: detach the descriptor and run the removal protocol
    ///
    /// Returns `NotFound` if the descriptor is no longer attached (for
    /// example after it was reaped).
    pub async fn release_descriptor(&self, descriptor: StreamDescriptor) -> Result<RemovalOutcome> {
        let mut inner = self.inner.write().await;
        let node = Self::attached_node(&mut inner, &descriptor)?;
        node.clear_descriptor();

        tracing::info!(node = %node.id(), descriptor = %descriptor.id(), "Consumer released stream");
        let pos = Self::locate(&inner, descriptor.node())?;
        let deferred = inner.remove_at(pos)?;
        Ok(Self::finish(inner, deferred))
    }

    /// Whether the stream behind `descriptor` still has its producer
    ///
    /// A consumer woken by its event uses this to tell "new data" apart from
    /// "stream destroyed".
    pub async fn is_stream_alive(&self, descriptor: &StreamDescriptor) -> bool {
        let inner = self.inner.read().await;
        inner
            .find(descriptor.node())
            .is_some_and(|node| node.descriptor() == Some(descriptor.id()) && node.buffer().is_some())
    }

    /// Current state of a node, or `None` if it is not registered
    pub async fn node_state(&self, id: NodeId) -> Option<NodeState> {
        self.inner.read().await.find(id).map(StreamNode::state)
    }

    /// Snapshot of a node
    pub async fn node_stats(&self, id: NodeId) -> Option<NodeStats> {
        self.inner.read().await.find(id).map(StreamNode::stats)
    }

    /// Get total number of registered nodes
    pub async fn stream_count(&self) -> usize {
        self.inner.read().await.nodes.len()
    }

    /// Count nodes by state
    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        let mut stats = RegistryStats {
            stream_count: inner.nodes.len(),
            ..Default::default()
        };

        for node in &inner.nodes {
            match node.state() {
                NodeState::Live => stats.live += 1,
                NodeState::PendingDetach => stats.pending_detach += 1,
                NodeState::Orphan => stats.orphan += 1,
            }
        }
        stats
    }

    /// Whether `shutdown` has run
    pub async fn is_shut_down(&self) -> bool {
        self.inner.read().await.closed
    }

    /// Free nodes whose consumer never detached
    ///
    /// Only active when `pending_detach_timeout` is configured. The stale
    /// descriptor link is revoked, so a late `release_descriptor` on it gets
    /// `NotFound`. Returns the number of nodes freed.
    pub async fn reap_pending(&self) -> usize {
        let Some(timeout) = self.config.pending_detach_timeout else {
            return 0;
        };

        let mut reaped = Vec::new();
        {
            let mut inner = self.inner.write().await;
            let mut i = 0;
            while i < inner.nodes.len() {
                let stale = inner.nodes[i]
                    .pending_since()
                    .is_some_and(|since| since.elapsed() > timeout);

                if !stale {
                    i += 1;
                    continue;
                }
                if let Some(mut node) = inner.nodes.remove(i) {
                    node.clear_descriptor();
                    reaped.push(node);
                }
            }
        }

        let count = reaped.len();
        for node in reaped {
            tracing::warn!(
                node = %node.id(),
                timeout = ?timeout,
                "Consumer never detached, reaping stream node"
            );
            Self::destroy(node);
        }
        count
    }

    /// Spawn background reaper task
    ///
    /// Returns a handle that can be used to abort the task. The task exits on
    /// its own after `shutdown`. An interval below [`MIN_REAP_INTERVAL`] is
    /// raised to it.
    pub fn spawn_reaper_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let mut interval = registry.config.reap_interval;
        if interval < MIN_REAP_INTERVAL {
            tracing::warn!(
                interval = ?interval,
                min = ?MIN_REAP_INTERVAL,
                "Reap interval too short, clamping"
            );
            interval = MIN_REAP_INTERVAL;
        }

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if registry.is_shut_down().await {
                    break;
                }
                registry.reap_pending().await;
            }
        })
    }

    /// Tear the registry down
    ///
    /// Every node is drained and freed. Waiting consumers are woken first.
    /// Nodes whose producer never released are reported as leaks. Later
    /// calls to `add`, `create_stream`, `open_stream` and `attach_descriptor`
    /// fail with `ShutDown`. Calling this twice returns an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let drained: Vec<StreamNode> = {
            let mut inner = self.inner.write().await;
            if inner.closed {
                return ShutdownReport::default();
            }
            inner.closed = true;
            inner.nodes.drain(..).collect()
        };

        let mut report = ShutdownReport::default();
        for node in drained {
            match node.state() {
                NodeState::Live => {
                    let stats = node.stats();
                    tracing::warn!(
                        node = %stats.id,
                        stream = stats.name.as_deref().unwrap_or(""),
                        "Stream still has a producer at shutdown"
                    );
                    report.leaked.push(stats);
                }
                NodeState::PendingDetach => {
                    Self::signal(node.id(), node.event());
                    report.woken += 1;
                }
                NodeState::Orphan => {}
            }
            Self::destroy(node);
            report.freed += 1;
        }

        tracing::info!(
            freed = report.freed,
            woken = report.woken,
            leaked = report.leaked.len(),
            "Stream registry shut down"
        );
        report
    }

    async fn writable(&self) -> Result<RwLockWriteGuard<'_, RegistryInner>> {
        let inner = self.inner.write().await;
        if inner.closed {
            return Err(RegistryError::ShutDown);
        }
        Ok(inner)
    }

    fn locate(inner: &RegistryInner, id: NodeId) -> Result<usize> {
        inner.position(id).ok_or_else(|| {
            tracing::error!(node = %id, "Removal requested for unregistered stream node");
            RegistryError::invalid(format!("{} is not registered", id))
        })
    }

    fn attached_node<'a>(
        inner: &'a mut RegistryInner,
        descriptor: &StreamDescriptor,
    ) -> Result<&'a mut StreamNode> {
        inner
            .find_mut(descriptor.node())
            .filter(|node| node.descriptor() == Some(descriptor.id()))
            .ok_or(RegistryError::NotFound)
    }

    /// Carry out a removal decision, consuming the write guard
    ///
    /// The signal runs under a read guard so a concurrent release cannot
    /// free the node and destroy the event underneath it.
    fn finish(inner: RwLockWriteGuard<'_, RegistryInner>, deferred: Deferred) -> RemovalOutcome {
        match deferred {
            Deferred::Nothing => RemovalOutcome::Retained,
            Deferred::Signal(id, event) => {
                let _held = inner.downgrade();
                Self::signal(id, &event);
                tracing::debug!(node = %id, "Consumer signaled, node kept until it detaches");
                RemovalOutcome::Signaled
            }
            Deferred::Destroy(node) => {
                drop(inner);
                tracing::info!(node = %node.id(), "Stream node freed");
                Self::destroy(node);
                RemovalOutcome::Freed
            }
        }
    }

    /// Release what a node that never got linked holds
    fn discard(node: StreamNode, event_shared: bool, reason: &RegistryError) {
        tracing::warn!(node = %node.id(), error = %reason, "Stream node rejected");
        node.release_claim();
        if !event_shared {
            Self::destroy(node);
        }
    }

    fn signal(id: NodeId, event: &EventHandle) {
        match event.signal() {
            Ok(()) => {}
            Err(NotifierError::AlreadyDestroyed) => {
                tracing::debug!(node = %id, "Event already destroyed, signal skipped");
            }
            Err(e) => tracing::error!(node = %id, error = %e, "Event signal failed"),
        }
    }

    fn destroy(node: StreamNode) {
        if let Err(e) = node.event().destroy() {
            tracing::error!(node = %node.id(), error = %e, "Event destroy failed");
        }
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
