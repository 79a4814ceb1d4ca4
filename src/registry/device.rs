//! Device context shared with the registry
//!
//! The registry keeps a weak reference to the device that owns the streams so
//! callers can run identity and permission checks against it. The device
//! itself is owned by whoever brings the system up.

/// Identity of the device the streams belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    /// Device index
    pub id: u32,
    /// Human readable device name
    pub name: String,
}

impl DeviceContext {
    /// Create a new device context
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}
