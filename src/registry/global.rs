//! Process-wide registry instance
//!
//! Most code should take an `Arc<StreamRegistry>` it was handed. This module
//! is for call sites that have no way to receive one and need the shared
//! instance, created on first use.

use std::sync::{Arc, OnceLock};

use crate::Result;

use super::config::RegistryConfig;
use super::error::RegistryError;
use super::store::StreamRegistry;

static GLOBAL: OnceLock<Arc<StreamRegistry>> = OnceLock::new();

/// Create the process-wide registry with a custom configuration
///
/// Must run before the first call to [`registry`]; fails otherwise.
pub fn init(config: RegistryConfig) -> Result<&'static Arc<StreamRegistry>> {
    let mut created = false;
    let registry = GLOBAL.get_or_init(|| {
        created = true;
        Arc::new(StreamRegistry::with_config(config))
    });

    if !created {
        return Err(RegistryError::invalid("global registry already initialized"));
    }

    tracing::info!("Global stream registry initialized");
    Ok(registry)
}

/// Get the process-wide registry, creating it with defaults on first use
pub fn registry() -> &'static Arc<StreamRegistry> {
    GLOBAL.get_or_init(|| {
        tracing::debug!("Global stream registry created on first use");
        Arc::new(StreamRegistry::new())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_shared() {
        let a = registry();
        let b = registry();
        assert!(Arc::ptr_eq(a, b));

        // Already created by the calls above
        assert!(matches!(
            init(RegistryConfig::default()),
            Err(RegistryError::InvalidArgument(_))
        ));
    }
}
