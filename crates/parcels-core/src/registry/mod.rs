//! Tracking source registry
//!
//! The registry is the fixed universe of sources a deployment aggregates
//! over. It is built once at startup and handed to the aggregator, which
//! iterates it in registration order; that order is also the order of
//! lookup results.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parcels_core::SourceRegistry;
//!
//! let mut registry = SourceRegistry::new();
//! registry.register(Arc::new(CainiaoSource::new()))?;
//!
//! // Or, from a plugin crate:
//! parcels_source_cainiao::register(&mut registry)?;
//! ```

use crate::error::{Error, Result};
use crate::model::SourceName;
use crate::traits::TrackingSource;
use std::sync::Arc;

/// Ordered set of tracking sources keyed by name
///
/// Lookups are linear; deployments register a handful of sources.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    sources: Vec<(SourceName, Arc<dyn TrackingSource>)>,
}

impl SourceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its own name
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Registered
    /// - `Err(Error::Config)`: A source with the same name is already registered
    pub fn register(&mut self, source: Arc<dyn TrackingSource>) -> Result<()> {
        let name = source.source_name();
        self.register_as(name, source)
    }

    /// Register a source under an explicit name
    pub fn register_as(
        &mut self,
        name: impl Into<SourceName>,
        source: Arc<dyn TrackingSource>,
    ) -> Result<()> {
        let name = name.into();
        if self.contains(name.as_str()) {
            return Err(Error::config(format!(
                "Tracking source already registered: {}",
                name
            )));
        }
        self.sources.push((name, source));
        Ok(())
    }

    /// Get a source by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn TrackingSource>> {
        self.sources
            .iter()
            .find(|(registered, _)| registered.as_str() == name)
            .map(|(_, source)| source)
    }

    /// Check if a source is registered
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names, in registration order
    pub fn names(&self) -> Vec<SourceName> {
        self.sources.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Iterate over (name, source) pairs in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&SourceName, &Arc<dyn TrackingSource>)> {
        self.sources.iter().map(|(name, source)| (name, source))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|(name, _)| name))
            .finish()
    }
}
