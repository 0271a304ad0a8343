//! Source registry: feed name -> video source.
//!
//! Registration resolves the descriptor and constructs the backend but never
//! touches the device or network; the control loop opens every source at startup.

use anyhow::{Context, Result};

use crate::config::SwitcherConfig;
use crate::error::SwitcherError;
use crate::ingest::{build_source, DescriptorValue, SourceDescriptor, VideoSource};

/// Stable index of a registered feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedHandle(usize);

impl FeedHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

struct RegisteredFeed {
    name: String,
    source: Box<dyn VideoSource>,
}

#[derive(Default)]
pub struct SourceRegistry {
    feeds: Vec<RegisteredFeed>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every feed of a validated configuration.
    pub fn from_config(config: &SwitcherConfig) -> Result<Self> {
        let mut registry = Self::new();
        for feed in &config.feeds {
            registry.register(&feed.name, &feed.descriptor)?;
        }
        Ok(registry)
    }

    /// Resolve `descriptor` and register the resulting source under `name`.
    pub fn register(&mut self, name: &str, descriptor: &DescriptorValue) -> Result<FeedHandle> {
        self.ensure_unique(name)?;
        let resolved = SourceDescriptor::resolve(descriptor)
            .map_err(anyhow::Error::new)
            .with_context(|| format!("feed '{}'", name))?;
        let source = build_source(name, &resolved)?;
        log::debug!("registry: feed '{}' -> {}", name, resolved);
        self.push(name, source)
    }

    /// Register a location string (`rtsp://...`, `/dev/video0`, `stub://...`).
    pub fn register_location(&mut self, name: &str, location: &str) -> Result<FeedHandle> {
        self.register(name, &DescriptorValue::Location(location.to_string()))
    }

    /// Register an already-constructed source.
    pub fn register_source(&mut self, name: &str, source: Box<dyn VideoSource>) -> Result<FeedHandle> {
        self.ensure_unique(name)?;
        self.push(name, source)
    }

    /// All feeds in registration order.
    pub fn all(&self) -> Vec<(String, FeedHandle)> {
        self.feeds
            .iter()
            .enumerate()
            .map(|(index, feed)| (feed.name.clone(), FeedHandle(index)))
            .collect()
    }

    pub fn name(&self, handle: FeedHandle) -> Option<&str> {
        self.feeds.get(handle.0).map(|feed| feed.name.as_str())
    }

    pub fn source_mut(&mut self, handle: FeedHandle) -> Option<&mut (dyn VideoSource + 'static)> {
        self.feeds.get_mut(handle.0).map(|feed| feed.source.as_mut())
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Hand the sources over to their owners.
    pub fn into_sources(self) -> Vec<(String, Box<dyn VideoSource>)> {
        self.feeds
            .into_iter()
            .map(|feed| (feed.name, feed.source))
            .collect()
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.feeds.iter().any(|feed| feed.name == name) {
            return Err(SwitcherError::configuration(format!("duplicate feed name '{}'", name)).into());
        }
        Ok(())
    }

    fn push(&mut self, name: &str, source: Box<dyn VideoSource>) -> Result<FeedHandle> {
        self.feeds.push(RegisteredFeed {
            name: name.to_string(),
            source,
        });
        Ok(FeedHandle(self.feeds.len() - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;

    fn code(err: &anyhow::Error) -> Option<&'static str> {
        classify(err).map(SwitcherError::code)
    }

    #[test]
    fn handles_follow_registration_order() -> Result<()> {
        let mut registry = SourceRegistry::new();
        let porch = registry.register_location("Porch", "stub://porch?pattern=1")?;
        let yard = registry.register_location("Yard", "stub://yard?pattern=2")?;

        assert_eq!(
            registry.all(),
            vec![("Porch".to_string(), porch), ("Yard".to_string(), yard)]
        );
        assert_eq!(registry.name(yard), Some("Yard"));
        assert_eq!(registry.len(), 2);
        Ok(())
    }

    #[test]
    fn duplicate_names_are_rejected() -> Result<()> {
        let mut registry = SourceRegistry::new();
        registry.register_location("Porch", "stub://a")?;
        let err = registry.register_location("Porch", "stub://b").unwrap_err();
        assert_eq!(code(&err), Some("CONFIGURATION"));
        assert_eq!(registry.len(), 1);
        Ok(())
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        let mut registry = SourceRegistry::new();
        for bad in ["gopher://cam", "rtsp://", "stub://x?pattern=1,zz", "not a url"] {
            let err = registry.register_location("Cam", bad).unwrap_err();
            assert_eq!(code(&err), Some("CONFIGURATION"), "descriptor {:?}", bad);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn registration_does_not_open_sources() -> Result<()> {
        let mut registry = SourceRegistry::new();
        let handle = registry.register_location("Porch", "stub://porch?pattern=1")?;
        let source = registry.source_mut(handle).expect("registered");
        assert!(source.read_frame().is_err());
        Ok(())
    }
}
