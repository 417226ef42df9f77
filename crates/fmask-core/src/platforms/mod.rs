//! Sensor ingestion: a registry of platform adapters tried in order.

pub mod landsat8;
pub mod metadata;
pub mod sentinel2;

use std::path::Path;

use tracing::info;

use crate::error::{FmaskError, Result};
use crate::scene::SceneRecord;

pub use landsat8::Landsat8;
pub use sentinel2::Sentinel2;

/// One ingestible platform: a cheap filename test plus the full reader.
pub trait PlatformAdapter {
    fn name(&self) -> &'static str;
    /// Does the metadata path look like this platform's product?
    fn is_platform(&self, path: &Path) -> bool;
    /// Build the scene record (bands in scaled units, masks, geometry).
    fn get_data(&self, path: &Path) -> Result<SceneRecord>;
}

/// Ordered adapter registry. Callers may register additional detectors.
pub struct PlatformRegistry {
    adapters: Vec<Box<dyn PlatformAdapter>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self { adapters: Vec::new() }
    }

    pub fn register(&mut self, adapter: Box<dyn PlatformAdapter>) {
        self.adapters.push(adapter);
    }

    /// Try each adapter in registration order; the first match ingests.
    pub fn ingest(&self, path: &Path) -> Result<SceneRecord> {
        for adapter in &self.adapters {
            if adapter.is_platform(path) {
                info!(platform = adapter.name(), "identified platform");
                return adapter.get_data(path);
            }
        }
        Err(FmaskError::Input(format!(
            "{}: no supported platform recognises this product",
            path.display()
        )))
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(Landsat8));
        registry.register(Box::new(Sentinel2));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn registry_recognises_products_by_filename() {
        let registry = PlatformRegistry::default();
        let l8 = PathBuf::from("LC08_L1TP_042034_20200715_MTL.txt");
        let s2 = PathBuf::from("MTD_TL.xml");
        assert!(Landsat8.is_platform(&l8));
        assert!(!Landsat8.is_platform(&s2));
        assert!(Sentinel2.is_platform(&s2));
        // Unknown product is a fatal input error.
        let err = registry.ingest(Path::new("random.hdr")).unwrap_err();
        assert!(matches!(err, FmaskError::Input(_)));
    }
}
