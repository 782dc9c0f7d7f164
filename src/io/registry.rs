//! Codec registry mapping format names to sink factories.

use crate::core::error::ConfigurationError;
use crate::io::block::BlockSink;
use crate::io::file::{AtomicFileSink, RawFileSink};
use indexmap::IndexMap;
use std::path::Path;
use std::sync::Arc;

/// Factory creating a sink that writes to a path.
pub type SinkFactory = Arc<dyn Fn(&Path) -> Box<dyn BlockSink> + Send + Sync>;

/// Registry entry containing the factory and the file extensions it claims.
#[derive(Clone)]
pub struct CodecEntry {
    /// Factory function to create sinks.
    pub factory: SinkFactory,
    /// File extensions (lowercase, without dot) resolved to this codec.
    pub extensions: Vec<String>,
}

/// Registry of output formats.
///
/// Lookup is by format name or by file extension; registration order
/// decides which codec wins when two claim the same extension.
pub struct CodecRegistry {
    codecs: IndexMap<String, CodecEntry>,
}

impl CodecRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            codecs: IndexMap::new(),
        }
    }

    /// Create a registry with the raw codecs.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("raw-atomic", &["raw", "f32"], |path| {
            Box::new(AtomicFileSink::new(path))
        });
        registry.register("raw", &[], |path| Box::new(RawFileSink::new(path)));
        registry
    }

    /// Register a codec under `name`.
    pub fn register<F>(&mut self, name: &str, extensions: &[&str], factory: F)
    where
        F: Fn(&Path) -> Box<dyn BlockSink> + Send + Sync + 'static,
    {
        let entry = CodecEntry {
            factory: Arc::new(factory),
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
        };
        self.codecs.insert(name.to_string(), entry);
    }

    /// Check if a codec is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    /// Registered format names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(|s| s.as_str())
    }

    /// Create a sink of format `name` writing to `path`.
    pub fn create_sink(
        &self,
        name: &str,
        path: &Path,
    ) -> Result<Box<dyn BlockSink>, ConfigurationError> {
        self.codecs
            .get(name)
            .map(|entry| (entry.factory)(path))
            .ok_or_else(|| ConfigurationError::UnknownFormat(name.to_string()))
    }

    /// Create a sink chosen from the extension of `path`.
    pub fn for_path(&self, path: &Path) -> Result<Box<dyn BlockSink>, ConfigurationError> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.codecs
            .values()
            .find(|entry| entry.extensions.iter().any(|e| *e == extension))
            .map(|entry| (entry.factory)(path))
            .ok_or(ConfigurationError::UnknownFormat(extension))
    }

    /// Get the number of registered codecs.
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::region::Region;
    use crate::core::types::{ImageInfo, SampleType};
    use tempfile::tempdir;

    #[test]
    fn test_builtins_registered() {
        let registry = CodecRegistry::with_builtins();
        assert!(registry.contains("raw"));
        assert!(registry.contains("raw-atomic"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unknown_format() {
        let registry = CodecRegistry::with_builtins();
        assert!(matches!(
            registry.create_sink("tiff", Path::new("out.tif")),
            Err(ConfigurationError::UnknownFormat(name)) if name == "tiff"
        ));
        assert!(registry.for_path(Path::new("out.png")).is_err());
    }

    #[test]
    fn test_extension_lookup_creates_working_sink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.RAW");
        let registry = CodecRegistry::with_builtins();
        let mut sink = registry.for_path(&path).unwrap();
        let info = ImageInfo::new(Region::from_size(2, 2), 1, SampleType::F32);
        sink.initialize(&info).unwrap();
        sink.finalize().unwrap();
        assert!(path.exists());
    }
}
