use std::sync::Arc;

use serde::Deserialize;

use crate::{
    DeliverySpool,
    backends::{FileBackingStore, MemoryBackingStore},
    r#trait::BackingStore,
};

/// Configuration for the spool backing store
///
/// The variants are newtypes, so the examples below rely on RON's
/// `unwrap_variant_newtypes` extension being enabled by the loader.
///
/// File-backed spool in RON config:
/// ```ron
/// spool: File(
///     path: "/var/spool/sluice",
/// ),
/// ```
///
/// Memory-backed spool with a capacity limit:
/// ```ron
/// spool: Memory(
///     capacity: 1000,
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum SpoolConfig {
    /// File-based spool (production)
    File(FileBackingStore),
    /// Memory-based spool; contents are lost on restart
    Memory(MemoryConfig),
}

/// Configuration for memory-backed spool
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryConfig {
    /// Maximum number of messages to store (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::File(FileBackingStore::default())
    }
}

impl SpoolConfig {
    /// Get the filesystem path for file-backed spools, if applicable
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File(store) => Some(store.path()),
            Self::Memory(_) => None,
        }
    }

    /// Convert the configuration into a ready-to-use backing store
    ///
    /// File stores are initialised first, creating the directory and
    /// removing anything left over from an interrupted write or delete.
    ///
    /// # Errors
    /// If the spool directory cannot be created or is not a directory
    pub fn into_backing_store(self) -> crate::Result<Arc<dyn BackingStore>> {
        match self {
            Self::File(mut store) => {
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory(config) => Ok(config.capacity.map_or_else(
                || Arc::new(MemoryBackingStore::new()) as Arc<dyn BackingStore>,
                |capacity| Arc::new(MemoryBackingStore::with_capacity(capacity)),
            )),
        }
    }

    /// Build the backing store and open a spool over it
    ///
    /// # Errors
    /// If the store cannot be initialised or its existing records listed
    pub async fn open(self) -> crate::Result<DeliverySpool> {
        DeliverySpool::open(self.into_backing_store()?).await
    }
}

#[cfg(test)]
mod tests {
    use ron::extensions::Extensions;

    use super::*;

    fn parse(text: &str) -> ron::error::SpannedResult<SpoolConfig> {
        ron::Options::default()
            .with_default_extension(Extensions::UNWRAP_VARIANT_NEWTYPES)
            .from_str(text)
    }

    #[test]
    fn test_memory_config_from_ron() {
        let config = parse("Memory(capacity: Some(10))").expect("Failed to parse config");

        assert!(matches!(
            config,
            SpoolConfig::Memory(MemoryConfig { capacity: Some(10) })
        ));
        assert!(config.path().is_none());
    }

    #[test]
    fn test_file_config_from_ron() {
        let config = parse(r#"File(path: "/var/spool/sluice-test")"#).expect("Failed to parse config");

        assert_eq!(
            config.path(),
            Some(std::path::Path::new("/var/spool/sluice-test"))
        );
    }

    #[test]
    fn test_file_config_rejects_dangerous_path() {
        let error = parse(r#"File(path: "/etc/sluice")"#).expect_err("system path");
        assert!(error.to_string().contains("/etc"), "unexpected error {error}");

        assert!(parse(r#"File(path: "relative/spool")"#).is_err());
    }

    #[test]
    fn test_default_is_file() {
        assert!(matches!(SpoolConfig::default(), SpoolConfig::File(_)));
    }

    #[tokio::test]
    async fn test_file_config_initialises_directory() {
        let temp = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("nested").join("spool");
        let config = SpoolConfig::File(
            FileBackingStore::builder()
                .path(&path)
                .build()
                .expect("Failed to build store"),
        );

        let spool = config.open().await.expect("Failed to open spool");

        assert!(path.is_dir());
        assert!(spool.is_empty().await.expect("Failed to count"));
    }
}
