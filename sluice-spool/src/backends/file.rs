use std::{
    fs::TryLockError,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::Deserialize;
use sluice_common::internal;
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    SpoolError, SpoolHandle, ValidationError,
    r#trait::{BackingStore, DrainLock},
};

const TEMP_PREFIX: &str = ".tmp_";
const DELETED_SUFFIX: &str = ".deleted";
const CORRUPT_SUFFIX: &str = ".corrupt";
const DRAIN_LOCK: &str = ".drain.lock";

/// File-based backing store
///
/// One file per record, named `{ordinal:020}-{ulid}.rec`, so a directory
/// listing sorted by name is already in drain order.
///
/// # Atomicity
/// - Writes go to `.tmp_{name}`, are fsynced, then renamed into place, and the
///   directory itself is fsynced. A crash mid-write leaves only a temp file,
///   which `list()` ignores and `init()` removes.
/// - Deletes rename to `{name}.deleted` before removing, so a crash between
///   the two steps never resurrects a delivered record.
/// - Unreadable records are renamed to `{name}.corrupt` and kept for
///   inspection.
///
/// # Concurrency
/// Drains take an advisory lock on `.drain.lock` in the spool directory, so
/// only one process at a time can hand out entries for delivery.
#[derive(Debug, Clone)]
pub struct FileBackingStore {
    path: PathBuf,
}

impl Default for FileBackingStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/sluice"),
        }
    }
}

// Custom Deserialize implementation with path validation
impl<'de> Deserialize<'de> for FileBackingStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileBackingStoreHelper {
            path: PathBuf,
        }

        let helper = FileBackingStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

impl FileBackingStore {
    /// Validate a spool path
    ///
    /// # Security Checks
    /// - Rejects paths containing `..` (directory traversal)
    /// - Ensures the path is absolute
    /// - Rejects paths to sensitive system directories
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(ValidationError::ParentDirectory(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        for prefix in sensitive_prefixes {
            if path.starts_with(prefix) {
                return Err(ValidationError::SystemDirectory {
                    prefix: prefix.to_string(),
                    path: path.display().to_string(),
                });
            }
        }

        Ok(())
    }

    /// Create a new `FileBackingStore` builder
    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialize the file-backed spool
    ///
    /// Creates the spool directory if it doesn't exist and validates that
    /// the path is actually a directory. Also removes temp and `.deleted`
    /// files left behind by a crash.
    ///
    /// # Errors
    /// - If the spool path cannot be created or read
    /// - If the path exists but is not a directory
    pub fn init(&mut self) -> crate::Result<()> {
        internal!("Initialising spool at {} ...", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        self.cleanup_orphans()
    }

    fn cleanup_orphans(&self) -> crate::Result<()> {
        let mut cleaned = 0;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.starts_with(TEMP_PREFIX) || filename.ends_with(DELETED_SUFFIX) {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned files from spool {}",
                self.path.display()
            );
        }

        Ok(())
    }

    async fn sync_directory(&self) -> crate::Result<()> {
        #[cfg(unix)]
        fs::File::open(&self.path).await?.sync_all().await?;

        Ok(())
    }

    fn not_found(handle: &SpoolHandle) -> impl FnOnce(std::io::Error) -> SpoolError + '_ {
        move |e| {
            if e.kind() == ErrorKind::NotFound {
                SpoolError::NotFound(*handle)
            } else {
                SpoolError::Io(e)
            }
        }
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    #[tracing::instrument(level = "debug", skip_all, fields(handle = %handle, bytes = record.len()))]
    async fn write(&self, handle: &SpoolHandle, record: &[u8]) -> crate::Result<()> {
        let filename = handle.filename();
        let path = self.path.join(&filename);

        if fs::try_exists(&path).await? {
            return Err(SpoolError::AlreadyExists(*handle));
        }

        let temp_path = self.path.join(format!("{TEMP_PREFIX}{filename}"));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(record).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await
                && cleanup.kind() != ErrorKind::NotFound
            {
                internal!(
                    level = WARN,
                    "Failed to remove {} after failed write: {cleanup}",
                    temp_path.display()
                );
            }
            return Err(e.into());
        }

        self.sync_directory().await?;

        internal!(level = DEBUG, "Spooled record {handle} to {}", path.display());

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn list(&self) -> crate::Result<Vec<SpoolHandle>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut handles = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.starts_with(TEMP_PREFIX) {
                continue;
            }

            if let Some(handle) = SpoolHandle::from_filename(&filename) {
                handles.push(handle);
            }
        }

        handles.sort();

        internal!(level = DEBUG, "Found {} records in spool", handles.len());

        Ok(handles)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(handle = %handle))]
    async fn read(&self, handle: &SpoolHandle) -> crate::Result<Vec<u8>> {
        fs::read(self.path.join(handle.filename()))
            .await
            .map_err(Self::not_found(handle))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(handle = %handle))]
    async fn delete(&self, handle: &SpoolHandle) -> crate::Result<()> {
        let filename = handle.filename();
        let path = self.path.join(&filename);
        let deleted_path = self.path.join(format!("{filename}{DELETED_SUFFIX}"));

        // Phase 1: once renamed, list() no longer sees the record
        fs::rename(&path, &deleted_path)
            .await
            .map_err(Self::not_found(handle))?;

        // Phase 2: if this fails, init() removes the leftover on next start
        fs::remove_file(&deleted_path).await?;

        internal!(level = DEBUG, "Deleted record {handle} from spool");

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(handle = %handle))]
    async fn quarantine(&self, handle: &SpoolHandle) -> crate::Result<()> {
        let filename = handle.filename();
        let path = self.path.join(&filename);
        let corrupt_path = self.path.join(format!("{filename}{CORRUPT_SUFFIX}"));

        fs::rename(&path, &corrupt_path)
            .await
            .map_err(Self::not_found(handle))?;
        self.sync_directory().await?;

        internal!(
            level = WARN,
            "Quarantined unreadable record {handle} as {}",
            corrupt_path.display()
        );

        Ok(())
    }

    async fn lock_drain(&self) -> crate::Result<Option<DrainLock>> {
        let path = self.path.join(DRAIN_LOCK);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => Ok(Some(DrainLock::new(file))),
            Err(TryLockError::WouldBlock) => {
                internal!(
                    level = INFO,
                    "{} is held by another process",
                    path.display()
                );
                Err(SpoolError::Busy(self.path.display().to_string()))
            }
            Err(TryLockError::Error(e)) => Err(e.into()),
        }
    }
}

/// Builder for `FileBackingStore`
#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: PathBuf,
}

impl FileBackingStoreBuilder {
    /// Set the spool directory path
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Build the final `FileBackingStore`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> Result<FileBackingStore, ValidationError> {
        FileBackingStore::validate_path(&self.path)?;
        Ok(FileBackingStore { path: self.path })
    }
}
