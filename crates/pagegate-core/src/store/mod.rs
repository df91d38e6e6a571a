//! Transactional access to the page document.
//!
//! Every request performs exactly one read-modify-write cycle:
//!
//! 1. Enter the store's single-writer section
//! 2. Load the document from the backend
//! 3. Decide and mutate
//! 4. Persist the document if it changed
//! 5. Leave the single-writer section
//!
//! The section covers the whole cycle, not just the final write, so two
//! requests racing for the last free slot of a page cannot both win.
//!
//! # Backends
//!
//! - [`YamlFileBackend`]: the operator-edited YAML file, written back
//!   atomically (temp file in the same directory, fsync, rename)
//! - [`InMemoryBackend`]: an in-process document for tests and embedding
//!
//! # Contracts
//!
//! - [CTR-ST001] A [`DocumentTransaction`] is released exactly once, either
//!   by [`DocumentTransaction::commit`] or on drop.
//! - [CTR-ST002] A document that fails to load or validate is never handed
//!   to the caller; the caller gets [`StoreError::ConfigUnavailable`].
//! - [CTR-ST003] Cross-process locking is not provided. Concurrent external
//!   writers are unsupported.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::document::{DocumentError, PageDocument};

/// Errors raised by the config store. Both variants are operational
/// failures, never admission rejections.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The document could not be read, parsed or validated.
    #[error("page configuration unavailable: {detail}")]
    ConfigUnavailable {
        /// What went wrong.
        detail: String,
    },

    /// The document could not be written back.
    #[error("failed to persist page configuration: {detail}")]
    PersistFailed {
        /// What went wrong.
        detail: String,
    },
}

impl StoreError {
    fn unavailable(source: impl fmt::Display) -> Self {
        Self::ConfigUnavailable {
            detail: source.to_string(),
        }
    }

    fn persist(source: impl fmt::Display) -> Self {
        Self::PersistFailed {
            detail: source.to_string(),
        }
    }
}

impl From<DocumentError> for StoreError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Serialize(_) => Self::persist(err),
            _ => Self::unavailable(err),
        }
    }
}

/// Durable storage for the page document.
///
/// Implementations do not need their own locking; [`ConfigStore`] serializes
/// every call.
pub trait DocumentBackend: Send + Sync {
    /// Loads and validates the document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConfigUnavailable`] if the document cannot be
    /// read or is invalid.
    fn load(&self) -> Result<PageDocument, StoreError>;

    /// Persists the document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PersistFailed`] if the write fails.
    fn save(&self, document: &PageDocument) -> Result<(), StoreError>;

    /// Human-readable location, used in log fields.
    fn describe(&self) -> String;
}

/// YAML file backend.
#[derive(Debug, Clone)]
pub struct YamlFileBackend {
    path: PathBuf,
}

impl YamlFileBackend {
    /// Creates a backend for the document at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentBackend for YamlFileBackend {
    fn load(&self) -> Result<PageDocument, StoreError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            StoreError::unavailable(format!("cannot read {}: {e}", self.path.display()))
        })?;
        Ok(PageDocument::from_yaml(&content)?)
    }

    fn save(&self, document: &PageDocument) -> Result<(), StoreError> {
        let yaml = document.to_yaml()?;
        atomic_write_file(&self.path, yaml.as_bytes())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Writes `bytes` to `final_path` via `NamedTempFile` + fsync + persist.
///
/// The temp file lives in the destination directory so the final rename
/// never crosses filesystems.
fn atomic_write_file(final_path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match final_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut named_temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        StoreError::persist(format!("cannot create temp file in {}: {e}", dir.display()))
    })?;

    // Keep the operator's permissions on the replaced file.
    if let Ok(metadata) = std::fs::metadata(final_path) {
        named_temp
            .as_file()
            .set_permissions(metadata.permissions())
            .map_err(|e| StoreError::persist(format!("cannot set permissions on temp file: {e}")))?;
    }

    named_temp
        .as_file_mut()
        .write_all(bytes)
        .map_err(|e| StoreError::persist(format!("cannot write temp file: {e}")))?;
    named_temp
        .as_file()
        .sync_all()
        .map_err(|e| StoreError::persist(format!("cannot sync temp file: {e}")))?;

    named_temp.persist(final_path).map_err(|e| {
        StoreError::persist(format!(
            "cannot persist temp file -> {}: {e}",
            final_path.display()
        ))
    })?;

    Ok(())
}

/// In-memory backend.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    document: Mutex<PageDocument>,
}

impl InMemoryBackend {
    /// Creates a backend holding `document`.
    #[must_use]
    pub fn new(document: PageDocument) -> Self {
        Self {
            document: Mutex::new(document),
        }
    }

    /// Returns a copy of the stored document without validating it.
    #[must_use]
    pub fn current(&self) -> PageDocument {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DocumentBackend for InMemoryBackend {
    fn load(&self) -> Result<PageDocument, StoreError> {
        let document = self.current();
        document.validate()?;
        Ok(document)
    }

    fn save(&self, document: &PageDocument) -> Result<(), StoreError> {
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = document.clone();
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

/// Single-writer access to the page document.
///
/// Cloning is cheap; clones share the backend and the writer section.
#[derive(Clone)]
pub struct ConfigStore {
    backend: Arc<dyn DocumentBackend>,
    writer: Arc<Mutex<()>>,
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("backend", &self.backend.describe())
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Creates a store over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self {
            backend,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Creates a store over the YAML file at `path`.
    #[must_use]
    pub fn yaml_file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(YamlFileBackend::new(path)))
    }

    /// Creates a store over an in-memory document.
    #[must_use]
    pub fn in_memory(document: PageDocument) -> Self {
        Self::new(Arc::new(InMemoryBackend::new(document)))
    }

    /// Enters the writer section and loads the document.
    ///
    /// The section stays held until the returned transaction is committed or
    /// dropped.
    pub fn open_for_update(&self) -> Result<DocumentTransaction<'_>, StoreError> {
        // The guarded value is `()`, so a poisoned lock carries no broken
        // state of its own.
        let guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let document = self.backend.load()?;
        Ok(DocumentTransaction {
            _guard: guard,
            backend: self.backend.as_ref(),
            original: document.clone(),
            document,
            released: false,
        })
    }

    /// Runs `step` against the freshly loaded document and persists the
    /// result before returning.
    pub fn update<T>(&self, step: impl FnOnce(&mut PageDocument) -> T) -> Result<T, StoreError> {
        let mut transaction = self.open_for_update()?;
        let output = step(transaction.document_mut());
        transaction.commit()?;
        Ok(output)
    }

    /// Loads the document inside the writer section without modifying it.
    pub fn snapshot(&self) -> Result<PageDocument, StoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.backend.load()
    }

    /// Location of the backing document.
    #[must_use]
    pub fn describe(&self) -> String {
        self.backend.describe()
    }
}

/// An open read-modify-write cycle on the page document.
pub struct DocumentTransaction<'a> {
    _guard: MutexGuard<'a, ()>,
    backend: &'a dyn DocumentBackend,
    original: PageDocument,
    document: PageDocument,
    released: bool,
}

impl DocumentTransaction<'_> {
    /// The loaded document.
    #[must_use]
    pub fn document(&self) -> &PageDocument {
        &self.document
    }

    /// The loaded document, mutably.
    pub fn document_mut(&mut self) -> &mut PageDocument {
        &mut self.document
    }

    /// Persists the document and leaves the writer section.
    ///
    /// Returns `true` if the document changed and was written back.
    pub fn commit(mut self) -> Result<bool, StoreError> {
        self.release()
    }

    fn release(&mut self) -> Result<bool, StoreError> {
        if self.released {
            return Ok(false);
        }
        self.released = true;

        if self.document == self.original {
            return Ok(false);
        }
        self.backend.save(&self.document)?;
        debug!(backend = %self.backend.describe(), "page document persisted");
        Ok(true)
    }
}

impl Drop for DocumentTransaction<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if std::thread::panicking() {
            error!(
                backend = %self.backend.describe(),
                "discarding page document changes after panic"
            );
            self.released = true;
            return;
        }
        if let Err(e) = self.release() {
            error!(backend = %self.backend.describe(), error = %e, "failed to persist page document on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PageConfig;

    fn sample() -> PageDocument {
        PageDocument::new().with_page("alpha", PageConfig::new("a.html", 2, 2))
    }

    #[test]
    fn test_update_persists_mutation() {
        let backend = Arc::new(InMemoryBackend::new(sample()));
        let store = ConfigStore::new(backend.clone());

        store
            .update(|doc| {
                doc.page_mut("alpha").unwrap().ips.push("1.1.1.1".into());
            })
            .unwrap();

        assert_eq!(backend.current().page("alpha").unwrap().ips, ["1.1.1.1"]);
    }

    #[test]
    fn test_dropped_transaction_still_persists() {
        let backend = Arc::new(InMemoryBackend::new(sample()));
        let store = ConfigStore::new(backend.clone());

        {
            let mut transaction = store.open_for_update().unwrap();
            transaction
                .document_mut()
                .page_mut("alpha")
                .unwrap()
                .cookies
                .push("abc".into());
        }

        assert_eq!(backend.current().page("alpha").unwrap().cookies, ["abc"]);
    }

    #[test]
    fn test_commit_reports_unchanged_document() {
        let store = ConfigStore::in_memory(sample());
        let transaction = store.open_for_update().unwrap();
        assert!(!transaction.commit().unwrap());

        let mut transaction = store.open_for_update().unwrap();
        transaction.document_mut().page_mut("alpha").unwrap().max_ips = 5;
        assert!(transaction.commit().unwrap());
    }

    #[test]
    fn test_invalid_document_is_unavailable() {
        let invalid = PageDocument::new()
            .with_page("alpha", PageConfig::new("a.html", 1, 1).with_aliases(["x"]))
            .with_page("beta", PageConfig::new("b.html", 1, 1).with_aliases(["x"]));
        let store = ConfigStore::in_memory(invalid);

        let err = store.update(|_| ()).unwrap_err();
        assert!(matches!(err, StoreError::ConfigUnavailable { .. }));
    }

    #[test]
    fn test_store_is_reusable_after_panic_in_step() {
        let store = ConfigStore::in_memory(sample());
        let cloned = store.clone();

        let result = std::thread::spawn(move || {
            cloned
                .update(|doc| {
                    doc.page_mut("alpha").unwrap().ips.push("6.6.6.6".into());
                    if doc.pages.contains_key("alpha") {
                        panic!("step failed");
                    }
                })
                .ok();
        })
        .join();
        assert!(result.is_err());

        let document = store.snapshot().unwrap();
        assert!(document.page("alpha").unwrap().ips.is_empty());
    }
}
