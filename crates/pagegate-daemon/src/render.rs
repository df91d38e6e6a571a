//! Content lookup under the templates directory.
//!
//! Layout:
//!
//! ```text
//! templates/
//!   index.html
//!   forbidden.html
//!   pages/
//!     <page>        (one file per `page` reference in the page document)
//! ```
//!
//! Files are served verbatim.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use pagegate_core::PageDocument;
use tracing::warn;

use crate::error::ServerError;

/// Served when `forbidden.html` is missing.
pub const FALLBACK_FORBIDDEN: &str = "<!DOCTYPE html>\n<html><head><title>Forbidden</title></head>\
<body><h1>Forbidden</h1><p>You do not have access to this page.</p></body></html>\n";

/// Reads content files from a templates directory.
#[derive(Debug, Clone)]
pub struct ContentRenderer {
    templates_dir: PathBuf,
}

impl ContentRenderer {
    /// Creates a renderer rooted at `templates_dir`.
    #[must_use]
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
        }
    }

    /// The templates directory.
    #[must_use]
    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }

    /// The landing page.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotFound`] if there is no `index.html`.
    pub async fn index(&self) -> Result<String, ServerError> {
        let path = self.templates_dir.join("index.html");
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ServerError::NotFound),
            Err(source) => Err(ServerError::ContentUnavailable {
                reference: "index.html".to_string(),
                source,
            }),
        }
    }

    /// Content of an admitted page.
    ///
    /// # Errors
    ///
    /// [`ServerError::ContentUnavailable`] if the file cannot be read. The
    /// client was admitted, so a missing file is an operator error.
    pub async fn page(&self, reference: &str) -> Result<String, ServerError> {
        let path = self.templates_dir.join("pages").join(reference);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ServerError::ContentUnavailable {
                reference: reference.to_string(),
                source,
            })
    }

    /// Page references in `document` with no readable content file, as
    /// `(page name, reference)` pairs in document order.
    pub async fn missing_pages<'a>(&self, document: &'a PageDocument) -> Vec<(&'a str, &'a str)> {
        let mut missing = Vec::new();
        for (name, page) in &document.pages {
            let path = self.templates_dir.join("pages").join(&page.page);
            let is_file = tokio::fs::metadata(&path)
                .await
                .is_ok_and(|metadata| metadata.is_file());
            if !is_file {
                missing.push((name.as_str(), page.page.as_str()));
            }
        }
        missing
    }

    /// The generic rejection view.
    pub async fn forbidden(&self) -> String {
        let path = self.templates_dir.join("forbidden.html");
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "cannot read forbidden view, using fallback");
                }
                FALLBACK_FORBIDDEN.to_string()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pagegate_core::PageConfig;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_reads_page_content() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("pages")).unwrap();
        std::fs::write(dir.path().join("pages/alpha.html"), "<p>alpha</p>").unwrap();

        let renderer = ContentRenderer::new(dir.path());
        assert_eq!(renderer.page("alpha.html").await.unwrap(), "<p>alpha</p>");
        assert!(matches!(
            renderer.page("missing.html").await,
            Err(ServerError::ContentUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_pages_are_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("pages")).unwrap();
        std::fs::write(dir.path().join("pages/alpha.html"), "<p>alpha</p>").unwrap();
        std::fs::create_dir(dir.path().join("pages/beta.html")).unwrap();

        let document = PageDocument::new()
            .with_page("alpha", PageConfig::new("alpha.html", 1, 1))
            .with_page("beta", PageConfig::new("beta.html", 1, 1))
            .with_page("gamma", PageConfig::new("gamma.html", 1, 1));

        let renderer = ContentRenderer::new(dir.path());
        assert_eq!(
            renderer.missing_pages(&document).await,
            [("beta", "beta.html"), ("gamma", "gamma.html")]
        );
    }

    #[tokio::test]
    async fn test_missing_index_is_not_found() {
        let dir = TempDir::new().unwrap();
        let renderer = ContentRenderer::new(dir.path());
        assert!(matches!(renderer.index().await, Err(ServerError::NotFound)));
    }

    #[tokio::test]
    async fn test_forbidden_falls_back() {
        let dir = TempDir::new().unwrap();
        let renderer = ContentRenderer::new(dir.path());
        assert_eq!(renderer.forbidden().await, FALLBACK_FORBIDDEN);

        std::fs::write(dir.path().join("forbidden.html"), "nope").unwrap();
        assert_eq!(renderer.forbidden().await, "nope");
    }
}
