//! The page document.
//!
//! The page document is an operator-edited YAML file that lists every
//! protected page together with its live allocation state:
//!
//! ```yaml
//! pages:
//!   alpha:
//!     aliases: [a, first]
//!     page: alpha.html
//!     ips: ["1.2.3.4"]
//!     max_ips: 2
//!     cookies: [qwertyuiopasdfghjklzxcvbnmqwer]
//!     max_cookies: 2
//! ```
//!
//! Page order is preserved across load and save so that a document that was
//! only read is written back unchanged.
//!
//! # Validation
//!
//! [`PageDocument::validate`] runs on every load and refuses documents that
//! would make admission ambiguous:
//!
//! - a name or alias that resolves to two different pages
//! - an IP or cookie bound to more than one page, or listed twice
//! - a content reference that could escape the templates directory

use std::collections::HashMap;
use std::path::{Component, Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing, validating or serializing a page document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The YAML could not be parsed into a page document.
    #[error("failed to parse page document: {0}")]
    Parse(#[source] serde_yaml::Error),

    /// The document could not be serialized back to YAML.
    #[error("failed to serialize page document: {0}")]
    Serialize(#[source] serde_yaml::Error),

    /// A page has an empty name or alias.
    #[error("page '{page}' has an empty name or alias")]
    EmptyName {
        /// The page carrying the empty entry.
        page: String,
    },

    /// A name or alias resolves to two different pages.
    #[error("name '{name}' resolves to both '{first}' and '{second}'")]
    AmbiguousName {
        /// The lowercased name or alias.
        name: String,
        /// The page that claimed it first.
        first: String,
        /// The page that claimed it again.
        second: String,
    },

    /// An IP is bound twice.
    #[error("IP {ip} is bound to both '{first}' and '{second}'")]
    DuplicateIp {
        /// The offending IP.
        ip: String,
        /// The page listing it first.
        first: String,
        /// The page listing it again (may equal `first`).
        second: String,
    },

    /// A cookie is bound twice. The secret itself is not part of the message.
    #[error("a cookie is bound to both '{first}' and '{second}'")]
    DuplicateCookie {
        /// The page listing it first.
        first: String,
        /// The page listing it again (may equal `first`).
        second: String,
    },

    /// A content reference is empty or not a plain file name.
    #[error("page '{page}' has an invalid content reference '{reference}'")]
    InvalidContentRef {
        /// The page carrying the reference.
        page: String,
        /// The rejected reference.
        reference: String,
    },
}

/// Configuration and live allocation state for one protected page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageConfig {
    /// Alternate names resolving to this page.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Content served once a client is admitted, relative to the pages
    /// directory.
    pub page: String,

    /// IPs bound to this page, in binding order.
    #[serde(default)]
    pub ips: Vec<String>,

    /// Maximum number of distinct IPs.
    pub max_ips: usize,

    /// Cookie secrets bound to this page, in issue order.
    #[serde(default)]
    pub cookies: Vec<String>,

    /// Maximum number of distinct cookies.
    pub max_cookies: usize,
}

impl PageConfig {
    /// Creates an empty page serving `page` with the given capacity limits.
    #[must_use]
    pub fn new(page: impl Into<String>, max_ips: usize, max_cookies: usize) -> Self {
        Self {
            aliases: Vec::new(),
            page: page.into(),
            ips: Vec::new(),
            max_ips,
            cookies: Vec::new(),
            max_cookies,
        }
    }

    /// Adds aliases.
    #[must_use]
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    /// Adds already-bound IPs.
    #[must_use]
    pub fn with_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ips.extend(ips.into_iter().map(Into::into));
        self
    }

    /// Adds already-issued cookies.
    #[must_use]
    pub fn with_cookies<I, S>(mut self, cookies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cookies.extend(cookies.into_iter().map(Into::into));
        self
    }

    /// Returns `true` if `ip` is bound to this page.
    #[must_use]
    pub fn holds_ip(&self, ip: &str) -> bool {
        self.ips.iter().any(|bound| bound == ip)
    }

    /// Returns `true` if `cookie` is bound to this page.
    #[must_use]
    pub fn holds_cookie(&self, cookie: &str) -> bool {
        self.cookies.iter().any(|bound| bound == cookie)
    }

    /// Returns `true` if no further IP may be bound.
    #[must_use]
    pub fn ips_exhausted(&self) -> bool {
        self.ips.len() >= self.max_ips
    }

    /// Returns `true` if no further cookie may be issued.
    #[must_use]
    pub fn cookies_exhausted(&self) -> bool {
        self.cookies.len() >= self.max_cookies
    }

    fn answers_to(&self, own_name: &str, folded: &str) -> bool {
        fold(own_name) == folded || self.aliases.iter().any(|alias| fold(alias) == folded)
    }
}

/// The full page document, keyed by page name in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageDocument {
    /// Pages by name.
    #[serde(default)]
    pub pages: IndexMap<String, PageConfig>,
}

impl PageDocument {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a page, replacing any page with the same name.
    #[must_use]
    pub fn with_page(mut self, name: impl Into<String>, page: PageConfig) -> Self {
        self.pages.insert(name.into(), page);
        self
    }

    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Parse`] for malformed YAML and any validation
    /// error from [`PageDocument::validate`].
    pub fn from_yaml(content: &str) -> Result<Self, DocumentError> {
        let document: Self = serde_yaml::from_str(content).map_err(DocumentError::Parse)?;
        document.validate()?;
        Ok(document)
    }

    /// Serializes the document to YAML.
    pub fn to_yaml(&self) -> Result<String, DocumentError> {
        serde_yaml::to_string(self).map_err(DocumentError::Serialize)
    }

    /// Checks the cross-page invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violation found, in document order.
    pub fn validate(&self) -> Result<(), DocumentError> {
        let mut names: HashMap<String, &str> = HashMap::new();
        let mut ips: HashMap<&str, &str> = HashMap::new();
        let mut cookies: HashMap<&str, &str> = HashMap::new();

        for (name, page) in &self.pages {
            for entry in std::iter::once(name).chain(&page.aliases) {
                if entry.trim().is_empty() {
                    return Err(DocumentError::EmptyName { page: name.clone() });
                }
                let folded = fold(entry);
                match names.get(&folded) {
                    Some(first) if *first != name.as_str() => {
                        return Err(DocumentError::AmbiguousName {
                            name: folded,
                            first: (*first).to_string(),
                            second: name.clone(),
                        });
                    },
                    Some(_) => {},
                    None => {
                        names.insert(folded, name);
                    },
                }
            }

            if !is_plain_file_name(&page.page) {
                return Err(DocumentError::InvalidContentRef {
                    page: name.clone(),
                    reference: page.page.clone(),
                });
            }

            for ip in &page.ips {
                if let Some(first) = ips.insert(ip, name) {
                    return Err(DocumentError::DuplicateIp {
                        ip: ip.clone(),
                        first: first.to_string(),
                        second: name.clone(),
                    });
                }
            }

            for cookie in &page.cookies {
                if let Some(first) = cookies.insert(cookie, name) {
                    return Err(DocumentError::DuplicateCookie {
                        first: first.to_string(),
                        second: name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Resolves a requested name or alias to the page name it belongs to.
    ///
    /// Matching is case-insensitive. Validation guarantees at most one match;
    /// for an unvalidated document the first page in document order wins.
    #[must_use]
    pub fn resolve(&self, requested: &str) -> Option<&str> {
        let folded = fold(requested);
        self.pages
            .iter()
            .find(|(name, page)| page.answers_to(name, &folded))
            .map(|(name, _)| name.as_str())
    }

    /// Returns the page with the given name.
    #[must_use]
    pub fn page(&self, name: &str) -> Option<&PageConfig> {
        self.pages.get(name)
    }

    /// Returns the page with the given name, mutably.
    pub fn page_mut(&mut self, name: &str) -> Option<&mut PageConfig> {
        self.pages.get_mut(name)
    }

    /// Names of every page holding `ip`, in document order.
    #[must_use]
    pub fn pages_holding_ip(&self, ip: &str) -> Vec<String> {
        self.pages
            .iter()
            .filter(|(_, page)| page.holds_ip(ip))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names of every page holding `cookie`, in document order.
    #[must_use]
    pub fn pages_holding_cookie(&self, cookie: &str) -> Vec<String> {
        self.pages
            .iter()
            .filter(|(_, page)| page.holds_cookie(cookie))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns `true` if a page other than `except` holds `ip`.
    #[must_use]
    pub fn ip_bound_elsewhere(&self, ip: &str, except: &str) -> bool {
        self.pages
            .iter()
            .any(|(name, page)| name != except && page.holds_ip(ip))
    }

    /// Returns `true` if a page other than `except` holds `cookie`.
    #[must_use]
    pub fn cookie_bound_elsewhere(&self, cookie: &str, except: &str) -> bool {
        self.pages
            .iter()
            .any(|(name, page)| name != except && page.holds_cookie(cookie))
    }
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

fn is_plain_file_name(reference: &str) -> bool {
    let mut components = Path::new(reference).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !reference.contains(['/', '\\'])
}
