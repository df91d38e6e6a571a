//! The admission decision.
//!
//! [`admit`] decides, for one request, whether the client may see the page
//! it asked for. Checks run in a fixed order and the first failing check
//! rejects the request:
//!
//! 1. A page name is present (`NoName`)
//! 2. The name resolves to a page, case-insensitively (`NoPage`)
//! 3. An unbound IP is not held by another page (`IpAlreadyUsed`) and the
//!    page has a free IP slot (`MaxIpsReached`)
//! 4. A presented cookie is not held by another page (`CookieAlreadyUsed`)
//!    and is held by this page (`InvalidCookie`); without a cookie, the page
//!    has a free cookie slot (`MaxCookiesReached`)
//!
//! New bindings are applied only after every check has passed, so a rejected
//! request leaves the document untouched.

pub mod cookie;
pub mod diagnostic;


use std::fmt;

use rand::Rng;
use serde::Serialize;

pub use self::cookie::{COOKIE_SECRET_LEN, generate_secret};
pub use self::diagnostic::RejectionDiagnostic;
use crate::document::PageDocument;

/// Why a request was turned away.
///
/// Every reason renders the same generic view for the client; the reason is
/// only reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForbiddenReason {
    /// No page name was given.
    NoName,
    /// The name matches no page or alias.
    NoPage,
    /// The client IP is bound to another page.
    IpAlreadyUsed,
    /// The page has no free IP slot.
    MaxIpsReached,
    /// The presented cookie is bound to another page.
    CookieAlreadyUsed,
    /// The presented cookie is not bound to this page.
    InvalidCookie,
    /// The page has no free cookie slot.
    MaxCookiesReached,
}

impl ForbiddenReason {
    /// All reasons, in check order.
    pub const ALL: [Self; 7] = [
        Self::NoName,
        Self::NoPage,
        Self::IpAlreadyUsed,
        Self::MaxIpsReached,
        Self::CookieAlreadyUsed,
        Self::InvalidCookie,
        Self::MaxCookiesReached,
    ];

    /// Stable code used in logs and alerts.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NoName => "NO_NAME",
            Self::NoPage => "NO_PAGE",
            Self::IpAlreadyUsed => "IP_ALREADY_USED",
            Self::MaxIpsReached => "MAX_IPS_REACHED",
            Self::CookieAlreadyUsed => "COOKIE_ALREADY_USED",
            Self::InvalidCookie => "INVALID_COOKIE",
            Self::MaxCookiesReached => "MAX_COOKIES_REACHED",
        }
    }
}

impl fmt::Display for ForbiddenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One inbound request, reduced to what admission looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// The `name` query parameter.
    pub requested_name: Option<String>,
    /// The client IP.
    pub remote_ip: String,
    /// The previously issued cookie, if the client sent one.
    pub presented_cookie: Option<String>,
}

impl AdmissionRequest {
    /// A request from `remote_ip` with no name and no cookie.
    #[must_use]
    pub fn new(remote_ip: impl Into<String>) -> Self {
        Self {
            requested_name: None,
            remote_ip: remote_ip.into(),
            presented_cookie: None,
        }
    }

    /// Sets the requested page name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.requested_name = Some(name.into());
        self
    }

    /// Sets the presented cookie.
    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.presented_cookie = Some(cookie.into());
        self
    }

    /// The requested name. A blank name is still a name; it resolves to no
    /// page.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.requested_name.as_deref()
    }

    /// The presented cookie; an empty cookie counts as absent.
    #[must_use]
    pub fn cookie(&self) -> Option<&str> {
        self.presented_cookie
            .as_deref()
            .filter(|cookie| !cookie.is_empty())
    }
}

/// A granted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Name of the resolved page.
    pub page: String,
    /// Content reference to serve.
    pub content: String,
    /// Cookie value to set on the response.
    pub cookie: String,
    /// Whether `cookie` was issued by this request.
    pub cookie_issued: bool,
    /// Whether the client IP was bound by this request.
    pub ip_bound: bool,
}

/// A rejected request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request rejected: {reason}")]
pub struct Rejection {
    /// Why.
    pub reason: ForbiddenReason,
    /// Operator diagnostics.
    pub diagnostic: RejectionDiagnostic,
}

impl Rejection {
    fn new(document: &PageDocument, request: &AdmissionRequest, reason: ForbiddenReason) -> Self {
        Self {
            reason,
            diagnostic: RejectionDiagnostic::collect(document, request, reason),
        }
    }
}

/// Decides admission for `request` and records new bindings in `document`.
///
/// `rng` is used only when a new cookie secret has to be issued.
///
/// # Errors
///
/// Returns a [`Rejection`] carrying the first failed check. The document is
/// not modified in that case.
pub fn admit<R: Rng>(
    document: &mut PageDocument,
    request: &AdmissionRequest,
    rng: &mut R,
) -> Result<Admission, Rejection> {
    let reject = |document: &PageDocument, reason| Err(Rejection::new(document, request, reason));

    let Some(requested) = request.name() else {
        return reject(document, ForbiddenReason::NoName);
    };

    let Some(page_name) = document.resolve(requested).map(str::to_string) else {
        return reject(document, ForbiddenReason::NoPage);
    };
    let Some(page) = document.page(&page_name) else {
        return reject(document, ForbiddenReason::NoPage);
    };

    let remote_ip = request.remote_ip.as_str();
    let bind_ip = !page.holds_ip(remote_ip);
    if bind_ip {
        if document.ip_bound_elsewhere(remote_ip, &page_name) {
            return reject(document, ForbiddenReason::IpAlreadyUsed);
        }
        if page.ips_exhausted() {
            return reject(document, ForbiddenReason::MaxIpsReached);
        }
    }

    let (cookie, cookie_issued) = match request.cookie() {
        Some(presented) => {
            if document.cookie_bound_elsewhere(presented, &page_name) {
                return reject(document, ForbiddenReason::CookieAlreadyUsed);
            }
            if !page.holds_cookie(presented) {
                return reject(document, ForbiddenReason::InvalidCookie);
            }
            (presented.to_string(), false)
        },
        None => {
            if page.cookies_exhausted() {
                return reject(document, ForbiddenReason::MaxCookiesReached);
            }
            (issue_secret(document, rng), true)
        },
    };

    let content = page.page.clone();
    if let Some(page) = document.page_mut(&page_name) {
        if bind_ip {
            page.ips.push(remote_ip.to_string());
        }
        if cookie_issued {
            page.cookies.push(cookie.clone());
        }
    }

    Ok(Admission {
        page: page_name,
        content,
        cookie,
        cookie_issued,
        ip_bound: bind_ip,
    })
}

/// Draws secrets until one is bound nowhere in the document.
fn issue_secret<R: Rng>(document: &PageDocument, rng: &mut R) -> String {
    loop {
        let secret = generate_secret(rng);
        if !document.pages.values().any(|page| page.holds_cookie(&secret)) {
            return secret;
        }
    }
}
