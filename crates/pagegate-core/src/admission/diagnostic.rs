//! Operator-facing rejection diagnostics.
//!
//! A diagnostic captures who was turned away and which pages currently hold
//! the caller's IP and cookie. It is delivered to alert sinks only; the
//! client sees a generic view.

use serde::Serialize;

use super::{AdmissionRequest, ForbiddenReason};
use crate::document::PageDocument;

/// Context recorded for a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionDiagnostic {
    /// Why the request was rejected.
    pub reason: ForbiddenReason,

    /// The page name the client asked for, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entered_name: Option<String>,

    /// The client IP.
    pub request_ip: String,

    /// Pages currently holding the client IP.
    pub ip_names: Vec<String>,

    /// The cookie the client presented, if any.
    pub cookie: Option<String>,

    /// Pages currently holding the presented cookie.
    pub cookie_names: Vec<String>,
}

impl RejectionDiagnostic {
    /// Collects the diagnostic for `request` against the unmodified document.
    #[must_use]
    pub fn collect(
        document: &PageDocument,
        request: &AdmissionRequest,
        reason: ForbiddenReason,
    ) -> Self {
        let cookie = request.cookie().map(str::to_string);
        let cookie_names = cookie
            .as_deref()
            .map(|value| document.pages_holding_cookie(value))
            .unwrap_or_default();

        Self {
            reason,
            entered_name: request.name().map(str::to_string),
            request_ip: request.remote_ip.clone(),
            ip_names: document.pages_holding_ip(&request.remote_ip),
            cookie,
            cookie_names,
        }
    }

    /// Pretty-printed JSON, as shipped to log and mail sinks.
    #[must_use]
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!("{{\"reason\": \"{}\", \"error\": \"{e}\"}}", self.reason))
    }
}
