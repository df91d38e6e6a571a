#![allow(clippy::doc_markdown)]

//! pagegate-core - page allocation and admission
//!
//! This library holds everything that decides who may see a protected page.
//! A page is admitted to at most a bounded number of client IPs and secret
//! cookies, and once an IP or cookie is bound to a page it can never be used
//! for another one.
//!
//! # Modules
//!
//! - [`document`]: The operator-edited page document (YAML) and its load-time
//!   validation
//! - [`store`]: Transactional read-modify-write access to the document over a
//!   pluggable [`store::DocumentBackend`]
//! - [`admission`]: The admission decision, rejection reasons and diagnostics
//! - [`alert`]: Sinks that receive rejection diagnostics
//! - [`gate`]: [`gate::PageGate`], which runs one admission per store
//!   transaction and routes rejections to the alert sink
//!
//! # Invariants
//!
//! - [INV-PG001] An IP appears in at most one page's `ips` list.
//! - [INV-PG002] A cookie appears in at most one page's `cookies` list.
//! - [INV-PG003] Capacity limits are checked before insertion.
//! - [INV-PG004] A rejected request never mutates the document.

pub mod admission;
pub mod alert;
pub mod document;
pub mod gate;
pub mod store;

pub use admission::{Admission, AdmissionRequest, ForbiddenReason, Rejection, admit};
pub use alert::{AlertSink, FanoutAlertSink, MemoryAlertSink, TracingAlertSink};
pub use document::{DocumentError, PageConfig, PageDocument};
pub use gate::PageGate;
pub use store::{ConfigStore, DocumentBackend, InMemoryBackend, StoreError, YamlFileBackend};
