#![allow(clippy::doc_markdown)]

//! pagegate-daemon - HTTP front end for pagegate
//!
//! This library wires the admission engine from `pagegate-core` into an axum
//! HTTP server:
//!
//! - `GET /` serves `index.html` from the templates directory
//! - `GET /page?name=<name>` runs one admission and serves the page content
//!   with a session cookie, or the generic forbidden view
//!
//! # Modules
//!
//! - [`config`]: TOML daemon configuration
//! - [`error`]: HTTP error mapping that never leaks internal details
//! - [`mail`]: Fire-and-forget mail delivery of rejection diagnostics
//! - [`render`]: Content lookup under the templates directory
//! - [`server`]: Router, handlers and the serve loop

pub mod config;
pub mod error;
pub mod mail;
pub mod render;
pub mod server;
