//! Visual change detection and hero/CTA variant clustering for monitored
//! web pages.
//!
//! Captured snapshots (a screenshot plus the page markup) are compared pair by
//! pair to find visible changes, and their hero blocks are fingerprinted to
//! discover the variants a page serves over time.

pub mod blobs;
pub mod config;
pub mod db;
pub mod diff;
pub mod dom;
pub mod error;
pub mod hashing;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod processor;
pub mod publish;
pub mod report;
pub mod variants;
