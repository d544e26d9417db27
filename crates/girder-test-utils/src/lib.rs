//! Test fixtures for Girder development.
//!
//! Deterministic settings, canned locations and cranes, and shorthand
//! move constructors so scenario tests read as geometry, not plumbing.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod fixtures;

pub use fixtures::*;
