#![deny(missing_docs)]
//! Core types shared by every draind crate: the [`InterruptionEvent`] record,
//! the collaborator traits ([`EventSource`], [`NodeClient`]), the tagged
//! [`DrainTask`] closures, and the per-crate error enums.
//!
//! This crate has no business logic of its own — it is the seam that lets
//! `draind-sources`, `draind-store`, `draind-node`, `draind-cloud`, and
//! `draind-engine` depend on shared vocabulary without depending on each
//! other.

pub mod error;
pub mod event;
pub mod node;
pub mod reason;
pub mod source;
pub mod task;

pub use error::*;
pub use event::*;
pub use node::*;
pub use reason::*;
pub use source::*;
pub use task::*;
