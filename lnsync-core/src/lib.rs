#![crate_name = "lnsync_core"]

//! A locally queryable mirror of the Lightning network graph.
//!
//! A [`sync::GraphSync`] periodically pulls a snapshot from a
//! [`source::GraphSource`], consolidates the directional channel announcements
//! into bidirectional edges (see [`consolidate`]), resolves each channel's
//! funding transaction through a [`funding::FundingTxCache`] and reconciles the
//! result against a [`store::GraphStore`].

#![forbid(unsafe_code)]
#![allow(bare_trait_objects)]
#![warn(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

pub use bitcoin;

/// Collaborator interface to a bitcoin chain backend
pub mod chain;
/// Merge directional announcements into bidirectional channels
pub mod consolidate;
/// Error types
pub mod error;
/// Feature bit decoding
pub mod features;
/// Funding transaction lookup and caching
pub mod funding;
/// Graph data model
pub mod model;
/// Funding cache persistence
pub mod persist;
/// Short channel identifiers
pub mod scid;
/// Collaborator interface to the network graph source
pub mod source;
/// Graph storage
pub mod store;
/// Sync orchestration
pub mod sync;
/// Various utilities
pub mod util;

pub use error::{Error, Result};
