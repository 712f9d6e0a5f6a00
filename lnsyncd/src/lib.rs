//! The lnsync daemon: configuration, tracing setup and the Core Lightning
//! graph source around the [`lnsync_core::sync::GraphSync`] loop.

pub mod cln;

pub mod config;

pub mod daemon;

pub mod util;
