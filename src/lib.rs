//! Album: federated solution catalogs.
//!
//! Catalogs publish versioned solutions; a local collection tracks them,
//! resolves handles to exact coordinates, installs them, and runs them
//! through a FIFO run queue of environment bundles.

pub mod catalog;
pub mod cli;
pub mod core;
pub mod environment;
pub mod provenance;
pub mod store;
pub mod tasks;
pub mod transport;
