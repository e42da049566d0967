//! Core logic: types, configuration, descriptors, resolution, run queues,
//! installation, and execution.

pub mod codegen;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod fsops;
pub mod installer;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod types;
