//! Provenance: BLAKE3 content hashing and the JSONL event log.

pub mod eventlog;
pub mod hasher;
