//! AL-008: Executor. Runs run-queue bundles in strict FIFO order.
//!
//! Per bundle: credits → bundle_started → script → environment → last_execution → events.
//! The first failing bundle stops the queue; earlier bundles are not rolled back.

use super::codegen;
use super::config::BASE_DIR_ENV;
use super::error::Result;
use super::types::*;
use crate::environment::EnvironmentManager;
use crate::provenance::eventlog;
use crate::store::collection_index::CollectionIndex;
use crate::transport::ExecOutput;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

pub struct Executor<'a> {
    base_dir: &'a Path,
    collection: &'a CollectionIndex,
    environments: &'a dyn EnvironmentManager,
}

impl<'a> Executor<'a> {
    pub fn new(
        base_dir: &'a Path,
        collection: &'a CollectionIndex,
        environments: &'a dyn EnvironmentManager,
    ) -> Self {
        Self {
            base_dir,
            collection,
            environments,
        }
    }

    /// Run one bundle to completion.
    pub fn execute(&self, entry: &RunQueueEntry) -> Result<ExecOutput> {
        for line in &entry.credits {
            info!("please cite: {}", line);
        }
        let owner = entry.coordinates.to_string();
        eventlog::record(
            self.base_dir,
            ProvenanceEvent::BundleStarted {
                owner: owner.clone(),
                scripts: entry.scripts.len() as u32,
            },
        );

        let start = Instant::now();
        let script = codegen::bundle_script(&entry.coordinates, &entry.scripts);
        let vars = [(
            BASE_DIR_ENV.to_string(),
            self.base_dir.to_string_lossy().to_string(),
        )];
        let result = self
            .environments
            .run(&entry.environment, &script, &[], &vars)
            .and_then(|out| out.check(&owner));

        match result {
            Ok(out) => {
                self.stamp(entry)?;
                let duration = start.elapsed().as_secs_f64();
                eventlog::record(
                    self.base_dir,
                    ProvenanceEvent::BundleFinished {
                        owner: owner.clone(),
                        duration_seconds: duration,
                    },
                );
                debug!("bundle {} finished in {:.2}s", owner, duration);
                Ok(out)
            }
            Err(e) => {
                eventlog::record(
                    self.base_dir,
                    ProvenanceEvent::BundleFailed {
                        owner,
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    /// Run every bundle in order, stopping at the first failure.
    pub fn execute_all(&self, queue: &[RunQueueEntry]) -> Result<Vec<ExecOutput>> {
        let mut outputs = Vec::with_capacity(queue.len());
        for entry in queue {
            outputs.push(self.execute(entry)?);
        }
        Ok(outputs)
    }

    fn stamp(&self, entry: &RunQueueEntry) -> Result<()> {
        let now = eventlog::now_iso8601();
        for call in &entry.scripts {
            if let Some(catalog_id) = call.catalog_id {
                self.collection
                    .set_last_execution(catalog_id, &call.coordinates, &now)?;
            }
        }
        Ok(())
    }
}
