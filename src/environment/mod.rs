//! AL-040: Environment collaborator contract.
//!
//! The core never runs hook code itself. It asks an [`EnvironmentManager`]
//! for a handle and hands it a rendered script.

pub mod local;

use crate::core::error::Result;
use crate::core::types::{Coordinates, Dependencies, EnvironmentHandle};
use crate::provenance::hasher;
use crate::transport::ExecOutput;
use std::path::Path;

pub use local::LocalEnvironment;

/// Creates, runs in, and removes execution environments.
pub trait EnvironmentManager: Send + Sync {
    /// Environment for `owner` from `catalog`, created when missing.
    fn resolve_environment(
        &self,
        catalog: &str,
        owner: &Coordinates,
        dependencies: Option<&Dependencies>,
        package_dir: &Path,
    ) -> Result<EnvironmentHandle>;

    /// Run `script` inside the environment.
    fn run(
        &self,
        env: &EnvironmentHandle,
        script: &str,
        argv: &[String],
        env_vars: &[(String, String)],
    ) -> Result<ExecOutput>;

    fn remove(&self, env: &EnvironmentHandle) -> Result<()>;
}

/// Environment name for a solution of a catalog. The readable prefix can
/// repeat across solutions, the digest of `catalog:group:name:version` keeps
/// names apart.
pub fn environment_name(catalog: &str, owner: &Coordinates) -> String {
    format!(
        "{}_{}_{}-{}",
        owner.group,
        owner.name,
        owner.version,
        hasher::short_digest(&format!("{}:{}", catalog, owner))
    )
}
