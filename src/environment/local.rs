//! AL-041: Local environments. One directory per environment, scripts run
//! by `bash` with the environment directory as working directory.

use super::{environment_name, EnvironmentManager};
use crate::core::error::{AlbumError, Result};
use crate::core::fsops;
use crate::core::types::{Coordinates, Dependencies, EnvironmentHandle};
use crate::transport::local::exec_local;
use crate::transport::ExecOutput;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File the declared environment specification is recorded as.
pub const ENVIRONMENT_SPEC_FILE: &str = "environment.yml";

#[derive(Debug, Clone)]
pub struct LocalEnvironment {
    envs_dir: PathBuf,
}

impl LocalEnvironment {
    pub fn new(envs_dir: &Path) -> Self {
        Self {
            envs_dir: envs_dir.to_path_buf(),
        }
    }
}

impl EnvironmentManager for LocalEnvironment {
    fn resolve_environment(
        &self,
        catalog: &str,
        owner: &Coordinates,
        dependencies: Option<&Dependencies>,
        package_dir: &Path,
    ) -> Result<EnvironmentHandle> {
        let name = environment_name(catalog, owner);
        let path = self.envs_dir.join(&name);
        std::fs::create_dir_all(&path).map_err(|e| AlbumError::io(&path, e))?;

        let spec = dependencies.and_then(|d| d.environment_file.as_deref());
        if let Some(file) = spec {
            let from = package_dir.join(file);
            let to = path.join(ENVIRONMENT_SPEC_FILE);
            if from.is_file() && !to.exists() {
                std::fs::copy(&from, &to).map_err(|e| AlbumError::io(&from, e))?;
                debug!("recorded environment spec for {}", name);
            }
        }
        Ok(EnvironmentHandle { name, path })
    }

    fn run(
        &self,
        env: &EnvironmentHandle,
        script: &str,
        argv: &[String],
        env_vars: &[(String, String)],
    ) -> Result<ExecOutput> {
        let mut vars = env_vars.to_vec();
        vars.push((
            "ALBUM_ENVIRONMENT".to_string(),
            env.path.to_string_lossy().to_string(),
        ));
        exec_local(script, argv, &vars, Some(&env.path))
    }

    fn remove(&self, env: &EnvironmentHandle) -> Result<()> {
        debug!("removing environment {}", env.name);
        fsops::remove_dir(&env.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_al041_resolve_creates_dir_and_records_spec() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("pkg");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("env.yml"), "dependencies: [python]\n").unwrap();
        let envs = LocalEnvironment::new(&dir.path().join("envs"));
        let deps = Dependencies {
            environment_file: Some("env.yml".to_string()),
            ..Dependencies::default()
        };
        let coords = Coordinates::new("g", "n", "1");
        let handle = envs
            .resolve_environment("remote", &coords, Some(&deps), &pkg)
            .unwrap();
        assert_eq!(handle.name, environment_name("remote", &coords));
        assert!(handle.path.join(ENVIRONMENT_SPEC_FILE).is_file());

        let again = envs
            .resolve_environment("remote", &coords, None, &pkg)
            .unwrap();
        assert_eq!(again, handle);
    }

    #[test]
    fn test_al041_run_in_environment() {
        let dir = tempfile::tempdir().unwrap();
        let envs = LocalEnvironment::new(&dir.path().join("envs"));
        let handle = envs
            .resolve_environment("remote", &Coordinates::new("g", "n", "1"), None, dir.path())
            .unwrap();
        let out = envs
            .run(&handle, "basename \"$ALBUM_ENVIRONMENT\"; echo \"$1\"", &["x".to_string()], &[])
            .unwrap();
        let lines: Vec<_> = out.stdout.lines().collect();
        assert_eq!(lines, vec![handle.name.as_str(), "x"]);
    }

    #[test]
    fn test_al041_remove() {
        let dir = tempfile::tempdir().unwrap();
        let envs = LocalEnvironment::new(&dir.path().join("envs"));
        let handle = envs
            .resolve_environment("remote", &Coordinates::new("g", "n", "1"), None, dir.path())
            .unwrap();
        envs.remove(&handle).unwrap();
        assert!(!handle.path.exists());
        envs.remove(&handle).unwrap();
    }

    #[test]
    fn test_al041_lookalike_coordinates_keep_separate_environments() {
        let dir = tempfile::tempdir().unwrap();
        let envs = LocalEnvironment::new(&dir.path().join("envs"));
        let a = envs
            .resolve_environment("remote", &Coordinates::new("a_b", "c", "1"), None, dir.path())
            .unwrap();
        let b = envs
            .resolve_environment("remote", &Coordinates::new("a", "b_c", "1"), None, dir.path())
            .unwrap();
        let same_in_cache = envs
            .resolve_environment("cache_catalog", &Coordinates::new("a_b", "c", "1"), None, dir.path())
            .unwrap();
        assert_ne!(a.path, b.path);
        assert_ne!(a.path, same_in_cache.path);

        envs.remove(&a).unwrap();
        assert!(b.path.is_dir());
        assert!(same_in_cache.path.is_dir());
    }
}
