//! AL-009: Install and uninstall solutions.
//!
//! Installing copies the package into `installations/<catalog>/<g>/<n>/<v>/`,
//! runs the `install` hook in the solution's environment (the parent's for
//! child solutions), and links the entry to its parent. A failed install
//! leaves nothing behind.

use super::codegen;
use super::config::{AlbumConfig, BASE_DIR_ENV};
use super::error::{AlbumError, Result};
use super::fsops;
use super::parser::SolutionLoader;
use super::resolver::Resolver;
use super::types::*;
use crate::catalog::source::CatalogSource;
use crate::catalog::CatalogManager;
use crate::environment::EnvironmentManager;
use crate::provenance::eventlog;
use crate::store::collection_index::CollectionIndex;
use crate::transport::download::Downloader;
use std::path::Path;
use tracing::{debug, info};

pub struct Installer<'a> {
    config: &'a AlbumConfig,
    collection: &'a CollectionIndex,
    source: &'a dyn CatalogSource,
    loader: &'a dyn SolutionLoader,
    downloader: &'a dyn Downloader,
    environments: &'a dyn EnvironmentManager,
}

impl<'a> Installer<'a> {
    pub fn new(
        config: &'a AlbumConfig,
        collection: &'a CollectionIndex,
        source: &'a dyn CatalogSource,
        loader: &'a dyn SolutionLoader,
        downloader: &'a dyn Downloader,
        environments: &'a dyn EnvironmentManager,
    ) -> Self {
        Self {
            config,
            collection,
            source,
            loader,
            downloader,
            environments,
        }
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(
            self.config,
            self.collection,
            self.source,
            self.loader,
            self.downloader,
        )
    }

    /// Install the solution behind `handle`, its parent first.
    pub fn install(&self, handle: &str) -> Result<ResolveResult> {
        let resolver = self.resolver();
        let resolved = resolver.resolve_and_load(handle)?;
        if resolved.is_installed() {
            return Err(AlbumError::Validation(format!(
                "{} is already installed",
                resolved.coordinates
            )));
        }
        let solution = loaded(&resolved)?;

        let parent = match solution.parent() {
            Some(parent_ref) => {
                let parent_handle = parent_ref.handle().ok_or_else(|| {
                    AlbumError::Validation(format!(
                        "{} has an incomplete parent",
                        resolved.coordinates
                    ))
                })?;
                if !resolver.resolve(&parent_handle)?.is_installed() {
                    info!(
                        "installing parent {} of {}",
                        parent_handle, resolved.coordinates
                    );
                    self.install(&parent_handle)?;
                }
                Some(resolver.resolve_installed_and_load(&parent_handle)?)
            }
            None => None,
        };

        let catalog = &resolved.catalog;
        let coords = &resolved.coordinates;
        let install_dir = self.config.installation_dir(&catalog.name, coords);
        fsops::replace_dir(&resolved.path, &install_dir)?;
        self.collection
            .set_installation_unfinished(catalog.catalog_id, coords)?;

        if let Err(e) = self.finish_install(&resolved, parent.as_ref(), &install_dir) {
            debug!("install of {} failed, cleaning up", coords);
            fsops::remove_dir(&install_dir)?;
            self.collection.set_uninstalled(catalog.catalog_id, coords)?;
            return Err(e);
        }

        eventlog::record(
            &self.config.base_dir,
            ProvenanceEvent::SolutionInstalled {
                catalog: catalog.name.clone(),
                solution: coords.to_string(),
                hash: solution.descriptor.metadata.hash.clone(),
            },
        );
        info!("installed {} from catalog {}", coords, catalog.name);
        resolver.resolve(&format!("{}:{}", catalog.name, coords))
    }

    fn finish_install(
        &self,
        resolved: &ResolveResult,
        parent: Option<&ResolveResult>,
        install_dir: &Path,
    ) -> Result<()> {
        let solution = loaded(resolved)?;
        let coords = &resolved.coordinates;
        let environment = match parent {
            Some(p) => self.environments.resolve_environment(
                &p.catalog.name,
                &p.coordinates,
                loaded(p)?.descriptor.dependencies.as_ref(),
                &p.path,
            )?,
            None => self.environments.resolve_environment(
                &resolved.catalog.name,
                coords,
                solution.descriptor.dependencies.as_ref(),
                install_dir,
            )?,
        };

        if let Some(body) = solution.hook(Hook::Install) {
            let call = ScriptCall {
                coordinates: coords.clone(),
                catalog_id: Some(resolved.catalog.catalog_id),
                hook: Hook::Install,
                body: body.to_string(),
                package_dir: install_dir.to_path_buf(),
                argv: Vec::new(),
            };
            let script = codegen::bundle_script(coords, &[call]);
            let vars = [(
                BASE_DIR_ENV.to_string(),
                self.config.base_dir.to_string_lossy().to_string(),
            )];
            self.environments
                .run(&environment, &script, &[], &vars)?
                .check(&coords.to_string())?;
        }

        let parent_id = parent
            .and_then(|p| p.entry.as_ref())
            .map(|e| e.collection_id);
        self.collection
            .set_parent(resolved.catalog.catalog_id, coords, parent_id)?;
        self.collection.set_installed(
            resolved.catalog.catalog_id,
            coords,
            &eventlog::now_iso8601(),
        )
    }

    /// Remove an installed solution that no installed solution depends on.
    pub fn uninstall(&self, handle: &str) -> Result<()> {
        let resolved = self.resolver().resolve_installed_and_load(handle)?;
        let solution = loaded(&resolved)?;
        let coords = &resolved.coordinates;
        let catalog = &resolved.catalog;

        if let Some(entry) = &resolved.entry {
            let dependents: Vec<String> = self
                .collection
                .children_of(entry.collection_id)?
                .iter()
                .filter(|c| c.is_installed())
                .map(|c| c.coordinates().to_string())
                .collect();
            if !dependents.is_empty() {
                return Err(AlbumError::Validation(format!(
                    "{} is required by installed solutions: {}",
                    coords,
                    dependents.join(", ")
                )));
            }
        }

        // Children share the parent's environment, which stays.
        if solution.parent().is_none() {
            let env = self.environments.resolve_environment(
                &catalog.name,
                coords,
                solution.descriptor.dependencies.as_ref(),
                &resolved.path,
            )?;
            self.environments.remove(&env)?;
        }

        fsops::remove_dir(&self.config.installation_dir(&catalog.name, coords))?;
        self.collection.set_uninstalled(catalog.catalog_id, coords)?;
        if catalog.is_cache {
            CatalogManager::new(self.config, self.collection, self.source)
                .remove_from_cache_catalog(coords)?;
        }

        eventlog::record(
            &self.config.base_dir,
            ProvenanceEvent::SolutionUninstalled {
                catalog: catalog.name.clone(),
                solution: coords.to_string(),
            },
        );
        info!("uninstalled {}", coords);
        Ok(())
    }
}

fn loaded(r: &ResolveResult) -> Result<&LoadedSolution> {
    r.loaded.as_ref().ok_or_else(|| {
        AlbumError::Validation(format!("{} was resolved without its descriptor", r.coordinates))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::source::DirSource;
    use crate::catalog::testutil::write_package;
    use crate::catalog::Catalog;
    use crate::core::parser::DescriptorLoader;
    use crate::environment::{environment_name, LocalEnvironment};
    use crate::transport::download::CurlDownloader;
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        config: AlbumConfig,
        collection: CollectionIndex,
        envs: LocalEnvironment,
    }

    impl Fixture {
        fn installer(&self) -> Installer<'_> {
            Installer::new(
                &self.config,
                &self.collection,
                &DirSource,
                &DescriptorLoader,
                &CurlDownloader,
                &self.envs,
            )
        }

        /// Environment directory of `g:<name>:1` from the remote catalog.
        fn env_dir(&self, name: &str) -> PathBuf {
            self.config
                .envs_dir()
                .join(environment_name("remote", &Coordinates::new("g", name, "1")))
        }

        fn resolve(&self, handle: &str) -> ResolveResult {
            Resolver::new(
                &self.config,
                &self.collection,
                &DirSource,
                &DescriptorLoader,
                &CurlDownloader,
            )
            .resolve(handle)
            .unwrap()
        }
    }

    const APP: &str = "hooks:\n  install: touch app_installed\n  run: echo app\n";
    const CHILD: &str = "dependencies:\n  parent:\n    resolve_solution: g:app:1\nhooks:\n  install: echo \"$ALBUM_ENVIRONMENT\" > env_used\n  run: echo child\n";

    /// A collection with a remote catalog holding `app`, `child` (of app),
    /// `plain`, and `broken`.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let config = AlbumConfig::new(&root.join("base"));
        config.ensure_layout().unwrap();
        let collection = CollectionIndex::open(&config.collection_db()).unwrap();

        let src = Catalog::create(&root.join("remote"), "remote").unwrap();
        let pkgs = root.join("pkgs");
        for (name, extra) in [
            ("app", APP),
            ("child", CHILD),
            ("plain", "hooks:\n  run: echo plain\n"),
            ("broken", "hooks:\n  install: echo nope >&2; exit 3\n"),
        ] {
            let pkg = write_package(&pkgs, "g", name, "1", extra);
            src.publish(&pkg, &DescriptorLoader).unwrap();
        }
        CatalogManager::new(&config, &collection, &DirSource)
            .add_catalog(&src.path.to_string_lossy(), None)
            .unwrap();

        let envs = LocalEnvironment::new(&config.envs_dir());
        Fixture {
            _dir: dir,
            root,
            config,
            collection,
            envs,
        }
    }

    #[test]
    fn test_al009_install_runs_hook_and_marks_installed() {
        let f = fixture();
        let result = f.installer().install("g:app:1").unwrap();
        assert!(result.is_installed());
        let dir = f
            .config
            .installation_dir("remote", &Coordinates::new("g", "app", "1"));
        assert_eq!(result.path, dir);
        assert!(dir.join("solution.yml").is_file());
        assert!(dir.join("app_installed").is_file());
        assert!(result.entry.unwrap().state.install_date.is_some());
        assert!(f.env_dir("app").is_dir());

        let events = eventlog::read_events(&f.config.base_dir).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(&e.event, ProvenanceEvent::SolutionInstalled { solution, .. } if solution == "g:app:1")));
    }

    #[test]
    fn test_al009_install_twice_refused() {
        let f = fixture();
        f.installer().install("g:plain:1").unwrap();
        assert!(matches!(
            f.installer().install("g:plain:1"),
            Err(AlbumError::Validation(_))
        ));
    }

    #[test]
    fn test_al009_child_installs_parent_first() {
        let f = fixture();
        let child = f.installer().install("g:child:1").unwrap();
        let parent = f.resolve("g:app:1");
        assert!(parent.is_installed());
        assert_eq!(
            child.entry.unwrap().state.parent_id,
            Some(parent.entry.unwrap().collection_id)
        );
        let env_used = std::fs::read_to_string(child.path.join("env_used")).unwrap();
        assert_eq!(PathBuf::from(env_used.trim()), f.env_dir("app"));
        assert!(!f.env_dir("child").exists());
    }

    #[test]
    fn test_al009_failed_install_cleans_up() {
        let f = fixture();
        let err = f.installer().install("g:broken:1").unwrap_err();
        assert!(matches!(err, AlbumError::Execution { exit_code: 3, .. }));
        let dir = f
            .config
            .installation_dir("remote", &Coordinates::new("g", "broken", "1"));
        assert!(!dir.exists());
        let entry = f.resolve("g:broken:1").entry.unwrap();
        assert!(!entry.state.installed);
        assert!(!entry.state.installation_unfinished);
    }

    #[test]
    fn test_al009_uninstall_refuses_with_installed_children() {
        let f = fixture();
        f.installer().install("g:child:1").unwrap();
        let err = f.installer().uninstall("g:app:1").unwrap_err();
        assert!(matches!(err, AlbumError::Validation(m) if m.contains("g:child:1")));

        f.installer().uninstall("g:child:1").unwrap();
        assert!(f.env_dir("app").is_dir());
        f.installer().uninstall("g:app:1").unwrap();
        assert!(!f.resolve("g:app:1").is_installed());
        assert!(!f.env_dir("app").exists());
    }

    #[test]
    fn test_al009_uninstall_not_installed() {
        let f = fixture();
        assert!(matches!(
            f.installer().uninstall("g:plain:1"),
            Err(AlbumError::NotInstalled(_))
        ));
    }

    #[test]
    fn test_al009_uninstall_purges_cache_solution() {
        let f = fixture();
        let pkg = write_package(&f.root.join("local"), "g", "mine", "1", "hooks:\n  run: echo mine\n");
        let installed = f.installer().install(&pkg.to_string_lossy()).unwrap();
        assert!(installed.catalog.is_cache);

        f.installer().uninstall("g:mine:1").unwrap();
        let cache = f.collection.get_cache_catalog().unwrap();
        assert!(f
            .collection
            .get_solution(cache.catalog_id, &Coordinates::new("g", "mine", "1"))
            .unwrap()
            .is_none());
        assert!(!crate::catalog::solution_dir(&cache.path, &Coordinates::new("g", "mine", "1")).exists());
    }
}
