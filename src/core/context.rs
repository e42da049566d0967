//! AL-012: The album context. One base directory with its collection and
//! collaborators, handing out the components that work on it.

use super::config::AlbumConfig;
use super::error::{AlbumError, Result};
use super::executor::Executor;
use super::installer::Installer;
use super::parser::{DescriptorLoader, SolutionLoader};
use super::planner::RunQueueBuilder;
use super::resolver::Resolver;
use super::types::{CatalogRecord, CollectionEntry, Hook, ResolveResult};
use crate::catalog::source::{CatalogSource, DefaultSource};
use crate::catalog::sync::Synchronizer;
use crate::catalog::{Catalog, CatalogManager};
use crate::environment::{EnvironmentManager, LocalEnvironment};
use crate::store::collection_index::CollectionIndex;
use crate::transport::download::{CurlDownloader, Downloader};
use crate::transport::ExecOutput;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Swappable external collaborators.
pub struct Collaborators {
    pub source: Box<dyn CatalogSource>,
    pub loader: Box<dyn SolutionLoader>,
    pub downloader: Box<dyn Downloader>,
    pub environments: Box<dyn EnvironmentManager>,
}

impl Collaborators {
    /// Directory/git catalogs, YAML descriptors, curl, and local environments.
    pub fn local(config: &AlbumConfig) -> Self {
        Self {
            source: Box::new(DefaultSource),
            loader: Box::new(DescriptorLoader),
            downloader: Box::new(CurlDownloader),
            environments: Box::new(LocalEnvironment::new(&config.envs_dir())),
        }
    }
}

/// A search hit with the name of its catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub catalog: String,
    pub entry: CollectionEntry,
}

pub struct Album {
    config: AlbumConfig,
    collection: CollectionIndex,
    parts: Collaborators,
    /// Installs and uninstalls touch shared parents, so they run one at a time.
    install_lock: Mutex<()>,
}

impl Album {
    /// Open the base directory with the default collaborators.
    pub fn open(base_dir: &Path) -> Result<Self> {
        let config = AlbumConfig::load(base_dir)?;
        let parts = Collaborators::local(&config);
        Self::with_collaborators(config, parts)
    }

    pub fn with_collaborators(config: AlbumConfig, parts: Collaborators) -> Result<Self> {
        config.ensure_layout()?;
        let collection = CollectionIndex::open(&config.collection_db())?;
        Ok(Self {
            config,
            collection,
            parts,
            install_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &AlbumConfig {
        &self.config
    }

    pub fn collection(&self) -> &CollectionIndex {
        &self.collection
    }

    pub fn catalogs(&self) -> CatalogManager<'_> {
        CatalogManager::new(&self.config, &self.collection, self.parts.source.as_ref())
    }

    pub fn synchronizer(&self) -> Synchronizer<'_> {
        Synchronizer::new(&self.config, &self.collection, self.parts.source.as_ref())
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(
            &self.config,
            &self.collection,
            self.parts.source.as_ref(),
            self.parts.loader.as_ref(),
            self.parts.downloader.as_ref(),
        )
    }

    pub fn installer(&self) -> Installer<'_> {
        Installer::new(
            &self.config,
            &self.collection,
            self.parts.source.as_ref(),
            self.parts.loader.as_ref(),
            self.parts.downloader.as_ref(),
            self.parts.environments.as_ref(),
        )
    }

    pub fn executor(&self) -> Executor<'_> {
        Executor::new(
            &self.config.base_dir,
            &self.collection,
            self.parts.environments.as_ref(),
        )
    }

    /// Create the cache catalog and add missing default catalogs. An
    /// unreachable default catalog is skipped with a warning.
    pub fn init(&self) -> Result<Vec<CatalogRecord>> {
        let catalogs = self.catalogs();
        catalogs.ensure_cache_catalog()?;
        for spec in &self.config.default_catalogs {
            if self.collection.get_catalog_by_src(&spec.src)?.is_some() {
                continue;
            }
            match catalogs.add_catalog(&spec.src, spec.branch.as_deref()) {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => warn!("skipping default catalog: {}", e),
                Err(e) => return Err(e),
            }
        }
        catalogs.list()
    }

    pub fn install(&self, handle: &str) -> Result<ResolveResult> {
        let _guard = self
            .install_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.installer().install(handle)
    }

    pub fn uninstall(&self, handle: &str) -> Result<()> {
        let _guard = self
            .install_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.installer().uninstall(handle)
    }

    /// Run an installed solution. With `run_immediately` each bundle runs as
    /// soon as it is built, otherwise the whole queue is built first.
    pub fn run(
        &self,
        handle: &str,
        args: &[String],
        run_immediately: bool,
    ) -> Result<Vec<ExecOutput>> {
        self.run_hook(handle, args, Hook::Run, run_immediately)
    }

    /// Run the `test` hook of an installed solution.
    pub fn test(&self, handle: &str, args: &[String]) -> Result<Vec<ExecOutput>> {
        self.run_hook(handle, args, Hook::Test, false)
    }

    fn run_hook(
        &self,
        handle: &str,
        args: &[String],
        hook: Hook,
        run_immediately: bool,
    ) -> Result<Vec<ExecOutput>> {
        let resolver = self.resolver();
        let top = resolver.resolve_installed_and_load(handle)?;
        let resolve = |h: &str| resolver.resolve_installed_and_load(h);
        let builder = RunQueueBuilder::new(&resolve, self.parts.environments.as_ref());
        let executor = self.executor();

        if run_immediately {
            let mut outputs = Vec::new();
            builder.build(&top, args, hook, &mut |entry| {
                outputs.push(executor.execute(&entry)?);
                Ok(())
            })?;
            return Ok(outputs);
        }
        let queue = builder.build_queue(&top, args, hook)?;
        info!(
            "running {} ({} bundle{})",
            top.coordinates,
            queue.len(),
            if queue.len() == 1 { "" } else { "s" }
        );
        executor.execute_all(&queue)
    }

    /// Case-insensitive keyword search over the collection.
    pub fn search(&self, keyword: &str) -> Result<Vec<SearchHit>> {
        let names: HashMap<i64, String> = self
            .collection
            .list_catalogs()?
            .into_iter()
            .map(|c| (c.catalog_id, c.name))
            .collect();
        self.collection
            .search(keyword)?
            .into_iter()
            .map(|entry| {
                let catalog = names.get(&entry.catalog_id).cloned().ok_or_else(|| {
                    AlbumError::StorageCorruption(format!(
                        "{} points at missing catalog id {}",
                        entry.coordinates(),
                        entry.catalog_id
                    ))
                })?;
                Ok(SearchHit { catalog, entry })
            })
            .collect()
    }

    /// Resolve and load a solution for display.
    pub fn info(&self, handle: &str) -> Result<ResolveResult> {
        self.resolver().resolve_and_load(handle)
    }

    /// Rebuild the index of a catalog directory, optionally exporting the
    /// solution list. Returns the number of solutions and the export path.
    pub fn index_catalog(&self, dir: &Path, export: bool) -> Result<(usize, Option<PathBuf>)> {
        let catalog = Catalog::open(dir)?;
        let count = catalog.rebuild_index(self.parts.loader.as_ref())?;
        let exported = if export {
            Some(catalog.export()?)
        } else {
            None
        };
        Ok((count, exported))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testutil::{source_catalog, write_package};
    use crate::catalog::CACHE_CATALOG_NAME;
    use crate::core::config::CatalogSpec;
    use crate::store::catalog_index::parse_export;
    use std::collections::BTreeSet;

    fn open(root: &Path) -> Album {
        Album::open(&root.join("base")).unwrap()
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_al012_init_adds_defaults_and_skips_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let src = source_catalog(dir.path(), "remote", &[("g", "a", "1")]);
        let mut config = AlbumConfig::new(&dir.path().join("base"));
        config.default_catalogs = vec![
            CatalogSpec {
                src: src.path.to_string_lossy().to_string(),
                branch: None,
            },
            CatalogSpec {
                src: dir.path().join("missing").to_string_lossy().to_string(),
                branch: None,
            },
        ];
        config.save().unwrap();

        let album = open(dir.path());
        let names: Vec<String> = album.init().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec![CACHE_CATALOG_NAME, "remote"]);
        // a second init is a no-op
        assert_eq!(album.init().unwrap().len(), 2);
    }

    #[test]
    fn test_al012_run_standalone_and_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let album = open(dir.path());
        album.init().unwrap();
        let pkg = write_package(
            dir.path(),
            "g",
            "hello",
            "1",
            "args:\n  - name: who\n    default: world\nhooks:\n  run: echo \"hello $1\"\n",
        );
        album.install(&pkg.to_string_lossy()).unwrap();

        let out = album.run("g:hello:1", &args(&["--who", "album"]), false).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].stdout.trim(), "hello --who=album");

        let out = album.run("hello", &[], true).unwrap();
        assert_eq!(out[0].stdout.trim(), "hello --who=world");
        let entry = album.resolver().resolve("g:hello:1").unwrap().entry.unwrap();
        assert!(entry.state.last_execution.is_some());
    }

    #[test]
    fn test_al012_run_requires_install() {
        let dir = tempfile::tempdir().unwrap();
        let album = open(dir.path());
        let src = source_catalog(dir.path(), "remote", &[("g", "a", "1")]);
        album
            .catalogs()
            .add_catalog(&src.path.to_string_lossy(), None)
            .unwrap();
        assert!(matches!(
            album.run("g:a:1", &[], false),
            Err(AlbumError::NotInstalled(_))
        ));
    }

    #[test]
    fn test_al012_workflow_with_parent_group() {
        let dir = tempfile::tempdir().unwrap();
        let album = open(dir.path());
        let pkgs = dir.path().join("pkgs");
        let app = write_package(
            &pkgs,
            "g",
            "app",
            "1",
            "args:\n  - name: mode\nhooks:\n  run: echo \"app $*\"\n  close: echo app-closed\n",
        );
        let child = write_package(
            &pkgs,
            "g",
            "child",
            "1",
            "args:\n  - name: n\ndependencies:\n  parent:\n    resolve_solution: g:app:1\n    args:\n      - name: mode\n        value: headless\nhooks:\n  run: echo \"child $*\"\n",
        );
        let lone = write_package(&pkgs, "g", "lone", "1", "hooks:\n  run: echo lone\n");
        let flow = write_package(
            &pkgs,
            "g",
            "flow",
            "1",
            "args:\n  - name: count\n    default: '3'\nsteps:\n  - solution: g:child:1\n    args:\n      - name: n\n        from_arg: count\n  - solution: g:lone:1\nhooks:\n  test: echo flow-tested\n",
        );
        for pkg in [&app, &child, &lone, &flow] {
            album.install(&pkg.to_string_lossy()).unwrap();
        }

        let out = album.run("g:flow:1", &[], false).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].stdout.lines().collect::<Vec<_>>(),
            vec!["app --mode=headless", "child --n=3", "app-closed"]
        );
        assert_eq!(out[1].stdout.trim(), "lone");

        let out = album.test("g:flow:1", &[]).unwrap();
        assert_eq!(out.last().unwrap().stdout.trim(), "flow-tested");
    }

    #[test]
    fn test_al012_failure_stops_queue() {
        let dir = tempfile::tempdir().unwrap();
        let album = open(dir.path());
        let pkgs = dir.path().join("pkgs");
        let bad = write_package(&pkgs, "g", "bad", "1", "hooks:\n  run: exit 4\n");
        let marker = dir.path().join("ran");
        let after = write_package(
            &pkgs,
            "g",
            "after",
            "1",
            &format!("hooks:\n  run: touch {}\n", marker.display()),
        );
        let flow = write_package(
            &pkgs,
            "g",
            "flow",
            "1",
            "steps:\n  - solution: g:bad:1\n  - solution: g:after:1\n",
        );
        for pkg in [&bad, &after, &flow] {
            album.install(&pkg.to_string_lossy()).unwrap();
        }
        for immediately in [false, true] {
            let err = album.run("g:flow:1", &[], immediately).unwrap_err();
            assert!(matches!(err, AlbumError::Execution { exit_code: 4, .. }));
            assert!(!marker.exists());
        }
    }

    #[test]
    fn test_al012_run_immediately_executes_before_later_steps_fail() {
        let dir = tempfile::tempdir().unwrap();
        let album = open(dir.path());
        let pkgs = dir.path().join("pkgs");
        let marker = dir.path().join("first.out");
        let first = write_package(
            &pkgs,
            "g",
            "first",
            "1",
            &format!("hooks:\n  run: echo done > {}\n", marker.display()),
        );
        let flow = write_package(
            &pkgs,
            "g",
            "flow",
            "1",
            "steps:\n  - solution: g:first:1\n  - solution: g:gone:1\n",
        );
        for pkg in [&first, &flow] {
            album.install(&pkg.to_string_lossy()).unwrap();
        }
        let stamped = |album: &Album| {
            album
                .resolver()
                .resolve("g:first:1")
                .unwrap()
                .entry
                .unwrap()
                .state
                .last_execution
        };

        // batch mode fails while building, before anything runs
        let err = album.run("g:flow:1", &[], false).unwrap_err();
        assert!(matches!(err, AlbumError::NotFound(_)));
        assert!(!marker.exists());
        assert!(stamped(&album).is_none());

        let err = album.run("g:flow:1", &[], true).unwrap_err();
        assert!(matches!(err, AlbumError::NotFound(_)));
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "done");
        assert!(stamped(&album).is_some());
    }

    #[test]
    fn test_al012_search_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let album = open(dir.path());
        let pkg = write_package(
            dir.path(),
            "imaging",
            "blur",
            "1",
            "title: Gaussian Blur\ntags: [filter]\nhooks:\n  run: echo\n",
        );
        album.resolver().resolve(&pkg.to_string_lossy()).unwrap();

        let hits = album.search("GAUSS").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].catalog, CACHE_CATALOG_NAME);
        assert!(album.search("nothing-like-this").unwrap().is_empty());

        let info = album.info("imaging:blur:1").unwrap();
        assert_eq!(
            info.loaded.unwrap().descriptor.metadata.title.as_deref(),
            Some("Gaussian Blur")
        );
    }

    #[test]
    fn test_al012_index_catalog_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let album = open(dir.path());
        let src = source_catalog(dir.path(), "remote", &[("g", "a", "1"), ("g", "b", "2")]);
        let (count, exported) = album.index_catalog(&src.path, true).unwrap();
        assert_eq!(count, 2);

        let export = parse_export(&exported.unwrap()).unwrap();
        let from_export: BTreeSet<(String, String, String, String)> = export
            .solutions
            .iter()
            .map(|s| (s.group.clone(), s.name.clone(), s.version.clone(), s.hash.clone()))
            .collect();
        let from_index: BTreeSet<(String, String, String, String)> = src
            .index()
            .list_all()
            .unwrap()
            .into_iter()
            .map(|s| (s.group, s.name, s.version, s.hash))
            .collect();
        assert_eq!(from_export, from_index);
    }
}
