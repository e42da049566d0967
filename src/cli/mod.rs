//! AL-060: CLI subcommands. Catalogs, search, install, run.

use crate::catalog::sync::ChangeSets;
use crate::core::context::Album;
use crate::core::types::ResolveResult;
use crate::tasks::{Task, TaskManager, TaskStatus};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the cache catalog and add the configured default catalogs
    Init,

    /// Add a catalog from a directory or git repository
    AddCatalog {
        /// Catalog source (directory, file:// URL, or git URL)
        src: String,

        /// Branch to clone for git catalogs
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Remove a catalog without installed solutions
    RemoveCatalog {
        /// Catalog name
        name: String,
    },

    /// List catalogs in the collection
    Catalogs,

    /// Refresh catalog snapshots and show pending changes
    Update {
        /// Only this catalog
        name: Option<String>,
    },

    /// Refresh catalogs and apply their changes to the collection
    Upgrade {
        /// Only this catalog
        name: Option<String>,

        /// Show changes without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Search solutions by keyword
    Search {
        keyword: String,
    },

    /// Show a solution's metadata
    Info {
        /// Solution handle (path, URL, DOI, coordinates, or name)
        handle: String,
    },

    /// Install one or more solutions
    Install {
        #[arg(required = true)]
        handles: Vec<String>,
    },

    /// Uninstall a solution
    Uninstall {
        handle: String,
    },

    /// Run an installed solution
    Run {
        handle: String,

        /// Execute each bundle as soon as it is built
        #[arg(long)]
        run_immediately: bool,

        /// Arguments for the solution, after `--`
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Run the test hook of an installed solution
    Test {
        handle: String,

        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Rebuild the index of a catalog directory
    Index {
        /// Catalog directory
        dir: PathBuf,

        /// Also write catalog_solution_list.json
        #[arg(long)]
        export: bool,
    },
}

/// Dispatch a CLI command against the collection at `base_dir`.
pub fn dispatch(base_dir: &Path, cmd: Commands) -> Result<(), String> {
    let album = Album::open(base_dir).map_err(|e| e.to_string())?;
    match cmd {
        Commands::Init => cmd_init(&album),
        Commands::AddCatalog { src, branch } => cmd_add_catalog(&album, &src, branch.as_deref()),
        Commands::RemoveCatalog { name } => cmd_remove_catalog(&album, &name),
        Commands::Catalogs => cmd_catalogs(&album),
        Commands::Update { name } => cmd_update(&album, name.as_deref()),
        Commands::Upgrade { name, dry_run } => cmd_upgrade(&album, name.as_deref(), dry_run),
        Commands::Search { keyword } => cmd_search(&album, &keyword),
        Commands::Info { handle } => cmd_info(&album, &handle),
        Commands::Install { handles } => cmd_install(album, handles),
        Commands::Uninstall { handle } => cmd_uninstall(&album, &handle),
        Commands::Run {
            handle,
            run_immediately,
            args,
        } => cmd_run(&album, &handle, &args, run_immediately),
        Commands::Test { handle, args } => cmd_test(&album, &handle, &args),
        Commands::Index { dir, export } => cmd_index(&album, &dir, export),
    }
}

fn cmd_init(album: &Album) -> Result<(), String> {
    let catalogs = album.init().map_err(|e| e.to_string())?;
    println!(
        "Initialized album at {}",
        album.config().base_dir.display()
    );
    for c in &catalogs {
        println!("  catalog: {}", c.name);
    }
    Ok(())
}

fn cmd_add_catalog(album: &Album, src: &str, branch: Option<&str>) -> Result<(), String> {
    let record = album
        .catalogs()
        .add_catalog(src, branch)
        .map_err(|e| e.to_string())?;
    let count = album
        .collection()
        .list_by_catalog(record.catalog_id)
        .map_err(|e| e.to_string())?
        .len();
    println!("Added catalog {} ({} solutions)", record.name, count);
    Ok(())
}

fn cmd_remove_catalog(album: &Album, name: &str) -> Result<(), String> {
    album
        .catalogs()
        .remove_catalog(name)
        .map_err(|e| e.to_string())?;
    println!("Removed catalog {}", name);
    Ok(())
}

fn cmd_catalogs(album: &Album) -> Result<(), String> {
    let catalogs = album.catalogs().list().map_err(|e| e.to_string())?;
    if catalogs.is_empty() {
        println!("No catalogs. Run `album init` first.");
        return Ok(());
    }
    for c in &catalogs {
        let src = match (&c.src, c.is_cache) {
            (_, true) => "(cache)".to_string(),
            (Some(src), false) => src.clone(),
            (None, false) => "-".to_string(),
        };
        println!(
            "{:<24} {:<10} {}",
            c.name,
            c.version.as_deref().unwrap_or("-"),
            src
        );
    }
    Ok(())
}

fn print_changes(changes: &ChangeSets) {
    for (catalog, list) in changes {
        if list.is_empty() {
            println!("{}: up to date", catalog);
            continue;
        }
        println!("{}: {} change(s)", catalog, list.len());
        for change in list {
            match &change.change_log {
                Some(log) => println!("  {:<8} {}  {}", change.change_type.to_string(), change.coordinates, log),
                None => println!("  {:<8} {}", change.change_type.to_string(), change.coordinates),
            }
        }
    }
}

fn cmd_update(album: &Album, name: Option<&str>) -> Result<(), String> {
    let changes = album.synchronizer().update(name).map_err(|e| e.to_string())?;
    print_changes(&changes);
    Ok(())
}

fn cmd_upgrade(album: &Album, name: Option<&str>, dry_run: bool) -> Result<(), String> {
    let changes = album
        .synchronizer()
        .upgrade(name, dry_run)
        .map_err(|e| e.to_string())?;
    print_changes(&changes);
    if dry_run {
        println!("Dry run: no changes applied.");
    }
    Ok(())
}

fn cmd_search(album: &Album, keyword: &str) -> Result<(), String> {
    let hits = album.search(keyword).map_err(|e| e.to_string())?;
    if hits.is_empty() {
        println!("No solutions match '{}'", keyword);
        return Ok(());
    }
    for hit in &hits {
        let marker = if hit.entry.is_installed() { "*" } else { " " };
        println!(
            "{} {}:{}  {}",
            marker,
            hit.catalog,
            hit.entry.coordinates(),
            hit.entry.metadata.title.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn print_info(result: &ResolveResult) {
    println!("{}", result.coordinates);
    println!("  catalog:   {}", result.catalog.name);
    println!("  path:      {}", result.path.display());
    println!("  installed: {}", result.is_installed());
    let Some(ref loaded) = result.loaded else {
        return;
    };
    let meta = &loaded.descriptor.metadata;
    if let Some(ref title) = meta.title {
        println!("  title:     {}", title);
    }
    if let Some(ref description) = meta.description {
        println!("  about:     {}", description);
    }
    if let Some(parent) = loaded.parent().and_then(|p| p.handle()) {
        println!("  parent:    {}", parent);
    }
    if !meta.args.is_empty() {
        println!("  arguments:");
        for arg in &meta.args {
            let default = arg
                .default
                .as_deref()
                .map(|d| format!(" (default: {})", d))
                .unwrap_or_default();
            let required = if arg.required { " required" } else { "" };
            println!(
                "    --{} <{}>{}{}  {}",
                arg.name,
                arg.arg_type,
                required,
                default,
                arg.description.as_deref().unwrap_or("")
            );
        }
    }
    for cite in &meta.cite {
        println!("  cite:      {}", cite.text);
    }
}

fn cmd_info(album: &Album, handle: &str) -> Result<(), String> {
    let result = album.info(handle).map_err(|e| e.to_string())?;
    print_info(&result);
    Ok(())
}

/// Installs go through the task manager; each handle is one task.
fn cmd_install(album: Album, handles: Vec<String>) -> Result<(), String> {
    let workers = album.config().task_workers;
    let album = Arc::new(album);
    let tasks = TaskManager::new(workers).map_err(|e| e.to_string())?;

    let mut ids = Vec::with_capacity(handles.len());
    for handle in handles {
        let album = Arc::clone(&album);
        let name = format!("install {}", handle);
        let id = tasks
            .register(Task::new(&name, move |log| {
                let result = album.install(&handle)?;
                log.push(format!(
                    "installed {} into {}",
                    result.coordinates,
                    result.path.display()
                ));
                Ok(())
            }))
            .map_err(|e| e.to_string())?;
        ids.push(id);
    }

    let mut failed = 0;
    for id in ids {
        let record = tasks.wait(id).map_err(|e| e.to_string())?;
        println!("[{}] {}", record.status, record.name);
        for line in &record.log {
            println!("  {}", line);
        }
        if record.status == TaskStatus::Failed {
            failed += 1;
        }
    }
    tasks.shutdown();

    if failed > 0 {
        return Err(format!("{} installation(s) failed", failed));
    }
    Ok(())
}

fn cmd_uninstall(album: &Album, handle: &str) -> Result<(), String> {
    album.uninstall(handle).map_err(|e| e.to_string())?;
    println!("Uninstalled {}", handle);
    Ok(())
}

fn cmd_run(album: &Album, handle: &str, args: &[String], immediately: bool) -> Result<(), String> {
    let outputs = album
        .run(handle, args, immediately)
        .map_err(|e| e.to_string())?;
    for out in &outputs {
        print!("{}", out.stdout);
    }
    Ok(())
}

fn cmd_test(album: &Album, handle: &str, args: &[String]) -> Result<(), String> {
    let outputs = album.test(handle, args).map_err(|e| e.to_string())?;
    for out in &outputs {
        print!("{}", out.stdout);
    }
    println!("Test of {} passed.", handle);
    Ok(())
}

fn cmd_index(album: &Album, dir: &Path, export: bool) -> Result<(), String> {
    let (count, exported) = album
        .index_catalog(dir, export)
        .map_err(|e| e.to_string())?;
    println!("Indexed {} solution(s) in {}", count, dir.display());
    if let Some(path) = exported {
        println!("  Exported: {}", path.display());
    }
    Ok(())
}
