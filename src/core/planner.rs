//! AL-007: Run-queue construction.
//!
//! Compiles a resolved top-level solution into bundles. A bundle is one
//! environment invocation running one or more hook scripts:
//!
//! - standalone solution: its own hook in its own environment
//! - solution with a parent: parent `run`, child hook, parent `close`,
//!   all in the parent's environment
//! - steps: consecutive steps sharing a parent merge into one bundle;
//!   a parentless step or a nested list flushes the pending group
//!
//! Bundles are handed to a sink as soon as they are complete, so the caller
//! decides whether to batch them or execute them immediately.

use super::error::{AlbumError, Result};
use super::parser::{evaluate_bindings, parse_args, to_argv};
use super::types::*;
use crate::environment::EnvironmentManager;
use indexmap::IndexMap;
use tracing::debug;

/// Resolves a handle to a loaded solution.
pub type ResolveFn<'r> = dyn Fn(&str) -> Result<ResolveResult> + 'r;

/// Receives each bundle once it is complete.
pub type BundleSink<'s> = dyn FnMut(RunQueueEntry) -> Result<()> + 's;

/// Steps sharing one parent, waiting to be flushed.
struct PendingGroup {
    parent: ResolveResult,
    /// First value set for a parent argument wins.
    parent_args: IndexMap<String, String>,
    children: Vec<ScriptCall>,
    credits: Vec<String>,
}

pub struct RunQueueBuilder<'a> {
    resolve: &'a ResolveFn<'a>,
    environments: &'a dyn EnvironmentManager,
}

fn loaded(r: &ResolveResult) -> Result<&LoadedSolution> {
    r.loaded.as_ref().ok_or_else(|| {
        AlbumError::Validation(format!("{} was resolved without its descriptor", r.coordinates))
    })
}

fn pairs(parsed: &ParsedArgs) -> Vec<(String, String)> {
    parsed
        .0
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Citation lines for a solution, one per `cite` entry.
pub fn credit_lines(solution: &LoadedSolution) -> Vec<String> {
    let coords = solution.coordinates();
    solution
        .descriptor
        .metadata
        .cite
        .iter()
        .map(|c| match (&c.doi, &c.url) {
            (Some(doi), _) => format!("{}: {} (doi:{})", coords, c.text, doi),
            (None, Some(url)) => format!("{}: {} ({})", coords, c.text, url),
            (None, None) => format!("{}: {}", coords, c.text),
        })
        .collect()
}

fn push_credits(into: &mut Vec<String>, lines: Vec<String>) {
    for line in lines {
        if !into.contains(&line) {
            into.push(line);
        }
    }
}

fn script_call(r: &ResolveResult, hook: Hook, argv: Vec<String>) -> Result<ScriptCall> {
    let solution = loaded(r)?;
    let body = solution.hook(hook).ok_or_else(|| {
        AlbumError::Validation(format!("{} does not declare a {} hook", r.coordinates, hook))
    })?;
    Ok(ScriptCall {
        coordinates: r.coordinates.clone(),
        catalog_id: r.entry.as_ref().map(|e| e.catalog_id),
        hook,
        body: body.to_string(),
        package_dir: r.path.clone(),
        argv,
    })
}

/// Like [`script_call`], but `None` when the hook is not declared.
fn optional_call(r: &ResolveResult, hook: Hook, argv: Vec<String>) -> Result<Option<ScriptCall>> {
    if loaded(r)?.hook(hook).is_none() {
        return Ok(None);
    }
    script_call(r, hook, argv).map(Some)
}

impl<'a> RunQueueBuilder<'a> {
    pub fn new(resolve: &'a ResolveFn<'a>, environments: &'a dyn EnvironmentManager) -> Self {
        Self {
            resolve,
            environments,
        }
    }

    /// Build every bundle for `resolved` with `hook`, in execution order.
    pub fn build(
        &self,
        resolved: &ResolveResult,
        raw_args: &[String],
        hook: Hook,
        sink: &mut BundleSink<'_>,
    ) -> Result<()> {
        let top = loaded(resolved)?;
        let parsed = parse_args(&top.descriptor.metadata.args, raw_args)?;

        if top.descriptor.steps.is_empty() {
            return sink(self.solution_bundle(resolved, hook, &parsed)?);
        }

        debug!(
            "expanding {} steps of {}",
            top.descriptor.steps.len(),
            resolved.coordinates
        );
        self.expand_steps(&top.descriptor.steps, &parsed, sink)?;

        if hook == Hook::Test {
            sink(self.standalone(resolved, hook, to_argv(&pairs(&parsed)))?)?;
        }
        Ok(())
    }

    /// Collect every bundle into a queue.
    pub fn build_queue(
        &self,
        resolved: &ResolveResult,
        raw_args: &[String],
        hook: Hook,
    ) -> Result<Vec<RunQueueEntry>> {
        let mut queue = Vec::new();
        self.build(resolved, raw_args, hook, &mut |entry| {
            queue.push(entry);
            Ok(())
        })?;
        Ok(queue)
    }

    /// A solution without steps, with or without a parent.
    fn solution_bundle(
        &self,
        resolved: &ResolveResult,
        hook: Hook,
        parsed: &ParsedArgs,
    ) -> Result<RunQueueEntry> {
        let solution = loaded(resolved)?;
        let argv = to_argv(&pairs(parsed));
        let Some(parent_ref) = solution.parent() else {
            return self.standalone(resolved, hook, argv);
        };

        let parent = self.resolve_parent(resolved, parent_ref)?;
        let mut group = PendingGroup {
            parent,
            parent_args: IndexMap::new(),
            children: vec![script_call(resolved, hook, argv)?],
            credits: credit_lines(solution),
        };
        for (k, v) in evaluate_bindings(&parent_ref.args, parsed)? {
            group.parent_args.entry(k).or_insert(v);
        }
        self.group_bundle(group)
    }

    fn standalone(
        &self,
        resolved: &ResolveResult,
        hook: Hook,
        argv: Vec<String>,
    ) -> Result<RunQueueEntry> {
        let solution = loaded(resolved)?;
        let environment = self.environments.resolve_environment(
            &resolved.catalog.name,
            &resolved.coordinates,
            solution.descriptor.dependencies.as_ref(),
            &resolved.path,
        )?;
        Ok(RunQueueEntry {
            coordinates: resolved.coordinates.clone(),
            scripts: vec![script_call(resolved, hook, argv)?],
            environment,
            credits: credit_lines(solution),
        })
    }

    fn resolve_parent(&self, child: &ResolveResult, parent_ref: &ParentRef) -> Result<ResolveResult> {
        let handle = parent_ref.handle().ok_or_else(|| {
            AlbumError::Validation(format!("{} has an incomplete parent", child.coordinates))
        })?;
        (self.resolve)(&handle)
    }

    fn expand_steps(
        &self,
        steps: &[Step],
        parsed: &ParsedArgs,
        sink: &mut BundleSink<'_>,
    ) -> Result<()> {
        let mut pending: Option<PendingGroup> = None;
        for step in steps {
            match step {
                Step::Group(inner) => {
                    self.flush(&mut pending, sink)?;
                    self.expand_steps(inner, parsed, sink)?;
                }
                Step::Single(desc) => self.add_step(desc, parsed, &mut pending, sink)?,
            }
        }
        self.flush(&mut pending, sink)
    }

    fn add_step(
        &self,
        desc: &StepDescriptor,
        parsed: &ParsedArgs,
        pending: &mut Option<PendingGroup>,
        sink: &mut BundleSink<'_>,
    ) -> Result<()> {
        let resolved = (self.resolve)(&desc.solution)?;
        let solution = loaded(&resolved)?;
        let bound = evaluate_bindings(&desc.args, parsed)?;
        let child_args = parse_args(&solution.descriptor.metadata.args, &to_argv(&bound))?;
        let call = script_call(&resolved, Hook::Run, to_argv(&pairs(&child_args)))?;

        let Some(parent_ref) = solution.parent() else {
            self.flush(pending, sink)?;
            return sink(self.standalone(&resolved, Hook::Run, call.argv)?);
        };

        let parent = self.resolve_parent(&resolved, parent_ref)?;
        if pending
            .as_ref()
            .is_some_and(|g| g.parent.coordinates != parent.coordinates)
        {
            self.flush(pending, sink)?;
        }
        let group = pending.get_or_insert_with(|| PendingGroup {
            parent,
            parent_args: IndexMap::new(),
            children: Vec::new(),
            credits: Vec::new(),
        });

        let step_parent_args = evaluate_bindings(&desc.parent_args, parsed)?;
        let declared_parent_args = evaluate_bindings(&parent_ref.args, &child_args)?;
        for (k, v) in step_parent_args.into_iter().chain(declared_parent_args) {
            group.parent_args.entry(k).or_insert(v);
        }
        push_credits(&mut group.credits, credit_lines(solution));
        group.children.push(call);
        Ok(())
    }

    fn flush(&self, pending: &mut Option<PendingGroup>, sink: &mut BundleSink<'_>) -> Result<()> {
        match pending.take() {
            Some(group) => sink(self.group_bundle(group)?),
            None => Ok(()),
        }
    }

    /// Parent `run`, the children, then parent `close`, in the parent's environment.
    fn group_bundle(&self, group: PendingGroup) -> Result<RunQueueEntry> {
        let parent = &group.parent;
        let parent_solution = loaded(parent)?;
        let bound: Vec<(String, String)> = group.parent_args.into_iter().collect();
        let parent_args = parse_args(&parent_solution.descriptor.metadata.args, &to_argv(&bound))?;
        let parent_argv = to_argv(&pairs(&parent_args));

        let mut scripts = Vec::with_capacity(group.children.len() + 2);
        scripts.extend(optional_call(parent, Hook::Run, parent_argv.clone())?);
        scripts.extend(group.children);
        scripts.extend(optional_call(parent, Hook::Close, parent_argv)?);

        let mut credits = credit_lines(parent_solution);
        push_credits(&mut credits, group.credits);

        let environment = self.environments.resolve_environment(
            &parent.catalog.name,
            &parent.coordinates,
            parent_solution.descriptor.dependencies.as_ref(),
            &parent.path,
        )?;
        Ok(RunQueueEntry {
            coordinates: parent.coordinates.clone(),
            scripts,
            environment,
            credits,
        })
    }
}
