//! The convergent executor: a coordinator thread driving a pool of workers
//! over the dependency graph.
//!
//! The coordinator owns all mutable state (graph, change map, in-flight set);
//! workers are fungible and stateless. Jobs and results travel over
//! rendezvous channels, and the coordinator's wait is a three-way select over
//! {send next job, receive a result, cancellation}.

mod job;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Select, Sender, bounded, never};

use crate::catalog::{Catalog, Resource, ResourceId};
use crate::error::ApplyError;
use crate::graph::Graph;
use crate::logging::Log;
use crate::lookup::OwnerCache;
use crate::system::System;
use job::{Job, JobOutcome};

/// Path used when [`ApplyOptions::bash`] is left at its default.
pub const DEFAULT_BASH_PATH: &str = "/bin/bash";

/// Tunables for one Apply run.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Path to the bash interpreter used for `bash` commands.
    pub bash: PathBuf,
    /// Maximum number of resources converged simultaneously.
    pub jobs: usize,
    /// Treat every exec condition as "proceed".
    pub skip_conditions: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            bash: PathBuf::from(DEFAULT_BASH_PATH),
            jobs: 1,
            skip_conditions: false,
        }
    }
}

/// Converges a catalog against a [`System`].
pub struct Applier {
    system: Arc<dyn System>,
    log: Arc<dyn Log>,
    options: ApplyOptions,
}

impl Applier {
    /// Create an applier with default options.
    pub fn new(system: Arc<dyn System>, log: Arc<dyn Log>) -> Self {
        Self::with_options(system, log, ApplyOptions::default())
    }

    /// Create an applier with explicit options.
    pub fn with_options(system: Arc<dyn System>, log: Arc<dyn Log>, options: ApplyOptions) -> Self {
        Self {
            system,
            log,
            options,
        }
    }

    /// Converge the catalog to completion.
    ///
    /// On success, returns the change map: one entry per completed resource,
    /// true when converging it mutated the system.
    ///
    /// # Errors
    ///
    /// Graph construction failures are returned before any work starts.
    /// A resource failure cascade-skips its dependents but does not stop
    /// independent resources; the run then ends with
    /// [`ApplyError::NotClean`].
    pub fn apply(&self, catalog: &Catalog) -> Result<HashMap<ResourceId, bool>, ApplyError> {
        self.apply_with_cancel(catalog, &never())
    }

    /// Like [`apply`](Self::apply), returning promptly with
    /// [`ApplyError::Cancelled`] once `cancel` yields a message or is
    /// dropped by its sender.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub fn apply_with_cancel(
        &self,
        catalog: &Catalog,
        cancel: &Receiver<()>,
    ) -> Result<HashMap<ResourceId, bool>, ApplyError> {
        let mut graph = Graph::new(&catalog.resources)?;
        let lookup = OwnerCache::new();
        let workers = self.options.jobs.max(1);
        let (job_tx, job_rx) = bounded::<Job<'_>>(0);
        let (result_tx, result_rx) = bounded::<JobOutcome>(0);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let log = Arc::clone(&self.log);
                scope.spawn(move || run_worker(&jobs, &results, log.as_ref()));
            }
            drop(job_rx);
            drop(result_tx);

            let outcome = self.coordinate(&mut graph, &lookup, &job_tx, &result_rx, cancel);
            // Closing both channels unblocks any worker waiting to receive a
            // job or deliver a result; the scope then joins them all.
            drop(job_tx);
            drop(result_rx);
            outcome
        })
    }

    /// The coordinator loop. Single-threaded; owns the graph and change map.
    fn coordinate<'a>(
        &'a self,
        graph: &mut Graph<'a>,
        lookup: &'a OwnerCache,
        job_tx: &Sender<Job<'a>>,
        result_rx: &Receiver<JobOutcome>,
        cancel: &Receiver<()>,
    ) -> Result<HashMap<ResourceId, bool>, ApplyError> {
        let capacity = self.options.jobs.max(1);
        let mut working: HashSet<ResourceId> = HashSet::with_capacity(capacity);
        let mut changed: HashMap<ResourceId, bool> = HashMap::new();
        let mut has_failures = false;
        let mut staged: Option<Job<'a>> = None;

        while !graph.done() {
            if staged.is_none() && working.len() < capacity {
                // Stage the first ready resource that is not already in
                // flight; `ready` keeps an id listed until its result lands,
                // so the working set is what prevents double dispatch.
                let next = graph
                    .ready()
                    .iter()
                    .copied()
                    .find(|id| !working.contains(id));
                match next {
                    Some(id) => {
                        let Some(resource) = graph.resource(id) else {
                            return Err(ApplyError::Stuck);
                        };
                        staged = Some(self.build_job(resource, &changed, lookup));
                    }
                    None if working.is_empty() => return Err(ApplyError::Stuck),
                    None => {}
                }
            }

            let mut sel = Select::new();
            let send_idx = staged.as_ref().map(|_| sel.send(job_tx));
            let recv_idx = sel.recv(result_rx);
            let cancel_idx = sel.recv(cancel);
            let oper = sel.select();
            match oper.index() {
                i if Some(i) == send_idx => {
                    let Some(job) = staged.take() else {
                        return Err(ApplyError::Stuck);
                    };
                    let id = job.id();
                    if oper.send(job_tx, job).is_err() {
                        // All workers are gone; nothing can make progress.
                        return Err(ApplyError::Stuck);
                    }
                    working.insert(id);
                }
                i if i == recv_idx => {
                    let Ok(outcome) = oper.recv(result_rx) else {
                        return Err(ApplyError::Stuck);
                    };
                    working.remove(&outcome.id);
                    match outcome.result {
                        Ok(bit) => {
                            graph.mark(outcome.id);
                            changed.insert(outcome.id, bit);
                        }
                        Err(err) => {
                            has_failures = true;
                            let desc = describe(graph, outcome.id);
                            self.log.error_with_output(
                                &format!("apply {desc}: {err}"),
                                err.output().unwrap_or_default(),
                            );
                            let skipped = graph.mark_failure(outcome.id);
                            changed.insert(outcome.id, false);
                            if !skipped.is_empty() {
                                let names: Vec<String> =
                                    skipped.iter().map(|&id| describe(graph, id)).collect();
                                self.log.info(&format!(
                                    "skipping due to failure of {desc}: {}",
                                    names.join(", ")
                                ));
                            }
                        }
                    }
                }
                i if i == cancel_idx => {
                    let _ = oper.recv(cancel);
                    return Err(ApplyError::Cancelled);
                }
                _ => return Err(ApplyError::Stuck),
            }
        }

        if has_failures {
            Err(ApplyError::NotClean)
        } else {
            Ok(changed)
        }
    }

    fn build_job<'a>(
        &'a self,
        resource: &'a Resource,
        changed: &HashMap<ResourceId, bool>,
        lookup: &'a OwnerCache,
    ) -> Job<'a> {
        // Snapshot only the direct dependencies' bits; the job never sees the
        // shared map.
        let deps_changed = resource
            .dependencies
            .iter()
            .map(|&dep| (dep, changed.get(&dep).copied().unwrap_or(false)))
            .collect();
        Job {
            resource,
            deps_changed,
            system: self.system.as_ref(),
            lookup,
            bash: &self.options.bash,
            skip_conditions: self.options.skip_conditions,
            log: self.log.as_ref(),
        }
    }
}

fn describe(graph: &Graph<'_>, id: ResourceId) -> String {
    graph
        .resource(id)
        .map_or_else(|| format!("id={id}"), Resource::description)
}

/// Worker loop: receive a job, converge it, report back. Exits when the job
/// channel closes or the coordinator stops listening for results.
fn run_worker(jobs: &Receiver<Job<'_>>, results: &Sender<JobOutcome>, log: &dyn Log) {
    for job in jobs.iter() {
        log.info(&format!("applying: {}", job.resource.description()));
        let outcome = job.run();
        if results.send(outcome).is_err() {
            return;
        }
    }
}
