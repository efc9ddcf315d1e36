//! Resource dependency graph suitable for scheduling work.
//!
//! [`Graph`] tracks, for every resource, how many dependencies are still
//! outstanding, and exposes the set of resources that are ready to run. The
//! coordinator marks resources as completed (successfully or not); a failure
//! transitively removes every dependent from the schedule.

use std::collections::HashMap;

use crate::catalog::{Resource, ResourceId};
use crate::error::GraphError;

/// Schedules work for a DAG of resources.
#[derive(Debug)]
pub struct Graph<'a> {
    resources: &'a [Resource],
    index: HashMap<ResourceId, usize>,
    dependents: HashMap<ResourceId, Vec<ResourceId>>,

    // Mutable state
    ready: Vec<ResourceId>,
    queued: HashMap<ResourceId, usize>,
}

impl<'a> Graph<'a> {
    /// Build a graph from a resource list.
    ///
    /// # Errors
    ///
    /// Returns an error when a resource declares id 0, when a dependency
    /// references an id not present in the list, or when the dependency
    /// edges contain a cycle.
    pub fn new(resources: &'a [Resource]) -> Result<Self, GraphError> {
        let n = resources.len();
        let mut g = Self {
            resources,
            index: HashMap::with_capacity(n),
            dependents: HashMap::with_capacity(n),
            ready: Vec::new(),
            queued: HashMap::with_capacity(n),
        };
        for (i, res) in resources.iter().enumerate() {
            if res.id == 0 {
                return Err(GraphError::ZeroId);
            }
            g.index.insert(res.id, i);
            g.dependents.entry(res.id).or_default();
            if res.dependencies.is_empty() {
                g.ready.push(res.id);
            } else {
                g.queued.insert(res.id, res.dependencies.len());
                for &dep in &res.dependencies {
                    g.dependents.entry(dep).or_default().push(res.id);
                }
            }
        }
        for (&id, dependents) in &g.dependents {
            if !g.index.contains_key(&id) {
                return Err(GraphError::UnknownDependency {
                    dependency: id,
                    dependent: dependents.first().copied().unwrap_or_default(),
                });
            }
        }
        g.check_acyclic()?;
        Ok(g)
    }

    /// Detect cycles with Kahn's algorithm: repeatedly retire resources whose
    /// in-degree reached zero; anything left over sits on a cycle.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut in_degree: HashMap<ResourceId, usize> = self
            .resources
            .iter()
            .map(|r| (r.id, r.dependencies.len()))
            .collect();
        let mut stack: Vec<ResourceId> = in_degree
            .iter()
            .filter_map(|(&id, &d)| (d == 0).then_some(id))
            .collect();
        let mut processed = 0usize;
        while let Some(id) = stack.pop() {
            processed += 1;
            if let Some(dependents) = self.dependents.get(&id) {
                for &dep in dependents {
                    if let Some(count) = in_degree.get_mut(&dep) {
                        *count -= 1;
                        if *count == 0 {
                            stack.push(dep);
                        }
                    }
                }
            }
        }
        if processed == self.resources.len() {
            return Ok(());
        }
        let mut cyclic: Vec<ResourceId> = in_degree
            .iter()
            .filter_map(|(&id, &d)| (d > 0).then_some(id))
            .collect();
        cyclic.sort_unstable();
        Err(GraphError::Cycle(cyclic))
    }

    /// Resources that have not been marked and have no unmarked dependencies,
    /// in insertion order.
    ///
    /// Callers must treat the order as unspecified and copy the slice before
    /// mutating the graph.
    #[must_use]
    pub fn ready(&self) -> &[ResourceId] {
        &self.ready
    }

    /// Look up the resource with the given id.
    #[must_use]
    pub fn resource(&self, id: ResourceId) -> Option<&'a Resource> {
        self.index.get(&id).and_then(|&i| self.resources.get(i))
    }

    /// Whether every resource has been marked or aborted.
    #[must_use]
    pub fn done(&self) -> bool {
        self.ready.is_empty() && self.queued.is_empty()
    }

    /// Mark a ready resource as completed, releasing dependents whose last
    /// outstanding dependency this was.
    ///
    /// Marking an id that is not currently ready is a no-op.
    pub fn mark(&mut self, id: ResourceId) {
        if !self.pop(id) {
            return;
        }
        let dependents = self.dependents.get(&id).cloned().unwrap_or_default();
        for dep in dependents {
            if let Some(count) = self.queued.get_mut(&dep) {
                *count -= 1;
                if *count == 0 {
                    self.queued.remove(&dep);
                    self.ready.push(dep);
                }
            }
        }
    }

    /// Mark a ready resource as completed with failure.
    ///
    /// Every resource that depends on it, directly or transitively, is
    /// removed from the schedule and returned; none of them will ever appear
    /// in the ready set. The returned list is duplicate-free and excludes
    /// resources that already completed. A failure with no dependents
    /// returns an empty list.
    pub fn mark_failure(&mut self, id: ResourceId) -> Vec<ResourceId> {
        if !self.pop(id) {
            return Vec::new();
        }
        let mut aborted = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let dependents = self.dependents.get(&current).cloned().unwrap_or_default();
            for dep in dependents {
                // Removing from `queued` here both aborts the dependent and
                // guarantees it is collected at most once.
                if self.queued.remove(&dep).is_some() {
                    aborted.push(dep);
                    stack.push(dep);
                }
            }
        }
        aborted
    }

    fn pop(&mut self, id: ResourceId) -> bool {
        match self.ready.iter().position(|&r| r == id) {
            Some(i) => {
                self.ready.remove(i);
                true
            }
            None => false,
        }
    }
}
