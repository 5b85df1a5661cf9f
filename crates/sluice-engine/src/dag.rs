//! Execution plan construction and validation.

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use sluice_core::change::{RunType, TriggerFlags};
use sluice_core::config::{Activation, JobSpec};
use sluice_core::PlanError;
use sluice_core::ids::JobId;
use sluice_core::job::SkipReason;
use std::collections::HashMap;

/// A job in the plan, with its build-time skip decision.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub spec: JobSpec,
    /// Position in the configuration.
    pub declaration_index: usize,
    /// Longest dependency chain above this job.
    pub depth: usize,
    /// Set when the job's activation was false for this run.
    pub skip: Option<SkipReason>,
}

impl PlannedJob {
    pub fn id(&self) -> &JobId {
        &self.spec.id
    }

    pub fn is_active(&self) -> bool {
        self.skip.is_none()
    }
}

/// Validated DAG of jobs for one run. Never mutated after construction.
#[derive(Debug)]
pub struct ExecutionPlan {
    graph: DiGraph<PlannedJob, ()>,
    index: HashMap<JobId, NodeIndex>,
    topological: Vec<NodeIndex>,
}

impl ExecutionPlan {
    /// Jobs in declaration order.
    pub fn jobs(&self) -> impl Iterator<Item = &PlannedJob> {
        // Nodes are added in declaration order.
        self.graph.node_weights()
    }

    pub fn get(&self, id: &str) -> Option<&PlannedJob> {
        self.index
            .get(id)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Position of a job in declaration order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).map(|idx| idx.index())
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Jobs that must finish before `id` may start.
    pub fn dependencies(&self, id: &str) -> Vec<&PlannedJob> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Jobs that wait on `id`.
    pub fn dependents(&self, id: &str) -> Vec<&PlannedJob> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&PlannedJob> {
        let Some(&idx) = self.index.get(id) else {
            return vec![];
        };
        let mut jobs: Vec<_> = self
            .graph
            .neighbors_directed(idx, direction)
            .filter_map(|n| self.graph.node_weight(n))
            .collect();
        jobs.sort_by_key(|j| j.declaration_index);
        jobs
    }

    /// Jobs in a topological order: every job after all its dependencies.
    pub fn topological_order(&self) -> impl Iterator<Item = &PlannedJob> {
        self.topological
            .iter()
            .filter_map(|&idx| self.graph.node_weight(idx))
    }

    /// Roots: jobs without dependencies, in declaration order.
    pub fn roots(&self) -> Vec<&PlannedJob> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }
}

/// Builds an [`ExecutionPlan`] from job specifications.
///
/// Activation is evaluated here, once per run. All validation happens before
/// the plan is returned, so a failed build dispatches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobGraphBuilder;

impl JobGraphBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(
        &self,
        jobs: &[JobSpec],
        flags: &TriggerFlags,
        run_type: RunType,
    ) -> Result<ExecutionPlan, PlanError> {
        if jobs.is_empty() {
            return Err(PlanError::EmptyPlan);
        }

        let mut graph = DiGraph::with_capacity(jobs.len(), jobs.len());
        let mut index = HashMap::with_capacity(jobs.len());

        for (declaration_index, spec) in jobs.iter().enumerate() {
            if index.contains_key(&spec.id) {
                return Err(PlanError::DuplicateJob(spec.id.clone()));
            }
            let node = PlannedJob {
                spec: spec.clone(),
                declaration_index,
                depth: 0,
                skip: skip_reason(spec, flags, run_type),
            };
            index.insert(spec.id.clone(), graph.add_node(node));
        }

        for spec in jobs {
            let job_idx = index[&spec.id];
            for dep in &spec.needs {
                let dep_idx = index
                    .get(dep)
                    .ok_or_else(|| PlanError::UnknownDependency {
                        job: spec.id.clone(),
                        dependency: dep.clone(),
                    })?;
                graph.update_edge(*dep_idx, job_idx, ());
            }
        }

        let topological = toposort(&graph, None)
            .map_err(|cycle| PlanError::CycleDetected(graph[cycle.node_id()].spec.id.clone()))?;

        for &idx in &topological {
            let depth = graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|dep| graph[dep].depth + 1)
                .max()
                .unwrap_or(0);
            graph[idx].depth = depth;
        }

        Ok(ExecutionPlan {
            graph,
            index,
            topological,
        })
    }
}

fn skip_reason(spec: &JobSpec, flags: &TriggerFlags, run_type: RunType) -> Option<SkipReason> {
    if !spec.run_types.is_empty() && !spec.run_types.contains(&run_type) {
        return Some(SkipReason::Inactive {
            condition: format!("run type {}", run_type),
        });
    }
    match &spec.when {
        Activation::Always => None,
        Activation::Area(area) if flags.is_enabled(area.as_str()) => None,
        Activation::Area(area) => Some(SkipReason::Inactive {
            condition: format!("area {}", area),
        }),
    }
}
