use crate::types::{StepId, StepSpec, WorkflowSpec};
use anyhow::{anyhow, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use petgraph::Direction;
use std::collections::HashMap;

/// Dependency graph of tool invocations
pub struct WorkflowDag {
    graph: DiGraph<StepSpec, ()>,
    step_indices: HashMap<StepId, NodeIndex>,
}

impl WorkflowDag {
    /// Build a DAG from a workflow specification
    pub fn from_workflow(workflow: &WorkflowSpec) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut step_indices = HashMap::new();

        for step in &workflow.steps {
            let node = graph.add_node(step.clone());
            if step_indices.insert(step.id.clone(), node).is_some() {
                return Err(anyhow!("Step {} is defined more than once", step.id));
            }
        }

        for (step_id, dependencies) in &workflow.dependencies {
            let step_idx = step_indices.get(step_id).ok_or_else(|| {
                anyhow!("Step {} referenced in dependencies but not defined", step_id)
            })?;

            for dep_id in dependencies {
                let dep_idx = step_indices.get(dep_id).ok_or_else(|| {
                    anyhow!("Dependency {} not found for step {}", dep_id, step_id)
                })?;

                // Edge from dependency to dependent (dep -> step)
                graph.update_edge(*dep_idx, *step_idx, ());
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(anyhow!("Workflow contains circular dependencies"));
        }

        Ok(Self {
            graph,
            step_indices,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Steps in topological order (dependencies first)
    pub fn topological_order(&self) -> Vec<StepSpec> {
        let mut topo = Topo::new(&self.graph);
        let mut steps = Vec::new();

        while let Some(node) = topo.next(&self.graph) {
            steps.push(self.graph[node].clone());
        }

        steps
    }

    fn neighbors(&self, step_id: &StepId, direction: Direction) -> Result<Vec<StepId>> {
        let node = self
            .step_indices
            .get(step_id)
            .ok_or_else(|| anyhow!("Step {} not found", step_id))?;

        Ok(self
            .graph
            .neighbors_directed(*node, direction)
            .map(|n| self.graph[n].id.clone())
            .collect())
    }

    /// Steps that must finish before `step_id`
    pub fn dependencies(&self, step_id: &StepId) -> Result<Vec<StepId>> {
        self.neighbors(step_id, Direction::Incoming)
    }

    /// Steps waiting on `step_id`
    pub fn dependents(&self, step_id: &StepId) -> Result<Vec<StepId>> {
        self.neighbors(step_id, Direction::Outgoing)
    }

    /// Steps with no dependencies
    pub fn entry_steps(&self) -> Vec<StepSpec> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n].clone())
            .collect()
    }
}
