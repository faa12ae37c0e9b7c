//! Step plan: a definition flattened into an arena
//!
//! Every step, nested ones included, gets an index in pre-order: a branch
//! container precedes the steps of its paths, so indices follow execution
//! order. Every path (the main path plus one per branch of every container)
//! gets a path index; path [`MAIN_PATH`] is the main path.
//!
//! Runs address steps by plan index and keep one [`Cursor`] per open path.
//!
//! [`Cursor`]: flowline_types::Cursor

use flowline_types::{Step, StepId, StepKind, WorkflowDefinition};
use std::collections::HashMap;

/// Path index of the main path
pub const MAIN_PATH: usize = 0;

/// One step in the arena
#[derive(Clone, Debug)]
pub struct PlanNode {
    pub step: Step,
    /// Path the step lies on
    pub path: usize,
    /// Position within that path
    pub position: usize,
    /// Number of branch containers enclosing the step
    pub depth: usize,
    /// Structural location, e.g. `steps[2].paths[0].steps[1]`
    pub location: String,
    /// Paths opened by this step when it is a branch container
    pub child_paths: Vec<usize>,
}

/// One path in the arena
#[derive(Clone, Debug)]
pub struct PlanPath {
    /// Plan indices, in order
    pub steps: Vec<usize>,
    /// The branch container that opens this path; `None` for the main path
    pub container: Option<usize>,
}

/// A definition's steps flattened into an indexable arena
#[derive(Clone, Debug)]
pub struct StepPlan {
    nodes: Vec<PlanNode>,
    paths: Vec<PlanPath>,
    index: HashMap<StepId, usize>,
}

impl StepPlan {
    /// Flatten a definition. Works on invalid definitions too: with
    /// duplicate step ids, lookups by id find the first occurrence.
    pub fn build(definition: &WorkflowDefinition) -> Self {
        let mut plan = Self {
            nodes: Vec::with_capacity(definition.step_count()),
            paths: vec![PlanPath {
                steps: Vec::new(),
                container: None,
            }],
            index: HashMap::new(),
        };
        plan.add_path(MAIN_PATH, &definition.steps, 0, "");
        plan
    }

    fn add_path(&mut self, path: usize, steps: &[Step], depth: usize, prefix: &str) {
        for (position, step) in steps.iter().enumerate() {
            let idx = self.nodes.len();
            let location = format!("{}steps[{}]", prefix, position);
            self.paths[path].steps.push(idx);
            self.index.entry(step.id.clone()).or_insert(idx);
            self.nodes.push(PlanNode {
                step: step.clone(),
                path,
                position,
                depth,
                location: location.clone(),
                child_paths: Vec::new(),
            });

            if let StepKind::Branch { paths } = &step.kind {
                for (branch, branch_path) in paths.iter().enumerate() {
                    let child = self.paths.len();
                    self.paths.push(PlanPath {
                        steps: Vec::new(),
                        container: Some(idx),
                    });
                    self.nodes[idx].child_paths.push(child);
                    let child_prefix = format!("{}.paths[{}].", location, branch);
                    self.add_path(child, &branch_path.steps, depth + 1, &child_prefix);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &PlanNode {
        &self.nodes[idx]
    }

    pub fn paths(&self) -> &[PlanPath] {
        &self.paths
    }

    pub fn path(&self, path: usize) -> &PlanPath {
        &self.paths[path]
    }

    /// Plan index of a step id
    pub fn index_of(&self, step_id: &StepId) -> Option<usize> {
        self.index.get(step_id).copied()
    }

    pub fn get(&self, step_id: &StepId) -> Option<&PlanNode> {
        self.index_of(step_id).map(|idx| &self.nodes[idx])
    }

    /// Plan index of the step at `position` on `path`
    pub fn step_at(&self, path: usize, position: usize) -> Option<usize> {
        self.paths.get(path)?.steps.get(position).copied()
    }

    /// Step ids in plan order
    pub fn step_ids(&self) -> impl Iterator<Item = StepId> + '_ {
        self.nodes.iter().map(|n| n.step.id.clone())
    }

    /// Every path nested (at any depth) under the given container
    pub fn descendant_paths(&self, container: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[container].child_paths.clone();
        while let Some(path) = stack.pop() {
            out.push(path);
            for &idx in &self.paths[path].steps {
                stack.extend(self.nodes[idx].child_paths.iter().copied());
            }
        }
        out
    }
}
