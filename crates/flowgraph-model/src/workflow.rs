//! `Workflow`: owns its steps, edges, and block groups, with
//! new/add/get/validate operations over first-class `Step`/`Edge`/
//! `BlockGroup` vectors.

use crate::edge::Edge;
use crate::error::ModelError;
use crate::group::BlockGroup;
use crate::step::Step;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub groups: Vec<BlockGroup>,
    #[serde(default)]
    pub variables: Value,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_status")]
    pub status: WorkflowStatus,
}

fn default_version() -> u32 {
    1
}

fn default_status() -> WorkflowStatus {
    WorkflowStatus::Draft
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
            edges: Vec::new(),
            groups: Vec::new(),
            variables: Value::Object(Default::default()),
            version: 1,
            status: WorkflowStatus::Draft,
        }
    }

    pub fn add_step(&mut self, step: Step) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn add_edge(&mut self, edge: Edge) -> &mut Self {
        self.edges.push(edge);
        self
    }

    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn get_step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn get_group(&self, id: &str) -> Option<&BlockGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Steps that are members of the given group.
    pub fn members_of(&self, group_id: &str) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| s.block_group_id.as_deref() == Some(group_id))
            .collect()
    }

    /// Edges whose both endpoints are members of the given group.
    pub fn internal_edges_of(&self, group_id: &str) -> Vec<&Edge> {
        let members: HashSet<&str> = self.members_of(group_id).iter().map(|s| s.id.as_str()).collect();
        self.edges
            .iter()
            .filter(|e| {
                e.source_id().map(|s| members.contains(s)).unwrap_or(false)
                    && e.target_id().map(|t| members.contains(t)).unwrap_or(false)
            })
            .collect()
    }

    pub fn outgoing_edges(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source_id() == Some(id)).collect()
    }

    pub fn incoming_edges(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.target_id() == Some(id)).collect()
    }

    /// Validates structural integrity: no empty/duplicate ids, no dangling
    /// edges, edges well-formed (exactly one source/target kind), and the
    /// step graph (ignoring declared `while`/`foreach` group bodies, which
    /// are intentionally cyclic at the group level) is acyclic.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.steps.is_empty() {
            return Err(ModelError::InvalidWorkflow("workflow has no steps".into()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(ModelError::InvalidWorkflow("step id is empty".into()));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(ModelError::InvalidWorkflow(format!(
                    "duplicate step id: {}",
                    step.id
                )));
            }
        }

        let group_ids: HashSet<&str> = self.groups.iter().map(|g| g.id.as_str()).collect();

        for edge in &self.edges {
            if !edge.is_valid() {
                return Err(ModelError::InvalidEdge(format!(
                    "edge {} must have exactly one source and one target",
                    edge.id
                )));
            }
            if let Some(sid) = &edge.source_step_id {
                if !seen.contains(sid.as_str()) {
                    return Err(ModelError::InvalidEdge(format!(
                        "edge {} references unknown source step {}",
                        edge.id, sid
                    )));
                }
            }
            if let Some(gid) = &edge.source_block_group_id {
                if !group_ids.contains(gid.as_str()) {
                    return Err(ModelError::InvalidEdge(format!(
                        "edge {} references unknown source group {}",
                        edge.id, gid
                    )));
                }
            }
            if let Some(tid) = &edge.target_step_id {
                if !seen.contains(tid.as_str()) {
                    return Err(ModelError::InvalidEdge(format!(
                        "edge {} references unknown target step {}",
                        edge.id, tid
                    )));
                }
            }
            if let Some(gid) = &edge.target_block_group_id {
                if !group_ids.contains(gid.as_str()) {
                    return Err(ModelError::InvalidEdge(format!(
                        "edge {} references unknown target group {}",
                        edge.id, gid
                    )));
                }
            }
        }

        for step in &self.steps {
            if let Some(gid) = &step.block_group_id {
                if !group_ids.contains(gid.as_str()) {
                    return Err(ModelError::InvalidWorkflow(format!(
                        "step {} references unknown group {}",
                        step.id, gid
                    )));
                }
            }
        }

        topological_sort(&self.steps, &self.edges)?;
        Ok(())
    }

    /// Steps with no incoming edges (candidate start steps absent an
    /// explicit trigger / `start_step_id`).
    pub fn source_steps(&self) -> Vec<&Step> {
        let targets: HashSet<&str> = self
            .edges
            .iter()
            .filter_map(|e| e.target_step_id.as_deref())
            .collect();
        self.steps.iter().filter(|s| !targets.contains(s.id.as_str())).collect()
    }
}

/// Kahn's algorithm over the step graph (ignoring group-internal cycles,
/// since `while`/`foreach` group bodies are validated independently at the
/// group level). Returns an error naming the cycle on failure.
pub fn topological_sort(steps: &[Step], edges: &[Edge]) -> Result<Vec<String>, ModelError> {
    let mut in_degree: HashMap<&str, usize> = steps.iter().map(|s| (s.id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = steps.iter().map(|s| (s.id.as_str(), Vec::new())).collect();

    for edge in edges {
        if let (Some(src), Some(dst)) = (edge.source_step_id.as_deref(), edge.target_step_id.as_deref()) {
            if let Some(list) = adjacency.get_mut(src) {
                list.push(dst);
            }
            if let Some(deg) = in_degree.get_mut(dst) {
                *deg += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut ordered = Vec::with_capacity(steps.len());

    while let Some(id) = queue.pop_front() {
        ordered.push(id.to_string());
        if let Some(children) = adjacency.get(id) {
            for &child in children {
                if let Some(deg) = in_degree.get_mut(child) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }
    }

    if ordered.len() != steps.len() {
        return Err(ModelError::InvalidWorkflow(
            "cycle detected among steps outside of group bodies".into(),
        ));
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_linear_chain() {
        let mut wf = Workflow::new("wf1", "Linear");
        wf.add_step(Step::new("a", "manual_trigger", "Start"));
        wf.add_step(Step::new("b", "noop", "End"));
        wf.add_edge(Edge::new("e1", "a", "b"));
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn rejects_cycle() {
        let mut wf = Workflow::new("wf1", "Cyclic");
        wf.add_step(Step::new("a", "noop", "A"));
        wf.add_step(Step::new("b", "noop", "B"));
        wf.add_edge(Edge::new("e1", "a", "b"));
        wf.add_edge(Edge::new("e2", "b", "a"));
        assert!(wf.validate().is_err());
    }

    #[test]
    fn rejects_dangling_edge() {
        let mut wf = Workflow::new("wf1", "Dangling");
        wf.add_step(Step::new("a", "noop", "A"));
        wf.add_edge(Edge::new("e1", "a", "missing"));
        assert!(wf.validate().is_err());
    }
}
