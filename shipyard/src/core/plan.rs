//! Deterministic execution planning for the task graph.
//!
//! Planning is pure: it only looks at task names and their dependency groups.
//! Every unknown name and every cycle is reported here, before any action runs.

use std::collections::HashMap;

use crate::error::{ConfigurationError, CycleDetectedError};

/// How the prerequisites inside one dependency group relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepMode {
    /// Run strictly one after another, in listed order.
    Serial,
    /// May run concurrently; all finish before the dependent starts.
    Parallel,
}

/// Prerequisites declared together with one execution mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepGroup {
    pub mode: DepMode,
    pub tasks: Vec<String>,
}

/// Dependency shape of one declared task.
pub trait PlanNode {
    fn name(&self) -> &str;
    fn groups(&self) -> &[DepGroup];

    /// Prerequisites across all groups, in listed order.
    fn prerequisites(&self) -> impl Iterator<Item = &str> {
        self.groups()
            .iter()
            .flat_map(|group| group.tasks.iter().map(String::as_str))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Stable topological order of everything `roots` needs, roots included.
///
/// Prerequisites come before dependents. Ties are broken by listed order:
/// roots in the order requested, prerequisites in the order declared on each
/// task. Each task appears once even when shared by several dependents.
pub fn execution_order<N: PlanNode>(nodes: &[N], roots: &[&str]) -> anyhow::Result<Vec<String>> {
    let index: HashMap<&str, &N> = nodes.iter().map(|n| (n.name(), n)).collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut order = Vec::new();

    for root in roots {
        let node = index
            .get(root)
            .ok_or_else(|| ConfigurationError::UnknownTask {
                name: (*root).to_string(),
                required_by: None,
            })?;
        visit(*node, &index, &mut marks, &mut stack, &mut order)?;
    }
    Ok(order)
}

fn visit<'a, N: PlanNode>(
    node: &'a N,
    index: &HashMap<&'a str, &'a N>,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> anyhow::Result<()> {
    let name = node.name();
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|n| *n == name).unwrap_or(0);
            let mut chain: Vec<String> = stack[start..].iter().map(|n| (*n).to_string()).collect();
            chain.push(name.to_string());
            return Err(CycleDetectedError { chain }.into());
        }
        None => {}
    }

    marks.insert(name, Mark::Visiting);
    stack.push(name);
    for prereq in node.prerequisites() {
        let dep = index
            .get(prereq)
            .ok_or_else(|| ConfigurationError::UnknownTask {
                name: prereq.to_string(),
                required_by: Some(name.to_string()),
            })?;
        visit(*dep, index, marks, stack, order)?;
    }
    stack.pop();
    marks.insert(name, Mark::Done);
    order.push(name.to_string());
    Ok(())
}
