use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::engine::types::{FlowDefinition, NodeDefinition};
use crate::error::DefinitionError;
use crate::nodes::NodeRegistry;

/// A flow that passed validation, together with a dependency-respecting order.
///
/// Built once and reused for every trigger; the flow cannot change afterwards.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    flow: Arc<FlowDefinition>,
    order: Vec<usize>,
    positions: HashMap<String, usize>,
}

impl ExecutionPlan {
    pub fn flow(&self) -> &FlowDefinition {
        &self.flow
    }

    pub fn name(&self) -> &str {
        &self.flow.name
    }

    /// Nodes in execution order: every node comes after all of its dependencies.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeDefinition> + '_ {
        self.order.iter().map(|&i| &self.flow.nodes[i])
    }

    pub fn order(&self) -> Vec<&str> {
        self.nodes().map(|n| n.name.as_str()).collect()
    }

    /// Position of a node in the plan.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Group nodes into phases: each phase only depends on earlier phases, so
    /// nodes of one phase may run side by side.
    pub fn phases(&self) -> Vec<Vec<&NodeDefinition>> {
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut phases: Vec<Vec<&NodeDefinition>> = Vec::new();

        for node in self.nodes() {
            let level = node
                .dependencies
                .iter()
                .filter_map(|d| depth.get(d.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node.name.as_str(), level);
            if phases.len() <= level {
                phases.resize_with(level + 1, Vec::new);
            }
            phases[level].push(node);
        }

        phases
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Validate a flow against a registry and produce its execution plan.
///
/// Checks, in order: non-empty, unique names, known dependencies, no cycles
/// (depth-first search with an on-stack marker), and that every node's
/// implementation is registered.
pub fn validate(
    flow: &FlowDefinition,
    registry: &NodeRegistry,
) -> Result<ExecutionPlan, DefinitionError> {
    if flow.nodes.is_empty() {
        return Err(DefinitionError::EmptyFlow {
            flow: flow.name.clone(),
        });
    }

    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, node) in flow.nodes.iter().enumerate() {
        if index.insert(node.name.as_str(), i).is_some() {
            return Err(DefinitionError::DuplicateNode {
                flow: flow.name.clone(),
                node: node.name.clone(),
            });
        }
    }

    for node in &flow.nodes {
        for dep in &node.dependencies {
            if !index.contains_key(dep.as_str()) {
                return Err(DefinitionError::UnknownDependency {
                    flow: flow.name.clone(),
                    node: node.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let order = topological_order(flow, &index)?;

    for node in &flow.nodes {
        if registry.get(&node.implementation).is_none() {
            return Err(DefinitionError::NodeImplementNotFound {
                flow: flow.name.clone(),
                node: node.name.clone(),
                implementation: node.implementation.clone(),
            });
        }
    }

    let positions = order
        .iter()
        .enumerate()
        .map(|(pos, &i)| (flow.nodes[i].name.clone(), pos))
        .collect();

    debug!(flow = %flow.name, nodes = order.len(), "Flow validated");

    Ok(ExecutionPlan {
        flow: Arc::new(flow.clone()),
        order,
        positions,
    })
}

/// Post-order DFS over dependency edges. Fails on the first back-edge.
fn topological_order(
    flow: &FlowDefinition,
    index: &HashMap<&str, usize>,
) -> Result<Vec<usize>, DefinitionError> {
    let mut marks = vec![Mark::Unvisited; flow.nodes.len()];
    let mut order = Vec::with_capacity(flow.nodes.len());

    for start in 0..flow.nodes.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }

        // (node, next dependency to look at)
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        marks[start] = Mark::OnStack;

        while let Some(top) = stack.last_mut() {
            let (current, next_dep) = *top;
            let deps = &flow.nodes[current].dependencies;
            if next_dep < deps.len() {
                top.1 += 1;
                let dep = index[deps[next_dep].as_str()];
                match marks[dep] {
                    Mark::Unvisited => {
                        marks[dep] = Mark::OnStack;
                        stack.push((dep, 0));
                    }
                    Mark::OnStack => {
                        return Err(DefinitionError::CyclicDependency {
                            flow: flow.name.clone(),
                            node: flow.nodes[dep].name.clone(),
                        });
                    }
                    Mark::Done => {}
                }
            } else {
                marks[current] = Mark::Done;
                order.push(current);
                stack.pop();
            }
        }
    }

    Ok(order)
}

/// Names of every node downstream of `name` (not including `name` itself).
pub fn dependents_of<'a>(plan: &'a ExecutionPlan, name: &str) -> HashSet<&'a str> {
    let mut reached: HashSet<&str> = HashSet::new();
    for node in plan.nodes() {
        if node
            .dependencies
            .iter()
            .any(|d| d == name || reached.contains(d.as_str()))
        {
            reached.insert(node.name.as_str());
        }
    }
    reached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::NodeDefinition;

    fn flow(nodes: Vec<NodeDefinition>) -> FlowDefinition {
        FlowDefinition::new("test", nodes)
    }

    #[test]
    fn phases_group_independent_nodes() {
        let registry = NodeRegistry::with_builtins();
        let plan = validate(
            &flow(vec![
                NodeDefinition::new("a", "log"),
                NodeDefinition::new("b", "log"),
                NodeDefinition::new("c", "log").depends_on(&["a", "b"]),
            ]),
            &registry,
        )
        .unwrap();

        let phases = plan.phases();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].len(), 2);
        assert_eq!(phases[1][0].name, "c");
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let registry = NodeRegistry::with_builtins();
        let err = validate(
            &flow(vec![NodeDefinition::new("a", "log").depends_on(&["a"])]),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::CyclicDependency { .. }));
    }

    #[test]
    fn dependents_are_transitive() {
        let registry = NodeRegistry::with_builtins();
        let plan = validate(
            &flow(vec![
                NodeDefinition::new("a", "log"),
                NodeDefinition::new("b", "log").depends_on(&["a"]),
                NodeDefinition::new("c", "log").depends_on(&["b"]),
                NodeDefinition::new("d", "log"),
            ]),
            &registry,
        )
        .unwrap();

        let downstream = dependents_of(&plan, "a");
        assert!(downstream.contains("b"));
        assert!(downstream.contains("c"));
        assert!(!downstream.contains("d"));
    }
}
