//! Dependency graph (DAG) over a stack's declarations
//!
//! Edges run from a producer to every declaration that references it
//! (`Ref`, `Fn::GetAtt`, or an explicit `DependsOn`). Building the graph
//! validates that every reference resolves inside the stack; sorting it
//! detects cycles.

use crate::error::{Error, Result};
use crate::stack::Stack;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Validated dependency graph of a stack
#[derive(Debug, Clone)]
pub struct DependencyGraph<'a> {
    /// Logical ids in declaration order
    nodes: Vec<&'a str>,
    /// producer index -> consumer indices
    dependents: HashMap<usize, Vec<usize>>,
    /// consumer index -> producer indices
    dependencies: HashMap<usize, Vec<usize>>,
}

impl<'a> DependencyGraph<'a> {
    /// Build the graph, rejecting dangling references and unknown mappings
    pub fn from_stack(stack: &'a Stack) -> Result<Self> {
        let nodes: Vec<&str> = stack.resources().iter().map(|r| r.logical_id()).collect();
        let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut dependencies: HashMap<usize, Vec<usize>> = HashMap::new();

        for (consumer, resource) in stack.resources().iter().enumerate() {
            for target in resource.references() {
                let producer = stack.position(target).ok_or_else(|| Error::DanglingReference {
                    from: resource.logical_id().to_string(),
                    to: target.to_string(),
                })?;
                dependents.entry(producer).or_default().push(consumer);
                dependencies.entry(consumer).or_default().push(producer);
            }
            for mapping in resource.mappings() {
                if !stack.mappings().contains_key(mapping) {
                    return Err(Error::UnknownMapping {
                        from: resource.logical_id().to_string(),
                        mapping: mapping.to_string(),
                    });
                }
            }
        }

        for output in stack.outputs() {
            for target in output.value.references() {
                if !stack.contains(target) {
                    return Err(Error::DanglingReference {
                        from: output.logical_id.clone(),
                        to: target.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            nodes,
            dependents,
            dependencies,
        })
    }

    /// Logical ids in emission order: producers before consumers
    ///
    /// Kahn's algorithm; among the declarations that are ready, the one
    /// declared first goes first, so an already well-ordered stack keeps its
    /// declaration order.
    pub fn topological_order(&self) -> Result<Vec<&'a str>> {
        let mut in_degree: Vec<usize> = (0..self.nodes.len())
            .map(|i| self.dependencies.get(&i).map_or(0, Vec::len))
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.nodes[node]);
            if let Some(consumers) = self.dependents.get(&node) {
                for &consumer in consumers {
                    in_degree[consumer] -= 1;
                    if in_degree[consumer] == 0 {
                        ready.push(Reverse(consumer));
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let ids = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, &d)| d > 0)
                .map(|(i, _)| self.nodes[i].to_string())
                .collect();
            return Err(Error::Cycle { ids });
        }

        Ok(order)
    }

    /// Declarations that `logical_id` depends on
    pub fn dependencies_of(&self, logical_id: &str) -> Vec<&'a str> {
        self.lookup(&self.dependencies, logical_id)
    }

    /// Declarations that depend on `logical_id`
    pub fn dependents_of(&self, logical_id: &str) -> Vec<&'a str> {
        self.lookup(&self.dependents, logical_id)
    }

    /// All `(producer, consumer)` edges, grouped by consumer in declaration order
    pub fn edges(&self) -> Vec<(&'a str, &'a str)> {
        let mut out = Vec::new();
        for (consumer, id) in self.nodes.iter().enumerate() {
            if let Some(producers) = self.dependencies.get(&consumer) {
                for &producer in producers {
                    out.push((self.nodes[producer], *id));
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn lookup(&self, edges: &HashMap<usize, Vec<usize>>, logical_id: &str) -> Vec<&'a str> {
        self.nodes
            .iter()
            .position(|n| *n == logical_id)
            .and_then(|i| edges.get(&i))
            .map(|targets| targets.iter().map(|&t| self.nodes[t]).collect())
            .unwrap_or_default()
    }
}
