//! Resource graph builder
//!
//! Turns an ordered set of declarations into a DAG. Edges come from
//! references found in attribute values and from explicit `depends_on`
//! lists. Building is a pure transformation: nothing is read or written.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::error::GraphError;
use crate::resource::{Declaration, ResourceNode};

/// A directed edge: `from` depends on `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// A dependency naming a resource that is not declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingDependency {
    pub from: String,
    pub target: String,
}

/// Acyclic graph of declared resources
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
    /// Per node, indices of the nodes it depends on (ascending)
    dependencies: Vec<Vec<usize>>,
    /// Per node, indices of the nodes depending on it (ascending)
    dependents: Vec<Vec<usize>>,
    dangling: Vec<DanglingDependency>,
}

impl ResourceGraph {
    /// Build a graph from declarations, rejecting duplicates and cycles
    pub fn build(declarations: impl IntoIterator<Item = Declaration>) -> Result<Self, GraphError> {
        let mut nodes = Vec::new();
        let mut index = HashMap::new();

        for decl in declarations {
            if index.contains_key(&decl.name) {
                return Err(GraphError::DuplicateResource { name: decl.name });
            }
            let position = nodes.len();
            index.insert(decl.name.clone(), position);
            nodes.push(ResourceNode::from_declaration(decl, position));
        }

        let mut dependencies = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];
        let mut dangling = Vec::new();

        for node in &nodes {
            for target in node.dependency_ids() {
                match index.get(target) {
                    Some(&to) => {
                        dependencies[node.index].push(to);
                        dependents[to].push(node.index);
                    }
                    None => dangling.push(DanglingDependency {
                        from: node.id.clone(),
                        target: target.to_string(),
                    }),
                }
            }
        }
        for list in dependencies.iter_mut().chain(dependents.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let graph = Self {
            nodes,
            index,
            dependencies,
            dependents,
            dangling,
        };
        graph.check_acyclic()?;

        log::debug!(
            "Built resource graph: {} nodes, {} edges",
            graph.len(),
            graph.edges().len()
        );
        Ok(graph)
    }

    /// Depth-first search with a recursion stack; a back edge is a cycle
    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut path: Vec<usize> = Vec::new();

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // (node, next dependency to visit)
            let mut stack = vec![(root, 0usize)];
            marks[root] = Mark::OnStack;
            path.push(root);

            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                top.1 += 1;
                if let Some(&dep) = self.dependencies[node].get(next) {
                    match marks[dep] {
                        Mark::Unvisited => {
                            marks[dep] = Mark::OnStack;
                            path.push(dep);
                            stack.push((dep, 0));
                        }
                        Mark::OnStack => {
                            let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                            let mut nodes: Vec<String> = path[start..]
                                .iter()
                                .map(|&n| self.nodes[n].id.clone())
                                .collect();
                            nodes.push(self.nodes[dep].id.clone());
                            return Err(GraphError::Cycle { nodes });
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    path.pop();
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of the nodes `id` depends on, in declaration order
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, &self.dependencies)
    }

    /// Ids of the nodes depending on `id`, in declaration order
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, &self.dependents)
    }

    fn neighbours<'a>(&'a self, id: &str, table: &'a [Vec<usize>]) -> Vec<&'a str> {
        self.index
            .get(id)
            .map(|&i| table[i].iter().map(|&n| self.nodes[n].id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Every edge in the graph
    pub fn edges(&self) -> BTreeSet<Edge> {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(from, deps)| {
                deps.iter().map(move |&to| Edge {
                    from: self.nodes[from].id.clone(),
                    to: self.nodes[to].id.clone(),
                })
            })
            .collect()
    }

    /// Dependencies on undeclared resources, found while building
    pub fn dangling(&self) -> &[DanglingDependency] {
        &self.dangling
    }

    /// Topological order via Kahn's algorithm, ties broken by declaration order
    pub fn topological_order(&self) -> Vec<&ResourceNode> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(next) = ready.pop_first() {
            order.push(&self.nodes[next]);
            for &dependent in &self.dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Reference, Value};

    fn chain() -> Vec<Declaration> {
        vec![
            Declaration::new("a", "test"),
            Declaration::new("b", "test").with("parent", Reference::new("a", "id")),
            Declaration::new("c", "test").with("parent", Reference::new("b", "id")),
        ]
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge {
            from: from.into(),
            to: to.into(),
        }
    }

    #[test]
    fn test_edges_union_references_and_explicit() {
        let graph = ResourceGraph::build(vec![
            Declaration::new("vpc", "net"),
            Declaration::new("sg", "net").with("vpc_id", Reference::new("vpc", "id")),
            Declaration::new("group", "db"),
            Declaration::new("db", "db")
                .with("sg", Value::List(vec![Reference::new("sg", "id").into()]))
                .depends_on("group"),
        ])
        .unwrap();

        let expected: BTreeSet<Edge> = [edge("sg", "vpc"), edge("db", "sg"), edge("db", "group")]
            .into_iter()
            .collect();
        assert_eq!(graph.edges(), expected);
    }

    #[test]
    fn test_topological_order_chain() {
        let graph = ResourceGraph::build(chain().into_iter().rev()).unwrap();
        let order: Vec<_> = graph.topological_order().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_topological_tie_break_is_declaration_order() {
        let graph = ResourceGraph::build(vec![
            Declaration::new("z", "t"),
            Declaration::new("y", "t"),
            Declaration::new("x", "t"),
        ])
        .unwrap();
        let order: Vec<_> = graph.topological_order().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["z", "y", "x"]);
    }

    #[test]
    fn test_two_node_cycle() {
        let err = ResourceGraph::build(vec![
            Declaration::new("A", "t").with("x", Reference::new("B", "id")),
            Declaration::new("B", "t").with("x", Reference::new("A", "id")),
        ])
        .unwrap_err();

        match err {
            GraphError::Cycle { nodes } => {
                let members: BTreeSet<_> = nodes.iter().map(String::as_str).collect();
                assert_eq!(members, ["A", "B"].into_iter().collect());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let err = ResourceGraph::build(vec![Declaration::new("a", "t").depends_on("a")]).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                nodes: vec!["a".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_duplicate_name() {
        let err = ResourceGraph::build(vec![Declaration::new("a", "t"), Declaration::new("a", "t")])
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateResource { name: "a".into() });
    }

    #[test]
    fn test_dangling_is_recorded_not_linked() {
        let graph =
            ResourceGraph::build(vec![Declaration::new("a", "t").with("x", Reference::new("ghost", "id"))])
                .unwrap();
        assert!(graph.edges().is_empty());
        assert_eq!(
            graph.dangling(),
            &[DanglingDependency {
                from: "a".into(),
                target: "ghost".into()
            }]
        );
    }

    #[test]
    fn test_neighbours() {
        let graph = ResourceGraph::build(chain()).unwrap();
        assert_eq!(graph.dependencies_of("b"), vec!["a"]);
        assert_eq!(graph.dependents_of("b"), vec!["c"]);
        assert!(graph.dependents_of("missing").is_empty());
    }
}
