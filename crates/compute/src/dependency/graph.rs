use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tabla_core::{Field, FieldId, FieldType, TableId};

use super::extract::extract_dependencies;

/// One computed field and its edges inside a [`DependencyGraph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDependency {
    pub field_id: FieldId,
    pub field_type: FieldType,
    /// Fields this one reads. May name fields outside the graph.
    pub dependencies: IndexSet<FieldId>,
    /// Graph members that read this field.
    pub dependents: IndexSet<FieldId>,
    /// Tie-break rank used only when no topological order exists.
    pub type_priority: u8,
}

/// Dependency graph over a requested set of fields of one table.
///
/// `fields` keeps request order, which makes every derived order
/// deterministic. Edges to fields outside the graph are kept in
/// `dependencies` but ignored for ordering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyGraph {
    pub table_id: TableId,
    pub fields: IndexMap<FieldId, FieldDependency>,
    /// Kahn order. Partial when the graph has a cycle.
    pub topological_order: Vec<FieldId>,
    /// Back edges found by depth-first search, as `[from, to]` pairs
    /// where `from` reads `to`.
    pub cycles: Vec<Vec<FieldId>>,
    /// True iff `topological_order` covers every field.
    pub is_valid: bool,
    /// Order to evaluate fields in. Equals `topological_order` when valid,
    /// otherwise request order stable-sorted by type priority.
    pub calculation_order: Vec<FieldId>,
}

impl DependencyGraph {
    /// Build the graph for `requested` out of a table's `fields`.
    ///
    /// Requested ids with no matching field are skipped with a warning.
    /// Duplicate requests collapse to the first occurrence.
    pub fn build(table_id: &str, fields: &[Field], requested: &[FieldId]) -> Self {
        let by_id: HashMap<&str, &Field> = fields.iter().map(|f| (f.id.as_str(), f)).collect();

        let mut nodes: IndexMap<FieldId, FieldDependency> = IndexMap::with_capacity(requested.len());
        for id in requested {
            if nodes.contains_key(id) {
                continue;
            }
            let Some(field) = by_id.get(id.as_str()) else {
                warn!(table_id, field_id = %id, "requested field not found, skipping");
                continue;
            };
            let field_type = field.field_type();
            nodes.insert(
                id.clone(),
                FieldDependency {
                    field_id: id.clone(),
                    field_type,
                    dependencies: extract_dependencies(field).into_iter().collect(),
                    dependents: IndexSet::new(),
                    type_priority: field_type.type_priority(),
                },
            );
        }

        // Reverse edges, restricted to graph members
        let edges: Vec<(FieldId, FieldId)> = nodes
            .values()
            .flat_map(|node| {
                node.dependencies
                    .iter()
                    .filter(|dep| nodes.contains_key(dep.as_str()))
                    .map(|dep| (dep.clone(), node.field_id.clone()))
            })
            .collect();
        for (dependency, dependent) in edges {
            if let Some(node) = nodes.get_mut(&dependency) {
                node.dependents.insert(dependent);
            }
        }

        let mut graph = Self {
            table_id: table_id.to_string(),
            fields: nodes,
            topological_order: Vec::new(),
            cycles: Vec::new(),
            is_valid: true,
            calculation_order: Vec::new(),
        };

        graph.topological_order = graph.kahn_order();
        if graph.topological_order.len() == graph.fields.len() {
            graph.calculation_order = graph.topological_order.clone();
        } else {
            graph.is_valid = false;
            graph.cycles = graph.back_edges();
            graph.calculation_order = graph.fallback_order();
            warn!(
                table_id,
                cycles = ?graph.cycles,
                "dependency cycle detected, falling back to type priority order"
            );
        }

        debug!(
            table_id,
            fields = graph.fields.len(),
            valid = graph.is_valid,
            "dependency graph built"
        );
        graph
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field_id: &str) -> Option<&FieldDependency> {
        self.fields.get(field_id)
    }

    /// Dependencies of `field_id` that are members of this graph.
    pub fn in_graph_dependencies<'a>(&'a self, field_id: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields.get(field_id).into_iter().flat_map(move |node| {
            node.dependencies
                .iter()
                .map(String::as_str)
                .filter(move |dep| self.fields.contains_key(*dep))
        })
    }

    /// Kahn's algorithm, seeded and drained in request order.
    fn kahn_order(&self) -> Vec<FieldId> {
        let mut in_degree: IndexMap<&str, usize> = self
            .fields
            .keys()
            .map(|id| (id.as_str(), self.in_graph_dependencies(id).count()))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut sorted = Vec::with_capacity(self.fields.len());
        while let Some(id) = queue.pop_front() {
            sorted.push(id.to_string());
            let Some(node) = self.fields.get(id) else {
                continue;
            };
            for dependent in &node.dependents {
                if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }
        sorted
    }

    /// Back edges of a depth-first walk along dependency edges. A self
    /// reference is reported as `[f, f]`.
    ///
    /// The walk keeps its own frame stack, so chain length is bounded by
    /// memory rather than thread stack size.
    fn back_edges(&self) -> Vec<Vec<FieldId>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        let mut cycles = Vec::new();

        for root in self.fields.keys() {
            let root = root.as_str();
            if !visited.insert(root) {
                continue;
            }
            on_stack.insert(root);
            let mut frames = vec![(root, self.in_graph_dependencies(root))];

            while let Some((id, deps)) = frames.last_mut() {
                let id = *id;
                match deps.next() {
                    Some(dep) if visited.insert(dep) => {
                        on_stack.insert(dep);
                        frames.push((dep, self.in_graph_dependencies(dep)));
                    }
                    Some(dep) => {
                        if on_stack.contains(dep) {
                            cycles.push(vec![id.to_string(), dep.to_string()]);
                        }
                    }
                    None => {
                        on_stack.remove(id);
                        frames.pop();
                    }
                }
            }
        }
        cycles
    }

    /// Request order, stable-sorted by type priority.
    fn fallback_order(&self) -> Vec<FieldId> {
        let mut nodes: Vec<&FieldDependency> = self.fields.values().collect();
        nodes.sort_by_key(|node| node.type_priority);
        nodes.into_iter().map(|node| node.field_id.clone()).collect()
    }

    /// Every strongly connected component that forms a cycle, via Tarjan's
    /// algorithm.
    ///
    /// Unlike `cycles`, which holds one edge per cycle found, each entry
    /// here lists all fields of a cycle. Members are in request order and
    /// components are ordered by their first member.
    pub fn strongly_connected_cycles(&self) -> Vec<Vec<FieldId>> {
        let mut tarjan = Tarjan {
            graph: self,
            next_index: 0,
            index: HashMap::new(),
            lowlink: HashMap::new(),
            stack: Vec::new(),
            on_stack: HashSet::new(),
            components: Vec::new(),
        };
        for id in self.fields.keys() {
            if !tarjan.index.contains_key(id.as_str()) {
                tarjan.connect(id);
            }
        }

        let position = |id: &FieldId| self.fields.get_index_of(id.as_str()).unwrap_or(usize::MAX);
        let mut components = tarjan.components;
        for component in &mut components {
            component.sort_by_key(position);
        }
        components.sort_by_key(|component| component.first().map_or(usize::MAX, position));
        components
    }
}

struct Tarjan<'g> {
    graph: &'g DependencyGraph,
    next_index: usize,
    index: HashMap<&'g str, usize>,
    lowlink: HashMap<&'g str, usize>,
    stack: Vec<&'g str>,
    on_stack: HashSet<&'g str>,
    components: Vec<Vec<FieldId>>,
}

impl<'g> Tarjan<'g> {
    /// Depth-first walk from `root` on an explicit frame stack. Each frame
    /// holds a node, its remaining dependencies and whether it reads itself.
    fn connect(&mut self, root: &'g str) {
        let graph = self.graph;
        self.open(root);
        let mut frames = vec![(root, graph.in_graph_dependencies(root), false)];

        while let Some((id, deps, self_loop)) = frames.last_mut() {
            let id = *id;
            if let Some(dep) = deps.next() {
                if dep == id {
                    *self_loop = true;
                }
                if !self.index.contains_key(dep) {
                    self.open(dep);
                    frames.push((dep, graph.in_graph_dependencies(dep), false));
                } else if self.on_stack.contains(dep) {
                    let dep_index = self.index.get(dep).copied().unwrap_or(usize::MAX);
                    self.lower(id, dep_index);
                }
                continue;
            }

            let self_loop = *self_loop;
            frames.pop();
            if let Some((parent, _, _)) = frames.last() {
                let low = self.lowlink.get(id).copied().unwrap_or(usize::MAX);
                self.lower(*parent, low);
            }
            self.close(id, self_loop);
        }
    }

    fn open(&mut self, id: &'g str) {
        self.index.insert(id, self.next_index);
        self.lowlink.insert(id, self.next_index);
        self.next_index += 1;
        self.stack.push(id);
        self.on_stack.insert(id);
    }

    /// Pop the component rooted at `id`, if `id` is a root.
    fn close(&mut self, id: &'g str, self_loop: bool) {
        if self.lowlink.get(id) != self.index.get(id) {
            return;
        }

        let mut component = Vec::new();
        while let Some(member) = self.stack.pop() {
            self.on_stack.remove(member);
            component.push(member.to_string());
            if member == id {
                break;
            }
        }
        if component.len() > 1 || self_loop {
            self.components.push(component);
        }
    }

    fn lower(&mut self, id: &'g str, candidate: usize) {
        if let Some(low) = self.lowlink.get_mut(id) {
            *low = (*low).min(candidate);
        }
    }
}
