//! A directed graph library with the dominance computations the
//! decompiler needs.
//!
//! Vertices are keyed by a caller-chosen `usize` index. The graph computes
//! depth-first post-orders, dominators, immediate dominators and dominance
//! frontiers, and the post-dominator variants of each over multi-exit
//! graphs (a virtual exit is implied; no vertex is synthesized).

use error::*;
use std::collections::{BTreeMap, BTreeSet};

/// A vertex in a `Graph`.
pub trait Vertex: Clone + Sync {
    /// The index of this vertex. Must be unique within the graph.
    fn index(&self) -> usize;
    /// A label for this vertex in graphviz output.
    fn dot_label(&self) -> String;
}

/// A directed edge in a `Graph`, from `head` to `tail`.
pub trait Edge: Clone + Sync {
    /// The index of the vertex this edge originates from.
    fn head(&self) -> usize;
    /// The index of the vertex this edge terminates at.
    fn tail(&self) -> usize;
    /// A label for this edge in graphviz output.
    fn dot_label(&self) -> String;
}


/// A directed graph.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Graph<V, E> {
    head: Option<usize>,
    vertices: BTreeMap<usize, V>,
    edges: BTreeMap<(usize, usize), E>,
    edges_out: BTreeMap<usize, Vec<(usize, usize)>>,
    edges_in: BTreeMap<usize, Vec<(usize, usize)>>
}

impl<V, E> Graph<V, E> where V: Vertex, E: Edge {
    pub fn new() -> Graph<V, E> {
        Graph {
            head: None,
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
            edges_out: BTreeMap::new(),
            edges_in: BTreeMap::new()
        }
    }

    /// Set the head, or entry, of the graph.
    pub fn set_head(&mut self, index: usize) -> Result<()> {
        if !self.vertices.contains_key(&index) {
            bail!("cannot set head: vertex {} does not exist", index);
        }
        self.head = Some(index);
        Ok(())
    }

    /// The head, or entry, of the graph.
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn has_vertex(&self, index: usize) -> bool {
        self.vertices.contains_key(&index)
    }

    /// Insert a vertex. Errors if a vertex with the same index exists.
    pub fn insert_vertex(&mut self, vertex: V) -> Result<()> {
        let index = vertex.index();
        if self.vertices.contains_key(&index) {
            bail!("vertex {} already exists", index);
        }
        self.vertices.insert(index, vertex);
        self.edges_out.insert(index, Vec::new());
        self.edges_in.insert(index, Vec::new());
        Ok(())
    }

    /// Insert an edge. Errors if either endpoint is missing, or if an edge
    /// between the same vertices already exists.
    pub fn insert_edge(&mut self, edge: E) -> Result<()> {
        let head = edge.head();
        let tail = edge.tail();
        if !self.vertices.contains_key(&head) {
            bail!("head vertex {} does not exist", head);
        }
        if !self.vertices.contains_key(&tail) {
            bail!("tail vertex {} does not exist", tail);
        }
        if self.edges.contains_key(&(head, tail)) {
            bail!("edge ({}, {}) already exists", head, tail);
        }
        self.edges.insert((head, tail), edge);
        self.edges_out.get_mut(&head).unwrap().push((head, tail));
        self.edges_in.get_mut(&tail).unwrap().push((head, tail));
        Ok(())
    }

    /// Remove a vertex and every edge incident to it.
    pub fn remove_vertex(&mut self, index: usize) -> Result<V> {
        let vertex = match self.vertices.remove(&index) {
            Some(vertex) => vertex,
            None => bail!("vertex {} does not exist", index)
        };
        let incident: Vec<(usize, usize)> =
            self.edges.keys()
                .filter(|&&(head, tail)| head == index || tail == index)
                .cloned()
                .collect();
        for key in incident {
            self.remove_edge(key.0, key.1)?;
        }
        self.edges_out.remove(&index);
        self.edges_in.remove(&index);
        if self.head == Some(index) {
            self.head = None;
        }
        Ok(vertex)
    }

    /// Remove the edge from `head` to `tail`.
    pub fn remove_edge(&mut self, head: usize, tail: usize) -> Result<E> {
        let edge = match self.edges.remove(&(head, tail)) {
            Some(edge) => edge,
            None => bail!("edge ({}, {}) does not exist", head, tail)
        };
        if let Some(out) = self.edges_out.get_mut(&head) {
            out.retain(|&key| key != (head, tail));
        }
        if let Some(in_) = self.edges_in.get_mut(&tail) {
            in_.retain(|&key| key != (head, tail));
        }
        Ok(edge)
    }

    pub fn vertex(&self, index: usize) -> Result<&V> {
        self.vertices.get(&index)
            .ok_or_else(|| format!("vertex {} does not exist", index).into())
    }

    pub fn vertex_mut(&mut self, index: usize) -> Result<&mut V> {
        self.vertices.get_mut(&index)
            .ok_or_else(|| format!("vertex {} does not exist", index).into())
    }

    pub fn vertices(&self) -> Vec<&V> {
        self.vertices.values().collect()
    }

    pub fn vertices_mut(&mut self) -> Vec<&mut V> {
        self.vertices.values_mut().collect()
    }

    /// The indices of every vertex, in ascending order.
    pub fn indices(&self) -> Vec<usize> {
        self.vertices.keys().cloned().collect()
    }

    pub fn has_edge(&self, head: usize, tail: usize) -> bool {
        self.edges.contains_key(&(head, tail))
    }

    pub fn edge(&self, head: usize, tail: usize) -> Result<&E> {
        self.edges.get(&(head, tail))
            .ok_or_else(|| format!("edge ({}, {}) does not exist", head, tail).into())
    }

    pub fn edge_mut(&mut self, head: usize, tail: usize) -> Result<&mut E> {
        self.edges.get_mut(&(head, tail))
            .ok_or_else(|| format!("edge ({}, {}) does not exist", head, tail).into())
    }

    pub fn edges(&self) -> Vec<&E> {
        self.edges.values().collect()
    }

    /// Every edge originating at the given vertex.
    pub fn edges_out(&self, index: usize) -> Result<Vec<&E>> {
        match self.edges_out.get(&index) {
            Some(keys) => Ok(keys.iter().map(|key| &self.edges[key]).collect()),
            None => bail!("vertex {} does not exist", index)
        }
    }

    /// Every edge terminating at the given vertex.
    pub fn edges_in(&self, index: usize) -> Result<Vec<&E>> {
        match self.edges_in.get(&index) {
            Some(keys) => Ok(keys.iter().map(|key| &self.edges[key]).collect()),
            None => bail!("vertex {} does not exist", index)
        }
    }

    /// The indices of every successor of the given vertex, in ascending
    /// order.
    pub fn successor_indices(&self, index: usize) -> Result<Vec<usize>> {
        match self.edges_out.get(&index) {
            Some(keys) => {
                let mut successors: Vec<usize> =
                    keys.iter().map(|&(_, tail)| tail).collect();
                successors.sort();
                Ok(successors)
            },
            None => bail!("vertex {} does not exist", index)
        }
    }

    /// The indices of every predecessor of the given vertex, in ascending
    /// order.
    pub fn predecessor_indices(&self, index: usize) -> Result<Vec<usize>> {
        match self.edges_in.get(&index) {
            Some(keys) => {
                let mut predecessors: Vec<usize> =
                    keys.iter().map(|&(head, _)| head).collect();
                predecessors.sort();
                Ok(predecessors)
            },
            None => bail!("vertex {} does not exist", index)
        }
    }

    fn neighbors(&self, index: usize, backward: bool) -> Result<Vec<usize>> {
        if backward {
            self.predecessor_indices(index)
        }
        else {
            self.successor_indices(index)
        }
    }

    /// Depth-first post-order over the vertices reachable from `root`.
    pub fn compute_post_order(&self, root: usize) -> Result<Vec<usize>> {
        self.post_order_from(&[root], false)
    }

    fn post_order_from(&self, roots: &[usize], backward: bool)
        -> Result<Vec<usize>> {

        let mut visited: BTreeSet<usize> = BTreeSet::new();
        let mut order: Vec<usize> = Vec::new();
        // (vertex, next-neighbor cursor)
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for &root in roots {
            if !self.vertices.contains_key(&root) {
                bail!("vertex {} does not exist", root);
            }
            if visited.contains(&root) {
                continue;
            }
            visited.insert(root);
            stack.push((root, 0));
            while let Some((vertex, cursor)) = stack.pop() {
                let neighbors = self.neighbors(vertex, backward)?;
                if cursor < neighbors.len() {
                    stack.push((vertex, cursor + 1));
                    let next = neighbors[cursor];
                    if !visited.contains(&next) {
                        visited.insert(next);
                        stack.push((next, 0));
                    }
                }
                else {
                    order.push(vertex);
                }
            }
        }
        Ok(order)
    }

    /// Compute the set of dominators for each vertex reachable from
    /// `root`.
    pub fn compute_dominators(&self, root: usize)
        -> Result<BTreeMap<usize, BTreeSet<usize>>> {

        self.dominators_from(&[root], false)
    }

    /// Compute the set of post-dominators for each vertex that reaches one
    /// of the given exits. Multiple exits behave as if joined by a virtual
    /// exit vertex.
    pub fn compute_post_dominators(&self, exits: &[usize])
        -> Result<BTreeMap<usize, BTreeSet<usize>>> {

        self.dominators_from(exits, true)
    }

    fn dominators_from(&self, roots: &[usize], backward: bool)
        -> Result<BTreeMap<usize, BTreeSet<usize>>> {

        let order = self.post_order_from(roots, backward)?;
        let reachable: BTreeSet<usize> = order.iter().cloned().collect();
        let root_set: BTreeSet<usize> = roots.iter().cloned().collect();

        let mut dominators: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for &vertex in &order {
            if root_set.contains(&vertex) {
                let mut set = BTreeSet::new();
                set.insert(vertex);
                dominators.insert(vertex, set);
            }
            else {
                dominators.insert(vertex, reachable.clone());
            }
        }

        // Iterate to a fixed point, visiting vertices in reverse
        // post-order for fast convergence.
        let mut changed = true;
        while changed {
            changed = false;
            for &vertex in order.iter().rev() {
                if root_set.contains(&vertex) {
                    continue;
                }
                let mut meet: Option<BTreeSet<usize>> = None;
                for predecessor in self.neighbors(vertex, !backward)? {
                    if !reachable.contains(&predecessor) {
                        continue;
                    }
                    let pred_doms = &dominators[&predecessor];
                    meet = Some(match meet {
                        Some(meet) =>
                            meet.intersection(pred_doms).cloned().collect(),
                        None => pred_doms.clone()
                    });
                }
                let mut new = meet.unwrap_or_else(BTreeSet::new);
                new.insert(vertex);
                if new != dominators[&vertex] {
                    dominators.insert(vertex, new);
                    changed = true;
                }
            }
        }
        Ok(dominators)
    }

    /// Compute the immediate dominator of each vertex reachable from
    /// `root`. The root itself has no immediate dominator and is absent
    /// from the result.
    pub fn compute_immediate_dominators(&self, root: usize)
        -> Result<BTreeMap<usize, usize>> {

        let dominators = self.compute_dominators(root)?;
        Ok(immediate_from_sets(&dominators))
    }

    /// Compute the immediate post-dominator of each vertex. Vertices whose
    /// only post-dominator is themselves (the exits, and vertices exiting
    /// through multiple exits) are absent from the result.
    pub fn compute_immediate_post_dominators(&self, exits: &[usize])
        -> Result<BTreeMap<usize, usize>> {

        let dominators = self.compute_post_dominators(exits)?;
        Ok(immediate_from_sets(&dominators))
    }

    /// Compute the dominance frontier of every vertex reachable from
    /// `root`.
    pub fn compute_dominance_frontiers(&self, root: usize)
        -> Result<BTreeMap<usize, BTreeSet<usize>>> {

        let idoms = self.compute_immediate_dominators(root)?;
        let order = self.post_order_from(&[root], false)?;
        let reachable: BTreeSet<usize> = order.iter().cloned().collect();

        let mut frontiers: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for &vertex in &order {
            frontiers.insert(vertex, BTreeSet::new());
        }

        for &vertex in &order {
            let predecessors: Vec<usize> =
                self.predecessor_indices(vertex)?
                    .into_iter()
                    .filter(|predecessor| reachable.contains(predecessor))
                    .collect();
            if predecessors.len() < 2 {
                continue;
            }
            let idom = match idoms.get(&vertex) {
                Some(&idom) => idom,
                None => continue
            };
            for predecessor in predecessors {
                let mut runner = predecessor;
                while runner != idom {
                    frontiers.get_mut(&runner).unwrap().insert(vertex);
                    runner = match idoms.get(&runner) {
                        Some(&next) => next,
                        None => break
                    };
                }
            }
        }
        Ok(frontiers)
    }

    /// A graphviz rendering of this graph.
    pub fn dot_graph(&self) -> String {
        let mut dot = String::from("digraph g {\n");
        for vertex in self.vertices.values() {
            dot.push_str(&format!("  {} [label=\"{}\"];\n",
                                  vertex.index(),
                                  vertex.dot_label().replace("\"", "\\\"")));
        }
        for edge in self.edges.values() {
            dot.push_str(&format!("  {} -> {} [label=\"{}\"];\n",
                                  edge.head(),
                                  edge.tail(),
                                  edge.dot_label().replace("\"", "\\\"")));
        }
        dot.push_str("}\n");
        dot
    }
}


fn immediate_from_sets(dominators: &BTreeMap<usize, BTreeSet<usize>>)
    -> BTreeMap<usize, usize> {

    let mut immediate: BTreeMap<usize, usize> = BTreeMap::new();
    for (&vertex, doms) in dominators {
        let strict: Vec<usize> =
            doms.iter().cloned().filter(|&d| d != vertex).collect();
        // The immediate dominator is the strict dominator that is itself
        // dominated by every other strict dominator.
        for &candidate in &strict {
            if dominators[&candidate].len() == strict.len() {
                immediate.insert(vertex, candidate);
                break;
            }
        }
    }
    immediate
}


#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct TestVertex(usize);

    impl Vertex for TestVertex {
        fn index(&self) -> usize { self.0 }
        fn dot_label(&self) -> String { format!("{}", self.0) }
    }

    #[derive(Clone, Debug)]
    struct TestEdge(usize, usize);

    impl Edge for TestEdge {
        fn head(&self) -> usize { self.0 }
        fn tail(&self) -> usize { self.1 }
        fn dot_label(&self) -> String { format!("{}->{}", self.0, self.1) }
    }

    /// 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3, 3 -> 4  (a diamond with a tail)
    fn diamond() -> Graph<TestVertex, TestEdge> {
        let mut graph = Graph::new();
        for i in 0..5 {
            graph.insert_vertex(TestVertex(i)).unwrap();
        }
        graph.insert_edge(TestEdge(0, 1)).unwrap();
        graph.insert_edge(TestEdge(0, 2)).unwrap();
        graph.insert_edge(TestEdge(1, 3)).unwrap();
        graph.insert_edge(TestEdge(2, 3)).unwrap();
        graph.insert_edge(TestEdge(3, 4)).unwrap();
        graph
    }

    #[test]
    fn insert_duplicate_vertex_errors() {
        let mut graph = diamond();
        assert!(graph.insert_vertex(TestVertex(0)).is_err());
        assert!(graph.insert_edge(TestEdge(0, 1)).is_err());
        assert!(graph.insert_edge(TestEdge(0, 99)).is_err());
    }

    #[test]
    fn remove_vertex_removes_incident_edges() {
        let mut graph = diamond();
        graph.remove_vertex(3).unwrap();
        assert!(!graph.has_edge(1, 3));
        assert!(!graph.has_edge(3, 4));
        assert!(graph.has_edge(0, 1));
    }

    #[test]
    fn post_order_ends_with_root() {
        let graph = diamond();
        let order = graph.compute_post_order(0).unwrap();
        assert_eq!(order.len(), 5);
        assert_eq!(*order.last().unwrap(), 0);
        // 4 finishes before 3, which finishes before 1 and 2.
        let position = |v: usize| order.iter().position(|&o| o == v).unwrap();
        assert!(position(4) < position(3));
        assert!(position(3) < position(1));
        assert!(position(3) < position(2));
    }

    #[test]
    fn dominators_of_a_diamond() {
        let graph = diamond();
        let dominators = graph.compute_dominators(0).unwrap();
        let doms3: Vec<usize> = dominators[&3].iter().cloned().collect();
        assert_eq!(doms3, vec![0, 3]);
        let doms4: Vec<usize> = dominators[&4].iter().cloned().collect();
        assert_eq!(doms4, vec![0, 3, 4]);
    }

    #[test]
    fn immediate_dominators_of_a_diamond() {
        let graph = diamond();
        let idoms = graph.compute_immediate_dominators(0).unwrap();
        assert_eq!(idoms.get(&0), None);
        assert_eq!(idoms[&1], 0);
        assert_eq!(idoms[&2], 0);
        assert_eq!(idoms[&3], 0);
        assert_eq!(idoms[&4], 3);
    }

    #[test]
    fn dominance_frontier_of_a_diamond() {
        let graph = diamond();
        let frontiers = graph.compute_dominance_frontiers(0).unwrap();
        let df1: Vec<usize> = frontiers[&1].iter().cloned().collect();
        let df2: Vec<usize> = frontiers[&2].iter().cloned().collect();
        assert_eq!(df1, vec![3]);
        assert_eq!(df2, vec![3]);
        assert!(frontiers[&0].is_empty());
        assert!(frontiers[&3].is_empty());
    }

    #[test]
    fn dominance_frontier_of_a_loop() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3: the loop head 1 is in its own
        // frontier.
        let mut graph: Graph<TestVertex, TestEdge> = Graph::new();
        for i in 0..4 {
            graph.insert_vertex(TestVertex(i)).unwrap();
        }
        graph.insert_edge(TestEdge(0, 1)).unwrap();
        graph.insert_edge(TestEdge(1, 2)).unwrap();
        graph.insert_edge(TestEdge(2, 1)).unwrap();
        graph.insert_edge(TestEdge(2, 3)).unwrap();

        let frontiers = graph.compute_dominance_frontiers(0).unwrap();
        assert!(frontiers[&1].contains(&1));
        assert!(frontiers[&2].contains(&1));
    }

    #[test]
    fn post_dominators_with_multiple_exits() {
        // 0 -> 1 -> 2 (exit), 1 -> 3 (exit)
        let mut graph: Graph<TestVertex, TestEdge> = Graph::new();
        for i in 0..4 {
            graph.insert_vertex(TestVertex(i)).unwrap();
        }
        graph.insert_edge(TestEdge(0, 1)).unwrap();
        graph.insert_edge(TestEdge(1, 2)).unwrap();
        graph.insert_edge(TestEdge(1, 3)).unwrap();

        let pdoms = graph.compute_post_dominators(&[2, 3]).unwrap();
        let pdom0: Vec<usize> = pdoms[&0].iter().cloned().collect();
        assert_eq!(pdom0, vec![0, 1]);

        let ipdoms = graph.compute_immediate_post_dominators(&[2, 3]).unwrap();
        assert_eq!(ipdoms[&0], 1);
        // 1 exits two ways; it has no immediate post-dominator.
        assert_eq!(ipdoms.get(&1), None);
    }
}
