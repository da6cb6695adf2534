//! The control-flow graph of a procedure: fragments connected by typed
//! edges, with cached dominance structures.

use error::*;
use graph;
use il::*;
use std::collections::{BTreeMap, BTreeSet};
use RC;

/// The kind of a control-flow edge.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum EdgeKind {
    /// Fall-through to the next address.
    Fall,
    /// The taken side of a branch, or an unconditional jump.
    Taken,
    /// One arm of a recovered switch, with its case number.
    Case(usize),
    /// The return edge out of a call fragment.
    CallReturn
}

/// An edge between two fragments.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct FragmentEdge {
    head: usize,
    tail: usize,
    kind: EdgeKind
}

impl FragmentEdge {
    pub fn new(head: usize, tail: usize, kind: EdgeKind) -> FragmentEdge {
        FragmentEdge { head: head, tail: tail, kind: kind }
    }

    pub fn kind(&self) -> EdgeKind {
        self.kind
    }
}

impl graph::Edge for FragmentEdge {
    fn head(&self) -> usize {
        self.head
    }

    fn tail(&self) -> usize {
        self.tail
    }

    fn dot_label(&self) -> String {
        match self.kind {
            EdgeKind::Fall => "fall".to_string(),
            EdgeKind::Taken => "taken".to_string(),
            EdgeKind::Case(n) => format!("case {}", n),
            EdgeKind::CallReturn => "ret".to_string()
        }
    }
}


/// Cached dominance structures for a fragment graph.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Dominance {
    /// Immediate dominator of each fragment; the entry has none.
    pub idoms: BTreeMap<usize, usize>,
    /// Dominance frontier of each fragment.
    pub frontiers: BTreeMap<usize, BTreeSet<usize>>,
    /// Children in the dominator tree.
    pub children: BTreeMap<usize, Vec<usize>>,
    /// Fragments in reverse post-order from the entry.
    pub reverse_post_order: Vec<usize>
}

/// Cached post-dominance structures for a fragment graph.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PostDominance {
    /// Immediate post-dominator of each fragment. Fragments that exit
    /// more than one way have none.
    pub ipdoms: BTreeMap<usize, usize>
}


/// The control-flow graph of one procedure.
///
/// There is exactly one entry fragment. The exit is the unique return
/// fragment; a procedure with several returns has no single exit, and
/// post-dominance treats the returns as joined by a virtual exit.
///
/// Dominance caches are invalidated on any structural mutation. Passes
/// that mutate the graph must recompute the caches before handing control
/// back; the pass manager enforces this.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FragmentGraph {
    graph: graph::Graph<Fragment, FragmentEdge>,
    entry: Option<usize>,
    next_index: usize,
    dominance: Option<RC<Dominance>>,
    post_dominance: Option<RC<PostDominance>>
}

impl FragmentGraph {
    pub fn new() -> FragmentGraph {
        FragmentGraph {
            graph: graph::Graph::new(),
            entry: None,
            next_index: 0,
            dominance: None,
            post_dominance: None
        }
    }

    /// Create an empty fragment and return its index.
    pub fn create_fragment(&mut self, kind: FragmentKind) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.graph.insert_vertex(Fragment::new(index, kind))
            .expect("fragment indices are unique by construction");
        self.invalidate();
        index
    }

    pub fn fragment(&self, index: usize) -> Result<&Fragment> {
        self.graph.vertex(index)
    }

    pub fn fragment_mut(&mut self, index: usize) -> Result<&mut Fragment> {
        self.graph.vertex_mut(index)
    }

    pub fn fragments(&self) -> Vec<&Fragment> {
        self.graph.vertices()
    }

    pub fn fragments_mut(&mut self) -> Vec<&mut Fragment> {
        self.graph.vertices_mut()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.graph.indices()
    }

    pub fn num_fragments(&self) -> usize {
        self.graph.num_vertices()
    }

    pub fn set_entry(&mut self, index: usize) -> Result<()> {
        self.graph.set_head(index)?;
        self.entry = Some(index);
        self.invalidate();
        Ok(())
    }

    /// The unique entry fragment.
    pub fn entry(&self) -> Option<usize> {
        self.entry
    }

    /// The indices of every return fragment.
    pub fn ret_fragments(&self) -> Vec<usize> {
        self.graph.vertices()
            .into_iter()
            .filter(|fragment| fragment.kind() == FragmentKind::Ret)
            .map(|fragment| fragment.index())
            .collect()
    }

    /// The unique exit fragment, when the procedure returns exactly one
    /// way.
    pub fn exit(&self) -> Option<usize> {
        let rets = self.ret_fragments();
        if rets.len() == 1 {
            Some(rets[0])
        }
        else {
            None
        }
    }

    /// Add an edge of the given kind. Adding an edge that already exists
    /// is a no-op; the first kind wins.
    pub fn add_edge(&mut self, head: usize, tail: usize, kind: EdgeKind)
        -> Result<()> {

        if self.graph.has_edge(head, tail) {
            return Ok(());
        }
        self.graph.insert_edge(FragmentEdge::new(head, tail, kind))?;
        self.invalidate();
        Ok(())
    }

    pub fn remove_edge(&mut self, head: usize, tail: usize) -> Result<()> {
        self.graph.remove_edge(head, tail)?;
        self.invalidate();
        Ok(())
    }

    pub fn has_edge(&self, head: usize, tail: usize) -> bool {
        self.graph.has_edge(head, tail)
    }

    pub fn edge_kind(&self, head: usize, tail: usize) -> Result<EdgeKind> {
        Ok(self.graph.edge(head, tail)?.kind())
    }

    /// The successors of a fragment, with the kind of each out-edge.
    pub fn successors(&self, index: usize) -> Result<Vec<(usize, EdgeKind)>> {
        use graph::Edge;
        let mut successors: Vec<(usize, EdgeKind)> =
            self.graph.edges_out(index)?
                .into_iter()
                .map(|edge| (edge.tail(), edge.kind()))
                .collect();
        successors.sort();
        Ok(successors)
    }

    pub fn successor_indices(&self, index: usize) -> Result<Vec<usize>> {
        self.graph.successor_indices(index)
    }

    pub fn predecessor_indices(&self, index: usize) -> Result<Vec<usize>> {
        self.graph.predecessor_indices(index)
    }

    /// Split a fragment before the RTL at `rtl_index`. The trailing RTLs
    /// move to a new fragment, which inherits the original's kind and
    /// out-edges; the original falls through to it. Returns the new
    /// fragment's index and the statement handles that moved, so the
    /// owning procedure can retag them.
    pub fn split_fragment(&mut self, index: usize, rtl_index: usize)
        -> Result<(usize, Vec<StatementId>)> {

        use graph::Edge;

        let (kind, moved_rtls) = {
            let fragment = self.graph.vertex_mut(index)?;
            if rtl_index >= fragment.rtls().len() {
                bail!(ErrorKind::InvariantViolation(format!(
                    "split of fragment {} at rtl {} out of range",
                    index, rtl_index)));
            }
            let moved = fragment.rtls_mut().split_off(rtl_index);
            (fragment.kind(), moved)
        };

        let new_index = self.create_fragment(kind);
        let mut moved_statements = Vec::new();
        {
            let new_fragment = self.graph.vertex_mut(new_index)?;
            for rtl in moved_rtls {
                moved_statements.extend(rtl.statements().iter().cloned());
                new_fragment.push_rtl(rtl);
            }
        }

        let out_edges: Vec<FragmentEdge> =
            self.graph.edges_out(index)?.into_iter().cloned().collect();
        for edge in out_edges {
            self.graph.remove_edge(edge.head(), edge.tail())?;
            self.graph.insert_edge(
                FragmentEdge::new(new_index, edge.tail(), edge.kind()))?;
        }
        self.graph.vertex_mut(index)?.set_kind(FragmentKind::Fall);
        self.graph.insert_edge(
            FragmentEdge::new(index, new_index, EdgeKind::Fall))?;
        self.invalidate();
        Ok((new_index, moved_statements))
    }

    /// Fragments in reverse post-order from the entry.
    pub fn reverse_post_order(&self) -> Result<Vec<usize>> {
        let entry = match self.entry {
            Some(entry) => entry,
            None => bail!(ErrorKind::InvariantViolation(
                "fragment graph has no entry".to_string()))
        };
        let mut order = self.graph.compute_post_order(entry)?;
        order.reverse();
        Ok(order)
    }

    /// The dominance structures for this graph, computing and caching
    /// them if necessary.
    pub fn dominance(&mut self) -> Result<RC<Dominance>> {
        if let Some(ref dominance) = self.dominance {
            return Ok(dominance.clone());
        }
        let entry = match self.entry {
            Some(entry) => entry,
            None => bail!(ErrorKind::InvariantViolation(
                "fragment graph has no entry".to_string()))
        };
        let idoms = self.graph.compute_immediate_dominators(entry)?;
        let frontiers = self.graph.compute_dominance_frontiers(entry)?;
        let mut children: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (&vertex, &idom) in &idoms {
            children.entry(idom).or_insert_with(Vec::new).push(vertex);
        }
        let reverse_post_order = self.reverse_post_order()?;
        let dominance = RC::new(Dominance {
            idoms: idoms,
            frontiers: frontiers,
            children: children,
            reverse_post_order: reverse_post_order
        });
        self.dominance = Some(dominance.clone());
        Ok(dominance)
    }

    /// The post-dominance structures for this graph, computing and
    /// caching them if necessary.
    pub fn post_dominance(&mut self) -> Result<RC<PostDominance>> {
        if let Some(ref post_dominance) = self.post_dominance {
            return Ok(post_dominance.clone());
        }
        let exits = self.ret_fragments();
        if exits.is_empty() {
            bail!(ErrorKind::InvariantViolation(
                "fragment graph has no return fragment".to_string()));
        }
        let ipdoms = self.graph.compute_immediate_post_dominators(&exits)?;
        let post_dominance = RC::new(PostDominance { ipdoms: ipdoms });
        self.post_dominance = Some(post_dominance.clone());
        Ok(post_dominance)
    }

    /// True when the dominance caches are valid.
    pub fn dominance_cached(&self) -> bool {
        self.dominance.is_some()
    }

    /// A graphviz rendering of this graph.
    pub fn dot_graph(&self) -> String {
        self.graph.dot_graph()
    }

    fn invalidate(&mut self) {
        self.dominance = None;
        self.post_dominance = None;
    }
}


#[cfg(test)]
mod tests {
    use analysis::calling_convention::CallingConventionType;
    use il::*;

    #[test]
    fn split_moves_trailing_rtls_and_rewires_edges() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        let after = proc.add_fragment(FragmentKind::Fall);
        proc.start_rtl(frag, 0x1000).unwrap();
        let s0 = proc.push_assign(frag, reg(24), expr_const(1, 32)).unwrap();
        proc.start_rtl(frag, 0x1004).unwrap();
        let s1 = proc.push_assign(frag, reg(25), expr_const(2, 32)).unwrap();
        proc.cfg_mut().add_edge(frag, after, EdgeKind::Fall).unwrap();

        let new_fragment = proc.split_fragment(frag, 1).unwrap();

        // The trailing RTL moved, its statement was retagged, and the
        // out-edge now leaves the new fragment.
        assert_eq!(proc.statement(s0).unwrap().fragment(), frag);
        assert_eq!(proc.statement(s1).unwrap().fragment(), new_fragment);
        assert_eq!(proc.cfg().fragment(frag).unwrap().kind(),
                   FragmentKind::Fall);
        assert_eq!(proc.cfg().fragment(new_fragment).unwrap().kind(),
                   FragmentKind::Ret);
        assert_eq!(proc.cfg().edge_kind(frag, new_fragment).unwrap(),
                   EdgeKind::Fall);
        assert!(proc.cfg().has_edge(new_fragment, after));
        assert!(!proc.cfg().has_edge(frag, after));
    }

    #[test]
    fn dominance_cache_invalidates_on_mutation() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let a = proc.add_fragment(FragmentKind::Fall);
        let b = proc.add_fragment(FragmentKind::Ret);
        proc.cfg_mut().add_edge(a, b, EdgeKind::Fall).unwrap();

        proc.cfg_mut().dominance().unwrap();
        assert!(proc.cfg().dominance_cached());

        let c = proc.cfg_mut().create_fragment(FragmentKind::Ret);
        assert!(!proc.cfg().dominance_cached());
        proc.cfg_mut().add_edge(a, c, EdgeKind::Taken).unwrap();

        let dominance = proc.cfg_mut().dominance().unwrap();
        assert_eq!(dominance.idoms[&b], a);
        assert_eq!(dominance.idoms[&c], a);
        assert_eq!(dominance.reverse_post_order[0], a);
    }

    #[test]
    fn post_dominance_joins_multiple_returns() {
        // a -> b (ret), a -> c (ret): with two returns there is no
        // single exit, and a has no immediate post-dominator.
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let a = proc.add_fragment(FragmentKind::Taken);
        let b = proc.add_fragment(FragmentKind::Ret);
        let c = proc.add_fragment(FragmentKind::Ret);
        proc.cfg_mut().add_edge(a, b, EdgeKind::Fall).unwrap();
        proc.cfg_mut().add_edge(a, c, EdgeKind::Taken).unwrap();

        assert_eq!(proc.cfg().exit(), None);
        let post_dominance = proc.cfg_mut().post_dominance().unwrap();
        assert_eq!(post_dominance.ipdoms.get(&a), None);

        // With a single return the exit is that fragment.
        let mut linear =
            Procedure::new("g", 0x2000, CallingConventionType::Cdecl);
        let a = linear.add_fragment(FragmentKind::Fall);
        let b = linear.add_fragment(FragmentKind::Ret);
        linear.cfg_mut().add_edge(a, b, EdgeKind::Fall).unwrap();
        assert_eq!(linear.cfg().exit(), Some(b));
        let post_dominance = linear.cfg_mut().post_dominance().unwrap();
        assert_eq!(post_dominance.ipdoms[&a], b);
    }
}
