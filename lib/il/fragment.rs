//! A fragment is a node in the procedure's control-flow graph: a
//! straight-line run of RTLs ending in at most one control-flow
//! statement.

use graph;
use il::*;
use std::collections::BTreeSet;

/// What kind of terminal statement ends a fragment.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum FragmentKind {
    /// Falls through to the next fragment.
    Fall,
    /// Ends in a jump or conditional branch.
    Taken,
    /// Ends in a return.
    Ret,
    /// Ends in a recovered N-way switch jump.
    Switch,
    /// Ends in a call.
    Call
}

/// A node in the procedure CFG.
///
/// The liveness sets are caches, filled by the live-variable analysis and
/// read by interference finding; they are not kept up to date by
/// statement edits.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Fragment {
    index: usize,
    kind: FragmentKind,
    rtls: Vec<Rtl>,
    live_in: BTreeSet<Expression>,
    live_out: BTreeSet<Expression>
}

impl Fragment {
    pub fn new(index: usize, kind: FragmentKind) -> Fragment {
        Fragment {
            index: index,
            kind: kind,
            rtls: Vec::new(),
            live_in: BTreeSet::new(),
            live_out: BTreeSet::new()
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> FragmentKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: FragmentKind) {
        self.kind = kind;
    }

    /// The source address of this fragment, taken from its first RTL with
    /// a non-zero address.
    pub fn address(&self) -> Option<u64> {
        self.rtls.iter()
            .map(|rtl| rtl.address())
            .find(|&address| address != 0)
    }

    pub fn rtls(&self) -> &[Rtl] {
        &self.rtls
    }

    pub fn rtls_mut(&mut self) -> &mut Vec<Rtl> {
        &mut self.rtls
    }

    pub fn push_rtl(&mut self, rtl: Rtl) {
        self.rtls.push(rtl);
    }

    /// The statements of this fragment, in order.
    pub fn statements(&self) -> Vec<StatementId> {
        self.rtls.iter()
            .flat_map(|rtl| rtl.statements().iter().cloned())
            .collect()
    }

    pub fn first_statement(&self) -> Option<StatementId> {
        self.statements().into_iter().next()
    }

    pub fn last_statement(&self) -> Option<StatementId> {
        self.statements().into_iter().last()
    }

    pub fn contains(&self, statement: StatementId) -> bool {
        self.rtls.iter().any(|rtl| rtl.position(statement).is_some())
    }

    /// Insert a statement handle at the very front of the fragment, in a
    /// synthesized RTL. Used for phi-assigns and implicit assigns.
    pub fn insert_front(&mut self, statement: StatementId) {
        if self.rtls.first().map(|rtl| rtl.address()) == Some(0) {
            self.rtls[0].insert(0, statement);
            return;
        }
        let mut rtl = Rtl::new(0);
        rtl.push(statement);
        self.rtls.insert(0, rtl);
    }

    /// Insert a statement handle immediately after `anchor`. Returns
    /// false if the anchor is not in this fragment.
    pub fn insert_after(&mut self, anchor: StatementId, statement: StatementId)
        -> bool {

        for rtl in &mut self.rtls {
            if let Some(position) = rtl.position(anchor) {
                rtl.insert(position + 1, statement);
                return true;
            }
        }
        false
    }

    /// Insert a statement handle immediately before `anchor`. Returns
    /// false if the anchor is not in this fragment.
    pub fn insert_before(&mut self, anchor: StatementId, statement: StatementId)
        -> bool {

        for rtl in &mut self.rtls {
            if let Some(position) = rtl.position(anchor) {
                rtl.insert(position, statement);
                return true;
            }
        }
        false
    }

    /// Remove a statement handle. Returns true if it was present.
    pub fn remove_statement(&mut self, statement: StatementId) -> bool {
        for rtl in &mut self.rtls {
            if rtl.remove(statement) {
                return true;
            }
        }
        false
    }

    pub fn live_in(&self) -> &BTreeSet<Expression> {
        &self.live_in
    }

    pub fn live_out(&self) -> &BTreeSet<Expression> {
        &self.live_out
    }

    pub fn set_live_in(&mut self, live_in: BTreeSet<Expression>) {
        self.live_in = live_in;
    }

    pub fn set_live_out(&mut self, live_out: BTreeSet<Expression>) {
        self.live_out = live_out;
    }
}

impl graph::Vertex for Fragment {
    fn index(&self) -> usize {
        self.index
    }

    fn dot_label(&self) -> String {
        match self.address() {
            Some(address) => format!("frag {} @ 0x{:x}", self.index, address),
            None => format!("frag {}", self.index)
        }
    }
}
