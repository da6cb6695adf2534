//! An engine for iterative dataflow analyses over fragment graphs.
//!
//! An analysis supplies a transfer function over whole fragments and a
//! join; the engine runs the standard worklist iteration to a fixed
//! point. States are per-fragment: `in_states` at fragment entry,
//! `out_states` at fragment exit, whichever direction the analysis runs.

use error::*;
use il::*;
use std::collections::BTreeMap;
use std::fmt::Debug;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Forward,
    Backward
}

/// An iterative dataflow analysis.
pub trait FixedPointAnalysis {
    type State: Clone + PartialEq + Debug;

    fn direction(&self) -> Direction;

    /// The state at the boundary: the entry fragment for a forward
    /// analysis, the return fragments for a backward one.
    fn boundary_state(&self) -> Self::State;

    /// The initial state for every other fragment, the top of the
    /// lattice.
    fn top(&self) -> Self::State;

    /// Push a state through a fragment: entry-to-exit for a forward
    /// analysis, exit-to-entry for a backward one.
    fn transfer(
        &self,
        procedure: &Procedure,
        fragment: &Fragment,
        state: Self::State
    ) -> Result<Self::State>;

    /// The meet of two states at a control-flow merge.
    fn join(&self, a: Self::State, b: &Self::State) -> Result<Self::State>;
}

/// The result of running an analysis: the state at each fragment's entry
/// and exit.
pub struct FixedPointResult<State> {
    pub in_states: BTreeMap<usize, State>,
    pub out_states: BTreeMap<usize, State>
}

/// Run an analysis over a procedure to a fixed point.
pub fn fixed_point<A>(analysis: &A, procedure: &Procedure)
    -> Result<FixedPointResult<A::State>> where A: FixedPointAnalysis {

    let cfg = procedure.cfg();
    let forward = analysis.direction() == Direction::Forward;

    // Visit order: reverse post-order for forward analyses, post-order
    // for backward ones.
    let mut order = cfg.reverse_post_order()?;
    if !forward {
        order.reverse();
    }

    let boundary: Vec<usize> = if forward {
        cfg.entry().into_iter().collect()
    }
    else {
        cfg.ret_fragments()
    };

    let mut in_states: BTreeMap<usize, A::State> = BTreeMap::new();
    let mut out_states: BTreeMap<usize, A::State> = BTreeMap::new();
    for &index in &order {
        in_states.insert(index, analysis.top());
        out_states.insert(index, analysis.top());
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &index in &order {
            let fragment = cfg.fragment(index)?;

            // Join the states flowing in from the neighbors against the
            // flow direction.
            let neighbors = if forward {
                cfg.predecessor_indices(index)?
            }
            else {
                cfg.successor_indices(index)?
            };
            let mut joined = if boundary.contains(&index) {
                analysis.boundary_state()
            }
            else {
                analysis.top()
            };
            for neighbor in neighbors {
                let neighbor_state = if forward {
                    out_states.get(&neighbor)
                }
                else {
                    in_states.get(&neighbor)
                };
                if let Some(neighbor_state) = neighbor_state {
                    joined = analysis.join(joined, neighbor_state)?;
                }
            }

            let transferred =
                analysis.transfer(procedure, fragment, joined.clone())?;

            let (entry_state, exit_state) = if forward {
                (joined, transferred)
            }
            else {
                (transferred, joined)
            };
            if in_states.get(&index) != Some(&entry_state) {
                in_states.insert(index, entry_state);
                changed = true;
            }
            if out_states.get(&index) != Some(&exit_state) {
                out_states.insert(index, exit_state);
                changed = true;
            }
        }
    }

    Ok(FixedPointResult {
        in_states: in_states,
        out_states: out_states
    })
}
