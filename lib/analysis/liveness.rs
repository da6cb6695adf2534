//! Live-variable analysis over subscripted references.
//!
//! A reference is live at a program point when its value may still be
//! read on some path onward. Phi operands are live out of the
//! predecessor edge they flow along, not into the join fragment; this
//! matters for interference, where merging them would block phi collapse
//! in SSA destruction.

use analysis::fixed_point::{fixed_point, Direction, FixedPointAnalysis,
                            FixedPointResult};
use error::*;
use il::*;
use std::collections::BTreeSet;

pub struct LiveVariables;

/// The references a successor's phis pull out of the given fragment.
pub(crate) fn phi_uses_out_of(procedure: &Procedure, index: usize)
    -> Result<Vec<Expression>> {

    let cfg = procedure.cfg();
    let mut uses = Vec::new();
    for successor in cfg.successor_indices(index)? {
        for id in cfg.fragment(successor)?.statements() {
            let statement = procedure.statement(id)?;
            if let Some(phi) = statement.phi() {
                if let Some(operand) = phi.operand_for(index) {
                    uses.push(operand.exp.clone());
                }
            }
            else if !statement.is_implicit() {
                // Phis sit at the fragment head, possibly interleaved
                // with implicit assigns in the entry fragment.
                break;
            }
        }
    }
    Ok(uses)
}

/// One backward liveness step over a statement: kill its definitions,
/// then generate its uses. Phi uses are handled at predecessor edges and
/// generate nothing here.
pub(crate) fn step_backward(
    statement: &Statement,
    live: &mut BTreeSet<Expression>
) {
    let id = statement.id();
    for base in statement.defined_locations() {
        live.remove(&Expression::subscript(base.clone(), Some(id)));
    }
    if statement.is_phi() {
        return;
    }
    for r in statement.used_refs() {
        live.insert(r.clone());
    }
}

impl FixedPointAnalysis for LiveVariables {
    type State = BTreeSet<Expression>;

    fn direction(&self) -> Direction {
        Direction::Backward
    }

    fn boundary_state(&self) -> BTreeSet<Expression> {
        BTreeSet::new()
    }

    fn top(&self) -> BTreeSet<Expression> {
        BTreeSet::new()
    }

    fn transfer(
        &self,
        procedure: &Procedure,
        fragment: &Fragment,
        state: BTreeSet<Expression>
    ) -> Result<BTreeSet<Expression>> {
        let mut live = state;
        for use_ in phi_uses_out_of(procedure, fragment.index())? {
            live.insert(use_);
        }
        for id in fragment.statements().into_iter().rev() {
            step_backward(procedure.statement(id)?, &mut live);
        }
        Ok(live)
    }

    fn join(
        &self,
        a: BTreeSet<Expression>,
        b: &BTreeSet<Expression>
    ) -> Result<BTreeSet<Expression>> {
        let mut joined = a;
        for e in b {
            joined.insert(e.clone());
        }
        Ok(joined)
    }
}

/// Run liveness over a procedure.
pub fn live_variables(procedure: &Procedure)
    -> Result<FixedPointResult<BTreeSet<Expression>>> {

    fixed_point(&LiveVariables, procedure)
}

/// Run liveness and store the per-fragment results in the fragments'
/// live-in/live-out caches.
pub fn update_liveness(procedure: &mut Procedure) -> Result<()> {
    let result = live_variables(procedure)?;
    for index in procedure.cfg().indices() {
        let live_in =
            result.in_states.get(&index).cloned().unwrap_or_default();
        let live_out =
            result.out_states.get(&index).cloned().unwrap_or_default();
        let fragment = procedure.cfg_mut().fragment_mut(index)?;
        fragment.set_live_in(live_in);
        fragment.set_live_out(live_out);
    }
    Ok(())
}
