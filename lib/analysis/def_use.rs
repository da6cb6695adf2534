//! Def-use bookkeeping: use counts over subscripted references, and the
//! filling of call-site collector snapshots.

use analysis::liveness::live_variables;
use analysis::reaching_definitions::{reaching_definitions, step_forward,
                                     ReachSet};
use error::*;
use il::*;
use std::collections::BTreeMap;

/// Count, for every defining statement, how many subscripted references
/// to it appear in the procedure. Phi operands count; collector
/// snapshots do not, so a definition kept alive only by a collector is
/// still unused.
pub fn use_counts(procedure: &Procedure)
    -> Result<BTreeMap<StatementId, usize>> {

    let mut counts: BTreeMap<StatementId, usize> = BTreeMap::new();
    for statement in procedure.statements() {
        for e in statement.used_expressions() {
            for r in e.refs() {
                if let Some(def) = r.ref_def() {
                    *counts.entry(def).or_insert(0) += 1;
                }
            }
        }
    }
    Ok(counts)
}

/// Fill the def and use collectors of every call in the procedure.
///
/// The def collector snapshots the definitions reaching the call site;
/// the use collector snapshots the references live after the call. Both
/// are used for call-site-local reasoning while the callee body is
/// unanalyzed.
pub fn fill_call_collectors(procedure: &mut Procedure) -> Result<()> {
    let reaching = reaching_definitions(procedure)?;
    let liveness = live_variables(procedure)?;

    // Snapshot per call first; the collectors are rebuilt from scratch.
    let mut snapshots: Vec<(StatementId, ReachSet, Vec<Expression>)> =
        Vec::new();
    for index in procedure.cfg().indices() {
        let fragment = procedure.cfg().fragment(index)?;
        let mut reach = reaching.in_states.get(&index).cloned()
            .unwrap_or_default();
        for id in fragment.statements() {
            let statement = procedure.statement(id)?;
            if statement.is_call() {
                let live_out: Vec<Expression> = liveness.out_states
                    .get(&index)
                    .map(|live| live.iter().cloned().collect())
                    .unwrap_or_default();
                snapshots.push((id, reach.clone(), live_out));
            }
            step_forward(statement, &mut reach);
        }
    }

    for (id, reach, live_out) in snapshots {
        let call = match procedure.statement_mut(id)?.call_mut() {
            Some(call) => call,
            None => continue
        };
        call.def_collector_mut().clear();
        for (base, def) in reach {
            let rhs = Expression::subscript(base.clone(), Some(def));
            call.def_collector_mut().collect_def(Assign::new(base, rhs));
        }
        call.use_collector_mut().clear();
        for use_ in live_out {
            call.use_collector_mut().collect_use(use_);
        }
    }
    Ok(())
}
