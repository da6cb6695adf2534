//! Dead-code elimination driven by use counts.
//!
//! A definition with no live use and no observable side effect is
//! removed. Stores to memory and globals are observable. Calls are never
//! removed (they are not pure), but defines nobody reads are trimmed
//! once the callee is known. Phi-assigns whose operands all agree
//! collapse to a copy.

use analysis::use_counts;
use error::*;
use il::*;
use passes::{Pass, PassChange, PassContext, PassId};
use std::collections::BTreeSet;

pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn id(&self) -> PassId {
        PassId::DeadCodeElimination
    }

    fn execute(&self, procedure: &mut Procedure, ctx: &mut PassContext)
        -> Result<PassChange> {

        let mut counts = use_counts(procedure)?;
        // Collector snapshots keep their definitions alive: call bypass
        // and argument localisation materialize collector references
        // into real statements, so removing a collected definition would
        // leave dangling references behind.
        for statement in procedure.statements() {
            if let Some(call) = statement.call() {
                let collected = call.def_collector().defs().iter()
                    .map(|def| &def.rhs)
                    .chain(call.use_collector().uses().iter());
                for e in collected {
                    for r in e.refs() {
                        if let Some(def) = r.ref_def() {
                            *counts.entry(def).or_insert(0) += 1;
                        }
                    }
                }
            }
        }
        let used = |id: StatementId| counts.get(&id).cloned().unwrap_or(0) > 0;

        // The implicit definitions backing inferred parameters stay.
        let parameter_defs: BTreeSet<StatementId> = procedure.parameters()
            .iter()
            .filter_map(|&(ref exp, _)| exp.ref_def())
            .collect();

        let mut doomed: Vec<StatementId> = Vec::new();
        let mut collapsed: Vec<(StatementId, Expression, ::types::Type)> =
            Vec::new();
        let mut trims: Vec<(StatementId, BTreeSet<Expression>)> = Vec::new();

        for statement in procedure.statements() {
            let id = statement.id();
            match *statement.kind() {
                StatementKind::Assign(ref assign) |
                StatementKind::BoolAssign(ref assign) => {
                    if used(id) {
                        continue;
                    }
                    let observable = match assign.lhs.get_location() {
                        Some(&Location::Memory(_)) |
                        Some(&Location::Global(_)) => true,
                        _ => false
                    };
                    if !observable {
                        doomed.push(id);
                    }
                },
                StatementKind::ImplicitAssign(_) => {
                    if !used(id) && !parameter_defs.contains(&id) {
                        doomed.push(id);
                    }
                },
                StatementKind::Phi(ref phi) => {
                    if !used(id) {
                        doomed.push(id);
                    }
                    else if phi.operands_all_equal()
                        && !phi.operands().is_empty() {
                        collapsed.push((
                            id,
                            phi.operands()[0].exp.clone(),
                            phi.ty.clone()
                        ));
                    }
                },
                StatementKind::Call(ref call) => {
                    // Trim defines nobody reads; keep the call itself.
                    if call.is_childless(ctx.program) {
                        continue;
                    }
                    let used_bases: BTreeSet<Expression> =
                        used_bases_of(procedure, id);
                    let live = call.calc_results(&used_bases);
                    if live.len() != call.defines().len() {
                        trims.push((id, live.into_iter().collect()));
                    }
                },
                _ => {}
            }
        }

        let progress =
            !doomed.is_empty() || !collapsed.is_empty() || !trims.is_empty();

        for id in doomed {
            trace!("removing dead statement {}", id);
            procedure.remove_statement(id)?;
        }
        for (id, operand, ty) in collapsed {
            debug!("collapsing phi {} to a copy", id);
            let lhs = match procedure.statement(id)?.phi() {
                Some(phi) => phi.lhs.clone(),
                None => continue
            };
            procedure.statement_mut(id)?.set_kind(
                StatementKind::Assign(Assign::typed(ty, lhs, operand)));
        }
        for (id, keep) in trims {
            if let Some(call) = procedure.statement_mut(id)?.call_mut() {
                call.defines_mut().retain(|define| keep.contains(&define.lhs));
            }
        }

        Ok(if progress {
            PassChange::PROGRESS
        }
        else {
            PassChange::empty()
        })
    }
}

/// The base locations the procedure actually reads from the given
/// defining statement.
fn used_bases_of(procedure: &Procedure, def: StatementId)
    -> BTreeSet<Expression> {

    let mut bases = BTreeSet::new();
    for statement in procedure.statements() {
        for e in statement.used_expressions() {
            for r in e.refs() {
                if r.ref_def() == Some(def) {
                    if let Some(base) = r.ref_base() {
                        bases.insert(base.clone());
                    }
                }
            }
        }
    }
    bases
}
