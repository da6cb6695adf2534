//! Interference finding: two versions of the same base location that are
//! live at the same program point cannot share a local variable.

use analysis::liveness::{phi_uses_out_of, step_backward, update_liveness};
use error::*;
use il::*;
use ssa::ConnectionGraph;
use std::collections::BTreeSet;

/// Find every interference between subscripted references of the same
/// base location and record it in the connection graph. Refreshes the
/// fragments' liveness caches.
pub fn find_interferences(
    procedure: &mut Procedure,
    ig: &mut ConnectionGraph
) -> Result<()> {
    update_liveness(procedure)?;

    for index in procedure.cfg().indices() {
        let mut live: BTreeSet<Expression> =
            procedure.cfg().fragment(index)?.live_out().clone();
        for use_ in phi_uses_out_of(procedure, index)? {
            live.insert(use_);
        }
        let statements = procedure.cfg().fragment(index)?.statements();
        for id in statements.into_iter().rev() {
            let statement = procedure.statement(id)?;
            // A definition interferes with every other live version of
            // its base.
            for base in statement.defined_locations() {
                let def_ref =
                    Expression::subscript(base.clone(), Some(id));
                for live_ref in &live {
                    if live_ref == &def_ref {
                        continue;
                    }
                    if live_ref.ref_base() == Some(base) {
                        trace!("interference: {} with {}", def_ref, live_ref);
                        ig.connect(&def_ref, live_ref);
                    }
                }
            }
            step_backward(statement, &mut live);
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use analysis::calling_convention::CallingConventionType;
    use il::*;
    use ssa::ConnectionGraph;

    /// Two versions of r25 that are simultaneously live interfere; a
    /// version that dies at the next definition does not.
    #[test]
    fn overlapping_versions_interfere() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);

        // s0: r24 := r25{s1}   (uses the first version after the second
        //                       is defined, keeping both live at s2)
        // s1: r25 := 2
        // s2: r25 := 7
        let s1 = proc.push_assign(frag, reg(25), expr_const(2, 32)).unwrap();
        let s2 = proc.push_assign(frag, reg(25), expr_const(7, 32)).unwrap();

        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(
            ::types::Type::Void,
            reg(25),
            Some(Expression::subscript(reg(25), Some(s2)))));
        ret.add_return(Define::new(
            ::types::Type::Void,
            reg(24),
            Some(Expression::subscript(reg(25), Some(s1)))));
        proc.push_return(frag, ret).unwrap();

        let mut ig = ConnectionGraph::new();
        find_interferences(&mut proc, &mut ig).unwrap();

        // Both versions of r25 are live at s2's definition.
        assert!(ig.is_connected(
            &Expression::subscript(reg(25), Some(s2)),
            &Expression::subscript(reg(25), Some(s1))));
    }

    /// A version read by the statement defining the next version dies
    /// there; the two may share a local.
    #[test]
    fn sequential_versions_do_not_interfere() {
        let mut proc = Procedure::new("g", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);

        let s1 = proc.push_assign(frag, reg(25), expr_const(2, 32)).unwrap();
        let s2 = proc.push_assign(
            frag,
            reg(25),
            Expression::add(
                Expression::subscript(reg(25), Some(s1)),
                expr_const(1, 32))).unwrap();

        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(
            ::types::Type::Void,
            reg(25),
            Some(Expression::subscript(reg(25), Some(s2)))));
        proc.push_return(frag, ret).unwrap();

        let mut ig = ConnectionGraph::new();
        find_interferences(&mut proc, &mut ig).unwrap();
        assert!(ig.is_empty());
    }
}
