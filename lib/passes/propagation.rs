//! Copy and constant propagation over SSA form.
//!
//! A definition `x := e` is propagated into a use `x{def}` when doing so
//! cannot change behavior: constants always; other expressions when they
//! are simple or the definition has a single use, when no call or store
//! can clobber a memory operand between definition and use, and when the
//! propagation does not cross a type boundary that would need a
//! narrowing cast.

use analysis::use_counts;
use error::*;
use il::*;
use passes::{Pass, PassChange, PassContext, PassId};
use std::collections::BTreeMap;

pub struct StatementPropagation;

impl Pass for StatementPropagation {
    fn id(&self) -> PassId {
        PassId::StatementPropagation
    }

    fn execute(&self, procedure: &mut Procedure, _: &mut PassContext)
        -> Result<PassChange> {

        let counts = use_counts(procedure)?;
        let ids = procedure.ordered_statement_ids()?;
        let mut progress = false;

        for id in ids {
            // Phi operands are not propagation sites; they must remain
            // plain references.
            if procedure.statement(id)?.is_phi() {
                continue;
            }
            let refs: Vec<Expression> = procedure.statement(id)?
                .used_refs()
                .into_iter()
                .cloned()
                .collect();
            for r in refs {
                let def = match r.ref_def() {
                    Some(def) => def,
                    None => continue
                };
                let replacement =
                    match propagatable(procedure, &counts, &r, def, id)? {
                    Some(replacement) => replacement,
                    None => continue
                };
                let statement = procedure.statement_mut(id)?;
                if statement.search_and_replace(&r, &replacement) > 0 {
                    statement.simplify();
                    progress = true;
                }
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

/// The expression to substitute for the use `r` (whose definition is
/// `def`), or `None` when propagation is unsafe or unprofitable.
fn propagatable(
    procedure: &Procedure,
    counts: &BTreeMap<StatementId, usize>,
    r: &Expression,
    def: StatementId,
    use_site: StatementId
) -> Result<Option<Expression>> {
    let def_statement = procedure.statement(def)?;
    let assign = match *def_statement.kind() {
        StatementKind::Assign(ref assign) => assign,
        _ => return Ok(None)
    };
    if Some(&assign.lhs) != r.ref_base() {
        return Ok(None);
    }

    // Constants propagate unconditionally.
    if assign.rhs.is_constant() {
        return Ok(Some(assign.rhs.clone()));
    }

    // Simple copies, or anything into its only use.
    let simple = assign.rhs.is_location() || assign.rhs.is_ref();
    let single_use = counts.get(&def).cloned().unwrap_or(0) == 1;
    if !simple && !single_use {
        return Ok(None);
    }

    // A memory operand may be clobbered by a call or store between the
    // definition and the use; only propagate within one fragment with a
    // clean path.
    if assign.rhs.locations().iter().any(|l| l.is_memory()) {
        let use_statement = procedure.statement(use_site)?;
        if def_statement.fragment() != use_statement.fragment() {
            return Ok(None);
        }
        if !clean_path(procedure, def_statement.fragment(), def, use_site)? {
            return Ok(None);
        }
    }

    // Do not cross a type boundary that would need a narrowing cast.
    if let Some(def_bits) = assign.ty.size_bits() {
        if let Some(rhs_bits) = rhs_width(procedure, &assign.rhs)? {
            if rhs_bits > def_bits {
                return Ok(None);
            }
        }
    }

    Ok(Some(assign.rhs.clone()))
}

/// True when no statement strictly between `from` and `to` in the given
/// fragment is a call or a store.
fn clean_path(
    procedure: &Procedure,
    fragment: FragmentId,
    from: StatementId,
    to: StatementId
) -> Result<bool> {
    let statements = procedure.cfg().fragment(fragment)?.statements();
    let mut between = false;
    for id in statements {
        if id == from {
            between = true;
            continue;
        }
        if id == to {
            return Ok(true);
        }
        if !between {
            continue;
        }
        let statement = procedure.statement(id)?;
        if statement.is_call() {
            return Ok(false);
        }
        if statement.defined_locations().iter().any(|lhs| lhs.is_memory()) {
            return Ok(false);
        }
    }
    // `to` precedes `from` in the fragment; not a forward path.
    Ok(false)
}

/// The width in bits of an expression's value, where one is evident.
fn rhs_width(procedure: &Procedure, e: &Expression) -> Result<Option<usize>> {
    Ok(match *e {
        Expression::Constant(ref constant) => Some(constant.bits()),
        Expression::SizeCast { bits, .. } => Some(bits),
        Expression::Typed { ref ty, .. } => ty.size_bits(),
        Expression::Ref { ref base, def: Some(def) } =>
            procedure.statement(def)?
                .type_for(base)
                .and_then(|ty| ty.size_bits()),
        _ => None
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use analysis::calling_convention::CallingConventionType;
    use il::*;
    use passes::{PassManager, Settings};
    use ssa;

    fn run(procedure: &mut Procedure) -> PassChange {
        let mut program = Program::new("test", Image::empty());
        let mut decoder = ::passes::indirect::tests::NullDecoder;
        let settings = Settings::default();
        let mut ctx = PassContext {
            program: &mut program,
            decoder: &mut decoder,
            settings: &settings,
            cancel: None
        };
        StatementPropagation.execute(procedure, &mut ctx).unwrap()
    }

    /// Constants propagate through copies and fold.
    #[test]
    fn constants_propagate_and_fold() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        proc.push_assign(frag, reg(24), expr_const(40, 32)).unwrap();
        let s1 = proc.push_assign(
            frag, reg(25),
            Expression::add(reg(24), expr_const(2, 32))).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(::types::Type::Void, reg(25),
                                   Some(reg(25))));
        proc.push_return(frag, ret).unwrap();

        ssa::construct(&mut proc).unwrap();
        let change = run(&mut proc);
        assert!(change.contains(PassChange::PROGRESS));

        match *proc.statement(s1).unwrap().kind() {
            StatementKind::Assign(ref assign) =>
                assert_eq!(assign.rhs, expr_const(42, 32)),
            _ => unreachable!()
        }
    }

    /// A reiteration with nothing to do reports no progress; the number
    /// of statements never grows.
    #[test]
    fn propagation_is_monotone() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        proc.push_assign(frag, reg(24), expr_const(1, 32)).unwrap();
        proc.push_assign(frag, reg(25), reg(24)).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(::types::Type::Void, reg(25),
                                   Some(reg(25))));
        proc.push_return(frag, ret).unwrap();
        ssa::construct(&mut proc).unwrap();

        let before = proc.statement_count();
        let first = run(&mut proc);
        assert!(first.contains(PassChange::PROGRESS));
        assert!(proc.statement_count() <= before);

        let second = run(&mut proc);
        assert_eq!(second, PassChange::empty());
    }

    /// A load does not propagate across a call that could clobber
    /// memory.
    #[test]
    fn memory_does_not_propagate_across_a_call() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Call);
        let after = proc.add_fragment(FragmentKind::Ret);

        // r24 := m[r28 + 4]; call; r25 := r24
        proc.push_assign(
            frag, reg(24),
            mem(Expression::add(reg(28), expr_const(4, 32)))).unwrap();
        proc.push_call(frag, CallStatement::to_address(0x2000)).unwrap();
        let use_site = proc.push_assign(after, reg(25), reg(24)).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(::types::Type::Void, reg(25),
                                   Some(reg(25))));
        proc.push_return(after, ret).unwrap();
        proc.cfg_mut().add_edge(frag, after, EdgeKind::CallReturn).unwrap();

        ssa::construct(&mut proc).unwrap();
        run(&mut proc);

        // The use of r24 still reads r24, not the memory load.
        let refs = proc.statement(use_site).unwrap().used_refs();
        assert!(refs.iter()
                .any(|r| r.ref_base() == Some(&reg(24))),
                "load was propagated across a call");
    }

    /// End-to-end over the manager: the propagation/DCE group reaches a
    /// fixed point and shrinks the statement list.
    #[test]
    fn group_reaches_fixed_point() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        proc.push_assign(frag, reg(24), expr_const(1, 32)).unwrap();
        proc.push_assign(frag, reg(25), reg(24)).unwrap();
        proc.push_assign(frag, reg(26), reg(25)).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(::types::Type::Void, reg(26),
                                   Some(reg(26))));
        proc.push_return(frag, ret).unwrap();
        ssa::construct(&mut proc).unwrap();

        let mut program = Program::new("test", Image::empty());
        let mut decoder = ::passes::indirect::tests::NullDecoder;
        let settings = Settings::default();
        let mut manager = PassManager::new(settings.clone());
        let mut ctx = PassContext {
            program: &mut program,
            decoder: &mut decoder,
            settings: &settings,
            cancel: None
        };
        let before = proc.statement_count();
        manager.execute_pass_group(
            &[PassId::StatementPropagation, PassId::DeadCodeElimination],
            &mut proc, &mut ctx).unwrap();
        assert!(proc.statement_count() < before);
    }
}
