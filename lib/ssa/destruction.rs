//! SSA destruction: name user-visible locals, then rewrite phi-assigns
//! into ordinary copies and strip every subscript.
//!
//! Two connection graphs drive naming. The interference graph joins
//! references that must not share a local: versions of a base location
//! live at the same point, and definitions whose inferred types are
//! incompatible with the location's first recorded type. The phi-unite
//! graph joins the destination of each phi with its operands; united
//! references share a name whenever they do not interfere.

use analysis::interference::find_interferences;
use error::*;
use il::*;
use ssa::ConnectionGraph;
use std::collections::BTreeMap;
use types::Type;

/// Transform a procedure out of SSA form. On return, no statement
/// contains a subscripted reference, and every named location is a local
/// or parameter.
pub fn destroy(procedure: &mut Procedure) -> Result<()> {
    // The upstream invariant must hold or naming would attach to
    // dangling references.
    procedure.verify_ssa()?;

    let mut ig = ConnectionGraph::new();
    let mut pu = ConnectionGraph::new();

    split_type_incompatible_ranges(procedure, &mut ig)?;
    find_interferences(procedure, &mut ig)?;
    find_phi_unites(procedure, &mut pu)?;

    if !ig.all_refs_have_defs(procedure) {
        bail!(ErrorKind::InvariantViolation(format!(
            "interference graph for {} holds a reference with no definition",
            procedure.name())));
    }

    choose_names_for_interferences(procedure, &ig)?;
    propagate_phi_unite_names(procedure, &ig, &pu)?;
    name_parameter_phis(procedure)?;
    map_parameters(procedure);
    remove_subscripts_from_symbols(procedure);
    replace_subscripts_with_locals(procedure)?;
    rewrite_phis(procedure)?;

    // Implicit assigns only carried entry-value information for SSA;
    // the surviving names live in the signature and the symbol map.
    let implicit_ids: Vec<StatementId> = procedure.statements()
        .into_iter()
        .filter(|statement| statement.is_implicit())
        .map(|statement| statement.id())
        .collect();
    for id in implicit_ids {
        procedure.remove_statement(id)?;
    }

    procedure.number_statements()
}

/// Split live ranges by type incompatibility: when a definition's type
/// conflicts with the first type recorded for its base location, connect
/// the two references in the interference graph so they get different
/// locals. Interferences where either side is void are ignored.
fn split_type_incompatible_ranges(
    procedure: &Procedure,
    ig: &mut ConnectionGraph
) -> Result<()> {
    let mut first_types: BTreeMap<Expression, (Type, Expression)> =
        BTreeMap::new();

    for id in procedure.ordered_statement_ids()? {
        let statement = procedure.statement(id)?;
        for base in statement.defined_locations() {
            let ty = statement.type_for(base).cloned().unwrap_or(Type::Void);
            let r = Expression::subscript(base.clone(), Some(id));
            match first_types.get(base) {
                None => {
                    first_types.insert(base.clone(), (ty, r));
                },
                Some(&(ref first_ty, ref first_ref)) => {
                    if !ty.is_compatible_with(first_ty)
                        && !ty.is_void()
                        && !first_ty.is_void() {
                        debug!("def of {} at {} type {} conflicts with {}",
                               base, id, ty, first_ty);
                        ig.connect(&r, first_ref);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Connect the destination of every phi with each of its operands.
fn find_phi_unites(procedure: &Procedure, pu: &mut ConnectionGraph)
    -> Result<()> {

    for statement in procedure.statements() {
        let phi = match statement.phi() {
            Some(phi) => phi,
            None => continue
        };
        let lhs_ref =
            Expression::subscript(phi.lhs.clone(), Some(statement.id()));
        for operand in phi.operands() {
            pu.connect(&lhs_ref, &operand.exp);
        }
    }
    Ok(())
}

/// For each interference edge, give one endpoint a fresh local. Prefer
/// keeping the name of an implicit definition (it is probably a
/// parameter), and prefer renaming a phi destination over an ordinary
/// definition.
fn choose_names_for_interferences(
    procedure: &mut Procedure,
    ig: &ConnectionGraph
) -> Result<()> {
    let edges: Vec<(Expression, Expression)> = ig.edges().to_vec();
    for (r1, r2) in edges {
        let name1 = procedure.lookup_symbol_any(&r1).map(|s| s.to_string());
        let name2 = procedure.lookup_symbol_any(&r2).map(|s| s.to_string());
        if let (Some(ref name1), Some(ref name2)) = (name1.as_ref(), name2.as_ref()) {
            if name1 != name2 {
                // Already different names, probably from the redundant
                // mapping.
                continue;
            }
        }

        let def_is = |r: &Expression| -> Result<(bool, bool)> {
            let def = r.ref_def().expect("checked by all_refs_have_defs");
            let statement = procedure.statement(def)?;
            Ok((statement.is_implicit(), statement.is_phi()))
        };
        let (r1_implicit, _) = def_is(&r1)?;
        let (r2_implicit, r2_phi) = def_is(&r2)?;

        let rename = if r1_implicit {
            r2.clone()
        }
        else if r2_implicit {
            r1.clone()
        }
        else if r2_phi {
            r2.clone()
        }
        else {
            r1.clone()
        };

        let ty = {
            let def = rename.ref_def().expect("reference has a definition");
            let base = rename.ref_base().expect("reference has a base");
            procedure.statement(def)?
                .type_for(base)
                .cloned()
                .unwrap_or(Type::Void)
        };
        let local = procedure.create_local(ty);
        let name = local.get_location()
            .and_then(|location| location.name())
            .expect("create_local returns a named location")
            .to_string();
        debug!("renaming {} to {}", rename, name);
        procedure.map_symbol_to(rename, name);
    }
    Ok(())
}

/// Where a phi unite has exactly one named endpoint and the endpoints do
/// not interfere, propagate the name to the unnamed one.
///
/// Exception: when the named endpoint is a phi destination, the unnamed
/// endpoint is one of its operands, and all other operands already share
/// a single name, propagating would break the single-copy collapse in
/// `rewrite_phis`; skip it.
fn propagate_phi_unite_names(
    procedure: &mut Procedure,
    ig: &ConnectionGraph,
    pu: &ConnectionGraph
) -> Result<()> {
    let edges: Vec<(Expression, Expression)> = pu.edges().to_vec();
    for (r1, r2) in edges {
        let name1 = procedure.lookup_symbol(&r1).map(|s| s.to_string());
        let name2 = procedure.lookup_symbol(&r2).map(|s| s.to_string());
        let (named, named_name, unnamed) = match (name1, name2) {
            (Some(name), None) => (r1.clone(), name, r2.clone()),
            (None, Some(name)) => (r2.clone(), name, r1.clone()),
            _ => continue
        };
        if ig.is_connected(&r1, &r2) {
            continue;
        }

        let named_def = named.ref_def().expect("phi unites are references");
        let skip = {
            let statement = procedure.statement(named_def)?;
            match statement.phi() {
                Some(phi) => {
                    let mut unnamed_is_operand = false;
                    let mut all_same = true;
                    let mut first_name: Option<String> = None;
                    for operand in phi.operands() {
                        if operand.exp == unnamed {
                            unnamed_is_operand = true;
                            continue;
                        }
                        let operand_name = procedure
                            .lookup_symbol_any(&operand.exp)
                            .map(|s| s.to_string());
                        let same = match operand_name {
                            Some(name) => {
                                if first_name.is_none() {
                                    first_name = Some(name);
                                    true
                                }
                                else {
                                    first_name.as_ref() == Some(&name)
                                }
                            },
                            None => false
                        };
                        if !same {
                            all_same = false;
                            break;
                        }
                    }
                    unnamed_is_operand && all_same
                },
                None => false
            }
        };
        if skip {
            continue;
        }
        debug!("uniting {} with {} as {}", unnamed, named, named_name);
        procedure.map_symbol_to(unnamed, named_name);
    }
    Ok(())
}

/// Name unnamed phi destinations from their implicit-assign operands,
/// when every implicit operand agrees on a single parameter name.
fn name_parameter_phis(procedure: &mut Procedure) -> Result<()> {
    let mut naming: Vec<(Expression, String)> = Vec::new();
    for statement in procedure.statements() {
        let phi = match statement.phi() {
            Some(phi) => phi,
            None => continue
        };
        let lhs_ref =
            Expression::subscript(phi.lhs.clone(), Some(statement.id()));
        if procedure.lookup_symbol(&lhs_ref).is_some() {
            continue;
        }
        let mut first_name: Option<String> = None;
        let mut multiple = false;
        for operand in phi.operands() {
            let def = match operand.def() {
                Some(def) => def,
                None => continue
            };
            if !procedure.statement(def)?.is_implicit() {
                continue;
            }
            let name = match procedure.lookup_symbol_any(&operand.exp) {
                Some(name) => name.to_string(),
                None => continue
            };
            if first_name.is_none() {
                first_name = Some(name);
            }
            else if first_name.as_ref() != Some(&name) {
                multiple = true;
                break;
            }
        }
        if let Some(name) = first_name {
            if !multiple {
                naming.push((lhs_ref, name));
            }
        }
    }
    for (lhs_ref, name) in naming {
        procedure.map_symbol_to(lhs_ref, name);
    }
    Ok(())
}

/// Replace the inferred parameter expressions with their mapped names.
fn map_parameters(procedure: &mut Procedure) {
    let mut parameters: Vec<(Expression, Type)> =
        procedure.parameters().to_vec();
    for &mut (ref mut exp, _) in &mut parameters {
        match procedure.lookup_symbol_any(exp).map(|s| s.to_string()) {
            Some(name) => *exp = param(name),
            None => {
                warn!("no symbol mapping for parameter {}", exp);
                *exp = exp.clone().strip_subscripts();
            }
        }
    }
    procedure.set_parameters(parameters);
}

/// The named location for a symbol: a parameter if the signature has a
/// parameter of that name, else a local.
fn symbol_exp(procedure: &Procedure, name: &str) -> Expression {
    let is_param = procedure.signature().parameters()
        .iter()
        .any(|parameter| parameter.name == name);
    if is_param {
        param(name)
    }
    else {
        local(name)
    }
}

/// Substitute named references bottom-up: a subscripted reference with a
/// symbol becomes that local or parameter; any other reference loses its
/// subscript.
fn subst_symbols(procedure: &Procedure, e: Expression) -> Expression {
    use il::visitor::{rewrite_expression, ExpressionModifier};

    struct Subst<'a>(&'a Procedure);
    impl<'a> ExpressionModifier for Subst<'a> {
        fn modify(&mut self, expression: Expression) -> Expression {
            match expression {
                Expression::Ref { base, def } => {
                    let r = Expression::Ref { base: base, def: def };
                    match self.0.lookup_symbol(&r) {
                        Some(name) => symbol_exp(self.0, name),
                        None => match r {
                            Expression::Ref { base, .. } => *base,
                            _ => unreachable!()
                        }
                    }
                },
                expression => expression
            }
        }
    }
    rewrite_expression(&mut Subst(procedure), e)
}

/// Use the symbol map to map the symbols in the symbol map. The outer
/// level of a subscripted key is kept; it is still needed when phi
/// rewriting looks names up by reference.
fn remove_subscripts_from_symbols(procedure: &mut Procedure) {
    let old: BTreeMap<Expression, String> = procedure.symbols().clone();
    let mut new: BTreeMap<Expression, String> = BTreeMap::new();
    for (key, name) in old {
        let key = match key {
            Expression::Ref { base, def } => Expression::Ref {
                base: Box::new(subst_symbols(procedure, *base)),
                def: def
            },
            key => subst_symbols(procedure, key)
        };
        new.insert(key, name);
    }
    procedure.set_symbols(new);
}

/// Rewrite every statement: definitions take their mapped names, and
/// every use loses its subscript in favor of its name (or its bare base
/// when unnamed). Phi operands keep their defining-statement handles for
/// the copy insertion in `rewrite_phis`.
fn replace_subscripts_with_locals(procedure: &mut Procedure) -> Result<()> {
    let ids: Vec<StatementId> = procedure.statements()
        .into_iter()
        .map(|statement| statement.id())
        .collect();

    for id in ids {
        let mut kind = procedure.statement(id)?.kind().clone();
        match kind {
            StatementKind::Assign(ref mut assign) |
            StatementKind::BoolAssign(ref mut assign) => {
                assign.rhs = subst_symbols(procedure, assign.rhs.clone());
                assign.lhs = name_def(procedure, assign.lhs.clone(), id);
            },
            StatementKind::ImplicitAssign(ref mut define) => {
                define.lhs = name_def(procedure, define.lhs.clone(), id);
            },
            StatementKind::Phi(ref mut phi) => {
                phi.lhs = name_def(procedure, phi.lhs.clone(), id);
                for operand in &mut phi.operands {
                    let def = operand.def();
                    let named =
                        subst_symbols(procedure, operand.exp.clone());
                    // Keep the handle: rewrite_phis inserts copies after
                    // the operand definitions.
                    operand.exp = match named {
                        e @ Expression::Ref { .. } => e,
                        e => Expression::subscript(e, def)
                    };
                }
            },
            StatementKind::Goto(ref mut goto) => {
                goto.dest = subst_symbols(procedure, goto.dest.clone());
            },
            StatementKind::Branch(ref mut branch) => {
                branch.condition =
                    subst_symbols(procedure, branch.condition.clone());
            },
            StatementKind::Call(ref mut call) => {
                for e in call.expressions_mut() {
                    *e = subst_symbols(procedure, e.clone());
                }
                call.def_collector_mut().clear();
                call.use_collector_mut().clear();
            },
            StatementKind::Return(ref mut ret) => {
                for define in &mut ret.returns {
                    define.lhs = define.lhs.clone().strip_subscripts();
                    if let Some(ref mut rhs) = define.rhs {
                        *rhs = subst_symbols(procedure, rhs.clone());
                    }
                }
            }
        }
        procedure.statement_mut(id)?.set_kind(kind);
    }
    Ok(())
}

/// The post-destruction form of a definition's lhs: its mapped name, or
/// the bare base location.
fn name_def(procedure: &Procedure, lhs: Expression, id: StatementId)
    -> Expression {

    let lhs = match lhs {
        Expression::Location(Location::Memory(address)) =>
            mem(subst_symbols(procedure, *address)),
        lhs => lhs
    };
    let r = Expression::subscript(lhs.clone(), Some(id));
    match procedure.lookup_symbol(&r) {
        Some(name) => symbol_exp(procedure, name),
        None => lhs
    }
}

/// Rewrite every phi-assign into ordinary form:
///
/// * all operands and the destination share one base: remove the phi;
/// * all operands share one base different from the destination: the phi
///   becomes `lhs := that base`;
/// * otherwise: introduce a fresh local, copy into it after each
///   operand's definition, and the phi becomes `lhs := fresh`.
fn rewrite_phis(procedure: &mut Procedure) -> Result<()> {
    let phi_ids: Vec<StatementId> = procedure.statements()
        .into_iter()
        .filter(|statement| statement.is_phi())
        .map(|statement| statement.id())
        .collect();

    for id in phi_ids {
        let phi = match procedure.statement(id)?.phi() {
            Some(phi) => phi.clone(),
            None => continue
        };

        if phi.operands().is_empty() {
            debug!("phi {} has no operands, removing", id);
            procedure.remove_statement(id)?;
            continue;
        }

        let first = phi.operands()[0].base().clone();
        let all_same =
            phi.operands().iter().all(|operand| operand.base() == &first);

        if all_same {
            if first == phi.lhs {
                debug!("removing phi {}: destination and operands agree", id);
                procedure.remove_statement(id)?;
            }
            else {
                procedure.statement_mut(id)?.set_kind(
                    StatementKind::Assign(Assign::typed(
                        phi.ty.clone(), phi.lhs.clone(), first)));
            }
            continue;
        }

        // Costly in copies, but extends no live ranges.
        let fresh = procedure.create_local(phi.ty.clone());
        debug!("phi {} requires a fresh local {}", id, fresh);
        for operand in phi.operands() {
            let def = match operand.def() {
                Some(def) => def,
                None => continue
            };
            procedure.insert_assign_after(
                def, fresh.clone(), operand.base().clone())?;
        }
        procedure.statement_mut(id)?.set_kind(
            StatementKind::Assign(Assign::typed(
                phi.ty.clone(), phi.lhs.clone(), fresh)));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use analysis::calling_convention::CallingConventionType;
    use il::*;
    use ssa;

    /// A diamond assigning the same location in both arms. After
    /// destruction no subscripts remain and the phi has been resolved.
    fn diamond() -> (Procedure, StatementId) {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let head = proc.add_fragment(FragmentKind::Taken);
        let arm0 = proc.add_fragment(FragmentKind::Fall);
        let arm1 = proc.add_fragment(FragmentKind::Fall);
        let join = proc.add_fragment(FragmentKind::Ret);

        proc.push_branch(head, Expression::cmp_eq(reg(25), expr_const(0, 32)),
                         expr_const(0x1010, 32)).unwrap();
        proc.push_assign(arm0, reg(24), expr_const(1, 32)).unwrap();
        proc.push_assign(arm1, reg(24), expr_const(2, 32)).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(::types::Type::Void, reg(24),
                                   Some(reg(24))));
        let ret_id = proc.push_return(join, ret).unwrap();

        proc.cfg_mut().add_edge(head, arm0, EdgeKind::Fall).unwrap();
        proc.cfg_mut().add_edge(head, arm1, EdgeKind::Taken).unwrap();
        proc.cfg_mut().add_edge(arm0, join, EdgeKind::Fall).unwrap();
        proc.cfg_mut().add_edge(arm1, join, EdgeKind::Fall).unwrap();
        (proc, ret_id)
    }

    /// Operands and destination all collapse to one base: the phi is
    /// removed entirely.
    #[test]
    fn phi_collapse_removes_the_phi() {
        let (mut proc, _) = diamond();
        ssa::construct(&mut proc).unwrap();
        destroy(&mut proc).unwrap();

        // The two arm definitions of r24 never interfere (neither is
        // live in the other arm), so every version keeps the base name
        // and the phi collapses away.
        assert!(proc.statements().into_iter().all(|s| !s.is_phi()));
        for statement in proc.statements() {
            for e in statement.expressions() {
                assert!(e.refs().is_empty(),
                        "subscript survived destruction: {}", e);
            }
        }
    }

    /// Type-incompatible definitions of one base location split into
    /// different locals, but a void-typed definition raises no
    /// interference.
    #[test]
    fn void_definitions_raise_no_type_interference() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        let s0 = proc.push_typed_assign(
            frag, ::types::Type::float(64), reg(24),
            Expression::constant(Constant::float(1.0, 64))).unwrap();
        let s1 = proc.push_assign(frag, reg(24), expr_const(2, 32)).unwrap();
        let s2 = proc.push_typed_assign(
            frag, ::types::Type::string(), reg(24),
            expr_str("x")).unwrap();
        proc.push_return(frag, ReturnStatement::new()).unwrap();

        let mut ig = ConnectionGraph::new();
        super::split_type_incompatible_ranges(&proc, &mut ig).unwrap();

        // The void definition is ignored; the string definition
        // conflicts with the first (float) type.
        assert!(!ig.is_connected(
            &Expression::subscript(reg(24), Some(s1)),
            &Expression::subscript(reg(24), Some(s0))));
        assert!(ig.is_connected(
            &Expression::subscript(reg(24), Some(s2)),
            &Expression::subscript(reg(24), Some(s0))));
    }

    /// Destruction aborts when a reference lacks a definition.
    #[test]
    fn destruction_requires_refs_to_have_defs() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        // A dangling reference: no such statement id.
        proc.push_assign(
            frag,
            reg(24),
            Expression::subscript(reg(25), Some(StatementId(9999))))
            .unwrap();
        proc.push_return(frag, ReturnStatement::new()).unwrap();

        assert!(destroy(&mut proc).is_err());
    }

    /// Operands with distinct names force a fresh local with copies
    /// after each operand definition.
    #[test]
    fn phi_with_distinct_operands_goes_through_a_temporary() {
        let (mut proc, _) = diamond();
        ssa::construct(&mut proc).unwrap();

        // Name the two operand definitions and the destination apart.
        let phi_id = proc.statements().into_iter()
            .find(|s| s.is_phi()).unwrap().id();
        let phi = proc.statement(phi_id).unwrap().phi().unwrap().clone();
        let defs: Vec<StatementId> =
            phi.operands().iter().map(|o| o.def().unwrap()).collect();
        proc.map_symbol_to(
            Expression::subscript(reg(24), Some(defs[0])), "a");
        proc.map_symbol_to(
            Expression::subscript(reg(24), Some(defs[1])), "b");
        proc.map_symbol_to(
            Expression::subscript(reg(24), Some(phi_id)), "c");

        destroy(&mut proc).unwrap();

        // The phi became `c := localN`, with copies `localN := a` and
        // `localN := b` after the operand definitions.
        let phi_stmt = proc.statement(phi_id).unwrap();
        assert!(phi_stmt.is_assign());
        let (lhs, rhs) = match *phi_stmt.kind() {
            StatementKind::Assign(ref assign) =>
                (assign.lhs.clone(), assign.rhs.clone()),
            _ => unreachable!()
        };
        assert_eq!(lhs, local("c"));
        let fresh = rhs.clone();
        assert!(fresh.get_location().map(|l| l.name().is_some())
                .unwrap_or(false));

        let copies: Vec<&Statement> = proc.statements()
            .into_iter()
            .filter(|s| match *s.kind() {
                StatementKind::Assign(ref assign) => assign.lhs == fresh,
                _ => false
            })
            .collect();
        assert_eq!(copies.len(), 2);
        let sources: Vec<Expression> = copies.iter()
            .map(|s| match *s.kind() {
                StatementKind::Assign(ref assign) => assign.rhs.clone(),
                _ => unreachable!()
            })
            .collect();
        assert!(sources.contains(&local("a")));
        assert!(sources.contains(&local("b")));
    }

    /// Destruction followed by reconstruction reproduces an equivalent
    /// def-use graph: the same number of merge points, and every use
    /// resolving to a unique definition again.
    #[test]
    fn destruction_then_reconstruction_preserves_def_use_shape() {
        let (mut proc, _) = diamond();
        ssa::construct(&mut proc).unwrap();
        let phis_before = proc.statements().iter()
            .filter(|s| s.is_phi()).count();
        let ref_count_before: usize = proc.statements().iter()
            .map(|s| s.used_refs().len())
            .sum();

        destroy(&mut proc).unwrap();
        ssa::construct(&mut proc).unwrap();
        proc.verify_ssa().unwrap();
        proc.check_numbering().unwrap();

        let phis_after = proc.statements().iter()
            .filter(|s| s.is_phi()).count();
        let ref_count_after: usize = proc.statements().iter()
            .map(|s| s.used_refs().len())
            .sum();
        assert_eq!(phis_before, phis_after);
        assert_eq!(ref_count_before, ref_count_after);
    }

    /// Operands and destination already mapped to one name share a
    /// base location, so the phi is removed outright.
    #[test]
    fn phi_collapse_when_renamed_to_one_local() {
        let (mut proc, _) = diamond();
        ssa::construct(&mut proc).unwrap();

        let phi_id = proc.statements().into_iter()
            .find(|s| s.is_phi()).unwrap().id();
        let phi = proc.statement(phi_id).unwrap().phi().unwrap().clone();
        for operand in phi.operands() {
            proc.map_symbol_to(operand.exp.clone(), "x");
        }
        proc.map_symbol_to(
            Expression::subscript(reg(24), Some(phi_id)), "x");

        destroy(&mut proc).unwrap();
        assert!(!proc.has_statement(phi_id));
    }
}
