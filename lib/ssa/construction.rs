//! SSA construction: phi placement at iterated dominance frontiers,
//! followed by renaming along the dominator tree.
//!
//! After construction, every use in the procedure is a subscripted
//! reference to its unique defining statement. A use with no definition
//! on some path resolves to an implicit assign inserted at the entry
//! fragment, representing the location's value on entry.
//!
//! Calls whose defines list is still empty (childless calls) are treated
//! as defining every location: a use downstream of one resolves to the
//! call, and the call's defines list grows to match.

use error::*;
use il::*;
use std::collections::{BTreeMap, BTreeSet};

/// Transform a procedure into SSA form. The procedure must contain no
/// subscripted references; re-entry after structural change goes through
/// `Procedure::clear_ssa` first.
pub fn construct(procedure: &mut Procedure) -> Result<()> {
    let dominance = procedure.cfg_mut().dominance()?;

    place_phis(procedure, &dominance.frontiers)?;

    let entry = match procedure.cfg().entry() {
        Some(entry) => entry,
        None => bail!(ErrorKind::InvariantViolation(format!(
            "procedure {} has no entry fragment", procedure.name())))
    };
    let mut renamer = Renamer::new();
    renamer.rename_fragment(procedure, &dominance.children, entry)?;

    procedure.number_statements()?;
    procedure.verify_ssa()
}

/// True for locations that merge through phi-assigns. Memory locations
/// only qualify at constant addresses; other memory uses still receive
/// subscripts, but merge points fall back to implicit definitions.
fn phi_eligible(base: &Expression) -> bool {
    match base.get_location() {
        Some(&Location::Memory(ref address)) => address.is_constant(),
        Some(_) => true,
        None => false
    }
}

fn place_phis(
    procedure: &mut Procedure,
    frontiers: &BTreeMap<usize, BTreeSet<usize>>
) -> Result<()> {
    // Which fragments define which locations.
    let mut defs: BTreeMap<Expression, BTreeSet<usize>> = BTreeMap::new();
    for statement in procedure.statements() {
        for base in statement.defined_locations() {
            if phi_eligible(base) {
                defs.entry(base.clone())
                    .or_insert_with(BTreeSet::new)
                    .insert(statement.fragment());
            }
        }
    }

    for (base, def_fragments) in defs {
        let mut worklist: Vec<usize> = def_fragments.iter().cloned().collect();
        let mut placed: BTreeSet<usize> = BTreeSet::new();
        while let Some(fragment) = worklist.pop() {
            let frontier = match frontiers.get(&fragment) {
                Some(frontier) => frontier,
                None => continue
            };
            for &join in frontier {
                if !placed.insert(join) {
                    continue;
                }
                trace!("phi for {} at fragment {}", base, join);
                procedure.insert_phi_at_head(join, base.clone())?;
                // The phi is itself a definition; iterate.
                if !def_fragments.contains(&join) {
                    worklist.push(join);
                }
            }
        }
    }
    Ok(())
}


struct Renamer {
    /// Per-location stacks of (definition, push time).
    stacks: BTreeMap<Expression, Vec<(StatementId, u64)>>,
    /// Childless calls in scope, which define everything.
    childless: Vec<(StatementId, u64)>,
    /// The implicit assign created for each location used before any
    /// definition.
    implicits: BTreeMap<Expression, StatementId>,
    counter: u64
}

impl Renamer {
    fn new() -> Renamer {
        Renamer {
            stacks: BTreeMap::new(),
            childless: Vec::new(),
            implicits: BTreeMap::new(),
            counter: 0
        }
    }

    fn rename_fragment(
        &mut self,
        procedure: &mut Procedure,
        children: &BTreeMap<usize, Vec<usize>>,
        index: usize
    ) -> Result<()> {
        let mut pushed: Vec<Expression> = Vec::new();
        let childless_depth = self.childless.len();

        let statements = procedure.cfg().fragment(index)?.statements();
        for id in statements {
            let kind = procedure.statement(id)?.kind().clone();
            let kind = self.rename_kind(procedure, kind)?;
            procedure.statement_mut(id)?.set_kind(kind);

            // Now push this statement's definitions.
            let bases: Vec<Expression> = procedure.statement(id)?
                .defined_locations()
                .into_iter()
                .cloned()
                .collect();
            for base in bases {
                self.counter += 1;
                self.stacks.entry(base.clone())
                    .or_insert_with(Vec::new)
                    .push((id, self.counter));
                pushed.push(base);
            }
            let defines_all = procedure.statement(id)?
                .call()
                .map(|call| call.defines().is_empty())
                .unwrap_or(false);
            if defines_all {
                self.counter += 1;
                self.childless.push((id, self.counter));
            }
        }

        // Fill in the phi operands of every CFG successor for the edge
        // from this fragment.
        let successors = procedure.cfg().successor_indices(index)?;
        for successor in successors {
            let mut phis: Vec<(StatementId, Expression)> = Vec::new();
            for id in procedure.cfg().fragment(successor)?.statements() {
                let statement = procedure.statement(id)?;
                match statement.phi() {
                    Some(phi) => phis.push((id, phi.lhs.clone())),
                    None => {
                        if !statement.is_implicit() {
                            break;
                        }
                    }
                }
            }
            for (phi_id, base) in phis {
                let def = self.resolve(procedure, base.clone())?;
                let exp = Expression::subscript(base, Some(def));
                match procedure.statement_mut(phi_id)?.phi_mut() {
                    Some(phi) => phi.set_operand(index, exp),
                    None => {}
                }
            }
        }

        // Recurse into dominator-tree children.
        if let Some(tree_children) = children.get(&index).cloned() {
            for child in tree_children {
                self.rename_fragment(procedure, children, child)?;
            }
        }

        // Pop this fragment's definitions on exit.
        for base in pushed {
            if let Some(stack) = self.stacks.get_mut(&base) {
                stack.pop();
            }
        }
        self.childless.truncate(childless_depth);
        Ok(())
    }

    /// The definition a use of `base` resolves to at the current point:
    /// the latest same-location definition or childless call in scope,
    /// else the location's implicit entry definition.
    fn resolve(&mut self, procedure: &mut Procedure, base: Expression)
        -> Result<StatementId> {

        let stack_top = self.stacks.get(&base)
            .and_then(|stack| stack.last())
            .cloned();
        let childless_top = self.childless.last().cloned();
        let chosen = match (stack_top, childless_top) {
            (Some((def, t0)), Some((call, t1))) =>
                if t1 > t0 { Some((call, true)) } else { Some((def, false)) },
            (Some((def, _)), None) => Some((def, false)),
            (None, Some((call, _))) => Some((call, true)),
            (None, None) => None
        };
        match chosen {
            Some((def, is_call)) => {
                if is_call {
                    // The call now visibly defines this location.
                    if let Some(call) =
                        procedure.statement_mut(def)?.call_mut() {
                        let defined = call.defines().iter()
                            .any(|define| define.lhs == base);
                        if !defined {
                            call.add_define(Define::implicit(base));
                        }
                    }
                }
                Ok(def)
            },
            None => self.implicit_for(procedure, base)
        }
    }

    fn implicit_for(&mut self, procedure: &mut Procedure, base: Expression)
        -> Result<StatementId> {

        if let Some(&id) = self.implicits.get(&base) {
            return Ok(id);
        }
        let id = procedure.insert_implicit_at_entry(base.clone())?;
        self.implicits.insert(base, id);
        Ok(id)
    }

    /// Wrap a use of a (fully renamed) location in a subscripted
    /// reference to its definition.
    fn rename_use(&mut self, procedure: &mut Procedure, base: Expression)
        -> Result<Expression> {

        let def = self.resolve(procedure, base.clone())?;
        Ok(Expression::subscript(base, Some(def)))
    }

    /// Rename every use within an expression, bottom-up: memory
    /// addresses are renamed before the memory location itself, so the
    /// rename stacks are keyed by fully renamed location forms.
    fn rename_exp(&mut self, procedure: &mut Procedure, e: Expression)
        -> Result<Expression> {

        Ok(match e {
            Expression::Constant(_) | Expression::Terminal(_) => e,
            Expression::Unary { op, operand } => Expression::Unary {
                op: op,
                operand: Box::new(self.rename_exp(procedure, *operand)?)
            },
            Expression::Binary { op, lhs, rhs } => Expression::Binary {
                op: op,
                lhs: Box::new(self.rename_exp(procedure, *lhs)?),
                rhs: Box::new(self.rename_exp(procedure, *rhs)?)
            },
            Expression::Ternary { op, cond, then, otherwise } =>
                Expression::Ternary {
                    op: op,
                    cond: Box::new(self.rename_exp(procedure, *cond)?),
                    then: Box::new(self.rename_exp(procedure, *then)?),
                    otherwise:
                        Box::new(self.rename_exp(procedure, *otherwise)?)
                },
            Expression::Location(location) => {
                let base = match location {
                    Location::Memory(address) => mem(
                        self.rename_exp(procedure, *address)?),
                    location => Expression::Location(location)
                };
                self.rename_use(procedure, base)?
            },
            // Already-subscripted uses only arise transiently (e.g.
            // synthesized variadic arguments); leave them alone.
            Expression::Ref { base, def } =>
                Expression::Ref { base: base, def: def },
            Expression::Typed { ty, operand } => Expression::Typed {
                ty: ty,
                operand: Box::new(self.rename_exp(procedure, *operand)?)
            },
            Expression::SizeCast { bits, operand } => Expression::SizeCast {
                bits: bits,
                operand: Box::new(self.rename_exp(procedure, *operand)?)
            }
        })
    }

    /// Rename the lhs of a definition: the location itself stays bare,
    /// but the address of a memory write is a use.
    fn rename_def_lhs(&mut self, procedure: &mut Procedure, lhs: Expression)
        -> Result<Expression> {

        Ok(match lhs {
            Expression::Location(Location::Memory(address)) =>
                mem(self.rename_exp(procedure, *address)?),
            lhs => lhs
        })
    }

    fn rename_kind(&mut self, procedure: &mut Procedure, kind: StatementKind)
        -> Result<StatementKind> {

        Ok(match kind {
            StatementKind::Assign(assign) => {
                let rhs = self.rename_exp(procedure, assign.rhs)?;
                let lhs = self.rename_def_lhs(procedure, assign.lhs)?;
                StatementKind::Assign(Assign {
                    ty: assign.ty,
                    lhs: lhs,
                    rhs: rhs
                })
            },
            StatementKind::BoolAssign(assign) => {
                let rhs = self.rename_exp(procedure, assign.rhs)?;
                let lhs = self.rename_def_lhs(procedure, assign.lhs)?;
                StatementKind::BoolAssign(Assign {
                    ty: assign.ty,
                    lhs: lhs,
                    rhs: rhs
                })
            },
            StatementKind::Goto(goto) => {
                let dest = self.rename_exp(procedure, goto.dest)?;
                StatementKind::Goto(GotoStatement {
                    dest: dest,
                    computed: goto.computed,
                    switch_info: goto.switch_info
                })
            },
            StatementKind::Branch(branch) => {
                let condition =
                    self.rename_exp(procedure, branch.condition)?;
                StatementKind::Branch(BranchStatement {
                    condition: condition,
                    dest: branch.dest
                })
            },
            StatementKind::Call(mut call) => {
                let dest = self.rename_exp(procedure, call.dest().clone())?;
                let computed = call.is_computed();
                call.set_dest(dest);
                call.set_computed(computed);
                let arguments: Result<Vec<Assign>> = call.arguments()
                    .to_vec()
                    .into_iter()
                    .map(|argument| {
                        let rhs = self.rename_exp(procedure, argument.rhs)?;
                        let lhs =
                            self.rename_def_lhs(procedure, argument.lhs)?;
                        Ok(Assign { ty: argument.ty, lhs: lhs, rhs: rhs })
                    })
                    .collect();
                call.set_arguments(arguments?);
                StatementKind::Call(call)
            },
            StatementKind::Return(mut ret) => {
                for define in &mut ret.returns {
                    if let Some(rhs) = define.rhs.take() {
                        define.rhs =
                            Some(self.rename_exp(procedure, rhs)?);
                    }
                }
                StatementKind::Return(ret)
            },
            // Phi operands are filled from predecessor edges; implicit
            // assigns define without using.
            kind => kind
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use analysis::calling_convention::CallingConventionType;
    use il::*;

    /// r24 defined in both arms of a diamond and used after the join
    /// gets a phi at the join, and every use resolves to a definition.
    #[test]
    fn diamond_inserts_phi_at_join() {
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
        proc.push_return(join, ret).unwrap();

        let cfg = proc.cfg_mut();
        cfg.add_edge(head, arm0, EdgeKind::Fall).unwrap();
        cfg.add_edge(head, arm1, EdgeKind::Taken).unwrap();
        cfg.add_edge(arm0, join, EdgeKind::Fall).unwrap();
        cfg.add_edge(arm1, join, EdgeKind::Fall).unwrap();

        construct(&mut proc).unwrap();

        // One phi for r24 at the join, with one operand per predecessor.
        let phis: Vec<&Statement> = proc.statements()
            .into_iter()
            .filter(|s| s.is_phi())
            .collect();
        assert_eq!(phis.len(), 1);
        assert_eq!(phis[0].fragment(), join);
        let phi = phis[0].phi().unwrap();
        assert_eq!(phi.lhs, reg(24));
        assert_eq!(phi.operands().len(), 2);
        assert!(phi.defs_same_base());

        // Invariants: every use resolves, numbering is a bijection.
        assert!(proc.all_refs_have_defs());
        proc.check_phi_arities().unwrap();
        proc.check_numbering().unwrap();
    }

    /// A location used before any definition resolves to an implicit
    /// assign at the entry.
    #[test]
    fn use_before_def_creates_implicit_assign() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        let s = proc.push_assign(frag, reg(24),
                                 Expression::add(reg(25), expr_const(1, 32)))
            .unwrap();
        proc.push_return(frag, ReturnStatement::new()).unwrap();

        construct(&mut proc).unwrap();

        let implicits: Vec<&Statement> = proc.statements()
            .into_iter()
            .filter(|s| s.is_implicit())
            .collect();
        assert_eq!(implicits.len(), 1);
        assert_eq!(implicits[0].defined_locations(), vec![&reg(25)]);

        let rhs_refs = proc.statement(s).unwrap().used_refs();
        assert_eq!(rhs_refs.len(), 1);
        assert_eq!(rhs_refs[0].ref_base(), Some(&reg(25)));
        assert_eq!(rhs_refs[0].ref_def(), Some(implicits[0].id()));
    }

    /// A use downstream of a childless call resolves to the call, and
    /// the call's defines list grows to record it.
    #[test]
    fn childless_call_defines_everything() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Call);
        let ret_frag = proc.add_fragment(FragmentKind::Ret);

        proc.push_assign(frag, reg(27), expr_const(3, 32)).unwrap();
        let call_id = proc.push_call(
            frag, CallStatement::to_address(0x2000)).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(::types::Type::Void, reg(27),
                                   Some(reg(27))));
        proc.push_return(ret_frag, ret).unwrap();
        proc.cfg_mut().add_edge(frag, ret_frag, EdgeKind::CallReturn).unwrap();

        construct(&mut proc).unwrap();

        // The return's use of r27 resolves to the call, not to the
        // assignment above it.
        let ret_stmt = proc.statements().into_iter()
            .find(|s| s.is_return())
            .unwrap()
            .id();
        let refs = proc.statement(ret_stmt).unwrap().used_refs();
        assert_eq!(refs[0].ref_def(), Some(call_id));

        let call = proc.statement(call_id).unwrap();
        assert!(call.call().unwrap().defines().iter()
                .any(|define| define.lhs == reg(27)));
    }

    /// Straight-line redefinition: the second definition shadows the
    /// first, uses in between reference the first.
    #[test]
    fn straight_line_versions() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        let s0 = proc.push_assign(frag, reg(24), expr_const(1, 32)).unwrap();
        let s1 = proc.push_assign(frag, reg(25), reg(24)).unwrap();
        let s2 = proc.push_assign(frag, reg(24), expr_const(2, 32)).unwrap();
        let s3 = proc.push_assign(frag, reg(26), reg(24)).unwrap();
        proc.push_return(frag, ReturnStatement::new()).unwrap();

        construct(&mut proc).unwrap();

        let use_of = |id: StatementId| -> StatementId {
            proc.statement(id).unwrap().used_refs()[0].ref_def().unwrap()
        };
        assert_eq!(use_of(s1), s0);
        assert_eq!(use_of(s3), s2);
    }
}
