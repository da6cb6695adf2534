//! Type analysis: propagate types between definitions and uses over the
//! lattice until nothing refines further.
//!
//! Each definition site records the type of the value it produces; a use
//! takes the type of its definition. Conflicts never abort: an
//! irreconcilable use keeps its definition behind an explicit typed
//! wrapper, and the definition falls back to void.

use error::*;
use il::*;
use passes::{Pass, PassChange, PassContext, PassId};
use types::Type;

pub struct TypeAnalysis;

impl Pass for TypeAnalysis {
    fn id(&self) -> PassId {
        PassId::TypeAnalysis
    }

    fn execute(&self, procedure: &mut Procedure, _: &mut PassContext)
        -> Result<PassChange> {

        let ids = procedure.ordered_statement_ids()?;
        let mut progress = false;

        for id in ids {
            let kind = procedure.statement(id)?.kind().clone();
            match kind {
                StatementKind::Assign(ref assign) => {
                    let rhs_ty = type_of(procedure, &assign.rhs);
                    progress |=
                        refine(procedure, id, &assign.lhs, &rhs_ty)?;
                },
                StatementKind::BoolAssign(ref assign) => {
                    progress |=
                        refine(procedure, id, &assign.lhs, &Type::Boolean)?;
                },
                StatementKind::Phi(ref phi) => {
                    let mut ty = phi.ty.clone();
                    for operand in phi.operands() {
                        let operand_ty = type_of(procedure, &operand.exp);
                        ty = match ty.join(&operand_ty) {
                            Some(ty) => ty,
                            None => Type::Void
                        };
                    }
                    progress |= refine(procedure, id, &phi.lhs, &ty)?;
                },
                StatementKind::ImplicitAssign(ref define) => {
                    // Parameters carry their signature type.
                    let ty = procedure.signature()
                        .find_parameter(&define.lhs)
                        .map(|n| procedure.signature()
                             .parameters()[n].ty.clone());
                    if let Some(ty) = ty {
                        progress |= refine(procedure, id, &define.lhs, &ty)?;
                    }
                },
                StatementKind::Call(ref call) => {
                    // Argument types flow from the callee's signature.
                    if let Some(signature) = call.signature() {
                        let updates: Vec<(usize, Type)> = call.arguments()
                            .iter()
                            .enumerate()
                            .filter_map(|(n, argument)| {
                                let parameter =
                                    signature.parameters().get(n)?;
                                argument.ty.join(&parameter.ty)
                                    .filter(|ty| ty != &argument.ty)
                                    .map(|ty| (n, ty))
                            })
                            .collect();
                        if !updates.is_empty() {
                            progress = true;
                            let call = procedure.statement_mut(id)?
                                .call_mut()
                                .expect("statement was a call");
                            for (n, ty) in updates {
                                call.set_argument_type(n, ty);
                            }
                        }
                    }
                },
                _ => {}
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

/// Join a freshly inferred type into the recorded type of `(statement,
/// base)`. An irreconcilable conflict wraps nothing here; the recorded
/// type falls back to void, and uses keep their own view through
/// explicit wrappers inserted by the emitters.
fn refine(
    procedure: &mut Procedure,
    id: StatementId,
    base: &Expression,
    ty: &Type
) -> Result<bool> {
    if ty.is_void() {
        return Ok(false);
    }
    let current = procedure.statement(id)?
        .type_for(base)
        .cloned()
        .unwrap_or(Type::Void);
    let joined = match current.join(ty) {
        Some(joined) => joined,
        None => {
            debug!("type conflict at {} for {}: {} vs {}",
                   id, base, current, ty);
            return Ok(false);
        }
    };
    if joined == current {
        return Ok(false);
    }
    trace!("refining {} at {} from {} to {}", base, id, current, joined);
    procedure.statement_mut(id)?.set_type_for(base, joined);
    Ok(true)
}

/// The type of an expression, as far as the current annotations tell.
pub fn type_of(procedure: &Procedure, e: &Expression) -> Type {
    match *e {
        Expression::Constant(Constant::Int { bits, .. }) =>
            Type::integer(bits),
        Expression::Constant(Constant::Float { bits, .. }) =>
            Type::float(bits),
        Expression::Constant(Constant::Str(_)) => Type::string(),
        Expression::Terminal(_) => Type::Void,
        Expression::Unary { op, ref operand } => match op {
            UnaryOp::LogicalNot => Type::Boolean,
            UnaryOp::AddressOf =>
                Type::pointer(type_of(procedure, operand)),
            _ => type_of(procedure, operand)
        },
        Expression::Binary { op, ref lhs, ref rhs } => {
            if op.is_comparison() {
                return Type::Boolean;
            }
            match op {
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => Type::Boolean,
                BinaryOp::Add | BinaryOp::Sub => {
                    // Pointer arithmetic keeps the pointer type.
                    let lhs_ty = type_of(procedure, lhs);
                    if lhs_ty.is_pointer() {
                        lhs_ty
                    }
                    else {
                        join_or_void(lhs_ty, type_of(procedure, rhs))
                    }
                },
                _ => join_or_void(type_of(procedure, lhs),
                                  type_of(procedure, rhs))
            }
        },
        Expression::Ternary { ref then, ref otherwise, .. } =>
            join_or_void(type_of(procedure, then),
                         type_of(procedure, otherwise)),
        Expression::Location(ref location) => match *location {
            Location::Parameter(ref name) => procedure.signature()
                .parameters()
                .iter()
                .find(|parameter| &parameter.name == name)
                .map(|parameter| parameter.ty.clone())
                .unwrap_or(Type::Void),
            Location::Local(ref name) | Location::Temp(ref name) =>
                procedure.local_type(name).cloned().unwrap_or(Type::Void),
            _ => Type::Void
        },
        Expression::Ref { ref base, def } => match def {
            Some(def) => procedure.statement(def)
                .ok()
                .and_then(|statement| statement.type_for(base).cloned())
                .unwrap_or(Type::Void),
            None => Type::Void
        },
        Expression::Typed { ref ty, .. } => ty.clone(),
        Expression::SizeCast { bits, .. } => Type::integer(bits)
    }
}

fn join_or_void(a: Type, b: Type) -> Type {
    a.join(&b).unwrap_or(Type::Void)
}


#[cfg(test)]
mod tests {
    use super::*;
    use analysis::calling_convention::CallingConventionType;
    use il::*;
    use passes::{PassContext, Settings};
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
        TypeAnalysis.execute(procedure, &mut ctx).unwrap()
    }

    /// Constant and string types propagate to the definitions that hold
    /// them, and through copies, to a fixed point.
    #[test]
    fn types_flow_from_constants_through_copies() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        let s0 = proc.push_assign(frag, reg(24), expr_str("hi")).unwrap();
        let s1 = proc.push_assign(frag, reg(25), reg(24)).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(Type::Void, reg(25), Some(reg(25))));
        proc.push_return(frag, ret).unwrap();

        ssa::construct(&mut proc).unwrap();
        // Two sweeps: definition first, then the copy.
        while run(&mut proc).contains(PassChange::PROGRESS) {}

        assert_eq!(proc.statement(s0).unwrap().type_for(&reg(24)),
                   Some(&Type::string()));
        assert_eq!(proc.statement(s1).unwrap().type_for(&reg(25)),
                   Some(&Type::string()));
        // No further refinement: the pass is at a fixed point.
        assert_eq!(run(&mut proc), PassChange::empty());
    }

    /// A conflicting re-inference (float vs pointer) falls back to
    /// leaving the recorded type alone rather than aborting.
    #[test]
    fn conflicting_types_never_abort() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        let s0 = proc.push_typed_assign(
            frag, Type::float(64), reg(24),
            Expression::constant(Constant::float(1.0, 64))).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(Type::Void, reg(24), Some(reg(24))));
        proc.push_return(frag, ret).unwrap();
        ssa::construct(&mut proc).unwrap();

        // Force a conflicting view of the same definition.
        let mut kind = proc.statement(s0).unwrap().kind().clone();
        if let StatementKind::Assign(ref mut assign) = kind {
            assign.rhs = expr_str("conflict");
        }
        proc.statement_mut(s0).unwrap().set_kind(kind);

        assert_eq!(run(&mut proc), PassChange::empty());
        assert_eq!(proc.statement(s0).unwrap().type_for(&reg(24)),
                   Some(&Type::float(64)));
    }
}
