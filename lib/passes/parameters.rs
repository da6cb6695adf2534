//! Parameter inference: a location read before any definition, sitting
//! in an argument position of the calling convention, is a parameter.

use analysis::use_counts;
use error::*;
use il::*;
use passes::{Pass, PassChange, PassContext, PassId};
use types::Type;

pub struct ParameterInference;

impl Pass for ParameterInference {
    fn id(&self) -> PassId {
        PassId::ParameterInference
    }

    fn execute(&self, procedure: &mut Procedure, _: &mut PassContext)
        -> Result<PassChange> {

        let convention = procedure.convention();
        let counts = use_counts(procedure)?;

        // Every live implicit definition in an argument position.
        let mut found: Vec<(usize, Expression, StatementId, Type)> = Vec::new();
        for statement in procedure.statements() {
            let define = match *statement.kind() {
                StatementKind::ImplicitAssign(ref define) => define,
                _ => continue
            };
            if counts.get(&statement.id()).cloned().unwrap_or(0) == 0 {
                continue;
            }
            // Scratch registers per the convention are never parameters.
            if convention.is_trashed(&define.lhs).is_true() {
                continue;
            }
            let position = match convention.argument_position(&define.lhs) {
                Some(position) => position,
                None => continue
            };
            found.push((position, define.lhs.clone(), statement.id(),
                        define.ty.clone()));
        }
        found.sort_by_key(|&(position, ..)| position);

        let parameters: Vec<(Expression, Type)> = found.iter()
            .map(|&(_, ref lhs, def, ref ty)| {
                (Expression::subscript(lhs.clone(), Some(def)), ty.clone())
            })
            .collect();
        if parameters == procedure.parameters() {
            return Ok(PassChange::empty());
        }

        debug!("{} has {} parameters", procedure.name(), parameters.len());
        procedure.set_parameters(parameters.clone());

        // Rebuild the signature's parameter list and name the entry
        // references.
        procedure.signature_mut().parameters_mut().clear();
        for (n, &(_, ref lhs, def, ref ty)) in found.iter().enumerate() {
            let name = format!("param{}", n + 1);
            procedure.signature_mut()
                .add_parameter(name.clone(), lhs.clone(), ty.clone());
            procedure.map_symbol_to(
                Expression::subscript(lhs.clone(), Some(def)), name);
        }
        Ok(PassChange::PROGRESS)
    }
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
        ParameterInference.execute(procedure, &mut ctx).unwrap()
    }

    /// Stack slots read before definition become parameters, ordered by
    /// offset; a scratch register read early does not.
    #[test]
    fn stack_reads_become_parameters() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);

        // r24 := m[r28 + 8]; r25 := m[r28 + 4]; r24 := r24 + r25
        proc.push_assign(
            frag, reg(24),
            mem(Expression::add(reg(28), expr_const(8, 32)))).unwrap();
        proc.push_assign(
            frag, reg(25),
            mem(Expression::add(reg(28), expr_const(4, 32)))).unwrap();
        proc.push_assign(
            frag, reg(24),
            Expression::add(reg(24), reg(25))).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(Type::Void, reg(24), Some(reg(24))));
        proc.push_return(frag, ret).unwrap();

        ssa::construct(&mut proc).unwrap();
        let change = run(&mut proc);
        assert!(change.contains(PassChange::PROGRESS));

        // Two stack parameters, ordered m[r28+4] then m[r28+8]. The
        // stack pointer itself is not an argument location.
        let parameters = proc.parameters().to_vec();
        assert_eq!(parameters.len(), 2);
        let first = parameters[0].0.ref_base().unwrap().clone();
        let second = parameters[1].0.ref_base().unwrap().clone();
        assert!(first.to_string().contains("+ 4"));
        assert!(second.to_string().contains("+ 8"));

        assert_eq!(proc.signature().parameters().len(), 2);
        assert_eq!(proc.signature().parameters()[0].name, "param1");

        // Re-running infers the same parameters and reports no
        // progress.
        assert_eq!(run(&mut proc), PassChange::empty());
    }

    /// Argument registers under a register convention become parameters
    /// in register order.
    #[test]
    fn register_arguments_in_convention_order() {
        let mut proc =
            Procedure::new("f", 0x1000, CallingConventionType::MipsSystemV);
        let frag = proc.add_fragment(FragmentKind::Ret);
        // Uses $a1 then $a0.
        proc.push_assign(frag, reg(8),
                         Expression::add(reg(5), reg(4))).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(Type::Void, reg(2), Some(reg(8))));
        proc.push_return(frag, ret).unwrap();

        ssa::construct(&mut proc).unwrap();
        run(&mut proc);

        let parameters = proc.parameters().to_vec();
        assert_eq!(parameters.len(), 2);
        assert_eq!(parameters[0].0.ref_base(), Some(&reg(4)));
        assert_eq!(parameters[1].0.ref_base(), Some(&reg(5)));
    }
}
