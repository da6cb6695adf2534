//! Call and return reconciliation.
//!
//! `CallDefineUpdate` runs on the caller side: it resolves direct call
//! destinations, registers caller/callee edges, refreshes call
//! signatures from the callee, and seeds argument and define lists.
//! `ReturnInference` runs on the callee side: it trims the conservative
//! seeded returns down to the locations callers actually consume,
//! dropping locations proven preserved.

use error::*;
use il::*;
use passes::{Pass, PassChange, PassContext, PassId};
use std::collections::BTreeSet;

pub struct CallDefineUpdate;

impl Pass for CallDefineUpdate {
    fn id(&self) -> PassId {
        PassId::CallDefineUpdate
    }

    fn execute(&self, procedure: &mut Procedure, ctx: &mut PassContext)
        -> Result<PassChange> {

        let my_address = procedure.address();
        let call_ids: Vec<StatementId> = procedure.statements()
            .into_iter()
            .filter(|statement| statement.is_call())
            .map(|statement| statement.id())
            .collect();
        let mut progress = false;

        for id in call_ids {
            // Resolve a constant destination to a known procedure.
            let dest_address = {
                let call = procedure.statement(id)?.call()
                    .expect("filtered to calls");
                if call.dest_proc().is_none() {
                    call.dest().int_value()
                }
                else {
                    None
                }
            };
            if let Some(address) = dest_address {
                if ctx.program.has_procedure(address) || address == my_address {
                    procedure.statement_mut(id)?.call_mut().unwrap()
                        .set_dest_proc(CalleeRef::User(address));
                    progress = true;
                }
            }

            // Register the call edge both ways.
            let callee = procedure.statement(id)?.call()
                .and_then(|call| call.dest_proc().cloned());
            match callee {
                Some(CalleeRef::User(address)) => {
                    procedure.add_callee(address);
                    if let Some(callee) = ctx.program.procedure_mut(address) {
                        callee.add_caller(my_address);
                    }
                    progress |=
                        refresh_from_user_callee(procedure, ctx, id, address)?;
                },
                Some(CalleeRef::Library(name)) => {
                    progress |=
                        refresh_from_library(procedure, ctx, id, &name)?;
                },
                None => {}
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

fn refresh_from_library(
    procedure: &mut Procedure,
    ctx: &PassContext,
    id: StatementId,
    name: &str
) -> Result<bool> {
    let signature = match ctx.program.library_signature(name) {
        Some(signature) => signature.clone(),
        None => return Ok(false)
    };
    let call = procedure.statement_mut(id)?.call_mut()
        .expect("filtered to calls");
    if call.signature().is_none() {
        call.set_sig_arguments(&signature);
        // Phrase the seeded argument values in the caller's context.
        let localised: Vec<Assign> = call.arguments()
            .to_vec()
            .into_iter()
            .map(|argument| {
                let rhs = call.localise_exp(argument.rhs);
                Assign { ty: argument.ty, lhs: argument.lhs, rhs: rhs }
            })
            .collect();
        call.set_arguments(localised);
        return Ok(true);
    }
    Ok(false)
}

fn refresh_from_user_callee(
    procedure: &mut Procedure,
    ctx: &PassContext,
    id: StatementId,
    address: u64
) -> Result<bool> {
    let (signature, ret_id) = {
        let callee = match ctx.program.procedure(address) {
            Some(callee) => callee,
            None => return Ok(false)
        };
        match callee.status() {
            ProcedureStatus::EarlyDone | ProcedureStatus::FinalDone => {},
            _ => return Ok(false)
        }
        let ret_id = callee.statements()
            .into_iter()
            .find(|statement| statement.is_return())
            .map(|statement| statement.id());
        (callee.signature().clone(), ret_id)
    };

    let call = procedure.statement_mut(id)?.call_mut()
        .expect("filtered to calls");
    let mut progress = false;

    if let Some(ret_id) = ret_id {
        if call.callee_return() != Some((address, ret_id)) {
            call.set_callee_return(address, ret_id);
            progress = true;
        }
    }
    if call.signature() != Some(&signature) {
        call.set_signature(signature.clone());
        progress = true;
    }
    if call.defines().is_empty() && !signature.returns().is_empty() {
        for &(ref exp, ref ty) in signature.returns() {
            call.add_define(Define::new(ty.clone(), exp.clone(), None));
        }
        progress = true;
    }
    if call.arguments().is_empty() && !signature.parameters().is_empty() {
        let arguments: Vec<Assign> = signature.parameters()
            .iter()
            .map(|parameter| {
                let rhs = call.localise_exp(parameter.exp.clone());
                Assign {
                    ty: parameter.ty.clone(),
                    lhs: parameter.exp.clone(),
                    rhs: rhs
                }
            })
            .collect();
        call.set_arguments(arguments);
        progress = true;
    }
    Ok(progress)
}


pub struct ReturnInference;

impl Pass for ReturnInference {
    fn id(&self) -> PassId {
        PassId::ReturnInference
    }

    fn execute(&self, procedure: &mut Procedure, ctx: &mut PassContext)
        -> Result<PassChange> {

        let my_address = procedure.address();
        let convention = procedure.convention();

        // Union the locations our callers actually consume from calls to
        // us.
        let mut keep: BTreeSet<Expression> = BTreeSet::new();
        let mut have_callers = false;
        for &caller_address in procedure.callers() {
            if caller_address == my_address {
                // Self-recursion says nothing new about outside callers.
                continue;
            }
            let caller = match ctx.program.procedure(caller_address) {
                Some(caller) => caller,
                None => continue
            };
            for statement in caller.statements() {
                let call = match statement.call() {
                    Some(call) => call,
                    None => continue
                };
                if call.dest_proc() != Some(&CalleeRef::User(my_address)) {
                    continue;
                }
                have_callers = true;
                for use_ in call.use_collector().uses() {
                    let base = use_.ref_base().unwrap_or(use_);
                    keep.insert(base.clone().strip_subscripts());
                }
                for e in caller_used_bases(caller, statement.id()) {
                    keep.insert(e);
                }
            }
        }
        if !have_callers {
            keep.insert(convention.return_register().clone());
        }

        // Proven preservations are not results.
        let preserved: Vec<Expression> = procedure.signature().preserved()
            .iter()
            .filter(|&&(ref location, ref value)| location == value)
            .map(|&(ref location, _)| location.clone())
            .collect();
        for location in preserved {
            keep.remove(&location);
        }

        let ret_ids: Vec<StatementId> = procedure.statements()
            .into_iter()
            .filter(|statement| statement.is_return())
            .map(|statement| statement.id())
            .collect();
        let mut progress = false;
        let mut kept_types: Vec<(Expression, ::types::Type)> = Vec::new();
        for id in ret_ids {
            let statement = procedure.statement_mut(id)?;
            if let StatementKind::Return(ref mut ret) = *statement.kind_mut() {
                progress |= ret.update_returns(&keep);
                for define in &ret.returns {
                    if !kept_types.iter().any(|&(ref e, _)| e == &define.lhs) {
                        kept_types.push(
                            (define.lhs.clone(), define.ty.clone()));
                    }
                }
            }
        }

        if procedure.signature().returns() != &kept_types[..] {
            procedure.signature_mut().set_returns(kept_types);
            progress = true;
        }

        Ok(if progress {
            PassChange::PROGRESS
        }
        else {
            PassChange::empty()
        })
    }
}

/// The base locations a caller reads from the given call's defines.
fn caller_used_bases(caller: &Procedure, call_id: StatementId)
    -> Vec<Expression> {

    let mut bases = Vec::new();
    for statement in caller.statements() {
        for e in statement.used_expressions() {
            for r in e.refs() {
                if r.ref_def() == Some(call_id) {
                    if let Some(base) = r.ref_base() {
                        bases.push(base.clone().strip_subscripts());
                    }
                }
            }
        }
    }
    bases
}


#[cfg(test)]
mod tests {
    use super::*;
    use analysis::calling_convention::CallingConventionType;
    use il::*;
    use passes::{PassContext, Settings};
    use types::Type;

    /// A library call picks up its signature, arguments and defines from
    /// the program's signature database.
    #[test]
    fn library_call_seeds_signature_arguments() {
        let mut program = Program::new("test", Image::empty());
        let mut signature =
            Signature::new("atoi", CallingConventionType::Cdecl);
        signature.add_parameter(
            "str",
            mem(Expression::add(reg(28), expr_const(4, 32))),
            Type::string());
        signature.add_return(reg(24), Type::signed(32));
        program.add_library_signature(signature);

        let mut proc =
            Procedure::new("caller", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Call);
        let mut call = CallStatement::to_address(0x5000);
        call.set_dest_proc(CalleeRef::Library("atoi".to_string()));
        let call_id = proc.push_call(frag, call).unwrap();
        let after = proc.add_fragment(FragmentKind::Ret);
        proc.push_return(after, ReturnStatement::new()).unwrap();
        proc.cfg_mut().add_edge(frag, after, EdgeKind::CallReturn).unwrap();

        let mut decoder = ::passes::indirect::tests::NullDecoder;
        let settings = Settings::default();
        {
            let mut ctx = PassContext {
                program: &mut program,
                decoder: &mut decoder,
                settings: &settings,
                cancel: None
            };
            let change =
                CallDefineUpdate.execute(&mut proc, &mut ctx).unwrap();
            assert!(change.contains(PassChange::PROGRESS));
        }

        let call = proc.statement(call_id).unwrap().call().unwrap().clone();
        assert_eq!(call.num_arguments(), 1);
        assert_eq!(call.defines().len(), 1);
        assert_eq!(call.defines()[0].lhs, reg(24));
        assert!(call.signature().is_some());
    }

    /// Returns are trimmed to what callers consume; with no callers the
    /// convention's return register is kept.
    #[test]
    fn returns_trim_to_consumed_locations() {
        let mut program = Program::new("test", Image::empty());
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(Type::Void, reg(24), Some(reg(24))));
        ret.add_return(Define::new(Type::Void, reg(26), Some(reg(26))));
        proc.push_return(frag, ret).unwrap();

        let mut decoder = ::passes::indirect::tests::NullDecoder;
        let settings = Settings::default();
        let mut ctx = PassContext {
            program: &mut program,
            decoder: &mut decoder,
            settings: &settings,
            cancel: None
        };
        let change = ReturnInference.execute(&mut proc, &mut ctx).unwrap();
        assert!(change.contains(PassChange::PROGRESS));

        let ret = proc.statements().into_iter()
            .find(|s| s.is_return()).unwrap();
        match *ret.kind() {
            StatementKind::Return(ref ret) => {
                assert_eq!(ret.returns.len(), 1);
                assert_eq!(ret.returns[0].lhs, reg(24));
            },
            _ => unreachable!()
        }
        assert_eq!(proc.signature().returns().len(), 1);
    }
}
