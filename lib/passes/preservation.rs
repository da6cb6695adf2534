//! Preservation analysis: prove which locations leave the procedure with
//! the value they had on entry, and bypass calls in callers accordingly.
//!
//! The proof chases each candidate location's definition at every return
//! back to the procedure's entry: through copies, phi-assigns (all
//! operands must prove), and calls (the callee must itself prove the
//! location preserved; a recursive callee is assumed preserved and the
//! program-level fixed point validates the premise).

use error::*;
use il::*;
use passes::{Pass, PassChange, PassContext, PassId};
use std::collections::BTreeSet;

pub struct Preservation;

impl Pass for Preservation {
    fn id(&self) -> PassId {
        PassId::Preservation
    }

    fn execute(&self, procedure: &mut Procedure, ctx: &mut PassContext)
        -> Result<PassChange> {

        let convention = procedure.convention();
        let mut candidates: Vec<Expression> =
            convention.preserved_registers().iter().cloned().collect();
        let sp = convention.stack_pointer().clone();
        if !candidates.contains(&sp) {
            candidates.push(sp);
        }

        let mut proven: Vec<Expression> = Vec::new();
        for candidate in candidates {
            if prove_preserved(procedure, ctx, &candidate)? {
                proven.push(candidate);
            }
        }

        let mut progress = false;
        for location in proven {
            if procedure.signature().is_preserved(&location) {
                continue;
            }
            debug!("{} proves {} preserved", procedure.name(), location);
            procedure.signature_mut()
                .add_proven(location.clone(), location);
            progress = true;
        }
        if progress {
            let preserved = procedure.signature().preserved().to_vec();
            ctx.program.set_preservation(procedure.address(), preserved);
        }

        Ok(if progress {
            PassChange::PROGRESS
        }
        else {
            PassChange::empty()
        })
    }
}

/// True when every return's value for `location` chases back to the
/// location's value on entry.
fn prove_preserved(
    procedure: &Procedure,
    ctx: &PassContext,
    location: &Expression
) -> Result<bool> {
    let mut any_return = false;
    for statement in procedure.statements() {
        let ret = match *statement.kind() {
            StatementKind::Return(ref ret) => ret,
            _ => continue
        };
        any_return = true;
        let define = match ret.find_definition_for(location) {
            Some(define) => define,
            None => return Ok(false)
        };
        let value = match define.rhs {
            Some(ref value) => value,
            None => return Ok(false)
        };
        let mut visited = BTreeSet::new();
        if !chase(procedure, ctx, location, value, &mut visited)? {
            return Ok(false);
        }
    }
    Ok(any_return)
}

/// Chase a value expression back toward procedure entry. Proven when it
/// terminates at the implicit definition of `location`.
fn chase(
    procedure: &Procedure,
    ctx: &PassContext,
    location: &Expression,
    value: &Expression,
    visited: &mut BTreeSet<StatementId>
) -> Result<bool> {
    let def = match value.ref_def() {
        Some(def) => def,
        None => return Ok(false)
    };
    if !visited.insert(def) {
        // A cycle of copies or phis: optimistically proven, validated by
        // the outer fixed point.
        return Ok(true);
    }
    let base = match value.ref_base() {
        Some(base) => base,
        None => return Ok(false)
    };
    let statement = procedure.statement(def)?;
    match *statement.kind() {
        StatementKind::ImplicitAssign(ref define) =>
            Ok(&define.lhs == location),
        StatementKind::Assign(ref assign) => {
            if &assign.lhs != base {
                return Ok(false);
            }
            chase(procedure, ctx, location, &assign.rhs, visited)
        },
        StatementKind::Phi(ref phi) => {
            for operand in phi.operands() {
                if !chase(procedure, ctx, location, &operand.exp, visited)? {
                    return Ok(false);
                }
            }
            Ok(!phi.operands().is_empty())
        },
        StatementKind::Call(ref call) => {
            if !callee_preserves(procedure, ctx, call, base) {
                return Ok(false);
            }
            // The value before the call reaches through unchanged.
            match call.find_def_for(base) {
                Some(before) => {
                    let before = before.clone();
                    chase(procedure, ctx, location, &before, visited)
                },
                None => Ok(false)
            }
        },
        _ => Ok(false)
    }
}

fn callee_preserves(
    procedure: &Procedure,
    ctx: &PassContext,
    call: &CallStatement,
    location: &Expression
) -> bool {
    if let Some(signature) = call.signature() {
        if signature.is_preserved(location) {
            return true;
        }
    }
    match call.dest_proc() {
        Some(&CalleeRef::User(address)) => {
            if address == procedure.address() {
                // Recursion: assume the premise; the fixed point
                // validates it.
                return true;
            }
            match ctx.program.preservation(address) {
                Some(preserved) => preserved.iter()
                    .any(|&(ref l, ref v)| l == location && v == location),
                None => ctx.settings.assume_abi
                    && procedure.convention()
                        .is_preserved(location)
                        .is_true()
            }
        },
        Some(&CalleeRef::Library(ref name)) => {
            match ctx.program.library_signature(name) {
                Some(signature) => signature.is_preserved(location),
                None => ctx.settings.assume_abi
                    && procedure.convention()
                        .is_preserved(location)
                        .is_true()
            }
        },
        None => false
    }
}


/// Rewrite references whose definition is a call by the value the callee
/// proves preserved: `loc{call}` becomes the caller-side value before
/// the call. Copy propagation then removes the indirection.
pub struct CallBypass;

impl Pass for CallBypass {
    fn id(&self) -> PassId {
        PassId::CallBypass
    }

    fn execute(&self, procedure: &mut Procedure, _: &mut PassContext)
        -> Result<PassChange> {

        let ids = procedure.ordered_statement_ids()?;
        let mut progress = false;

        for id in ids {
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
                if def == id {
                    continue;
                }
                let replacement = {
                    let statement = procedure.statement(def)?;
                    match statement.call() {
                        Some(call) => call.bypass_ref(def, &r),
                        None => None
                    }
                };
                let replacement = match replacement {
                    Some(replacement) => replacement,
                    None => continue
                };
                debug!("bypassing {} with {}", r, replacement);
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


#[cfg(test)]
mod tests {
    use super::*;
    use analysis::calling_convention::CallingConventionType;
    use analysis::fill_call_collectors;
    use il::*;
    use passes::{PassContext, Settings};
    use ssa;

    fn with_ctx<F, R>(program: &mut Program, f: F) -> R
        where F: FnOnce(&mut PassContext) -> R {

        let mut decoder = ::passes::indirect::tests::NullDecoder;
        let settings = Settings::default();
        let mut ctx = PassContext {
            program: program,
            decoder: &mut decoder,
            settings: &settings,
            cancel: None
        };
        f(&mut ctx)
    }

    /// A register saved to the stack and restored before return is
    /// proven preserved.
    #[test]
    fn save_restore_is_proven_preserved() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);

        // m[r28 - 4] := r27 ; r27 := 7 ; r27 := m[r28 - 4] ; ret
        let slot = mem(Expression::sub(reg(28), expr_const(4, 32)));
        proc.push_assign(frag, slot.clone(), reg(27)).unwrap();
        proc.push_assign(frag, reg(27), expr_const(7, 32)).unwrap();
        proc.push_assign(frag, reg(27), slot).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(::types::Type::Void, reg(27),
                                   Some(reg(27))));
        proc.push_return(frag, ret).unwrap();

        ssa::construct(&mut proc).unwrap();

        let mut program = Program::new("test", Image::empty());
        let change = with_ctx(&mut program, |ctx| {
            Preservation.execute(&mut proc, ctx).unwrap()
        });
        assert!(change.contains(PassChange::PROGRESS));
        assert!(proc.signature().is_preserved(&reg(27)));
        // The return carries no value for the stack pointer, so nothing
        // is proven about it.
        assert!(!proc.signature().is_preserved(&reg(28)));
    }

    /// A register clobbered with a constant does not prove preserved.
    #[test]
    fn clobbered_register_is_not_preserved() {
        let mut proc = Procedure::new("f", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Ret);
        proc.push_assign(frag, reg(27), expr_const(7, 32)).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(::types::Type::Void, reg(27),
                                   Some(reg(27))));
        proc.push_return(frag, ret).unwrap();

        ssa::construct(&mut proc).unwrap();
        let mut program = Program::new("test", Image::empty());
        with_ctx(&mut program, |ctx| {
            Preservation.execute(&mut proc, ctx).unwrap()
        });
        assert!(!proc.signature().is_preserved(&reg(27)));
    }

    /// The callee proves r27 preserved; the caller reference to it
    /// ebx after the call is rewritten to the reaching value before the
    /// call.
    #[test]
    fn bypass_rewrites_preserved_call_defines() {
        let mut proc =
            Procedure::new("caller", 0x1000, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Call);
        let after = proc.add_fragment(FragmentKind::Ret);

        let before_def =
            proc.push_assign(frag, reg(27), expr_const(3, 32)).unwrap();
        let mut call = CallStatement::to_address(0x2000);
        call.set_dest_proc(CalleeRef::User(0x2000));
        let mut callee_sig =
            Signature::new("callee", CallingConventionType::Cdecl);
        callee_sig.add_proven(reg(27), reg(27));
        call.set_signature(callee_sig);
        let call_id = proc.push_call(frag, call).unwrap();

        let use_site = proc.push_assign(after, reg(24), reg(27)).unwrap();
        let mut ret = ReturnStatement::new();
        ret.add_return(Define::new(::types::Type::Void, reg(24),
                                   Some(reg(24))));
        proc.push_return(after, ret).unwrap();
        proc.cfg_mut().add_edge(frag, after, EdgeKind::CallReturn).unwrap();

        ssa::construct(&mut proc).unwrap();
        fill_call_collectors(&mut proc).unwrap();

        // The use of r27 after the call references the call.
        assert_eq!(
            proc.statement(use_site).unwrap().used_refs()[0].ref_def(),
            Some(call_id));

        let mut program = Program::new("test", Image::empty());
        let change = with_ctx(&mut program, |ctx| {
            CallBypass.execute(&mut proc, ctx).unwrap()
        });
        assert!(change.contains(PassChange::PROGRESS));

        // The use now references the definition before the call.
        assert_eq!(
            proc.statement(use_site).unwrap().used_refs()[0].ref_def(),
            Some(before_def));
    }
}
