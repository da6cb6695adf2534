//! The optimization passes and the pass manager that sequences them.
//!
//! Every pass is a pure function of one procedure plus the program-level
//! context; it reports what changed through `PassChange` flags. The pass
//! manager is the only component that retries passes: groups iterate to a
//! fixed point under an iteration cap, and the indirect-control pass may
//! demand a restart from SSA construction by raising `INVALIDATE_SSA`.
//! Individual passes never self-loop.

use decode::Decoder;
use error::*;
use il::*;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod dead_code;
pub mod indirect;
pub mod parameters;
pub mod preservation;
pub mod propagation;
pub mod returns;
pub mod type_analysis;
pub mod varargs;

bitflags! {
    /// What a pass did to the procedure.
    pub struct PassChange: u32 {
        /// The pass changed something; the enclosing group should sweep
        /// again.
        const PROGRESS = 0b001;
        /// Structural change invalidated SSA form; the pipeline must
        /// restart from SSA construction.
        const INVALIDATE_SSA = 0b010;
        /// The fragment graph changed shape.
        const CFG_CHANGED = 0b100;
    }
}

/// Identifies a pass in the registry and the journal.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PassId {
    CallDefineUpdate,
    SsaConstruction,
    StatementPropagation,
    DeadCodeElimination,
    IndirectControlResolution,
    Preservation,
    CallBypass,
    ParameterInference,
    ReturnInference,
    EllipsisProcessing,
    TypeAnalysis,
    SsaDestruction
}

impl PassId {
    pub fn name(&self) -> &'static str {
        match *self {
            PassId::CallDefineUpdate => "CallDefineUpdate",
            PassId::SsaConstruction => "SsaConstruction",
            PassId::StatementPropagation => "StatementPropagation",
            PassId::DeadCodeElimination => "DeadCodeElimination",
            PassId::IndirectControlResolution => "IndirectControlResolution",
            PassId::Preservation => "Preservation",
            PassId::CallBypass => "CallBypass",
            PassId::ParameterInference => "ParameterInference",
            PassId::ReturnInference => "ReturnInference",
            PassId::EllipsisProcessing => "EllipsisProcessing",
            PassId::TypeAnalysis => "TypeAnalysis",
            PassId::SsaDestruction => "SsaDestruction"
        }
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}


/// Decompiler settings, threaded explicitly through the pass manager.
/// There is no process-wide settings state.
#[derive(Clone, Debug)]
pub struct Settings {
    /// How many sweeps a pass group may make before the manager declares
    /// non-convergence. Exceeding the cap is fatal for the procedure and
    /// indicates a non-monotone pass.
    pub max_pass_iterations: usize,
    /// How many early-pipeline restarts (switch recovery re-decodes) one
    /// procedure may trigger.
    pub max_restarts: usize,
    /// Assume callees comply with the ABI's preserved-register contract
    /// even before preservation analysis proves it.
    pub assume_abi: bool,
    /// Historical behavior leaves a computed call's computed flag set
    /// even after its destination folds to a constant. Enable to clear
    /// the flag on fold instead.
    pub update_computed_flag_on_fold: bool
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            max_pass_iterations: 100,
            max_restarts: 8,
            assume_abi: false,
            update_computed_flag_on_fold: false
        }
    }
}


/// Program-level context handed to every pass. The procedure under
/// mutation is taken out of the program table, so the table only holds
/// the *other* procedures.
pub struct PassContext<'a> {
    pub program: &'a mut Program,
    pub decoder: &'a mut dyn Decoder,
    pub settings: &'a Settings,
    /// Observed between passes, never inside one.
    pub cancel: Option<&'a AtomicBool>
}

impl<'a> PassContext<'a> {
    fn check_cancelled(&self) -> Result<()> {
        if let Some(cancel) = self.cancel {
            if cancel.load(Ordering::Relaxed) {
                bail!(ErrorKind::Cancelled);
            }
        }
        Ok(())
    }
}


/// A single decompilation pass over one procedure.
pub trait Pass {
    fn id(&self) -> PassId;
    fn execute(&self, procedure: &mut Procedure, ctx: &mut PassContext)
        -> Result<PassChange>;
}

/// One journal record: which pass ran on which procedure, and what it
/// reported.
#[derive(Clone, Debug)]
pub struct JournalEntry {
    pub procedure: u64,
    pub pass: PassId,
    pub change: PassChange
}


/// Sequences passes over procedures, with explicit re-run semantics.
pub struct PassManager {
    settings: Settings,
    passes: Vec<Box<dyn Pass>>,
    journal: Vec<JournalEntry>
}

impl PassManager {
    pub fn new(settings: Settings) -> PassManager {
        PassManager {
            settings: settings,
            passes: vec![
                Box::new(returns::CallDefineUpdate),
                Box::new(SsaConstruction),
                Box::new(propagation::StatementPropagation),
                Box::new(dead_code::DeadCodeElimination),
                Box::new(indirect::IndirectControlResolution),
                Box::new(preservation::Preservation),
                Box::new(preservation::CallBypass),
                Box::new(parameters::ParameterInference),
                Box::new(returns::ReturnInference),
                Box::new(varargs::EllipsisProcessing),
                Box::new(type_analysis::TypeAnalysis),
                Box::new(SsaDestruction)
            ],
            journal: Vec::new()
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The journal of every pass execution so far, for verbose
    /// diagnostics.
    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    fn pass(&self, id: PassId) -> Result<&dyn Pass> {
        self.passes.iter()
            .map(|pass| pass.as_ref())
            .find(|pass| pass.id() == id)
            .ok_or_else(|| ErrorKind::InvariantViolation(
                format!("no pass registered for {}", id)).into())
    }

    /// Execute a single pass over a procedure.
    pub fn execute_pass(
        &mut self,
        id: PassId,
        procedure: &mut Procedure,
        ctx: &mut PassContext
    ) -> Result<PassChange> {
        ctx.check_cancelled()?;
        debug!("pass {} on {}", id, procedure.name());
        let change = self.pass(id)?.execute(procedure, ctx)?;
        self.journal.push(JournalEntry {
            procedure: procedure.address(),
            pass: id,
            change: change
        });
        // A pass that mutated the graph must hand back a valid dominance
        // cache.
        if change.contains(PassChange::CFG_CHANGED) {
            procedure.cfg_mut().dominance()?;
        }
        Ok(change)
    }

    /// Execute a group of passes repeatedly until a full sweep reports no
    /// progress, or a pass demands an SSA restart. Exceeding the
    /// iteration cap is an error.
    pub fn execute_pass_group(
        &mut self,
        ids: &[PassId],
        procedure: &mut Procedure,
        ctx: &mut PassContext
    ) -> Result<PassChange> {
        let mut total = PassChange::empty();
        for _ in 0..self.settings.max_pass_iterations {
            let mut sweep = PassChange::empty();
            for &id in ids {
                sweep |= self.execute_pass(id, procedure, ctx)?;
            }
            total |= sweep;
            if sweep.contains(PassChange::INVALIDATE_SSA)
                || !sweep.contains(PassChange::PROGRESS) {
                return Ok(total);
            }
        }
        let group: Vec<&str> = ids.iter().map(|id| id.name()).collect();
        bail!(ErrorKind::PassNonConvergence(
            group.join("+"), self.settings.max_pass_iterations));
    }

    /// Decompile one procedure through the early pipeline: SSA
    /// construction, local optimization, and indirect-control
    /// resolution, restarting from SSA construction when switch recovery
    /// discovers new fragments.
    pub fn decompile_early(
        &mut self,
        procedure: &mut Procedure,
        ctx: &mut PassContext
    ) -> Result<()> {
        procedure.set_status(ProcedureStatus::Visited);

        for restart in 0..self.settings.max_restarts {
            self.execute_pass(PassId::CallDefineUpdate, procedure, ctx)?;
            self.execute_pass(PassId::SsaConstruction, procedure, ctx)?;
            self.execute_pass_group(
                &[PassId::StatementPropagation, PassId::DeadCodeElimination],
                procedure, ctx)?;
            let change = self.execute_pass(
                PassId::IndirectControlResolution, procedure, ctx)?;
            if !change.contains(PassChange::INVALIDATE_SSA) {
                procedure.set_status(ProcedureStatus::EarlyDone);
                return Ok(());
            }
            debug!("restart {} of {} after indirect-control resolution",
                   restart + 1, procedure.name());
            procedure.clear_ssa()?;
        }
        bail!(ErrorKind::PassNonConvergence(
            "early-pipeline restarts".to_string(), self.settings.max_restarts));
    }

    /// Decompile one procedure through the late pipeline: bypass,
    /// inference, typing, and SSA destruction.
    pub fn decompile_late(
        &mut self,
        procedure: &mut Procedure,
        ctx: &mut PassContext
    ) -> Result<()> {
        self.execute_pass(PassId::CallDefineUpdate, procedure, ctx)?;
        self.execute_pass(PassId::CallBypass, procedure, ctx)?;
        self.execute_pass_group(
            &[PassId::StatementPropagation, PassId::DeadCodeElimination],
            procedure, ctx)?;
        self.execute_pass(PassId::ParameterInference, procedure, ctx)?;
        self.execute_pass(PassId::ReturnInference, procedure, ctx)?;
        self.execute_pass(PassId::EllipsisProcessing, procedure, ctx)?;
        self.execute_pass_group(
            &[PassId::TypeAnalysis,
              PassId::StatementPropagation,
              PassId::DeadCodeElimination],
            procedure, ctx)?;
        self.execute_pass(PassId::SsaDestruction, procedure, ctx)?;
        procedure.set_status(ProcedureStatus::FinalDone);
        Ok(())
    }

    /// Decompile every procedure of a program: early pipeline in
    /// callee-first order, an inter-procedural preservation fixed point,
    /// then the late pipeline. A failing procedure is marked failed and
    /// the rest of the program proceeds.
    pub fn decompile_program(
        &mut self,
        program: &mut Program,
        decoder: &mut dyn Decoder,
        cancel: Option<&AtomicBool>
    ) -> Result<()> {
        let order = callee_first_order(program);

        for &address in &order {
            self.run_stage(program, decoder, cancel, address, Stage::Early)?;
        }

        // Preservation iterates callers and callees to a fixed point;
        // the cap reuses the group iteration limit.
        for _ in 0..self.settings.max_pass_iterations {
            let mut progressed = false;
            for &address in &order {
                let change = self.run_stage(
                    program, decoder, cancel, address, Stage::Preservation)?;
                progressed |= change.contains(PassChange::PROGRESS);
            }
            if !progressed {
                break;
            }
        }

        for &address in &order {
            self.run_stage(program, decoder, cancel, address, Stage::Late)?;
        }
        Ok(())
    }

    /// Take a procedure out of the program, run a stage on it, and put
    /// it back. A stage error marks the procedure failed; only
    /// cancellation aborts the whole program.
    fn run_stage(
        &mut self,
        program: &mut Program,
        decoder: &mut dyn Decoder,
        cancel: Option<&AtomicBool>,
        address: u64,
        stage: Stage
    ) -> Result<PassChange> {
        let mut procedure = match program.take_procedure(address) {
            Some(procedure) => procedure,
            None => return Ok(PassChange::empty())
        };
        if procedure.status() == ProcedureStatus::Failed {
            program.put_procedure(procedure);
            return Ok(PassChange::empty());
        }
        let result = {
            let settings = self.settings.clone();
            let mut ctx = PassContext {
                program: program,
                decoder: decoder,
                settings: &settings,
                cancel: cancel
            };
            match stage {
                Stage::Early =>
                    self.decompile_early(&mut procedure, &mut ctx)
                        .map(|_| PassChange::empty()),
                Stage::Late =>
                    self.decompile_late(&mut procedure, &mut ctx)
                        .map(|_| PassChange::empty()),
                Stage::Preservation => self.execute_pass(
                    PassId::Preservation, &mut procedure, &mut ctx)
            }
        };
        let change = match result {
            Ok(change) => change,
            Err(Error(ErrorKind::Cancelled, _)) => {
                program.put_procedure(procedure);
                bail!(ErrorKind::Cancelled);
            },
            Err(e) => {
                procedure.fail(format!("{}", e));
                PassChange::empty()
            }
        };
        program.put_procedure(procedure);
        Ok(change)
    }
}

/// The per-procedure stages of whole-program decompilation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
    Early,
    Preservation,
    Late
}

/// Procedures ordered callees before callers, cycles broken by address
/// order. Callee sets are populated by scanning direct call
/// destinations.
fn callee_first_order(program: &mut Program) -> Vec<u64> {
    // Register direct callees and callers.
    let addresses = program.procedure_addresses();
    let mut callee_map: Vec<(u64, Vec<u64>)> = Vec::new();
    for &address in &addresses {
        let mut callees = Vec::new();
        if let Some(procedure) = program.procedure(address) {
            for statement in procedure.statements() {
                if let Some(call) = statement.call() {
                    if let Some(target) = call.dest().int_value() {
                        callees.push(target);
                    }
                }
            }
        }
        callee_map.push((address, callees));
    }
    for &(address, ref callees) in &callee_map {
        for &callee in callees {
            if let Some(procedure) = program.procedure_mut(address) {
                procedure.add_callee(callee);
            }
            if let Some(procedure) = program.procedure_mut(callee) {
                procedure.add_caller(address);
            }
        }
    }

    // Depth-first post-order over the call graph.
    let mut order = Vec::new();
    let mut visited: ::std::collections::BTreeSet<u64> =
        ::std::collections::BTreeSet::new();
    for &address in &addresses {
        callee_dfs(program, address, &mut visited, &mut order);
    }
    order
}

fn callee_dfs(
    program: &Program,
    address: u64,
    visited: &mut ::std::collections::BTreeSet<u64>,
    order: &mut Vec<u64>
) {
    if !visited.insert(address) {
        return;
    }
    let callees: Vec<u64> = match program.procedure(address) {
        Some(procedure) => procedure.callees().iter().cloned().collect(),
        None => return
    };
    for callee in callees {
        callee_dfs(program, callee, visited, order);
    }
    order.push(address);
}


/// SSA construction as a pass: seed conservative returns, build SSA,
/// then snapshot the call-site collectors.
struct SsaConstruction;

impl Pass for SsaConstruction {
    fn id(&self) -> PassId {
        PassId::SsaConstruction
    }

    fn execute(&self, procedure: &mut Procedure, _: &mut PassContext)
        -> Result<PassChange> {

        seed_returns(procedure)?;
        ::ssa::construct(procedure)?;
        ::analysis::fill_call_collectors(procedure)?;
        Ok(PassChange::PROGRESS)
    }
}

/// Seed empty return statements with the locations a caller could
/// observe: the return register, every ABI-preserved register, and
/// every register the procedure modifies. Later passes trim the list to
/// what is proven preserved or actually consumed by callers.
fn seed_returns(procedure: &mut Procedure) -> Result<()> {
    let convention = procedure.convention();
    let mut seeds: Vec<Expression> =
        vec![convention.return_register().clone()];
    for preserved in convention.preserved_registers() {
        if !seeds.contains(preserved) {
            seeds.push(preserved.clone());
        }
    }
    for statement in procedure.statements() {
        for base in statement.defined_locations() {
            let is_register = base.get_location()
                .map(|location| location.is_register())
                .unwrap_or(false);
            if is_register && !seeds.contains(base) {
                seeds.push(base.clone());
            }
        }
    }

    let ret_ids: Vec<StatementId> = procedure.statements()
        .into_iter()
        .filter(|statement| statement.is_return())
        .map(|statement| statement.id())
        .collect();
    for id in ret_ids {
        let statement = procedure.statement_mut(id)?;
        if let StatementKind::Return(ref mut ret) = *statement.kind_mut() {
            if !ret.returns.is_empty() {
                continue;
            }
            for seed in &seeds {
                ret.add_return(Define::new(
                    ::types::Type::Void, seed.clone(), Some(seed.clone())));
            }
        }
    }
    Ok(())
}


/// SSA destruction as a pass.
struct SsaDestruction;

impl Pass for SsaDestruction {
    fn id(&self) -> PassId {
        PassId::SsaDestruction
    }

    fn execute(&self, procedure: &mut Procedure, _: &mut PassContext)
        -> Result<PassChange> {

        ::ssa::destroy(procedure)?;
        Ok(PassChange::PROGRESS)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use analysis::calling_convention::CallingConventionType;
    use il::*;
    use types::Type;

    /// A caller and a callee through the whole pipeline: callee-first
    /// ordering, preservation fixed point, call reconciliation, and SSA
    /// destruction on both.
    #[test]
    fn two_procedures_decompile_end_to_end() {
        let mut program = Program::new("test", Image::empty());

        {
            // callee: saves and restores r27, returns 5 in r24.
            let callee = program.create_procedure(
                0x2000, "callee", CallingConventionType::Cdecl);
            let frag = callee.add_fragment(FragmentKind::Ret);
            let slot = mem(Expression::sub(reg(28), expr_const(4, 32)));
            callee.push_assign(frag, slot.clone(), reg(27)).unwrap();
            callee.push_assign(frag, reg(27), expr_const(7, 32)).unwrap();
            callee.push_assign(frag, reg(24), expr_const(5, 32)).unwrap();
            callee.push_assign(frag, reg(27), slot).unwrap();
            callee.push_return(frag, ReturnStatement::new()).unwrap();
            callee.set_status(ProcedureStatus::Decoded);
        }
        {
            // main: calls the callee and consumes its result.
            let main = program.create_procedure(
                0x1000, "main", CallingConventionType::Cdecl);
            let frag0 = main.add_fragment(FragmentKind::Call);
            let frag1 = main.add_fragment(FragmentKind::Ret);
            main.push_assign(frag0, reg(25), expr_const(1, 32)).unwrap();
            main.push_call(frag0, CallStatement::to_address(0x2000)).unwrap();
            main.push_assign(
                frag1, reg(24),
                Expression::add(reg(24), reg(25))).unwrap();
            main.push_return(frag1, ReturnStatement::new()).unwrap();
            main.cfg_mut()
                .add_edge(frag0, frag1, EdgeKind::CallReturn).unwrap();
            main.set_status(ProcedureStatus::Decoded);
        }

        let mut manager = PassManager::new(Settings::default());
        let mut decoder = ::passes::indirect::tests::NullDecoder;
        manager.decompile_program(&mut program, &mut decoder, None).unwrap();

        for address in [0x1000u64, 0x2000].iter() {
            let procedure = program.procedure(*address).unwrap();
            assert_eq!(procedure.status(), ProcedureStatus::FinalDone,
                       "{} failed: {:?}",
                       procedure.name(), procedure.diagnostics());
            procedure.check_numbering().unwrap();
            // No subscripts survive destruction.
            for statement in procedure.statements() {
                for e in statement.expressions() {
                    assert!(e.refs().is_empty(),
                            "{}: subscript survived: {}",
                            procedure.name(), e);
                }
            }
        }

        let callee = program.procedure(0x2000).unwrap();
        assert!(callee.signature().is_preserved(&reg(27)));
        let returned: Vec<&Expression> = callee.signature().returns()
            .iter()
            .map(|&(ref exp, _)| exp)
            .collect();
        assert_eq!(returned, vec![&reg(24)]);

        let main = program.procedure(0x1000).unwrap();
        let call = main.statements().into_iter()
            .find(|statement| statement.is_call())
            .unwrap()
            .call().unwrap().clone();
        assert_eq!(call.dest_proc(), Some(&CalleeRef::User(0x2000)));
        // The preserved register is no longer a call define.
        assert!(call.defines().iter().all(|define| define.lhs != reg(27)));
    }

    /// A failing procedure is marked failed with diagnostics; the rest
    /// of the program decompiles.
    #[test]
    fn one_failure_does_not_poison_the_program() {
        let mut program = Program::new("test", Image::empty());
        {
            // A procedure with no entry fragment at all.
            let broken = program.create_procedure(
                0x3000, "broken", CallingConventionType::Cdecl);
            broken.set_status(ProcedureStatus::Decoded);
        }
        {
            let fine = program.create_procedure(
                0x1000, "fine", CallingConventionType::Cdecl);
            let frag = fine.add_fragment(FragmentKind::Ret);
            fine.push_assign(frag, reg(24), expr_const(1, 32)).unwrap();
            fine.push_return(frag, ReturnStatement::new()).unwrap();
            fine.set_status(ProcedureStatus::Decoded);
        }

        let mut manager = PassManager::new(Settings::default());
        let mut decoder = ::passes::indirect::tests::NullDecoder;
        manager.decompile_program(&mut program, &mut decoder, None).unwrap();

        let broken = program.procedure(0x3000).unwrap();
        assert_eq!(broken.status(), ProcedureStatus::Failed);
        assert!(!broken.diagnostics().is_empty());
        assert_eq!(program.procedure(0x1000).unwrap().status(),
                   ProcedureStatus::FinalDone);
    }

    /// The journal records every pass execution.
    #[test]
    fn journal_traces_pass_executions() {
        let mut program = Program::new("test", Image::empty());
        {
            let proc = program.create_procedure(
                0x1000, "f", CallingConventionType::Cdecl);
            let frag = proc.add_fragment(FragmentKind::Ret);
            proc.push_assign(frag, reg(24), expr_const(1, 32)).unwrap();
            proc.push_return(frag, ReturnStatement::new()).unwrap();
            proc.set_status(ProcedureStatus::Decoded);
        }
        let mut manager = PassManager::new(Settings::default());
        let mut decoder = ::passes::indirect::tests::NullDecoder;
        manager.decompile_program(&mut program, &mut decoder, None).unwrap();
        assert!(manager.journal().iter()
                .any(|entry| entry.pass == PassId::SsaConstruction));
        assert!(manager.journal().iter()
                .any(|entry| entry.pass == PassId::SsaDestruction));
    }

    /// Cancellation is observed between passes and aborts decompilation.
    #[test]
    fn cancellation_stops_between_passes() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let mut program = Program::new("test", Image::empty());
        {
            let proc = program.create_procedure(
                0x1000, "f", CallingConventionType::Cdecl);
            let frag = proc.add_fragment(FragmentKind::Ret);
            proc.push_return(frag, ReturnStatement::new()).unwrap();
            proc.set_status(ProcedureStatus::Decoded);
        }
        let cancel = AtomicBool::new(true);
        cancel.store(true, Ordering::Relaxed);
        let mut manager = PassManager::new(Settings::default());
        let mut decoder = ::passes::indirect::tests::NullDecoder;
        let result =
            manager.decompile_program(&mut program, &mut decoder,
                                      Some(&cancel));
        assert!(result.is_err());
    }

    /// Signature types reach variadic processing through the library
    /// database: a printf call grows its arguments inside the full
    /// pipeline.
    #[test]
    fn variadic_call_is_expanded_in_the_pipeline() {
        let mut program = Program::new("test", Image::empty());
        let mut signature =
            Signature::new("printf", CallingConventionType::Cdecl);
        signature.set_has_ellipsis(true);
        signature.add_parameter(
            "fmt",
            mem(Expression::add(reg(28), expr_const(4, 32))),
            Type::string());
        program.add_library_signature(signature);

        {
            let proc = program.create_procedure(
                0x1000, "f", CallingConventionType::Cdecl);
            let frag0 = proc.add_fragment(FragmentKind::Call);
            let frag1 = proc.add_fragment(FragmentKind::Ret);
            // m[r28 + 4] := "%d %s"; call printf
            proc.push_assign(
                frag0,
                mem(Expression::add(reg(28), expr_const(4, 32))),
                expr_str("%d %s")).unwrap();
            let mut call = CallStatement::to_address(0x5000);
            call.set_dest_proc(CalleeRef::Library("printf".to_string()));
            proc.push_call(frag0, call).unwrap();
            proc.push_return(frag1, ReturnStatement::new()).unwrap();
            proc.cfg_mut()
                .add_edge(frag0, frag1, EdgeKind::CallReturn).unwrap();
            proc.set_status(ProcedureStatus::Decoded);
        }

        let mut manager = PassManager::new(Settings::default());
        let mut decoder = ::passes::indirect::tests::NullDecoder;
        manager.decompile_program(&mut program, &mut decoder, None).unwrap();

        let proc = program.procedure(0x1000).unwrap();
        assert_eq!(proc.status(), ProcedureStatus::FinalDone,
                   "f failed: {:?}", proc.diagnostics());
        let call = proc.statements().into_iter()
            .find(|statement| statement.is_call())
            .unwrap()
            .call().unwrap().clone();
        // fmt plus %d plus %s.
        assert_eq!(call.num_arguments(), 3);
        assert_eq!(call.arguments()[1].ty, Type::signed(32));
        assert_eq!(call.arguments()[2].ty, Type::string());
    }
}
