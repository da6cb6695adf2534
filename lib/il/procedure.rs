//! A procedure owns its statements, its control-flow graph of fragments,
//! and its symbol map.
//!
//! Statements live in an arena keyed by `StatementId`; fragments refer to
//! statements by handle, and subscripted references name their defining
//! statement by handle. A handle is only meaningful within its owning
//! procedure.

use analysis::calling_convention::{CallingConvention, CallingConventionType};
use error::*;
use il::*;
use std::collections::{BTreeMap, BTreeSet};
use types::Type;

/// Where a procedure is in its decompilation lifecycle.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ProcedureStatus {
    /// Known to exist; not yet decoded.
    Undecoded,
    /// Decoded into fragments; not yet visited by the decompiler.
    Decoded,
    /// Being decompiled.
    Visited,
    /// Early passes complete. The resting state for members of recursion
    /// cycles awaiting the group fixed point.
    EarlyDone,
    /// Fully decompiled.
    FinalDone,
    /// Decompilation aborted on an invariant violation; see the
    /// diagnostics.
    Failed
}


/// A single procedure under decompilation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Procedure {
    name: String,
    address: u64,
    status: ProcedureStatus,
    cfg: FragmentGraph,
    statements: BTreeMap<StatementId, Statement>,
    next_statement_id: u64,
    signature: Signature,
    /// Expression (usually an outer-level subscripted reference) to
    /// local/parameter name.
    symbols: BTreeMap<Expression, String>,
    locals: BTreeMap<String, Type>,
    parameters: Vec<(Expression, Type)>,
    callers: BTreeSet<u64>,
    callees: BTreeSet<u64>,
    diagnostics: Vec<String>,
    next_local: usize
}

impl Procedure {
    pub fn new<S: Into<String>>(
        name: S,
        address: u64,
        convention: CallingConventionType
    ) -> Procedure {
        let name = name.into();
        let signature = Signature::new(name.clone(), convention);
        Procedure {
            name: name,
            address: address,
            status: ProcedureStatus::Undecoded,
            cfg: FragmentGraph::new(),
            statements: BTreeMap::new(),
            next_statement_id: 0,
            signature: signature,
            symbols: BTreeMap::new(),
            locals: BTreeMap::new(),
            parameters: Vec::new(),
            callers: BTreeSet::new(),
            callees: BTreeSet::new(),
            diagnostics: Vec::new(),
            next_local: 0
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn status(&self) -> ProcedureStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ProcedureStatus) {
        self.status = status;
    }

    /// Mark this procedure failed with a diagnostic. The rest of the
    /// program is unaffected.
    pub fn fail<S: Into<String>>(&mut self, diagnostic: S) {
        let diagnostic = diagnostic.into();
        warn!("procedure {} failed: {}", self.name, diagnostic);
        self.diagnostics.push(diagnostic);
        self.status = ProcedureStatus::Failed;
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn cfg(&self) -> &FragmentGraph {
        &self.cfg
    }

    pub fn cfg_mut(&mut self) -> &mut FragmentGraph {
        &mut self.cfg
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn signature_mut(&mut self) -> &mut Signature {
        &mut self.signature
    }

    /// The calling convention this procedure follows.
    pub fn convention(&self) -> CallingConvention {
        CallingConvention::new(self.signature.convention())
    }

    pub fn callers(&self) -> &BTreeSet<u64> {
        &self.callers
    }

    pub fn add_caller(&mut self, address: u64) {
        self.callers.insert(address);
    }

    pub fn callees(&self) -> &BTreeSet<u64> {
        &self.callees
    }

    pub fn add_callee(&mut self, address: u64) {
        self.callees.insert(address);
    }

    pub fn parameters(&self) -> &[(Expression, Type)] {
        &self.parameters
    }

    pub fn set_parameters(&mut self, parameters: Vec<(Expression, Type)>) {
        self.parameters = parameters;
    }

    // ----------------------------------------------------------------
    // The statement arena.
    // ----------------------------------------------------------------

    pub fn statement(&self, id: StatementId) -> Result<&Statement> {
        self.statements.get(&id).ok_or_else(|| {
            ErrorKind::InvariantViolation(
                format!("statement {} does not exist in {}", id, self.name))
                .into()
        })
    }

    pub fn statement_mut(&mut self, id: StatementId) -> Result<&mut Statement> {
        let name = self.name.clone();
        self.statements.get_mut(&id).ok_or_else(|| {
            ErrorKind::InvariantViolation(
                format!("statement {} does not exist in {}", id, name))
                .into()
        })
    }

    pub fn has_statement(&self, id: StatementId) -> bool {
        self.statements.contains_key(&id)
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Every statement, in arena order. For dataflow order use
    /// `ordered_statement_ids`.
    pub fn statements(&self) -> Vec<&Statement> {
        self.statements.values().collect()
    }

    fn allocate_statement(&mut self, fragment: FragmentId, kind: StatementKind)
        -> StatementId {

        let id = StatementId(self.next_statement_id);
        self.next_statement_id += 1;
        self.statements.insert(id, Statement::new(id, fragment, kind));
        id
    }

    /// Append a statement to the end of a fragment's last RTL.
    pub fn append_statement(&mut self, fragment: FragmentId, kind: StatementKind)
        -> Result<StatementId> {

        let id = self.allocate_statement(fragment, kind);
        {
            let fragment = self.cfg.fragment_mut(fragment)?;
            if fragment.rtls().is_empty() {
                fragment.push_rtl(Rtl::new(0));
            }
            let last = fragment.rtls_mut().len() - 1;
            fragment.rtls_mut()[last].push(id);
        }
        Ok(id)
    }

    /// Begin a new RTL at the given source address in a fragment.
    pub fn start_rtl(&mut self, fragment: FragmentId, address: u64)
        -> Result<()> {

        self.cfg.fragment_mut(fragment)?.push_rtl(Rtl::new(address));
        Ok(())
    }

    /// Insert a phi-assign for `lhs` at the head of a fragment.
    pub fn insert_phi_at_head(&mut self, fragment: FragmentId, lhs: Expression)
        -> Result<StatementId> {

        let kind = StatementKind::Phi(PhiAssign::new(lhs));
        let id = self.allocate_statement(fragment, kind);
        self.cfg.fragment_mut(fragment)?.insert_front(id);
        Ok(id)
    }

    /// Insert an implicit assign for `lhs` at the head of the entry
    /// fragment, representing the location's value on entry.
    pub fn insert_implicit_at_entry(&mut self, lhs: Expression)
        -> Result<StatementId> {

        let entry = match self.cfg.entry() {
            Some(entry) => entry,
            None => bail!(ErrorKind::InvariantViolation(
                format!("procedure {} has no entry fragment", self.name)))
        };
        let kind = StatementKind::ImplicitAssign(Define::implicit(lhs));
        let id = self.allocate_statement(entry, kind);
        self.cfg.fragment_mut(entry)?.insert_front(id);
        Ok(id)
    }

    /// Insert `lhs := rhs` immediately after the anchor statement, or
    /// immediately before it if the anchor ends its fragment.
    pub fn insert_assign_after(
        &mut self,
        anchor: StatementId,
        lhs: Expression,
        rhs: Expression
    ) -> Result<StatementId> {
        let (fragment, terminal) = {
            let anchor = self.statement(anchor)?;
            (anchor.fragment(), anchor.is_terminal())
        };
        let kind = StatementKind::Assign(Assign::new(lhs, rhs));
        let id = self.allocate_statement(fragment, kind);
        let inserted = {
            let fragment = self.cfg.fragment_mut(fragment)?;
            if terminal {
                fragment.insert_before(anchor, id)
            }
            else {
                fragment.insert_after(anchor, id)
            }
        };
        if !inserted {
            bail!(ErrorKind::InvariantViolation(format!(
                "statement {} is not in its fragment in {}", anchor, self.name)));
        }
        Ok(id)
    }

    /// Remove a statement from its fragment and the arena.
    pub fn remove_statement(&mut self, id: StatementId) -> Result<Statement> {
        let statement = match self.statements.remove(&id) {
            Some(statement) => statement,
            None => bail!(ErrorKind::InvariantViolation(
                format!("statement {} does not exist in {}", id, self.name)))
        };
        self.cfg.fragment_mut(statement.fragment())?.remove_statement(id);
        Ok(statement)
    }

    /// Every statement handle in dataflow order: fragments in reverse
    /// post-order, statements in fragment order. Fragments unreachable
    /// from the entry follow in index order.
    pub fn ordered_statement_ids(&self) -> Result<Vec<StatementId>> {
        let order = self.cfg.reverse_post_order()?;
        let mut seen: BTreeSet<usize> = order.iter().cloned().collect();
        let mut ids = Vec::new();
        for index in order {
            ids.extend(self.cfg.fragment(index)?.statements());
        }
        for index in self.cfg.indices() {
            if seen.insert(index) {
                ids.extend(self.cfg.fragment(index)?.statements());
            }
        }
        Ok(ids)
    }

    /// Number every statement 1..N in dataflow order. Numbering is a
    /// bijection and monotonic with respect to reverse post-order.
    pub fn number_statements(&mut self) -> Result<()> {
        let ids = self.ordered_statement_ids()?;
        for (number, id) in ids.into_iter().enumerate() {
            self.statement_mut(id)?.set_number(number + 1);
        }
        Ok(())
    }

    /// Split a fragment before the RTL at `rtl_index`, retagging the
    /// moved statements.
    pub fn split_fragment(&mut self, fragment: FragmentId, rtl_index: usize)
        -> Result<FragmentId> {

        let (new_fragment, moved) =
            self.cfg.split_fragment(fragment, rtl_index)?;
        for id in moved {
            self.statement_mut(id)?.set_fragment(new_fragment);
        }
        Ok(new_fragment)
    }

    // ----------------------------------------------------------------
    // Symbols and locals.
    // ----------------------------------------------------------------

    pub fn symbols(&self) -> &BTreeMap<Expression, String> {
        &self.symbols
    }

    pub fn set_symbols(&mut self, symbols: BTreeMap<Expression, String>) {
        self.symbols = symbols;
    }

    pub fn map_symbol_to<S: Into<String>>(&mut self, exp: Expression, name: S) {
        self.symbols.insert(exp, name.into());
    }

    /// The symbol mapped to exactly this expression.
    pub fn lookup_symbol(&self, exp: &Expression) -> Option<&str> {
        self.symbols.get(exp).map(|name| name.as_str())
    }

    /// The symbol mapped to this expression, or failing that, to its
    /// unsubscripted base.
    pub fn lookup_symbol_any(&self, exp: &Expression) -> Option<&str> {
        if let Some(name) = self.lookup_symbol(exp) {
            return Some(name);
        }
        exp.ref_base().and_then(|base| self.lookup_symbol(base))
    }

    /// Create a fresh named local of the given type.
    pub fn create_local(&mut self, ty: Type) -> Expression {
        let name = format!("local{}", self.next_local);
        self.next_local += 1;
        self.locals.insert(name.clone(), ty);
        Expression::location(Location::local(name))
    }

    pub fn locals(&self) -> &BTreeMap<String, Type> {
        &self.locals
    }

    pub fn local_type(&self, name: &str) -> Option<&Type> {
        self.locals.get(name)
    }

    // ----------------------------------------------------------------
    // Builder conveniences. Tests and the decode path construct
    // fragments through these.
    // ----------------------------------------------------------------

    /// Create a fragment. The first fragment created becomes the entry.
    pub fn add_fragment(&mut self, kind: FragmentKind) -> FragmentId {
        let index = self.cfg.create_fragment(kind);
        if self.cfg.entry().is_none() {
            self.cfg.set_entry(index)
                .expect("the fragment was just created");
        }
        index
    }

    pub fn push_assign(
        &mut self,
        fragment: FragmentId,
        lhs: Expression,
        rhs: Expression
    ) -> Result<StatementId> {
        self.append_statement(
            fragment, StatementKind::Assign(Assign::new(lhs, rhs)))
    }

    pub fn push_typed_assign(
        &mut self,
        fragment: FragmentId,
        ty: Type,
        lhs: Expression,
        rhs: Expression
    ) -> Result<StatementId> {
        self.append_statement(
            fragment, StatementKind::Assign(Assign::typed(ty, lhs, rhs)))
    }

    pub fn push_bool_assign(
        &mut self,
        fragment: FragmentId,
        lhs: Expression,
        condition: Expression
    ) -> Result<StatementId> {
        self.append_statement(
            fragment,
            StatementKind::BoolAssign(
                Assign::typed(Type::Boolean, lhs, condition)))
    }

    pub fn push_goto(&mut self, fragment: FragmentId, dest: Expression)
        -> Result<StatementId> {

        self.append_statement(
            fragment, StatementKind::Goto(GotoStatement::new(dest)))
    }

    pub fn push_branch(
        &mut self,
        fragment: FragmentId,
        condition: Expression,
        dest: Expression
    ) -> Result<StatementId> {
        self.append_statement(
            fragment,
            StatementKind::Branch(BranchStatement {
                condition: condition,
                dest: dest
            }))
    }

    pub fn push_call(&mut self, fragment: FragmentId, call: CallStatement)
        -> Result<StatementId> {

        self.append_statement(fragment, StatementKind::Call(call))
    }

    pub fn push_return(&mut self, fragment: FragmentId, ret: ReturnStatement)
        -> Result<StatementId> {

        self.append_statement(fragment, StatementKind::Return(ret))
    }

    // ----------------------------------------------------------------
    // Invariant checks.
    // ----------------------------------------------------------------

    /// True when every subscripted reference in every statement resolves
    /// to a definition in this procedure.
    pub fn all_refs_have_defs(&self) -> bool {
        for statement in self.statements.values() {
            for e in statement.expressions() {
                for r in e.refs() {
                    match r.ref_def() {
                        Some(def) => {
                            if !self.statements.contains_key(&def) {
                                return false;
                            }
                        },
                        None => return false
                    }
                }
            }
        }
        true
    }

    /// Check that every phi-assign has one operand per predecessor of its
    /// fragment.
    pub fn check_phi_arities(&self) -> Result<()> {
        for statement in self.statements.values() {
            let phi = match statement.phi() {
                Some(phi) => phi,
                None => continue
            };
            let predecessors =
                self.cfg.predecessor_indices(statement.fragment())?;
            if phi.operands().len() != predecessors.len() {
                bail!(ErrorKind::InvariantViolation(format!(
                    "phi {} in {} has {} operands for {} predecessors",
                    statement.id(), self.name,
                    phi.operands().len(), predecessors.len())));
            }
            for operand in phi.operands() {
                if !predecessors.contains(&operand.pred) {
                    bail!(ErrorKind::InvariantViolation(format!(
                        "phi {} in {} has an operand for non-predecessor {}",
                        statement.id(), self.name, operand.pred)));
                }
            }
        }
        Ok(())
    }

    /// Check that statement numbering is a bijection onto 1..=N.
    pub fn check_numbering(&self) -> Result<()> {
        let mut numbers: Vec<usize> =
            self.statements.values().map(|s| s.number()).collect();
        numbers.sort();
        for (i, number) in numbers.iter().enumerate() {
            if *number != i + 1 {
                bail!(ErrorKind::InvariantViolation(format!(
                    "statement numbering in {} is not a bijection", self.name)));
            }
        }
        Ok(())
    }

    /// Check the invariants that must hold while the procedure is in SSA
    /// form.
    pub fn verify_ssa(&self) -> Result<()> {
        if !self.all_refs_have_defs() {
            bail!(ErrorKind::InvariantViolation(format!(
                "a reference in {} has no definition", self.name)));
        }
        self.check_phi_arities()
    }

    /// Tear the procedure out of SSA form entirely: remove phi-assigns
    /// and implicit assigns, strip every subscript, and clear collector
    /// snapshots. Used when structural change (new switch arms) forces
    /// the pipeline to restart from SSA construction.
    pub fn clear_ssa(&mut self) -> Result<()> {
        let doomed: Vec<StatementId> = self.statements.values()
            .filter(|s| s.is_phi() || s.is_implicit())
            .map(|s| s.id())
            .collect();
        for id in doomed {
            self.remove_statement(id)?;
        }
        let ids: Vec<StatementId> = self.statements.keys().cloned().collect();
        for id in ids {
            let statement = self.statements.get_mut(&id).unwrap();
            for e in statement.expressions_mut() {
                let stripped = e.clone().strip_subscripts();
                *e = stripped;
            }
            if let Some(call) = statement.call_mut() {
                call.def_collector_mut().clear();
                call.use_collector_mut().clear();
            }
        }
        self.symbols.clear();
        Ok(())
    }

    /// Resolve every subscripted reference that lacks a definition to an
    /// implicit assign at the entry, creating the implicit assigns on
    /// demand. Synthesized references (variadic argument slots) carry no
    /// definition until this runs.
    pub fn resolve_dangling_refs(&mut self) -> Result<bool> {
        let mut implicits: BTreeMap<Expression, StatementId> = BTreeMap::new();
        for statement in self.statements.values() {
            if let StatementKind::ImplicitAssign(ref define) =
                *statement.kind() {
                implicits.insert(define.lhs.clone(), statement.id());
            }
        }

        let ids: Vec<StatementId> = self.statements.keys().cloned().collect();
        let mut changed = false;
        for id in ids {
            let mut bases: Vec<Expression> = Vec::new();
            for e in self.statement(id)?.expressions() {
                for r in e.refs() {
                    if r.ref_def().is_none() {
                        if let Some(base) = r.ref_base() {
                            if !bases.contains(base) {
                                bases.push(base.clone());
                            }
                        }
                    }
                }
            }
            for base in bases {
                let implicit = match implicits.get(&base).cloned() {
                    Some(implicit) => implicit,
                    None => {
                        let implicit =
                            self.insert_implicit_at_entry(base.clone())?;
                        implicits.insert(base.clone(), implicit);
                        implicit
                    }
                };
                let pattern = Expression::subscript(base.clone(), None);
                let replacement =
                    Expression::subscript(base, Some(implicit));
                self.statement_mut(id)?
                    .search_and_replace(&pattern, &replacement);
                changed = true;
            }
        }
        Ok(changed)
    }

    /// The right-hand side of a plain assignment, by handle. Used to
    /// chase a subscripted reference to a constant.
    pub fn assign_rhs(&self, id: StatementId) -> Option<Expression> {
        let statement = self.statements.get(&id)?;
        match *statement.kind() {
            StatementKind::Assign(ref assign) => Some(assign.rhs.clone()),
            _ => None
        }
    }

    /// Run ellipsis processing on a call statement of this procedure.
    /// Returns true if the call was recognized and processed.
    pub fn do_ellipsis_processing(&mut self, call_id: StatementId)
        -> Result<bool> {

        // Resolve the defs the call's arguments may reference before
        // mutating the call.
        let mut resolved: BTreeMap<StatementId, Expression> = BTreeMap::new();
        {
            let call = match self.statement(call_id)?.call() {
                Some(call) => call,
                None => bail!(ErrorKind::InvariantViolation(format!(
                    "statement {} in {} is not a call", call_id, self.name)))
            };
            for argument in call.arguments() {
                if let Some(def) = argument.rhs.ref_def() {
                    if let Some(rhs) = self.assign_rhs(def) {
                        resolved.insert(def, rhs);
                    }
                }
            }
        }
        let convention = self.convention();
        let call = match self.statement_mut(call_id)?.call_mut() {
            Some(call) => call,
            None => bail!(ErrorKind::InvariantViolation(format!(
                "statement {} is not a call", call_id)))
        };
        Ok(call.do_ellipsis_processing(
            &convention,
            |id| resolved.get(&id).cloned()))
    }

    /// A printable listing of this procedure's statements in dataflow
    /// order.
    pub fn listing(&self) -> String {
        let mut listing = String::new();
        let ids = match self.ordered_statement_ids() {
            Ok(ids) => ids,
            Err(_) =>
                self.statements.keys().cloned().collect()
        };
        for id in ids {
            if let Ok(statement) = self.statement(id) {
                listing.push_str(&format!("{}\n", statement));
            }
        }
        listing
    }
}
