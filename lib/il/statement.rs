//! Statements define and use expressions.
//!
//! A `Statement` gives identity, numbering and location to a
//! `StatementKind`. Statements live in an arena owned by their procedure
//! and are referred to by `StatementId` handles; back-pointers between
//! statements (subscripted references, phi operands) are handles, never
//! owning references.

use il::*;
use std::fmt;
use types::Type;

/// A handle to a statement in its procedure's arena.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct StatementId(pub u64);

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The index of a fragment in its procedure's control-flow graph.
pub type FragmentId = usize;


/// An ordinary assignment: `*ty* lhs := rhs`.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Assign {
    pub ty: Type,
    pub lhs: Expression,
    pub rhs: Expression
}

impl Assign {
    pub fn new(lhs: Expression, rhs: Expression) -> Assign {
        Assign { ty: Type::Void, lhs: lhs, rhs: rhs }
    }

    pub fn typed(ty: Type, lhs: Expression, rhs: Expression) -> Assign {
        Assign { ty: ty, lhs: lhs, rhs: rhs }
    }
}

impl fmt::Display for Assign {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "*{}* {} := {}", self.ty, self.lhs, self.rhs)
    }
}


/// A definition carried by a call or return: a location and, optionally,
/// the expression that reaches it. A missing expression prints as `-`.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Define {
    pub ty: Type,
    pub lhs: Expression,
    pub rhs: Option<Expression>
}

impl Define {
    pub fn implicit(lhs: Expression) -> Define {
        Define { ty: Type::Void, lhs: lhs, rhs: None }
    }

    pub fn new(ty: Type, lhs: Expression, rhs: Option<Expression>) -> Define {
        Define { ty: ty, lhs: lhs, rhs: rhs }
    }
}

impl fmt::Display for Define {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.rhs {
            Some(ref rhs) => write!(f, "*{}* {} := {}", self.ty, self.lhs, rhs),
            None => write!(f, "*{}* {} := -", self.ty, self.lhs)
        }
    }
}


/// One operand of a phi-assign: the reference flowing in along one
/// predecessor edge.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PhiOperand {
    pub pred: FragmentId,
    /// Normally a subscripted reference to the operand's definition.
    pub exp: Expression
}

impl PhiOperand {
    /// The base location of this operand.
    pub fn base(&self) -> &Expression {
        self.exp.ref_base().unwrap_or(&self.exp)
    }

    /// The defining statement of this operand.
    pub fn def(&self) -> Option<StatementId> {
        self.exp.ref_def()
    }
}

/// An SSA merge pseudo-assignment with one operand per predecessor of its
/// fragment.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PhiAssign {
    pub ty: Type,
    pub lhs: Expression,
    pub operands: Vec<PhiOperand>
}

impl PhiAssign {
    pub fn new(lhs: Expression) -> PhiAssign {
        PhiAssign { ty: Type::Void, lhs: lhs, operands: Vec::new() }
    }

    pub fn operands(&self) -> &[PhiOperand] {
        &self.operands
    }

    /// The operand flowing in along the given predecessor.
    pub fn operand_for(&self, pred: FragmentId) -> Option<&PhiOperand> {
        self.operands.iter().find(|operand| operand.pred == pred)
    }

    pub fn set_operand(&mut self, pred: FragmentId, exp: Expression) {
        if let Some(operand) =
            self.operands.iter_mut().find(|operand| operand.pred == pred) {
            operand.exp = exp;
            return;
        }
        self.operands.push(PhiOperand { pred: pred, exp: exp });
    }

    pub fn remove_operand_for(&mut self, pred: FragmentId) {
        self.operands.retain(|operand| operand.pred != pred);
    }

    /// True when every operand has the same base location.
    pub fn defs_same_base(&self) -> bool {
        let mut bases = self.operands.iter().map(|operand| operand.base());
        match bases.next() {
            Some(first) => bases.all(|base| base == first),
            None => true
        }
    }

    /// True when every operand is the same reference: same base and same
    /// defining statement.
    pub fn operands_all_equal(&self) -> bool {
        let mut exps = self.operands.iter().map(|operand| &operand.exp);
        match exps.next() {
            Some(first) => exps.all(|exp| exp == first),
            None => true
        }
    }
}

impl fmt::Display for PhiAssign {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let operands: Vec<String> =
            self.operands.iter().map(|operand| operand.exp.to_string()).collect();
        write!(f, "*{}* {} := phi({})", self.ty, self.lhs, operands.join(", "))
    }
}


/// What switch recovery learned about a computed jump.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct SwitchInfo {
    /// Address of the jump table in the program image.
    pub table: u64,
    /// Number of cases, including case 0.
    pub num_cases: usize,
    /// The expression selecting the case.
    pub index: Expression,
    /// True for `goto table[table2[index]]` shapes.
    pub double_indirect: bool
}

/// A possibly-computed jump.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct GotoStatement {
    pub dest: Expression,
    pub computed: bool,
    pub switch_info: Option<SwitchInfo>
}

impl GotoStatement {
    pub fn new(dest: Expression) -> GotoStatement {
        let computed = !dest.is_constant();
        GotoStatement { dest: dest, computed: computed, switch_info: None }
    }
}

impl fmt::Display for GotoStatement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.computed {
            write!(f, "GOTO [{}]", self.dest)
        }
        else {
            write!(f, "GOTO {}", self.dest)
        }
    }
}


/// A two-way conditional branch. The fall-through target is implicit in
/// the fragment's out-edges.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct BranchStatement {
    pub condition: Expression,
    pub dest: Expression
}

impl fmt::Display for BranchStatement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BRANCH {} if {}", self.dest, self.condition)
    }
}


/// A return: one define per returned location, plus the set of locations
/// the procedure is known to modify.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ReturnStatement {
    pub returns: Vec<Define>,
    pub modifieds: Vec<Expression>
}

impl ReturnStatement {
    pub fn new() -> ReturnStatement {
        ReturnStatement { returns: Vec::new(), modifieds: Vec::new() }
    }

    pub fn add_return(&mut self, define: Define) {
        self.returns.push(define);
    }

    /// Remove the return for the given base location. Returns true if one
    /// was removed.
    pub fn remove_return(&mut self, base: &Expression) -> bool {
        let before = self.returns.len();
        self.returns.retain(|define| &define.lhs != base);
        self.returns.len() != before
    }

    /// Keep only the returns for the given base locations.
    pub fn update_returns(&mut self, keep: &::std::collections::BTreeSet<Expression>) -> bool {
        let before = self.returns.len();
        self.returns.retain(|define| keep.contains(&define.lhs));
        self.returns.len() != before
    }

    /// The define for the given base location, if any.
    pub fn find_definition_for(&self, base: &Expression) -> Option<&Define> {
        self.returns.iter().find(|define| &define.lhs == base)
    }
}

impl fmt::Display for ReturnStatement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let returns: Vec<String> =
            self.returns.iter().map(|define| define.to_string()).collect();
        write!(f, "RET {}", returns.join(", "))
    }
}


/// The variants of a statement.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum StatementKind {
    Assign(Assign),
    /// Marks "value on entry" for a location used before any definition.
    ImplicitAssign(Define),
    /// Assigns the truth value of a predicate.
    BoolAssign(Assign),
    Phi(PhiAssign),
    Goto(GotoStatement),
    Branch(BranchStatement),
    Call(CallStatement),
    Return(ReturnStatement)
}


/// A statement in a procedure.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Statement {
    id: StatementId,
    number: usize,
    fragment: FragmentId,
    kind: StatementKind
}

impl Statement {
    /// Create a new statement. Statements are created through their
    /// owning procedure, which allocates the id and fragment.
    pub(crate) fn new(id: StatementId, fragment: FragmentId, kind: StatementKind)
        -> Statement {

        Statement { id: id, number: 0, fragment: fragment, kind: kind }
    }

    pub fn id(&self) -> StatementId {
        self.id
    }

    /// The per-procedure number of this statement. 0 until numbering has
    /// run. A call's arguments and defines share the call's number by
    /// construction.
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn set_number(&mut self, number: usize) {
        self.number = number;
    }

    pub fn fragment(&self) -> FragmentId {
        self.fragment
    }

    pub fn set_fragment(&mut self, fragment: FragmentId) {
        self.fragment = fragment;
    }

    pub fn kind(&self) -> &StatementKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut StatementKind {
        &mut self.kind
    }

    pub fn set_kind(&mut self, kind: StatementKind) {
        self.kind = kind;
    }

    pub fn is_assign(&self) -> bool {
        if let StatementKind::Assign(_) = self.kind { true } else { false }
    }

    pub fn is_implicit(&self) -> bool {
        if let StatementKind::ImplicitAssign(_) = self.kind { true } else { false }
    }

    pub fn is_phi(&self) -> bool {
        if let StatementKind::Phi(_) = self.kind { true } else { false }
    }

    pub fn is_goto(&self) -> bool {
        if let StatementKind::Goto(_) = self.kind { true } else { false }
    }

    pub fn is_branch(&self) -> bool {
        if let StatementKind::Branch(_) = self.kind { true } else { false }
    }

    pub fn is_call(&self) -> bool {
        if let StatementKind::Call(_) = self.kind { true } else { false }
    }

    pub fn is_return(&self) -> bool {
        if let StatementKind::Return(_) = self.kind { true } else { false }
    }

    /// True for statements that end a fragment and determine its
    /// out-edges.
    pub fn is_terminal(&self) -> bool {
        match self.kind {
            StatementKind::Goto(_) | StatementKind::Branch(_) |
            StatementKind::Call(_) | StatementKind::Return(_) => true,
            _ => false
        }
    }

    /// The call statement, if this is a call.
    pub fn call(&self) -> Option<&CallStatement> {
        match self.kind {
            StatementKind::Call(ref call) => Some(call),
            _ => None
        }
    }

    pub fn call_mut(&mut self) -> Option<&mut CallStatement> {
        match self.kind {
            StatementKind::Call(ref mut call) => Some(call),
            _ => None
        }
    }

    /// The phi-assign, if this is one.
    pub fn phi(&self) -> Option<&PhiAssign> {
        match self.kind {
            StatementKind::Phi(ref phi) => Some(phi),
            _ => None
        }
    }

    pub fn phi_mut(&mut self) -> Option<&mut PhiAssign> {
        match self.kind {
            StatementKind::Phi(ref mut phi) => Some(phi),
            _ => None
        }
    }

    /// The base locations this statement defines.
    pub fn defined_locations(&self) -> Vec<&Expression> {
        match self.kind {
            StatementKind::Assign(ref assign) |
            StatementKind::BoolAssign(ref assign) => vec![&assign.lhs],
            StatementKind::ImplicitAssign(ref define) => vec![&define.lhs],
            StatementKind::Phi(ref phi) => vec![&phi.lhs],
            StatementKind::Call(ref call) =>
                call.defines().iter().map(|define| &define.lhs).collect(),
            _ => Vec::new()
        }
    }

    /// True if this statement defines the given base location.
    pub fn defines_loc(&self, base: &Expression) -> bool {
        self.defined_locations().into_iter().any(|lhs| lhs == base)
    }

    /// The recorded type of a location this statement defines.
    pub fn type_for(&self, base: &Expression) -> Option<&Type> {
        match self.kind {
            StatementKind::Assign(ref assign) |
            StatementKind::BoolAssign(ref assign) if &assign.lhs == base =>
                Some(&assign.ty),
            StatementKind::ImplicitAssign(ref define) if &define.lhs == base =>
                Some(&define.ty),
            StatementKind::Phi(ref phi) if &phi.lhs == base => Some(&phi.ty),
            StatementKind::Call(ref call) =>
                call.defines().iter()
                    .find(|define| &define.lhs == base)
                    .map(|define| &define.ty),
            _ => None
        }
    }

    /// Record the type of a location this statement defines. Returns true
    /// if the statement defines the location.
    pub fn set_type_for(&mut self, base: &Expression, ty: Type) -> bool {
        match self.kind {
            StatementKind::Assign(ref mut assign) |
            StatementKind::BoolAssign(ref mut assign) if &assign.lhs == base => {
                assign.ty = ty;
                true
            },
            StatementKind::ImplicitAssign(ref mut define)
                if &define.lhs == base => {
                define.ty = ty;
                true
            },
            StatementKind::Phi(ref mut phi) if &phi.lhs == base => {
                phi.ty = ty;
                true
            },
            StatementKind::Call(ref mut call) => {
                match call.defines_mut().iter_mut()
                    .find(|define| &define.lhs == base) {
                    Some(define) => {
                        define.ty = ty;
                        true
                    },
                    None => false
                }
            },
            _ => false
        }
    }

    /// The expressions this statement reads: right-hand sides, branch and
    /// jump targets, call arguments, and the addresses of written memory
    /// locations. Phi operands are included; collector snapshots are not.
    pub fn used_expressions(&self) -> Vec<&Expression> {
        let mut used: Vec<&Expression> = Vec::new();
        match self.kind {
            StatementKind::Assign(ref assign) |
            StatementKind::BoolAssign(ref assign) => {
                used.push(&assign.rhs);
                if let Some(address) =
                    assign.lhs.get_location().and_then(|l| l.address()) {
                    used.push(address);
                }
            },
            StatementKind::ImplicitAssign(_) => {},
            StatementKind::Phi(ref phi) => {
                for operand in &phi.operands {
                    used.push(&operand.exp);
                }
            },
            StatementKind::Goto(ref goto) => used.push(&goto.dest),
            StatementKind::Branch(ref branch) => used.push(&branch.condition),
            StatementKind::Call(ref call) => {
                if call.is_computed() {
                    used.push(call.dest());
                }
                for argument in call.arguments() {
                    used.push(&argument.rhs);
                    if let Some(address) =
                        argument.lhs.get_location().and_then(|l| l.address()) {
                        used.push(address);
                    }
                }
            },
            StatementKind::Return(ref ret) => {
                for define in &ret.returns {
                    if let Some(ref rhs) = define.rhs {
                        used.push(rhs);
                    }
                }
            }
        }
        used
    }

    /// Every subscripted reference this statement reads.
    pub fn used_refs(&self) -> Vec<&Expression> {
        self.used_expressions()
            .into_iter()
            .flat_map(|e| e.refs())
            .collect()
    }

    /// Search every expression of this statement for `pattern`.
    pub fn search(&self, pattern: &Expression) -> Option<&Expression> {
        for e in self.expressions() {
            if let Some(found) = e.search(pattern) {
                return Some(found);
            }
        }
        None
    }

    /// Find every occurrence of `pattern` across this statement's
    /// expressions.
    pub fn search_all(&self, pattern: &Expression) -> Vec<&Expression> {
        self.expressions()
            .into_iter()
            .flat_map(|e| e.search_all(pattern))
            .collect()
    }

    /// Replace every occurrence of `pattern` across this statement's
    /// expressions. Returns the number of replacements.
    pub fn search_and_replace(
        &mut self,
        pattern: &Expression,
        replacement: &Expression
    ) -> usize {
        let mut count = 0;
        for e in self.expressions_mut() {
            count += e.search_and_replace(pattern, replacement);
        }
        count
    }

    /// Every expression slot of this statement, definitions included.
    pub fn expressions(&self) -> Vec<&Expression> {
        let mut expressions: Vec<&Expression> = Vec::new();
        match self.kind {
            StatementKind::Assign(ref assign) |
            StatementKind::BoolAssign(ref assign) => {
                expressions.push(&assign.lhs);
                expressions.push(&assign.rhs);
            },
            StatementKind::ImplicitAssign(ref define) => {
                expressions.push(&define.lhs);
            },
            StatementKind::Phi(ref phi) => {
                expressions.push(&phi.lhs);
                for operand in &phi.operands {
                    expressions.push(&operand.exp);
                }
            },
            StatementKind::Goto(ref goto) => expressions.push(&goto.dest),
            StatementKind::Branch(ref branch) => {
                expressions.push(&branch.condition);
                expressions.push(&branch.dest);
            },
            StatementKind::Call(ref call) => {
                expressions.push(call.dest());
                for argument in call.arguments() {
                    expressions.push(&argument.lhs);
                    expressions.push(&argument.rhs);
                }
                for define in call.defines() {
                    expressions.push(&define.lhs);
                    if let Some(ref rhs) = define.rhs {
                        expressions.push(rhs);
                    }
                }
            },
            StatementKind::Return(ref ret) => {
                for define in &ret.returns {
                    expressions.push(&define.lhs);
                    if let Some(ref rhs) = define.rhs {
                        expressions.push(rhs);
                    }
                }
                for modified in &ret.modifieds {
                    expressions.push(modified);
                }
            }
        }
        expressions
    }

    /// Mutable references to every expression slot of this statement.
    pub fn expressions_mut(&mut self) -> Vec<&mut Expression> {
        let mut expressions: Vec<&mut Expression> = Vec::new();
        match self.kind {
            StatementKind::Assign(ref mut assign) |
            StatementKind::BoolAssign(ref mut assign) => {
                expressions.push(&mut assign.lhs);
                expressions.push(&mut assign.rhs);
            },
            StatementKind::ImplicitAssign(ref mut define) => {
                expressions.push(&mut define.lhs);
            },
            StatementKind::Phi(ref mut phi) => {
                expressions.push(&mut phi.lhs);
                for operand in &mut phi.operands {
                    expressions.push(&mut operand.exp);
                }
            },
            StatementKind::Goto(ref mut goto) =>
                expressions.push(&mut goto.dest),
            StatementKind::Branch(ref mut branch) => {
                expressions.push(&mut branch.condition);
                expressions.push(&mut branch.dest);
            },
            StatementKind::Call(ref mut call) => {
                for e in call.expressions_mut() {
                    expressions.push(e);
                }
            },
            StatementKind::Return(ref mut ret) => {
                for define in &mut ret.returns {
                    expressions.push(&mut define.lhs);
                    if let Some(ref mut rhs) = define.rhs {
                        expressions.push(rhs);
                    }
                }
                for modified in &mut ret.modifieds {
                    expressions.push(modified);
                }
            }
        }
        expressions
    }

    /// Simplify every expression of this statement in place.
    pub fn simplify(&mut self) {
        for e in self.expressions_mut() {
            let simplified = e.clone().simplify();
            *e = simplified;
        }
        // Folding the destination of a computed call to a constant does
        // not clear the computed flag here; see
        // `Settings::update_computed_flag_on_fold`.
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:4} ", self.number)?;
        match self.kind {
            StatementKind::Assign(ref assign) => write!(f, "{}", assign),
            StatementKind::ImplicitAssign(ref define) => write!(f, "{}", define),
            StatementKind::BoolAssign(ref assign) => write!(f, "{}", assign),
            StatementKind::Phi(ref phi) => write!(f, "{}", phi),
            StatementKind::Goto(ref goto) => write!(f, "{}", goto),
            StatementKind::Branch(ref branch) => write!(f, "{}", branch),
            StatementKind::Call(ref call) => call.fmt_with_number(f, self.number),
            StatementKind::Return(ref ret) => write!(f, "{}", ret)
        }
    }
}
