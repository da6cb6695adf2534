//! An `Expression` is an operator tree over constants and locations.
//!
//! Expressions are value objects: equality, ordering and hashing are
//! structural, and cloning is deep. Statements own their top-level
//! expression trees exclusively; a pass that wants to move an expression
//! between statements clones it.

use il::*;
use std::fmt;
use types::Type;

/// Distinguished terminal expressions.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Terminal {
    /// The program counter.
    Pc,
    /// The machine flags word.
    Flags,
    /// The absent value.
    Nil
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum UnaryOp {
    Neg,
    Not,
    LogicalNot,
    AddressOf
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Divs,
    Divu,
    Mods,
    Modu,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    CmpEq,
    CmpNe,
    CmpLts,
    CmpLtu,
    CmpLes,
    CmpLeu,
    CmpGts,
    CmpGtu,
    CmpGes,
    CmpGeu,
    LogicalAnd,
    LogicalOr
}

impl BinaryOp {
    /// True for operators where operand order does not matter.
    pub fn is_commutative(&self) -> bool {
        match *self {
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or |
            BinaryOp::Xor | BinaryOp::CmpEq | BinaryOp::CmpNe |
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => true,
            _ => false
        }
    }

    /// True for comparison operators, which produce a 1-bit value.
    pub fn is_comparison(&self) -> bool {
        match *self {
            BinaryOp::CmpEq | BinaryOp::CmpNe |
            BinaryOp::CmpLts | BinaryOp::CmpLtu |
            BinaryOp::CmpLes | BinaryOp::CmpLeu |
            BinaryOp::CmpGts | BinaryOp::CmpGtu |
            BinaryOp::CmpGes | BinaryOp::CmpGeu => true,
            _ => false
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum TernaryOp {
    /// If-then-else over a 1-bit condition.
    Ite
}


/// An expression tree.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Expression {
    Constant(Constant),
    Terminal(Terminal),
    Unary { op: UnaryOp, operand: Box<Expression> },
    Binary { op: BinaryOp, lhs: Box<Expression>, rhs: Box<Expression> },
    Ternary {
        op: TernaryOp,
        cond: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>
    },
    Location(Location),
    /// A subscripted reference: a use of `base` paired with the statement
    /// that defines it. `def` is `None` only transiently inside passes
    /// and for collector snapshots of values live on entry.
    Ref { base: Box<Expression>, def: Option<StatementId> },
    /// An expression with an explicitly recorded type.
    Typed { ty: Type, operand: Box<Expression> },
    /// A truncation or extension of an expression to a width in bits.
    SizeCast { bits: usize, operand: Box<Expression> }
}

impl Expression {
    pub fn constant(constant: Constant) -> Expression {
        Expression::Constant(constant)
    }

    pub fn location(location: Location) -> Expression {
        Expression::Location(location)
    }

    pub fn unary(op: UnaryOp, operand: Expression) -> Expression {
        Expression::Unary { op: op, operand: Box::new(operand) }
    }

    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression)
        -> Expression {

        Expression::Binary {
            op: op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs)
        }
    }

    pub fn neg(operand: Expression) -> Expression {
        Expression::unary(UnaryOp::Neg, operand)
    }

    pub fn not(operand: Expression) -> Expression {
        Expression::unary(UnaryOp::Not, operand)
    }

    pub fn logical_not(operand: Expression) -> Expression {
        Expression::unary(UnaryOp::LogicalNot, operand)
    }

    pub fn address_of(operand: Expression) -> Expression {
        Expression::unary(UnaryOp::AddressOf, operand)
    }

    pub fn add(lhs: Expression, rhs: Expression) -> Expression {
        Expression::binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expression, rhs: Expression) -> Expression {
        Expression::binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expression, rhs: Expression) -> Expression {
        Expression::binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn and(lhs: Expression, rhs: Expression) -> Expression {
        Expression::binary(BinaryOp::And, lhs, rhs)
    }

    pub fn or(lhs: Expression, rhs: Expression) -> Expression {
        Expression::binary(BinaryOp::Or, lhs, rhs)
    }

    pub fn xor(lhs: Expression, rhs: Expression) -> Expression {
        Expression::binary(BinaryOp::Xor, lhs, rhs)
    }

    pub fn shl(lhs: Expression, rhs: Expression) -> Expression {
        Expression::binary(BinaryOp::Shl, lhs, rhs)
    }

    pub fn cmp_eq(lhs: Expression, rhs: Expression) -> Expression {
        Expression::binary(BinaryOp::CmpEq, lhs, rhs)
    }

    pub fn cmp_ne(lhs: Expression, rhs: Expression) -> Expression {
        Expression::binary(BinaryOp::CmpNe, lhs, rhs)
    }

    pub fn ite(cond: Expression, then: Expression, otherwise: Expression)
        -> Expression {

        Expression::Ternary {
            op: TernaryOp::Ite,
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise)
        }
    }

    /// Wrap a use in a subscripted reference to its defining statement.
    pub fn subscript(base: Expression, def: Option<StatementId>)
        -> Expression {

        Expression::Ref { base: Box::new(base), def: def }
    }

    pub fn typed(ty: Type, operand: Expression) -> Expression {
        Expression::Typed { ty: ty, operand: Box::new(operand) }
    }

    pub fn size_cast(bits: usize, operand: Expression) -> Expression {
        Expression::SizeCast { bits: bits, operand: Box::new(operand) }
    }

    pub fn is_constant(&self) -> bool {
        if let Expression::Constant(_) = *self { true } else { false }
    }

    pub fn is_location(&self) -> bool {
        if let Expression::Location(_) = *self { true } else { false }
    }

    pub fn is_memory(&self) -> bool {
        match *self {
            Expression::Location(ref location) => location.is_memory(),
            _ => false
        }
    }

    pub fn is_ref(&self) -> bool {
        if let Expression::Ref { .. } = *self { true } else { false }
    }

    /// The constant, if this expression is one.
    pub fn get_constant(&self) -> Option<&Constant> {
        match *self {
            Expression::Constant(ref constant) => Some(constant),
            _ => None
        }
    }

    /// The value of an integer constant expression, zero-extended.
    pub fn int_value(&self) -> Option<u64> {
        self.get_constant().and_then(|constant| constant.value_u64())
    }

    /// The location, if this expression is one.
    pub fn get_location(&self) -> Option<&Location> {
        match *self {
            Expression::Location(ref location) => Some(location),
            _ => None
        }
    }

    pub fn get_location_mut(&mut self) -> Option<&mut Location> {
        match *self {
            Expression::Location(ref mut location) => Some(location),
            _ => None
        }
    }

    /// The base expression of a subscripted reference.
    pub fn ref_base(&self) -> Option<&Expression> {
        match *self {
            Expression::Ref { ref base, .. } => Some(base),
            _ => None
        }
    }

    /// The defining statement of a subscripted reference.
    pub fn ref_def(&self) -> Option<StatementId> {
        match *self {
            Expression::Ref { def, .. } => def,
            _ => None
        }
    }

    /// The immediate child expressions of this node.
    pub fn children(&self) -> Vec<&Expression> {
        match *self {
            Expression::Constant(_) | Expression::Terminal(_) => Vec::new(),
            Expression::Unary { ref operand, .. } => vec![operand],
            Expression::Binary { ref lhs, ref rhs, .. } => vec![lhs, rhs],
            Expression::Ternary { ref cond, ref then, ref otherwise, .. } =>
                vec![cond, then, otherwise],
            Expression::Location(ref location) => match *location {
                Location::Memory(ref address) => vec![address],
                _ => Vec::new()
            },
            Expression::Ref { ref base, .. } => vec![base],
            Expression::Typed { ref operand, .. } => vec![operand],
            Expression::SizeCast { ref operand, .. } => vec![operand]
        }
    }

    /// Mutable references to the immediate child expressions of this node.
    pub fn children_mut(&mut self) -> Vec<&mut Expression> {
        match *self {
            Expression::Constant(_) | Expression::Terminal(_) => Vec::new(),
            Expression::Unary { ref mut operand, .. } => vec![operand],
            Expression::Binary { ref mut lhs, ref mut rhs, .. } =>
                vec![lhs, rhs],
            Expression::Ternary {
                ref mut cond, ref mut then, ref mut otherwise, ..
            } => vec![cond, then, otherwise],
            Expression::Location(ref mut location) => match *location {
                Location::Memory(ref mut address) => vec![address],
                _ => Vec::new()
            },
            Expression::Ref { ref mut base, .. } => vec![base],
            Expression::Typed { ref mut operand, .. } => vec![operand],
            Expression::SizeCast { ref mut operand, .. } => vec![operand]
        }
    }

    /// Every location node in this expression, depth-first, including
    /// locations nested in memory addresses and reference bases.
    pub fn locations(&self) -> Vec<&Expression> {
        let mut locations = Vec::new();
        self.collect_locations(&mut locations);
        locations
    }

    fn collect_locations<'a>(&'a self, locations: &mut Vec<&'a Expression>) {
        if self.is_location() {
            locations.push(self);
        }
        for child in self.children() {
            child.collect_locations(locations);
        }
    }

    /// Every subscripted reference in this expression, depth-first.
    pub fn refs(&self) -> Vec<&Expression> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, refs: &mut Vec<&'a Expression>) {
        if self.is_ref() {
            refs.push(self);
        }
        for child in self.children() {
            child.collect_refs(refs);
        }
    }

    /// True if `pattern` occurs as a subtree of this expression.
    pub fn contains(&self, pattern: &Expression) -> bool {
        self.search(pattern).is_some()
    }

    /// Find the first subtree structurally equal to `pattern`.
    pub fn search(&self, pattern: &Expression) -> Option<&Expression> {
        if self == pattern {
            return Some(self);
        }
        for child in self.children() {
            if let Some(found) = child.search(pattern) {
                return Some(found);
            }
        }
        None
    }

    /// Find every subtree structurally equal to `pattern`.
    pub fn search_all(&self, pattern: &Expression) -> Vec<&Expression> {
        let mut found = Vec::new();
        self.search_all_into(pattern, &mut found);
        found
    }

    fn search_all_into<'a>(
        &'a self,
        pattern: &Expression,
        found: &mut Vec<&'a Expression>
    ) {
        if self == pattern {
            found.push(self);
            return;
        }
        for child in self.children() {
            child.search_all_into(pattern, found);
        }
    }

    /// Replace every subtree structurally equal to `pattern` with a clone
    /// of `replacement`. Returns the number of replacements made.
    /// Replacement subtrees are not themselves searched.
    pub fn search_and_replace(
        &mut self,
        pattern: &Expression,
        replacement: &Expression
    ) -> usize {
        if self == pattern {
            *self = replacement.clone();
            return 1;
        }
        let mut count = 0;
        for child in self.children_mut() {
            count += child.search_and_replace(pattern, replacement);
        }
        count
    }

    /// Remove every subscripted reference in this expression, leaving the
    /// bases behind.
    pub fn strip_subscripts(self) -> Expression {
        use il::visitor::{rewrite_expression, ExpressionModifier};

        struct Strip;
        impl ExpressionModifier for Strip {
            fn modify(&mut self, expression: Expression) -> Expression {
                match expression {
                    Expression::Ref { base, .. } => *base,
                    expression => expression
                }
            }
        }
        rewrite_expression(&mut Strip, self)
    }
}


fn operand_fmt(e: &Expression) -> String {
    match *e {
        Expression::Binary { .. } | Expression::Ternary { .. } =>
            format!("({})", e),
        _ => format!("{}", e)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Expression::Constant(ref constant) => write!(f, "{}", constant),
            Expression::Terminal(terminal) => match terminal {
                Terminal::Pc => write!(f, "%pc"),
                Terminal::Flags => write!(f, "%flags"),
                Terminal::Nil => write!(f, "nil")
            },
            Expression::Unary { op, ref operand } => match op {
                UnaryOp::Neg => write!(f, "-{}", operand_fmt(operand)),
                UnaryOp::Not => write!(f, "~{}", operand_fmt(operand)),
                UnaryOp::LogicalNot => write!(f, "!{}", operand_fmt(operand)),
                UnaryOp::AddressOf => write!(f, "a[{}]", operand)
            },
            Expression::Binary { op, ref lhs, ref rhs } => {
                let op = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Divs => "/",
                    BinaryOp::Divu => "/u",
                    BinaryOp::Mods => "%",
                    BinaryOp::Modu => "%u",
                    BinaryOp::And => "&",
                    BinaryOp::Or => "|",
                    BinaryOp::Xor => "^",
                    BinaryOp::Shl => "<<",
                    BinaryOp::Shr => ">>",
                    BinaryOp::Sar => ">>A",
                    BinaryOp::CmpEq => "=",
                    BinaryOp::CmpNe => "~=",
                    BinaryOp::CmpLts => "<",
                    BinaryOp::CmpLtu => "<u",
                    BinaryOp::CmpLes => "<=",
                    BinaryOp::CmpLeu => "<=u",
                    BinaryOp::CmpGts => ">",
                    BinaryOp::CmpGtu => ">u",
                    BinaryOp::CmpGes => ">=",
                    BinaryOp::CmpGeu => ">=u",
                    BinaryOp::LogicalAnd => "and",
                    BinaryOp::LogicalOr => "or"
                };
                write!(f, "{} {} {}", operand_fmt(lhs), op, operand_fmt(rhs))
            },
            Expression::Ternary { ref cond, ref then, ref otherwise, .. } =>
                write!(f, "{} ? {} : {}",
                       operand_fmt(cond),
                       operand_fmt(then),
                       operand_fmt(otherwise)),
            Expression::Location(ref location) => write!(f, "{}", location),
            Expression::Ref { ref base, def } => match def {
                Some(def) => write!(f, "{}{{{}}}", operand_fmt(base), def),
                None => write!(f, "{}{{-}}", operand_fmt(base))
            },
            Expression::Typed { ref ty, ref operand } =>
                write!(f, "*{}* {}", ty, operand_fmt(operand)),
            Expression::SizeCast { bits, ref operand } =>
                write!(f, "({}){}", bits, operand_fmt(operand))
        }
    }
}


#[cfg(test)]
mod tests {
    use il::*;

    fn reg(index: usize) -> Expression {
        Expression::location(Location::register(index))
    }

    #[test]
    fn clone_is_structurally_equal() {
        let e = Expression::add(
            reg(24),
            Expression::constant(Constant::int(8, 32)));
        let c = e.clone();
        assert_eq!(e, c);
    }

    #[test]
    fn search_finds_nested_subtrees() {
        let e = Expression::location(Location::memory(
            Expression::add(reg(28), Expression::constant(Constant::int(8, 32)))));
        assert!(e.contains(&reg(28)));
        assert!(!e.contains(&reg(24)));
        assert_eq!(e.search_all(&reg(28)).len(), 1);
    }

    #[test]
    fn search_and_replace_replaces_every_occurrence() {
        let mut e = Expression::add(reg(24), reg(24));
        let count = e.search_and_replace(&reg(24), &reg(25));
        assert_eq!(count, 2);
        assert_eq!(e, Expression::add(reg(25), reg(25)));
    }

    #[test]
    fn locations_reach_into_memory_addresses() {
        let e = Expression::location(Location::memory(
            Expression::add(reg(28), Expression::constant(Constant::int(4, 32)))));
        let locations = e.locations();
        assert_eq!(locations.len(), 2);
        assert_eq!(*locations[0], e);
        assert_eq!(*locations[1], reg(28));
    }

    #[test]
    fn display() {
        let e = Expression::location(Location::memory(
            Expression::add(reg(28), Expression::constant(Constant::int(8, 32)))));
        assert_eq!(e.to_string(), "m[r28 + 8]");
        let r = Expression::subscript(e, None);
        assert_eq!(r.to_string(), "m[r28 + 8]{-}");
    }

    #[test]
    fn strip_subscripts_removes_nested_refs() {
        let inner = Expression::subscript(reg(28), None);
        let e = Expression::subscript(
            Expression::location(Location::memory(
                Expression::add(inner, Expression::constant(Constant::int(8, 32))))),
            None);
        let stripped = e.strip_subscripts();
        assert_eq!(
            stripped.to_string(),
            "m[r28 + 8]");
    }
}
