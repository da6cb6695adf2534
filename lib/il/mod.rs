//! Kestrel Intermediate Language.
//!
//! # An Introduction
//!
//! Kestrel IL is the expression-based intermediate language the
//! decompilation pipeline runs over. It is produced by an upstream
//! decoder as three-address-style statements grouped into RTLs and
//! fragments, and transformed in place by the passes until it is a typed,
//! named, locals-only form ready for emission.
//!
//! ## Position and Semantics
//!
//! Components of the IL belong to two groups:
//!
//! * Components which provide program semantics
//! * Components which provide location within a procedure
//!
//! The following components provide semantics:
//!
//! * `Constant`
//! * `Location`
//! * `Expression`
//! * `StatementKind` and its variants
//!
//! The following components provide location:
//!
//! * `Statement` / `StatementId`
//! * `Rtl`
//! * `Fragment` / `FragmentId`
//! * `FragmentGraph`
//! * `Procedure`
//! * `Program`
//!
//! ## `Expression`
//!
//! Expressions are operator trees over constants and locations. They are
//! value objects: equality is structural (modulo the canonicalization
//! performed by `simplify`), cloning is deep, and sharing between
//! statements is by clone, never by reference.
//!
//! During SSA, a use of a location is wrapped in `Expression::Ref`, a
//! *subscripted reference* pairing the location with the statement that
//! defines it. `Ref` is the only part of an expression that points back
//! into the owning procedure; it does so by `StatementId` handle.
//!
//! ## `Statement`
//!
//! A statement may define and use expressions. The variants are ordinary,
//! implicit, boolean and phi assignments, possibly-computed jumps,
//! branches, calls and returns. Statements are owned by a procedure-level
//! arena and addressed by handle; a statement knows its fragment and its
//! per-procedure number.
//!
//! The call statement is the most involved; see the `call` module.
//!
//! ## `Fragment` and `FragmentGraph`
//!
//! A fragment is a straight-line run of RTLs with at most one terminal
//! control-flow statement. Fragments form the procedure's control-flow
//! graph, whose typed edges record fall-through, taken, switch-case and
//! call-return flow. The graph computes and caches dominators,
//! post-dominators, dominance frontiers and reverse post-order.
//!
//! ## `Procedure` and `Program`
//!
//! A procedure exclusively owns its statements, fragments and symbol map,
//! and carries a signature, a status, and its caller/callee sets.
//! Procedures form a possibly-cyclic call graph resolved by iterating the
//! pipeline to a fixed point. A program is the set of procedures plus the
//! loaded image and library signature stubs.

mod call;
mod cfg;
mod constant;
mod expression;
mod fragment;
mod location;
mod procedure;
mod program;
mod rtl;
mod signature;
mod simplify;
mod statement;
pub mod visitor;

pub use self::call::*;
pub use self::cfg::*;
pub use self::constant::*;
pub use self::expression::*;
pub use self::fragment::*;
pub use self::location::*;
pub use self::procedure::*;
pub use self::program::*;
pub use self::rtl::*;
pub use self::signature::*;
pub use self::statement::*;

/// A convenience function to create a new integer constant expression.
pub fn expr_const(value: u64, bits: usize) -> Expression {
    Expression::constant(Constant::int(value, bits))
}

/// A convenience function to create a new string constant expression.
pub fn expr_str<S: Into<String>>(string: S) -> Expression {
    Expression::constant(Constant::string(string))
}

/// A convenience function to create a new register location expression.
pub fn reg(index: usize) -> Expression {
    Expression::location(Location::register(index))
}

/// A convenience function to create a new memory location expression.
pub fn mem(address: Expression) -> Expression {
    Expression::location(Location::memory(address))
}

/// A convenience function to create a new temporary location expression.
pub fn temp<S: Into<String>>(name: S) -> Expression {
    Expression::location(Location::temp(name))
}

/// A convenience function to create a new local location expression.
pub fn local<S: Into<String>>(name: S) -> Expression {
    Expression::location(Location::local(name))
}

/// A convenience function to create a new parameter location expression.
pub fn param<S: Into<String>>(name: S) -> Expression {
    Expression::location(Location::parameter(name))
}
