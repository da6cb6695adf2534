//! Visitor and modifier traversals over expressions.
//!
//! Visitors observe: they may prune children or stop the walk early, but
//! cannot change what they visit. Modifiers rewrite: they always recurse
//! to the leaves and rebuild each node bottom-up, so a modifier may change
//! the variant of any node, including the root. The two traversals share
//! the child enumeration on `Expression`; keep the distinction when adding
//! new walks.

use il::*;

/// What a visitor wants done after seeing a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VisitAction {
    /// Continue into this node's children.
    Continue,
    /// Do not descend into this node's children.
    SkipChildren,
    /// Stop the entire walk.
    Stop
}

/// Observes expressions during a depth-first walk.
pub trait ExpressionVisitor {
    fn visit(&mut self, expression: &Expression) -> VisitAction;
}

/// Walk an expression tree depth-first, parents before children. Returns
/// `false` if the visitor stopped the walk.
pub fn walk_expression<V>(visitor: &mut V, expression: &Expression) -> bool
    where V: ExpressionVisitor {

    match visitor.visit(expression) {
        VisitAction::Stop => return false,
        VisitAction::SkipChildren => return true,
        VisitAction::Continue => {}
    }
    for child in expression.children() {
        if !walk_expression(visitor, child) {
            return false;
        }
    }
    true
}


/// Rewrites expressions bottom-up.
pub trait ExpressionModifier {
    /// Produce the replacement for a node whose children have already been
    /// rewritten.
    fn modify(&mut self, expression: Expression) -> Expression;
}

/// Rebuild an expression tree bottom-up through a modifier.
pub fn rewrite_expression<M>(modifier: &mut M, expression: Expression)
    -> Expression where M: ExpressionModifier {

    let expression = match expression {
        Expression::Constant(_) | Expression::Terminal(_) => expression,
        Expression::Unary { op, operand } => Expression::Unary {
            op: op,
            operand: Box::new(rewrite_expression(modifier, *operand))
        },
        Expression::Binary { op, lhs, rhs } => Expression::Binary {
            op: op,
            lhs: Box::new(rewrite_expression(modifier, *lhs)),
            rhs: Box::new(rewrite_expression(modifier, *rhs))
        },
        Expression::Ternary { op, cond, then, otherwise } =>
            Expression::Ternary {
                op: op,
                cond: Box::new(rewrite_expression(modifier, *cond)),
                then: Box::new(rewrite_expression(modifier, *then)),
                otherwise: Box::new(rewrite_expression(modifier, *otherwise))
            },
        Expression::Location(location) => match location {
            Location::Memory(address) =>
                Expression::Location(Location::Memory(
                    Box::new(rewrite_expression(modifier, *address)))),
            location => Expression::Location(location)
        },
        Expression::Ref { base, def } => Expression::Ref {
            base: Box::new(rewrite_expression(modifier, *base)),
            def: def
        },
        Expression::Typed { ty, operand } => Expression::Typed {
            ty: ty,
            operand: Box::new(rewrite_expression(modifier, *operand))
        },
        Expression::SizeCast { bits, operand } => Expression::SizeCast {
            bits: bits,
            operand: Box::new(rewrite_expression(modifier, *operand))
        }
    };
    modifier.modify(expression)
}


#[cfg(test)]
mod tests {
    use super::*;
    use il::*;

    struct CountLocations(usize);

    impl ExpressionVisitor for CountLocations {
        fn visit(&mut self, expression: &Expression) -> VisitAction {
            if expression.is_location() {
                self.0 += 1;
            }
            VisitAction::Continue
        }
    }

    struct StopAtFirstConstant(usize);

    impl ExpressionVisitor for StopAtFirstConstant {
        fn visit(&mut self, expression: &Expression) -> VisitAction {
            self.0 += 1;
            if expression.is_constant() {
                VisitAction::Stop
            }
            else {
                VisitAction::Continue
            }
        }
    }

    struct RegisterToLocal;

    impl ExpressionModifier for RegisterToLocal {
        fn modify(&mut self, expression: Expression) -> Expression {
            match expression {
                Expression::Location(Location::Register(index)) =>
                    Expression::location(
                        Location::local(format!("local{}", index))),
                expression => expression
            }
        }
    }

    fn reg(index: usize) -> Expression {
        Expression::location(Location::register(index))
    }

    #[test]
    fn visitor_sees_every_node() {
        let e = Expression::location(Location::memory(
            Expression::add(reg(28), Expression::constant(Constant::int(4, 32)))));
        let mut counter = CountLocations(0);
        assert!(walk_expression(&mut counter, &e));
        assert_eq!(counter.0, 2);
    }

    #[test]
    fn visitor_can_stop_early() {
        let e = Expression::add(
            Expression::constant(Constant::int(1, 32)),
            Expression::constant(Constant::int(2, 32)));
        let mut visitor = StopAtFirstConstant(0);
        assert!(!walk_expression(&mut visitor, &e));
        // The add and its first constant; the second constant is never
        // visited.
        assert_eq!(visitor.0, 2);
    }

    #[test]
    fn modifier_recurses_fully_and_can_change_variants() {
        let e = Expression::location(Location::memory(
            Expression::add(reg(28), reg(24))));
        let rewritten = rewrite_expression(&mut RegisterToLocal, e);
        assert_eq!(rewritten.to_string(), "m[local28 + local24]");
    }
}
