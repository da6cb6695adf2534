//! Canonical simplification of expressions.
//!
//! `simplify` rewrites an expression bottom-up to a fixed point, and is
//! idempotent: `simplify(simplify(e)) == simplify(e)`. Arithmetic is
//! folded with the wrapping semantics of the target machine widths.
//! Reassociation is performed only where it enables folding.

use il::constant::{mask, sign_extend};
use il::visitor::{rewrite_expression, ExpressionModifier};
use il::*;

impl Expression {
    /// Rewrite this expression to its canonical simplified form.
    pub fn simplify(self) -> Expression {
        let mut current = self;
        loop {
            let next = rewrite_expression(&mut Simplify, current.clone());
            if next == current {
                return current;
            }
            current = next;
        }
    }
}


struct Simplify;

impl ExpressionModifier for Simplify {
    fn modify(&mut self, expression: Expression) -> Expression {
        match expression {
            Expression::Unary { op, operand } => simplify_unary(op, *operand),
            Expression::Binary { op, lhs, rhs } =>
                simplify_binary(op, *lhs, *rhs),
            Expression::Ternary { op: TernaryOp::Ite, cond, then, otherwise } =>
                match cond.int_value() {
                    Some(0) => *otherwise,
                    Some(_) => *then,
                    None => Expression::Ternary {
                        op: TernaryOp::Ite,
                        cond: cond,
                        then: then,
                        otherwise: otherwise
                    }
                },
            Expression::Location(Location::Memory(address)) => {
                // m[a[e]] is e.
                if let Expression::Unary { op: UnaryOp::AddressOf, operand } =
                    *address {
                    *operand
                }
                else {
                    Expression::Location(Location::Memory(address))
                }
            },
            Expression::Typed { ty, operand } => simplify_typed(ty, *operand),
            Expression::SizeCast { bits, operand } =>
                simplify_size_cast(bits, *operand),
            expression => expression
        }
    }
}


fn int_const(e: &Expression) -> Option<(u64, usize)> {
    match *e {
        Expression::Constant(Constant::Int { value, bits }) =>
            Some((value, bits)),
        _ => None
    }
}

fn float_const(e: &Expression) -> Option<(f64, usize)> {
    match *e {
        Expression::Constant(Constant::Float { pattern, bits }) =>
            Some((f64::from_bits(pattern), bits)),
        _ => None
    }
}

/// A width to use for constants synthesized by identities like `x - x`.
fn width_hint(e: &Expression) -> usize {
    match *e {
        Expression::Constant(ref constant) => constant.bits(),
        Expression::SizeCast { bits, .. } => bits,
        _ => 32
    }
}

fn zero(bits: usize) -> Expression {
    Expression::constant(Constant::int(0, bits))
}

fn truth(value: bool) -> Expression {
    Expression::constant(Constant::int(if value { 1 } else { 0 }, 1))
}


fn simplify_unary(op: UnaryOp, operand: Expression) -> Expression {
    if let Some((value, bits)) = int_const(&operand) {
        match op {
            UnaryOp::Neg =>
                return Expression::constant(
                    Constant::int((value as i64).wrapping_neg() as u64, bits)),
            UnaryOp::Not =>
                return Expression::constant(Constant::int(!value, bits)),
            UnaryOp::LogicalNot => return truth(value == 0),
            UnaryOp::AddressOf => {}
        }
    }
    match (op, operand) {
        (UnaryOp::Neg,
         Expression::Unary { op: UnaryOp::Neg, operand }) => *operand,
        (UnaryOp::Not,
         Expression::Unary { op: UnaryOp::Not, operand }) => *operand,
        (UnaryOp::LogicalNot,
         Expression::Unary { op: UnaryOp::LogicalNot, operand }) => *operand,
        // a[m[e]] is e.
        (UnaryOp::AddressOf,
         Expression::Location(Location::Memory(address))) => *address,
        (op, operand) => Expression::unary(op, operand)
    }
}


fn simplify_binary(op: BinaryOp, lhs: Expression, rhs: Expression)
    -> Expression {

    // Canonical order: constants ride on the right of commutative
    // operators.
    let (lhs, rhs) =
        if op.is_commutative() && lhs.is_constant() && !rhs.is_constant() {
            (rhs, lhs)
        }
        else {
            (lhs, rhs)
        };

    if let (Some(a), Some(b)) = (int_const(&lhs), int_const(&rhs)) {
        if let Some(folded) = fold_int(op, a, b) {
            return Expression::constant(folded);
        }
    }
    if let (Some(a), Some(b)) = (float_const(&lhs), float_const(&rhs)) {
        if let Some(folded) = fold_float(op, a, b) {
            return Expression::constant(folded);
        }
    }

    let rhs_value = int_const(&rhs).map(|(value, _)| value);
    let rhs_bits = int_const(&rhs).map(|(_, bits)| bits);

    match op {
        BinaryOp::Add => {
            if rhs_value == Some(0) {
                return lhs;
            }
            // Reassociate (x + c1) + c2 and (x - c1) + c2 to enable
            // folding.
            if let Some((c2, b2)) = int_const(&rhs) {
                if let Expression::Binary {
                    op: inner_op, lhs: x, rhs: c1
                } = lhs.clone() {
                    if let Some((c1, b1)) = int_const(&c1) {
                        let bits = ::std::cmp::max(b1, b2);
                        match inner_op {
                            BinaryOp::Add => return Expression::add(
                                *x,
                                Expression::constant(
                                    Constant::int(c1.wrapping_add(c2), bits))),
                            BinaryOp::Sub => return Expression::add(
                                *x,
                                Expression::constant(
                                    Constant::int(c2.wrapping_sub(c1), bits))),
                            _ => {}
                        }
                    }
                }
            }
            Expression::add(lhs, rhs)
        },
        BinaryOp::Sub => {
            if rhs_value == Some(0) {
                return lhs;
            }
            if lhs == rhs {
                return zero(width_hint(&lhs));
            }
            if let Some((c2, b2)) = int_const(&rhs) {
                if let Expression::Binary {
                    op: BinaryOp::Add, lhs: x, rhs: c1
                } = lhs.clone() {
                    if let Some((c1, b1)) = int_const(&c1) {
                        let bits = ::std::cmp::max(b1, b2);
                        return Expression::add(
                            *x,
                            Expression::constant(
                                Constant::int(c1.wrapping_sub(c2), bits)));
                    }
                }
            }
            Expression::sub(lhs, rhs)
        },
        BinaryOp::Mul => {
            match rhs_value {
                Some(0) => return zero(rhs_bits.unwrap()),
                Some(1) => return lhs,
                Some(value) if value.is_power_of_two() =>
                    // Strength reduction: multiplication by a power of two
                    // becomes a shift.
                    return Expression::shl(
                        lhs,
                        Expression::constant(Constant::int(
                            value.trailing_zeros() as u64,
                            rhs_bits.unwrap()))),
                _ => {}
            }
            Expression::mul(lhs, rhs)
        },
        BinaryOp::Divs | BinaryOp::Divu if rhs_value == Some(1) => lhs,
        BinaryOp::Mods | BinaryOp::Modu if rhs_value == Some(1) =>
            zero(width_hint(&lhs)),
        BinaryOp::And => {
            if rhs_value == Some(0) {
                return zero(rhs_bits.unwrap());
            }
            if let Some((value, bits)) = int_const(&rhs) {
                if value == mask(!0, bits) {
                    return lhs;
                }
            }
            if lhs == rhs {
                return lhs;
            }
            Expression::and(lhs, rhs)
        },
        BinaryOp::Or => {
            if rhs_value == Some(0) || lhs == rhs {
                return lhs;
            }
            Expression::or(lhs, rhs)
        },
        BinaryOp::Xor => {
            if rhs_value == Some(0) {
                return lhs;
            }
            if lhs == rhs {
                return zero(width_hint(&lhs));
            }
            Expression::xor(lhs, rhs)
        },
        BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Sar
            if rhs_value == Some(0) => lhs,
        BinaryOp::CmpEq if lhs == rhs => truth(true),
        BinaryOp::CmpNe if lhs == rhs => truth(false),
        BinaryOp::LogicalAnd => {
            match rhs_value {
                Some(0) => return truth(false),
                Some(_) => return lhs,
                None => {}
            }
            Expression::binary(BinaryOp::LogicalAnd, lhs, rhs)
        },
        BinaryOp::LogicalOr => {
            match rhs_value {
                Some(0) => return lhs,
                Some(_) => return truth(true),
                None => {}
            }
            Expression::binary(BinaryOp::LogicalOr, lhs, rhs)
        },
        op => Expression::binary(op, lhs, rhs)
    }
}


fn simplify_typed(ty: ::types::Type, operand: Expression) -> Expression {
    // Absorb an explicit narrower type into the constant itself.
    if let Some((value, bits)) = int_const(&operand) {
        if let Some(ty_bits) = ty.size_bits() {
            if ty_bits < bits {
                return Expression::constant(Constant::int(value, ty_bits));
            }
        }
    }
    // The outer annotation wins over an inner one.
    if let Expression::Typed { operand: inner, .. } = operand {
        return Expression::Typed { ty: ty, operand: inner };
    }
    Expression::Typed { ty: ty, operand: Box::new(operand) }
}


fn simplify_size_cast(bits: usize, operand: Expression) -> Expression {
    if let Some((value, _)) = int_const(&operand) {
        return Expression::constant(Constant::int(value, bits));
    }
    if let Expression::SizeCast { operand: inner, .. } = operand {
        return Expression::SizeCast { bits: bits, operand: inner };
    }
    Expression::SizeCast { bits: bits, operand: Box::new(operand) }
}


fn fold_int(op: BinaryOp, (a, a_bits): (u64, usize), (b, b_bits): (u64, usize))
    -> Option<Constant> {

    let bits = ::std::cmp::max(a_bits, b_bits);
    let sa = sign_extend(a, a_bits);
    let sb = sign_extend(b, b_bits);
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Divu if b != 0 => a / b,
        BinaryOp::Modu if b != 0 => a % b,
        BinaryOp::Divs if sb != 0 => sa.wrapping_div(sb) as u64,
        BinaryOp::Mods if sb != 0 => sa.wrapping_rem(sb) as u64,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => if b >= 64 { 0 } else { a << b },
        BinaryOp::Shr => if b >= 64 { 0 } else { a >> b },
        BinaryOp::Sar => if b >= 63 {
            (sa >> 63) as u64
        }
        else {
            (sa >> b) as u64
        },
        BinaryOp::CmpEq => return Some(Constant::int((a == b) as u64, 1)),
        BinaryOp::CmpNe => return Some(Constant::int((a != b) as u64, 1)),
        BinaryOp::CmpLts => return Some(Constant::int((sa < sb) as u64, 1)),
        BinaryOp::CmpLes => return Some(Constant::int((sa <= sb) as u64, 1)),
        BinaryOp::CmpGts => return Some(Constant::int((sa > sb) as u64, 1)),
        BinaryOp::CmpGes => return Some(Constant::int((sa >= sb) as u64, 1)),
        BinaryOp::CmpLtu => return Some(Constant::int((a < b) as u64, 1)),
        BinaryOp::CmpLeu => return Some(Constant::int((a <= b) as u64, 1)),
        BinaryOp::CmpGtu => return Some(Constant::int((a > b) as u64, 1)),
        BinaryOp::CmpGeu => return Some(Constant::int((a >= b) as u64, 1)),
        BinaryOp::LogicalAnd =>
            return Some(Constant::int((a != 0 && b != 0) as u64, 1)),
        BinaryOp::LogicalOr =>
            return Some(Constant::int((a != 0 || b != 0) as u64, 1)),
        // Division by zero does not fold; the expression is left alone.
        _ => return None
    };
    Some(Constant::int(value, bits))
}


fn fold_float(op: BinaryOp, (a, a_bits): (f64, usize), (b, b_bits): (f64, usize))
    -> Option<Constant> {

    let bits = ::std::cmp::max(a_bits, b_bits);
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Divs => a / b,
        BinaryOp::CmpEq => return Some(Constant::int((a == b) as u64, 1)),
        BinaryOp::CmpNe => return Some(Constant::int((a != b) as u64, 1)),
        BinaryOp::CmpLts => return Some(Constant::int((a < b) as u64, 1)),
        BinaryOp::CmpGts => return Some(Constant::int((a > b) as u64, 1)),
        _ => return None
    };
    Some(Constant::float(value, bits))
}


#[cfg(test)]
mod tests {
    use il::*;
    use types::Type;

    fn reg(index: usize) -> Expression {
        Expression::location(Location::register(index))
    }

    fn int(value: u64) -> Expression {
        Expression::constant(Constant::int(value, 32))
    }

    #[test]
    fn constant_folding_wraps_at_width() {
        let e = Expression::add(
            Expression::constant(Constant::int(0xffffffff, 32)),
            Expression::constant(Constant::int(1, 32)));
        assert_eq!(e.simplify(), int(0));
    }

    #[test]
    fn folds_through_reassociation() {
        // (r24 + 4) + 8 = r24 + 12
        let e = Expression::add(Expression::add(reg(24), int(4)), int(8));
        assert_eq!(e.simplify(), Expression::add(reg(24), int(12)));
        // (r24 - 4) + 8 = r24 + 4
        let e = Expression::add(Expression::sub(reg(24), int(4)), int(8));
        assert_eq!(e.simplify(), Expression::add(reg(24), int(4)));
    }

    #[test]
    fn algebraic_identities() {
        assert_eq!(Expression::add(reg(24), int(0)).simplify(), reg(24));
        assert_eq!(Expression::mul(reg(24), int(1)).simplify(), reg(24));
        assert_eq!(Expression::sub(reg(24), reg(24)).simplify(), int(0));
        assert_eq!(Expression::xor(reg(24), reg(24)).simplify(), int(0));
        assert_eq!(
            Expression::and(reg(24),
                            Expression::constant(Constant::int(0xffffffff, 32)))
                .simplify(),
            reg(24));
        assert_eq!(
            Expression::binary(BinaryOp::LogicalAnd, reg(24), int(0))
                .simplify()
                .int_value(),
            Some(0));
    }

    #[test]
    fn commutative_constants_move_right() {
        let e = Expression::add(int(8), reg(24));
        assert_eq!(e.simplify(), Expression::add(reg(24), int(8)));
    }

    #[test]
    fn multiplication_by_power_of_two_becomes_shift() {
        let e = Expression::mul(reg(24), int(4));
        assert_eq!(e.simplify(), Expression::shl(reg(24), int(2)));
    }

    #[test]
    fn address_of_and_dereference_cancel() {
        let m = Expression::location(Location::memory(reg(28)));
        assert_eq!(Expression::address_of(m.clone()).simplify(), reg(28));
        let back = Expression::location(
            Location::memory(Expression::address_of(reg(24))));
        // m[a[r24]] is r24.
        assert_eq!(back.simplify(), reg(24));
    }

    #[test]
    fn typed_expression_absorbs_into_narrower_constant() {
        let e = Expression::typed(Type::signed(8), int(0x141));
        assert_eq!(
            e.simplify(),
            Expression::constant(Constant::int(0x41, 8)));
    }

    #[test]
    fn division_by_zero_does_not_fold() {
        let e = Expression::binary(BinaryOp::Divu, int(4), int(0));
        assert_eq!(e.clone().simplify(), e);
    }

    #[test]
    fn simplify_is_idempotent() {
        let samples = vec![
            Expression::add(Expression::add(reg(24), int(4)), int(8)),
            Expression::mul(reg(24), int(8)),
            Expression::sub(reg(25), reg(25)),
            Expression::ite(int(1), reg(24), reg(25)),
            Expression::logical_not(Expression::logical_not(reg(24))),
            Expression::location(Location::memory(
                Expression::add(int(4), reg(28))))
        ];
        for e in samples {
            let once = e.simplify();
            assert_eq!(once.clone().simplify(), once);
        }
    }
}
