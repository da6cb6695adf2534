//! Information about varying calling conventions.
//!
//! The calling convention drives parameter inference (which locations can
//! be arguments, and in what order), return inference (which locations
//! carry results), preservation analysis (which registers a callee must
//! save), and variadic argument synthesis (where stack arguments live).
//!
//! Register indices follow the decoder's numbering. For the x86 target
//! that is eax=24, ecx=25, edx=26, ebx=27, esp=28, ebp=29, esi=30,
//! edi=31; for MIPS the architectural register numbers are used directly.

use il;
use il::Expression;
use std::collections::BTreeSet;
use types::PartialBoolean;


/// Available type of calling conventions
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum CallingConventionType {
    MipsSystemV,
    Cdecl
}


/// How a function finds its return address.
pub enum ReturnAddressType {
    /// The return address is in a register.
    Register(Expression),
    /// The return address is on the stack, at the given offset at
    /// function entry.
    Stack(usize)
}


/// Where an argument lives at function entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ArgumentLocation {
    /// The argument is held in a register.
    Register(Expression),
    /// The argument is held at a stack offset from the stack pointer at
    /// entry.
    Stack(usize)
}


/// Represents the calling convention of a particular platform.
pub struct CallingConvention {
    /// Arguments passed in registers, in order.
    argument_registers: Vec<Expression>,

    /// These registers are preserved across function calls.
    preserved_registers: BTreeSet<Expression>,

    /// These registers are not preserved across function calls.
    trashed_registers: BTreeSet<Expression>,

    /// The stack pointer register.
    stack_pointer: Expression,

    /// Offset from the stack pointer at entry where the first stack
    /// argument is found.
    stack_argument_offset: usize,

    /// Length of an argument on the stack in bytes.
    stack_argument_length: usize,

    /// How the return address is found.
    return_address_type: ReturnAddressType,

    /// The register the returned value is given in.
    return_register: Expression
}

impl CallingConvention {
    /// Create a new `CallingConvention` based on the given
    /// `CallingConventionType`.
    pub fn new(typ: CallingConventionType) -> CallingConvention {
        match typ {
            CallingConventionType::MipsSystemV => {
                // $a0-$a3 carry arguments; $s0-$s8, $sp and $ra are
                // saved; the result is in $v0. Everything else is
                // trashed.
                let argument_registers = vec![
                    il::reg(4), il::reg(5), il::reg(6), il::reg(7)
                ];

                let mut preserved_registers = BTreeSet::new();
                for index in 16..24 {
                    preserved_registers.insert(il::reg(index));
                }
                preserved_registers.insert(il::reg(29));
                preserved_registers.insert(il::reg(30));
                preserved_registers.insert(il::reg(31));

                let mut trashed_registers = BTreeSet::new();
                trashed_registers.insert(il::reg(1));
                trashed_registers.insert(il::reg(2));
                trashed_registers.insert(il::reg(3));
                for index in 4..16 {
                    trashed_registers.insert(il::reg(index));
                }
                trashed_registers.insert(il::reg(24));
                trashed_registers.insert(il::reg(25));

                CallingConvention {
                    argument_registers: argument_registers,
                    preserved_registers: preserved_registers,
                    trashed_registers: trashed_registers,
                    stack_pointer: il::reg(29),
                    stack_argument_offset: 16,
                    stack_argument_length: 4,
                    return_address_type: ReturnAddressType::Register(il::reg(31)),
                    return_register: il::reg(2)
                }
            },
            CallingConventionType::Cdecl => {
                let mut preserved_registers = BTreeSet::new();
                preserved_registers.insert(il::reg(27));
                preserved_registers.insert(il::reg(28));
                preserved_registers.insert(il::reg(29));
                preserved_registers.insert(il::reg(30));
                preserved_registers.insert(il::reg(31));

                let mut trashed_registers = BTreeSet::new();
                trashed_registers.insert(il::reg(24));
                trashed_registers.insert(il::reg(25));
                trashed_registers.insert(il::reg(26));

                CallingConvention {
                    argument_registers: Vec::new(),
                    preserved_registers: preserved_registers,
                    trashed_registers: trashed_registers,
                    stack_pointer: il::reg(28),
                    stack_argument_offset: 4,
                    stack_argument_length: 4,
                    return_address_type: ReturnAddressType::Stack(0),
                    return_register: il::reg(24)
                }
            }
        }
    }

    /// Get the registers the first n arguments are passed in.
    pub fn argument_registers(&self) -> &[Expression] {
        &self.argument_registers
    }

    /// Get the registers preserved across function calls.
    pub fn preserved_registers(&self) -> &BTreeSet<Expression> {
        &self.preserved_registers
    }

    /// Get the registers trashed across function calls.
    pub fn trashed_registers(&self) -> &BTreeSet<Expression> {
        &self.trashed_registers
    }

    /// The stack pointer register.
    pub fn stack_pointer(&self) -> &Expression {
        &self.stack_pointer
    }

    /// Get the length of an argument on the stack in _bytes, not bits_.
    pub fn stack_argument_length(&self) -> usize {
        self.stack_argument_length
    }

    /// Get the stack offset to the first argument passed on the stack in
    /// _bytes, not bits_.
    ///
    /// We would expect this to be immediately above the return address,
    /// if the return address is stored on the stack.
    pub fn stack_argument_offset(&self) -> usize {
        self.stack_argument_offset
    }

    /// How the return address is specified for function calls.
    pub fn return_address_type(&self) -> &ReturnAddressType {
        &self.return_address_type
    }

    /// The register returned values are given in.
    pub fn return_register(&self) -> &Expression {
        &self.return_register
    }

    /// Get the location of the given argument, starting with 0 index.
    pub fn argument_location(&self, argument_number: usize) -> ArgumentLocation {
        if argument_number >= self.argument_registers.len() {
            let n = argument_number - self.argument_registers.len();
            let offset =
                self.stack_argument_offset + (self.stack_argument_length * n);
            ArgumentLocation::Stack(offset)
        }
        else {
            ArgumentLocation::Register(
                self.argument_registers[argument_number].clone())
        }
    }

    /// The expression holding the given argument at function entry:
    /// either a register, or a load from the entry stack pointer.
    pub fn argument_exp(&self, argument_number: usize) -> Expression {
        match self.argument_location(argument_number) {
            ArgumentLocation::Register(register) => register,
            ArgumentLocation::Stack(offset) => il::mem(Expression::add(
                self.stack_pointer.clone(),
                il::expr_const(offset as u64, 32)))
        }
    }

    /// The argument position held by the given location at function
    /// entry, if it is an argument location under this convention.
    /// Subscripts on the stack pointer are ignored.
    pub fn argument_position(&self, location: &Expression) -> Option<usize> {
        if let Some(position) = self.argument_registers.iter()
            .position(|register| register == location) {
            return Some(position);
        }
        let address = match *location {
            Expression::Location(il::Location::Memory(ref address)) =>
                address.clone().strip_subscripts(),
            _ => return None
        };
        let offset = if address == self.stack_pointer {
            0
        }
        else if let Expression::Binary {
            op: il::BinaryOp::Add, ref lhs, ref rhs
        } = address {
            if lhs.as_ref() != &self.stack_pointer {
                return None;
            }
            match rhs.int_value() {
                Some(offset) => offset as usize,
                None => return None
            }
        }
        else {
            return None;
        };
        if offset < self.stack_argument_offset {
            return None;
        }
        let slot = offset - self.stack_argument_offset;
        if slot % self.stack_argument_length != 0 {
            return None;
        }
        Some(self.argument_registers.len() + slot / self.stack_argument_length)
    }

    /// Is the given register preserved.
    pub fn is_preserved(&self, location: &Expression) -> PartialBoolean {
        if self.preserved_registers.contains(location) {
            PartialBoolean::True
        }
        else if self.trashed_registers.contains(location) {
            PartialBoolean::False
        }
        else {
            PartialBoolean::Unknown
        }
    }

    /// Is the given register trashed.
    pub fn is_trashed(&self, location: &Expression) -> PartialBoolean {
        if self.trashed_registers.contains(location) {
            PartialBoolean::True
        }
        else if self.preserved_registers.contains(location) {
            PartialBoolean::False
        }
        else {
            PartialBoolean::Unknown
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use il;
    use types::PartialBoolean;

    #[test]
    fn cdecl_arguments_are_on_the_stack() {
        let cc = CallingConvention::new(CallingConventionType::Cdecl);
        assert_eq!(cc.argument_location(0), ArgumentLocation::Stack(4));
        assert_eq!(cc.argument_location(2), ArgumentLocation::Stack(12));
        assert_eq!(cc.argument_exp(0).to_string(), "m[r28 + 4]");
    }

    #[test]
    fn mips_arguments_spill_after_four_registers() {
        let cc = CallingConvention::new(CallingConventionType::MipsSystemV);
        assert_eq!(cc.argument_location(0),
                   ArgumentLocation::Register(il::reg(4)));
        assert_eq!(cc.argument_location(4), ArgumentLocation::Stack(16));
    }

    #[test]
    fn argument_position_inverts_argument_exp() {
        for &typ in &[CallingConventionType::Cdecl,
                      CallingConventionType::MipsSystemV] {
            let cc = CallingConvention::new(typ);
            for n in 0..6 {
                assert_eq!(cc.argument_position(&cc.argument_exp(n)), Some(n));
            }
        }
    }

    #[test]
    fn argument_position_sees_through_subscripts() {
        let cc = CallingConvention::new(CallingConventionType::Cdecl);
        let slot = il::mem(il::Expression::add(
            il::Expression::subscript(il::reg(28), None),
            il::expr_const(8, 32)));
        assert_eq!(cc.argument_position(&slot), Some(1));
    }

    #[test]
    fn preservation_is_three_valued() {
        let cc = CallingConvention::new(CallingConventionType::Cdecl);
        assert_eq!(cc.is_preserved(&il::reg(27)), PartialBoolean::True);
        assert_eq!(cc.is_preserved(&il::reg(24)), PartialBoolean::False);
        assert_eq!(cc.is_trashed(&il::reg(24)), PartialBoolean::True);
        assert_eq!(cc.is_preserved(&il::mem(il::reg(28))),
                   PartialBoolean::Unknown);
    }
}
