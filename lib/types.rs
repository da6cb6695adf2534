//! The type lattice used by type analysis, and small shared value types.
//!
//! `Type::Void` is the unknown type. Every other type refines it, and
//! refinement continues downward: an integer of unknown signedness is
//! refined by its signed and unsigned variants. `join` moves down the
//! lattice toward more refined types and fails on genuine conflicts;
//! `is_compatible_with` is the looser relation used when deciding whether
//! two definitions may share a local variable.

use std::fmt;

/// Three-valued boolean, for queries that may be undecidable.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum PartialBoolean {
    True,
    False,
    Unknown
}

impl PartialBoolean {
    /// True iff the answer is known to be true.
    pub fn is_true(&self) -> bool {
        *self == PartialBoolean::True
    }

    /// True iff the answer is known to be false.
    pub fn is_false(&self) -> bool {
        *self == PartialBoolean::False
    }
}


/// Byte order of the target machine. Switch-table recovery reads code
/// pointers from the program image in this order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Endian {
    Big,
    Little
}


/// Signedness of an integer type. `Unknown` is refined by both of the
/// other variants.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Signedness {
    Unknown,
    Signed,
    Unsigned
}


/// A type in the decompiler's lattice.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Type {
    /// The unknown type. Everything refines void.
    Void,
    /// An integer of the given width in bits.
    Integer { bits: usize, sign: Signedness },
    /// A floating-point value of the given width in bits.
    Float { bits: usize },
    /// A single character.
    Char,
    /// A 1-bit truth value, as produced by comparisons.
    Boolean,
    /// A pointer to the given type.
    Pointer(Box<Type>),
    /// An array of the given element type, with an optional known length.
    Array { elem: Box<Type>, length: Option<u64> },
    /// A procedure type. Parameter and return types only; conventions live
    /// on signatures.
    Func { params: Vec<Type>, returns: Vec<Type> },
    /// A record of named fields.
    Compound(Vec<(String, Type)>),
    /// A reference to a typedef'd name.
    Named(String)
}

impl Type {
    /// A signed integer of the given width.
    pub fn signed(bits: usize) -> Type {
        Type::Integer { bits: bits, sign: Signedness::Signed }
    }

    /// An unsigned integer of the given width.
    pub fn unsigned(bits: usize) -> Type {
        Type::Integer { bits: bits, sign: Signedness::Unsigned }
    }

    /// An integer of the given width and unknown signedness.
    pub fn integer(bits: usize) -> Type {
        Type::Integer { bits: bits, sign: Signedness::Unknown }
    }

    /// A float of the given width.
    pub fn float(bits: usize) -> Type {
        Type::Float { bits: bits }
    }

    /// A pointer to the given type.
    pub fn pointer(pointee: Type) -> Type {
        Type::Pointer(Box::new(pointee))
    }

    /// A pointer to an array of char; the type of a string literal.
    pub fn string() -> Type {
        Type::pointer(Type::Array { elem: Box::new(Type::Char), length: None })
    }

    pub fn is_void(&self) -> bool {
        *self == Type::Void
    }

    pub fn is_pointer(&self) -> bool {
        if let Type::Pointer(_) = *self { true } else { false }
    }

    pub fn is_integer(&self) -> bool {
        if let Type::Integer { .. } = *self { true } else { false }
    }

    pub fn is_float(&self) -> bool {
        if let Type::Float { .. } = *self { true } else { false }
    }

    /// The width of a value of this type in bits, where one is known.
    /// Pointers are the width of the target machine word.
    pub fn size_bits(&self) -> Option<usize> {
        match *self {
            Type::Void => None,
            Type::Integer { bits, .. } => Some(bits),
            Type::Float { bits } => Some(bits),
            Type::Char => Some(8),
            Type::Boolean => Some(1),
            Type::Pointer(_) => Some(32),
            Type::Array { ref elem, length } =>
                match (elem.size_bits(), length) {
                    (Some(bits), Some(length)) => Some(bits * length as usize),
                    _ => None
                },
            Type::Func { .. } => None,
            Type::Compound(ref fields) => {
                let mut bits = 0;
                for &(_, ref field) in fields {
                    match field.size_bits() {
                        Some(b) => bits += b,
                        None => return None
                    }
                }
                Some(bits)
            },
            Type::Named(_) => None
        }
    }

    /// The least refined common descendant of two types, or `None` when the
    /// types genuinely conflict (e.g. signed vs. unsigned, pointer vs.
    /// float). `join` never invents a cast; that is the caller's job.
    pub fn join(&self, other: &Type) -> Option<Type> {
        if self == other {
            return Some(self.clone());
        }
        match (self, other) {
            (&Type::Void, t) | (t, &Type::Void) => Some(t.clone()),

            (&Type::Integer { bits: b0, sign: s0 },
             &Type::Integer { bits: b1, sign: s1 }) => {
                let sign = match (s0, s1) {
                    (Signedness::Unknown, s) | (s, Signedness::Unknown) => s,
                    (s0, s1) if s0 == s1 => s0,
                    _ => return None
                };
                Some(Type::Integer { bits: ::std::cmp::max(b0, b1), sign: sign })
            },

            (&Type::Float { bits: b0 }, &Type::Float { bits: b1 }) =>
                Some(Type::Float { bits: ::std::cmp::max(b0, b1) }),

            (&Type::Char, &Type::Integer { bits: 8, .. }) |
            (&Type::Integer { bits: 8, .. }, &Type::Char) => Some(Type::Char),

            (&Type::Boolean, &Type::Integer { bits: 1, .. }) |
            (&Type::Integer { bits: 1, .. }, &Type::Boolean) => Some(Type::Boolean),

            (&Type::Pointer(ref p0), &Type::Pointer(ref p1)) =>
                p0.join(p1).map(Type::pointer),

            // A pointer may refine an integer of machine word width.
            (&Type::Pointer(ref p), &Type::Integer { bits: 32, .. }) |
            (&Type::Integer { bits: 32, .. }, &Type::Pointer(ref p)) =>
                Some(Type::Pointer(p.clone())),

            (&Type::Array { elem: ref e0, length: l0 },
             &Type::Array { elem: ref e1, length: l1 }) => {
                let elem = match e0.join(e1) {
                    Some(elem) => elem,
                    None => return None
                };
                let length = match (l0, l1) {
                    (Some(l0), Some(l1)) if l0 != l1 => return None,
                    (l0, l1) => l0.or(l1)
                };
                Some(Type::Array { elem: Box::new(elem), length: length })
            },

            // An array decays to its element type at a use site.
            (&Type::Array { ref elem, .. }, t) if elem.as_ref() == t =>
                Some(self.clone()),
            (t, &Type::Array { ref elem, .. }) if elem.as_ref() == t =>
                Some(other.clone()),

            _ => None
        }
    }

    /// True when the two types may describe the same value: one refines
    /// the other, or both refine a common ancestor other than void.
    pub fn is_compatible_with(&self, other: &Type) -> bool {
        if self.join(other).is_some() {
            return true;
        }
        match (self, other) {
            // Signed vs. unsigned of any width both refine the widthed
            // integer of unknown signedness.
            (&Type::Integer { .. }, &Type::Integer { .. }) => true,
            (&Type::Integer { .. }, &Type::Char) |
            (&Type::Char, &Type::Integer { .. }) => true,
            (&Type::Pointer(_), &Type::Integer { .. }) |
            (&Type::Integer { .. }, &Type::Pointer(_)) => true,
            _ => false
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Type::Void => write!(f, "v"),
            Type::Integer { bits, sign } => match sign {
                Signedness::Signed => write!(f, "i{}", bits),
                Signedness::Unsigned => write!(f, "u{}", bits),
                Signedness::Unknown => write!(f, "j{}", bits)
            },
            Type::Float { bits } => write!(f, "f{}", bits),
            Type::Char => write!(f, "c"),
            Type::Boolean => write!(f, "b"),
            Type::Pointer(ref t) => write!(f, "{}*", t),
            Type::Array { ref elem, length } => match length {
                Some(length) => write!(f, "[{}; {}]", elem, length),
                None => write!(f, "[{}]", elem)
            },
            Type::Func { .. } => write!(f, "func"),
            Type::Compound(_) => write!(f, "struct"),
            Type::Named(ref name) => write!(f, "{}", name)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_refines_void() {
        assert_eq!(Type::Void.join(&Type::signed(32)), Some(Type::signed(32)));
        assert_eq!(Type::signed(32).join(&Type::Void), Some(Type::signed(32)));
    }

    #[test]
    fn join_refines_signedness() {
        assert_eq!(Type::integer(32).join(&Type::unsigned(32)),
                   Some(Type::unsigned(32)));
        assert_eq!(Type::signed(32).join(&Type::unsigned(32)), None);
    }

    #[test]
    fn signed_and_unsigned_remain_compatible() {
        assert!(Type::signed(32).is_compatible_with(&Type::unsigned(32)));
        assert!(!Type::signed(32).is_compatible_with(&Type::float(64)));
        assert!(!Type::pointer(Type::Char).is_compatible_with(&Type::float(32)));
    }

    #[test]
    fn pointer_join_is_pointwise() {
        let p0 = Type::pointer(Type::Void);
        let p1 = Type::pointer(Type::signed(32));
        assert_eq!(p0.join(&p1), Some(Type::pointer(Type::signed(32))));
    }

    #[test]
    fn string_type_displays_like_a_char_array_pointer() {
        assert_eq!(Type::string().to_string(), "[c]*");
        assert_eq!(Type::pointer(Type::string()).to_string(), "[c]**");
        assert_eq!(Type::signed(32).to_string(), "i32");
        assert_eq!(Type::Void.to_string(), "v");
    }
}
