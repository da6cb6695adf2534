//! A `Location` is a place a value can live: a register, a memory cell, a
//! named parameter, local, global, or temporary.

use il::*;
use std::fmt;

/// A storage location.
///
/// Before SSA construction, statements define and use bare locations.
/// During SSA, every use of a location is wrapped in a subscripted
/// reference (`Expression::Ref`) naming its defining statement. After SSA
/// destruction, every non-implicit location is a named local or parameter.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Location {
    /// A machine register, by the decoder's register index.
    Register(usize),
    /// The memory cell addressed by the given expression.
    Memory(Box<Expression>),
    /// A named procedure parameter.
    Parameter(String),
    /// A named local variable.
    Local(String),
    /// A named global variable.
    Global(String),
    /// A decoder- or decompiler-introduced temporary.
    Temp(String)
}

impl Location {
    pub fn register(index: usize) -> Location {
        Location::Register(index)
    }

    pub fn memory(address: Expression) -> Location {
        Location::Memory(Box::new(address))
    }

    pub fn parameter<S: Into<String>>(name: S) -> Location {
        Location::Parameter(name.into())
    }

    pub fn local<S: Into<String>>(name: S) -> Location {
        Location::Local(name.into())
    }

    pub fn global<S: Into<String>>(name: S) -> Location {
        Location::Global(name.into())
    }

    pub fn temp<S: Into<String>>(name: S) -> Location {
        Location::Temp(name.into())
    }

    pub fn is_register(&self) -> bool {
        if let Location::Register(_) = *self { true } else { false }
    }

    pub fn is_memory(&self) -> bool {
        if let Location::Memory(_) = *self { true } else { false }
    }

    pub fn is_temp(&self) -> bool {
        if let Location::Temp(_) = *self { true } else { false }
    }

    /// The register index, if this is a register.
    pub fn register_index(&self) -> Option<usize> {
        match *self {
            Location::Register(index) => Some(index),
            _ => None
        }
    }

    /// The address expression, if this is a memory location.
    pub fn address(&self) -> Option<&Expression> {
        match *self {
            Location::Memory(ref address) => Some(address),
            _ => None
        }
    }

    /// A mutable reference to the address expression, if this is a memory
    /// location.
    pub fn address_mut(&mut self) -> Option<&mut Expression> {
        match *self {
            Location::Memory(ref mut address) => Some(address),
            _ => None
        }
    }

    /// The name of a parameter, local, global or temporary location.
    pub fn name(&self) -> Option<&str> {
        match *self {
            Location::Parameter(ref name) |
            Location::Local(ref name) |
            Location::Global(ref name) |
            Location::Temp(ref name) => Some(name),
            _ => None
        }
    }
}


impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Location::Register(index) => write!(f, "r{}", index),
            Location::Memory(ref address) => write!(f, "m[{}]", address),
            Location::Parameter(ref name) |
            Location::Local(ref name) |
            Location::Global(ref name) |
            Location::Temp(ref name) => write!(f, "{}", name)
        }
    }
}
