//! A procedure signature: calling convention, typed parameters, returned
//! locations, and locations proven preserved across the procedure.

use analysis::calling_convention::CallingConventionType;
use il::*;
use std::fmt;
use types::Type;

/// A formal parameter: its name, the location or stack slot holding it at
/// entry, and its type.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Parameter {
    pub name: String,
    pub exp: Expression,
    pub ty: Type
}

/// A procedure's signature.
///
/// The preserved list is an equality map: `(location, entry-value)` pairs
/// proven to hold on every exit. For most preserved registers the entry
/// value is the location itself; stack-pointer adjustment shapes like
/// `sp := sp + 4` are expressible too.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Signature {
    name: String,
    convention: CallingConventionType,
    parameters: Vec<Parameter>,
    returns: Vec<(Expression, Type)>,
    preserved: Vec<(Expression, Expression)>,
    has_ellipsis: bool
}

impl Signature {
    pub fn new<S: Into<String>>(name: S, convention: CallingConventionType)
        -> Signature {

        Signature {
            name: name.into(),
            convention: convention,
            parameters: Vec::new(),
            returns: Vec::new(),
            preserved: Vec::new(),
            has_ellipsis: false
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    pub fn convention(&self) -> CallingConventionType {
        self.convention
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut Vec<Parameter> {
        &mut self.parameters
    }

    pub fn add_parameter<S: Into<String>>(
        &mut self,
        name: S,
        exp: Expression,
        ty: Type
    ) {
        self.parameters.push(Parameter {
            name: name.into(),
            exp: exp,
            ty: ty
        });
    }

    /// The position of the parameter held in the given location.
    pub fn find_parameter(&self, exp: &Expression) -> Option<usize> {
        self.parameters.iter().position(|parameter| &parameter.exp == exp)
    }

    pub fn returns(&self) -> &[(Expression, Type)] {
        &self.returns
    }

    pub fn set_returns(&mut self, returns: Vec<(Expression, Type)>) {
        self.returns = returns;
    }

    pub fn add_return(&mut self, exp: Expression, ty: Type) {
        if !self.returns.iter().any(|&(ref existing, _)| existing == &exp) {
            self.returns.push((exp, ty));
        }
    }

    pub fn preserved(&self) -> &[(Expression, Expression)] {
        &self.preserved
    }

    /// Record that `location` is proven equal to `value` (phrased at
    /// procedure entry) on every exit.
    pub fn add_proven(&mut self, location: Expression, value: Expression) {
        self.preserved.retain(|&(ref existing, _)| existing != &location);
        self.preserved.push((location, value));
    }

    /// The entry-phrased value proven for the given location, if any.
    pub fn proven_value(&self, location: &Expression) -> Option<&Expression> {
        self.preserved.iter()
            .find(|&&(ref preserved, _)| preserved == location)
            .map(|&(_, ref value)| value)
    }

    /// True when the location is proven equal on exit to its own value on
    /// entry.
    pub fn is_preserved(&self, location: &Expression) -> bool {
        self.proven_value(location) == Some(location)
    }

    pub fn has_ellipsis(&self) -> bool {
        self.has_ellipsis
    }

    pub fn set_has_ellipsis(&mut self, has_ellipsis: bool) {
        self.has_ellipsis = has_ellipsis;
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parameters: Vec<String> = self.parameters.iter()
            .map(|parameter|
                 format!("*{}* {}", parameter.ty, parameter.name))
            .collect();
        let ellipsis = if self.has_ellipsis { ", ..." } else { "" };
        write!(f, "{}({}{})", self.name, parameters.join(", "), ellipsis)
    }
}
