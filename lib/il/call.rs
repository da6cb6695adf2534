//! The call statement, and the dataflow collectors it carries.
//!
//! A call owns three statement lists: *arguments* (formal parameter :=
//! caller-side value), *defines* (locations visible in the caller after
//! the call), and the def/use collector snapshots taken at the call site.
//! The collectors let passes reason about a call site before the callee
//! body has been analyzed.

use il::*;
use std::collections::BTreeSet;
use std::fmt;
use types::{Signedness, Type};

/// A reference to the destination procedure of a resolved call.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum CalleeRef {
    /// A procedure in the program, by entry address.
    User(u64),
    /// A library procedure stub, by name.
    Library(String)
}

impl fmt::Display for CalleeRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            CalleeRef::User(address) => write!(f, "0x{:x}", address),
            CalleeRef::Library(ref name) => write!(f, "{}", name)
        }
    }
}


/// The definitions reaching a call site: one assignment per location,
/// whose rhs is a subscripted reference to the reaching definition.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct DefCollector {
    defs: Vec<Assign>
}

impl DefCollector {
    pub fn new() -> DefCollector {
        DefCollector { defs: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.defs.clear();
    }

    /// Record a reaching definition. A later collect for the same
    /// location replaces the earlier one.
    pub fn collect_def(&mut self, def: Assign) {
        self.defs.retain(|existing| existing.lhs != def.lhs);
        self.defs.push(def);
    }

    /// The expression reaching the call site for the given location.
    pub fn find_def_for(&self, location: &Expression) -> Option<&Expression> {
        self.defs.iter()
            .find(|def| &def.lhs == location)
            .map(|def| &def.rhs)
    }

    pub fn defs(&self) -> &[Assign] {
        &self.defs
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}


/// The locations live at a call site, as subscripted references.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct UseCollector {
    uses: Vec<Expression>
}

impl UseCollector {
    pub fn new() -> UseCollector {
        UseCollector { uses: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.uses.clear();
    }

    pub fn collect_use(&mut self, use_: Expression) {
        if !self.uses.contains(&use_) {
            self.uses.push(use_);
        }
    }

    pub fn uses(&self) -> &[Expression] {
        &self.uses
    }

    pub fn is_empty(&self) -> bool {
        self.uses.is_empty()
    }
}


/// A procedure call.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct CallStatement {
    dest: Expression,
    computed: bool,
    dest_proc: Option<CalleeRef>,
    signature: Option<Signature>,
    arguments: Vec<Assign>,
    defines: Vec<Define>,
    def_collector: DefCollector,
    use_collector: UseCollector,
    return_after_call: bool,
    /// The return statement of the callee, once the callee has been
    /// analyzed: (callee address, statement handle in the callee).
    callee_return: Option<(u64, StatementId)>,
    ellipsis_processed: bool
}

impl CallStatement {
    /// Create a call to a destination expression. The call is computed
    /// when the destination is not a plain constant.
    pub fn new(dest: Expression) -> CallStatement {
        let computed = !dest.is_constant();
        CallStatement {
            dest: dest,
            computed: computed,
            dest_proc: None,
            signature: None,
            arguments: Vec::new(),
            defines: Vec::new(),
            def_collector: DefCollector::new(),
            use_collector: UseCollector::new(),
            return_after_call: false,
            callee_return: None,
            ellipsis_processed: false
        }
    }

    /// Create a call to a fixed address.
    pub fn to_address(address: u64) -> CallStatement {
        CallStatement::new(Expression::constant(Constant::int(address, 32)))
    }

    pub fn dest(&self) -> &Expression {
        &self.dest
    }

    pub fn dest_mut(&mut self) -> &mut Expression {
        &mut self.dest
    }

    pub fn set_dest(&mut self, dest: Expression) {
        self.computed = !dest.is_constant();
        self.dest = dest;
    }

    /// True when the destination is not a plain constant. Note that
    /// simplifying the destination down to a constant does not clear this
    /// flag by default; see `Settings::update_computed_flag_on_fold`.
    pub fn is_computed(&self) -> bool {
        self.computed
    }

    pub fn set_computed(&mut self, computed: bool) {
        self.computed = computed;
    }

    pub fn dest_proc(&self) -> Option<&CalleeRef> {
        self.dest_proc.as_ref()
    }

    pub fn set_dest_proc(&mut self, dest_proc: CalleeRef) {
        self.dest_proc = Some(dest_proc);
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn set_signature(&mut self, signature: Signature) {
        self.signature = Some(signature);
    }

    pub fn clear_signature(&mut self) {
        self.signature = None;
    }

    pub fn arguments(&self) -> &[Assign] {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut Vec<Assign> {
        &mut self.arguments
    }

    pub fn set_arguments(&mut self, arguments: Vec<Assign>) {
        self.arguments = arguments;
    }

    pub fn num_arguments(&self) -> usize {
        self.arguments.len()
    }

    pub fn argument(&self, n: usize) -> Option<&Assign> {
        self.arguments.get(n)
    }

    pub fn remove_argument(&mut self, n: usize) {
        self.arguments.remove(n);
    }

    pub fn argument_type(&self, n: usize) -> Option<&Type> {
        self.arguments.get(n).map(|argument| &argument.ty)
    }

    pub fn set_argument_type(&mut self, n: usize, ty: Type) {
        if let Some(argument) = self.arguments.get_mut(n) {
            argument.ty = ty;
        }
    }

    pub fn defines(&self) -> &[Define] {
        &self.defines
    }

    pub fn defines_mut(&mut self) -> &mut Vec<Define> {
        &mut self.defines
    }

    pub fn set_defines(&mut self, defines: Vec<Define>) {
        self.defines = defines;
    }

    pub fn add_define(&mut self, define: Define) {
        self.defines.push(define);
    }

    /// Remove the define of the given base location. Returns true if one
    /// was removed. Only the first matching define is removed.
    pub fn remove_define(&mut self, base: &Expression) -> bool {
        match self.defines.iter().position(|define| &define.lhs == base) {
            Some(position) => {
                self.defines.remove(position);
                true
            },
            None => false
        }
    }

    pub fn def_collector(&self) -> &DefCollector {
        &self.def_collector
    }

    pub fn def_collector_mut(&mut self) -> &mut DefCollector {
        &mut self.def_collector
    }

    pub fn use_collector(&self) -> &UseCollector {
        &self.use_collector
    }

    pub fn use_collector_mut(&mut self) -> &mut UseCollector {
        &mut self.use_collector
    }

    /// The expression reaching the call site for the given location,
    /// from the def collector.
    pub fn find_def_for(&self, location: &Expression) -> Option<&Expression> {
        self.def_collector.find_def_for(location)
    }

    pub fn is_return_after_call(&self) -> bool {
        self.return_after_call
    }

    pub fn set_return_after_call(&mut self, return_after_call: bool) {
        self.return_after_call = return_after_call;
    }

    pub fn callee_return(&self) -> Option<(u64, StatementId)> {
        self.callee_return
    }

    pub fn set_callee_return(&mut self, callee: u64, ret: StatementId) {
        self.callee_return = Some((callee, ret));
    }

    /// True when the destination procedure has not yet produced a defines
    /// list: there is no destination procedure, or it is a user procedure
    /// that has not been analyzed to a resting state.
    pub fn is_childless(&self, program: &Program) -> bool {
        match self.dest_proc {
            None => true,
            Some(CalleeRef::Library(_)) => false,
            Some(CalleeRef::User(address)) => {
                if self.callee_return.is_none() {
                    return true;
                }
                match program.procedure(address) {
                    Some(callee) => match callee.status() {
                        ProcedureStatus::EarlyDone |
                        ProcedureStatus::FinalDone => false,
                        _ => true
                    },
                    None => true
                }
            }
        }
    }

    /// True when the destination is a memory load from a constant
    /// address, i.e. a call through an import slot.
    pub fn is_call_to_mem_offset(&self) -> bool {
        match self.dest.get_location() {
            Some(&Location::Memory(ref address)) => address.is_constant(),
            _ => false
        }
    }

    /// Remove argument assignments whose left-hand side repeats that of
    /// an earlier argument. The first argument for each location wins,
    /// regardless of the right-hand sides.
    pub fn eliminate_duplicate_args(&mut self) -> bool {
        let mut seen: BTreeSet<Expression> = BTreeSet::new();
        let before = self.arguments.len();
        self.arguments.retain(|argument| seen.insert(argument.lhs.clone()));
        self.arguments.len() != before
    }

    /// Seed arguments and defines from a resolved signature. Existing
    /// arguments are replaced.
    pub fn set_sig_arguments(&mut self, signature: &Signature) {
        self.arguments = signature.parameters()
            .iter()
            .map(|parameter| Assign::typed(
                parameter.ty.clone(),
                parameter.exp.clone(),
                parameter.exp.clone()))
            .collect();
        self.defines = signature.returns()
            .iter()
            .map(|&(ref exp, ref ty)|
                 Define::new(ty.clone(), exp.clone(), None))
            .collect();
        self.signature = Some(signature.clone());
    }

    /// Rewrite an expression phrased at the callee's entry into the
    /// caller's context at this call site: formal parameters become the
    /// argument values, and other locations become the definitions
    /// reaching the call.
    pub fn localise_exp(&self, e: Expression) -> Expression {
        use il::visitor::{rewrite_expression, ExpressionModifier};

        struct Localise<'a>(&'a CallStatement);

        impl<'a> Localise<'a> {
            fn localise_base(&self, base: &Expression) -> Option<Expression> {
                for argument in self.0.arguments() {
                    if &argument.lhs == base {
                        return Some(argument.rhs.clone());
                    }
                }
                self.0.def_collector.find_def_for(base).cloned()
            }
        }

        impl<'a> ExpressionModifier for Localise<'a> {
            fn modify(&mut self, expression: Expression) -> Expression {
                match expression {
                    Expression::Ref { base, def: None } => {
                        match self.localise_base(&base) {
                            Some(localised) => localised,
                            None => Expression::Ref { base: base, def: None }
                        }
                    },
                    Expression::Location(location) => {
                        let base = Expression::Location(location);
                        match self.localise_base(&base) {
                            Some(localised) => localised,
                            None => base
                        }
                    },
                    expression => expression
                }
            }
        }

        rewrite_expression(&mut Localise(self), e)
    }

    /// Rewrite a reference whose definition is this call by the value the
    /// callee proves preserved: `loc{call}` becomes the caller-side value
    /// of the expression proven equal to `loc` on exit. Returns `None`
    /// when the callee proves nothing about the location.
    pub fn bypass_ref(&self, my_id: StatementId, e: &Expression)
        -> Option<Expression> {

        if e.ref_def() != Some(my_id) {
            return None;
        }
        let base = e.ref_base()?;
        let proven = self.signature.as_ref()?.proven_value(base)?.clone();
        Some(self.localise_exp(proven).simplify())
    }

    /// Given the set of base locations the caller actually uses from this
    /// call, compute the live results.
    pub fn calc_results(&self, used_bases: &BTreeSet<Expression>)
        -> Vec<Expression> {

        self.defines.iter()
            .filter(|define| used_bases.contains(&define.lhs))
            .map(|define| define.lhs.clone())
            .collect()
    }

    /// If the destination simplifies to a constant address for which a
    /// procedure exists, resolve the call to a direct call and invalidate
    /// the signature and arguments for re-inference.
    ///
    /// `update_computed` controls whether the computed flag is cleared on
    /// success; the historical behavior is to leave it set.
    pub fn try_convert_to_direct<F>(&mut self, proc_exists: F, update_computed: bool)
        -> bool where F: Fn(u64) -> bool {

        if self.dest_proc.is_some() {
            return false;
        }
        let dest = self.dest.clone().simplify();
        let address = match dest.int_value() {
            Some(address) => address,
            None => return false
        };
        self.dest = dest;
        if !proc_exists(address) {
            return false;
        }
        debug!("resolved computed call to direct call to 0x{:x}", address);
        self.dest_proc = Some(CalleeRef::User(address));
        self.signature = None;
        self.arguments.clear();
        self.defines.clear();
        if update_computed {
            self.computed = false;
        }
        true
    }

    /// Mutable references to every expression slot of this call, the
    /// collector snapshots excepted.
    pub fn expressions_mut(&mut self) -> Vec<&mut Expression> {
        let mut expressions: Vec<&mut Expression> = vec![&mut self.dest];
        for argument in &mut self.arguments {
            expressions.push(&mut argument.lhs);
            expressions.push(&mut argument.rhs);
        }
        for define in &mut self.defines {
            expressions.push(&mut define.lhs);
            if let Some(ref mut rhs) = define.rhs {
                expressions.push(rhs);
            }
        }
        expressions
    }

    /// Mutable references to the expressions of the collector snapshots.
    pub fn collector_expressions_mut(&mut self) -> Vec<&mut Expression> {
        let mut expressions: Vec<&mut Expression> = Vec::new();
        for def in &mut self.def_collector.defs {
            expressions.push(&mut def.lhs);
            expressions.push(&mut def.rhs);
        }
        for use_ in &mut self.use_collector.uses {
            expressions.push(use_);
        }
        expressions
    }

    /// The arguments as they print in a statement listing.
    pub fn arguments_to_string(&self, number: usize) -> String {
        let arguments: Vec<String> = self.arguments.iter()
            .map(|argument| format!("{:4} {}", number, argument))
            .collect();
        arguments.join(",\t")
    }

    /// The defines as they print in a statement listing.
    pub fn defines_to_string(&self, number: usize) -> String {
        let defines: Vec<String> = self.defines.iter()
            .map(|define| format!("{:4} {}", number, define))
            .collect();
        defines.join(",\t")
    }

    pub(crate) fn fmt_with_number(&self, f: &mut fmt::Formatter, number: usize)
        -> fmt::Result {

        let dest = match self.dest_proc {
            Some(ref callee) => callee.to_string(),
            None => self.dest.to_string()
        };
        if self.dest_proc.is_none() && self.defines.is_empty() {
            return write!(f, "<all> := CALL {}(<all>)", dest);
        }
        let defines: Vec<String> =
            self.defines.iter().map(|define| define.to_string()).collect();
        let arguments: Vec<String> = self.arguments.iter()
            .map(|argument| format!("{:4} {}", number, argument))
            .collect();
        write!(f, "{{ {} }} := CALL {}({})",
               defines.join(", "), dest, arguments.join(", "))
    }
}


/// The two variadic format-processing families.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VariadicFamily {
    Printf,
    Scanf
}

/// Recognize a variadic format function by name. Returns the family and
/// the index of the format-string parameter.
pub fn variadic_family(name: &str) -> Option<(VariadicFamily, usize)> {
    match name {
        "printf" => Some((VariadicFamily::Printf, 0)),
        "fprintf" => Some((VariadicFamily::Printf, 1)),
        "sprintf" => Some((VariadicFamily::Printf, 1)),
        "snprintf" => Some((VariadicFamily::Printf, 2)),
        "scanf" => Some((VariadicFamily::Scanf, 0)),
        "fscanf" => Some((VariadicFamily::Scanf, 1)),
        "sscanf" => Some((VariadicFamily::Scanf, 1)),
        _ => None
    }
}

/// The type of the argument consumed by one conversion specifier.
/// Specifiers outside this table consume no argument.
pub fn specifier_type(family: VariadicFamily, specifier: char) -> Option<Type> {
    let printf = match specifier {
        'd' | 'i' => Type::Integer { bits: 32, sign: Signedness::Signed },
        'u' | 'o' | 'x' | 'X' =>
            Type::Integer { bits: 32, sign: Signedness::Unsigned },
        'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'a' | 'A' =>
            Type::Float { bits: 64 },
        'c' => Type::Char,
        's' => Type::string(),
        'p' => Type::pointer(Type::Void),
        _ => return None
    };
    match family {
        VariadicFamily::Printf => Some(printf),
        // The scanf family reads into pointers, and reads floats at
        // single precision.
        VariadicFamily::Scanf => Some(match specifier {
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'a' | 'A' =>
                Type::pointer(Type::Float { bits: 32 }),
            _ => Type::pointer(printf)
        })
    }
}

/// The conversion specifiers of a format string, in order. `%%` consumes
/// no argument and is skipped, as is any unrecognized specifier.
pub fn parse_format_specifiers(format: &str) -> Vec<char> {
    let mut specifiers = Vec::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        // Skip flags, field width, precision and length modifiers.
        while let Some(&next) = chars.peek() {
            match next {
                '-' | '+' | ' ' | '#' | '0'..='9' | '.' |
                'h' | 'l' | 'L' | 'z' | 'j' | 't' => {
                    chars.next();
                },
                _ => break
            }
        }
        match chars.next() {
            Some('%') | None => continue,
            Some(specifier) => specifiers.push(specifier)
        }
    }
    specifiers
}


impl CallStatement {
    /// For a recognized variadic format function, parse the format string
    /// and synthesize typed argument assignments at increasing stack
    /// offsets past the format argument.
    ///
    /// `lookup_def` resolves a statement handle to the right-hand side of
    /// a plain assignment, so the format string may be found through one
    /// subscripted reference. Returns true if the call was processed.
    pub fn do_ellipsis_processing<F>(
        &mut self,
        convention: &::analysis::calling_convention::CallingConvention,
        lookup_def: F
    ) -> bool where F: Fn(StatementId) -> Option<Expression> {

        if self.ellipsis_processed || self.dest_proc.is_none() {
            return false;
        }
        let (family, format_index, num_params) = {
            let signature = match self.signature {
                Some(ref signature) => signature,
                None => return false
            };
            if !signature.has_ellipsis() {
                return false;
            }
            let family = match variadic_family(signature.name()) {
                Some((family, _)) => family,
                None => return false
            };
            let num_params = signature.parameters().len();
            let format_index = if num_params > 0 {
                num_params - 1
            }
            else if self.arguments.is_empty() {
                return false;
            }
            else {
                self.arguments.len() - 1
            };
            (family, format_index, num_params)
        };

        let format = {
            let argument = match self.arguments.get(format_index) {
                Some(argument) => argument,
                None => return false
            };
            let resolved = match argument.rhs {
                Expression::Constant(_) => argument.rhs.clone(),
                Expression::Ref { def: Some(def), .. } => match lookup_def(def) {
                    Some(rhs) => rhs,
                    None => return false
                },
                _ => return false
            };
            match resolved {
                Expression::Constant(Constant::Str(format)) => format,
                _ => return false
            }
        };

        debug!("ellipsis processing with format {:?}", format);

        // Arguments synthesized by an earlier round would follow the
        // format string; drop them before synthesizing afresh.
        self.arguments.truncate(format_index + 1);

        let word = convention.stack_argument_length();
        let sp = convention.stack_pointer().clone();
        let format_offset =
            convention.stack_argument_offset() + format_index * word;
        let mut offset = format_offset + word;

        for specifier in parse_format_specifiers(&format) {
            let ty = match specifier_type(family, specifier) {
                Some(ty) => ty,
                None => {
                    warn!("unhandled conversion specifier %{}", specifier);
                    continue;
                }
            };
            let slot = Expression::location(Location::memory(
                Expression::add(
                    sp.clone(),
                    Expression::constant(Constant::int(offset as u64, 32)))));
            self.arguments.push(Assign::typed(
                ty,
                slot.clone(),
                Expression::subscript(slot, None)));
            offset += word;
        }

        // The signature now has a concrete parameter per synthesized
        // argument.
        if let Some(ref mut signature) = self.signature {
            for (n, argument) in
                self.arguments.iter().enumerate().skip(num_params) {
                signature.add_parameter(
                    format!("param{}", n + 1),
                    argument.lhs.clone(),
                    argument.ty.clone());
            }
        }

        self.ellipsis_processed = true;
        true
    }
}
