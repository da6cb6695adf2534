//! Kestrel is the procedure decompilation core of a machine-code
//! decompiler.
//!
//! The input is a procedure whose control-flow fragments have been filled
//! with three-address-style IR statements by an upstream decoder. Kestrel
//! transforms that procedure through Static Single Assignment form into a
//! typed, named, locals-only intermediate form ready for code emission.
//!
//! The major components are:
//!
//! * `il` - The intermediate language: expressions, statements, fragments,
//! procedures and programs.
//! * `graph` - A generic directed graph with dominator, post-dominator and
//! dominance-frontier computation.
//! * `analysis` - Iterative dataflow analyses and calling-convention
//! knowledge.
//! * `ssa` - SSA construction and destruction, with interference analysis.
//! * `passes` - The optimization passes and the pass manager that sequences
//! them.
//! * `decode` - The contracts kestrel expects from the upstream decoder and
//! signature database.
//!
//! Kestrel assumes exclusive mutation of one procedure at a time. Compile
//! with the `thread_safe` feature to share read-mostly state (dominance
//! caches, preservation results) across threads when an outer scheduler
//! decompiles procedures of one program in parallel.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod analysis;
pub mod decode;
pub mod error;
pub mod graph;
pub mod il;
pub mod passes;
pub mod ssa;
pub mod types;

#[cfg(not(feature = "thread_safe"))]
use std::rc::Rc;
#[cfg(not(feature = "thread_safe"))]
/// A reference-counted pointer over read-mostly shared state.
///
/// `RC<T>` is `Rc<T>` by default, and `Arc<T>` when the `thread_safe`
/// feature is enabled.
pub type RC<T> = Rc<T>;

#[cfg(feature = "thread_safe")]
use std::sync::Arc;
#[cfg(feature = "thread_safe")]
/// A reference-counted pointer over read-mostly shared state.
///
/// `RC<T>` is `Rc<T>` by default, and `Arc<T>` when the `thread_safe`
/// feature is enabled.
pub type RC<T> = Arc<T>;
