//! Static Single Assignment construction and destruction.
//!
//! Construction inserts phi-assigns at iterated dominance frontiers and
//! renames every use into a subscripted reference to its unique
//! definition. Destruction runs interference analysis over the
//! references, chooses user-visible local names, and rewrites phi-assigns
//! into ordinary copies.

pub mod connection_graph;
pub mod construction;
pub mod destruction;

pub use self::connection_graph::ConnectionGraph;
pub use self::construction::construct;
pub use self::destruction::destroy;
