//! Dataflow analyses over the IL, and calling-convention knowledge.
//!
//! The analyses here are read-only over a procedure (liveness, reaching
//! and available definitions, use counting) or fill caches the passes
//! consume (fragment liveness sets, call-site collectors, interference
//! edges). The passes themselves live in the `passes` module.

pub mod available_definitions;
pub mod calling_convention;
pub mod def_use;
pub mod fixed_point;
pub mod interference;
pub mod liveness;
pub mod reaching_definitions;

pub use self::available_definitions::available_definitions;
pub use self::calling_convention::{CallingConvention, CallingConventionType};
pub use self::def_use::{fill_call_collectors, use_counts};
pub use self::fixed_point::{fixed_point, Direction, FixedPointAnalysis,
                            FixedPointResult};
pub use self::interference::find_interferences;
pub use self::liveness::{live_variables, update_liveness};
pub use self::reaching_definitions::{reaching_definitions, ReachSet};
