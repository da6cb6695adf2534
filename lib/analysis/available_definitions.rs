//! Available definitions: which definition of each base location is
//! guaranteed to reach a program point along every path.
//!
//! The lattice element is `None` for "all definitions" (the top, used to
//! initialize fragments before any path reaches them) and `Some(set)`
//! once at least one path has contributed.

use analysis::fixed_point::{fixed_point, Direction, FixedPointAnalysis,
                            FixedPointResult};
use analysis::reaching_definitions::{step_forward, ReachSet};
use error::*;
use il::*;

pub struct AvailableDefinitions;

impl FixedPointAnalysis for AvailableDefinitions {
    type State = Option<ReachSet>;

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn boundary_state(&self) -> Option<ReachSet> {
        Some(ReachSet::new())
    }

    fn top(&self) -> Option<ReachSet> {
        None
    }

    fn transfer(
        &self,
        procedure: &Procedure,
        fragment: &Fragment,
        state: Option<ReachSet>
    ) -> Result<Option<ReachSet>> {
        let mut reach = match state {
            Some(reach) => reach,
            None => return Ok(None)
        };
        for id in fragment.statements() {
            step_forward(procedure.statement(id)?, &mut reach);
        }
        Ok(Some(reach))
    }

    fn join(&self, a: Option<ReachSet>, b: &Option<ReachSet>)
        -> Result<Option<ReachSet>> {

        Ok(match (a, b) {
            (None, b) => b.clone(),
            (a, &None) => a,
            (Some(a), &Some(ref b)) =>
                Some(a.intersection(b).cloned().collect())
        })
    }
}

/// Run available definitions over a procedure.
pub fn available_definitions(procedure: &Procedure)
    -> Result<FixedPointResult<Option<ReachSet>>> {

    fixed_point(&AvailableDefinitions, procedure)
}
