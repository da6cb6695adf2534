//! Reaching definitions: which definition of each base location may
//! reach a program point.

use analysis::fixed_point::{fixed_point, Direction, FixedPointAnalysis,
                            FixedPointResult};
use error::*;
use il::*;
use std::collections::BTreeSet;

/// The definitions reaching a point: (base location, defining statement)
/// pairs.
pub type ReachSet = BTreeSet<(Expression, StatementId)>;

pub struct ReachingDefinitions;

/// One forward reaching-definitions step over a statement: definitions
/// of a base location kill all earlier definitions of the same base.
pub(crate) fn step_forward(statement: &Statement, reach: &mut ReachSet) {
    let id = statement.id();
    for base in statement.defined_locations() {
        let base = base.clone();
        let killed: Vec<(Expression, StatementId)> = reach.iter()
            .filter(|&&(ref b, _)| b == &base)
            .cloned()
            .collect();
        for kill in killed {
            reach.remove(&kill);
        }
        reach.insert((base, id));
    }
}

impl FixedPointAnalysis for ReachingDefinitions {
    type State = ReachSet;

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn boundary_state(&self) -> ReachSet {
        ReachSet::new()
    }

    fn top(&self) -> ReachSet {
        ReachSet::new()
    }

    fn transfer(
        &self,
        procedure: &Procedure,
        fragment: &Fragment,
        state: ReachSet
    ) -> Result<ReachSet> {
        let mut reach = state;
        for id in fragment.statements() {
            step_forward(procedure.statement(id)?, &mut reach);
        }
        Ok(reach)
    }

    fn join(&self, a: ReachSet, b: &ReachSet) -> Result<ReachSet> {
        let mut joined = a;
        for def in b {
            joined.insert(def.clone());
        }
        Ok(joined)
    }
}

/// Run reaching definitions over a procedure.
pub fn reaching_definitions(procedure: &Procedure)
    -> Result<FixedPointResult<ReachSet>> {

    fixed_point(&ReachingDefinitions, procedure)
}
