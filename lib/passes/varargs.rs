//! Ellipsis processing for variadic format calls, and duplicate
//! argument elimination.
//!
//! The heavy lifting lives on the call statement
//! (`CallStatement::do_ellipsis_processing`); this pass drives it over
//! every eligible call and tidies argument lists afterwards.

use error::*;
use il::*;
use passes::{Pass, PassChange, PassContext, PassId};

pub struct EllipsisProcessing;

impl Pass for EllipsisProcessing {
    fn id(&self) -> PassId {
        PassId::EllipsisProcessing
    }

    fn execute(&self, procedure: &mut Procedure, _: &mut PassContext)
        -> Result<PassChange> {

        let call_ids: Vec<StatementId> = procedure.statements()
            .into_iter()
            .filter(|statement| statement.is_call())
            .map(|statement| statement.id())
            .collect();
        let mut progress = false;

        for id in call_ids {
            let eligible = procedure.statement(id)?.call()
                .and_then(|call| call.signature())
                .map(|signature| signature.has_ellipsis())
                .unwrap_or(false);
            if eligible {
                if procedure.do_ellipsis_processing(id)? {
                    debug!("processed variadic call {}", id);
                    progress = true;
                }
            }
            if let Some(call) = procedure.statement_mut(id)?.call_mut() {
                progress |= call.eliminate_duplicate_args();
            }
        }

        // Synthesized argument slots reference the values on entry;
        // give them their implicit definitions.
        if progress {
            procedure.resolve_dangling_refs()?;
        }

        Ok(if progress {
            PassChange::PROGRESS
        }
        else {
            PassChange::empty()
        })
    }
}
