//! Indirect control resolution: switch-table recovery for computed
//! jumps, and conversion of computed calls whose destination folds to a
//! known procedure.
//!
//! Recovering a switch may decode new basic blocks. That invalidates
//! SSA form; the pass reports `INVALIDATE_SSA` and the pass manager
//! restarts the pipeline from SSA construction.

use decode::DecodeResult;
use error::*;
use il::*;
use passes::{Pass, PassChange, PassContext, PassId};

pub struct IndirectControlResolution;

impl Pass for IndirectControlResolution {
    fn id(&self) -> PassId {
        PassId::IndirectControlResolution
    }

    fn execute(&self, procedure: &mut Procedure, ctx: &mut PassContext)
        -> Result<PassChange> {

        let mut change = PassChange::empty();

        // Computed jumps ending fragments.
        for index in procedure.cfg().indices() {
            let goto_id = {
                let fragment = procedure.cfg().fragment(index)?;
                match fragment.last_statement() {
                    Some(id) => id,
                    None => continue
                }
            };
            let unresolved = match *procedure.statement(goto_id)?.kind() {
                StatementKind::Goto(ref goto) =>
                    goto.computed && goto.switch_info.is_none(),
                _ => false
            };
            if unresolved {
                change |=
                    analyze_computed_jump(procedure, ctx, index, goto_id)?;
            }
        }

        // Computed calls.
        let call_ids: Vec<StatementId> = procedure.statements()
            .into_iter()
            .filter(|statement| statement.is_call())
            .map(|statement| statement.id())
            .collect();
        for id in call_ids {
            let converted = {
                let program = &*ctx.program;
                let update_computed =
                    ctx.settings.update_computed_flag_on_fold;
                match procedure.statement_mut(id)?.call_mut() {
                    Some(call) => call.try_convert_to_direct(
                        |address| program.has_procedure(address),
                        update_computed),
                    None => false
                }
            };
            if converted {
                change |= PassChange::PROGRESS;
            }
        }

        Ok(change)
    }
}


/// A recognized jump-table shape.
struct SwitchForm {
    /// Address of the table of code pointers.
    table: u64,
    /// The case-selecting expression, subscripts stripped.
    index: Expression,
    /// For `goto table[table2[index]]`, the address of the byte table.
    inner_table: Option<u64>
}

fn analyze_computed_jump(
    procedure: &mut Procedure,
    ctx: &mut PassContext,
    index: usize,
    goto_id: StatementId
) -> Result<PassChange> {
    let dest = match *procedure.statement(goto_id)?.kind() {
        StatementKind::Goto(ref goto) => goto.dest.clone(),
        _ => return Ok(PassChange::empty())
    };
    let dest = dest.simplify().strip_subscripts().simplify();

    let form = match match_switch_form(&dest) {
        Some(form) => form,
        None => {
            debug!("computed jump {} does not match a table shape: {}",
                   goto_id, dest);
            return Ok(PassChange::empty());
        }
    };
    let num_cases = match find_num_cases(procedure, index, &form.index)? {
        Some(num_cases) => num_cases,
        None => {
            debug!("no upper-bound compare found for computed jump {}",
                   goto_id);
            return Ok(PassChange::empty());
        }
    };

    // Read every case target up front. A table read outside the image
    // abandons the whole recovery; cases are never invented.
    let mut targets: Vec<u64> = Vec::new();
    for i in 0..num_cases {
        let target = match form.inner_table {
            None => ctx.program.image().read_word(form.table + 4 * i as u64),
            Some(inner) => ctx.program.image()
                .read_byte(inner + i as u64)
                .and_then(|entry| ctx.program.image()
                          .read_word(form.table + 4 * entry as u64))
        };
        match target {
            Some(target) => targets.push(target),
            None => {
                debug!("jump table at 0x{:x} leaves the image", form.table);
                return Ok(PassChange::empty());
            }
        }
    }

    debug!("recovered switch at fragment {}: table 0x{:x}, {} cases",
           index, form.table, num_cases);

    let mut decoded_new = false;
    let mut change = PassChange::PROGRESS;
    for (i, &target) in targets.iter().enumerate() {
        if !ctx.program.image().contains(target) {
            warn!("switch case {} target 0x{:x} is outside the image",
                  i, target);
            continue;
        }
        match ensure_block(procedure, ctx, target, &mut decoded_new)? {
            Some(fragment) => {
                procedure.cfg_mut()
                    .add_edge(index, fragment, EdgeKind::Case(i))?;
            },
            None => {
                warn!("switch case {} at 0x{:x} did not decode", i, target);
            }
        }
    }

    procedure.cfg_mut().fragment_mut(index)?.set_kind(FragmentKind::Switch);
    if let StatementKind::Goto(ref mut goto) =
        *procedure.statement_mut(goto_id)?.kind_mut() {
        goto.switch_info = Some(SwitchInfo {
            table: form.table,
            num_cases: num_cases,
            index: form.index.clone(),
            double_indirect: form.inner_table.is_some()
        });
    }

    change |= PassChange::CFG_CHANGED;
    if decoded_new {
        change |= PassChange::INVALIDATE_SSA;
    }
    Ok(change)
}

/// Match `m[index*4 + table]` and `m[m[index + table2]*4 + table]`
/// shapes against a simplified, subscript-free destination.
/// Simplification has already turned the multiplications into shifts
/// and moved constants to the right.
fn match_switch_form(dest: &Expression) -> Option<SwitchForm> {
    let address = match *dest {
        Expression::Location(Location::Memory(ref address)) => address,
        _ => return None
    };
    let (scaled, table) = match **address {
        Expression::Binary { op: BinaryOp::Add, ref lhs, ref rhs } =>
            (lhs, rhs.int_value()?),
        _ => return None
    };
    let index = match **scaled {
        Expression::Binary { op: BinaryOp::Shl, ref lhs, ref rhs }
            if rhs.int_value() == Some(2) => lhs,
        Expression::Binary { op: BinaryOp::Mul, ref lhs, ref rhs }
            if rhs.int_value() == Some(4) => lhs,
        _ => return None
    };
    // Double indirection: the scaled index is itself a load from a byte
    // table.
    if let Expression::Location(Location::Memory(ref inner)) = **index {
        if let Expression::Binary {
            op: BinaryOp::Add, ref lhs, ref rhs
        } = **inner {
            if let Some(inner_table) = rhs.int_value() {
                return Some(SwitchForm {
                    table: table,
                    index: (**lhs).clone(),
                    inner_table: Some(inner_table)
                });
            }
        }
        return None;
    }
    Some(SwitchForm {
        table: table,
        index: (**index).clone(),
        inner_table: None
    })
}

/// Find the number of cases by walking the dominator chain for a
/// compare-and-branch against a constant upper bound on the switch
/// index.
///
/// A masked index (an `and` between the compare and the branch) does not
/// match the index expression, so the bound is not found and the jump
/// stays unresolved. You can have an `and` and still have a test for an
/// upper bound; this needs tightening.
fn find_num_cases(
    procedure: &mut Procedure,
    index: usize,
    switch_index: &Expression
) -> Result<Option<usize>> {
    let dominance = procedure.cfg_mut().dominance()?;
    let mut current = index;
    while let Some(&idom) = dominance.idoms.get(&current) {
        current = idom;
        let branch_id = match procedure.cfg().fragment(current)?
            .last_statement() {
            Some(id) => id,
            None => continue
        };
        let condition = match *procedure.statement(branch_id)?.kind() {
            StatementKind::Branch(ref branch) => branch.condition.clone(),
            _ => continue
        };
        let condition = condition.strip_subscripts().simplify();
        if let Expression::Binary { op, ref lhs, ref rhs } = condition {
            let bound = match rhs.int_value() {
                Some(bound) => bound as usize,
                None => continue
            };
            if lhs.as_ref() != switch_index {
                continue;
            }
            let num_cases = match op {
                // Branch taken leaves the switch: the bound is the last
                // valid case or one past it, per the operator.
                BinaryOp::CmpGtu | BinaryOp::CmpGts => bound + 1,
                BinaryOp::CmpGeu | BinaryOp::CmpGes => bound,
                // Branch taken enters the switch.
                BinaryOp::CmpLtu | BinaryOp::CmpLts => bound,
                BinaryOp::CmpLeu | BinaryOp::CmpLes => bound + 1,
                _ => continue
            };
            return Ok(Some(num_cases));
        }
    }
    Ok(None)
}

/// The fragment at `address`, decoding it (and the blocks it reaches)
/// on demand.
fn ensure_block(
    procedure: &mut Procedure,
    ctx: &mut PassContext,
    address: u64,
    decoded_new: &mut bool
) -> Result<Option<FragmentId>> {
    if let Some(fragment) = procedure.fragment_at(address) {
        return Ok(Some(fragment));
    }
    match ctx.decoder.decode_at(address)? {
        DecodeResult::NotCode => {
            warn!("no code at 0x{:x}", address);
            Ok(None)
        },
        DecodeResult::Block { rtls, fall_through } => {
            let fragment = procedure.append_decoded_fragment(rtls)?;
            *decoded_new = true;
            connect_terminal(procedure, ctx, fragment, fall_through,
                             decoded_new)?;
            Ok(Some(fragment))
        }
    }
}

/// Wire a freshly decoded fragment to its successors, decoding them on
/// demand.
fn connect_terminal(
    procedure: &mut Procedure,
    ctx: &mut PassContext,
    fragment: FragmentId,
    fall_through: Option<u64>,
    decoded_new: &mut bool
) -> Result<()> {
    enum Flow {
        None,
        Fall,
        Jump(u64),
        BranchTo(u64),
        CallReturn
    }

    let flow = {
        let terminal = procedure.cfg().fragment(fragment)?.last_statement();
        match terminal {
            None => Flow::Fall,
            Some(id) => match *procedure.statement(id)?.kind() {
                StatementKind::Goto(ref goto) => match goto.dest.int_value() {
                    Some(target) if !goto.computed => Flow::Jump(target),
                    // A nested computed jump is resolved by a later
                    // sweep, after the restart.
                    _ => Flow::None
                },
                StatementKind::Branch(ref branch) =>
                    match branch.dest.int_value() {
                        Some(target) => Flow::BranchTo(target),
                        None => Flow::None
                    },
                StatementKind::Call(_) => Flow::CallReturn,
                StatementKind::Return(_) => Flow::None,
                _ => Flow::Fall
            }
        }
    };

    match flow {
        Flow::None => {},
        Flow::Fall => {
            if let Some(next) = fall_through {
                if let Some(target) =
                    ensure_block(procedure, ctx, next, decoded_new)? {
                    procedure.cfg_mut()
                        .add_edge(fragment, target, EdgeKind::Fall)?;
                }
            }
        },
        Flow::Jump(address) => {
            if let Some(target) =
                ensure_block(procedure, ctx, address, decoded_new)? {
                procedure.cfg_mut()
                    .add_edge(fragment, target, EdgeKind::Taken)?;
            }
        },
        Flow::BranchTo(address) => {
            if let Some(target) =
                ensure_block(procedure, ctx, address, decoded_new)? {
                procedure.cfg_mut()
                    .add_edge(fragment, target, EdgeKind::Taken)?;
            }
            if let Some(next) = fall_through {
                if let Some(target) =
                    ensure_block(procedure, ctx, next, decoded_new)? {
                    procedure.cfg_mut()
                        .add_edge(fragment, target, EdgeKind::Fall)?;
                }
            }
        },
        Flow::CallReturn => {
            if let Some(next) = fall_through {
                if let Some(target) =
                    ensure_block(procedure, ctx, next, decoded_new)? {
                    procedure.cfg_mut()
                        .add_edge(fragment, target, EdgeKind::CallReturn)?;
                }
            }
        }
    }
    Ok(())
}


#[cfg(test)]
pub mod tests {
    use super::*;
    use analysis::calling_convention::CallingConventionType;
    use decode::{DecodedRtl, Decoder};
    use passes::{PassContext, Settings};
    use ssa;
    use std::collections::BTreeMap;
    use types::Endian;

    /// A decoder with nothing to decode.
    pub struct NullDecoder;

    impl Decoder for NullDecoder {
        fn decode_at(&mut self, _: u64) -> Result<DecodeResult> {
            Ok(DecodeResult::NotCode)
        }
    }

    /// A decoder serving return-only blocks at fixed addresses.
    struct TableDecoder {
        blocks: BTreeMap<u64, ()>,
        decoded: Vec<u64>
    }

    impl Decoder for TableDecoder {
        fn decode_at(&mut self, address: u64) -> Result<DecodeResult> {
            if !self.blocks.contains_key(&address) {
                return Ok(DecodeResult::NotCode);
            }
            self.decoded.push(address);
            Ok(DecodeResult::Block {
                rtls: vec![DecodedRtl {
                    address: address,
                    statements: vec![
                        StatementKind::Return(ReturnStatement::new())
                    ]
                }],
                fall_through: None
            })
        }
    }

    fn switch_image() -> Image {
        // Image from 0x2000 through the jump table at 0x10000.
        let mut data = vec![0u8; 0xe000 + 16];
        let table: [u64; 4] = [0x2000, 0x2010, 0x2020, 0x2030];
        for (i, &target) in table.iter().enumerate() {
            let offset = 0xe000 + i * 4;
            data[offset] = target as u8;
            data[offset + 1] = (target >> 8) as u8;
            data[offset + 2] = (target >> 16) as u8;
            data[offset + 3] = (target >> 24) as u8;
        }
        Image::new(0x2000, data, Endian::Little)
    }

    /// `goto m[0x10000 + 4*r24]` guarded by `branch r24 > 3`
    /// becomes a four-way switch; the new targets are decoded and the
    /// pass demands a pipeline restart.
    #[test]
    fn switch_recovery_decodes_four_cases() {
        let mut proc = Procedure::new("f", 0x1800, CallingConventionType::Cdecl);
        let head = proc.add_fragment(FragmentKind::Taken);
        let sw = proc.add_fragment(FragmentKind::Taken);
        let default = proc.add_fragment(FragmentKind::Ret);

        proc.push_branch(
            head,
            Expression::binary(BinaryOp::CmpGtu, reg(24), expr_const(3, 32)),
            expr_const(0x1900, 32)).unwrap();
        proc.push_goto(
            sw,
            mem(Expression::add(
                expr_const(0x10000, 32),
                Expression::mul(expr_const(4, 32), reg(24))))).unwrap();
        proc.push_return(default, ReturnStatement::new()).unwrap();

        proc.cfg_mut().add_edge(head, sw, EdgeKind::Fall).unwrap();
        proc.cfg_mut().add_edge(head, default, EdgeKind::Taken).unwrap();

        ssa::construct(&mut proc).unwrap();

        let mut program = Program::new("test", switch_image());
        let mut decoder = TableDecoder {
            blocks: vec![(0x2000, ()), (0x2010, ()), (0x2020, ()),
                         (0x2030, ())].into_iter().collect(),
            decoded: Vec::new()
        };
        let settings = Settings::default();
        let change = {
            let mut ctx = PassContext {
                program: &mut program,
                decoder: &mut decoder,
                settings: &settings,
                cancel: None
            };
            IndirectControlResolution.execute(&mut proc, &mut ctx).unwrap()
        };

        // The pass made progress, changed the graph, and demands a
        // restart from SSA construction.
        assert!(change.contains(PassChange::PROGRESS));
        assert!(change.contains(PassChange::CFG_CHANGED));
        assert!(change.contains(PassChange::INVALIDATE_SSA));

        assert_eq!(proc.cfg().fragment(sw).unwrap().kind(),
                   FragmentKind::Switch);
        assert_eq!(decoder.decoded.len(), 4);
        for (i, address) in
            [0x2000u64, 0x2010, 0x2020, 0x2030].iter().enumerate() {
            let fragment = proc.fragment_at(*address)
                .expect("case target has a fragment");
            assert_eq!(proc.cfg().edge_kind(sw, fragment).unwrap(),
                       EdgeKind::Case(i));
        }

        // The restart path: tearing down and rebuilding SSA leaves a
        // consistent procedure.
        proc.clear_ssa().unwrap();
        ssa::construct(&mut proc).unwrap();
        proc.verify_ssa().unwrap();

        // Re-running the pass finds the switch already resolved.
        let second = {
            let mut ctx = PassContext {
                program: &mut program,
                decoder: &mut decoder,
                settings: &settings,
                cancel: None
            };
            IndirectControlResolution.execute(&mut proc, &mut ctx).unwrap()
        };
        assert!(!second.contains(PassChange::INVALIDATE_SSA));
        assert_eq!(decoder.decoded.len(), 4);
    }

    /// Without a dominating bound compare the jump stays unresolved; no
    /// cases are invented.
    #[test]
    fn missing_bound_leaves_jump_unresolved() {
        let mut proc = Procedure::new("f", 0x1800, CallingConventionType::Cdecl);
        let sw = proc.add_fragment(FragmentKind::Taken);
        let goto_id = proc.push_goto(
            sw,
            mem(Expression::add(
                expr_const(0x10000, 32),
                Expression::mul(expr_const(4, 32), reg(24))))).unwrap();

        let mut program = Program::new("test", switch_image());
        let mut decoder = NullDecoder;
        let settings = Settings::default();
        let mut ctx = PassContext {
            program: &mut program,
            decoder: &mut decoder,
            settings: &settings,
            cancel: None
        };
        let change =
            IndirectControlResolution.execute(&mut proc, &mut ctx).unwrap();
        assert_eq!(change, PassChange::empty());
        match *proc.statement(goto_id).unwrap().kind() {
            StatementKind::Goto(ref goto) =>
                assert!(goto.switch_info.is_none()),
            _ => unreachable!()
        }
    }

    /// An and-mask between the compare and the branch hides the bound:
    /// the compared expression no longer matches the switch index, and
    /// the jump stays unresolved.
    #[test]
    fn masked_bound_compare_is_not_recognized() {
        let mut proc = Procedure::new("f", 0x1800, CallingConventionType::Cdecl);
        let head = proc.add_fragment(FragmentKind::Taken);
        let sw = proc.add_fragment(FragmentKind::Taken);
        let default = proc.add_fragment(FragmentKind::Ret);

        // The bound tests r24 & 7, but the table is indexed by r24.
        proc.push_branch(
            head,
            Expression::binary(
                BinaryOp::CmpGtu,
                Expression::and(reg(24), expr_const(7, 32)),
                expr_const(3, 32)),
            expr_const(0x1900, 32)).unwrap();
        let goto_id = proc.push_goto(
            sw,
            mem(Expression::add(
                expr_const(0x10000, 32),
                Expression::mul(expr_const(4, 32), reg(24))))).unwrap();
        proc.push_return(default, ReturnStatement::new()).unwrap();
        proc.cfg_mut().add_edge(head, sw, EdgeKind::Fall).unwrap();
        proc.cfg_mut().add_edge(head, default, EdgeKind::Taken).unwrap();

        let mut program = Program::new("test", switch_image());
        let mut decoder = NullDecoder;
        let settings = Settings::default();
        let mut ctx = PassContext {
            program: &mut program,
            decoder: &mut decoder,
            settings: &settings,
            cancel: None
        };
        let change =
            IndirectControlResolution.execute(&mut proc, &mut ctx).unwrap();
        assert_eq!(change, PassChange::empty());
        match *proc.statement(goto_id).unwrap().kind() {
            StatementKind::Goto(ref goto) =>
                assert!(goto.switch_info.is_none()),
            _ => unreachable!()
        }
    }

    /// A computed call whose destination folds to a known procedure
    /// address resolves to a direct call; the computed flag keeps its
    /// historical value unless the settings say otherwise.
    #[test]
    fn computed_call_resolves_to_known_procedure() {
        let mut program = Program::new("test", Image::empty());
        program.create_procedure(0x1000, "target",
                                 CallingConventionType::Cdecl);

        let mut proc =
            Procedure::new("caller", 0x800, CallingConventionType::Cdecl);
        let frag = proc.add_fragment(FragmentKind::Call);
        let call_id = proc.push_call(
            frag,
            CallStatement::new(Expression::add(
                expr_const(0x800, 32), expr_const(0x800, 32)))).unwrap();

        let mut decoder = NullDecoder;
        let settings = Settings::default();
        {
            let mut ctx = PassContext {
                program: &mut program,
                decoder: &mut decoder,
                settings: &settings,
                cancel: None
            };
            let change = IndirectControlResolution
                .execute(&mut proc, &mut ctx).unwrap();
            assert!(change.contains(PassChange::PROGRESS));
        }

        let call = proc.statement(call_id).unwrap().call().unwrap();
        assert_eq!(call.dest_proc(), Some(&CalleeRef::User(0x1000)));
        // The historical behavior: folding the destination does not
        // clear the computed flag.
        assert!(call.is_computed());
    }
}
