//! Exec mask insertion.
//!
//! Divergent control flow on a wave-based GPU is implemented by predication: both sides of a
//! divergent branch execute, one after the other, each with the lanes that did not take it masked
//! off in the `exec` register. Before this pass, the program's blocks are annotated with the role
//! they play in the structured control flow graph (see [BlockKind]), and their terminators are
//! pseudo-branches on logical conditions. This pass makes the lane masks explicit.
//!
//! Every block is visited once, in order, while a stack of lane masks is maintained: the bottom of
//! the stack is the mask of the whole program, and every divergent `if` or loop being executed
//! pushes the mask of the lanes executing it. At the start of each block, the stacks of its
//! predecessors are joined, which creates linear phis wherever they disagree, and at the end of
//! each block the terminator is rewritten into the mask manipulation implied by the block's kind.
//!
//! In fragment shaders, the pass also switches between whole quad mode and exact mode as
//! instructions require, using the results of [WqmAnalysis]. Once the analysis proves that no
//! later instruction needs one of the two modes, tracking stops.
mod stack;
#[cfg(test)]
mod tests;

use core::{iter::Peekable, mem};

use wavec_ir::{
    BlockId, BlockKind, Builder, Definition, EntityRef, Instruction, Opcode, Operand, Pass,
    PassExecutionState, PhysReg, Program, RegClass, Report, Temp,
};
use wavec_ir_analysis::{WqmAnalysis, WqmState};

use self::stack::{ExecStack, MaskType};

/// Make lane masks explicit, and switch between whole quad mode and exact mode where required.
///
/// See the [module documentation](self) for details.
#[derive(Default)]
pub struct InsertExecMask;

impl Pass for InsertExecMask {
    fn name(&self) -> &'static str {
        "insert-exec-mask"
    }

    fn description(&self) -> &'static str {
        "lowers structured control flow to explicit exec mask manipulation"
    }

    fn run(
        &mut self,
        program: &mut Program,
        state: &mut PassExecutionState<'_>,
    ) -> Result<(), Report> {
        let summary = insert_exec_mask(program);
        state.record("wqm-tracked-blocks", summary.wqm_tracked_blocks);
        state.record("linear-phis", summary.linear_phis);
        Ok(())
    }
}

/// Counters describing what [insert_exec_mask] did
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ExecMaskSummary {
    /// The number of blocks processed while switching between WQM and exact mode
    pub wqm_tracked_blocks: usize,
    /// The number of linear phis created for lane masks
    pub linear_phis: usize,
}

/// A loop being processed
#[derive(Debug, Copy, Clone)]
struct LoopInfo {
    header: BlockId,
    /// The depth of the exec mask stack in the preheader
    num_exec_masks: usize,
    /// The modes needed anywhere in the loop
    needs: WqmState,
    has_divergent_break: bool,
    has_divergent_continue: bool,
    has_discard: bool,
}

struct ExecContext {
    wqm: WqmAnalysis,
    /// The exec mask stack at the end of every block processed so far
    exec: Vec<ExecStack>,
    loops: Vec<LoopInfo>,
    /// Whether we are still switching between WQM and exact mode
    handle_wqm: bool,
    summary: ExecMaskSummary,
}

/// The instructions of the block being processed which have not been placed yet, with their
/// original positions
type Pending = Peekable<core::iter::Enumerate<std::vec::IntoIter<Instruction>>>;

/// Insert exec mask manipulation into `program`.
///
/// Requirements of a well-formed structured program, such as loop headers following their
/// preheaders, are checked with assertions.
pub fn insert_exec_mask(program: &mut Program) -> ExecMaskSummary {
    let handle_wqm = program.needs_wqm && program.needs_exact;
    let wqm = if handle_wqm {
        WqmAnalysis::compute(program)
    } else {
        WqmAnalysis::unspecified(program)
    };
    let mut ctx = ExecContext {
        wqm,
        exec: vec![ExecStack::default(); program.blocks.len()],
        loops: vec![],
        handle_wqm,
        summary: ExecMaskSummary::default(),
    };

    for index in 0..program.blocks.len() {
        process_block(&mut ctx, program, BlockId::new(index));
    }
    assert!(ctx.loops.is_empty(), "a loop was never exited");

    log::debug!(
        target: "insert-exec-mask",
        "inserted exec masks into {} blocks ({} linear phis, {} blocks with wqm tracking)",
        program.blocks.len(),
        ctx.summary.linear_phis,
        ctx.summary.wqm_tracked_blocks
    );
    ctx.summary
}

fn process_block(ctx: &mut ExecContext, program: &mut Program, id: BlockId) {
    if ctx.handle_wqm {
        ctx.summary.wqm_tracked_blocks += 1;
    }

    let original = mem::take(&mut program.blocks[id].instructions);
    let mut instructions = Vec::with_capacity(original.len());
    let mut pending = original.into_iter().enumerate().peekable();

    let mut exec = add_coupling_code(ctx, program, id, &mut pending, &mut instructions);
    if Some(id) == program.last_block() {
        assert!(exec.len() <= 2, "{id} ends the program with {} nested masks", exec.len());
    }

    process_instructions(ctx, program, id, &mut exec, pending, &mut instructions);
    add_branch_code(ctx, program, id, &mut exec, &mut instructions);

    log::trace!(target: "insert-exec-mask", "{id}: live-out exec stack {exec}");
    let block = &mut program.blocks[id];
    block.instructions = instructions;
    block.live_out_exec = Some(exec.top().mask);
    ctx.exec[id.index()] = exec;
}

/// A linear phi whose first operand comes from the loop preheader.
///
/// The operands for the other predecessors are filled in once the loop exit is reached.
fn loop_header_phi(num_preds: usize, preheader_value: Temp, def: Definition) -> Instruction {
    let mut operands = vec![Operand::undef(RegClass::S2); num_preds];
    operands[0] = Operand::temp(preheader_value);
    Instruction::new(Opcode::PLinearPhi, [def], operands)
}

/// Join the exec mask stacks of the predecessors of `id`, and place the instructions which must
/// stay at the start of the block.
fn add_coupling_code(
    ctx: &mut ExecContext,
    program: &mut Program,
    id: BlockId,
    pending: &mut Pending,
    instructions: &mut Vec<Instruction>,
) -> ExecStack {
    let kind = program.blocks[id].kind;
    let preds = program.blocks[id].linear_preds.clone();
    let mut exec = ExecStack::default();

    if id.index() == 0 {
        let (_, startpgm) = pending
            .next()
            .filter(|(_, inst)| inst.opcode == Opcode::PStartPgm)
            .unwrap_or_else(|| panic!("the entry block must begin with p_startpgm"));
        let mut exec_mask = startpgm
            .definitions()
            .last()
            .map(|def| def.temp())
            .unwrap_or_else(|| panic!("p_startpgm must define the initial exec mask"));
        let mut bld = Builder::new(&program.temps, instructions);
        bld.emit(startpgm);

        if ctx.handle_wqm {
            exec.push(exec_mask, MaskType::GLOBAL | MaskType::EXACT);
            // if this block only needs WQM, initialize already
            if ctx.wqm.block_needs(id) == WqmState::WQM {
                exec.transition_to_wqm(&mut bld);
            }
        } else {
            if program.needs_wqm {
                exec_mask = bld.build(
                    Opcode::SWqmB64,
                    [bld.exec_def(), bld.scc_def()],
                    [Builder::exec(exec_mask)],
                );
            }
            exec.push(exec_mask, MaskType::GLOBAL);
        }
        return exec;
    }

    if kind.contains(BlockKind::LOOP_HEADER) {
        assert_eq!(preds[0].index() + 1, id.index(), "{id} must directly follow its preheader");
        let preheader = &ctx.exec[preds[0].index()];
        exec = preheader.clone();
        let info = *ctx.loops.last().unwrap_or_else(|| panic!("{id} is not inside a loop"));
        assert_eq!(exec.len(), info.num_exec_masks);

        let mut bld = Builder::new(&program.temps, instructions);
        // the outer masks may be narrowed by a discard on an earlier iteration
        if info.has_discard {
            for i in 0..info.num_exec_masks - 1 {
                let phi = loop_header_phi(preds.len(), preheader[i].mask, bld.def(RegClass::S2));
                exec[i].mask = bld.insert(phi);
                ctx.summary.linear_phis += 1;
            }
        }

        // the mask to restore at the loop exit
        if info.has_divergent_break {
            let phi = loop_header_phi(preds.len(), preheader.top().mask, bld.def(RegClass::S2));
            exec.top_mut().mask = bld.insert(phi);
            ctx.summary.linear_phis += 1;
        }

        // the lanes active in this iteration
        let def = if info.has_divergent_continue {
            bld.def(RegClass::S2)
        } else {
            bld.exec_def()
        };
        let loop_active = bld.insert(loop_header_phi(preds.len(), preheader.top().mask, def));
        ctx.summary.linear_phis += 1;

        if info.has_divergent_break {
            let ty = (exec.top().ty - MaskType::GLOBAL) | MaskType::LOOP;
            exec.push(loop_active, ty);
        } else {
            let top = exec.top_mut();
            top.mask = loop_active;
            top.ty |= MaskType::LOOP;
        }

        if info.has_divergent_continue {
            while let Some((_, inst)) = pending.next_if(|(_, inst)| inst.opcode != Opcode::PLogicalStart) {
                bld.emit(inst);
            }
            let ty = exec.top().ty & (MaskType::WQM | MaskType::EXACT);
            let mask = bld.copy(bld.exec_def(), Operand::temp(exec.top().mask));
            exec.push(mask, ty);
        }
        return exec;
    }

    if kind.contains(BlockKind::LOOP_EXIT) {
        let info = ctx.loops.pop().unwrap_or_else(|| panic!("{id} is not the exit of a loop"));
        let num_exec_masks = info.num_exec_masks;
        for pred in preds.iter() {
            assert!(ctx.exec[pred.index()].len() >= num_exec_masks);
        }

        fill_loop_header_phis(ctx, program, &info);

        let header_preds = &program.blocks[info.header].linear_preds;
        let mut bld = Builder::new(&program.temps, instructions);
        for k in 0..num_exec_masks {
            let same = ctx.exec[preds[0].index()][k].mask;
            let ty = ctx.exec[header_preds[0].index()][k].ty;
            let trivial = preds.iter().all(|pred| ctx.exec[pred.index()][k].mask == same);
            if trivial {
                exec.push(same, ty);
            } else {
                let operands = preds
                    .iter()
                    .map(|pred| Operand::temp(ctx.exec[pred.index()][k].mask))
                    .collect::<Vec<_>>();
                let phi = bld.build(Opcode::PLinearPhi, [bld.def(RegClass::S2)], operands);
                ctx.summary.linear_phis += 1;
                exec.push(phi, ty);
            }
        }
        assert_eq!(exec.len(), num_exec_masks);

        while let Some((_, inst)) = pending.next_if(|(_, inst)| inst.opcode != Opcode::PLogicalStart) {
            bld.emit(inst);
        }

        satisfy_block_needs(ctx, id, kind, &mut exec, &mut bld);
        exec.restore_top(&mut bld);
        return exec;
    }

    let mut bld = Builder::new(&program.temps, instructions);
    match preds.as_slice() {
        [pred] => exec = ctx.exec[pred.index()].clone(),
        [first, second] => {
            let first = &ctx.exec[first.index()];
            let second = &ctx.exec[second.index()];
            let num_exec_masks = first.len().min(second.len());
            for i in 0..num_exec_masks {
                if first[i].mask == second[i].mask {
                    assert_eq!(first[i].ty, second[i].ty, "{id} joins one mask with two types");
                    exec.push(first[i].mask, first[i].ty);
                    continue;
                }
                let in_exec = i == num_exec_masks - 1 && !kind.contains(BlockKind::MERGE);
                let def = if in_exec {
                    bld.exec_def()
                } else {
                    bld.def(RegClass::S2)
                };
                let phi = bld.build(
                    Opcode::PLinearPhi,
                    [def],
                    [Operand::temp(first[i].mask), Operand::temp(second[i].mask)],
                );
                ctx.summary.linear_phis += 1;
                exec.push(phi, first[i].ty & second[i].ty);
            }
        }
        _ => panic!("{id} has {} linear predecessors, expected one or two", preds.len()),
    }

    while let Some((_, inst)) = pending.next_if(|(_, inst)| inst.is_phi()) {
        bld.emit(inst);
    }

    if kind.contains(BlockKind::MERGE) {
        exec.pop();
    }

    satisfy_block_needs(ctx, id, kind, &mut exec, &mut bld);

    if kind.contains(BlockKind::MERGE) {
        exec.restore_top(&mut bld);
    }
    exec
}

/// Fill in the operands of the loop header phis for the back-edges of the loop.
///
/// The header starts with the phis of the outer masks (only if the loop discards), then the phi
/// of the mask to restore at the exit (only if the loop breaks divergently), and the phi of the
/// loop's active lanes.
fn fill_loop_header_phis(ctx: &ExecContext, program: &mut Program, info: &LoopInfo) {
    let header = &mut program.blocks[info.header];
    let header_preds = header.linear_preds.clone();

    let mut slots = vec![];
    if info.has_discard {
        slots.extend(0..info.num_exec_masks - 1);
    }
    slots.push(info.num_exec_masks - 1);
    if info.has_divergent_break {
        slots.push(info.num_exec_masks);
    }

    for (position, slot) in slots.into_iter().enumerate() {
        let phi = &mut header.instructions[position];
        assert_eq!(phi.opcode, Opcode::PLinearPhi, "{} does not start with its mask phis", info.header);
        for (i, pred) in header_preds.iter().enumerate().skip(1) {
            phi.operands_mut()[i] = Operand::temp(ctx.exec[pred.index()][slot].mask);
        }
    }
}

/// Switch to the mode this block needs throughout, or stop tracking WQM if nothing after this
/// top-level point needs it.
fn satisfy_block_needs(
    ctx: &mut ExecContext,
    id: BlockId,
    kind: BlockKind,
    exec: &mut ExecStack,
    bld: &mut Builder<'_>,
) {
    if !ctx.handle_wqm {
        return;
    }
    let needs = ctx.wqm.block_needs(id);
    let remaining = needs | ctx.wqm.ever_again_needs(id);
    if kind.contains(BlockKind::TOP_LEVEL)
        && exec.len() == 2
        && (remaining.is_empty() || remaining == WqmState::EXACT)
    {
        exec.top_mut().ty |= MaskType::GLOBAL;
        ctx.handle_wqm = false;
        log::trace!(target: "insert-exec-mask", "{id}: no wqm needed from here on");
    }
    if needs == WqmState::WQM {
        exec.transition_to_wqm(bld);
    } else if needs == WqmState::EXACT {
        exec.transition_to_exact(bld);
    }
}

/// Place the remaining instructions of the block, switching modes and lowering the
/// pseudo-instructions which depend on the exec mask stack.
fn process_instructions(
    ctx: &mut ExecContext,
    program: &Program,
    id: BlockId,
    exec: &mut ExecStack,
    pending: Pending,
    instructions: &mut Vec<Instruction>,
) {
    let kind = program.blocks[id].kind;
    let block_needs = ctx.wqm.block_needs(id);
    let process = ctx.handle_wqm
        || block_needs == WqmState::WQM | WqmState::EXACT
        || kind.intersects(BlockKind::USES_DISCARD_IF | BlockKind::NEEDS_LOWERING);
    if !process {
        instructions.extend(pending.map(|(_, inst)| inst));
        return;
    }

    let mut bld = Builder::new(&program.temps, instructions);
    let mut state = if exec.top().ty.contains(MaskType::WQM) {
        WqmState::WQM
    } else {
        assert!(!ctx.handle_wqm || exec.top().ty.contains(MaskType::EXACT));
        WqmState::EXACT
    };

    for (index, mut inst) in pending {
        let needs = if ctx.handle_wqm {
            ctx.wqm.instr_needs(id, index)
        } else {
            WqmState::empty()
        };

        if inst.opcode == Opcode::PDiscardIf {
            if block_needs.contains(WqmState::PRESERVE_WQM) {
                assert!(kind.contains(BlockKind::TOP_LEVEL));
                exec.transition_to_wqm(&mut bld);
                exec.top_mut().ty.remove(MaskType::GLOBAL);
            }
            let num = exec.len();
            inst = discard_if(&mut bld, exec, num, inst.operands()[0], true);
        } else if needs == WqmState::WQM && state != WqmState::WQM {
            exec.transition_to_wqm(&mut bld);
            state = WqmState::WQM;
        } else if needs == WqmState::EXACT && state != WqmState::EXACT {
            exec.transition_to_exact(&mut bld);
            state = WqmState::EXACT;
        }

        match inst.opcode {
            Opcode::PIsHelper => {
                let dst = inst.definitions()[0];
                inst = if state == WqmState::EXACT {
                    Instruction::new(Opcode::SMovB64, [dst], [Operand::constant(0)])
                } else {
                    assert!(exec[0].ty.contains(MaskType::EXACT));
                    Instruction::new(
                        Opcode::SAndn2B64,
                        [dst, bld.scc_def()],
                        [Operand::temp(exec.top().mask), Operand::temp(exec[0].mask)],
                    )
                };
            }
            Opcode::PFsBufferStoreSmem => {
                let need_check =
                    exec.len() != 1 && !exec[exec.len() - 2].ty.contains(MaskType::GLOBAL);
                inst = lower_fs_buffer_store_smem(&mut bld, need_check, &inst, exec.top().mask);
            }
            _ => (),
        }

        bld.emit(inst);
    }
}

/// Build a `p_discard_if` which removes the lanes in `cond` from the bottom `num` masks of the
/// stack, giving each of them a new name.
///
/// The definitions are the narrowed masks, followed by `scc`, which is set if no lanes remain.
fn discard_if(
    bld: &mut Builder<'_>,
    exec: &mut ExecStack,
    num: usize,
    cond: Operand,
    includes_top: bool,
) -> Instruction {
    assert!(num > 0 || !includes_top);
    let mut operands = Vec::with_capacity(num + 1);
    let mut definitions = Vec::with_capacity(num + 1);
    for i in 0..num {
        let narrowed = bld.tmp(RegClass::S2);
        let in_exec = includes_top && i == num - 1;
        if in_exec {
            operands.push(Builder::exec(exec[i].mask));
            definitions.push(Definition::fixed(narrowed, PhysReg::EXEC));
        } else {
            operands.push(Operand::temp(exec[i].mask));
            definitions.push(Definition::new(narrowed));
        }
        exec[i].mask = narrowed;
    }
    assert!(
        !exec[0].ty.contains(MaskType::WQM),
        "discarding lanes requires the exact mask at the bottom of the stack"
    );
    operands.push(cond);
    definitions.push(bld.scc_def());
    Instruction::new(Opcode::PDiscardIf, definitions, operands)
}

/// Turn `p_fs_buffer_store_smem` into a scalar buffer store.
///
/// Scalar stores ignore `exec`, so if the store may be reached with no lanes active, its offset
/// is replaced by one which is out of bounds.
fn lower_fs_buffer_store_smem(
    bld: &mut Builder<'_>,
    need_check: bool,
    inst: &Instruction,
    cur_exec: Temp,
) -> Instruction {
    let mut offset = inst.operands()[1];
    if need_check {
        let nonempty = bld.build(
            Opcode::SCmpLgU64,
            [bld.scc_def()],
            [Operand::temp(cur_exec), Operand::constant(0)],
        );
        if offset.is_literal() {
            offset = Operand::temp(bld.build(Opcode::SMovB32, [bld.def(RegClass::S1)], [offset]));
        }
        let mut dst = bld.def(RegClass::S1);
        dst.set_hint(PhysReg::M0);
        offset = Operand::temp(bld.build(
            Opcode::SCselectB32,
            [dst],
            [offset, Operand::constant(u32::MAX), Builder::scc(nonempty)],
        ));
    } else if offset.is_constant() && offset.constant_value() > 0xFFFFF {
        let mut dst = bld.def(RegClass::S1);
        dst.set_hint(PhysReg::M0);
        offset = Operand::temp(bld.build(Opcode::SMovB32, [dst], [offset]));
    }
    if !offset.is_constant() {
        offset.set_fixed(PhysReg::M0);
    }

    let data = inst.operands()[2];
    let opcode = match data.size() {
        1 => Opcode::SBufferStoreDword,
        2 => Opcode::SBufferStoreDwordx2,
        4 => Opcode::SBufferStoreDwordx4,
        size => unreachable!("invalid scalar buffer store size: {size} dwords"),
    };
    // done here so that it happens in exact mode, without helper lanes contributing
    let data = Operand::temp(bld.as_uniform(data));
    Instruction::new(opcode, inst.definitions().to_vec(), [inst.operands()[0], offset, data])
}

/// Rewrite the terminator of the block according to its kind
fn add_branch_code(
    ctx: &mut ExecContext,
    program: &Program,
    id: BlockId,
    exec: &mut ExecStack,
    instructions: &mut Vec<Instruction>,
) {
    if Some(id) == program.last_block() {
        return;
    }
    let block = &program.blocks[id];
    let kind = block.kind;
    let succs = &block.linear_succs;
    let mut bld = Builder::new(&program.temps, instructions);

    if ctx.handle_wqm && kind.contains(BlockKind::TOP_LEVEL) {
        retire_wqm_at_top_level(ctx, id, exec, &mut bld);
    }

    if kind.contains(BlockKind::LOOP_PREHEADER) {
        let info = collect_loop_info(ctx, program, id, exec.len());
        if ctx.handle_wqm {
            if info.needs.contains(WqmState::WQM) {
                before_branch(&mut bld, |bld| exec.transition_to_wqm(bld));
            } else if info.needs == WqmState::EXACT {
                before_branch(&mut bld, |bld| exec.transition_to_exact(bld));
            }
        }
        log::trace!(target: "insert-exec-mask", "{id}: entering loop {info:?}");
        ctx.loops.push(info);
    }

    if kind.contains(BlockKind::DISCARD) {
        // inside a loop, only the masks outside of it are narrowed
        let num = match ctx.loops.last() {
            Some(info) => info.num_exec_masks,
            None => exec.len() - 1,
        };
        let cond = Builder::exec(exec.top().mask);
        let branch = pop_branch(&mut bld, id);
        let discard = discard_if(&mut bld, exec, num, cond, false);
        bld.emit(discard);

        if ctx.loops.is_empty() {
            let succ = &program.blocks[succs[0]];
            if !succ.is_convergence_point() {
                exec.top_mut().mask = zero_exec(&mut bld);
            }
        }
        bld.emit(branch);
    }

    if kind.contains(BlockKind::UNIFORM) {
        let mut branch = pop_branch(&mut bld, id);
        if branch.opcode == Opcode::PBranch {
            branch.set_branch_targets([Some(succs[0]), None]);
        } else {
            branch.set_branch_targets([Some(succs[1]), Some(succs[0])]);
        }
        bld.emit(branch);
        return;
    }

    if kind.contains(BlockKind::BRANCH) {
        let top = exec.top();
        if ctx.handle_wqm && top.ty.contains(MaskType::EXACT) && !top.ty.contains(MaskType::GLOBAL) {
            // return to wqm before branching
            exec.pop();
        }

        assert_eq!(succs.len(), 2, "{id} is a divergent branch with {} successors", succs.len());
        let branch = pop_branch(&mut bld, id);
        assert_eq!(branch.opcode, Opcode::PCbranchZ);
        let cond = branch.operands()[0];
        let current = exec.top();
        let ty = current.ty & (MaskType::WQM | MaskType::EXACT);

        let then_mask = bld.tmp(RegClass::S2);
        let saved = bld.build(
            Opcode::SAndSaveexecB64,
            [
                bld.def(RegClass::S2),
                bld.scc_def(),
                Definition::fixed(then_mask, PhysReg::EXEC),
            ],
            [cond, Builder::exec(current.mask)],
        );
        exec.top_mut().mask = saved;
        exec.push(then_mask, ty);

        bld.branch(Opcode::PCbranchZ, [Builder::exec(then_mask)], succs[1], Some(succs[0]));
        return;
    }

    if kind.contains(BlockKind::INVERT) {
        let branch = pop_branch(&mut bld, id);
        assert_eq!(branch.opcode, Opcode::PCbranchNz);
        let then = exec.pop();
        let original = exec.top().mask;
        let else_mask = bld.build(
            Opcode::SAndn2B64,
            [bld.exec_def(), bld.scc_def()],
            [Operand::temp(original), Builder::exec(then.mask)],
        );
        exec.push(else_mask, then.ty);

        bld.branch(Opcode::PCbranchZ, [Builder::exec(else_mask)], succs[1], Some(succs[0]));
        return;
    }

    let is_break = kind.contains(BlockKind::BREAK);
    if is_break || kind.contains(BlockKind::CONTINUE) {
        let branch = pop_branch(&mut bld, id);
        assert_eq!(branch.opcode, Opcode::PBranch);

        // remove the current lanes from every mask up to the loop's active lanes, and for a
        // break, from the loop's active lanes too
        let current = exec.top().mask;
        let mut cond = None;
        for i in (0..exec.len() - 1).rev() {
            let is_loop = exec[i].ty.contains(MaskType::LOOP);
            if is_loop && !is_break {
                break;
            }
            let flag = bld.tmp(RegClass::S1);
            exec[i].mask = bld.build(
                Opcode::SAndn2B64,
                [bld.def(RegClass::S2), Definition::fixed(flag, PhysReg::SCC)],
                [Operand::temp(exec[i].mask), Builder::exec(current)],
            );
            cond = Some(flag);
            if is_loop {
                break;
            }
        }
        let cond = cond.unwrap_or_else(|| panic!("{id} leaves a loop it is not nested in"));

        // unless the successor reconverges, no lanes may continue into it
        let succ = &program.blocks[program.blocks[succs[1]].linear_succs[0]];
        if !succ.is_convergence_point() {
            exec.top_mut().mask = zero_exec(&mut bld);
        }

        bld.branch(Opcode::PCbranchNz, [Builder::scc(cond)], succs[1], Some(succs[0]));
    }
}

/// Try to stop tracking WQM at a top-level block, where only the program's masks are live
fn retire_wqm_at_top_level(
    ctx: &mut ExecContext,
    id: BlockId,
    exec: &mut ExecStack,
    bld: &mut Builder<'_>,
) {
    if exec.len() == 3 {
        assert_eq!(exec[1].ty, MaskType::WQM);
        exec.pop();
    }
    assert!(exec.len() <= 2, "{id} is top-level with {} nested masks", exec.len());

    let ever_again = ctx.wqm.ever_again_needs(id);
    if ever_again.is_empty() {
        if exec.len() == 2 {
            exec.collapse();
        }
        ctx.handle_wqm = false;
    } else if ever_again == WqmState::EXACT {
        before_branch(bld, |bld| {
            exec.top_mut().ty |= MaskType::GLOBAL;
            exec.transition_to_exact(bld);
        });
        ctx.handle_wqm = false;
    } else if ctx.wqm.block_needs(id).contains(WqmState::PRESERVE_WQM) {
        before_branch(bld, |bld| {
            exec.transition_to_wqm(bld);
            exec.top_mut().ty.remove(MaskType::GLOBAL);
        });
    }

    if ctx.handle_wqm && !ever_again.contains(WqmState::EXACT) {
        before_branch(bld, |bld| exec.transition_to_wqm(bld));
        if exec.len() == 2 {
            exec.collapse();
        }
        ctx.handle_wqm = false;
    }

    if !ctx.handle_wqm {
        log::trace!(target: "insert-exec-mask", "{id}: stopped tracking wqm");
    }
}

/// Determine the flags of the loop entered from `preheader`.
///
/// The loop consists of the blocks after the preheader which are nested at least as deeply as
/// the loop header.
fn collect_loop_info(
    ctx: &ExecContext,
    program: &Program,
    preheader: BlockId,
    num_exec_masks: usize,
) -> LoopInfo {
    let header = program.blocks[preheader].linear_succs[0];
    let depth = program.blocks[header].loop_nest_depth;
    let mut info = LoopInfo {
        header,
        num_exec_masks,
        needs: WqmState::empty(),
        has_divergent_break: false,
        has_divergent_continue: false,
        has_discard: false,
    };

    let body = program
        .blocks
        .values()
        .skip(preheader.index() + 1)
        .take_while(|block| block.loop_nest_depth >= depth);
    for block in body {
        info.needs |= ctx.wqm.block_needs(block.index);
        info.has_discard |= block.has_discard();
        if block.loop_nest_depth != depth || block.kind.contains(BlockKind::UNIFORM) {
            continue;
        }
        if block.kind.contains(BlockKind::BREAK) {
            info.has_divergent_break = true;
        } else if block.kind.contains(BlockKind::CONTINUE) {
            info.has_divergent_continue = true;
        }
    }
    info
}

fn pop_branch(bld: &mut Builder<'_>, id: BlockId) -> Instruction {
    bld.pop()
        .filter(|inst| inst.is_branch())
        .unwrap_or_else(|| panic!("{id} does not end in a branch"))
}

/// Run `f` before the terminator of the block being built
fn before_branch(bld: &mut Builder<'_>, f: impl FnOnce(&mut Builder<'_>)) {
    let branch = bld.pop().filter(|inst| inst.is_branch());
    let Some(branch) = branch else {
        panic!("expected the block to end in a branch");
    };
    f(bld);
    bld.emit(branch);
}

fn zero_exec(bld: &mut Builder<'_>) -> Temp {
    bld.build(Opcode::SMovB64, [bld.exec_def()], [Operand::constant(0)])
}
