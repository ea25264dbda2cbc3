use core::mem;

use wavec_ir::{
    Block, BlockId, Builder, Definition, EntityRef, Format, InstrData, Instruction, Opcode,
    Operand, Pass, PassExecutionState, PhysReg, Program, RegClass, Report,
};
use wavec_session::ChipClass;

use crate::{
    parallel_copy::{CopyConfig, CopyStats, ParallelCopy},
    reduce::{ReductionRegs, emit_reduction},
};

/// The export target which writes nothing
const NULL_EXPORT_TARGET: u8 = 9;

/// Expand the pseudo-instructions left after register allocation into hardware instructions.
#[derive(Default)]
pub struct LowerToHw;

impl Pass for LowerToHw {
    fn name(&self) -> &'static str {
        "lower-to-hw"
    }

    fn description(&self) -> &'static str {
        "expands pseudo-instructions into hardware instructions"
    }

    fn run(
        &mut self,
        program: &mut Program,
        state: &mut PassExecutionState<'_>,
    ) -> Result<(), Report> {
        let summary = lower_to_hw(program);
        state.record("pseudo-instructions", summary.pseudo_instructions);
        state.record("moves", summary.copies.moves);
        state.record("swaps", summary.copies.swaps);
        state.record("reductions", summary.reductions);
        state.record("branches-removed", summary.branches_removed);
        Ok(())
    }
}

/// Counters describing what [lower_to_hw] did
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct LoweringSummary {
    pub pseudo_instructions: usize,
    pub copies: CopyStats,
    pub reductions: usize,
    /// Branches dropped because their target is the next non-empty block
    pub branches_removed: usize,
}

/// Lower every block of `program`, in order.
///
/// Registers must be assigned, and phis eliminated.
pub fn lower_to_hw(program: &mut Program) -> LoweringSummary {
    let mut summary = LoweringSummary::default();
    for index in 0..program.blocks.len() {
        let id = BlockId::new(index);
        let original = mem::take(&mut program.blocks[id].instructions);
        let mut lowered = Vec::with_capacity(original.len());
        {
            let mut lowering = Lowering {
                program: &*program,
                block: &program.blocks[id],
                chip_class: program.chip_class,
                summary: &mut summary,
                after_logical_end: false,
            };
            let mut bld = Builder::new(&program.temps, &mut lowered);
            for inst in original {
                lowering.lower(&mut bld, inst);
            }
        }
        log::trace!(target: "lower-to-hw", "lowered {id} into {} instructions", lowered.len());
        program.blocks[id].instructions = lowered;
    }
    log::debug!(
        target: "lower-to-hw",
        "lowered {} pseudo-instructions: {} moves, {} swaps, {} reductions, {} branches removed",
        summary.pseudo_instructions,
        summary.copies.moves,
        summary.copies.swaps,
        summary.reductions,
        summary.branches_removed
    );
    summary
}

struct Lowering<'a> {
    program: &'a Program,
    block: &'a Block,
    chip_class: ChipClass,
    summary: &'a mut LoweringSummary,
    /// Copies past `p_logical_end` resolve phis, and must not clobber an `scc` live into the
    /// successor
    after_logical_end: bool,
}

impl Lowering<'_> {
    fn lower(&mut self, bld: &mut Builder<'_>, inst: Instruction) {
        if inst.format == Format::PSEUDO {
            self.summary.pseudo_instructions += 1;
            self.lower_pseudo(bld, inst);
        } else if inst.format == Format::PSEUDO_BRANCH {
            self.summary.pseudo_instructions += 1;
            self.lower_branch(bld, &inst);
        } else if inst.format == Format::PSEUDO_REDUCTION {
            self.summary.pseudo_instructions += 1;
            self.summary.reductions += 1;
            lower_reduction(bld, self.chip_class, &inst);
        } else {
            bld.emit(inst);
        }
    }

    fn copy_config(&self, inst: &Instruction) -> CopyConfig {
        CopyConfig {
            chip_class: self.chip_class,
            tmp_in_scc: inst.tmp_in_scc() || (self.after_logical_end && self.block.scc_live_out),
            scratch_sgpr: inst.scratch_sgpr().or(self.block.scratch_sgpr),
        }
    }

    fn resolve(&mut self, bld: &mut Builder<'_>, copy: ParallelCopy, inst: &Instruction) {
        let config = self.copy_config(inst);
        self.summary.copies += copy.lower(bld, &config);
    }

    fn lower_pseudo(&mut self, bld: &mut Builder<'_>, inst: Instruction) {
        let defs = inst.definitions();
        let ops = inst.operands();
        match inst.opcode {
            // Marks the program entry for later stages
            Opcode::PStartPgm => {
                bld.emit(inst);
            }
            Opcode::PLogicalStart => {}
            Opcode::PLogicalEnd => self.after_logical_end = true,
            Opcode::PParallelCopy => {
                let mut copy = ParallelCopy::new();
                for (def, op) in defs.iter().zip(ops) {
                    copy.insert(*def, *op);
                }
                self.resolve(bld, copy, &inst);
            }
            Opcode::PWqm => {
                if !ops[0].is_undefined() {
                    assert_eq!(
                        defs[0].phys_reg(),
                        ops[0].phys_reg(),
                        "p_wqm must be allocated to the register of its operand"
                    );
                }
            }
            Opcode::PCreateVector => {
                let dst = defs[0].phys_reg();
                let rc = dword_class(defs[0].reg_class());
                let mut copy = ParallelCopy::new();
                let mut offset = 0;
                for op in ops {
                    if op.is_constant() {
                        copy.insert_dword(dst.offset(offset), rc, *op);
                    } else if !op.is_undefined() {
                        let op_rc = dword_class(op.reg_class());
                        for i in 0..op.size() {
                            let src = Operand::reg(op.phys_reg().offset(i), op_rc);
                            copy.insert_dword(dst.offset(offset + i), rc, src);
                        }
                    }
                    offset += op.size();
                }
                self.resolve(bld, copy, &inst);
            }
            // The index is the offset in dwords of the extracted element
            Opcode::PExtractVector => {
                if ops[0].is_undefined() {
                    return;
                }
                let def = defs[0];
                let src = ops[0].phys_reg().offset(ops[1].constant_value());
                if src == def.phys_reg() {
                    return;
                }
                let op_rc = dword_class(ops[0].reg_class());
                let rc = dword_class(def.reg_class());
                let mut copy = ParallelCopy::new();
                for i in 0..def.size() {
                    copy.insert_dword(def.phys_reg().offset(i), rc, Operand::reg(src.offset(i), op_rc));
                }
                self.resolve(bld, copy, &inst);
            }
            Opcode::PSplitVector => {
                if ops[0].is_undefined() {
                    return;
                }
                let src = ops[0].phys_reg();
                let op_rc = dword_class(ops[0].reg_class());
                let mut copy = ParallelCopy::new();
                let mut offset = 0;
                for def in defs {
                    let rc = dword_class(def.reg_class());
                    for i in 0..def.size() {
                        let op = Operand::reg(src.offset(offset + i), op_rc);
                        copy.insert_dword(def.phys_reg().offset(i), rc, op);
                    }
                    offset += def.size();
                }
                self.resolve(bld, copy, &inst);
            }
            Opcode::PAsUniform => {
                let (def, op) = (defs[0], ops[0]);
                if op.is_constant() || op.reg_class().is_sgpr() {
                    let mut copy = ParallelCopy::new();
                    copy.insert(def, op);
                    self.resolve(bld, copy, &inst);
                    return;
                }
                assert!(def.reg_class().is_sgpr(), "p_as_uniform must define SGPRs");
                assert_eq!(op.size(), def.size());
                for i in 0..def.size() {
                    bld.emit(Instruction::new(
                        Opcode::VReadfirstlaneB32,
                        [Definition::reg(def.phys_reg().offset(i), RegClass::S1)],
                        [Operand::reg(op.phys_reg().offset(i), RegClass::V1)],
                    ));
                }
            }
            Opcode::PDiscardIf => self.lower_discard_if(bld, &inst),
            Opcode::PSpill => {
                // operands: linear VGPR, first lane, spilled SGPRs
                let lanes = ops[0];
                assert!(lanes.reg_class().is_linear(), "spills go to a linear VGPR");
                let first = ops[1].constant_value();
                let data = ops[2];
                for i in 0..data.size() {
                    bld.emit(Instruction::new(
                        Opcode::VWritelaneB32,
                        [Definition::reg(lanes.phys_reg(), RegClass::V1_LINEAR)],
                        [
                            Operand::reg(data.phys_reg().offset(i), RegClass::S1),
                            Operand::constant(first + i),
                        ],
                    ));
                }
            }
            Opcode::PReload => {
                let lanes = ops[0];
                assert!(lanes.reg_class().is_linear(), "reloads come from a linear VGPR");
                let first = ops[1].constant_value();
                let def = defs[0];
                for i in 0..def.size() {
                    bld.emit(Instruction::new(
                        Opcode::VReadlaneB32,
                        [Definition::reg(def.phys_reg().offset(i), RegClass::S1)],
                        [lanes, Operand::constant(first + i)],
                    ));
                }
            }
            Opcode::PPhi | Opcode::PLinearPhi => {
                panic!("{}: phis must be eliminated before lowering", self.block.index)
            }
            Opcode::PIsHelper | Opcode::PFsBufferStoreSmem => {
                panic!("{} must be lowered by exec mask insertion", inst.opcode)
            }
            opcode => unreachable!("{opcode} is not a pseudo-instruction"),
        }
    }

    /// Remove the discarded lanes from every mask, and end the program if none remain.
    ///
    /// The masks are narrowed innermost first, so that `scc` ends up describing the global mask.
    fn lower_discard_if(&mut self, bld: &mut Builder<'_>, inst: &Instruction) {
        let ops = inst.operands();
        let defs = inst.definitions();
        let (cond, masks) = ops.split_last().unwrap_or_else(|| panic!("p_discard_if has no condition"));
        let scc = defs[defs.len() - 1];
        for (i, mask) in masks.iter().enumerate().rev() {
            bld.emit(Instruction::new(Opcode::SAndn2B64, [defs[i], scc], [*mask, *cond]));
        }

        let mut terminate = vec![null_export()];
        if self.program.wb_smem_l1_on_end {
            terminate.push(Instruction::new(Opcode::SDcacheWb, [], []));
        }
        terminate.push(Instruction::new(Opcode::SEndpgm, [], []));
        let skip = terminate.iter().map(|inst| inst.encoded_dwords(self.chip_class)).sum();

        bld.emit(Instruction::new(Opcode::SCbranchScc1, [], []).with_data(InstrData::Sopp {
            imm: skip,
            block: None,
        }));
        for inst in terminate {
            bld.emit(inst);
        }
    }

    fn lower_branch(&mut self, bld: &mut Builder<'_>, inst: &Instruction) {
        let block = self.block.index;
        let target = inst.branch_targets()[0]
            .unwrap_or_else(|| panic!("{block}: {} without a target", inst.opcode));

        // Falling through reaches the target anyway
        let can_remove = block < target
            && (block.index() + 1..target.index())
                .all(|b| self.program.blocks[BlockId::new(b)].instructions.is_empty());
        if can_remove {
            self.summary.branches_removed += 1;
            return;
        }

        let opcode = match inst.opcode {
            Opcode::PBranch => {
                debug_assert_eq!(self.block.linear_succs.first(), Some(&target));
                Opcode::SBranch
            }
            Opcode::PCbranchZ | Opcode::PCbranchNz => {
                let nonzero = inst.opcode == Opcode::PCbranchNz;
                let cond = inst.operands()[0].phys_reg();
                match (cond, nonzero) {
                    (PhysReg::EXEC, false) => Opcode::SCbranchExecz,
                    (PhysReg::EXEC, true) => Opcode::SCbranchExecnz,
                    (PhysReg::VCC, false) => Opcode::SCbranchVccz,
                    (PhysReg::VCC, true) => Opcode::SCbranchVccnz,
                    (PhysReg::SCC, false) => Opcode::SCbranchScc0,
                    (PhysReg::SCC, true) => Opcode::SCbranchScc1,
                    (reg, _) => panic!("{block}: cannot branch on {reg}"),
                }
            }
            opcode => unreachable!("{opcode} is not a pseudo-branch"),
        };
        bld.emit(Instruction::new(opcode, [], []).with_data(InstrData::Sopp {
            imm: 0,
            block: Some(target),
        }));
    }
}

fn dword_class(rc: RegClass) -> RegClass {
    if rc.is_sgpr() {
        RegClass::S1
    } else {
        RegClass::V1
    }
}

/// An export which writes nothing, but tells the hardware the remaining lanes were killed
fn null_export() -> Instruction {
    Instruction::new(Opcode::Exp, [], [Operand::undef(RegClass::V1); 4]).with_data(
        InstrData::Export {
            enabled_mask: 0,
            dest: NULL_EXPORT_TARGET,
            compressed: false,
            done: true,
            valid_mask: true,
        },
    )
}

/// Reductions are allocated as `dst, stmp, sitmp = op src, tmp, vtmp`
fn lower_reduction(bld: &mut Builder<'_>, chip_class: ChipClass, inst: &Instruction) {
    let InstrData::Reduction { op, cluster_size } = inst.data else {
        panic!("{} has no reduction payload", inst.opcode);
    };
    let ops = inst.operands();
    let defs = inst.definitions();
    let regs = ReductionRegs {
        tmp: ops[1].phys_reg(),
        vtmp: ops[2].phys_reg(),
        stmp: defs[1].phys_reg(),
        sitmp: defs[2].phys_reg(),
    };
    emit_reduction(bld, chip_class, inst.opcode, op, cluster_size, regs, ops[0], defs[0]);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wavec_ir::{BlockKind, ReduceOp, TempAllocator, ValidationLevel, validate};
    use wavec_session::{Options, ShaderStage};

    use super::*;

    fn init_logger() {
        let _ = env_logger::Builder::from_env("WAVEC_TRACE")
            .format_timestamp(None)
            .is_test(true)
            .try_init();
    }

    fn opcodes(program: &Program, block: usize) -> Vec<Opcode> {
        program.blocks[BlockId::new(block)]
            .instructions
            .iter()
            .map(|inst| inst.opcode)
            .collect()
    }

    fn block_mut(program: &mut Program, index: usize) -> (&TempAllocator, &mut Vec<Instruction>) {
        let block = &mut program.blocks[BlockId::new(index)];
        (&program.temps, &mut block.instructions)
    }

    fn single_block(options: &Options) -> Program {
        let mut program = Program::new(options);
        program.create_block(BlockKind::TOP_LEVEL);
        let (temps, instructions) = block_mut(&mut program, 0);
        let mut bld = Builder::new(temps, instructions);
        bld.build(Opcode::PStartPgm, [bld.exec_def()], []);
        program
    }

    #[test]
    fn discard_skips_over_termination() {
        init_logger();
        for (chip_class, writeback, skip) in [
            (ChipClass::Gfx9, false, 3),
            (ChipClass::Gfx9, true, 5),
            (ChipClass::Gfx7, true, 4),
        ] {
            let options = Options::new(chip_class, ShaderStage::Fragment).with_scalar_writeback(writeback);
            let mut program = single_block(&options);
            let (temps, instructions) = block_mut(&mut program, 0);
            let mut bld = Builder::new(temps, instructions);
            let global = bld.tmp(RegClass::S2);
            let cond = bld.tmp(RegClass::S2);
            bld.emit(Instruction::new(
                Opcode::PDiscardIf,
                [
                    Definition::fixed(bld.tmp(RegClass::S2), PhysReg::sgpr(2)),
                    Definition::fixed(bld.tmp(RegClass::S2), PhysReg::EXEC),
                    bld.scc_def(),
                ],
                [
                    Operand::fixed(global, PhysReg::sgpr(2)),
                    Builder::exec(bld.tmp(RegClass::S2)),
                    Operand::fixed(cond, PhysReg::sgpr(4)),
                ],
            ));
            bld.emit(Instruction::new(Opcode::SEndpgm, [], []));

            lower_to_hw(&mut program);

            let mut expected = vec![
                Opcode::PStartPgm,
                Opcode::SAndn2B64,
                Opcode::SAndn2B64,
                Opcode::SCbranchScc1,
                Opcode::Exp,
            ];
            if writeback {
                expected.push(Opcode::SDcacheWb);
            }
            expected.extend([Opcode::SEndpgm, Opcode::SEndpgm]);
            assert_eq!(opcodes(&program, 0), expected);

            let code = &program.blocks[BlockId::new(0)].instructions;
            // the global mask is narrowed last
            assert_eq!(code[1].definitions()[0].phys_reg(), PhysReg::EXEC);
            assert_eq!(code[2].definitions()[0].phys_reg(), PhysReg::sgpr(2));
            assert_eq!(code[3].data, InstrData::Sopp { imm: skip, block: None });
            assert!(matches!(code[4].data, InstrData::Export { done: true, valid_mask: true, .. }));
        }
    }

    /// `BB0 -> {BB1, BB2}`, `BB1 -> BB2`, where BB1 is empty unless `then_code`
    fn diamond(then_code: bool) -> Program {
        let options = Options::default();
        let mut program = single_block(&options);
        let b1 = program.create_block(BlockKind::UNIFORM);
        let b2 = program.create_block(BlockKind::TOP_LEVEL | BlockKind::MERGE);
        let b0 = BlockId::new(0);
        program.add_linear_edge(b0, b1);
        program.add_linear_edge(b0, b2);
        program.add_linear_edge(b1, b2);

        let (temps, instructions) = block_mut(&mut program, 0);
        let mut bld = Builder::new(temps, instructions);
        let mask = bld.tmp(RegClass::S2);
        bld.branch(Opcode::PCbranchZ, [Builder::exec(mask)], b2, Some(b1));

        if then_code {
            let (temps, instructions) = block_mut(&mut program, 1);
            let mut bld = Builder::new(temps, instructions);
            let value = bld.tmp(RegClass::V1);
            bld.emit(Instruction::new(
                Opcode::VMovB32,
                [Definition::fixed(value, PhysReg::vgpr(0))],
                [Operand::constant(7)],
            ));
            bld.branch(Opcode::PBranch, [], b2, None);
        }

        let (temps, instructions) = block_mut(&mut program, 2);
        let mut bld = Builder::new(temps, instructions);
        bld.emit(Instruction::new(Opcode::SEndpgm, [], []));
        program
    }

    #[test]
    fn branches_over_empty_blocks_are_removed() {
        let mut program = diamond(false);
        let summary = lower_to_hw(&mut program);
        assert_eq!(summary.branches_removed, 1);
        assert_eq!(opcodes(&program, 0), vec![Opcode::PStartPgm]);
        assert!(opcodes(&program, 1).is_empty());
        assert_eq!(validate(&program, ValidationLevel::Lowered), Ok(()));
    }

    #[test]
    fn branches_over_code_test_the_condition_register() {
        let mut program = diamond(true);
        let summary = lower_to_hw(&mut program);
        // only the branch of BB1 into the adjacent BB2
        assert_eq!(summary.branches_removed, 1);
        assert_eq!(opcodes(&program, 0), vec![Opcode::PStartPgm, Opcode::SCbranchExecz]);
        assert_eq!(
            program.blocks[BlockId::new(0)].instructions[1].data,
            InstrData::Sopp {
                imm: 0,
                block: Some(BlockId::new(2))
            }
        );
        assert_eq!(opcodes(&program, 1), vec![Opcode::VMovB32]);
    }

    #[test]
    fn vectors_are_assembled_through_copies() {
        let mut program = single_block(&Options::default());
        let (temps, instructions) = block_mut(&mut program, 0);
        let mut bld = Builder::new(temps, instructions);
        let v = bld.tmp(RegClass::V3);
        let x = bld.tmp(RegClass::V1);
        let y = bld.tmp(RegClass::V1);
        let z = bld.tmp(RegClass::V1);
        // v4..v6 = {v5, 1, undef}
        bld.emit(Instruction::new(
            Opcode::PCreateVector,
            [Definition::fixed(v, PhysReg::vgpr(4))],
            [
                Operand::fixed(x, PhysReg::vgpr(5)),
                Operand::constant(1),
                Operand::undef(RegClass::V1),
            ],
        ));
        // v0, v1, v2 = split v4..v6
        bld.emit(Instruction::new(
            Opcode::PSplitVector,
            [
                Definition::fixed(x, PhysReg::vgpr(0)),
                Definition::fixed(y, PhysReg::vgpr(1)),
                Definition::fixed(z, PhysReg::vgpr(6)),
            ],
            [Operand::fixed(v, PhysReg::vgpr(4))],
        ));
        // extracting in place is free
        bld.emit(Instruction::new(
            Opcode::PExtractVector,
            [Definition::fixed(z, PhysReg::vgpr(5))],
            [Operand::fixed(v, PhysReg::vgpr(4)), Operand::constant(1)],
        ));

        let summary = lower_to_hw(&mut program);
        assert_eq!(
            opcodes(&program, 0),
            vec![
                Opcode::PStartPgm,
                Opcode::VMovB32,
                Opcode::VMovB32,
                Opcode::VMovB32,
                Opcode::VMovB32,
            ]
        );
        assert_eq!(summary.copies, CopyStats { moves: 4, swaps: 0 });
        let code = &program.blocks[BlockId::new(0)].instructions;
        // v4 = v5 is emitted before v5 = 1 overwrites its source
        assert_eq!(code[1].definitions()[0].phys_reg(), PhysReg::vgpr(4));
        assert_eq!(code[2].definitions()[0].phys_reg(), PhysReg::vgpr(5));
    }

    #[test]
    fn extracting_copies_every_dword_of_the_element() {
        let mut program = single_block(&Options::default());
        let (temps, instructions) = block_mut(&mut program, 0);
        let mut bld = Builder::new(temps, instructions);
        let v = bld.tmp(RegClass::V4);
        let e = bld.tmp(RegClass::V2);
        // v0..v1 = dwords 2 and 3 of v4..v7
        bld.emit(Instruction::new(
            Opcode::PExtractVector,
            [Definition::fixed(e, PhysReg::vgpr(0))],
            [Operand::fixed(v, PhysReg::vgpr(4)), Operand::constant(2)],
        ));

        let summary = lower_to_hw(&mut program);
        assert_eq!(opcodes(&program, 0), vec![Opcode::PStartPgm, Opcode::VMovB32, Opcode::VMovB32]);
        assert_eq!(summary.copies, CopyStats { moves: 2, swaps: 0 });
        let code = &program.blocks[BlockId::new(0)].instructions;
        let moves = code[1..]
            .iter()
            .map(|inst| (inst.definitions()[0].phys_reg(), inst.operands()[0].phys_reg()))
            .collect::<Vec<_>>();
        assert_eq!(
            moves,
            vec![(PhysReg::vgpr(0), PhysReg::vgpr(6)), (PhysReg::vgpr(1), PhysReg::vgpr(7))]
        );
    }

    #[test]
    fn undefined_sources_need_no_code() {
        for opcode in [Opcode::PWqm, Opcode::PExtractVector, Opcode::PSplitVector] {
            let mut program = single_block(&Options::default());
            let (temps, instructions) = block_mut(&mut program, 0);
            let mut bld = Builder::new(temps, instructions);
            let x = bld.tmp(RegClass::V1);
            let mut ops = vec![Operand::undef(RegClass::V1)];
            if opcode == Opcode::PExtractVector {
                ops.push(Operand::constant(0));
            }
            bld.emit(Instruction::new(opcode, [Definition::fixed(x, PhysReg::vgpr(0))], ops));

            let summary = lower_to_hw(&mut program);
            assert_eq!(opcodes(&program, 0), vec![Opcode::PStartPgm], "{opcode}");
            assert_eq!(summary.copies, CopyStats::default());
        }
    }

    #[test]
    fn spills_use_lanes_of_a_linear_vgpr() {
        let mut program = single_block(&Options::default());
        let (temps, instructions) = block_mut(&mut program, 0);
        let mut bld = Builder::new(temps, instructions);
        let lanes = bld.tmp(RegClass::V1_LINEAR);
        let data = bld.tmp(RegClass::S2);
        bld.emit(Instruction::new(
            Opcode::PSpill,
            [],
            [
                Operand::fixed(lanes, PhysReg::vgpr(8)),
                Operand::constant(4),
                Operand::fixed(data, PhysReg::sgpr(10)),
            ],
        ));
        bld.emit(Instruction::new(
            Opcode::PReload,
            [Definition::fixed(data, PhysReg::sgpr(12))],
            [Operand::fixed(lanes, PhysReg::vgpr(8)), Operand::constant(4)],
        ));

        lower_to_hw(&mut program);
        let code = &program.blocks[BlockId::new(0)].instructions[1..];
        let lanes_used = code
            .iter()
            .map(|inst| (inst.opcode, inst.operands()[1].constant_value()))
            .collect::<Vec<_>>();
        assert_eq!(
            lanes_used,
            vec![
                (Opcode::VWritelaneB32, 4),
                (Opcode::VWritelaneB32, 5),
                (Opcode::VReadlaneB32, 4),
                (Opcode::VReadlaneB32, 5),
            ]
        );
        assert_eq!(code[1].operands()[0].phys_reg(), PhysReg::sgpr(11));
        assert_eq!(code[3].definitions()[0].phys_reg(), PhysReg::sgpr(13));
    }

    #[test]
    fn uniform_values_are_read_from_the_first_lane() {
        let mut program = single_block(&Options::default());
        let (temps, instructions) = block_mut(&mut program, 0);
        let mut bld = Builder::new(temps, instructions);
        let value = bld.tmp(RegClass::V2);
        let uniform = bld.tmp(RegClass::S2);
        bld.emit(Instruction::new(
            Opcode::PAsUniform,
            [Definition::fixed(uniform, PhysReg::sgpr(8))],
            [Operand::fixed(value, PhysReg::vgpr(2))],
        ));
        let wqm = bld.tmp(RegClass::V1);
        bld.emit(Instruction::new(
            Opcode::PWqm,
            [Definition::fixed(wqm, PhysReg::vgpr(0))],
            [Operand::fixed(value, PhysReg::vgpr(0))],
        ));

        lower_to_hw(&mut program);
        assert_eq!(
            opcodes(&program, 0),
            vec![Opcode::PStartPgm, Opcode::VReadfirstlaneB32, Opcode::VReadfirstlaneB32]
        );
        let second = &program.blocks[BlockId::new(0)].instructions[2];
        assert_eq!(second.definitions()[0].phys_reg(), PhysReg::sgpr(9));
        assert_eq!(second.operands()[0].phys_reg(), PhysReg::vgpr(3));
    }

    #[test]
    #[should_panic(expected = "p_wqm must be allocated")]
    fn misallocated_wqm_is_rejected() {
        let mut program = single_block(&Options::default());
        let (temps, instructions) = block_mut(&mut program, 0);
        let mut bld = Builder::new(temps, instructions);
        let value = bld.tmp(RegClass::V1);
        let wqm = bld.tmp(RegClass::V1);
        bld.emit(Instruction::new(
            Opcode::PWqm,
            [Definition::fixed(wqm, PhysReg::vgpr(1))],
            [Operand::fixed(value, PhysReg::vgpr(0))],
        ));
        lower_to_hw(&mut program);
    }

    #[test]
    fn phi_copies_preserve_live_scc() {
        let mut program = single_block(&Options::default());
        let id = BlockId::new(0);
        program.blocks[id].scc_live_out = true;
        program.blocks[id].scratch_sgpr = Some(PhysReg::sgpr(30));
        let (temps, instructions) = block_mut(&mut program, 0);
        let mut bld = Builder::new(temps, instructions);
        let a = bld.tmp(RegClass::S1);
        let b = bld.tmp(RegClass::S1);
        let swap = |bld: &mut Builder<'_>| {
            bld.emit(Instruction::new(
                Opcode::PParallelCopy,
                [Definition::fixed(a, PhysReg::sgpr(0)), Definition::fixed(b, PhysReg::sgpr(1))],
                [Operand::fixed(b, PhysReg::sgpr(1)), Operand::fixed(a, PhysReg::sgpr(0))],
            ));
        };
        swap(&mut bld);
        bld.emit(Instruction::new(Opcode::PLogicalEnd, [], []));
        swap(&mut bld);

        let summary = lower_to_hw(&mut program);
        assert_eq!(summary.copies.swaps, 2);
        let mut expected = vec![Opcode::PStartPgm];
        expected.extend([Opcode::SXorB32; 3]);
        expected.extend([Opcode::SMovB32; 3]);
        assert_eq!(opcodes(&program, 0), expected);
    }

    #[test]
    fn reductions_are_expanded() {
        let mut program = single_block(&Options::default());
        let (temps, instructions) = block_mut(&mut program, 0);
        let mut bld = Builder::new(temps, instructions);
        let src = bld.tmp(RegClass::V1);
        let dst = bld.tmp(RegClass::S1);
        bld.emit(Instruction::reduction(
            Opcode::PReduce,
            ReduceOp::Iadd32,
            64,
            [
                Definition::fixed(dst, PhysReg::sgpr(0)),
                Definition::fixed(bld.tmp(RegClass::S2), PhysReg::sgpr(2)),
                Definition::fixed(bld.tmp(RegClass::S1), PhysReg::sgpr(4)),
            ],
            [
                Operand::fixed(src, PhysReg::vgpr(0)),
                Operand::fixed(bld.tmp(RegClass::V1_LINEAR), PhysReg::vgpr(1)),
                Operand::fixed(bld.tmp(RegClass::V1_LINEAR), PhysReg::vgpr(2)),
            ],
        ));

        let summary = lower_to_hw(&mut program);
        assert_eq!(summary.reductions, 1);
        let code = &program.blocks[BlockId::new(0)].instructions;
        assert_eq!(code[1].opcode, Opcode::SOrSaveexecB64);
        assert_eq!(code[1].definitions()[0].phys_reg(), PhysReg::sgpr(2));
        let last = code.last().unwrap();
        assert_eq!(last.opcode, Opcode::VReadlaneB32);
        assert_eq!(last.definitions()[0].phys_reg(), PhysReg::sgpr(0));
        assert_eq!(validate(&program, ValidationLevel::Lowered), Ok(()));
    }
}
