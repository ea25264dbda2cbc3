//! Whole quad mode requirement propagation.
//!
//! Fragment shaders run helper lanes alongside the real lanes of each 2x2 quad so that
//! derivatives can be computed. Some instructions must run with helper lanes enabled (WQM), while
//! others, such as stores, must see only the real lanes (exact). This analysis decides, for every
//! instruction and every block, which of the two is required.
//!
//! Requirements flow backwards from their consumers: a value which is needed in WQM must also be
//! computed in WQM, as must every value it is computed from. This is solved with a worklist over
//! blocks, always taking the highest block index first, which approximates a backwards topological
//! order. A block is revisited when one of the temporaries it defines becomes needed in WQM while
//! another block is processed.
//!
//! Once the fixpoint is reached, a second backwards scan computes for every block what any block
//! at or after it still needs, which lets exec mask insertion stop tracking WQM once it can prove
//! that nothing later needs it.
use std::collections::BTreeSet;

use bitvec::prelude::*;
use wavec_ir::{BlockId, BlockKind, EntityRef, Instruction, Opcode, Program};

bitflags::bitflags! {
    /// The execution mode an instruction or block requires.
    ///
    /// The empty set means the instruction runs correctly in either mode. Blocks accumulate the
    /// union of their instructions' requirements.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct WqmState: u8 {
        /// Only the real lanes may be active
        const EXACT = 1 << 0;
        /// Helper lanes must be active, with control flow applied
        const WQM = 1 << 1;
        /// The WQM mask must survive a discard in this block, so that later WQM code can restore it
        const PRESERVE_WQM = 1 << 2;
    }
}

/// The requirements computed for a single block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockNeeds {
    /// The requirement of each instruction, in instruction order
    pub instr_needs: Vec<WqmState>,
    /// The union of everything this block requires
    pub block_needs: WqmState,
    /// The union of the requirements of all blocks after this one
    pub ever_again_needs: WqmState,
}

/// The result of WQM requirement propagation over a [Program]
#[derive(Debug, Clone)]
pub struct WqmAnalysis {
    blocks: Vec<BlockNeeds>,
    /// Block requirements as found by propagation, before the program-order summary adjusts them
    propagated: Vec<WqmState>,
    /// Set for temporaries which some consumer needs in WQM
    needs_wqm: BitVec,
    /// Set for blocks whose branch condition must be computed in WQM
    branch_wqm: BitVec,
    defined_in: Vec<Option<BlockId>>,
}

struct Propagation<'a> {
    program: &'a Program,
    worklist: BTreeSet<BlockId>,
    analysis: &'a mut WqmAnalysis,
}

impl WqmAnalysis {
    /// Run the analysis over `program`
    pub fn compute(program: &Program) -> Self {
        let mut analysis = Self::unspecified(program);
        analysis.recompute(program);
        analysis
    }

    /// An analysis in which nothing has any requirement.
    ///
    /// This is what exec mask insertion uses for programs which do not mix WQM and exact code.
    pub fn unspecified(program: &Program) -> Self {
        let num_temps = program.peek_allocation_id();
        Self {
            blocks: program
                .blocks
                .values()
                .map(|block| BlockNeeds {
                    instr_needs: vec![WqmState::empty(); block.instructions.len()],
                    ..Default::default()
                })
                .collect(),
            propagated: vec![WqmState::empty(); program.blocks.len()],
            needs_wqm: bitvec![0; num_temps],
            branch_wqm: bitvec![0; program.blocks.len()],
            defined_in: vec![None; num_temps],
        }
    }

    /// Run propagation again, starting from the current state, and recompute the summary.
    ///
    /// Returns true if the requirements of any block changed.
    pub fn recompute(&mut self, program: &Program) -> bool {
        assert_eq!(self.blocks.len(), program.blocks.len());
        let before = self.blocks.clone();

        let mut propagation = Propagation {
            program,
            worklist: program.blocks.keys().collect(),
            analysis: self,
        };
        let mut visits = 0usize;
        while let Some(block) = propagation.worklist.pop_last() {
            visits += 1;
            propagation.get_block_needs(block);
        }
        log::debug!(target: "wqm-analysis", "reached fixpoint after {visits} block visits");

        self.summarize(program);
        self.blocks != before
    }

    #[inline]
    pub fn block(&self, block: BlockId) -> &BlockNeeds {
        &self.blocks[block.index()]
    }

    #[inline]
    pub fn block_needs(&self, block: BlockId) -> WqmState {
        self.blocks[block.index()].block_needs
    }

    #[inline]
    pub fn ever_again_needs(&self, block: BlockId) -> WqmState {
        self.blocks[block.index()].ever_again_needs
    }

    /// The requirement of the instruction at `index` in `block`
    #[inline]
    pub fn instr_needs(&self, block: BlockId, index: usize) -> WqmState {
        self.blocks[block.index()]
            .instr_needs
            .get(index)
            .copied()
            .unwrap_or_default()
    }

    /// True if the branch condition at the end of `block` must be computed in WQM
    #[inline]
    pub fn branch_needs_wqm(&self, block: BlockId) -> bool {
        self.branch_wqm[block.index()]
    }

    /// Compute `ever_again_needs` in reverse program order.
    ///
    /// Blocks with hardware lowering always need exact mode. A block which discards lanes must
    /// preserve the WQM mask if anything after it still needs WQM. Preservation never crosses a
    /// top-level block.
    fn summarize(&mut self, program: &Program) {
        let mut ever_again = WqmState::empty();
        for block in program.blocks.values().rev() {
            let info = &mut self.blocks[block.index.index()];
            info.block_needs = self.propagated[block.index.index()];
            info.ever_again_needs = ever_again;

            if block.kind.contains(BlockKind::NEEDS_LOWERING) {
                info.block_needs |= WqmState::EXACT;
            }
            if block.has_discard() && ever_again.contains(WqmState::WQM) {
                info.block_needs |= WqmState::PRESERVE_WQM;
            }

            ever_again |= info.block_needs;
            if block.has_discard() {
                ever_again |= WqmState::EXACT;
            }

            if block.is_top_level() {
                ever_again.remove(WqmState::PRESERVE_WQM);
            } else {
                info.block_needs.remove(WqmState::PRESERVE_WQM);
            }
            log::trace!(
                target: "wqm-analysis",
                "{}: needs {:?}, ever again {:?}",
                block.index,
                info.block_needs,
                info.ever_again_needs
            );
        }
    }
}

impl Propagation<'_> {
    fn set_needs_wqm(&mut self, temp: wavec_ir::TempId) {
        let index = temp.index();
        if self.analysis.needs_wqm[index] {
            return;
        }
        self.analysis.needs_wqm.set(index, true);
        if let Some(block) = self.analysis.defined_in[index] {
            self.worklist.insert(block);
        }
    }

    /// Require the branch conditions leading to `block` to be computed in WQM.
    ///
    /// Walks up the logical predecessors until a top-level block is reached.
    fn mark_block_wqm(&mut self, block: BlockId) {
        let mut stack = vec![block];
        while let Some(id) = stack.pop() {
            if self.analysis.branch_wqm[id.index()] {
                continue;
            }
            self.analysis.branch_wqm.set(id.index(), true);

            let block = &self.program.blocks[id];
            let branch = block
                .instructions
                .last()
                .unwrap_or_else(|| panic!("{id} has no terminator"));
            if branch.opcode != Opcode::PBranch {
                let cond = branch
                    .operands()
                    .first()
                    .and_then(|op| op.as_temp())
                    .unwrap_or_else(|| panic!("conditional branch in {id} has no condition"));
                self.set_needs_wqm(cond.id());
            }

            if block.is_top_level() {
                continue;
            }
            stack.extend(block.logical_preds.iter().copied());
        }
    }

    fn get_block_needs(&mut self, id: BlockId) {
        let block = &self.program.blocks[id];
        let mut instr_needs = vec![WqmState::empty(); block.instructions.len()];
        let mut block_needs = self.analysis.propagated[id.index()];

        for (i, inst) in block.instructions.iter().enumerate().rev() {
            let mut needs = if inst.disables_wqm() {
                WqmState::EXACT
            } else {
                WqmState::empty()
            };
            let mut propagate_wqm = inst.opcode == Opcode::PWqm;
            let preserve_wqm = inst.opcode == Opcode::PDiscardIf;
            let predicated = inst.is_predicated_by_exec();

            for def in inst.definitions().iter().filter(|def| def.is_temp()) {
                let index = def.temp_id().index();
                self.analysis.defined_in[index] = Some(id);
                if needs.is_empty() && self.analysis.needs_wqm[index] {
                    if predicated {
                        needs = WqmState::WQM;
                    }
                    propagate_wqm = true;
                }
            }

            if propagate_wqm {
                self.propagate_to_operands(inst);
            } else if preserve_wqm && block_needs.contains(WqmState::WQM) {
                needs = WqmState::PRESERVE_WQM;
            }

            // the control flow selecting a WQM phi's operand must be uniform across the quad
            if needs == WqmState::WQM && inst.opcode == Opcode::PPhi {
                for &pred in block.logical_preds.iter() {
                    self.mark_block_wqm(pred);
                }
            }

            instr_needs[i] = needs;
            block_needs |= needs;
        }

        // for `if (cond) { wqm code }` and `while (cond) { wqm code }`, cond must be in WQM
        if block_needs.contains(WqmState::WQM) && !block.is_top_level() {
            for &pred in block.logical_preds.iter() {
                self.mark_block_wqm(pred);
            }
        }

        self.analysis.propagated[id.index()] = block_needs;
        self.analysis.blocks[id.index()].instr_needs = instr_needs;
    }

    fn propagate_to_operands(&mut self, inst: &Instruction) {
        for op in inst.operands() {
            if let Some(temp) = op.as_temp() {
                self.set_needs_wqm(temp.id());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wavec_ir::{Builder, InstrData, Operand, RegClass, Temp};
    use wavec_session::Options;

    use super::*;

    fn init_logger() {
        let _ = env_logger::Builder::from_env("WAVEC_TRACE")
            .format_timestamp(None)
            .is_test(true)
            .try_init();
    }

    fn exact_store(value: Temp) -> Instruction {
        Instruction::new(Opcode::BufferStoreDword, [], [Operand::constant(0), Operand::temp(value)])
            .with_data(InstrData::Mubuf {
                offset: 0,
                offen: false,
                idxen: false,
                glc: false,
                slc: false,
                disable_wqm: true,
                barrier: Default::default(),
            })
    }

    /// `BB0 -> {BB1 (then), BB2 (else)} -> BB3`, a divergent if/else
    struct Diamond {
        program: Program,
        entry: BlockId,
        then: BlockId,
        merge: BlockId,
    }

    fn diamond() -> Diamond {
        let options = Options::default();
        let mut program = Program::new(&options);
        let entry = program.create_block(BlockKind::TOP_LEVEL | BlockKind::BRANCH);
        let then = program.create_block(BlockKind::empty());
        let els = program.create_block(BlockKind::empty());
        let merge = program.create_block(BlockKind::TOP_LEVEL | BlockKind::MERGE);
        program.add_edge(entry, then);
        program.add_edge(entry, els);
        program.add_edge(then, merge);
        program.add_edge(els, merge);
        Diamond {
            program,
            entry,
            then,
            merge,
        }
    }

    #[test]
    fn wqm_flows_to_operands_and_branch_conditions() {
        init_logger();
        let Diamond {
            mut program,
            entry,
            then,
            merge,
        } = diamond();

        let (coord, cond) = {
            let mut bld = Builder::new(&program.temps, &mut program.blocks[entry].instructions);
            bld.build(Opcode::PStartPgm, [bld.exec_def()], []);
            let coord = bld.build(Opcode::VInterpP1F32, [bld.def(RegClass::V1)], [Operand::constant(0)]);
            let cond = bld.build(Opcode::VAndB32, [bld.def(RegClass::S2)], [Operand::temp(coord)]);
            bld.branch(Opcode::PCbranchZ, [Operand::temp(cond)], then, None);
            (coord, cond)
        };
        let sample = {
            let mut bld = Builder::new(&program.temps, &mut program.blocks[then].instructions);
            let sample = bld.build(Opcode::ImageSample, [bld.def(RegClass::V4)], [Operand::temp(coord)]);
            let wqm = bld.build(Opcode::PWqm, [bld.def(RegClass::V4)], [Operand::temp(sample)]);
            bld.emit(exact_store(wqm));
            bld.branch(Opcode::PBranch, [], merge, None);
            sample
        };
        {
            let els = BlockId::new(2);
            let mut bld = Builder::new(&program.temps, &mut program.blocks[els].instructions);
            bld.branch(Opcode::PBranch, [], merge, None);
        }

        let analysis = WqmAnalysis::compute(&program);
        // image_sample, p_wqm, buffer_store
        assert_eq!(
            analysis.block(then).instr_needs,
            vec![WqmState::WQM, WqmState::empty(), WqmState::EXACT, WqmState::empty()]
        );
        assert_eq!(analysis.block_needs(then), WqmState::WQM | WqmState::EXACT);
        // the interpolation feeds the sample, and the branch decides whether it runs
        assert_eq!(analysis.instr_needs(entry, 1), WqmState::WQM);
        assert!(analysis.branch_needs_wqm(entry));
        assert!(analysis.needs_wqm[cond.id().index()]);
        assert!(analysis.needs_wqm[sample.id().index()]);
        assert_eq!(analysis.ever_again_needs(merge), WqmState::empty());
        assert_eq!(analysis.ever_again_needs(entry), WqmState::WQM | WqmState::EXACT);
    }

    #[test]
    fn scalar_definitions_do_not_need_wqm() {
        let options = Options::default();
        let mut program = Program::new(&options);
        let entry = program.create_block(BlockKind::TOP_LEVEL);
        let mut bld = Builder::new(&program.temps, &mut program.blocks[entry].instructions);
        bld.build(Opcode::PStartPgm, [bld.exec_def()], []);
        let offset = bld.build(Opcode::SMovB32, [bld.def(RegClass::S1)], [Operand::constant(16)]);
        let load = bld.build(Opcode::BufferLoadDword, [bld.def(RegClass::V1)], [Operand::temp(offset)]);
        bld.build(Opcode::PWqm, [bld.def(RegClass::V1)], [Operand::temp(load)]);

        let analysis = WqmAnalysis::compute(&program);
        assert_eq!(
            analysis.block(entry).instr_needs,
            vec![WqmState::empty(), WqmState::empty(), WqmState::WQM, WqmState::empty()]
        );
    }

    #[test]
    fn discards_preserve_wqm_for_later_blocks() {
        let options = Options::default();
        let mut program = Program::new(&options);
        let entry = program.create_block(BlockKind::TOP_LEVEL | BlockKind::USES_DISCARD_IF);
        let exit = program.create_block(BlockKind::TOP_LEVEL | BlockKind::NEEDS_LOWERING);
        program.add_edge(entry, exit);
        {
            let mut bld = Builder::new(&program.temps, &mut program.blocks[entry].instructions);
            bld.build(Opcode::PStartPgm, [bld.exec_def()], []);
            let cond = bld.build(Opcode::SMovB64, [bld.def(RegClass::S2)], [Operand::constant(0)]);
            bld.emit(Instruction::new(Opcode::PDiscardIf, [], [Operand::temp(cond)]));
            bld.branch(Opcode::PBranch, [], exit, None);
        }
        {
            let mut bld = Builder::new(&program.temps, &mut program.blocks[exit].instructions);
            let v = bld.build(Opcode::ImageSample, [bld.def(RegClass::V1)], [Operand::constant(0)]);
            bld.build(Opcode::PWqm, [bld.def(RegClass::V1)], [Operand::temp(v)]);
        }

        let analysis = WqmAnalysis::compute(&program);
        assert_eq!(analysis.block_needs(exit), WqmState::WQM | WqmState::EXACT);
        assert_eq!(analysis.block_needs(entry), WqmState::PRESERVE_WQM);
        assert_eq!(analysis.ever_again_needs(entry), WqmState::WQM | WqmState::EXACT);
    }

    #[test]
    fn propagation_is_idempotent() {
        let Diamond {
            mut program,
            entry,
            then,
            merge,
        } = diamond();
        {
            let mut bld = Builder::new(&program.temps, &mut program.blocks[entry].instructions);
            bld.build(Opcode::PStartPgm, [bld.exec_def()], []);
            let cond = bld.build(Opcode::VAndB32, [bld.def(RegClass::S2)], [Operand::constant(1)]);
            bld.branch(Opcode::PCbranchZ, [Operand::temp(cond)], then, None);
        }
        for block in [then, BlockId::new(2)] {
            let mut bld = Builder::new(&program.temps, &mut program.blocks[block].instructions);
            let v = bld.build(Opcode::ImageSample, [bld.def(RegClass::V1)], [Operand::constant(0)]);
            bld.build(Opcode::PWqm, [bld.def(RegClass::V1)], [Operand::temp(v)]);
            bld.emit(exact_store(v));
            bld.branch(Opcode::PBranch, [], merge, None);
        }

        let mut analysis = WqmAnalysis::compute(&program);
        let first = (0..program.blocks.len())
            .map(|i| analysis.block(BlockId::new(i)).clone())
            .collect::<Vec<_>>();
        assert!(!analysis.recompute(&program));
        let second = (0..program.blocks.len())
            .map(|i| analysis.block(BlockId::new(i)).clone())
            .collect::<Vec<_>>();
        assert_eq!(first, second);
    }
}
