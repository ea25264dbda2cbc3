use pretty_assertions::assert_eq;
use wavec_ir::{InstrData, TempAllocator, ValidationLevel, validate};
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

fn create_blocks(program: &mut Program, kinds: &[BlockKind], depths: &[u16]) -> Vec<BlockId> {
    kinds
        .iter()
        .zip(depths)
        .map(|(&kind, &depth)| {
            let id = program.create_block(kind);
            program.blocks[id].loop_nest_depth = depth;
            id
        })
        .collect()
}

fn uniform_branch(program: &mut Program, block: usize) {
    let (temps, instructions) = block_mut(program, block);
    let mut bld = Builder::new(temps, instructions);
    bld.branch(Opcode::PBranch, [], BlockId::new(0), None);
}

/// `BB0: if (cond) { BB1 } else { BB4 }` with linear blocks BB2 and BB5, the invert block BB3 and
/// the merge block BB6.
///
/// Returns the program and the branch condition.
fn if_else(options: &Options, then_kind: BlockKind) -> (Program, Temp) {
    let mut program = Program::new(options);
    let b = create_blocks(
        &mut program,
        &[
            BlockKind::TOP_LEVEL | BlockKind::BRANCH,
            BlockKind::UNIFORM | then_kind,
            BlockKind::UNIFORM,
            BlockKind::INVERT,
            BlockKind::UNIFORM,
            BlockKind::UNIFORM,
            BlockKind::TOP_LEVEL | BlockKind::MERGE,
        ],
        &[0; 7],
    );
    program.add_logical_edge(b[0], b[1]);
    program.add_logical_edge(b[0], b[4]);
    program.add_logical_edge(b[1], b[6]);
    program.add_logical_edge(b[4], b[6]);
    program.add_linear_edge(b[0], b[1]);
    program.add_linear_edge(b[0], b[2]);
    program.add_linear_edge(b[1], b[3]);
    program.add_linear_edge(b[2], b[3]);
    program.add_linear_edge(b[3], b[4]);
    program.add_linear_edge(b[3], b[5]);
    program.add_linear_edge(b[4], b[6]);
    program.add_linear_edge(b[5], b[6]);

    let (temps, instructions) = block_mut(&mut program, 0);
    let mut bld = Builder::new(temps, instructions);
    bld.build(Opcode::PStartPgm, [bld.exec_def()], []);
    let cond = bld.build(Opcode::SMovB64, [bld.def(RegClass::S2)], [Operand::constant64(1)]);
    bld.branch(Opcode::PCbranchZ, [Operand::temp(cond)], b[1], None);

    for index in [1, 2, 4, 5] {
        uniform_branch(&mut program, index);
    }
    let (temps, instructions) = block_mut(&mut program, 3);
    let mut bld = Builder::new(temps, instructions);
    bld.branch(Opcode::PCbranchNz, [Operand::temp(cond)], b[4], None);

    (program, cond)
}

#[test]
fn divergent_if_else_without_wqm() {
    init_logger();
    let options = Options::new(Default::default(), ShaderStage::Compute);
    let (mut program, cond) = if_else(&options, BlockKind::empty());

    let summary = insert_exec_mask(&mut program);
    assert_eq!(summary, ExecMaskSummary::default());

    assert_eq!(
        opcodes(&program, 0),
        vec![Opcode::PStartPgm, Opcode::SMovB64, Opcode::SAndSaveexecB64, Opcode::PCbranchZ]
    );
    let saveexec = &program.blocks[BlockId::new(0)].instructions[2];
    assert_eq!(saveexec.operands()[0], Operand::temp(cond));
    assert_eq!(saveexec.definitions()[2].phys_reg(), PhysReg::EXEC);
    let branch = &program.blocks[BlockId::new(0)].instructions[3];
    assert_eq!(branch.branch_targets(), [Some(BlockId::new(2)), Some(BlockId::new(1))]);
    assert_eq!(branch.operands()[0].temp_id(), saveexec.definitions()[2].temp_id());

    // uniform blocks branch to their only successor
    let then_branch = &program.blocks[BlockId::new(1)].instructions[0];
    assert_eq!(then_branch.branch_targets(), [Some(BlockId::new(3)), None]);

    // the else mask is the saved mask minus the then mask
    assert_eq!(opcodes(&program, 3), vec![Opcode::SAndn2B64, Opcode::PCbranchZ]);
    let invert = &program.blocks[BlockId::new(3)].instructions[0];
    assert_eq!(invert.operands()[0].temp_id(), saveexec.definitions()[0].temp_id());
    assert_eq!(invert.definitions()[0].phys_reg(), PhysReg::EXEC);

    // the merge block restores the saved mask
    assert_eq!(opcodes(&program, 6), vec![Opcode::PParallelCopy]);
    let restore = &program.blocks[BlockId::new(6)].instructions[0];
    assert_eq!(restore.operands()[0].temp_id(), saveexec.definitions()[0].temp_id());
    assert_eq!(restore.definitions()[0].phys_reg(), PhysReg::EXEC);
    assert_eq!(
        program.blocks[BlockId::new(6)].live_out_exec,
        Some(restore.definitions()[0].temp())
    );

    assert_eq!(validate(&program, ValidationLevel::Ssa), Ok(()));
}

#[test]
fn discard_if_narrows_every_mask() {
    init_logger();
    let options = Options::default();
    let (mut program, ..) = if_else(&options, BlockKind::USES_DISCARD_IF);
    let (temps, instructions) = block_mut(&mut program, 1);
    let kill = temps.allocate(RegClass::S2);
    let kill_mask = Instruction::new(Opcode::SMovB64, [Definition::new(kill)], [Operand::constant64(0)]);
    instructions.insert(0, kill_mask);
    instructions.insert(1, Instruction::new(Opcode::PDiscardIf, [], [Operand::temp(kill)]));
    program.update_wqm_flags();
    assert!(!program.needs_wqm && !program.needs_exact);

    insert_exec_mask(&mut program);

    let then = &program.blocks[BlockId::new(1)];
    assert_eq!(
        opcodes(&program, 1),
        vec![Opcode::SMovB64, Opcode::PDiscardIf, Opcode::PBranch]
    );
    let discard = &then.instructions[1];
    assert_eq!(discard.operands().len(), 3);
    assert_eq!(discard.definitions().len(), 3);
    assert_eq!(discard.operands()[2], Operand::temp(kill));
    assert_eq!(discard.operands()[1].phys_reg(), PhysReg::EXEC);
    assert_eq!(discard.definitions()[1].phys_reg(), PhysReg::EXEC);
    assert_eq!(discard.definitions()[2].phys_reg(), PhysReg::SCC);

    // both masks differ between the two sides at the invert block
    let invert = &program.blocks[BlockId::new(3)];
    assert_eq!(
        opcodes(&program, 3),
        vec![Opcode::PLinearPhi, Opcode::PLinearPhi, Opcode::SAndn2B64, Opcode::PCbranchZ]
    );
    assert!(!invert.instructions[0].definitions()[0].is_fixed());
    assert_eq!(invert.instructions[1].definitions()[0].phys_reg(), PhysReg::EXEC);
    assert_eq!(
        invert.instructions[0].operands()[0].temp_id(),
        discard.definitions()[0].temp_id()
    );
    let saved = program.blocks[BlockId::new(0)].instructions[2].definitions()[0].temp_id();
    assert_eq!(invert.instructions[0].operands()[1].temp_id(), saved);

    assert_eq!(validate(&program, ValidationLevel::Ssa), Ok(()));
}

/// ```text
/// BB0  preheader
/// BB1  loop header: if (cond) {
/// BB2      break
/// BB3      (to the loop exit)
/// BB4  } (rest of then)
/// BB5  then, linear
/// BB6  invert
/// BB7  else, logical
/// BB8  else, linear
/// BB9  merge, back to the header
/// BB10 loop exit
/// ```
#[test]
fn divergent_break_creates_loop_phis() {
    init_logger();
    let options = Options::new(Default::default(), ShaderStage::Compute);
    let mut program = Program::new(&options);
    let b = create_blocks(
        &mut program,
        &[
            BlockKind::TOP_LEVEL | BlockKind::LOOP_PREHEADER | BlockKind::UNIFORM,
            BlockKind::LOOP_HEADER | BlockKind::BRANCH,
            BlockKind::BREAK,
            BlockKind::UNIFORM,
            BlockKind::UNIFORM,
            BlockKind::UNIFORM,
            BlockKind::INVERT,
            BlockKind::UNIFORM,
            BlockKind::UNIFORM,
            BlockKind::MERGE | BlockKind::CONTINUE | BlockKind::UNIFORM,
            BlockKind::TOP_LEVEL | BlockKind::LOOP_EXIT,
        ],
        &[0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0],
    );
    program.add_edge(b[0], b[1]);
    program.add_logical_edge(b[1], b[2]);
    program.add_logical_edge(b[1], b[7]);
    program.add_linear_edge(b[1], b[2]);
    program.add_linear_edge(b[1], b[5]);
    program.add_logical_edge(b[2], b[10]);
    program.add_linear_edge(b[2], b[3]);
    program.add_linear_edge(b[2], b[4]);
    program.add_linear_edge(b[3], b[10]);
    program.add_linear_edge(b[4], b[6]);
    program.add_linear_edge(b[5], b[6]);
    program.add_linear_edge(b[6], b[7]);
    program.add_linear_edge(b[6], b[8]);
    program.add_edge(b[7], b[9]);
    program.add_linear_edge(b[8], b[9]);
    program.add_edge(b[9], b[1]);

    let cond = program.allocate_temp(RegClass::S2);
    let exec = program.allocate_temp(RegClass::S2);
    program.blocks[b[0]].instructions.push(Instruction::new(
        Opcode::PStartPgm,
        [Definition::new(cond), Definition::fixed(exec, PhysReg::EXEC)],
        [],
    ));
    for index in [0, 3, 4, 5, 7, 8, 9] {
        uniform_branch(&mut program, index);
    }
    let (temps, instructions) = block_mut(&mut program, 1);
    Builder::new(temps, instructions).branch(Opcode::PCbranchZ, [Operand::temp(cond)], b[2], None);
    let (temps, instructions) = block_mut(&mut program, 2);
    Builder::new(temps, instructions).branch(Opcode::PBranch, [], b[10], None);
    let (temps, instructions) = block_mut(&mut program, 6);
    Builder::new(temps, instructions).branch(Opcode::PCbranchNz, [Operand::temp(cond)], b[7], None);
    program.blocks[b[10]]
        .instructions
        .push(Instruction::new(Opcode::PLogicalStart, [], []));

    insert_exec_mask(&mut program);

    // the mask to restore at the exit, and the lanes active in the loop
    let header = &program.blocks[b[1]];
    assert_eq!(
        opcodes(&program, 1),
        vec![Opcode::PLinearPhi, Opcode::PLinearPhi, Opcode::SAndSaveexecB64, Opcode::PCbranchZ]
    );
    let restore_phi = &header.instructions[0];
    let active_phi = &header.instructions[1];
    assert!(!restore_phi.definitions()[0].is_fixed());
    assert_eq!(active_phi.definitions()[0].phys_reg(), PhysReg::EXEC);
    assert_eq!(restore_phi.operands()[0], Operand::temp(exec));
    assert_eq!(active_phi.operands()[0], Operand::temp(exec));

    // the back-edge brings the mask restored by the merge block
    let merge = &program.blocks[b[9]];
    assert_eq!(opcodes(&program, 9), vec![Opcode::PParallelCopy, Opcode::PBranch]);
    assert_eq!(
        active_phi.operands()[1].temp_id(),
        merge.instructions[0].definitions()[0].temp_id()
    );
    assert_eq!(restore_phi.operands()[1].temp_id(), restore_phi.definitions()[0].temp_id());

    // the break removes its lanes from the loop mask, and leaves the loop once none remain
    assert_eq!(opcodes(&program, 2), vec![Opcode::SAndn2B64, Opcode::PCbranchNz]);
    let remove = &program.blocks[b[2]].instructions[0];
    assert_eq!(remove.definitions()[1].phys_reg(), PhysReg::SCC);
    let exit_branch = &program.blocks[b[2]].instructions[1];
    assert_eq!(exit_branch.branch_targets(), [Some(b[4]), Some(b[3])]);
    assert_eq!(exit_branch.operands()[0].temp_id(), remove.definitions()[1].temp_id());

    // the break removes different lanes than the linear path, so the invert block joins them
    assert_eq!(opcodes(&program, 6)[0], Opcode::PLinearPhi);

    // the exit restores the mask from before the loop
    assert_eq!(opcodes(&program, 10), vec![Opcode::PParallelCopy, Opcode::PLogicalStart]);
    let exit = &program.blocks[b[10]].instructions[0];
    assert_eq!(exit.operands()[0].temp_id(), restore_phi.definitions()[0].temp_id());

    assert_eq!(validate(&program, ValidationLevel::Ssa), Ok(()));
}

fn mubuf_store(rsrc: Temp, value: Temp, disable_wqm: bool) -> Instruction {
    Instruction::new(
        Opcode::BufferStoreDword,
        [],
        [Operand::temp(rsrc), Operand::constant(0), Operand::temp(value)],
    )
    .with_data(InstrData::Mubuf {
        offset: 0,
        offen: false,
        idxen: false,
        glc: false,
        slc: false,
        disable_wqm,
        barrier: Default::default(),
    })
}

#[test]
fn switches_between_wqm_and_exact() {
    init_logger();
    let options = Options::default();
    let mut program = Program::new(&options);
    let entry = program.create_block(BlockKind::TOP_LEVEL);

    let (temps, instructions) = block_mut(&mut program, 0);
    let mut bld = Builder::new(temps, instructions);
    let rsrc = bld.tmp(RegClass::S4);
    let coord = bld.tmp(RegClass::V2);
    let data = bld.tmp(RegClass::V1);
    let exec = bld.tmp(RegClass::S2);
    bld.emit(Instruction::new(
        Opcode::PStartPgm,
        [
            Definition::new(rsrc),
            Definition::new(coord),
            Definition::new(data),
            Definition::fixed(exec, PhysReg::EXEC),
        ],
        [],
    ));
    let texel = bld.build(
        Opcode::ImageSample,
        [bld.def(RegClass::V4)],
        [Operand::temp(rsrc), Operand::undef(RegClass::S4), Operand::temp(coord)],
    );
    bld.build(Opcode::PWqm, [bld.def(RegClass::V4)], [Operand::temp(texel)]);
    let helper = bld.build(Opcode::PIsHelper, [bld.def(RegClass::S2)], []);
    bld.emit(mubuf_store(rsrc, data, true));
    bld.emit(Instruction::new(
        Opcode::PFsBufferStoreSmem,
        [],
        [Operand::temp(rsrc), Operand::constant(0x100000), Operand::temp(data)],
    ));

    program.update_wqm_flags();
    assert!(program.needs_wqm && program.needs_exact);
    let summary = insert_exec_mask(&mut program);
    assert_eq!(summary.wqm_tracked_blocks, 1);

    assert_eq!(
        opcodes(&program, 0),
        vec![
            Opcode::PStartPgm,
            Opcode::SWqmB64,
            Opcode::ImageSample,
            Opcode::PWqm,
            Opcode::SAndn2B64,
            Opcode::PParallelCopy,
            Opcode::BufferStoreDword,
            Opcode::SMovB32,
            Opcode::PAsUniform,
            Opcode::SBufferStoreDword,
        ]
    );
    let block = &program.blocks[entry];

    // helper lanes are the WQM lanes which are not in the exact mask
    let wqm = block.instructions[1].definitions()[0].temp();
    let is_helper = &block.instructions[4];
    assert_eq!(is_helper.definitions()[0].temp(), helper);
    assert_eq!(is_helper.operands(), &[Operand::temp(wqm), Operand::temp(exec)]);

    // the store runs with the exact mask restored
    let restore = &block.instructions[5];
    assert_eq!(restore.operands()[0], Operand::temp(exec));
    assert_eq!(restore.definitions()[0].phys_reg(), PhysReg::EXEC);

    // an offset too large for the encoding goes through m0
    let offset = &block.instructions[7];
    assert_eq!(offset.definitions()[0].hint(), Some(PhysReg::M0));
    let store = &block.instructions[9];
    assert_eq!(store.operands()[1].temp_id(), offset.definitions()[0].temp_id());
    assert_eq!(store.operands()[1].phys_reg(), PhysReg::M0);
    assert_eq!(store.operands()[2].temp_id(), block.instructions[8].definitions()[0].temp_id());
    assert_eq!(block.live_out_exec, Some(restore.definitions()[0].temp()));

    assert_eq!(validate(&program, ValidationLevel::Ssa), Ok(()));
}

#[test]
fn wqm_only_programs_enter_wqm_once() {
    init_logger();
    let options = Options::default();
    let mut program = Program::new(&options);
    program.create_block(BlockKind::TOP_LEVEL);
    let (temps, instructions) = block_mut(&mut program, 0);
    let mut bld = Builder::new(temps, instructions);
    let exec = bld.build(Opcode::PStartPgm, [bld.exec_def()], []);
    let value = bld.build(Opcode::VMovB32, [bld.def(RegClass::V1)], [Operand::constant(1)]);
    bld.build(Opcode::PWqm, [bld.def(RegClass::V1)], [Operand::temp(value)]);

    program.update_wqm_flags();
    assert!(program.needs_wqm && !program.needs_exact);
    insert_exec_mask(&mut program);

    assert_eq!(
        opcodes(&program, 0),
        vec![Opcode::PStartPgm, Opcode::SWqmB64, Opcode::VMovB32, Opcode::PWqm]
    );
    let wqm = &program.blocks[BlockId::new(0)].instructions[1];
    assert_eq!(wqm.operands(), &[Builder::exec(exec)]);
    assert_eq!(
        program.blocks[BlockId::new(0)].live_out_exec,
        Some(wqm.definitions()[0].temp())
    );
}
