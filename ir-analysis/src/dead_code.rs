use bitvec::prelude::*;
use cranelift_entity::SecondaryMap;
use wavec_ir::{Block, BlockId, EntityRef, Opcode, Program, TempId};

/// The number of live uses of every temporary in a [Program].
///
/// Uses by instructions which are themselves dead are not counted, so a temporary with zero
/// uses can be removed together with its definition if that has no other effects.
#[derive(Debug, Clone, Default)]
pub struct UseCounts {
    uses: SecondaryMap<TempId, u32>,
}

impl UseCounts {
    /// The number of live uses of `temp`
    #[inline]
    pub fn get(&self, temp: TempId) -> u32 {
        self.uses[temp]
    }

    #[inline]
    pub fn is_used(&self, temp: TempId) -> bool {
        self.get(temp) > 0
    }

    /// True if `inst` has definitions, and all of them are unused temporaries
    pub fn is_dead(&self, inst: &wavec_ir::Instruction) -> bool {
        !inst.definitions().is_empty()
            && inst.definitions().iter().all(|def| def.is_temp() && !self.is_used(def.temp_id()))
    }
}

struct DeadCodeContext {
    uses: SecondaryMap<TempId, u32>,
    /// One bit per instruction per block, set once the instruction is known to be live
    live: Vec<BitVec>,
}

/// Count the live uses of every temporary in `program`.
///
/// This is a backwards scan over the blocks, from the last block to the first. Instructions
/// without definitions are assumed to have side effects and are always live; any other
/// instruction is live once one of its definitions is a hardware register or a used temporary.
/// When a live instruction gives some operand its first use, the definition of that operand may
/// now be live too, so scanning resumes from the highest-numbered linear predecessor of the block.
/// Live bits only ever go from unset to set, which bounds the number of revisits.
///
/// The last definition of `p_startpgm`, the initial exec mask, is given one extra use so that
/// the program entry is never considered dead.
pub fn dead_code_analysis(program: &Program) -> UseCounts {
    let mut ctx = DeadCodeContext {
        uses: SecondaryMap::with_capacity(program.peek_allocation_id()),
        live: program
            .blocks
            .values()
            .map(|block| bitvec![0; block.instructions.len()])
            .collect(),
    };

    let mut current = program.blocks.len() as isize - 1;
    let mut visits = 0usize;
    while current >= 0 {
        let block = &program.blocks[BlockId::new(current as usize)];
        current -= 1;
        visits += 1;
        if process_block(&mut ctx, block) {
            for pred in block.linear_preds.iter() {
                current = current.max(pred.index() as isize);
            }
        }
    }
    log::debug!(
        target: "dead-code-analysis",
        "computed use counts for {} blocks in {visits} visits",
        program.blocks.len()
    );

    let startpgm = program.blocks[BlockId::new(0)]
        .instructions
        .first()
        .filter(|inst| inst.opcode == Opcode::PStartPgm)
        .unwrap_or_else(|| panic!("the entry block must begin with p_startpgm"));
    let exec = startpgm
        .definitions()
        .last()
        .unwrap_or_else(|| panic!("p_startpgm must define the initial exec mask"));
    ctx.uses[exec.temp_id()] += 1;

    UseCounts { uses: ctx.uses }
}

/// Returns true if some operand got its first use, i.e. predecessors must be revisited
fn process_block(ctx: &mut DeadCodeContext, block: &Block) -> bool {
    let live = &mut ctx.live[block.index.index()];
    assert_eq!(live.len(), block.instructions.len());

    let mut process_predecessors = false;
    for (idx, inst) in block.instructions.iter().enumerate().rev() {
        if live[idx] {
            continue;
        }

        let is_live = inst.definitions().is_empty()
            || inst
                .definitions()
                .iter()
                .any(|def| !def.is_temp() || ctx.uses[def.temp_id()] > 0);
        if !is_live {
            continue;
        }

        for op in inst.operands() {
            let Some(temp) = op.as_temp() else {
                continue;
            };
            if ctx.uses[temp.id()] == 0 {
                process_predecessors = true;
            }
            ctx.uses[temp.id()] += 1;
        }
        live.set(idx, true);
    }

    process_predecessors
}
