use cranelift_entity::entity_impl;
use smallvec::SmallVec;

use crate::{Instruction, PhysReg, Temp};

/// A reference to a [Block] in a [crate::Program]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);
entity_impl!(BlockId, "BB");

bitflags::bitflags! {
    /// The role a block plays in the structured control flow graph.
    ///
    /// Several kinds may apply to the same block, e.g. a `TOP_LEVEL | MERGE` block.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct BlockKind: u16 {
        /// The branch at the end of this block does not depend on divergent state
        const UNIFORM = 1 << 0;
        /// The block is not nested in any divergent control flow
        const TOP_LEVEL = 1 << 1;
        const LOOP_PREHEADER = 1 << 2;
        const LOOP_HEADER = 1 << 3;
        const LOOP_EXIT = 1 << 4;
        const CONTINUE = 1 << 5;
        const BREAK = 1 << 6;
        /// All lanes executing this block are discarded
        const DISCARD = 1 << 7;
        /// A divergent `if`
        const BRANCH = 1 << 8;
        /// The convergence point of a divergent `if`
        const MERGE = 1 << 9;
        /// The entry of the `else` side of a divergent `if`
        const INVERT = 1 << 10;
        const USES_DISCARD_IF = 1 << 11;
        /// Contains instructions which must be lowered in exact mode
        const NEEDS_LOWERING = 1 << 12;
    }
}

pub type BlockList = SmallVec<[BlockId; 2]>;

/// A basic block of the structured control flow graph.
///
/// Logical edges follow the source program's control flow; linear edges are the branches and
/// fall-throughs that actually execute on the scalar unit. They differ around divergent control
/// flow, where both sides of an `if` are executed one after the other.
#[derive(Debug, Clone)]
pub struct Block {
    pub index: BlockId,
    pub instructions: Vec<Instruction>,
    pub logical_preds: BlockList,
    pub linear_preds: BlockList,
    pub logical_succs: BlockList,
    pub linear_succs: BlockList,
    pub loop_nest_depth: u16,
    pub kind: BlockKind,
    /// The exec mask live at the end of this block, set by exec mask insertion
    pub live_out_exec: Option<Temp>,
    /// True if `scc` holds a live value at the end of this block
    pub scc_live_out: bool,
    /// A free SGPR which branch lowering may use at the end of this block
    pub scratch_sgpr: Option<PhysReg>,
}

impl Block {
    pub fn new(index: BlockId, kind: BlockKind) -> Self {
        Self {
            index,
            instructions: vec![],
            logical_preds: Default::default(),
            linear_preds: Default::default(),
            logical_succs: Default::default(),
            linear_succs: Default::default(),
            loop_nest_depth: 0,
            kind,
            live_out_exec: None,
            scc_live_out: false,
            scratch_sgpr: None,
        }
    }

    #[inline]
    pub fn is_top_level(&self) -> bool {
        self.kind.contains(BlockKind::TOP_LEVEL)
    }

    /// True if this block discards lanes, either entirely or conditionally
    #[inline]
    pub fn has_discard(&self) -> bool {
        self.kind.intersects(BlockKind::DISCARD | BlockKind::USES_DISCARD_IF)
    }

    /// True if this block is where a divergent `if` reconverges, or flips to its `else` side
    #[inline]
    pub fn is_convergence_point(&self) -> bool {
        self.kind.intersects(BlockKind::INVERT | BlockKind::MERGE)
    }

    /// The terminating branch of this block, if it has one
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|inst| inst.is_branch())
    }
}
