use core::cell::Cell;

use cranelift_entity::{EntityRef, PrimaryMap};
use wavec_session::{ChipClass, Options, ShaderStage};

use crate::{Block, BlockId, BlockKind, Opcode, RegClass, Temp, TempId};

/// Hands out temporary identifiers for a [Program].
///
/// Identifiers increase monotonically and are never reused. The counter is a [Cell] so that
/// temporaries can be allocated while the blocks of the program are mutably borrowed.
#[derive(Debug)]
pub struct TempAllocator {
    next: Cell<u32>,
}

impl Default for TempAllocator {
    fn default() -> Self {
        // 0 is TempId::NONE
        Self { next: Cell::new(1) }
    }
}

impl TempAllocator {
    pub fn allocate(&self, rc: RegClass) -> Temp {
        let id = self.next.get();
        self.next.set(id + 1);
        Temp::new(TempId::from_u32(id), rc)
    }

    /// The id the next allocation will receive.
    ///
    /// Every temporary allocated so far has an id below this value, so it can size side tables.
    #[inline]
    pub fn peek(&self) -> u32 {
        self.next.get()
    }
}

/// A shader program: an ordered list of blocks, where block 0 is the entry.
///
/// The block order is a structured, topological order of the control flow graph: every block
/// comes after its predecessors, except for loop back-edges.
#[derive(Debug)]
pub struct Program {
    pub blocks: PrimaryMap<BlockId, Block>,
    pub chip_class: ChipClass,
    pub stage: ShaderStage,
    /// Some instruction must run with helper lanes disabled
    pub needs_exact: bool,
    /// Some value must be computed in whole quad mode
    pub needs_wqm: bool,
    /// Write back the scalar cache before the program terminates
    pub wb_smem_l1_on_end: bool,
    pub temps: TempAllocator,
}

impl Program {
    pub fn new(options: &Options) -> Self {
        Self {
            blocks: PrimaryMap::new(),
            chip_class: options.chip_class,
            stage: options.stage,
            needs_exact: false,
            needs_wqm: false,
            wb_smem_l1_on_end: options.wb_smem_l1_on_end,
            temps: TempAllocator::default(),
        }
    }

    /// Append a new, empty block to the program
    pub fn create_block(&mut self, kind: BlockKind) -> BlockId {
        let index = self.blocks.next_key();
        self.blocks.push(Block::new(index, kind))
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }

    pub fn last_block(&self) -> Option<BlockId> {
        self.blocks.len().checked_sub(1).map(BlockId::new)
    }

    #[inline]
    pub fn allocate_temp(&self, rc: RegClass) -> Temp {
        self.temps.allocate(rc)
    }

    /// An upper bound on the temporary ids in use, for sizing side tables
    #[inline]
    pub fn peek_allocation_id(&self) -> usize {
        self.temps.peek() as usize
    }

    /// Add an edge from `from` to `to` to both the logical and linear control flow graphs
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.add_logical_edge(from, to);
        self.add_linear_edge(from, to);
    }

    pub fn add_logical_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].logical_succs.push(to);
        self.blocks[to].logical_preds.push(from);
    }

    pub fn add_linear_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].linear_succs.push(to);
        self.blocks[to].linear_preds.push(from);
    }

    /// Recompute [Program::needs_exact] and [Program::needs_wqm] from the instructions.
    ///
    /// Only fragment shaders have helper lanes, so other stages never need either.
    pub fn update_wqm_flags(&mut self) {
        let mut needs_exact = false;
        let mut needs_wqm = false;
        if self.stage.has_helper_lanes() {
            for inst in self.blocks.values().flat_map(|block| block.instructions.iter()) {
                needs_exact |= inst.disables_wqm();
                needs_wqm |= inst.opcode == Opcode::PWqm;
            }
        }
        self.needs_exact = needs_exact;
        self.needs_wqm = needs_wqm;
    }

    /// The total number of instructions in the program
    pub fn instruction_count(&self) -> usize {
        self.blocks.values().map(|block| block.instructions.len()).sum()
    }
}
