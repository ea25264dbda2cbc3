//! The low-level IR: programs made of blocks of hardware-shaped instructions in SSA form.
//!
//! Instructions here map closely onto the machine's instruction set, plus a set of pseudo
//! instructions (`p_*`) which later passes expand, such as phis, parallel copies, structured
//! branches and subgroup reductions.

mod block;
mod builder;
mod instruction;
mod opcode;
mod operand;
pub mod pass;
mod print;
mod program;
mod reg;
mod validate;

pub use cranelift_entity::EntityRef;

pub use self::{
    block::{Block, BlockId, BlockKind, BlockList},
    builder::Builder,
    instruction::{BarrierInteraction, InstrData, Instruction, ReduceOp},
    opcode::{Format, Opcode},
    operand::{Definition, Operand},
    pass::{Pass, PassExecutionState, PassManager, PassStatistic, Print},
    program::{Program, TempAllocator},
    reg::{PhysReg, RegClass, RegType, Temp, TempId},
    validate::{ValidationError, ValidationErrors, ValidationLevel, validate},
};

/// The error type returned by passes
pub type Report = anyhow::Error;
