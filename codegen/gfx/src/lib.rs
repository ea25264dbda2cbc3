//! Hardware lowering for wave-based GPUs.
//!
//! Runs once physical registers are assigned, and replaces what remains of the pseudo-instruction
//! set with real instructions: parallel copies become ordered moves and swaps, subgroup
//! reductions become cross-lane DPP sequences, and structured branches become scalar branches.

mod lower;
mod parallel_copy;
mod reduce;

pub use self::{
    lower::{LowerToHw, LoweringSummary, lower_to_hw},
    parallel_copy::{CopyConfig, CopyStats, ParallelCopy},
    reduce::{ReductionRegs, emit_reduction, reduction_identity},
};
