//! The wavec pass pipeline.
//!
//! Compilation is split around register allocation, which is not part of this crate: the stages
//! before it make lane masks explicit and count the uses of every temporary, the stages after it
//! lower the remaining pseudo-instructions into hardware instructions. [compile] runs both halves
//! with a caller-provided allocator in between.

mod stage;
mod stages;

use wavec_ir::{Program, ValidationLevel};
pub use wavec_ir::Report;
use wavec_session::Options;

pub use self::{
    stage::{Chain, ChainOptional, Stage},
    stages::{
        CheckOptionsStage, DeadCodeStage, InsertExecMaskStage, LowerToHwStage, PassOutput,
        PreAllocation, ValidateStage,
    },
};

pub type CompilerResult<T> = Result<T, Report>;

/// The compilation pipeline was stopped early, because the named stage is disabled
#[derive(Debug, thiserror::Error)]
#[error("compilation was stopped before stage '{0}'")]
pub struct CompilerStopped(pub &'static str);

/// Run every stage which precedes register allocation
pub fn compile_pre_allocation(program: Program, options: &Options) -> CompilerResult<PreAllocation> {
    log::info!(target: "driver", "starting pre-allocation pipeline");
    let mut stages = CheckOptionsStage
        .next_optional(ValidateStage::new(ValidationLevel::Ssa))
        .next(InsertExecMaskStage)
        .next(DeadCodeStage);
    stages.run(program, options)
}

/// Run every stage which follows register allocation
pub fn compile_post_allocation(program: Program, options: &Options) -> CompilerResult<PassOutput> {
    log::info!(target: "driver", "starting post-allocation pipeline");
    let mut stages = CheckOptionsStage
        .next_optional(ValidateStage::new(ValidationLevel::Lowered))
        .next(LowerToHwStage);
    stages.run(program, options)
}

/// Run the whole pipeline, with `allocate_registers` as the stage assigning physical registers.
///
/// The allocator receives the program in SSA form, with phis still present, and must return it
/// with every operand and definition fixed to a register and the phis eliminated.
pub fn compile<F>(
    program: Program,
    options: &Options,
    allocate_registers: &mut F,
) -> CompilerResult<PassOutput>
where
    F: FnMut(PreAllocation, &Options) -> CompilerResult<Program>,
{
    let mut stages = CheckOptionsStage
        .next_optional(ValidateStage::new(ValidationLevel::Ssa))
        .next(InsertExecMaskStage)
        .next(DeadCodeStage)
        .next(
            allocate_registers
                as &mut (dyn FnMut(PreAllocation, &Options) -> CompilerResult<Program> + '_),
        )
        .next_optional(ValidateStage::new(ValidationLevel::Lowered))
        .next(LowerToHwStage);
    let output = stages.run(program, options)?;
    log::info!(target: "driver", "compilation finished with {} instructions", output.program.instruction_count());
    Ok(output)
}
