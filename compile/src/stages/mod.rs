use wavec_ir::{PassManager, PassStatistic, Program, ValidationLevel};
use wavec_session::Options;

use super::Stage;
use crate::CompilerResult;

mod analyze;
mod exec_mask;
mod lower;

pub use self::{
    analyze::{DeadCodeStage, PreAllocation},
    exec_mask::InsertExecMaskStage,
    lower::LowerToHwStage,
};

/// A program together with the statistics of the passes run on it so far
#[derive(Debug)]
pub struct PassOutput {
    pub program: Program,
    pub statistics: Vec<PassStatistic>,
}

/// Rejects option combinations the target cannot support
pub struct CheckOptionsStage;

impl Stage for CheckOptionsStage {
    type Input = Program;
    type Output = Program;

    fn name(&self) -> &'static str {
        "check-options"
    }

    fn run(&mut self, input: Self::Input, options: &Options) -> CompilerResult<Self::Output> {
        options.check()?;
        log::debug!(target: "driver", "compiling for {} ({})", options.chip_class, options.stage);
        Ok(input)
    }
}

/// Checks the structure of the input program. Disabled unless [Options::validate] is set.
pub struct ValidateStage {
    level: ValidationLevel,
}

impl ValidateStage {
    pub const fn new(level: ValidationLevel) -> Self {
        Self { level }
    }
}

impl Stage for ValidateStage {
    type Input = Program;
    type Output = Program;

    fn enabled(&self, options: &Options) -> bool {
        options.validate
    }

    fn name(&self) -> &'static str {
        "validate"
    }

    fn run(&mut self, input: Self::Input, _options: &Options) -> CompilerResult<Self::Output> {
        wavec_ir::validate(&input, self.level)?;
        log::debug!(target: "driver", "input program is valid");
        Ok(input)
    }
}

/// Run the passes added by `add_passes` over `program`, checking at `level` in between
fn run_passes(
    mut program: Program,
    options: &Options,
    level: ValidationLevel,
    add_passes: impl FnOnce(&mut PassManager<'_>),
) -> CompilerResult<PassOutput> {
    let mut pm = PassManager::new(options).with_validation_level(level);
    add_passes(&mut pm);
    pm.run(&mut program)?;
    Ok(PassOutput {
        program,
        statistics: pm.statistics().to_vec(),
    })
}
