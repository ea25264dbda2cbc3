use wavec_ir::{Program, ValidationLevel};
use wavec_ir_transform::InsertExecMask;

use super::*;

/// Makes lane masks explicit, and switches between whole quad mode and exact mode
pub struct InsertExecMaskStage;

impl Stage for InsertExecMaskStage {
    type Input = Program;
    type Output = PassOutput;

    fn name(&self) -> &'static str {
        "insert-exec-mask"
    }

    fn run(&mut self, input: Self::Input, options: &Options) -> CompilerResult<Self::Output> {
        log::debug!(
            target: "driver",
            "inserting exec masks (needs wqm: {}, needs exact: {})",
            input.needs_wqm,
            input.needs_exact
        );
        run_passes(input, options, ValidationLevel::Ssa, |pm| {
            pm.add_pass(InsertExecMask);
        })
    }
}
