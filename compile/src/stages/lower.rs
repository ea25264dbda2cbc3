use wavec_codegen_gfx::LowerToHw;
use wavec_ir::{Program, ValidationLevel};

use super::*;

/// Expands the pseudo-instructions left after register allocation
pub struct LowerToHwStage;

impl Stage for LowerToHwStage {
    type Input = Program;
    type Output = PassOutput;

    fn name(&self) -> &'static str {
        "lower-to-hw"
    }

    fn run(&mut self, input: Self::Input, options: &Options) -> CompilerResult<Self::Output> {
        let output = run_passes(input, options, ValidationLevel::Lowered, |pm| {
            pm.add_pass(LowerToHw);
        })?;
        log::debug!(
            target: "driver",
            "lowered program has {} instructions",
            output.program.instruction_count()
        );
        Ok(output)
    }
}
