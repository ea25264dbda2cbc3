use wavec_ir::{PassStatistic, Program};
use wavec_ir_analysis::{UseCounts, dead_code_analysis};

use super::*;

/// Everything handed to register allocation
#[derive(Debug)]
pub struct PreAllocation {
    pub program: Program,
    /// The live uses of every temporary of `program`
    pub use_counts: UseCounts,
    pub statistics: Vec<PassStatistic>,
}

/// Counts the live uses of every temporary
pub struct DeadCodeStage;

impl Stage for DeadCodeStage {
    type Input = PassOutput;
    type Output = PreAllocation;

    fn name(&self) -> &'static str {
        "dead-code-analysis"
    }

    fn run(&mut self, input: Self::Input, _options: &Options) -> CompilerResult<Self::Output> {
        let PassOutput {
            program,
            statistics,
        } = input;
        let use_counts = dead_code_analysis(&program);
        let dead = program
            .blocks
            .values()
            .flat_map(|block| block.instructions.iter())
            .filter(|inst| use_counts.is_dead(inst))
            .count();
        log::debug!(target: "driver", "{dead} instructions have no live uses");
        Ok(PreAllocation {
            program,
            use_counts,
            statistics,
        })
    }
}
