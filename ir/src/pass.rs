use core::fmt;

use anyhow::Context;
use wavec_session::{IrFilter, Options};

use crate::{Program, Report, ValidationLevel, validate};

/// A transformation or analysis run over a whole [Program]
pub trait Pass {
    /// The name used to select this pass in [Options::print_ir_after_pass], and as its log target
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    fn run(&mut self, program: &mut Program, state: &mut PassExecutionState<'_>)
    -> Result<(), Report>;
}

/// A named counter recorded by a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassStatistic {
    pub pass: &'static str,
    pub name: &'static str,
    pub value: usize,
}

impl fmt::Display for PassStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} = {}", self.pass, self.name, self.value)
    }
}

/// State available to a [Pass] while it runs
pub struct PassExecutionState<'a> {
    options: &'a Options,
    pass: &'static str,
    statistics: Vec<PassStatistic>,
}

impl<'a> PassExecutionState<'a> {
    pub fn new(options: &'a Options, pass: &'static str) -> Self {
        Self {
            options,
            pass,
            statistics: vec![],
        }
    }

    #[inline]
    pub fn options(&self) -> &'a Options {
        self.options
    }

    /// Record a statistic for the running pass
    pub fn record(&mut self, name: &'static str, value: usize) {
        self.statistics.push(PassStatistic {
            pass: self.pass,
            name,
            value,
        });
    }

    pub fn into_statistics(self) -> Vec<PassStatistic> {
        self.statistics
    }
}

/// Runs a sequence of passes over a [Program].
///
/// Depending on the [Options], the program is validated and/or printed after each pass.
pub struct PassManager<'a> {
    options: &'a Options,
    passes: Vec<Box<dyn Pass>>,
    level: ValidationLevel,
    statistics: Vec<PassStatistic>,
}

impl<'a> PassManager<'a> {
    pub fn new(options: &'a Options) -> Self {
        Self {
            options,
            passes: vec![],
            level: ValidationLevel::Ssa,
            statistics: vec![],
        }
    }

    /// Set how strictly the program is checked between passes
    pub fn with_validation_level(mut self, level: ValidationLevel) -> Self {
        self.level = level;
        self
    }

    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Statistics collected by every pass run so far, in order
    pub fn statistics(&self) -> &[PassStatistic] {
        &self.statistics
    }

    pub fn run(&mut self, program: &mut Program) -> Result<(), Report> {
        for pass in self.passes.iter_mut() {
            let name = pass.name();
            let before = program.instruction_count();
            log::debug!(target: "pass-manager", "running pass '{name}'");

            let mut state = PassExecutionState::new(self.options, name);
            pass.run(program, &mut state)
                .with_context(|| format!("pass '{name}' failed"))?;

            let after = program.instruction_count();
            self.statistics.push(PassStatistic {
                pass: name,
                name: "instructions-before",
                value: before,
            });
            self.statistics.push(PassStatistic {
                pass: name,
                name: "instructions-after",
                value: after,
            });
            self.statistics.extend(state.into_statistics());
            log::debug!(target: "pass-manager", "'{name}' finished: {before} -> {after} instructions");

            if self.options.validate {
                validate(program, self.level)
                    .with_context(|| format!("invalid program after pass '{name}'"))?;
            }
            if self.options.should_print_ir_after(name) {
                print_ir(program, &self.options.print_ir_filter, name);
            }
        }
        Ok(())
    }
}

/// Write the parts of `program` selected by `filter` to the `printer` log target
pub fn print_ir(program: &Program, filter: &IrFilter, after: &str) {
    match filter {
        IrFilter::Any => log::trace!(target: "printer", "IR after '{after}':\n{program}"),
        IrFilter::Block(index) => {
            if let Some(block) = program.blocks.values().find(|b| b.index.as_u32() == *index) {
                log::trace!(target: "printer", "IR after '{after}':\n{block}");
            }
        }
    }
}

/// A [Pass] which prints the program it is run on
#[derive(Default)]
pub struct Print {
    filter: IrFilter,
}

impl Print {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn only(filter: IrFilter) -> Self {
        Self { filter }
    }
}

impl Pass for Print {
    fn name(&self) -> &'static str {
        "print"
    }

    fn run(&mut self, program: &mut Program, _state: &mut PassExecutionState<'_>) -> Result<(), Report> {
        print_ir(program, &self.filter, "print");
        Ok(())
    }
}
