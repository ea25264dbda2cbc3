use core::str::FromStr;

use crate::{ChipClass, OptionsError, ShaderStage};

/// This struct contains all of the configuration options for a single compilation.
///
/// Nothing here is global: every pass that needs configuration receives it through the
/// [crate::Options] it was handed, or through the program built from it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "std", derive(clap::Args))]
pub struct Options {
    /// The hardware generation to generate code for
    #[cfg_attr(
        feature = "std",
        arg(long, value_enum, value_name = "GFX", default_value_t = ChipClass::Gfx9)
    )]
    pub chip_class: ChipClass,
    /// The shader stage of the program being compiled
    #[cfg_attr(
        feature = "std",
        arg(long, value_enum, value_name = "STAGE", default_value_t = ShaderStage::Fragment)
    )]
    pub stage: ShaderStage,
    /// Write back the scalar data cache before every program termination
    #[cfg_attr(feature = "std", arg(long, default_value_t = false))]
    pub wb_smem_l1_on_end: bool,
    /// Run the IR validator after every pass
    #[cfg_attr(
        feature = "std",
        arg(long = "no-validate", action = clap::ArgAction::SetFalse)
    )]
    pub validate: bool,
    /// Print the IR after every pass
    #[cfg_attr(feature = "std", arg(long, default_value_t = false))]
    pub print_ir_after_all: bool,
    /// Print the IR after the named passes
    #[cfg_attr(feature = "std", arg(long, value_name = "PASS", value_delimiter = ','))]
    pub print_ir_after_pass: Vec<String>,
    /// Restrict IR printing to the selected blocks
    #[cfg_attr(feature = "std", arg(long, value_name = "FILTER", default_value = "any"))]
    pub print_ir_filter: IrFilter,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            chip_class: ChipClass::default(),
            stage: ShaderStage::default(),
            wb_smem_l1_on_end: false,
            validate: true,
            print_ir_after_all: false,
            print_ir_after_pass: Vec::new(),
            print_ir_filter: IrFilter::Any,
        }
    }
}

impl Options {
    pub fn new(chip_class: ChipClass, stage: ShaderStage) -> Self {
        Self {
            chip_class,
            stage,
            ..Default::default()
        }
    }

    pub fn with_scalar_writeback(mut self, enabled: bool) -> Self {
        self.wb_smem_l1_on_end = enabled;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate = enabled;
        self
    }

    /// Returns true if the IR should be printed after `pass` has run
    pub fn should_print_ir_after(&self, pass: &str) -> bool {
        self.print_ir_after_all || self.print_ir_after_pass.iter().any(|p| p == pass)
    }

    /// Check the options for combinations the target cannot support
    pub fn check(&self) -> Result<(), OptionsError> {
        if self.wb_smem_l1_on_end && !self.chip_class.has_scalar_stores() {
            return Err(OptionsError::ScalarWritebackUnsupported(self.chip_class));
        }
        Ok(())
    }
}

/// Selects which parts of a program are printed when IR printing is enabled
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub enum IrFilter {
    /// Print the whole program
    #[default]
    Any,
    /// Print only the block with the given index
    Block(u32),
}

impl FromStr for IrFilter {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("block", index)) => index.parse::<u32>().map(Self::Block).map_err(|_| {
                OptionsError::InvalidIrFilter {
                    filter: s.to_string(),
                    reason: "expected a block index, e.g. `block:3`",
                }
            }),
            Some(_) => Err(OptionsError::InvalidIrFilter {
                filter: s.to_string(),
                reason: "unrecognized filter type: expected `block`",
            }),
            None if s == "any" => Ok(Self::Any),
            None => Err(OptionsError::InvalidIrFilter {
                filter: s.to_string(),
                reason: "expected `block:<index>` or `any`",
            }),
        }
    }
}
