mod options;
mod target;

pub use self::{
    options::{IrFilter, Options},
    target::{ChipClass, ShaderStage},
};

/// An error which occurs when parsing or validating compiler options
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("unrecognized chip class '{0}': expected one of gfx6, gfx7, gfx8, gfx9, gfx10")]
    InvalidChipClass(String),
    #[error(
        "unrecognized shader stage '{0}': expected one of vertex, tess-ctrl, tess-eval, \
         geometry, fragment, compute"
    )]
    InvalidShaderStage(String),
    #[error("invalid ir filter '{filter}': {reason}")]
    InvalidIrFilter { filter: String, reason: &'static str },
    #[error("scalar cache write-back on program end requires gfx8 or newer, but target is {0}")]
    ScalarWritebackUnsupported(ChipClass),
}
