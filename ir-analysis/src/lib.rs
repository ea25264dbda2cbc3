//! Analyses over the wavec IR which the exec mask and lowering passes depend on.

mod dead_code;
pub mod wqm;

pub use self::{
    dead_code::{UseCounts, dead_code_analysis},
    wqm::{BlockNeeds, WqmAnalysis, WqmState},
};
