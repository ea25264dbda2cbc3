//! Transformation passes over the wavec IR.

mod exec_mask;

pub use self::exec_mask::{ExecMaskSummary, InsertExecMask, insert_exec_mask};
