use core::fmt;

use cranelift_entity::EntityRef;
use rustc_hash::FxHashMap;

use crate::{Block, BlockId, Opcode, Program, TempId};

/// How strictly a [Program] is checked.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ValidationLevel {
    /// The program is in SSA form and every block still ends in a pseudo-branch
    #[default]
    Ssa,
    /// Registers have been assigned and pseudo-instructions lowered.
    ///
    /// Temporaries may be redefined, and blocks no longer need a terminator.
    Lowered,
}

/// A single structural problem found in a [Program]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("the entry block does not begin with p_startpgm")]
    MissingStartInstruction,
    #[error("{block} is at position {position}")]
    BlockIndexMismatch { block: BlockId, position: usize },
    #[error("{block} refers to {target}, which does not exist")]
    UnknownBlock { block: BlockId, target: BlockId },
    #[error("{block} does not end in a branch")]
    MissingTerminator { block: BlockId },
    #[error("{kind} edge {from} -> {to} is only recorded on one side")]
    InconsistentEdge {
        kind: &'static str,
        from: BlockId,
        to: BlockId,
    },
    #[error("{temp} is defined in both {first} and {second}")]
    MultipleDefinitions {
        temp: TempId,
        first: BlockId,
        second: BlockId,
    },
    #[error("{opcode} in {block} has {actual} operands, but the block has {expected} predecessors")]
    PhiOperandCount {
        block: BlockId,
        opcode: Opcode,
        expected: usize,
        actual: usize,
    },
    #[error("{opcode} in {block} follows a non-phi instruction")]
    PhiNotAtBlockStart { block: BlockId, opcode: Opcode },
}

/// All of the problems found while validating a [Program]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl core::error::Error for ValidationErrors {}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program failed validation with {} error(s)", self.0.len())?;
        for error in self.0.iter() {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

/// Check the structural invariants of `program`
pub fn validate(program: &Program, level: ValidationLevel) -> Result<(), ValidationErrors> {
    let mut errors = vec![];

    let starts_with_startpgm = program
        .blocks
        .values()
        .next()
        .and_then(|entry| entry.instructions.first())
        .is_some_and(|inst| inst.opcode == Opcode::PStartPgm);
    if !starts_with_startpgm {
        errors.push(ValidationError::MissingStartInstruction);
    }

    let num_blocks = program.blocks.len();
    let mut defined_in = FxHashMap::<TempId, BlockId>::default();
    for (position, (id, block)) in program.blocks.iter().enumerate() {
        if block.index != id {
            errors.push(ValidationError::BlockIndexMismatch {
                block: block.index,
                position,
            });
        }

        validate_edges(program, block, &mut errors);

        if level == ValidationLevel::Ssa {
            if position + 1 < num_blocks && block.terminator().is_none() {
                errors.push(ValidationError::MissingTerminator { block: id });
            }
            validate_phis(block, &mut errors);
            for def in block.instructions.iter().flat_map(|inst| inst.definitions()) {
                if !def.is_temp() {
                    continue;
                }
                if let Some(first) = defined_in.insert(def.temp_id(), id) {
                    errors.push(ValidationError::MultipleDefinitions {
                        temp: def.temp_id(),
                        first,
                        second: id,
                    });
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        log::debug!(target: "validator", "found {} problems", errors.len());
        Err(ValidationErrors(errors))
    }
}

fn validate_edges(program: &Program, block: &Block, errors: &mut Vec<ValidationError>) {
    type Mirror = fn(&Block, BlockId) -> bool;

    let id = block.index;
    let edges: [(&'static str, &[BlockId], Mirror, bool); 4] = [
        ("logical", &block.logical_succs, |b, id| b.logical_preds.contains(&id), true),
        ("logical", &block.logical_preds, |b, id| b.logical_succs.contains(&id), false),
        ("linear", &block.linear_succs, |b, id| b.linear_preds.contains(&id), true),
        ("linear", &block.linear_preds, |b, id| b.linear_succs.contains(&id), false),
    ];
    for (kind, targets, is_mirrored, outgoing) in edges {
        for &target in targets {
            if target.index() >= program.blocks.len() {
                errors.push(ValidationError::UnknownBlock { block: id, target });
                continue;
            }
            if !is_mirrored(&program.blocks[target], id) {
                let (from, to) = if outgoing { (id, target) } else { (target, id) };
                errors.push(ValidationError::InconsistentEdge { kind, from, to });
            }
        }
    }
}

fn validate_phis(block: &Block, errors: &mut Vec<ValidationError>) {
    let mut in_phi_prefix = true;
    for inst in block.instructions.iter() {
        let expected = match inst.opcode {
            Opcode::PPhi => block.logical_preds.len(),
            Opcode::PLinearPhi => block.linear_preds.len(),
            _ => {
                in_phi_prefix = false;
                continue;
            }
        };
        if !in_phi_prefix {
            errors.push(ValidationError::PhiNotAtBlockStart {
                block: block.index,
                opcode: inst.opcode,
            });
        }
        if inst.operands().len() != expected {
            errors.push(ValidationError::PhiOperandCount {
                block: block.index,
                opcode: inst.opcode,
                expected,
                actual: inst.operands().len(),
            });
        }
    }
}
