use core::fmt;

use crate::{Block, BlockKind, InstrData, Instruction, Program};

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, def) in self.definitions().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{def}")?;
        }
        if !self.definitions().is_empty() {
            f.write_str(" = ")?;
        }
        f.write_str(self.opcode.name())?;
        for (i, op) in self.operands().iter().enumerate() {
            f.write_str(if i > 0 { ", " } else { " " })?;
            write!(f, "{op}")?;
        }
        match self.data {
            InstrData::Branch { target } => {
                for block in target.into_iter().flatten() {
                    write!(f, " {block}")?;
                }
            }
            InstrData::Sopp {
                block: Some(block), ..
            } => write!(f, " {block}")?,
            InstrData::Sopp { imm, block: None } if imm != 0 => write!(f, " imm:{imm}")?,
            InstrData::Sopk { imm } => write!(f, " imm:{imm:#x}")?,
            InstrData::Reduction { op, cluster_size } => {
                write!(f, " op:{} cluster_size:{cluster_size}", op.name())?
            }
            InstrData::Dpp {
                dpp_ctrl,
                row_mask,
                bank_mask,
                bound_ctrl,
                ..
            } => {
                write!(f, " dpp_ctrl:{dpp_ctrl:#x} row_mask:{row_mask:#x} bank_mask:{bank_mask:#x}")?;
                if bound_ctrl {
                    f.write_str(" bound_ctrl:1")?;
                }
            }
            InstrData::Ds { offset0, offset1, .. } if offset0 != 0 || offset1 != 0 => {
                write!(f, " offset0:{offset0:#x} offset1:{offset1}")?
            }
            InstrData::Export {
                enabled_mask,
                dest,
                done,
                valid_mask,
                ..
            } => {
                write!(f, " en:{enabled_mask:#x} dest:{dest}")?;
                if done {
                    f.write_str(" done")?;
                }
                if valid_mask {
                    f.write_str(" vm")?;
                }
            }
            InstrData::Mubuf {
                disable_wqm: true, ..
            }
            | InstrData::Mimg {
                disable_wqm: true, ..
            } => f.write_str(" disable_wqm")?,
            _ => (),
        }
        Ok(())
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, _)) in self.iter_names().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&name.to_ascii_lowercase())?;
        }
        Ok(())
    }
}

fn write_block_list(f: &mut fmt::Formatter<'_>, label: &str, blocks: &[crate::BlockId]) -> fmt::Result {
    write!(f, " {label}:")?;
    for block in blocks {
        write!(f, " {block}")?;
    }
    Ok(())
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: /*", self.index)?;
        write_block_list(f, "logical preds", &self.logical_preds)?;
        f.write_str(",")?;
        write_block_list(f, "linear preds", &self.linear_preds)?;
        write!(f, ", loop depth: {}, kind: {} */", self.loop_nest_depth, self.kind)?;
        for inst in self.instructions.iter() {
            write!(f, "\n  {inst}")?;
        }
        if let Some(exec) = self.live_out_exec {
            write!(f, "\n  /* live-out exec: {exec} */")?;
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program ({}, {}):", self.chip_class, self.stage)?;
        for block in self.blocks.values() {
            writeln!(f, "{block}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wavec_session::Options;

    use crate::*;

    #[test]
    fn print_program() {
        let mut program = Program::new(&Options::default());
        let entry = program.create_block(BlockKind::TOP_LEVEL | BlockKind::UNIFORM);
        let exit = program.create_block(BlockKind::TOP_LEVEL);
        program.add_edge(entry, exit);

        let block = &mut program.blocks[entry];
        let mut bld = Builder::new(&program.temps, &mut block.instructions);
        let exec = bld.build(Opcode::PStartPgm, [bld.exec_def()], []);
        let copy = bld.copy(bld.def(RegClass::S2), Builder::exec(exec));
        bld.branch(Opcode::PCbranchZ, [Operand::temp(copy)], exit, None);

        let expected = "\
program (gfx9, fragment):
BB0: /* logical preds:, linear preds:, loop depth: 0, kind: uniform, top_level */
  s2: %1:exec = p_startpgm
  s2: %2 = p_parallelcopy %1:exec
  p_cbranch_z %2 BB1
BB1: /* logical preds: BB0, linear preds: BB0, loop depth: 0, kind: top_level */
";
        assert_eq!(program.to_string(), expected);
    }
}
