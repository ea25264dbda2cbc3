use std::collections::BTreeMap;

use wavec_ir::{Builder, Definition, Instruction, Opcode, Operand, PhysReg, RegClass};
use wavec_session::ChipClass;

/// A pending copy into one register, or into an aligned pair of scalar registers
#[derive(Debug, Copy, Clone)]
struct CopyOperation {
    op: Operand,
    def: Definition,
    /// The number of pending copies which read the destination register
    uses: u32,
    /// The size in dwords
    size: u32,
}

/// How a parallel copy may use `scc` and the scalar scratch register
#[derive(Debug, Copy, Clone)]
pub struct CopyConfig {
    pub chip_class: ChipClass,
    /// `scc` holds a live value which the copy must not clobber
    pub tmp_in_scc: bool,
    pub scratch_sgpr: Option<PhysReg>,
}

impl CopyConfig {
    pub fn new(chip_class: ChipClass) -> Self {
        Self {
            chip_class,
            tmp_in_scc: false,
            scratch_sgpr: None,
        }
    }

    pub fn with_scc_preserved(mut self, scratch_sgpr: PhysReg) -> Self {
        self.tmp_in_scc = true;
        self.scratch_sgpr = Some(scratch_sgpr);
        self
    }

    pub fn with_scratch_sgpr(mut self, scratch_sgpr: Option<PhysReg>) -> Self {
        self.scratch_sgpr = scratch_sgpr;
        self
    }
}

/// What lowering a parallel copy emitted
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CopyStats {
    /// Copies emitted as a single move
    pub moves: usize,
    /// Register pairs exchanged to break a cycle
    pub swaps: usize,
}

impl core::ops::AddAssign for CopyStats {
    fn add_assign(&mut self, rhs: Self) {
        self.moves += rhs.moves;
        self.swaps += rhs.swaps;
    }
}

/// A set of register copies which all read their sources before any destination is written.
///
/// Copies are split into dwords and keyed by destination register. Lowering orders them so that
/// no source is overwritten before it is read, and exchanges registers where the copies form a
/// cycle.
#[derive(Debug, Default)]
pub struct ParallelCopy {
    copies: BTreeMap<PhysReg, CopyOperation>,
}

fn dword_class(rc: RegClass) -> RegClass {
    if rc.is_sgpr() {
        RegClass::S1
    } else {
        RegClass::V1
    }
}

impl ParallelCopy {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Add the copy `def = op`.
    ///
    /// Undefined operands produce no copy. 64-bit constants are kept whole when copied into a
    /// scalar register pair.
    pub fn insert(&mut self, def: Definition, op: Operand) {
        let dst = def.phys_reg();
        let def_rc = def.reg_class();
        if op.is_undefined() {
            return;
        }
        if op.is_constant() {
            match def.size() {
                1 => self.insert_dword(dst, dword_class(def_rc), op),
                2 if def_rc.is_sgpr() => self.push(dst, CopyOperation {
                    op,
                    def: Definition::reg(dst, RegClass::S2),
                    uses: 0,
                    size: 2,
                }),
                size => panic!("cannot copy a constant into {size} vector registers"),
            }
            return;
        }
        assert_eq!(op.size(), def.size(), "copy of {} into {}", op.reg_class(), def_rc);
        let src = op.phys_reg();
        let op_rc = dword_class(op.reg_class());
        for i in 0..op.size() {
            self.insert_dword(dst.offset(i), dword_class(def_rc), Operand::reg(src.offset(i), op_rc));
        }
    }

    /// Add a copy of the single dword `op` into `dst`
    pub fn insert_dword(&mut self, dst: PhysReg, rc: RegClass, op: Operand) {
        self.push(dst, CopyOperation {
            op,
            def: Definition::reg(dst, rc),
            uses: 0,
            size: 1,
        });
    }

    fn push(&mut self, dst: PhysReg, copy: CopyOperation) {
        let prev = self.copies.insert(dst, copy);
        assert!(prev.is_none(), "{dst} is written twice by the same parallel copy");
    }

    /// The pending copy which writes `reg`, including the high half of a 64-bit copy
    fn writer_of(&mut self, reg: PhysReg) -> Option<&mut CopyOperation> {
        if self.copies.contains_key(&reg) {
            return self.copies.get_mut(&reg);
        }
        let low = PhysReg::new(reg.index().checked_sub(1)?);
        self.copies.get_mut(&low).filter(|copy| copy.size == 2)
    }

    /// Emit the copies as hardware instructions
    pub fn lower(mut self, bld: &mut Builder<'_>, config: &CopyConfig) -> CopyStats {
        let mut stats = CopyStats::default();

        self.copies
            .retain(|&dst, copy| copy.op.is_constant() || copy.op.phys_reg() != dst);
        let reads = self
            .copies
            .values()
            .filter(|copy| !copy.op.is_constant())
            .map(|copy| copy.op.phys_reg())
            .collect::<Vec<_>>();
        for reg in reads {
            if let Some(writer) = self.writer_of(reg) {
                writer.uses += 1;
            }
        }

        let writes_scc = self
            .copies
            .get(&PhysReg::SCC)
            .is_some_and(|copy| !copy.op.is_constant());
        if config.tmp_in_scc {
            if let Some(scratch) = config.scratch_sgpr {
                assert!(
                    !self.copies.contains_key(&scratch),
                    "the scratch register {scratch} is a copy destination"
                );
            }
        }
        let mut preserve_scc = config.tmp_in_scc && !writes_scc;

        // Paths of the location transfer graph: a destination nobody reads can be written now
        while let Some(dst) = self.copies.iter().find(|(_, copy)| copy.uses == 0).map(|(&dst, _)| dst) {
            let Some(mut copy) = self.copies.remove(&dst) else {
                break;
            };
            if let Some(pair) = self.take_pair(dst, &copy) {
                copy = pair;
            }

            if copy.def.phys_reg() == PhysReg::SCC {
                bld.emit(Instruction::new(
                    Opcode::SCmpLgI32,
                    [copy.def],
                    [copy.op, Operand::constant(0)],
                ));
                // scc now holds a value the remaining swaps must not clobber
                preserve_scc = true;
            } else {
                emit_copy(bld, copy.def, copy.op);
            }
            stats.moves += 1;

            if !copy.op.is_constant() {
                let src = copy.op.phys_reg();
                for i in 0..copy.size {
                    if let Some(writer) = self.writer_of(src.offset(i)) {
                        writer.uses -= 1;
                    }
                }
            }
        }

        if self.copies.is_empty() {
            return stats;
        }

        // Everything left is read by another copy, so the rest forms disjoint cycles
        let dsts = self.copies.keys().copied().collect::<Vec<_>>();
        let mut constants = vec![];
        for (i, &dst) in dsts.iter().enumerate() {
            let copy = self.copies[&dst];
            if copy.op.is_constant() {
                constants.push(copy);
                continue;
            }
            let src = copy.op.phys_reg();
            if src == dst {
                continue;
            }
            debug_assert_eq!(copy.uses, 1, "{dst} is read by more than one copy of a cycle");

            emit_swap(bld, &copy, config, preserve_scc);
            stats.swaps += 1;

            // The value the reader of `dst` wants now lives in `src`
            let reader = dsts[i + 1..].iter().copied().find(|k| {
                let op = self.copies[k].op;
                !op.is_constant() && op.phys_reg() == dst
            });
            if let Some(reader) = reader.and_then(|k| self.copies.get_mut(&k)) {
                reader.op = Operand::reg(src, reader.op.reg_class());
            }
        }

        for copy in constants {
            if copy.def.phys_reg() == PhysReg::SCC {
                let value = u32::from(copy.op.constant_value() != 0);
                bld.emit(Instruction::new(
                    Opcode::SCmpLgI32,
                    [copy.def],
                    [Operand::constant(0), Operand::constant(value)],
                ));
            } else {
                emit_copy(bld, copy.def, copy.op);
            }
            stats.moves += 1;
        }

        stats
    }

    /// Merge a 32-bit scalar copy with the copy of the other half of its register pair, if both
    /// can be done as one 64-bit move.
    fn take_pair(&mut self, dst: PhysReg, copy: &CopyOperation) -> Option<CopyOperation> {
        if !copy.def.reg_class().is_sgpr() || copy.size != 1 || copy.op.is_constant() {
            return None;
        }
        let src = copy.op.phys_reg();
        if dst == PhysReg::SCC || src == PhysReg::SCC || dst.index() % 2 != src.index() % 2 {
            return None;
        }
        let (other_dst, other_src) = if dst.index() % 2 == 1 {
            (PhysReg::new(dst.index() - 1), PhysReg::new(src.index() - 1))
        } else {
            (dst.offset(1), src.offset(1))
        };
        let other = self.copies.get(&other_dst)?;
        if other.uses != 0
            || other.size != 1
            || other.op.is_constant()
            || other.op.phys_reg() != other_src
            || other_src == PhysReg::SCC
        {
            return None;
        }
        self.copies.remove(&other_dst);
        let (low_dst, low_src) = if dst < other_dst { (dst, src) } else { (other_dst, other_src) };
        log::trace!(target: "lower-to-hw", "coalesced copies into {low_dst} and {}", low_dst.offset(1));
        Some(CopyOperation {
            op: Operand::reg(low_src, RegClass::S2),
            def: Definition::reg(low_dst, RegClass::S2),
            uses: 0,
            size: 2,
        })
    }
}

/// A single move of one or two dwords
pub(crate) fn emit_copy(bld: &mut Builder<'_>, def: Definition, op: Operand) {
    let opcode = match (def.reg_class().is_sgpr(), def.size()) {
        (true, 1) => Opcode::SMovB32,
        (true, 2) => Opcode::SMovB64,
        (false, 1) => Opcode::VMovB32,
        (_, size) => panic!("cannot copy {size} dwords with a single move"),
    };
    bld.emit(Instruction::new(opcode, [def], [op]));
}

/// Exchange the contents of the source and destination registers of `copy`
fn emit_swap(bld: &mut Builder<'_>, copy: &CopyOperation, config: &CopyConfig, preserve_scc: bool) {
    let dst = copy.def.phys_reg();
    let src = copy.op.phys_reg();
    let def_as_op = Operand::reg(dst, copy.def.reg_class());
    let op_as_def = Definition::reg(src, copy.op.reg_class());
    log::trace!(target: "lower-to-hw", "swapping {dst} and {src}");

    if config.chip_class.has_vgpr_swap() && copy.def.reg_class().is_vgpr() {
        bld.emit(Instruction::new(
            Opcode::VSwapB32,
            [copy.def, op_as_def],
            [copy.op, def_as_op],
        ));
    } else if src == PhysReg::SCC || dst == PhysReg::SCC {
        assert!(!preserve_scc, "cannot swap scc while it holds a live value");
        let scratch = config
            .scratch_sgpr
            .unwrap_or_else(|| panic!("swapping scc requires a scratch register"));
        let other = if src == PhysReg::SCC { dst } else { src };
        let scc = PhysReg::SCC;
        bld.emit(Instruction::new(
            Opcode::SMovB32,
            [Definition::reg(scratch, RegClass::S1)],
            [Operand::reg(scc, RegClass::S1)],
        ));
        bld.emit(Instruction::new(
            Opcode::SCmpLgI32,
            [Definition::reg(scc, RegClass::S1)],
            [Operand::reg(other, RegClass::S1), Operand::constant(0)],
        ));
        bld.emit(Instruction::new(
            Opcode::SMovB32,
            [Definition::reg(other, RegClass::S1)],
            [Operand::reg(scratch, RegClass::S1)],
        ));
    } else if copy.def.reg_class().is_sgpr() {
        if preserve_scc {
            let scratch = config
                .scratch_sgpr
                .unwrap_or_else(|| panic!("preserving scc requires a scratch register"));
            let tmp = Operand::reg(scratch, RegClass::S1);
            bld.emit(Instruction::new(Opcode::SMovB32, [Definition::reg(scratch, RegClass::S1)], [copy.op]));
            bld.emit(Instruction::new(Opcode::SMovB32, [op_as_def], [def_as_op]));
            bld.emit(Instruction::new(Opcode::SMovB32, [copy.def], [tmp]));
        } else {
            let scc = Definition::reg(PhysReg::SCC, RegClass::S1);
            for def in [op_as_def, copy.def, op_as_def] {
                bld.emit(Instruction::new(Opcode::SXorB32, [def, scc], [copy.op, def_as_op]));
            }
        }
    } else {
        for def in [op_as_def, copy.def, op_as_def] {
            bld.emit(Instruction::new(Opcode::VXorB32, [def], [copy.op, def_as_op]));
        }
    }
}
