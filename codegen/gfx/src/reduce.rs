//! Expansion of subgroup reductions and scans into DPP and swizzle sequences.
//!
//! Inactive lanes are first filled with the identity of the operation, then partial results are
//! combined across increasingly distant lanes: within quads, rows of 16, half-waves and finally
//! the whole 64-lane wave.

use wavec_ir::{
    Builder, Definition, Format, InstrData, Instruction, Opcode, Operand, PhysReg, ReduceOp,
    RegClass, RegType,
};
use wavec_session::ChipClass;

const fn dpp_quad_perm(a: u16, b: u16, c: u16, d: u16) -> u16 {
    a | (b << 2) | (c << 4) | (d << 6)
}

const fn dpp_row_sr(amount: u16) -> u16 {
    0x110 | amount
}

const DPP_WF_SR1: u16 = 0x138;
const DPP_ROW_MIRROR: u16 = 0x140;
const DPP_ROW_HALF_MIRROR: u16 = 0x141;
const DPP_ROW_BCAST15: u16 = 0x142;
const DPP_ROW_BCAST31: u16 = 0x143;

/// The `ds_swizzle_b32` offset for a bitmask-mode lane permutation
const fn ds_pattern_bitmode(and_mask: u16, or_mask: u16, xor_mask: u16) -> u16 {
    and_mask | (or_mask << 5) | (xor_mask << 10)
}

/// The value which leaves any operand unchanged under `op`, for dword `index` of the operand
pub fn reduction_identity(op: ReduceOp, index: u32) -> u32 {
    let hi = index != 0;
    match op {
        ReduceOp::Iadd32
        | ReduceOp::Iadd64
        | ReduceOp::Fadd32
        | ReduceOp::Fadd64
        | ReduceOp::Ior32
        | ReduceOp::Ior64
        | ReduceOp::Ixor32
        | ReduceOp::Ixor64
        | ReduceOp::Umax32
        | ReduceOp::Umax64 => 0,
        ReduceOp::Imul32 | ReduceOp::Imul64 => u32::from(!hi),
        ReduceOp::Fmul32 => 1.0f32.to_bits(),
        ReduceOp::Fmul64 => split(1.0f64.to_bits(), hi),
        ReduceOp::Imin32 => i32::MAX as u32,
        ReduceOp::Imin64 => split(i64::MAX as u64, hi),
        ReduceOp::Imax32 => i32::MIN as u32,
        ReduceOp::Imax64 => split(i64::MIN as u64, hi),
        ReduceOp::Umin32 | ReduceOp::Umin64 | ReduceOp::Iand32 | ReduceOp::Iand64 => u32::MAX,
        ReduceOp::Fmin32 => f32::INFINITY.to_bits(),
        ReduceOp::Fmin64 => split(f64::INFINITY.to_bits(), hi),
        ReduceOp::Fmax32 => f32::NEG_INFINITY.to_bits(),
        ReduceOp::Fmax64 => split(f64::NEG_INFINITY.to_bits(), hi),
    }
}

fn split(value: u64, hi: bool) -> u32 {
    if hi { (value >> 32) as u32 } else { value as u32 }
}

/// How the combining step of a reduction is encoded
#[derive(Debug, Copy, Clone)]
struct Combine {
    opcode: Opcode,
    format: Format,
    /// The carry-out of `v_add_co_u32` is written to `vcc`
    clobbers_vcc: bool,
}

impl Combine {
    fn for_op(op: ReduceOp, chip_class: ChipClass) -> Self {
        let vop2 = |opcode| Self {
            opcode,
            format: Format::VOP2,
            clobbers_vcc: false,
        };
        match op {
            ReduceOp::Iadd32 if chip_class.has_carry_free_add() => vop2(Opcode::VAddU32),
            ReduceOp::Iadd32 => Self {
                opcode: Opcode::VAddCoU32,
                format: Format::VOP2,
                clobbers_vcc: true,
            },
            ReduceOp::Imul32 => Self {
                opcode: Opcode::VMulLoU32,
                format: Format::VOP3,
                clobbers_vcc: false,
            },
            ReduceOp::Fadd32 => vop2(Opcode::VAddF32),
            ReduceOp::Fmul32 => vop2(Opcode::VMulF32),
            ReduceOp::Imin32 => vop2(Opcode::VMinI32),
            ReduceOp::Imax32 => vop2(Opcode::VMaxI32),
            ReduceOp::Umin32 => vop2(Opcode::VMinU32),
            ReduceOp::Umax32 => vop2(Opcode::VMaxU32),
            ReduceOp::Fmin32 => vop2(Opcode::VMinF32),
            ReduceOp::Fmax32 => vop2(Opcode::VMaxF32),
            ReduceOp::Iand32 => vop2(Opcode::VAndB32),
            ReduceOp::Ior32 => vop2(Opcode::VOrB32),
            ReduceOp::Ixor32 => vop2(Opcode::VXorB32),
            op => panic!("{} reductions are not supported", op.name()),
        }
    }

    fn definitions(&self, dst: PhysReg, rc: RegClass) -> Vec<Definition> {
        let mut defs = vec![Definition::reg(dst, rc)];
        if self.clobbers_vcc {
            defs.push(Definition::reg(PhysReg::VCC, RegClass::S2));
        }
        defs
    }
}

/// The registers a reduction pseudo-instruction was allocated
#[derive(Debug, Copy, Clone)]
pub struct ReductionRegs {
    /// Linear VGPR holding the partial results
    pub tmp: PhysReg,
    /// Linear VGPR receiving lanes moved by DPP in the VOP3 path and by swizzles
    pub vtmp: PhysReg,
    /// SGPR pair saving `exec`
    pub stmp: PhysReg,
    /// SGPRs materializing literal identities of exclusive scans
    pub sitmp: PhysReg,
}

struct DppControl {
    ctrl: u16,
    row_mask: u8,
    bank_mask: u8,
    bound_ctrl: bool,
}

impl DppControl {
    const fn new(ctrl: u16) -> Self {
        Self {
            ctrl,
            row_mask: 0xf,
            bank_mask: 0xf,
            bound_ctrl: false,
        }
    }

    const fn rows(mut self, row_mask: u8) -> Self {
        self.row_mask = row_mask;
        self
    }

    const fn bound_ctrl(mut self) -> Self {
        self.bound_ctrl = true;
        self
    }

    fn data(&self) -> InstrData {
        InstrData::Dpp {
            dpp_ctrl: self.ctrl,
            row_mask: self.row_mask,
            bank_mask: self.bank_mask,
            abs: [false; 2],
            neg: [false; 2],
            bound_ctrl: self.bound_ctrl,
        }
    }
}

struct Reduction<'a, 'b> {
    bld: &'a mut Builder<'b>,
    combine: Combine,
    regs: ReductionRegs,
    size: u32,
}

impl Reduction<'_, '_> {
    /// `tmp = combine(dpp(tmp), tmp)` on every dword.
    ///
    /// With `identity`, lanes the permutation reads from outside the wave see the identity
    /// rather than their own value.
    fn dpp_step(&mut self, dpp: DppControl, identity: Option<&[Operand; 2]>) {
        let ReductionRegs { tmp, vtmp, .. } = self.regs;
        let combine = self.combine;
        if combine.format == Format::VOP3 {
            if let Some(identity) = identity {
                for (i, value) in identity.iter().take(self.size as usize).enumerate() {
                    self.bld.emit(Instruction::new(
                        Opcode::VMovB32,
                        [Definition::reg(vtmp.offset(i as u32), RegClass::V1)],
                        [*value],
                    ));
                }
            }
            for i in 0..self.size {
                self.bld.emit(
                    Instruction::with_format(
                        Opcode::VMovB32,
                        Format::VOP1 | Format::DPP,
                        [Definition::reg(vtmp.offset(i), RegClass::V1)],
                        [Operand::reg(tmp.offset(i), RegClass::V1)],
                    )
                    .with_data(dpp.data()),
                );
            }
            let rc = RegClass::new(RegType::Vgpr, self.size as u8);
            self.bld.emit(Instruction::new(
                combine.opcode,
                combine.definitions(tmp, rc),
                [Operand::reg(vtmp, rc), Operand::reg(tmp, rc)],
            ));
            return;
        }
        assert!(self.size == 1 || combine.opcode == Opcode::VMovB32);
        for i in 0..self.size {
            let src = Operand::reg(tmp.offset(i), RegClass::V1);
            let operands = if combine.format == Format::VOP2 {
                vec![src, src]
            } else {
                vec![src]
            };
            self.bld.emit(
                Instruction::with_format(
                    combine.opcode,
                    combine.format | Format::DPP,
                    combine.definitions(tmp.offset(i), RegClass::V1),
                    operands,
                )
                .with_data(dpp.data()),
            );
        }
    }

    fn restore_exec(&mut self) {
        self.bld.emit(Instruction::new(
            Opcode::SMovB64,
            [Definition::reg(PhysReg::EXEC, RegClass::S2)],
            [Operand::reg(self.regs.stmp, RegClass::S2)],
        ));
    }
}

/// Expand `p_reduce`, `p_inclusive_scan` or `p_exclusive_scan` of `src` into `dst`.
///
/// Clobbers `scc`. Only 32-bit operations are supported, and scans always span the whole wave.
#[allow(clippy::too_many_arguments)]
pub fn emit_reduction(
    bld: &mut Builder<'_>,
    chip_class: ChipClass,
    opcode: Opcode,
    op: ReduceOp,
    cluster_size: u32,
    regs: ReductionRegs,
    src: Operand,
    dst: Definition,
) {
    assert!(
        cluster_size == 64 || opcode == Opcode::PReduce,
        "scans must span the whole wave"
    );
    assert!(cluster_size.is_power_of_two() && cluster_size <= 64, "invalid cluster size {cluster_size}");
    log::trace!(target: "lower-to-hw", "expanding {opcode} {} over clusters of {cluster_size}", op.name());

    let combine = Combine::for_op(op, chip_class);
    let size = src.size();
    let ReductionRegs { tmp, vtmp, stmp, sitmp } = regs;
    let mut identity = [
        Operand::constant(reduction_identity(op, 0)),
        Operand::constant(reduction_identity(op, 1)),
    ];
    let mut cndmask_identity = identity;

    // Copy the source to tmp, with inactive lanes set to the identity
    bld.emit(Instruction::new(
        Opcode::SOrSaveexecB64,
        [
            Definition::reg(stmp, RegClass::S2),
            Definition::reg(PhysReg::SCC, RegClass::S1),
            Definition::reg(PhysReg::EXEC, RegClass::S2),
        ],
        [Operand::constant64(u64::MAX), Operand::reg(PhysReg::EXEC, RegClass::S2)],
    ));
    for i in 0..size as usize {
        if !identity[i].is_literal() {
            continue;
        }
        let dword = i as u32;
        if opcode == Opcode::PExclusiveScan {
            // v_writelane_b32 takes its value from an SGPR or an inline constant
            bld.emit(Instruction::new(
                Opcode::SMovB32,
                [Definition::reg(sitmp.offset(dword), RegClass::S1)],
                [identity[i]],
            ));
            identity[i] = Operand::reg(sitmp.offset(dword), RegClass::S1);
        }
        bld.emit(Instruction::new(
            Opcode::VMovB32,
            [Definition::reg(tmp.offset(dword), RegClass::V1)],
            [identity[i]],
        ));
        cndmask_identity[i] = Operand::reg(tmp.offset(dword), RegClass::V1);
    }
    for i in 0..size {
        bld.emit(Instruction::with_format(
            Opcode::VCndmaskB32,
            Format::VOP2 | Format::VOP3,
            [Definition::reg(tmp.offset(i), RegClass::V1)],
            [
                cndmask_identity[i as usize],
                Operand::reg(src.phys_reg().offset(i), RegClass::V1),
                Operand::reg(stmp, RegClass::S2),
            ],
        ));
    }

    let mut red = Reduction {
        bld,
        combine,
        regs,
        size,
    };
    let mut exec_restored = false;
    let mut dst_written = false;
    match opcode {
        Opcode::PReduce => 'reduce: {
            let steps = [
                DppControl::new(dpp_quad_perm(1, 0, 3, 2)),
                DppControl::new(dpp_quad_perm(2, 3, 0, 1)),
                DppControl::new(DPP_ROW_HALF_MIRROR),
                DppControl::new(DPP_ROW_MIRROR),
            ];
            for (step, dpp) in steps.into_iter().enumerate() {
                if cluster_size <= 1 << step {
                    break 'reduce;
                }
                red.dpp_step(dpp, None);
            }
            if cluster_size == 16 {
                break 'reduce;
            }
            if cluster_size == 32 {
                // Lanes 0-15 and 16-31 of each half-wave exchange their row results
                for i in 0..size {
                    red.bld.emit(
                        Instruction::new(
                            Opcode::DsSwizzleB32,
                            [Definition::reg(vtmp.offset(i), RegClass::V1)],
                            [Operand::reg(tmp.offset(i), RegClass::V1)],
                        )
                        .with_data(InstrData::Ds {
                            offset0: ds_pattern_bitmode(0x1f, 0, 0x10),
                            offset1: 0,
                            gds: false,
                        }),
                    );
                }
                red.restore_exec();
                exec_restored = true;
                let rc = src.reg_class();
                red.bld.emit(Instruction::new(
                    combine.opcode,
                    combine.definitions(dst.phys_reg(), rc),
                    [Operand::reg(vtmp, rc), Operand::reg(tmp, rc)],
                ));
                dst_written = true;
            } else {
                red.dpp_step(DppControl::new(DPP_ROW_BCAST15).rows(0xa), None);
                red.dpp_step(DppControl::new(DPP_ROW_BCAST31).rows(0xc), None);
            }
        }
        Opcode::PInclusiveScan | Opcode::PExclusiveScan => {
            if opcode == Opcode::PExclusiveScan {
                // Shift the wave right by one lane, lane 0 receives the identity
                let shift = Combine {
                    opcode: Opcode::VMovB32,
                    format: Format::VOP1,
                    clobbers_vcc: false,
                };
                let saved = core::mem::replace(&mut red.combine, shift);
                red.dpp_step(DppControl::new(DPP_WF_SR1).bound_ctrl(), None);
                red.combine = saved;
                for (i, value) in identity.iter().take(size as usize).enumerate() {
                    // bound_ctrl already zeroed lane 0
                    if value.is_constant() && value.constant_value() == 0 {
                        continue;
                    }
                    red.bld.emit(Instruction::new(
                        Opcode::VWritelaneB32,
                        [Definition::reg(tmp.offset(i as u32), RegClass::V1)],
                        [*value, Operand::constant(0)],
                    ));
                }
            }
            for amount in [1, 2, 4, 8] {
                red.dpp_step(DppControl::new(dpp_row_sr(amount)), Some(&identity));
            }
            red.dpp_step(DppControl::new(DPP_ROW_BCAST15).rows(0xa), Some(&identity));
            red.dpp_step(DppControl::new(DPP_ROW_BCAST31).rows(0xc), Some(&identity));
        }
        opcode => panic!("{opcode} is not a reduction"),
    }

    if !exec_restored {
        red.restore_exec();
    }

    let bld = red.bld;
    if opcode == Opcode::PReduce && cluster_size == 64 {
        // The last lane holds the result for the whole wave
        for i in 0..size {
            bld.emit(Instruction::new(
                Opcode::VReadlaneB32,
                [Definition::reg(dst.phys_reg().offset(i), RegClass::S1)],
                [Operand::reg(tmp.offset(i), RegClass::V1), Operand::constant(63)],
            ));
        }
    } else if dst.phys_reg() != tmp && !dst_written {
        for i in 0..size {
            bld.emit(Instruction::new(
                Opcode::VMovB32,
                [Definition::reg(dst.phys_reg().offset(i), RegClass::V1)],
                [Operand::reg(tmp.offset(i), RegClass::V1)],
            ));
        }
    }
}
