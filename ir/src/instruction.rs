use wavec_session::ChipClass;

use crate::{BlockId, Definition, Format, Opcode, Operand, PhysReg, RegType};

bitflags::bitflags! {
    /// The kinds of memory an instruction may be ordered against
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
    pub struct BarrierInteraction: u8 {
        const BUFFER = 1 << 0;
        const IMAGE = 1 << 1;
        const ATOMIC = 1 << 2;
        const SHARED = 1 << 3;
    }
}

/// The subgroup operation performed by a reduction or scan pseudo-instruction
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Iadd32,
    Iadd64,
    Imul32,
    Imul64,
    Fadd32,
    Fadd64,
    Fmul32,
    Fmul64,
    Imin32,
    Imin64,
    Imax32,
    Imax64,
    Umin32,
    Umin64,
    Umax32,
    Umax64,
    Fmin32,
    Fmin64,
    Fmax32,
    Fmax64,
    Iand32,
    Iand64,
    Ior32,
    Ior64,
    Ixor32,
    Ixor64,
}

impl ReduceOp {
    pub const fn is_64bit(self) -> bool {
        matches!(
            self,
            Self::Iadd64
                | Self::Imul64
                | Self::Fadd64
                | Self::Fmul64
                | Self::Imin64
                | Self::Imax64
                | Self::Umin64
                | Self::Umax64
                | Self::Fmin64
                | Self::Fmax64
                | Self::Iand64
                | Self::Ior64
                | Self::Ixor64
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Iadd32 => "iadd32",
            Self::Iadd64 => "iadd64",
            Self::Imul32 => "imul32",
            Self::Imul64 => "imul64",
            Self::Fadd32 => "fadd32",
            Self::Fadd64 => "fadd64",
            Self::Fmul32 => "fmul32",
            Self::Fmul64 => "fmul64",
            Self::Imin32 => "imin32",
            Self::Imin64 => "imin64",
            Self::Imax32 => "imax32",
            Self::Imax64 => "imax64",
            Self::Umin32 => "umin32",
            Self::Umin64 => "umin64",
            Self::Umax32 => "umax32",
            Self::Umax64 => "umax64",
            Self::Fmin32 => "fmin32",
            Self::Fmin64 => "fmin64",
            Self::Fmax32 => "fmax32",
            Self::Fmax64 => "fmax64",
            Self::Iand32 => "iand32",
            Self::Iand64 => "iand64",
            Self::Ior32 => "ior32",
            Self::Ior64 => "ior64",
            Self::Ixor32 => "ixor32",
            Self::Ixor64 => "ixor64",
        }
    }
}

/// The format-specific part of an instruction
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InstrData {
    None,
    Sopk {
        imm: u16,
    },
    Sopp {
        imm: u32,
        /// The block this instruction jumps to, resolved to `imm` once offsets are known
        block: Option<BlockId>,
    },
    Smem {
        glc: bool,
        nv: bool,
        can_reorder: bool,
        barrier: BarrierInteraction,
    },
    Vop3a {
        abs: [bool; 3],
        neg: [bool; 3],
        clamp: bool,
    },
    Dpp {
        dpp_ctrl: u16,
        row_mask: u8,
        bank_mask: u8,
        abs: [bool; 2],
        neg: [bool; 2],
        bound_ctrl: bool,
    },
    Interp {
        attribute: u8,
        component: u8,
    },
    Ds {
        offset0: u16,
        offset1: u8,
        gds: bool,
    },
    Mubuf {
        offset: u16,
        offen: bool,
        idxen: bool,
        glc: bool,
        slc: bool,
        /// Must run with exactly the invocation's own lanes active
        disable_wqm: bool,
        barrier: BarrierInteraction,
    },
    Mimg {
        dmask: u8,
        unrm: bool,
        glc: bool,
        slc: bool,
        da: bool,
        /// Must run with exactly the invocation's own lanes active
        disable_wqm: bool,
        barrier: BarrierInteraction,
    },
    Export {
        enabled_mask: u8,
        dest: u8,
        compressed: bool,
        done: bool,
        valid_mask: bool,
    },
    Pseudo {
        /// `scc` holds a live value across this instruction
        tmp_in_scc: bool,
        /// A free SGPR available to the lowering of this instruction
        scratch_sgpr: Option<PhysReg>,
    },
    Branch {
        target: [Option<BlockId>; 2],
    },
    Reduction {
        op: ReduceOp,
        cluster_size: u32,
    },
}

impl InstrData {
    /// The default payload for an instruction encoded as `format`
    pub fn for_format(format: Format) -> Self {
        if format.contains(Format::DPP) {
            return Self::Dpp {
                dpp_ctrl: 0,
                row_mask: 0xf,
                bank_mask: 0xf,
                abs: [false; 2],
                neg: [false; 2],
                bound_ctrl: false,
            };
        }
        if format.contains(Format::VOP3) || format.contains(Format::VOP3P) {
            return Self::Vop3a {
                abs: [false; 3],
                neg: [false; 3],
                clamp: false,
            };
        }
        if format.contains(Format::VINTRP) {
            return Self::Interp {
                attribute: 0,
                component: 0,
            };
        }
        match format {
            Format::SOPK => Self::Sopk { imm: 0 },
            Format::SOPP => Self::Sopp {
                imm: 0,
                block: None,
            },
            Format::SMEM => Self::Smem {
                glc: false,
                nv: false,
                can_reorder: true,
                barrier: BarrierInteraction::empty(),
            },
            Format::DS => Self::Ds {
                offset0: 0,
                offset1: 0,
                gds: false,
            },
            Format::MUBUF | Format::MTBUF => Self::Mubuf {
                offset: 0,
                offen: false,
                idxen: false,
                glc: false,
                slc: false,
                disable_wqm: false,
                barrier: BarrierInteraction::empty(),
            },
            Format::MIMG => Self::Mimg {
                dmask: 0xf,
                unrm: false,
                glc: false,
                slc: false,
                da: false,
                disable_wqm: false,
                barrier: BarrierInteraction::empty(),
            },
            Format::EXP => Self::Export {
                enabled_mask: 0,
                dest: 0,
                compressed: false,
                done: false,
                valid_mask: false,
            },
            Format::PSEUDO => Self::Pseudo {
                tmp_in_scc: false,
                scratch_sgpr: None,
            },
            Format::PSEUDO_BRANCH => Self::Branch {
                target: [None; 2],
            },
            _ => Self::None,
        }
    }
}

/// A single instruction.
///
/// The operand and definition arrays are sized when the instruction is created and never grow;
/// rewrites that need a different arity build a new instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub format: Format,
    operands: Box<[Operand]>,
    definitions: Box<[Definition]>,
    pub data: InstrData,
}

impl Instruction {
    pub fn new(
        opcode: Opcode,
        definitions: impl Into<Box<[Definition]>>,
        operands: impl Into<Box<[Operand]>>,
    ) -> Self {
        Self::with_format(opcode, opcode.format(), definitions, operands)
    }

    pub fn with_format(
        opcode: Opcode,
        format: Format,
        definitions: impl Into<Box<[Definition]>>,
        operands: impl Into<Box<[Operand]>>,
    ) -> Self {
        Self {
            opcode,
            format,
            operands: operands.into(),
            definitions: definitions.into(),
            data: InstrData::for_format(format),
        }
    }

    /// Create a reduction or scan pseudo-instruction
    pub fn reduction(
        opcode: Opcode,
        op: ReduceOp,
        cluster_size: u32,
        definitions: impl Into<Box<[Definition]>>,
        operands: impl Into<Box<[Operand]>>,
    ) -> Self {
        assert_eq!(opcode.format(), Format::PSEUDO_REDUCTION);
        Self::new(opcode, definitions, operands)
            .with_data(InstrData::Reduction { op, cluster_size })
    }

    pub fn with_data(mut self, data: InstrData) -> Self {
        self.data = data;
        self
    }

    #[inline]
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    #[inline]
    pub fn operands_mut(&mut self) -> &mut [Operand] {
        &mut self.operands
    }

    #[inline]
    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    #[inline]
    pub fn definitions_mut(&mut self) -> &mut [Definition] {
        &mut self.definitions
    }

    #[inline]
    pub fn is_phi(&self) -> bool {
        self.opcode.is_phi()
    }

    #[inline]
    pub fn is_valu(&self) -> bool {
        self.format.is_valu()
    }

    #[inline]
    pub fn is_salu(&self) -> bool {
        self.format.is_salu()
    }

    #[inline]
    pub fn is_smem(&self) -> bool {
        self.format == Format::SMEM
    }

    #[inline]
    pub fn is_vmem(&self) -> bool {
        matches!(self.format, Format::MUBUF | Format::MTBUF | Format::MIMG)
    }

    #[inline]
    pub fn is_dpp(&self) -> bool {
        self.format.contains(Format::DPP)
    }

    #[inline]
    pub fn is_vop3(&self) -> bool {
        self.format.contains(Format::VOP3)
    }

    /// True for the pseudo-branches which terminate a block
    #[inline]
    pub fn is_branch(&self) -> bool {
        self.format == Format::PSEUDO_BRANCH
    }

    /// The targets of a pseudo-branch, `[taken, not taken]`
    pub fn branch_targets(&self) -> [Option<BlockId>; 2] {
        match self.data {
            InstrData::Branch { target } => target,
            _ => panic!("{} is not a branch", self.opcode),
        }
    }

    pub fn set_branch_targets(&mut self, target: [Option<BlockId>; 2]) {
        match &mut self.data {
            InstrData::Branch { target: t } => *t = target,
            _ => panic!("{} is not a branch", self.opcode),
        }
    }

    /// True if `scc` holds a live value which a lowering of this pseudo-instruction must preserve
    pub fn tmp_in_scc(&self) -> bool {
        matches!(self.data, InstrData::Pseudo { tmp_in_scc: true, .. })
    }

    pub fn scratch_sgpr(&self) -> Option<PhysReg> {
        match self.data {
            InstrData::Pseudo { scratch_sgpr, .. } => scratch_sgpr,
            _ => None,
        }
    }

    /// True if this instruction must execute with helper lanes disabled
    pub fn disables_wqm(&self) -> bool {
        match self.data {
            InstrData::Mubuf { disable_wqm, .. } | InstrData::Mimg { disable_wqm, .. } => {
                disable_wqm
            }
            _ => self.opcode == Opcode::PFsBufferStoreSmem,
        }
    }

    /// True if the hardware restricts this instruction's effects to the lanes enabled in `exec`.
    ///
    /// Scalar instructions, barriers and lane-indexed moves always see the whole wave.
    pub fn is_predicated_by_exec(&self) -> bool {
        if self.is_smem() || self.is_salu() || self.format == Format::PSEUDO_BARRIER {
            return false;
        }
        match self.opcode {
            Opcode::PCreateVector => self.definitions[0].temp().reg_type() == RegType::Vgpr,
            Opcode::PExtractVector | Opcode::PSplitVector => {
                self.operands[0].reg_class().reg_type() == RegType::Vgpr
            }
            Opcode::PSpill | Opcode::PReload => false,
            Opcode::VReadlaneB32 | Opcode::VWritelaneB32 => false,
            _ => true,
        }
    }

    /// The size of this instruction's machine encoding, in dwords
    pub fn encoded_dwords(&self, chip_class: ChipClass) -> u32 {
        let literal = u32::from(self.operands.iter().any(|op| op.is_literal()));
        let format = self.format;
        if format.is_pseudo() {
            return 0;
        }
        if format.is_salu() {
            return 1 + literal;
        }
        if format == Format::SMEM {
            return chip_class.smem_encoding_dwords();
        }
        if format.contains(Format::VOP3) || format.contains(Format::VOP3P) {
            return 2;
        }
        if format.contains(Format::VINTRP) {
            return 1;
        }
        if format.is_valu() {
            let extension =
                u32::from(format.contains(Format::DPP) || format.contains(Format::SDWA));
            return 1 + extension + literal;
        }
        2
    }
}
