use core::{fmt, ops::BitOr};

/// The hardware encoding class of an instruction.
///
/// The low byte holds a base format. VALU encodings are bits in the high byte, and may be combined,
/// e.g. `VOP2 | VOP3` for the 64-bit encoding of a VOP2 opcode, or `VOP1 | DPP`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Format(u16);

impl Format {
    pub const PSEUDO: Self = Self(0);
    pub const SOP1: Self = Self(1);
    pub const SOP2: Self = Self(2);
    pub const SOPK: Self = Self(3);
    pub const SOPP: Self = Self(4);
    pub const SOPC: Self = Self(5);
    pub const SMEM: Self = Self(6);
    pub const DS: Self = Self(8);
    pub const MTBUF: Self = Self(9);
    pub const MUBUF: Self = Self(10);
    pub const MIMG: Self = Self(11);
    pub const EXP: Self = Self(12);
    pub const FLAT: Self = Self(13);
    pub const GLOBAL: Self = Self(14);
    pub const SCRATCH: Self = Self(15);
    pub const PSEUDO_BRANCH: Self = Self(16);
    pub const PSEUDO_BARRIER: Self = Self(17);
    pub const PSEUDO_REDUCTION: Self = Self(18);
    pub const VOP1: Self = Self(1 << 8);
    pub const VOP2: Self = Self(1 << 9);
    pub const VOPC: Self = Self(1 << 10);
    pub const VOP3: Self = Self(1 << 11);
    pub const VOP3P: Self = Self(1 << 12);
    pub const VINTRP: Self = Self(1 << 13);
    pub const DPP: Self = Self(1 << 14);
    pub const SDWA: Self = Self(1 << 15);

    const VALU_MASK: u16 = 0x3f00;

    /// True if every encoding bit of `other` is present in `self`.
    ///
    /// Base formats never combine, so for them this is plain equality.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        if other.0 & 0xff00 != 0 {
            self.0 & other.0 == other.0
        } else {
            self.0 == other.0
        }
    }

    #[inline]
    pub const fn is_valu(self) -> bool {
        self.0 & Self::VALU_MASK != 0
    }

    #[inline]
    pub const fn is_salu(self) -> bool {
        matches!(self.0, 1..=5)
    }

    #[inline]
    pub const fn is_pseudo(self) -> bool {
        matches!(self.0, 0 | 16..=18)
    }

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl BitOr for Format {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const VALU: [(Format, &str); 8] = [
            (Format::VOP1, "VOP1"),
            (Format::VOP2, "VOP2"),
            (Format::VOPC, "VOPC"),
            (Format::VOP3, "VOP3"),
            (Format::VOP3P, "VOP3P"),
            (Format::VINTRP, "VINTRP"),
            (Format::DPP, "DPP"),
            (Format::SDWA, "SDWA"),
        ];
        if self.0 & 0xff00 != 0 {
            let mut first = true;
            for (format, name) in VALU {
                if self.contains(format) {
                    if !first {
                        f.write_str("|")?;
                    }
                    f.write_str(name)?;
                    first = false;
                }
            }
            return Ok(());
        }
        f.write_str(match self.0 {
            0 => "PSEUDO",
            1 => "SOP1",
            2 => "SOP2",
            3 => "SOPK",
            4 => "SOPP",
            5 => "SOPC",
            6 => "SMEM",
            8 => "DS",
            9 => "MTBUF",
            10 => "MUBUF",
            11 => "MIMG",
            12 => "EXP",
            13 => "FLAT",
            14 => "GLOBAL",
            15 => "SCRATCH",
            16 => "PSEUDO_BRANCH",
            17 => "PSEUDO_BARRIER",
            18 => "PSEUDO_REDUCTION",
            _ => "UNKNOWN",
        })
    }
}

macro_rules! opcodes {
    ($($variant:ident => $name:literal, $format:ident;)*) => {
        /// Every opcode known to the IR, real or pseudo
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            /// The assembler mnemonic of this opcode
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }

            /// The encoding an instruction with this opcode uses unless told otherwise
            pub const fn format(self) -> Format {
                match self {
                    $(Self::$variant => Format::$format,)*
                }
            }
        }
    };
}

opcodes! {
    PStartPgm => "p_startpgm", PSEUDO;
    PPhi => "p_phi", PSEUDO;
    PLinearPhi => "p_linear_phi", PSEUDO;
    PParallelCopy => "p_parallelcopy", PSEUDO;
    PCreateVector => "p_create_vector", PSEUDO;
    PSplitVector => "p_split_vector", PSEUDO;
    PExtractVector => "p_extract_vector", PSEUDO;
    PLogicalStart => "p_logical_start", PSEUDO;
    PLogicalEnd => "p_logical_end", PSEUDO;
    PWqm => "p_wqm", PSEUDO;
    PDiscardIf => "p_discard_if", PSEUDO;
    PIsHelper => "p_is_helper", PSEUDO;
    PFsBufferStoreSmem => "p_fs_buffer_store_smem", PSEUDO;
    PAsUniform => "p_as_uniform", PSEUDO;
    PSpill => "p_spill", PSEUDO;
    PReload => "p_reload", PSEUDO;
    PBranch => "p_branch", PSEUDO_BRANCH;
    PCbranchZ => "p_cbranch_z", PSEUDO_BRANCH;
    PCbranchNz => "p_cbranch_nz", PSEUDO_BRANCH;
    PMemoryBarrierAll => "p_memory_barrier_all", PSEUDO_BARRIER;
    PMemoryBarrierShared => "p_memory_barrier_shared", PSEUDO_BARRIER;
    PReduce => "p_reduce", PSEUDO_REDUCTION;
    PInclusiveScan => "p_inclusive_scan", PSEUDO_REDUCTION;
    PExclusiveScan => "p_exclusive_scan", PSEUDO_REDUCTION;
    SMovB32 => "s_mov_b32", SOP1;
    SMovB64 => "s_mov_b64", SOP1;
    SWqmB64 => "s_wqm_b64", SOP1;
    SAndSaveexecB64 => "s_and_saveexec_b64", SOP1;
    SOrSaveexecB64 => "s_or_saveexec_b64", SOP1;
    SAndB64 => "s_and_b64", SOP2;
    SAndn2B64 => "s_andn2_b64", SOP2;
    SOrB64 => "s_or_b64", SOP2;
    SXorB32 => "s_xor_b32", SOP2;
    SCselectB32 => "s_cselect_b32", SOP2;
    SMovkI32 => "s_movk_i32", SOPK;
    SCmpLgI32 => "s_cmp_lg_i32", SOPC;
    SCmpLgU64 => "s_cmp_lg_u64", SOPC;
    SBranch => "s_branch", SOPP;
    SCbranchScc0 => "s_cbranch_scc0", SOPP;
    SCbranchScc1 => "s_cbranch_scc1", SOPP;
    SCbranchVccz => "s_cbranch_vccz", SOPP;
    SCbranchVccnz => "s_cbranch_vccnz", SOPP;
    SCbranchExecz => "s_cbranch_execz", SOPP;
    SCbranchExecnz => "s_cbranch_execnz", SOPP;
    SEndpgm => "s_endpgm", SOPP;
    SBufferLoadDword => "s_buffer_load_dword", SMEM;
    SBufferStoreDword => "s_buffer_store_dword", SMEM;
    SBufferStoreDwordx2 => "s_buffer_store_dwordx2", SMEM;
    SBufferStoreDwordx4 => "s_buffer_store_dwordx4", SMEM;
    SDcacheWb => "s_dcache_wb", SMEM;
    VMovB32 => "v_mov_b32", VOP1;
    VReadfirstlaneB32 => "v_readfirstlane_b32", VOP1;
    VSwapB32 => "v_swap_b32", VOP1;
    VAddCoU32 => "v_add_co_u32", VOP2;
    VAddU32 => "v_add_u32", VOP2;
    VAddF32 => "v_add_f32", VOP2;
    VMulF32 => "v_mul_f32", VOP2;
    VMinI32 => "v_min_i32", VOP2;
    VMaxI32 => "v_max_i32", VOP2;
    VMinU32 => "v_min_u32", VOP2;
    VMaxU32 => "v_max_u32", VOP2;
    VMinF32 => "v_min_f32", VOP2;
    VMaxF32 => "v_max_f32", VOP2;
    VAndB32 => "v_and_b32", VOP2;
    VOrB32 => "v_or_b32", VOP2;
    VXorB32 => "v_xor_b32", VOP2;
    VCndmaskB32 => "v_cndmask_b32", VOP2;
    VMulLoU32 => "v_mul_lo_u32", VOP3;
    VReadlaneB32 => "v_readlane_b32", VOP3;
    VWritelaneB32 => "v_writelane_b32", VOP3;
    VInterpP1F32 => "v_interp_p1_f32", VINTRP;
    DsSwizzleB32 => "ds_swizzle_b32", DS;
    BufferLoadDword => "buffer_load_dword", MUBUF;
    BufferStoreDword => "buffer_store_dword", MUBUF;
    ImageSample => "image_sample", MIMG;
    ImageStore => "image_store", MIMG;
    Exp => "exp", EXP;
}

impl Opcode {
    #[inline]
    pub const fn is_phi(self) -> bool {
        matches!(self, Self::PPhi | Self::PLinearPhi)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
