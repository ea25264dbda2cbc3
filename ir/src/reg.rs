use core::fmt;

use cranelift_entity::entity_impl;

/// The kind of register file a value lives in
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RegType {
    None,
    /// Scalar registers, one value shared by the whole wave
    Sgpr,
    /// Vector registers, one value per lane
    Vgpr,
    /// Vector registers whose live range follows the linear CFG rather than the logical one
    LinearVgpr,
}

/// A register class: the register file plus the size of the value in dwords.
///
/// Encoded as `size | vgpr << 5 | linear << 6`, so SGPR classes compare below VGPR classes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegClass(u8);

impl RegClass {
    const LINEAR: u8 = 1 << 6;
    const SIZE_MASK: u8 = 0x1f;
    const VGPR: u8 = 1 << 5;

    pub const S1: Self = Self(1);
    pub const S2: Self = Self(2);
    pub const S3: Self = Self(3);
    pub const S4: Self = Self(4);
    pub const S8: Self = Self(8);
    pub const S16: Self = Self(16);
    pub const V1: Self = Self(1 | Self::VGPR);
    pub const V2: Self = Self(2 | Self::VGPR);
    pub const V3: Self = Self(3 | Self::VGPR);
    pub const V4: Self = Self(4 | Self::VGPR);
    pub const V5: Self = Self(5 | Self::VGPR);
    pub const V6: Self = Self(6 | Self::VGPR);
    pub const V7: Self = Self(7 | Self::VGPR);
    pub const V1_LINEAR: Self = Self(1 | Self::VGPR | Self::LINEAR);
    pub const V2_LINEAR: Self = Self(2 | Self::VGPR | Self::LINEAR);

    pub const fn new(ty: RegType, size: u8) -> Self {
        assert!(size > 0 && size <= Self::SIZE_MASK);
        match ty {
            RegType::Sgpr => Self(size),
            RegType::Vgpr => Self(size | Self::VGPR),
            RegType::LinearVgpr => Self(size | Self::VGPR | Self::LINEAR),
            RegType::None => panic!("a register class must name a register file"),
        }
    }

    #[inline]
    pub const fn reg_type(self) -> RegType {
        if self.0 & Self::LINEAR != 0 {
            RegType::LinearVgpr
        } else if self.0 & Self::VGPR != 0 {
            RegType::Vgpr
        } else {
            RegType::Sgpr
        }
    }

    /// The size of values of this class, in dwords
    #[inline]
    pub const fn size(self) -> u32 {
        (self.0 & Self::SIZE_MASK) as u32
    }

    /// SGPRs and linear VGPRs are live along linear CFG edges
    #[inline]
    pub const fn is_linear(self) -> bool {
        self.0 & Self::VGPR == 0 || self.0 & Self::LINEAR != 0
    }

    #[inline]
    pub const fn is_sgpr(self) -> bool {
        self.0 & Self::VGPR == 0
    }

    #[inline]
    pub const fn is_vgpr(self) -> bool {
        self.0 & Self::VGPR != 0
    }

    pub const fn as_linear(self) -> Self {
        if self.is_sgpr() {
            self
        } else {
            Self(self.0 | Self::LINEAR)
        }
    }
}

impl fmt::Debug for RegClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for RegClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reg_type() {
            RegType::Sgpr => write!(f, "s{}", self.size()),
            RegType::Vgpr => write!(f, "v{}", self.size()),
            RegType::LinearVgpr => write!(f, "lv{}", self.size()),
            RegType::None => f.write_str("none"),
        }
    }
}

/// A physical register, as numbered by the hardware.
///
/// SGPRs and the special scalar registers occupy `0..256`; VGPRs start at 256.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysReg(u16);

impl PhysReg {
    pub const EXEC: Self = Self(126);
    pub const EXEC_HI: Self = Self(127);
    pub const EXEC_LO: Self = Self(126);
    pub const M0: Self = Self(124);
    /// Inline constants and the literal marker are encoded in the source-operand namespace
    pub const LITERAL: Self = Self(255);
    pub const SCC: Self = Self(253);
    pub const VCC: Self = Self(106);
    pub const VCC_HI: Self = Self(107);

    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn sgpr(index: u16) -> Self {
        assert!(index < 106, "sgpr index out of range");
        Self(index)
    }

    #[inline]
    pub const fn vgpr(index: u16) -> Self {
        assert!(index < 256, "vgpr index out of range");
        Self(256 + index)
    }

    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_vgpr(self) -> bool {
        self.0 >= 256
    }

    /// The register `dwords` registers after this one, in the same register file
    #[inline]
    pub const fn offset(self, dwords: u32) -> Self {
        Self(self.0 + dwords as u16)
    }
}

impl fmt::Debug for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::VCC => f.write_str("vcc"),
            Self::VCC_HI => f.write_str("vcc_hi"),
            Self::M0 => f.write_str("m0"),
            Self::EXEC => f.write_str("exec"),
            Self::EXEC_HI => f.write_str("exec_hi"),
            Self::SCC => f.write_str("scc"),
            Self(n) if n >= 256 => write!(f, "v{}", n - 256),
            Self(n) => write!(f, "s{n}"),
        }
    }
}

/// The identity of an SSA temporary.
///
/// Identifiers come from a per-program counter and are never reused. Id 0 is reserved to mean
/// "no temporary", e.g. for definitions of fixed hardware registers.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(u32);
entity_impl!(TempId, "%");

impl TempId {
    pub const NONE: Self = Self(0);

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// An SSA temporary: an identifier plus the register class of its value
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Temp {
    id: TempId,
    rc: RegClass,
}

impl Temp {
    #[inline]
    pub const fn new(id: TempId, rc: RegClass) -> Self {
        Self { id, rc }
    }

    /// A placeholder of class `rc` which refers to no temporary
    #[inline]
    pub const fn none(rc: RegClass) -> Self {
        Self {
            id: TempId::NONE,
            rc,
        }
    }

    #[inline]
    pub const fn id(&self) -> TempId {
        self.id
    }

    #[inline]
    pub const fn is_none(&self) -> bool {
        self.id.is_none()
    }

    #[inline]
    pub const fn reg_class(&self) -> RegClass {
        self.rc
    }

    #[inline]
    pub const fn reg_type(&self) -> RegType {
        self.rc.reg_type()
    }

    #[inline]
    pub const fn size(&self) -> u32 {
        self.rc.size()
    }
}

impl fmt::Debug for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.rc)
    }
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}
