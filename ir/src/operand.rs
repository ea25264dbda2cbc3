use core::fmt;

use crate::{PhysReg, RegClass, Temp, TempId};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum OperandKind {
    Temp(Temp),
    Constant { value: u32, is64: bool },
    Undef(RegClass),
    /// A hardware register read without an SSA value, e.g. `m0` before allocation
    Fixed(RegClass),
}

/// An instruction input.
///
/// Constants always carry a register: either their inline-constant encoding or
/// [PhysReg::LITERAL] when the value needs a trailing literal dword.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Operand {
    kind: OperandKind,
    reg: Option<PhysReg>,
}

impl Operand {
    pub const fn temp(temp: Temp) -> Self {
        Self {
            kind: OperandKind::Temp(temp),
            reg: None,
        }
    }

    /// A temporary which must be read from `reg`
    pub const fn fixed(temp: Temp, reg: PhysReg) -> Self {
        Self {
            kind: OperandKind::Temp(temp),
            reg: Some(reg),
        }
    }

    /// A physical register which is not associated with any temporary
    pub const fn reg(reg: PhysReg, rc: RegClass) -> Self {
        Self {
            kind: OperandKind::Fixed(rc),
            reg: Some(reg),
        }
    }

    pub const fn undef(rc: RegClass) -> Self {
        Self {
            kind: OperandKind::Undef(rc),
            reg: None,
        }
    }

    pub fn constant(value: u32) -> Self {
        let reg = match value {
            0..=64 => 128 + value as u16,
            0xfffffff0..=0xffffffff => (192 - value as i32) as u16,
            0x3f000000 => 240, // 0.5
            0xbf000000 => 241, // -0.5
            0x3f800000 => 242, // 1.0
            0xbf800000 => 243, // -1.0
            0x40000000 => 244, // 2.0
            0xc0000000 => 245, // -2.0
            0x40800000 => 246, // 4.0
            0xc0800000 => 247, // -4.0
            0x3e22f983 => 248, // 1/(2*pi)
            _ => PhysReg::LITERAL.index(),
        };
        Self {
            kind: OperandKind::Constant { value, is64: false },
            reg: Some(PhysReg::new(reg)),
        }
    }

    /// A 64-bit constant. Only inline-encodable values are representable.
    pub fn constant64(value: u64) -> Self {
        let reg = match value {
            0..=64 => 128 + value as u16,
            0xffff_ffff_ffff_fff0..=0xffff_ffff_ffff_ffff => (192 - value as i64) as u16,
            0x3fe0_0000_0000_0000 => 240, // 0.5
            0xbfe0_0000_0000_0000 => 241, // -0.5
            0x3ff0_0000_0000_0000 => 242, // 1.0
            0xbff0_0000_0000_0000 => 243, // -1.0
            0x4000_0000_0000_0000 => 244, // 2.0
            0xc000_0000_0000_0000 => 245, // -2.0
            0x4010_0000_0000_0000 => 246, // 4.0
            0xc010_0000_0000_0000 => 247, // -4.0
            _ => panic!("64-bit literal constants are not encodable: {value:#x}"),
        };
        Self {
            kind: OperandKind::Constant {
                value: value as u32,
                is64: true,
            },
            reg: Some(PhysReg::new(reg)),
        }
    }

    #[inline]
    pub fn is_temp(&self) -> bool {
        matches!(self.kind, OperandKind::Temp(_))
    }

    #[inline]
    pub fn as_temp(&self) -> Option<Temp> {
        match self.kind {
            OperandKind::Temp(temp) => Some(temp),
            _ => None,
        }
    }

    /// The id of the temporary read by this operand, or [TempId::NONE]
    #[inline]
    pub fn temp_id(&self) -> TempId {
        self.as_temp().map(|t| t.id()).unwrap_or(TempId::NONE)
    }

    pub fn set_temp(&mut self, temp: Temp) {
        self.kind = OperandKind::Temp(temp);
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, OperandKind::Constant { .. })
    }

    #[inline]
    pub fn is_literal(&self) -> bool {
        self.is_constant() && self.reg == Some(PhysReg::LITERAL)
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self.kind, OperandKind::Undef(_))
    }

    /// The low 32 bits of a constant operand
    pub fn constant_value(&self) -> u32 {
        match self.kind {
            OperandKind::Constant { value, .. } => value,
            _ => panic!("operand {self} is not a constant"),
        }
    }

    pub fn constant_equals(&self, value: u32) -> bool {
        matches!(self.kind, OperandKind::Constant { value: v, .. } if v == value)
    }

    /// True if this operand must be placed in a particular register
    #[inline]
    pub fn is_fixed(&self) -> bool {
        !self.is_constant() && self.reg.is_some()
    }

    pub fn set_fixed(&mut self, reg: PhysReg) {
        self.reg = Some(reg);
    }

    /// The register this operand is read from.
    ///
    /// Panics if no register has been assigned.
    pub fn phys_reg(&self) -> PhysReg {
        self.reg.unwrap_or_else(|| panic!("operand {self} has no register assigned"))
    }

    #[inline]
    pub fn reg_class(&self) -> RegClass {
        match self.kind {
            OperandKind::Temp(temp) => temp.reg_class(),
            OperandKind::Constant { is64: true, .. } => RegClass::S2,
            OperandKind::Constant { is64: false, .. } => RegClass::S1,
            OperandKind::Undef(rc) | OperandKind::Fixed(rc) => rc,
        }
    }

    /// The size of the operand in dwords
    #[inline]
    pub fn size(&self) -> u32 {
        self.reg_class().size()
    }
}

impl From<Temp> for Operand {
    fn from(temp: Temp) -> Self {
        Self::temp(temp)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OperandKind::Constant { value, is64 } => {
                if is64 {
                    write!(f, "{value:#x}u64")
                } else {
                    write!(f, "{value:#x}")
                }
            }
            OperandKind::Undef(rc) => write!(f, "undef:{rc}"),
            OperandKind::Temp(temp) => match self.reg {
                Some(reg) => write!(f, "{temp}:{reg}"),
                None => write!(f, "{temp}"),
            },
            OperandKind::Fixed(_) => write!(f, "{}", self.phys_reg()),
        }
    }
}

/// An instruction output
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Definition {
    temp: Temp,
    reg: Option<PhysReg>,
    hint: Option<PhysReg>,
}

impl Definition {
    pub const fn new(temp: Temp) -> Self {
        Self {
            temp,
            reg: None,
            hint: None,
        }
    }

    /// A temporary which must be written to `reg`
    pub const fn fixed(temp: Temp, reg: PhysReg) -> Self {
        Self {
            temp,
            reg: Some(reg),
            hint: None,
        }
    }

    /// A write to `reg` which defines no temporary
    pub const fn reg(reg: PhysReg, rc: RegClass) -> Self {
        Self {
            temp: Temp::none(rc),
            reg: Some(reg),
            hint: None,
        }
    }

    #[inline]
    pub const fn temp(&self) -> Temp {
        self.temp
    }

    #[inline]
    pub const fn temp_id(&self) -> TempId {
        self.temp.id()
    }

    #[inline]
    pub const fn is_temp(&self) -> bool {
        !self.temp.is_none()
    }

    #[inline]
    pub const fn is_fixed(&self) -> bool {
        self.reg.is_some()
    }

    pub fn set_fixed(&mut self, reg: PhysReg) {
        self.reg = Some(reg);
    }

    pub fn phys_reg(&self) -> PhysReg {
        self.reg
            .unwrap_or_else(|| panic!("definition {self} has no register assigned"))
    }

    #[inline]
    pub const fn hint(&self) -> Option<PhysReg> {
        self.hint
    }

    /// Suggest a register to the allocator without constraining it
    pub fn set_hint(&mut self, reg: PhysReg) {
        self.hint = Some(reg);
    }

    #[inline]
    pub const fn reg_class(&self) -> RegClass {
        self.temp.reg_class()
    }

    #[inline]
    pub const fn size(&self) -> u32 {
        self.temp.size()
    }
}

impl From<Temp> for Definition {
    fn from(temp: Temp) -> Self {
        Self::new(temp)
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.temp.reg_class())?;
        match (self.is_temp(), self.reg) {
            (true, Some(reg)) => write!(f, "{}:{reg}", self.temp),
            (true, None) => write!(f, "{}", self.temp),
            (false, Some(reg)) => write!(f, "{reg}"),
            (false, None) => f.write_str("_"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_constant_encoding() {
        assert_eq!(Operand::constant(0).phys_reg().index(), 128);
        assert_eq!(Operand::constant(64).phys_reg().index(), 192);
        assert_eq!(Operand::constant(u32::MAX).phys_reg().index(), 193);
        assert_eq!(Operand::constant(-16i32 as u32).phys_reg().index(), 208);
        assert_eq!(Operand::constant(0x3f800000).phys_reg().index(), 242);
        assert!(!Operand::constant(65).phys_reg().is_vgpr());
        assert!(Operand::constant(65).is_literal());
        assert!(Operand::constant(0x7f800000).is_literal());
        assert!(!Operand::constant(0x3e22f983).is_literal());
    }

    #[test]
    fn constant64_encoding() {
        let all_ones = Operand::constant64(u64::MAX);
        assert_eq!(all_ones.phys_reg().index(), 193);
        assert_eq!(all_ones.size(), 2);
        assert!(all_ones.constant_equals(u32::MAX));
        assert_eq!(Operand::constant64(0x3ff0_0000_0000_0000).phys_reg().index(), 242);
    }

    #[test]
    #[should_panic(expected = "64-bit literal")]
    fn constant64_rejects_literals() {
        Operand::constant64(0x1_0000_0000);
    }

    #[test]
    fn fixed_operands_and_definitions() {
        let t = Temp::new(TempId::from_u32(7), RegClass::S2);
        let op = Operand::fixed(t, PhysReg::EXEC);
        assert!(op.is_fixed());
        assert_eq!(op.temp_id(), t.id());
        assert_eq!(op.to_string(), "%7:exec");

        let def = Definition::reg(PhysReg::SCC, RegClass::S1);
        assert!(!def.is_temp());
        assert_eq!(def.to_string(), "s1: scc");

        assert!(!Operand::constant(3).is_fixed());
        assert_eq!(Operand::undef(RegClass::V2).size(), 2);
    }
}
