use core::{fmt, str::FromStr};

use crate::OptionsError;

/// The hardware generation being compiled for.
///
/// Generations are totally ordered, so feature checks are written as comparisons, e.g.
/// `chip_class >= ChipClass::Gfx9`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "std", derive(clap::ValueEnum))]
pub enum ChipClass {
    Gfx6,
    Gfx7,
    Gfx8,
    #[default]
    Gfx9,
    Gfx10,
}

impl ChipClass {
    /// Returns true if VGPR-to-VGPR swaps can be done with a single `v_swap_b32`
    #[inline]
    pub fn has_vgpr_swap(self) -> bool {
        self >= Self::Gfx9
    }

    /// Returns true if `v_add_u32` exists without an implicit carry-out to `vcc`
    #[inline]
    pub fn has_carry_free_add(self) -> bool {
        self >= Self::Gfx9
    }

    /// Returns true if the scalar data cache can be written back with `s_dcache_wb`
    #[inline]
    pub fn has_scalar_stores(self) -> bool {
        self >= Self::Gfx8
    }

    /// The size in dwords of a scalar memory instruction encoding
    pub fn smem_encoding_dwords(self) -> u32 {
        if self >= Self::Gfx8 { 2 } else { 1 }
    }
}

impl fmt::Display for ChipClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gfx6 => "gfx6",
            Self::Gfx7 => "gfx7",
            Self::Gfx8 => "gfx8",
            Self::Gfx9 => "gfx9",
            Self::Gfx10 => "gfx10",
        })
    }
}

impl FromStr for ChipClass {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gfx6" => Ok(Self::Gfx6),
            "gfx7" => Ok(Self::Gfx7),
            "gfx8" => Ok(Self::Gfx8),
            "gfx9" => Ok(Self::Gfx9),
            "gfx10" => Ok(Self::Gfx10),
            _ => Err(OptionsError::InvalidChipClass(s.to_string())),
        }
    }
}

/// The pipeline stage a program is compiled for
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "std", derive(clap::ValueEnum))]
pub enum ShaderStage {
    Vertex,
    TessCtrl,
    TessEval,
    Geometry,
    #[default]
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Only fragment shaders have helper invocations, and thus whole-quad-mode
    #[inline]
    pub fn has_helper_lanes(self) -> bool {
        matches!(self, Self::Fragment)
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::TessCtrl => "tess-ctrl",
            Self::TessEval => "tess-eval",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        })
    }
}

impl FromStr for ShaderStage {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vertex" | "vs" => Ok(Self::Vertex),
            "tess-ctrl" | "tcs" => Ok(Self::TessCtrl),
            "tess-eval" | "tes" => Ok(Self::TessEval),
            "geometry" | "gs" => Ok(Self::Geometry),
            "fragment" | "fs" => Ok(Self::Fragment),
            "compute" | "cs" => Ok(Self::Compute),
            _ => Err(OptionsError::InvalidShaderStage(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_class_ordering_drives_feature_checks() {
        assert!(!ChipClass::Gfx8.has_vgpr_swap());
        assert!(ChipClass::Gfx9.has_vgpr_swap());
        assert!(ChipClass::Gfx10.has_carry_free_add());
        assert!(!ChipClass::Gfx7.has_scalar_stores());
        assert_eq!(ChipClass::Gfx7.smem_encoding_dwords(), 1);
        assert_eq!(ChipClass::Gfx9.smem_encoding_dwords(), 2);
    }

    #[test]
    fn chip_class_parses_its_display_form() {
        for chip in [
            ChipClass::Gfx6,
            ChipClass::Gfx7,
            ChipClass::Gfx8,
            ChipClass::Gfx9,
            ChipClass::Gfx10,
        ] {
            assert_eq!(chip.to_string().parse::<ChipClass>(), Ok(chip));
        }
        assert_eq!("GFX8".parse::<ChipClass>(), Ok(ChipClass::Gfx8));
        assert_eq!(
            "gfx11".parse::<ChipClass>(),
            Err(OptionsError::InvalidChipClass("gfx11".to_string()))
        );
    }

    #[test]
    fn shader_stage_accepts_short_names() {
        assert_eq!("fs".parse::<ShaderStage>(), Ok(ShaderStage::Fragment));
        assert_eq!("tess-eval".parse::<ShaderStage>(), Ok(ShaderStage::TessEval));
        assert!("pixel".parse::<ShaderStage>().is_err());
        assert!(ShaderStage::Fragment.has_helper_lanes());
        assert!(!ShaderStage::Compute.has_helper_lanes());
    }
}
