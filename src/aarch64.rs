use crate::arch::Arch;
use crate::arch::Architecture;
use crate::elf::AllowedRange;
use crate::elf::DynamicRelocationKind;
use crate::elf::RelocationKind;
use crate::elf::RelocationKindInfo;
use crate::elf::const_name_by_value;
use crate::error::Result;
use anyhow::bail;
use std::borrow::Cow;

pub struct AArch64;

impl Arch for AArch64 {
    const ARCHITECTURE: Architecture = Architecture::AArch64;
    const WORD_SIZE: usize = 8;

    fn elf_header_arch_magic() -> u16 {
        object::elf::EM_AARCH64
    }

    #[inline(always)]
    fn relocation_from_raw(r_type: u32) -> Result<RelocationKindInfo> {
        // Data relocations only. Instruction-field relocations (branches,
        // ADRP pages and friends) are handled by the relaxation layer, which
        // owns the bit-level insertion they need.
        let info = match r_type {
            object::elf::R_AARCH64_NONE => {
                RelocationKindInfo::new(RelocationKind::None, 0, AllowedRange::no_check())
            }
            object::elf::R_AARCH64_ABS64 => {
                RelocationKindInfo::new(RelocationKind::Absolute, 8, AllowedRange::no_check())
            }
            object::elf::R_AARCH64_ABS32 => RelocationKindInfo::new(
                RelocationKind::Absolute,
                4,
                AllowedRange::new(-(1 << 31), (1 << 32) - 1),
            ),
            object::elf::R_AARCH64_ABS16 => RelocationKindInfo::new(
                RelocationKind::Absolute,
                2,
                AllowedRange::new(-(1 << 15), (1 << 16) - 1),
            ),
            object::elf::R_AARCH64_PREL64 => {
                RelocationKindInfo::new(RelocationKind::Relative, 8, AllowedRange::no_check())
            }
            object::elf::R_AARCH64_PREL32 => RelocationKindInfo::new(
                RelocationKind::Relative,
                4,
                AllowedRange::new(-(1 << 31), (1 << 32) - 1),
            ),
            object::elf::R_AARCH64_PREL16 => RelocationKindInfo::new(
                RelocationKind::Relative,
                2,
                AllowedRange::new(-(1 << 15), (1 << 16) - 1),
            ),
            _ => bail!(
                "Unsupported relocation type {}",
                Self::rel_type_to_string(r_type)
            ),
        };
        Ok(info)
    }

    fn get_dynamic_relocation_type(relocation: DynamicRelocationKind) -> u32 {
        match relocation {
            DynamicRelocationKind::Relative => object::elf::R_AARCH64_RELATIVE,
            DynamicRelocationKind::Absolute => object::elf::R_AARCH64_ABS64,
        }
    }

    fn rel_type_to_string(r_type: u32) -> Cow<'static, str> {
        if let Some(name) = const_name_by_value![
            r_type,
            R_AARCH64_NONE,
            R_AARCH64_ABS64,
            R_AARCH64_ABS32,
            R_AARCH64_ABS16,
            R_AARCH64_PREL64,
            R_AARCH64_PREL32,
            R_AARCH64_PREL16,
            R_AARCH64_GLOB_DAT,
            R_AARCH64_JUMP_SLOT,
            R_AARCH64_RELATIVE,
            R_AARCH64_COPY,
            R_AARCH64_CALL26,
            R_AARCH64_JUMP26,
            R_AARCH64_ADR_PREL_PG_HI21
        ] {
            Cow::Borrowed(name)
        } else {
            Cow::Owned(format!("Unknown relocation type 0x{r_type:x}"))
        }
    }
}
