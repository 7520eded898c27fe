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

pub struct Ppc64;

impl Arch for Ppc64 {
    const ARCHITECTURE: Architecture = Architecture::Ppc64;
    const WORD_SIZE: usize = 8;

    fn elf_header_arch_magic() -> u16 {
        object::elf::EM_PPC64
    }

    #[inline(always)]
    fn relocation_from_raw(r_type: u32) -> Result<RelocationKindInfo> {
        let info = match r_type {
            object::elf::R_PPC64_NONE => {
                RelocationKindInfo::new(RelocationKind::None, 0, AllowedRange::no_check())
            }
            object::elf::R_PPC64_ADDR64 => {
                RelocationKindInfo::new(RelocationKind::Absolute, 8, AllowedRange::no_check())
            }
            object::elf::R_PPC64_ADDR32 => RelocationKindInfo::new(
                RelocationKind::Absolute,
                4,
                AllowedRange::new(-(1 << 31), (1 << 32) - 1),
            ),
            object::elf::R_PPC64_ADDR16 => RelocationKindInfo::new(
                RelocationKind::Absolute,
                2,
                AllowedRange::new(-(1 << 15), (1 << 16) - 1),
            ),
            object::elf::R_PPC64_REL64 => {
                RelocationKindInfo::new(RelocationKind::Relative, 8, AllowedRange::no_check())
            }
            object::elf::R_PPC64_REL32 => RelocationKindInfo::new(
                RelocationKind::Relative,
                4,
                AllowedRange::new(-(1 << 31), (1 << 32) - 1),
            ),
            object::elf::R_PPC64_REL16 => RelocationKindInfo::new(
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
            DynamicRelocationKind::Relative => object::elf::R_PPC64_RELATIVE,
            DynamicRelocationKind::Absolute => object::elf::R_PPC64_ADDR64,
        }
    }

    fn rel_type_to_string(r_type: u32) -> Cow<'static, str> {
        if let Some(name) = const_name_by_value![
            r_type,
            R_PPC64_NONE,
            R_PPC64_ADDR64,
            R_PPC64_ADDR32,
            R_PPC64_ADDR16,
            R_PPC64_REL64,
            R_PPC64_REL32,
            R_PPC64_REL16,
            R_PPC64_GLOB_DAT,
            R_PPC64_JMP_SLOT,
            R_PPC64_RELATIVE,
            R_PPC64_COPY,
            R_PPC64_REL24,
            R_PPC64_TOC16
        ] {
            Cow::Borrowed(name)
        } else {
            Cow::Owned(format!("Unknown relocation type 0x{r_type:x}"))
        }
    }
}
