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

pub struct X86_64;

impl Arch for X86_64 {
    const ARCHITECTURE: Architecture = Architecture::X86_64;
    const WORD_SIZE: usize = 8;

    fn elf_header_arch_magic() -> u16 {
        object::elf::EM_X86_64
    }

    #[inline(always)]
    fn relocation_from_raw(r_type: u32) -> Result<RelocationKindInfo> {
        let info = match r_type {
            object::elf::R_X86_64_NONE => {
                RelocationKindInfo::new(RelocationKind::None, 0, AllowedRange::no_check())
            }
            object::elf::R_X86_64_64 => {
                RelocationKindInfo::new(RelocationKind::Absolute, 8, AllowedRange::no_check())
            }
            object::elf::R_X86_64_32 => RelocationKindInfo::new(
                RelocationKind::Absolute,
                4,
                AllowedRange::new(0, u32::MAX as i64),
            ),
            object::elf::R_X86_64_32S => RelocationKindInfo::new(
                RelocationKind::Absolute,
                4,
                AllowedRange::new(i32::MIN as i64, i32::MAX as i64),
            ),
            object::elf::R_X86_64_16 => RelocationKindInfo::new(
                RelocationKind::Absolute,
                2,
                AllowedRange::new(0, u16::MAX as i64),
            ),
            object::elf::R_X86_64_8 => RelocationKindInfo::new(
                RelocationKind::Absolute,
                1,
                AllowedRange::new(0, u8::MAX as i64),
            ),
            object::elf::R_X86_64_PC64 => {
                RelocationKindInfo::new(RelocationKind::Relative, 8, AllowedRange::no_check())
            }
            object::elf::R_X86_64_PC32 | object::elf::R_X86_64_PLT32 => RelocationKindInfo::new(
                RelocationKind::Relative,
                4,
                AllowedRange::new(i32::MIN as i64, i32::MAX as i64),
            ),
            object::elf::R_X86_64_PC16 => RelocationKindInfo::new(
                RelocationKind::Relative,
                2,
                AllowedRange::new(i16::MIN as i64, i16::MAX as i64),
            ),
            object::elf::R_X86_64_PC8 => RelocationKindInfo::new(
                RelocationKind::Relative,
                1,
                AllowedRange::new(i8::MIN as i64, i8::MAX as i64),
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
            DynamicRelocationKind::Relative => object::elf::R_X86_64_RELATIVE,
            DynamicRelocationKind::Absolute => object::elf::R_X86_64_64,
        }
    }

    fn rel_type_to_string(r_type: u32) -> Cow<'static, str> {
        if let Some(name) = const_name_by_value![
            r_type,
            R_X86_64_NONE,
            R_X86_64_64,
            R_X86_64_PC32,
            R_X86_64_GOT32,
            R_X86_64_PLT32,
            R_X86_64_COPY,
            R_X86_64_GLOB_DAT,
            R_X86_64_JUMP_SLOT,
            R_X86_64_RELATIVE,
            R_X86_64_GOTPCREL,
            R_X86_64_32,
            R_X86_64_32S,
            R_X86_64_16,
            R_X86_64_PC16,
            R_X86_64_8,
            R_X86_64_PC8,
            R_X86_64_PC64,
            R_X86_64_GOTPCRELX,
            R_X86_64_REX_GOTPCRELX
        ] {
            Cow::Borrowed(name)
        } else {
            Cow::Owned(format!("Unknown relocation type 0x{r_type:x}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rel_type_to_string() {
        assert_eq!(
            &X86_64::rel_type_to_string(object::elf::R_X86_64_32),
            stringify!(R_X86_64_32)
        );
        assert_eq!(
            &X86_64::rel_type_to_string(0xfff),
            "Unknown relocation type 0xfff"
        );
    }

    #[test]
    fn test_narrow_vs_word_classification() {
        let info = X86_64::relocation_from_raw(object::elf::R_X86_64_32).unwrap();
        assert_eq!(info.kind, RelocationKind::Absolute);
        assert!(info.byte_size() < X86_64::WORD_SIZE);

        let info = X86_64::relocation_from_raw(object::elf::R_X86_64_64).unwrap();
        assert_eq!(info.kind, RelocationKind::Absolute);
        assert_eq!(info.byte_size(), X86_64::WORD_SIZE);

        let info = X86_64::relocation_from_raw(object::elf::R_X86_64_PC32).unwrap();
        assert_eq!(info.kind, RelocationKind::Relative);

        assert!(X86_64::relocation_from_raw(object::elf::R_X86_64_TLSGD).is_err());
    }
}
